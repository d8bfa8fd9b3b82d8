use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn,hyper_util=warn,rustls=warn";
const DEBUG_FILTER: &str = "debug,reqwest=info,hyper=info,hyper_util=info,rustls=info";

/// Logs go to stderr so stdout stays clean for addresses and chat replies.
/// `RUST_LOG` wins over both presets.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
    });
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
