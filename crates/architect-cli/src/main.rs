mod logging;
mod repl;
mod server;

use std::env;
use std::fs;
use std::io::{self, BufReader, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use architect_contracts::analysis::AnalysisResult;
use architect_contracts::event_payload;
use architect_contracts::events::EventWriter;
use architect_contracts::navigation::{ResultsAddress, ResultsState, ResultsView};
use architect_engine::{
    Backend, BackendMode, ChatSession, EngineConfig, Progress, SubmissionPipeline,
    UploadCollector,
};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use uuid::Uuid;

use crate::repl::{format_scores, ChatRepl};
use crate::server::AppState;

const DEFAULT_RESULTS_BASE: &str = "http://127.0.0.1:3000";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_EVENTS_FILE: &str = "events.jsonl";

const EXIT_FAILED: i32 = 1;
const EXIT_NO_ANALYSIS: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "architect", version, about = "Virtual Architect floorplan review")]
struct Cli {
    /// Debug logging. `RUST_LOG` overrides it.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload and analyze a floorplan, then print its results address.
    Submit(SubmitArgs),
    /// Show the analysis carried by a results address.
    Results(ResultsArgs),
    /// Chat about the analysis carried by a results address.
    Chat(ChatArgs),
    /// Check an analysis JSON document (file or stdin).
    Validate(ValidateArgs),
    /// Serve the upload, analyze and chat endpoints.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct BackendArgs {
    /// Base URL of a running `architect serve`; its endpoints do the work.
    #[arg(long, conflicts_with = "dryrun")]
    endpoint: Option<String>,
    /// Offline deterministic analysis and chat.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    chat_model: Option<String>,
    #[arg(long)]
    upload_dir: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    events: Option<PathBuf>,
}

impl BackendArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(model) = self.vision_model.clone() {
            config.vision_model = Some(model);
        }
        if let Some(model) = self.chat_model.clone() {
            config.chat_model = Some(model);
        }
        if let Some(dir) = self.upload_dir.clone() {
            config.upload_dir = dir;
        }
        if let Some(secs) = self.timeout_secs.filter(|secs| *secs > 0) {
            config.http_timeout = std::time::Duration::from_secs(secs);
        }
        config
    }

    fn mode(&self) -> BackendMode {
        match self.endpoint.as_deref() {
            Some(base_url) => BackendMode::Remote {
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            None if self.dryrun => BackendMode::Dryrun,
            None => BackendMode::OpenAi,
        }
    }

    fn event_writer(&self, session_id: &str) -> EventWriter {
        EventWriter::new(
            self.events
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVENTS_FILE)),
            session_id,
        )
    }
}

#[derive(Debug, Args)]
struct SubmitArgs {
    image: PathBuf,
    /// Base of the results address that is printed.
    #[arg(long, default_value = DEFAULT_RESULTS_BASE)]
    base: String,
    /// Continue into chat once the analysis is shown.
    #[arg(long)]
    chat: bool,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Args)]
struct ResultsArgs {
    address: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    address: String,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    /// Reads stdin when omitted.
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen address; falls back to ARCHITECT_HTTP_ADDR, then 127.0.0.1:3000.
    #[arg(long)]
    addr: Option<SocketAddr>,
    /// Public origin for upload URLs when it differs from the listen address.
    #[arg(long)]
    public_url: Option<String>,
    #[command(flatten)]
    backend: BackendArgs,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("architect error: {err:#}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Submit(args) => run_submit(args),
        Command::Results(args) => run_results(args),
        Command::Chat(args) => run_chat(args),
        Command::Validate(args) => run_validate(args),
        Command::Serve(args) => run_serve(args),
    }
}

fn run_submit(args: SubmitArgs) -> Result<i32> {
    let session_id = Uuid::new_v4().to_string();
    let config = args.backend.config();
    let mode = args.backend.mode();
    let events = args.backend.event_writer(&session_id);
    record_session(&events, "submit", &mode);
    let backend = Backend::build(&config, &mode, None)?;

    let progress = Progress::default();
    let mut collector = UploadCollector::new(progress.clone());
    collector.select_path(&args.image)?;
    let pipeline = SubmissionPipeline::new(
        Arc::clone(&backend.store),
        Arc::clone(&backend.analyzer),
        events.clone(),
        progress,
    );
    let submission = match pipeline.submit_selected(&mut collector) {
        Ok(submission) => submission,
        Err(err) => {
            error!(error = %err, "submission failed");
            eprintln!("{}", err.user_message());
            return Ok(EXIT_FAILED);
        }
    };

    println!("{}", submission.address.to_url(&args.base)?);
    let view = ResultsView::load(&submission.address);
    let code = show_results(&view, &events);
    if code != 0 || !args.chat {
        return Ok(code);
    }
    let Some(analysis) = view.analysis().cloned() else {
        return Ok(EXIT_NO_ANALYSIS);
    };
    let address = submission.address.to_url(&args.base)?;
    run_repl(analysis, address, &backend, config, mode, events)
}

fn run_results(args: ResultsArgs) -> Result<i32> {
    let events = match args.events {
        Some(path) => EventWriter::new(path, Uuid::new_v4().to_string()),
        None => EventWriter::disabled(Uuid::new_v4().to_string()),
    };
    let view = ResultsView::load(&ResultsAddress::parse(&args.address)?);
    Ok(show_results(&view, &events))
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let session_id = Uuid::new_v4().to_string();
    let events = args.backend.event_writer(&session_id);
    let view = ResultsView::load(&ResultsAddress::parse(&args.address)?);
    let analysis = match &view.state {
        ResultsState::Ready(analysis) => analysis.clone(),
        _ => return Ok(show_results(&view, &events)),
    };

    let config = args.backend.config();
    let mode = args.backend.mode();
    record_session(&events, "chat", &mode);
    let backend = Backend::build(&config, &mode, None)?;
    run_repl(analysis, args.address, &backend, config, mode, events)
}

fn run_repl(
    analysis: AnalysisResult,
    address: String,
    backend: &Backend,
    config: EngineConfig,
    mode: BackendMode,
    events: EventWriter,
) -> Result<i32> {
    let session = Arc::new(ChatSession::open(
        analysis,
        Arc::clone(&backend.chat),
        events,
    ));
    let mut stdout = io::stdout();
    ChatRepl::new(session, address, config, mode)
        .run(BufReader::new(io::stdin()), &mut stdout)?;
    Ok(0)
}

fn run_validate(args: ValidateArgs) -> Result<i32> {
    let raw = match args.path.as_ref() {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("failed reading stdin")?;
            raw
        }
    };
    match AnalysisResult::from_json_str(&raw) {
        Ok(result) => {
            println!("valid");
            print!("{}", format_scores(&result));
            Ok(0)
        }
        Err(err) => {
            eprintln!("invalid: {err}");
            Ok(EXIT_NO_ANALYSIS)
        }
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    if args.backend.endpoint.is_some() {
        bail!("serve hosts the endpoints itself; --endpoint does not apply");
    }
    let addr = match args.addr {
        Some(addr) => addr,
        None => env::var("ARCHITECT_HTTP_ADDR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse()
            .context("invalid ARCHITECT_HTTP_ADDR")?,
    };
    let public_origin = args
        .public_url
        .as_deref()
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{addr}"));

    let session_id = Uuid::new_v4().to_string();
    let config = args.backend.config();
    let mode = args.backend.mode();
    let events = args.backend.event_writer(&session_id);
    record_session(&events, "serve", &mode);

    // Providers hold blocking HTTP clients, which must be created and dropped
    // outside the async runtime.
    let backend = Backend::build(&config, &mode, Some(format!("{public_origin}/uploads")))?;
    let Some(store) = backend.local_store.clone() else {
        bail!("serve requires a local upload store");
    };
    let state = AppState::new(
        store,
        Arc::clone(&backend.analyzer),
        Arc::clone(&backend.chat),
        events,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let served = runtime.block_on(server::serve(state, addr));
    drop(runtime);
    drop(backend);
    served?;
    Ok(0)
}

/// Prints the score card, or the reason there is none. Returns the exit code.
fn show_results(view: &ResultsView, events: &EventWriter) -> i32 {
    let reason = match &view.state {
        ResultsState::Ready(result) => {
            println!("Image: {}", view.image_url);
            print!("{}", format_scores(result));
            return 0;
        }
        ResultsState::Invalid(err) => err.to_string(),
        ResultsState::Missing => "no analysis in address".to_string(),
    };
    eprintln!("No analysis available: {reason}");
    events.record(
        "analysis_rejected",
        event_payload! { "image_url" => view.image_url, "reason" => reason },
    );
    EXIT_NO_ANALYSIS
}

fn record_session(events: &EventWriter, command: &str, mode: &BackendMode) {
    let mode = match mode {
        BackendMode::OpenAi => "openai".to_string(),
        BackendMode::Dryrun => "dryrun".to_string(),
        BackendMode::Remote { base_url } => format!("remote:{base_url}"),
    };
    info!(command, %mode, session_id = events.session_id(), "session started");
    events.record(
        "session_started",
        event_payload! { "command" => command, "mode" => mode },
    );
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};
    use architect_engine::BackendMode;

    #[test]
    fn submit_flags_select_the_backend() {
        let cli = Cli::parse_from(["architect", "submit", "plan.png", "--dryrun", "--chat"]);
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert!(args.chat);
        assert_eq!(args.backend.mode(), BackendMode::Dryrun);

        let cli = Cli::parse_from([
            "architect",
            "submit",
            "plan.png",
            "--endpoint",
            "http://127.0.0.1:3000/",
        ]);
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(
            args.backend.mode(),
            BackendMode::Remote {
                base_url: "http://127.0.0.1:3000".to_string()
            }
        );
    }

    #[test]
    fn endpoint_and_dryrun_conflict() {
        let parsed = Cli::try_parse_from([
            "architect",
            "chat",
            "/analysis?image=x",
            "--dryrun",
            "--endpoint",
            "http://127.0.0.1:3000",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn flags_override_environment_config() {
        let cli = Cli::parse_from([
            "architect",
            "--debug",
            "serve",
            "--addr",
            "0.0.0.0:8080",
            "--chat-model",
            "gpt-4.1-mini",
            "--timeout-secs",
            "5",
        ]);
        assert!(cli.debug);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.addr.map(|addr| addr.port()), Some(8080));
        let config = args.backend.config();
        assert_eq!(config.chat_model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(config.http_timeout.as_secs(), 5);
    }
}
