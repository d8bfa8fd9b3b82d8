use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// Builds a payload from `key => value` pairs, converting values with `json!`.
#[macro_export]
macro_rules! event_payload {
    ($($key:literal => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut payload = $crate::events::EventPayload::new();
        $(payload.insert($key.to_string(), ::serde_json::json!($value));)*
        payload
    }};
}

/// Session audit log, one compact JSON object per line.
///
/// Every event carries `type`, `session_id` and an RFC 3339 `ts`. Payload keys
/// with those names are dropped. A disabled writer builds events without
/// persisting them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    session_id: String,
    sink: Option<Mutex<PathBuf>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(session_id.into(), Some(path.into()))
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::with_sink(session_id.into(), None)
    }

    fn with_sink(session_id: String, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id,
                sink: path.map(Mutex::new),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.sink.is_some()
    }

    /// Appends one event and returns it as written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.build(event_type, payload);
        if let Some(sink) = self.inner.sink.as_ref() {
            let path = sink
                .lock()
                .map_err(|_| anyhow!("event log lock poisoned"))?;
            append_line(&path, &event)
                .with_context(|| format!("failed to append event to {}", path.display()))?;
        }
        Ok(event)
    }

    /// Like [`emit`](Self::emit) for callers that carry on regardless; a failed
    /// write is logged.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            warn!(event_type, error = %format!("{err:#}"), "event not recorded");
        }
    }

    fn build(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event: EventPayload = payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert("session_id".to_string(), Value::from(self.session_id()));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        Value::Object(event)
    }
}

fn append_line(path: &Path, event: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(&line)?;
    Ok(())
}
