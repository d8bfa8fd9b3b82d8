use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{bail, Context, Result};
use architect_contracts::analysis::{build_context, AnalysisResult};
use architect_contracts::chat::{Message, Transcript};
use architect_contracts::event_payload;
use architect_contracts::events::EventWriter;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::openai::{completion_text, response_json_or_error, OpenAiClient};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Appended in place of a reply when the turn fails for any reason.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I encountered an error while analyzing your question. Please try again.";

/// Returned when the model answers with no text.
pub const EMPTY_REPLY: &str = "I apologize, I couldn't generate a response.";

/// One stateless chat request: the new message plus the rendered analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub analysis_context: String,
}

pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn reply(&self, request: &ChatRequest) -> Result<String>;
}

pub fn system_instruction(analysis_context: &str) -> String {
    format!(
        "You are a Virtual Architect, an AI assistant specialized in analyzing floorplans and \
providing architectural advice.\n\
You have analyzed a floorplan with the following results:\n\n\
{analysis_context}\n\n\
Respond to the user's questions about their floorplan based on this analysis. Be helpful, \
specific, and provide actionable recommendations.\n\
If asked about something not covered in the analysis, you can make reasonable assumptions \
based on common architectural principles, but make it clear when you're making an assumption \
versus referring to the specific analysis.\n\
Keep responses concise and focused on architectural insights."
    )
}

pub struct OpenAiChatProvider {
    client: OpenAiClient,
    model: String,
}

impl OpenAiChatProvider {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn reply(&self, request: &ChatRequest) -> Result<String> {
        let payload = chat_request_payload(&self.model, request);
        let response = self
            .client
            .chat_completion(&payload)
            .context("chat completion failed")?;
        Ok(completion_text(&response).unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }
}

fn chat_request_payload(model: &str, request: &ChatRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system_instruction(&request.analysis_context)},
            {"role": "user", "content": request.message}
        ]
    })
}

/// Client for a remote `POST /api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    endpoint: String,
    http: HttpClient,
}

impl HttpChatClient {
    pub fn new(base_url: &str, http: HttpClient) -> Self {
        Self {
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            http,
        }
    }
}

impl ChatProvider for HttpChatClient {
    fn name(&self) -> &str {
        "http"
    }

    fn reply(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .with_context(|| format!("chat request failed ({})", self.endpoint))?;
        let payload = response_json_or_error("Chat", response)?;
        content_from_payload(&payload)
    }
}

fn content_from_payload(payload: &Value) -> Result<String> {
    match payload.get("content").and_then(Value::as_str) {
        Some(content) if content.trim().is_empty() => Ok(EMPTY_REPLY.to_string()),
        Some(content) => Ok(content.to_string()),
        None => bail!("chat response did not include content"),
    }
}

/// Offline provider that answers from the first line of the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunChatProvider;

impl ChatProvider for DryrunChatProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn reply(&self, request: &ChatRequest) -> Result<String> {
        let grounding = request
            .analysis_context
            .lines()
            .next()
            .unwrap_or("no analysis");
        Ok(format!(
            "Based on the analysis ({grounding}), here is my take on \"{}\": start with the \
lowest scoring area and check each change against the traffic flow.",
            request.message.trim()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    /// A turn was already in flight; nothing was sent.
    Rejected,
    /// The turn completed. `degraded` means the reply is the fallback text.
    Answered { reply: String, degraded: bool },
}

/// Conversation about one validated analysis.
///
/// Turns are single-flight: `send_turn` while another turn awaits its reply is
/// rejected. Every accepted turn ends with exactly one assistant message.
pub struct ChatSession {
    analysis: AnalysisResult,
    provider: RwLock<Arc<dyn ChatProvider>>,
    transcript: Mutex<Transcript>,
    busy: AtomicBool,
    events: EventWriter,
}

impl ChatSession {
    pub fn open(
        analysis: AnalysisResult,
        provider: Arc<dyn ChatProvider>,
        events: EventWriter,
    ) -> Self {
        Self {
            analysis,
            provider: RwLock::new(provider),
            transcript: Mutex::new(Transcript::with_welcome()),
            busy: AtomicBool::new(false),
            events,
        }
    }

    pub fn analysis(&self) -> &AnalysisResult {
        &self.analysis
    }

    pub fn state(&self) -> TurnState {
        if self.busy.load(Ordering::SeqCst) {
            TurnState::AwaitingResponse
        } else {
            TurnState::Idle
        }
    }

    pub fn transcript(&self) -> Transcript {
        self.lock_transcript().clone()
    }

    pub fn provider_name(&self) -> String {
        self.current_provider().name().to_string()
    }

    /// Takes effect from the next turn; an in-flight turn keeps its provider.
    pub fn replace_provider(&self, provider: Arc<dyn ChatProvider>) {
        *self
            .provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = provider;
    }

    pub fn send_turn(&self, text: &str) -> TurnOutcome {
        let message = text.trim();
        if message.is_empty() {
            return TurnOutcome::Ignored;
        }
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("chat turn rejected while awaiting response");
            self.events.record("chat_turn_rejected", event_payload! {});
            return TurnOutcome::Rejected;
        };

        self.lock_transcript().push(Message::user(message));
        let request = ChatRequest {
            message: message.to_string(),
            analysis_context: build_context(&self.analysis),
        };
        let provider = self.current_provider();
        let (reply, degraded) = match provider.reply(&request) {
            Ok(reply) => (reply, false),
            Err(err) => {
                warn!(provider = provider.name(), error = %format!("{err:#}"), "chat turn failed");
                self.events.record(
                    "chat_turn_failed",
                    event_payload! {
                        "provider" => provider.name(),
                        "error" => format!("{err:#}"),
                    },
                );
                (FALLBACK_REPLY.to_string(), true)
            }
        };
        self.lock_transcript().push(Message::assistant(reply.clone()));

        self.events.record(
            "chat_turn",
            event_payload! {
                "provider" => provider.name(),
                "message_chars" => message.chars().count(),
                "reply_chars" => reply.chars().count(),
                "degraded" => degraded,
            },
        );

        TurnOutcome::Answered { reply, degraded }
    }

    fn current_provider(&self) -> Arc<dyn ChatProvider> {
        Arc::clone(&self.provider.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a single-flight flag for its lifetime.
pub(crate) struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use architect_contracts::analysis::{build_context, validate, AnalysisResult};
    use architect_contracts::chat::{Role, WELCOME_MESSAGE};
    use architect_contracts::events::EventWriter;
    use serde_json::{json, Value};

    use super::{
        chat_request_payload, content_from_payload, system_instruction, ChatProvider,
        ChatRequest, ChatSession, DryrunChatProvider, HttpChatClient, TurnOutcome, TurnState,
        EMPTY_REPLY, FALLBACK_REPLY,
    };
    use crate::openai::tests::{stub_client, stub_server};

    fn analysis() -> AnalysisResult {
        validate(&json!({
            "layout": {"score": 72, "feedback": ["Kitchen is isolated", "Good bedroom sizes"]},
            "lighting": {"score": 65, "feedback": ["North rooms are dim"]},
            "flow": {"score": 80, "feedback": []}
        }))
        .expect("valid analysis")
    }

    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ChatProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn reply(&self, request: &ChatRequest) -> Result<String> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.clone());
            Ok("Open the kitchen wall.".to_string())
        }
    }

    struct FailingProvider;

    impl ChatProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn reply(&self, _request: &ChatRequest) -> Result<String> {
            Err(anyhow!("Chat request failed (503): upstream unavailable"))
        }
    }

    struct GatedProvider {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ChatProvider for GatedProvider {
        fn name(&self) -> &str {
            "gated"
        }

        fn reply(&self, _request: &ChatRequest) -> Result<String> {
            self.started.lock().expect("started lock").send(())?;
            self.release
                .lock()
                .expect("release lock")
                .recv_timeout(Duration::from_secs(10))?;
            Ok("done".to_string())
        }
    }

    #[test]
    fn session_opens_with_single_welcome() {
        let session = ChatSession::open(
            analysis(),
            Arc::new(DryrunChatProvider),
            EventWriter::disabled("test"),
        );
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].role, Role::Assistant);
        assert_eq!(transcript.messages()[0].content, WELCOME_MESSAGE);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn blank_input_is_ignored_without_a_request() {
        let provider = Arc::new(RecordingProvider::default());
        let session = ChatSession::open(
            analysis(),
            provider.clone(),
            EventWriter::disabled("test"),
        );
        assert_eq!(session.send_turn("   \n"), TurnOutcome::Ignored);
        assert!(provider.requests.lock().expect("lock").is_empty());
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn answered_turn_sends_message_with_fresh_context() {
        let provider = Arc::new(RecordingProvider::default());
        let session = ChatSession::open(
            analysis(),
            provider.clone(),
            EventWriter::disabled("test"),
        );

        let outcome = session.send_turn("  Where should the pantry go?  ");
        assert_eq!(
            outcome,
            TurnOutcome::Answered {
                reply: "Open the kitchen wall.".to_string(),
                degraded: false
            }
        );

        let requests = provider.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "Where should the pantry go?");
        assert_eq!(requests[0].analysis_context, build_context(&analysis()));

        let transcript = session.transcript();
        let roles: Vec<Role> = transcript.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn provider_failure_appends_fallback_reply() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let session = ChatSession::open(
            analysis(),
            Arc::new(FailingProvider),
            EventWriter::new(&events_path, "sess-1"),
        );

        let outcome = session.send_turn("Is the lighting ok?");
        assert_eq!(
            outcome,
            TurnOutcome::Answered {
                reply: FALLBACK_REPLY.to_string(),
                degraded: true
            }
        );
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.last().map(|m| m.content.as_str()), Some(FALLBACK_REPLY));
        assert_eq!(session.state(), TurnState::Idle);

        let types: Vec<String> = std::fs::read_to_string(&events_path)?
            .lines()
            .map(|line| serde_json::from_str::<Value>(line))
            .collect::<Result<Vec<Value>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["chat_turn_failed", "chat_turn"]);
        Ok(())
    }

    #[test]
    fn second_turn_is_rejected_while_awaiting_response() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let session = Arc::new(ChatSession::open(
            analysis(),
            Arc::new(GatedProvider {
                started: Mutex::new(started_tx),
                release: Mutex::new(release_rx),
            }),
            EventWriter::disabled("test"),
        ));

        let worker = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send_turn("first"))
        };
        started_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("first turn started");

        assert_eq!(session.state(), TurnState::AwaitingResponse);
        assert_eq!(session.send_turn("second"), TurnOutcome::Rejected);

        release_tx.send(()).expect("release");
        let first = worker.join().expect("worker");
        assert!(matches!(first, TurnOutcome::Answered { degraded: false, .. }));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert!(transcript.messages().iter().all(|m| m.content != "second"));
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn replaced_provider_serves_next_turn() {
        let session = ChatSession::open(
            analysis(),
            Arc::new(FailingProvider),
            EventWriter::disabled("test"),
        );
        session.replace_provider(Arc::new(DryrunChatProvider));
        assert_eq!(session.provider_name(), "dryrun");
        let TurnOutcome::Answered { reply, degraded } = session.send_turn("Any tips?") else {
            panic!("expected answer");
        };
        assert!(!degraded);
        assert!(reply.contains("Layout Efficiency Score: 72/100"));
    }

    #[test]
    fn request_payload_is_system_plus_single_user_message() {
        let request = ChatRequest {
            message: "Bigger windows?".to_string(),
            analysis_context: "Natural Lighting Score: 65/100".to_string(),
        };
        let payload = chat_request_payload("gpt-4o-mini", &request);
        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1], json!({"role": "user", "content": "Bigger windows?"}));

        let instruction = messages[0]["content"].as_str().expect("system text");
        assert!(instruction.starts_with("You are a Virtual Architect"));
        assert!(instruction.contains("Natural Lighting Score: 65/100"));
        assert!(instruction.contains("making an assumption"));
        assert_eq!(instruction, system_instruction(&request.analysis_context));
    }

    #[test]
    fn chat_request_uses_camel_case_on_the_wire() -> anyhow::Result<()> {
        let request = ChatRequest {
            message: "hi".to_string(),
            analysis_context: "ctx".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request)?,
            json!({"message": "hi", "analysisContext": "ctx"})
        );
        Ok(())
    }

    #[test]
    fn endpoint_payload_requires_content() {
        assert_eq!(
            content_from_payload(&json!({"content": "Move the door."})).unwrap(),
            "Move the door."
        );
        assert_eq!(
            content_from_payload(&json!({"content": "  "})).unwrap(),
            EMPTY_REPLY
        );
        assert!(content_from_payload(&json!({"error": "Failed to generate response"})).is_err());
    }

    #[test]
    fn endpoint_errors_fall_back_and_blank_replies_are_replaced() -> anyhow::Result<()> {
        let failing = stub_server(500, r#"{"error":"Failed to generate response"}"#)?;
        let session = ChatSession::open(
            analysis(),
            Arc::new(HttpChatClient::new(&failing.base_url, stub_client()?)),
            EventWriter::disabled("test"),
        );
        assert_eq!(
            session.send_turn("Is the hallway too long?"),
            TurnOutcome::Answered {
                reply: FALLBACK_REPLY.to_string(),
                degraded: true
            }
        );
        assert_eq!(failing.hits(), 1);

        let blank = stub_server(200, r#"{"content":""}"#)?;
        session.replace_provider(Arc::new(HttpChatClient::new(&blank.base_url, stub_client()?)));
        assert_eq!(
            session.send_turn("And the bedrooms?"),
            TurnOutcome::Answered {
                reply: EMPTY_REPLY.to_string(),
                degraded: false
            }
        );
        assert_eq!(
            session.transcript().last().map(|m| m.content.as_str()),
            Some(EMPTY_REPLY)
        );
        Ok(())
    }
}
