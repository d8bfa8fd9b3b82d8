pub mod analyze;
pub mod backend;
pub mod chat;
pub mod config;
pub mod openai;
pub mod pipeline;
pub mod store;
pub mod upload;
pub mod voice;

pub use analyze::{AnalysisProvider, DryrunAnalyzer, HttpAnalysisClient, OpenAiVisionAnalyzer};
pub use backend::{Backend, BackendMode};
pub use chat::{
    ChatProvider, ChatRequest, ChatSession, DryrunChatProvider, HttpChatClient,
    OpenAiChatProvider, TurnOutcome, TurnState, EMPTY_REPLY, FALLBACK_REPLY,
};
pub use config::EngineConfig;
pub use pipeline::{Submission, SubmissionError, SubmissionPipeline};
pub use store::{AssetStore, HttpAssetStore, LocalAssetStore};
pub use upload::{Progress, UploadCollector, UploadedFile};
pub use voice::{
    CommandDictation, CommandNarration, Dictation, DictationEvent, Narration, SilentNarration,
};
