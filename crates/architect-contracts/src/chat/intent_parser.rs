use super::command_registry::{lookup, SlashCommand};

/// One line of chat input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Blank input.
    Noop,
    /// Plain text, trimmed, to be sent as a chat turn.
    Ask(String),
    Help,
    ShowScores,
    ShowAddress,
    /// `None` asks for the current model.
    SetChatModel(Option<String>),
    ToggleVoice,
    StartDictation,
    StopDictation,
    SaveTranscript(Option<String>),
    Quit,
    Unknown { command: String, arg: String },
}

/// Splits a command argument shell-style so quoted paths keep their spaces.
/// Unbalanced quotes fall back to whitespace splitting.
fn path_argument(arg: &str) -> Option<String> {
    let parts = shell_words::split(arg).unwrap_or_else(|_| {
        arg.split_whitespace().map(str::to_string).collect()
    });
    let joined = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

pub fn parse_intent(text: &str) -> Intent {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Intent::Noop;
    }
    let Some(tail) = trimmed.strip_prefix('/') else {
        return Intent::Ask(trimmed.to_string());
    };
    let name_len = tail
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(tail.len());
    if name_len == 0 {
        return Intent::Ask(trimmed.to_string());
    }

    let name = tail[..name_len].to_ascii_lowercase();
    let arg = tail[name_len..].trim();
    match lookup(&name) {
        Some(SlashCommand::Help) => Intent::Help,
        Some(SlashCommand::Scores) => Intent::ShowScores,
        Some(SlashCommand::Address) => Intent::ShowAddress,
        Some(SlashCommand::ChatModel) => {
            Intent::SetChatModel((!arg.is_empty()).then(|| arg.to_string()))
        }
        Some(SlashCommand::Voice) => Intent::ToggleVoice,
        Some(SlashCommand::Listen) => Intent::StartDictation,
        Some(SlashCommand::StopListening) => Intent::StopDictation,
        Some(SlashCommand::Save) => Intent::SaveTranscript(path_argument(arg)),
        Some(SlashCommand::Quit) => Intent::Quit,
        None => Intent::Unknown {
            command: name,
            arg: arg.to_string(),
        },
    }
}
