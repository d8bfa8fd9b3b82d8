/// Slash commands understood in the chat prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlashCommand {
    Help,
    Scores,
    Address,
    ChatModel,
    Voice,
    Listen,
    StopListening,
    Save,
    Quit,
}

const COMMANDS: &[(&str, SlashCommand)] = &[
    ("help", SlashCommand::Help),
    ("scores", SlashCommand::Scores),
    ("address", SlashCommand::Address),
    ("chat_model", SlashCommand::ChatModel),
    ("voice", SlashCommand::Voice),
    ("listen", SlashCommand::Listen),
    ("stop_listening", SlashCommand::StopListening),
    ("save", SlashCommand::Save),
    ("quit", SlashCommand::Quit),
    ("exit", SlashCommand::Quit),
];

/// `name` must already be lowercased.
pub(crate) fn lookup(name: &str) -> Option<SlashCommand> {
    COMMANDS
        .iter()
        .find(|(command, _)| *command == name)
        .map(|(_, kind)| *kind)
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/scores",
    "/address",
    "/chat_model",
    "/voice",
    "/listen",
    "/stop_listening",
    "/save",
    "/help",
    "/quit",
];
