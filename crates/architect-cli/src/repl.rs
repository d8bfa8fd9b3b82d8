use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use architect_contracts::analysis::{narration_summary, AnalysisResult, DimensionKind};
use architect_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use architect_engine::backend::chat_provider_for_model;
use architect_engine::{
    BackendMode, ChatSession, CommandDictation, CommandNarration, Dictation, DictationEvent,
    EngineConfig, Narration, SilentNarration, TurnOutcome,
};
use tracing::{info, warn};

const INPUT_POLL: Duration = Duration::from_millis(50);

enum LineInput {
    Line(String),
    Closed,
}

/// Interactive chat over one validated analysis.
///
/// Typed lines and dictated utterances are both submitted as turns; dictation
/// events are drained before the next typed line is read.
pub struct ChatRepl {
    session: Arc<ChatSession>,
    address: String,
    config: EngineConfig,
    mode: BackendMode,
    narration: Box<dyn Narration>,
    narration_configured: bool,
    dictation: Option<Box<dyn Dictation>>,
    voice_enabled: bool,
}

impl ChatRepl {
    pub fn new(
        session: Arc<ChatSession>,
        address: String,
        config: EngineConfig,
        mode: BackendMode,
    ) -> Self {
        let narration = config.narration_command.as_deref().and_then(narration_from_command);
        let dictation = config.dictation_command.as_deref().and_then(dictation_from_command);
        let narration_configured = narration.is_some();
        Self {
            session,
            address,
            config,
            mode,
            narration: narration.unwrap_or_else(|| Box::new(SilentNarration)),
            narration_configured,
            dictation,
            voice_enabled: false,
        }
    }

    pub fn with_narration(mut self, narration: Box<dyn Narration>) -> Self {
        self.narration = narration;
        self.narration_configured = true;
        self
    }

    pub fn with_dictation(mut self, dictation: Box<dyn Dictation>) -> Self {
        self.dictation = Some(dictation);
        self
    }

    pub fn run<R, W>(mut self, input: R, out: &mut W) -> Result<()>
    where
        R: BufRead + Send + 'static,
        W: Write,
    {
        writeln!(out, "Virtual Architect chat started. Type /help for commands.")?;
        for message in self.session.transcript().messages() {
            writeln!(out, "Architect: {}", message.content)?;
        }

        let lines = spawn_line_reader(input);
        let mut dictated: Option<Receiver<DictationEvent>> = None;
        let mut prompt_due = true;

        loop {
            if let Some(events) = dictated.as_ref() {
                match events.try_recv() {
                    Ok(DictationEvent::Transcript(text)) => {
                        writeln!(out, "(dictated) {text}")?;
                        self.ask(&text, out)?;
                        prompt_due = true;
                        continue;
                    }
                    Ok(DictationEvent::Ended) => {
                        writeln!(out, "Dictation stopped.")?;
                        prompt_due = true;
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => dictated = None,
                    Err(TryRecvError::Empty) => {}
                }
            }

            if prompt_due {
                write!(out, "> ")?;
                out.flush()?;
                prompt_due = false;
            }
            match lines.recv_timeout(INPUT_POLL) {
                Ok(LineInput::Line(line)) => {
                    prompt_due = true;
                    if !self.handle_line(&line, &mut dictated, out)? {
                        break;
                    }
                }
                Ok(LineInput::Closed) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.narration.cancel();
        if let Some(dictation) = self.dictation.as_ref() {
            dictation.stop();
        }
        Ok(())
    }

    /// Returns `false` when the session should end.
    fn handle_line<W: Write>(
        &mut self,
        line: &str,
        dictated: &mut Option<Receiver<DictationEvent>>,
        out: &mut W,
    ) -> Result<bool> {
        match parse_intent(line) {
            Intent::Noop => {}
            Intent::Help => writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?,
            Intent::ShowScores => write!(out, "{}", format_scores(self.session.analysis()))?,
            Intent::ShowAddress => writeln!(out, "{}", self.address)?,
            Intent::SetChatModel(None) => {
                writeln!(out, "Chat model: {}", self.session.provider_name())?
            }
            Intent::SetChatModel(Some(model)) => {
                match chat_provider_for_model(&self.config, &self.mode, &model) {
                    Ok((provider, selection)) => {
                        self.session.replace_provider(provider);
                        if let Some(reason) = selection.fallback_reason.as_deref() {
                            writeln!(out, "{reason}")?;
                        }
                        writeln!(out, "Chat model set to {}", selection.model.name)?;
                    }
                    Err(err) => writeln!(out, "Chat model unchanged: {err:#}")?,
                }
            }
            Intent::ToggleVoice => self.toggle_voice(out)?,
            Intent::StartDictation => self.start_dictation(dictated, out)?,
            Intent::StopDictation => match self.dictation.as_ref() {
                Some(dictation) if dictation.is_listening() => dictation.stop(),
                _ => writeln!(out, "Dictation is not running.")?,
            },
            Intent::SaveTranscript(None) => writeln!(out, "/save requires a path")?,
            Intent::SaveTranscript(Some(path)) => {
                match save_transcript(&self.session, Path::new(&path)) {
                    Ok(()) => writeln!(out, "Transcript saved to {path}")?,
                    Err(err) => {
                        warn!(%path, error = %format!("{err:#}"), "transcript not saved");
                        writeln!(out, "Transcript not saved: {err:#}")?
                    }
                }
            }
            Intent::Quit => return Ok(false),
            Intent::Ask(question) => self.ask(&question, out)?,
            Intent::Unknown { command, .. } => writeln!(out, "Unknown command: /{command}")?,
        }
        Ok(true)
    }

    fn ask<W: Write>(&self, text: &str, out: &mut W) -> Result<()> {
        match self.session.send_turn(text) {
            TurnOutcome::Ignored => {}
            TurnOutcome::Rejected => writeln!(out, "Still waiting for the previous answer.")?,
            TurnOutcome::Answered { reply, .. } => {
                writeln!(out, "Architect: {reply}")?;
                if self.voice_enabled {
                    if let Err(err) = self.narration.speak(&reply) {
                        warn!(error = %format!("{err:#}"), "narration failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn toggle_voice<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.voice_enabled = !self.voice_enabled;
        if !self.voice_enabled {
            self.narration.cancel();
            writeln!(out, "Voice off.")?;
            return Ok(());
        }
        if !self.narration_configured {
            writeln!(
                out,
                "Voice on, but no speech program is configured (set ARCHITECT_NARRATION_CMD)."
            )?;
            return Ok(());
        }
        writeln!(out, "Voice on.")?;
        let summary = narration_summary(self.session.analysis());
        if let Err(err) = self.narration.speak(&summary) {
            writeln!(out, "Narration failed: {err:#}")?;
        }
        Ok(())
    }

    fn start_dictation<W: Write>(
        &self,
        dictated: &mut Option<Receiver<DictationEvent>>,
        out: &mut W,
    ) -> Result<()> {
        let Some(dictation) = self.dictation.as_ref() else {
            writeln!(
                out,
                "Dictation unavailable: set ARCHITECT_DICTATION_CMD to a speech-to-text program."
            )?;
            return Ok(());
        };
        if dictation.is_listening() {
            writeln!(out, "Already listening.")?;
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        match dictation.start(tx) {
            Ok(()) => {
                info!("dictation started");
                *dictated = Some(rx);
                writeln!(out, "Listening. Use /stop_listening to stop.")?;
            }
            Err(err) => writeln!(out, "Dictation failed to start: {err:#}")?,
        }
        Ok(())
    }
}

fn narration_from_command(command: &str) -> Option<Box<dyn Narration>> {
    match CommandNarration::parse(command) {
        Ok(narration) => Some(Box::new(narration)),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "narration disabled");
            None
        }
    }
}

fn dictation_from_command(command: &str) -> Option<Box<dyn Dictation>> {
    match CommandDictation::parse(command) {
        Ok(dictation) => Some(Box::new(dictation)),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "dictation disabled");
            None
        }
    }
}

fn spawn_line_reader<R: BufRead + Send + 'static>(mut input: R) -> Receiver<LineInput> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || read_lines(&mut input, &tx));
    rx
}

fn read_lines<R: BufRead>(input: &mut R, tx: &Sender<LineInput>) {
    let mut line = String::new();
    loop {
        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(LineInput::Line(text)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "input closed");
                break;
            }
        }
    }
    let _ = tx.send(LineInput::Closed);
}

/// Score card: one headline per dimension with its feedback underneath.
pub fn format_scores(result: &AnalysisResult) -> String {
    let mut out = String::new();
    for kind in DimensionKind::ALL {
        let dimension = result.dimension(kind);
        out.push_str(&format!(
            "{}: {}/100 ({})\n",
            kind.title(),
            dimension.score,
            dimension.band().label()
        ));
        for item in &dimension.feedback {
            out.push_str(&format!("  - {item}\n"));
        }
    }
    out
}

fn save_transcript(session: &ChatSession, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(&session.transcript())?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}
