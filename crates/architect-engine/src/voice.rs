use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// Speaks assistant text aloud.
pub trait Narration: Send + Sync {
    fn speak(&self, text: &str) -> Result<()>;
    fn cancel(&self);
}

/// Used when no speech program is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNarration;

impl Narration for SilentNarration {
    fn speak(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

/// Runs a speech program (`say`, `espeak -s 150`, ...) with the text as its
/// last argument. Only one utterance plays at a time.
#[derive(Debug)]
pub struct CommandNarration {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandNarration {
    pub fn parse(command_line: &str) -> Result<Self> {
        let (program, args) = split_command(command_line)?;
        Ok(Self {
            program,
            args,
            child: Mutex::new(None),
        })
    }

    pub fn is_speaking(&self) -> bool {
        let mut slot = lock(&self.child);
        match slot.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                slot.take();
                false
            }
            None => false,
        }
    }
}

impl Narration for CommandNarration {
    fn speak(&self, text: &str) -> Result<()> {
        self.cancel();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start narration program '{}'", self.program))?;
        debug!(program = %self.program, pid = child.id(), "narration started");
        *lock(&self.child) = Some(child);
        Ok(())
    }

    fn cancel(&self) {
        if let Some(child) = lock(&self.child).take() {
            reap(child);
        }
    }
}

impl Drop for CommandNarration {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictationEvent {
    Transcript(String),
    Ended,
}

/// Speech-to-text input. Recognized utterances arrive on the channel given to
/// `start`, followed by a single `Ended`.
pub trait Dictation: Send + Sync {
    fn start(&self, events: Sender<DictationEvent>) -> Result<()>;
    fn stop(&self);
    fn is_listening(&self) -> bool;
}

/// Runs a speech-to-text program that prints one utterance per line.
#[derive(Debug)]
pub struct CommandDictation {
    program: String,
    args: Vec<String>,
    child: Arc<Mutex<Option<Child>>>,
}

impl CommandDictation {
    pub fn parse(command_line: &str) -> Result<Self> {
        let (program, args) = split_command(command_line)?;
        Ok(Self {
            program,
            args,
            child: Arc::new(Mutex::new(None)),
        })
    }
}

impl Dictation for CommandDictation {
    fn start(&self, events: Sender<DictationEvent>) -> Result<()> {
        let mut slot = lock(&self.child);
        if slot.is_some() {
            bail!("dictation is already running");
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start dictation program '{}'", self.program))?;
        let Some(stdout) = child.stdout.take() else {
            reap(child);
            bail!("dictation program has no stdout");
        };
        let pid = child.id();
        *slot = Some(child);
        drop(slot);
        debug!(program = %self.program, pid, "dictation started");

        let shared = Arc::clone(&self.child);
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "dictation output unreadable");
                        break;
                    }
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if events
                    .send(DictationEvent::Transcript(text.to_string()))
                    .is_err()
                {
                    break;
                }
            }
            let finished = {
                let mut slot = lock(&shared);
                match slot.as_ref() {
                    Some(child) if child.id() == pid => slot.take(),
                    _ => None,
                }
            };
            if let Some(child) = finished {
                reap(child);
            }
            let _ = events.send(DictationEvent::Ended);
        });
        Ok(())
    }

    fn stop(&self) {
        let running = lock(&self.child).take();
        if let Some(child) = running {
            debug!(pid = child.id(), "dictation stopped");
            reap(child);
        }
    }

    fn is_listening(&self) -> bool {
        lock(&self.child).is_some()
    }
}

impl Drop for CommandDictation {
    fn drop(&mut self) {
        self.stop();
    }
}

fn split_command(command_line: &str) -> Result<(String, Vec<String>)> {
    let mut parts = shell_words::split(command_line)
        .with_context(|| format!("invalid command line '{command_line}'"))?
        .into_iter();
    let Some(program) = parts.next() else {
        bail!("command line is empty");
    };
    Ok((program, parts.collect()))
}

fn reap(mut child: Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "child already exited");
    }
    if let Err(err) = child.wait() {
        warn!(error = %err, "failed to wait for child process");
    }
}

fn lock(slot: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{split_command, CommandNarration, Narration, SilentNarration};

    #[test]
    fn command_lines_are_split_like_a_shell() -> anyhow::Result<()> {
        let (program, args) = split_command("espeak -v 'en-us' -s 150")?;
        assert_eq!(program, "espeak");
        assert_eq!(args, vec!["-v", "en-us", "-s", "150"]);
        assert!(split_command("   ").is_err());
        assert!(split_command("say 'unterminated").is_err());
        Ok(())
    }

    #[test]
    fn silent_narration_accepts_everything() -> anyhow::Result<()> {
        SilentNarration.speak("Layout scores 72 out of 100.")?;
        SilentNarration.cancel();
        Ok(())
    }

    #[test]
    fn missing_program_is_an_error() -> anyhow::Result<()> {
        let narration = CommandNarration::parse("architect-no-such-speech-program")?;
        assert!(narration.speak("hello").is_err());
        assert!(!narration.is_speaking());
        Ok(())
    }

    #[cfg(unix)]
    mod unix {
        use std::sync::mpsc;
        use std::time::Duration;

        use super::super::{
            CommandDictation, CommandNarration, Dictation, DictationEvent, Narration,
        };

        #[test]
        fn cancel_stops_current_utterance() -> anyhow::Result<()> {
            // `sleep` with the spoken text as its argument stands in for a slow voice.
            let narration = CommandNarration::parse("sleep")?;
            narration.speak("30")?;
            assert!(narration.is_speaking());
            narration.cancel();
            assert!(!narration.is_speaking());
            Ok(())
        }

        #[test]
        fn dictation_emits_each_line_then_ends() -> anyhow::Result<()> {
            let dictation = CommandDictation::parse(
                "sh -c 'echo open the kitchen; echo; echo bigger windows'",
            )?;
            let (tx, rx) = mpsc::channel();
            dictation.start(tx)?;

            let mut events = Vec::new();
            loop {
                let event = rx.recv_timeout(Duration::from_secs(10))?;
                let ended = event == DictationEvent::Ended;
                events.push(event);
                if ended {
                    break;
                }
            }
            assert_eq!(
                events,
                vec![
                    DictationEvent::Transcript("open the kitchen".to_string()),
                    DictationEvent::Transcript("bigger windows".to_string()),
                    DictationEvent::Ended,
                ]
            );
            assert!(!dictation.is_listening());
            Ok(())
        }

        #[test]
        fn stop_ends_a_running_dictation() -> anyhow::Result<()> {
            let dictation = CommandDictation::parse("sleep 30")?;
            let (tx, rx) = mpsc::channel();
            dictation.start(tx.clone())?;
            assert!(dictation.is_listening());
            assert!(dictation.start(tx).is_err());

            dictation.stop();
            assert!(!dictation.is_listening());
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(10))?,
                DictationEvent::Ended
            );
            Ok(())
        }
    }
}
