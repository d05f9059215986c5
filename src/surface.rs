//! What the user sees, and how console input becomes events.
//!
//! `Surface` is the display side of the app: transcript turns, the
//! thinking and listening indicators, the reminders panel and short notices.
//! `TerminalSurface` draws to stdout; logs go to stderr.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::app::AppEvent;
use crate::reminders::Reminder;
use crate::transcript::ChatTurn;

pub trait Surface {
    /// Append one turn below the previous ones.
    fn show_turn(&mut self, turn: &ChatTurn);
    fn set_loading(&mut self, loading: bool);
    fn set_listening(&mut self, listening: bool);
    /// Redraw the whole reminders panel from `items`.
    fn render_reminders(&mut self, items: &[Reminder]);
    fn hide_reminders(&mut self);
    fn show_notice(&mut self, text: &str);
}

pub struct TerminalSurface<W: Write> {
    out: W,
}

impl TerminalSurface<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        // A closed stdout is not worth crashing a companion over.
        if let Err(e) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            debug!("Failed to write to terminal: {e}");
        }
    }
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn show_turn(&mut self, turn: &ChatTurn) {
        self.line(&format!("{}: {}", turn.speaker, turn.text));
    }

    fn set_loading(&mut self, loading: bool) {
        if loading {
            self.line("  (thinking…)");
        }
    }

    fn set_listening(&mut self, listening: bool) {
        if listening {
            self.line("  (listening… type /mic again to stop)");
        } else {
            self.line("  (microphone off)");
        }
    }

    fn render_reminders(&mut self, items: &[Reminder]) {
        let mut panel = String::from("── Reminders ──");
        if items.is_empty() {
            panel.push_str("\n  (no reminders yet)");
        }
        for item in items {
            panel.push_str(&format!("\n  [{}] {}", item.id, item.text));
        }
        panel.push_str("\n───────────────");
        self.line(&panel);
    }

    fn hide_reminders(&mut self) {
        self.line("  (reminders hidden)");
    }

    fn show_notice(&mut self, text: &str) {
        self.line(&format!("  * {text}"));
    }
}

pub const HELP: &str = "Type a message and press Enter. Start with \"Remind me to\" to add a reminder.
Commands: /mic  /slow on|off  /reminders  /delete <id>  /stop  /help  /quit";

/// Parsed console line.
pub enum ConsoleInput {
    Event(AppEvent),
    Help,
    Invalid(String),
}

pub fn parse_console_line(line: &str) -> ConsoleInput {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return ConsoleInput::Event(AppEvent::Submit(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();

    match (name.as_str(), arg) {
        ("mic", None) => ConsoleInput::Event(AppEvent::ToggleMicrophone),
        ("slow", Some("on")) => ConsoleInput::Event(AppEvent::SetSlowSpeech(true)),
        ("slow", Some("off")) => ConsoleInput::Event(AppEvent::SetSlowSpeech(false)),
        ("reminders", None) => ConsoleInput::Event(AppEvent::ToggleReminders),
        ("delete", Some(id)) => match id.parse() {
            Ok(id) => ConsoleInput::Event(AppEvent::delete_reminder(id)),
            Err(_) => ConsoleInput::Invalid(format!("\"{id}\" is not a reminder number")),
        },
        ("stop", None) => ConsoleInput::Event(AppEvent::CancelSpeech),
        ("help", _) => ConsoleInput::Help,
        ("quit" | "exit", None) => ConsoleInput::Event(AppEvent::Quit),
        _ => ConsoleInput::Invalid(format!("Unknown command: {trimmed}")),
    }
}

/// Read stdin lines and post them as events until EOF.
pub fn spawn_console_reader(tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let event = match parse_console_line(&line) {
                        ConsoleInput::Event(event) => event,
                        ConsoleInput::Help => AppEvent::ShowHelp,
                        ConsoleInput::Invalid(message) => AppEvent::Notice(message),
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Console closed");
                    let _ = tx.send(AppEvent::Quit);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to read console input: {e}");
                    let _ = tx.send(AppEvent::Quit);
                    break;
                }
            }
        }
    });
}
