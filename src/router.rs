//! Prefix dispatch for submitted utterances.
//!
//! Messages starting with the reminder trigger go to the reminders list,
//! everything else goes to the conversation session.

pub const TRIGGER_PHRASE: &str = "remind me to";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Nothing but whitespace; nothing is appended.
    Empty,
    /// Reminder text with the trigger phrase removed.
    Reminder(String),
    /// Trimmed message for the chat session.
    Chat(String),
}

pub fn route(text: &str) -> Route {
    let text = text.trim();
    if text.is_empty() {
        return Route::Empty;
    }

    match strip_trigger(text) {
        Some(rest) => Route::Reminder(rest.trim().to_string()),
        None => Route::Chat(text.to_string()),
    }
}

/// Case-insensitive match of the trigger at a word boundary.
fn strip_trigger(text: &str) -> Option<&str> {
    let head = text.get(..TRIGGER_PHRASE.len())?;
    if !head.eq_ignore_ascii_case(TRIGGER_PHRASE) {
        return None;
    }
    let rest = &text[TRIGGER_PHRASE.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() => Some(rest),
        Some(_) => None,
    }
}

/// Confirmation turn for a newly added reminder.
pub fn reminder_confirmation(text: &str) -> String {
    format!("I've added a reminder for you: \"{text}\"")
}
