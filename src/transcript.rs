//! Append-only conversation transcript.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "You"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One displayed message. Never changes once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return it for display.
    pub fn push(&mut self, turn: ChatTurn) -> &ChatTurn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_keep_arrival_order() {
        let mut transcript = Transcript::new();
        transcript.push(ChatTurn::user("hello"));
        transcript.push(ChatTurn::assistant("hi there"));
        transcript.push(ChatTurn::user("how are you?"));

        let speakers: Vec<Speaker> = transcript.turns().iter().map(|t| t.speaker).collect();
        assert_eq!(speakers, vec![Speaker::User, Speaker::Assistant, Speaker::User]);
        assert_eq!(transcript.last().unwrap().text, "how are you?");
    }

    #[test]
    fn test_speaker_labels() {
        assert_eq!(Speaker::User.to_string(), "You");
        assert_eq!(Speaker::Assistant.to_string(), "Assistant");
    }
}
