//! Voice input: a start/stop toggle around a single-shot recognizer.
//!
//! IDLE → LISTENING → (result | error | aborted) → IDLE
//!
//! Each start opens a new listening session. Outcomes that arrive for a
//! session that is no longer listening are dropped, so a user abort never
//! produces a late transcript or error.

pub mod microphone;
pub mod recorder;
pub mod transcriber;

use std::fmt;

use tracing::{debug, info};

/// Single-shot callback receiving the outcome of one listening session.
pub type OutcomeSink = Box<dyn FnOnce(Result<String, RecognitionError>) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("speech service unreachable: {0}")]
    Network(String),
    #[error("no speech detected")]
    NoSpeech,
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),
    #[error("speech recognition failed: {0}")]
    Other(String),
    #[error("listening aborted")]
    Aborted,
}

impl RecognitionError {
    /// Friendly fixed text for the user. `None` for a user-initiated abort.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Network(_) => Some(
                "I couldn't reach the speech service. Please check your internet connection and try again.",
            ),
            Self::NoSpeech => Some("I didn't hear anything. Please try speaking again."),
            Self::PermissionDenied(_) => Some(
                "I can't use the microphone. Please check that microphone access is allowed.",
            ),
            Self::Other(_) => Some("Sorry, something went wrong while listening. Please try again."),
            Self::Aborted => None,
        }
    }
}

pub trait SpeechRecognizer {
    /// Begin one listening session. `on_outcome` is called at most once.
    fn start(&mut self, on_outcome: OutcomeSink) -> Result<(), RecognitionError>;
    /// Stop listening and discard anything captured.
    fn abort(&mut self);
}

/// Used when speech input is disabled or failed to initialize.
pub struct UnavailableRecognizer {
    reason: String,
}

impl UnavailableRecognizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SpeechRecognizer for UnavailableRecognizer {
    fn start(&mut self, _on_outcome: OutcomeSink) -> Result<(), RecognitionError> {
        Err(RecognitionError::Other(self.reason.clone()))
    }

    fn abort(&mut self) {}
}

/// Outcome of listening session `session`, posted back to the app.
#[derive(Debug)]
pub struct RecognitionEvent {
    pub session: u64,
    pub outcome: Result<String, RecognitionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Listening,
}

impl fmt::Display for ListenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Listening => write!(f, "LISTENING"),
        }
    }
}

pub struct VoiceInput {
    recognizer: Box<dyn SpeechRecognizer>,
    state: ListenState,
    session: u64,
}

impl VoiceInput {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            state: ListenState::Idle,
            session: 0,
        }
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == ListenState::Listening
    }

    /// Start a listening session. `make_sink` builds the outcome callback
    /// for the new session id.
    pub fn start(
        &mut self,
        make_sink: impl FnOnce(u64) -> OutcomeSink,
    ) -> Result<u64, RecognitionError> {
        if self.is_listening() {
            return Ok(self.session);
        }

        self.session += 1;
        let session = self.session;
        self.recognizer.start(make_sink(session))?;
        self.state = ListenState::Listening;
        info!("State: IDLE → LISTENING (session {session})");
        Ok(session)
    }

    /// User-initiated stop. Produces no outcome.
    pub fn stop(&mut self) {
        if !self.is_listening() {
            return;
        }
        self.recognizer.abort();
        self.state = ListenState::Idle;
        info!("State: LISTENING → IDLE (aborted)");
    }

    /// Accept the outcome of `event.session`. Returns `None` for stale
    /// sessions and for aborts.
    pub fn finish(&mut self, event: RecognitionEvent) -> Option<Result<String, RecognitionError>> {
        if !self.is_listening() || event.session != self.session {
            debug!("Dropping outcome for stale session {}", event.session);
            return None;
        }

        self.state = ListenState::Idle;
        info!("State: LISTENING → IDLE");
        match event.outcome {
            Err(RecognitionError::Aborted) => None,
            outcome => Some(outcome),
        }
    }
}
