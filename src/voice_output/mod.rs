//! Voice output: speaks one utterance at a time.
//!
//! `VoiceOutput` tracks whether something is playing and cancels it before
//! the next utterance starts. There is no queue. The slow/normal rate is read
//! when each utterance starts.

pub mod kokoro;

use tracing::{debug, info};

use crate::config::TTSConfig;

/// Called once when an utterance ends, whether finished or cancelled.
pub type UtteranceDone = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

pub trait SpeechSynthesizer {
    /// Start speaking `text`. Must not block; `done` fires when playback ends.
    fn speak(&self, text: String, params: SpeechParams, done: UtteranceDone);
    /// Stop whatever is playing now.
    fn cancel(&self);
}

/// Used when speech output is disabled or the model could not be loaded.
pub struct TextOnlySynthesizer;

impl SpeechSynthesizer for TextOnlySynthesizer {
    fn speak(&self, text: String, _params: SpeechParams, done: UtteranceDone) {
        debug!("Speech output disabled, not speaking {} chars", text.len());
        done();
    }

    fn cancel(&self) {}
}

pub struct VoiceOutput {
    synth: Box<dyn SpeechSynthesizer>,
    normal_rate: f32,
    slow_rate: f32,
    pitch: f32,
    volume: f32,
    slow: bool,
    speaking: bool,
    current: u64,
}

impl VoiceOutput {
    pub fn new(synth: Box<dyn SpeechSynthesizer>, config: &TTSConfig) -> Self {
        Self {
            synth,
            normal_rate: config.normal_rate,
            slow_rate: config.slow_rate,
            pitch: config.pitch,
            volume: config.volume,
            slow: config.slow_by_default,
            speaking: false,
            current: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn is_slow(&self) -> bool {
        self.slow
    }

    pub fn set_slow(&mut self, slow: bool) {
        if self.slow != slow {
            info!("Slow speech {}", if slow { "on" } else { "off" });
        }
        self.slow = slow;
    }

    /// Speak `text`, cancelling any utterance still playing.
    ///
    /// `on_done` receives the id of this utterance; pass it back to
    /// [`VoiceOutput::finished`] when it fires. Returns that id.
    pub fn speak(&mut self, text: &str, on_done: impl FnOnce(u64) + Send + 'static) -> u64 {
        if self.speaking {
            debug!("Cancelling utterance {} for a new one", self.current);
            self.synth.cancel();
        }

        self.current += 1;
        let id = self.current;
        self.speaking = true;

        let params = SpeechParams {
            rate: if self.slow { self.slow_rate } else { self.normal_rate },
            pitch: self.pitch,
            volume: self.volume,
        };
        self.synth
            .speak(text.to_string(), params, Box::new(move || on_done(id)));
        id
    }

    /// Stop speaking. No-op when nothing is playing.
    pub fn cancel(&mut self) {
        if self.speaking {
            self.synth.cancel();
            self.speaking = false;
        }
    }

    /// Mark utterance `id` as ended. Stale ids from cancelled utterances
    /// leave the flag alone.
    pub fn finished(&mut self, id: u64) {
        if id == self.current {
            self.speaking = false;
        }
    }
}
