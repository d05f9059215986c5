//! Single-shot microphone recognizer.
//!
//! Records until the speaker falls silent (or the time limit hits), then
//! hands the clip to the configured transcriber and reports exactly one
//! outcome.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::recorder::{is_silent, AudioRecorder, RecorderHandle};
use super::transcriber::Transcriber;
use super::{OutcomeSink, RecognitionError, SpeechRecognizer};
use crate::config::{AudioConfig, SilenceConfig};

const AUTO_STOP_POLL: Duration = Duration::from_millis(100);

pub struct MicrophoneRecognizer {
    recorder: AudioRecorder,
    transcriber: Transcriber,
    silence_threshold: f32,
    task: Option<JoinHandle<()>>,
}

impl MicrophoneRecognizer {
    pub fn new(audio: AudioConfig, silence: SilenceConfig, transcriber: Transcriber) -> Self {
        let silence_threshold = silence.threshold;
        Self {
            recorder: AudioRecorder::new(audio, silence),
            transcriber,
            silence_threshold,
            task: None,
        }
    }

    async fn listen(
        handle: RecorderHandle,
        transcriber: Transcriber,
        silence_threshold: f32,
    ) -> Result<String, RecognitionError> {
        let mut poll = tokio::time::interval(AUTO_STOP_POLL);
        loop {
            poll.tick().await;
            if handle.should_auto_stop() {
                debug!("Auto-stop triggered");
                break;
            }
        }

        let samples = handle.stop();
        if samples.is_empty() || is_silent(&samples, silence_threshold) {
            info!("No speech captured");
            return Err(RecognitionError::NoSpeech);
        }

        let text = transcriber.transcribe(samples, handle.sample_rate()).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(RecognitionError::NoSpeech);
        }
        Ok(text)
    }
}

impl SpeechRecognizer for MicrophoneRecognizer {
    fn start(&mut self, on_outcome: OutcomeSink) -> Result<(), RecognitionError> {
        self.recorder.open_stream().map_err(|e| {
            warn!("Cannot open microphone: {e}");
            RecognitionError::PermissionDenied(e)
        })?;

        let handle = self.recorder.handle();
        handle.start();

        let transcriber = self.transcriber.clone();
        let threshold = self.silence_threshold;
        self.task = Some(tokio::spawn(async move {
            let outcome = Self::listen(handle, transcriber, threshold).await;
            if let Err(e) = &outcome {
                debug!("Listening ended without a transcript: {e}");
            }
            on_outcome(outcome);
        }));
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let discarded = self.recorder.handle().stop();
        debug!("Discarded {} samples", discarded.len());
    }
}
