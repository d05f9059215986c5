//! Audio recording with cpal.
//!
//! The input stream is opened on the first listen and kept open for a quick
//! start afterwards. Captures mono f32 audio and flags an auto-stop once the
//! speaker falls silent or the maximum duration is reached.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};

/// Owns the cpal stream. Not `Send`; lives with the app.
pub struct AudioRecorder {
    config: AudioConfig,
    silence_config: SilenceConfig,
    shared: Arc<Mutex<RecorderInner>>,
    stream: Option<Stream>,
}

/// Cloneable, `Send` view of the recording state for background tasks.
#[derive(Clone)]
pub struct RecorderHandle {
    shared: Arc<Mutex<RecorderInner>>,
    sample_rate: u32,
}

struct RecorderInner {
    is_recording: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    silence_start: Option<Instant>,
    recording_start: Option<Instant>,
    heard_speech: bool,
    should_auto_stop: bool,
}

impl AudioRecorder {
    pub fn new(audio_config: AudioConfig, silence_config: SilenceConfig) -> Self {
        let max_samples =
            (silence_config.max_recording_duration * audio_config.sample_rate as f64) as usize;

        let shared = Arc::new(Mutex::new(RecorderInner {
            is_recording: false,
            buffer: Vec::with_capacity(max_samples),
            max_samples,
            silence_start: None,
            recording_start: None,
            heard_speech: false,
            should_auto_stop: false,
        }));

        Self {
            config: audio_config,
            silence_config,
            shared,
            stream: None,
        }
    }

    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            shared: Arc::clone(&self.shared),
            sample_rate: self.config.sample_rate,
        }
    }

    /// Open the audio stream. No-op once open.
    pub fn open_stream(&mut self) -> Result<(), String> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = match self.config.device_index {
            Some(index) => host
                .input_devices()
                .map_err(|e| format!("Cannot list input devices: {e}"))?
                .nth(index as usize)
                .ok_or_else(|| format!("No input device at index {index}"))?,
            None => host
                .default_input_device()
                .ok_or("No input audio device available")?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let shared = Arc::clone(&self.shared);
        let silence = self.silence_config.clone();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mut inner = shared.lock().unwrap();
                    if !inner.is_recording {
                        return;
                    }
                    inner.push_samples(data, &silence);
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None, // timeout
            )
            .map_err(|e| format!("Failed to build input stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;
        info!("Audio stream opened");

        self.stream = Some(stream);
        Ok(())
    }
}

impl RecorderInner {
    fn push_samples(&mut self, data: &[f32], silence: &SilenceConfig) {
        let remaining = self.max_samples.saturating_sub(self.buffer.len());
        let to_copy = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_copy]);

        if self.buffer.len() >= self.max_samples {
            warn!("Max recording duration reached");
            self.is_recording = false;
            self.should_auto_stop = true;
            return;
        }

        let Some(rec_start) = self.recording_start else {
            return;
        };
        if rec_start.elapsed().as_secs_f64() < silence.min_speech_duration {
            return;
        }

        let is_silent = rms_energy(data) < silence.threshold;
        if !is_silent {
            self.heard_speech = true;
            self.silence_start = None;
            return;
        }

        // Trailing silence only counts once the person has started talking,
        // otherwise a slow start would end the session immediately.
        if self.heard_speech {
            let silence_start = self.silence_start.get_or_insert_with(Instant::now);
            if silence_start.elapsed().as_secs_f64() >= silence.duration {
                debug!("Silence detected for {}s, auto-stopping", silence.duration);
                self.should_auto_stop = true;
            }
        } else if rec_start.elapsed().as_secs_f64() >= silence.max_recording_duration / 2.0 {
            debug!("Nothing heard yet, auto-stopping");
            self.should_auto_stop = true;
        }
    }
}

impl RecorderHandle {
    /// Start recording audio.
    pub fn start(&self) {
        let mut inner = self.shared.lock().unwrap();
        inner.buffer.clear();
        inner.is_recording = true;
        inner.silence_start = None;
        inner.recording_start = Some(Instant::now());
        inner.heard_speech = false;
        inner.should_auto_stop = false;
        info!("Recording started");
    }

    /// Stop recording and return captured audio samples (f32, mono).
    pub fn stop(&self) -> Vec<f32> {
        let mut inner = self.shared.lock().unwrap();
        inner.is_recording = false;
        inner.recording_start = None;
        let samples = std::mem::take(&mut inner.buffer);
        let duration = samples.len() as f64 / self.sample_rate as f64;
        info!("Recording stopped: {:.1}s ({} samples)", duration, samples.len());
        samples
    }

    /// Check if auto-stop was triggered by silence detection.
    pub fn should_auto_stop(&self) -> bool {
        self.shared.lock().unwrap().should_auto_stop
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Check if audio data is silent.
pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
    let rms = rms_energy(samples);
    debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
    rms < threshold
}

/// Calculate RMS energy of audio samples.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
