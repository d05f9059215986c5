//! Speech-to-text backends.
//!
//! `Local` runs a Whisper GGML model in-process via whisper-rs.
//! `Remote` uploads a WAV clip to a Whisper-compatible
//! `/v1/audio/transcriptions` endpoint.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::RecognitionError;
use crate::config::{SpeechBackend, SpeechConfig};

#[derive(Clone)]
pub enum Transcriber {
    Local(WhisperTranscriber),
    Remote(RemoteTranscriber),
}

impl Transcriber {
    /// Build the configured backend. Loading a local model blocks, so this
    /// runs it on a blocking thread.
    pub async fn from_config(config: &SpeechConfig) -> Result<Self, RecognitionError> {
        match config.backend {
            SpeechBackend::Local => {
                let config = config.clone();
                let whisper = tokio::task::spawn_blocking(move || WhisperTranscriber::load(&config))
                    .await
                    .map_err(|e| RecognitionError::Other(format!("model loader failed: {e}")))??;
                Ok(Self::Local(whisper))
            }
            SpeechBackend::Remote => Ok(Self::Remote(RemoteTranscriber::new(config)?)),
        }
    }

    /// Transcribe mono f32 samples recorded at `sample_rate`.
    pub async fn transcribe(&self, samples: Vec<f32>, sample_rate: u32) -> Result<String, RecognitionError> {
        match self {
            Self::Local(whisper) => {
                let whisper = whisper.clone();
                tokio::task::spawn_blocking(move || whisper.transcribe(&samples, sample_rate))
                    .await
                    .map_err(|e| RecognitionError::Other(format!("transcription task failed: {e}")))?
            }
            Self::Remote(remote) => remote.transcribe(&samples, sample_rate).await,
        }
    }
}

/// Thread-safe wrapper around WhisperContext.
/// WhisperContext is Send+Sync, so we wrap it in Arc for sharing.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    /// Load the Whisper GGML model.
    pub fn load(config: &SpeechConfig) -> Result<Self, RecognitionError> {
        let model_path = find_model(&config.whisper_model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(&model_path.to_string_lossy(), params)
            .map_err(|e| RecognitionError::Other(format!("failed to load Whisper model: {e}")))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe audio samples (f32, 16kHz, mono) to text.
    pub fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, RecognitionError> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| RecognitionError::Other(format!("failed to create whisper state: {e}")))?;

        // One alternative: plain greedy decoding.
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| RecognitionError::Other(format!("Whisper inference failed: {e}")))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }

        let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let audio_duration = samples.len() as f64 / sample_rate as f64;
        info!(
            "Transcribed {:.1}s audio in {:.0}ms: \"{}\"",
            audio_duration,
            latency_ms,
            truncate_preview(&text, 80)
        );

        Ok(text)
    }
}

/// Find the GGML model file.
fn find_model(model_name: &str) -> Result<PathBuf, RecognitionError> {
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filenames = [
        format!("ggml-{}.bin", model_name.replace('/', "-")),
        "ggml-base.en.bin".to_string(),
        "ggml-base.bin".to_string(),
        "ggml-small.bin".to_string(),
    ];

    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::data_local_dir().map(|d| d.join("companion-voice")),
    ]
    .into_iter()
    .flatten()
    .collect();

    for dir in &search_dirs {
        for filename in &filenames {
            let path = dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(RecognitionError::Other(format!(
        "Whisper GGML model '{model_name}' not found in {search_dirs:?}"
    )))
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Clone)]
pub struct RemoteTranscriber {
    client: Client,
    url: String,
    model: String,
    language: String,
    api_key: Option<String>,
}

impl RemoteTranscriber {
    pub fn new(config: &SpeechConfig) -> Result<Self, RecognitionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RecognitionError::Other(format!("failed to create HTTP client: {e}")))?;

        info!("Remote transcription via {}", config.remote_url);

        Ok(Self {
            client,
            url: config.remote_url.clone(),
            model: config.remote_model.clone(),
            language: config.language.clone(),
            api_key: config.remote_api_key.clone(),
        })
    }

    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, RecognitionError> {
        let t0 = Instant::now();
        let wav = encode_wav(samples, sample_rate)?;

        let file = Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionError::Other(format!("bad mime type: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RecognitionError::Network(e.to_string())
            } else {
                RecognitionError::Other(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RecognitionError::PermissionDenied(format!(
                "transcription service refused access ({status})"
            )));
        }
        if !status.is_success() {
            return Err(RecognitionError::Other(format!(
                "transcription service returned {status}"
            )));
        }

        let data: TranscriptionResponse = resp
            .json()
            .await
            .map_err(|e| RecognitionError::Other(format!("malformed transcription response: {e}")))?;

        let text = data.text.trim().to_string();
        info!(
            "Remote transcription in {:.0}ms: \"{}\"",
            t0.elapsed().as_secs_f64() * 1000.0,
            truncate_preview(&text, 80)
        );
        Ok(text)
    }
}

/// Encode mono f32 samples as 16-bit PCM WAV.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, RecognitionError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| RecognitionError::Other(format!("WAV encoding failed: {e}"));

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for &sample in samples {
            // f32 [-1, 1] → i16
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

fn truncate_preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}
