//! Kokoro TTS engine: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Audio → rodio Sink playback with cancellation
//!
//! Rate drives the model's speed input. Pitch shifts the playback sample
//! rate, and generation speed is divided by the same factor so the tempo
//! still follows the rate. Volume is the sink volume.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::{SpeechParams, SpeechSynthesizer, UtteranceDone};
use crate::config::TTSConfig;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to load TTS model: {0}")]
    Load(String),
    #[error("speech generation failed: {0}")]
    Generate(String),
}

/// Result of a speak operation with timing breakdown.
pub struct SpeakResult {
    pub generate_ms: f64,
    pub playback_ms: f64,
    pub cancelled: bool,
}

/// Loaded voice style data: shape (510, 1, 256) f32.
struct VoiceData {
    /// Style vectors indexed by token count. shape: (510, 256)
    styles: Array2<f32>,
}

/// Native Kokoro TTS engine.
pub struct KokoroTtsEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<Option<ort::session::Session>>,

    phonemizer: Option<misaki_rs::G2P>,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    voices: HashMap<String, VoiceData>,
    voice: String,

    // rodio 0.21 has no separate OutputStreamHandle
    output_stream: Option<OutputStream>,

    // Bumped by cancel(); an utterance started under an older epoch stops.
    epoch: Arc<AtomicU64>,
    speak_lock: AsyncMutex<()>,
    active_sink: Arc<ActiveSink<Sink>>,

    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

impl KokoroTtsEngine {
    pub fn new(config: &TTSConfig) -> Self {
        let model_path = if config.model_path.is_empty() {
            std::env::current_dir().unwrap_or_default().join("kokoro-v1.0.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };

        // Voices and tokenizer live next to the model.
        let base_dir = model_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            session: Mutex::new(None),
            phonemizer: None,
            vocab: HashMap::new(),
            voices: HashMap::new(),
            voice: config.voice.clone(),
            output_stream: None,
            epoch: Arc::new(AtomicU64::new(0)),
            speak_lock: AsyncMutex::new(()),
            active_sink: Arc::new(ActiveSink::default()),
            voices_path: base_dir.join("voices-v1.0.bin"),
            tokenizer_path: base_dir.join("tokenizer.json"),
            model_path,
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Load the ONNX model, tokenizer, voices, and phonemizer.
    /// This is blocking and should be called in spawn_blocking.
    pub fn load_model_sync(&mut self) -> Result<(), SynthesisError> {
        let t0 = Instant::now();

        info!("Loading tokenizer from {}", self.tokenizer_path.display());
        self.vocab = load_tokenizer(&self.tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", self.vocab.len());

        info!("Loading voices from {}", self.voices_path.display());
        self.voices = load_voices(&self.voices_path)?;
        info!("Loaded {} voices", self.voices.len());
        if !self.voices.contains_key(&self.voice) {
            return Err(SynthesisError::Load(format!("Unknown voice: {}", self.voice)));
        }

        info!("Loading ONNX model from {}", self.model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| SynthesisError::Load(format!("ONNX session builder: {e}")))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| SynthesisError::Load(format!("optimization level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| SynthesisError::Load(format!("thread count: {e}")))?
            .commit_from_file(&self.model_path)
            .map_err(|e| SynthesisError::Load(format!("ONNX model: {e}")))?;
        *self.session.lock().unwrap() = Some(session);

        info!("Initializing misaki-rs phonemizer...");
        self.phonemizer = Some(misaki_rs::G2P::new(misaki_rs::Language::EnglishUS));

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| SynthesisError::Load(format!("audio output: {e}")))?;
        self.output_stream = Some(stream);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());
        Ok(())
    }

    /// Speak text with sentence-level streaming. Stops early once the
    /// engine's epoch moves past `epoch`.
    pub async fn speak(&self, text: &str, params: SpeechParams, epoch: u64) -> SpeakResult {
        let _guard = self.speak_lock.lock().await;
        self.speak_inner(text, params, epoch).await
    }

    fn is_cancelled(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Relaxed) != epoch
    }

    async fn speak_inner(&self, text: &str, params: SpeechParams, epoch: u64) -> SpeakResult {
        let sentences = split_sentences(text.trim());
        let pitch = params.pitch.clamp(0.5, 2.0);
        let speed = params.rate / pitch;
        let playback_rate = (SAMPLE_RATE as f32 * pitch).round() as u32;

        let mut total_gen_ms = 0.0;
        let mut total_play_ms = 0.0;
        let mut cancelled = false;

        for (i, sentence) in sentences.iter().enumerate() {
            if self.is_cancelled(epoch) {
                cancelled = true;
                info!("Cancelled before sentence {}/{}", i + 1, sentences.len());
                break;
            }

            let t_gen = Instant::now();
            let samples = match self.generate_audio(sentence, speed) {
                Ok(s) => s,
                Err(e) => {
                    warn!("TTS generation failed for sentence {}: {e}", i + 1);
                    continue;
                }
            };
            let gen_ms = t_gen.elapsed().as_secs_f64() * 1000.0;
            total_gen_ms += gen_ms;

            if self.is_cancelled(epoch) {
                cancelled = true;
                info!("Cancelled after generating sentence {}/{}", i + 1, sentences.len());
                break;
            }

            if samples.is_empty() {
                continue;
            }

            let t_play = Instant::now();
            let was_cancelled = self
                .play_audio(samples, playback_rate, params.volume, epoch)
                .await;
            let play_ms = t_play.elapsed().as_secs_f64() * 1000.0;
            total_play_ms += play_ms;

            if was_cancelled {
                cancelled = true;
                info!("Cancelled during playback of sentence {}/{}", i + 1, sentences.len());
                break;
            }

            debug!(
                "Sentence {}/{}: gen={gen_ms:.0}ms play={:.1}s",
                i + 1,
                sentences.len(),
                play_ms / 1000.0
            );
        }

        SpeakResult {
            generate_ms: total_gen_ms,
            playback_ms: total_play_ms,
            cancelled,
        }
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str, speed: f32) -> Result<Vec<f32>, SynthesisError> {
        let gen_err = |what: &str, e: &dyn std::fmt::Display| {
            SynthesisError::Generate(format!("{what}: {e}"))
        };

        let mut session_guard = self.session.lock().unwrap();
        let session = session_guard
            .as_mut()
            .ok_or_else(|| SynthesisError::Generate("model not loaded".into()))?;
        let phonemizer = self
            .phonemizer
            .as_ref()
            .ok_or_else(|| SynthesisError::Generate("phonemizer not loaded".into()))?;

        let (phonemes, _tokens) = phonemizer
            .g2p(text)
            .map_err(|e| gen_err("phonemization", &e))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0); // Start padding
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0); // End padding

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| SynthesisError::Generate(format!("voice not found: {}", self.voice)))?;

        // Index into style array by token count (clamped to max)
        let style_idx = (n_tokens.saturating_sub(2)).min(voice_data.styles.nrows() - 1);
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| gen_err("tokens tensor", &e))?;
        let tokens_tensor =
            Tensor::from_array(tokens_array).map_err(|e| gen_err("tokens ort tensor", &e))?;

        let style_array = Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| gen_err("style tensor", &e))?;
        let style_tensor =
            Tensor::from_array(style_array).map_err(|e| gen_err("style ort tensor", &e))?;

        let speed_array = ndarray::Array1::from_vec(vec![speed]);
        let speed_tensor =
            Tensor::from_array(speed_array).map_err(|e| gen_err("speed ort tensor", &e))?;

        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| gen_err("ONNX inference", &e))?;

        // ort 2.0: try_extract_tensor returns (&Shape, &[T]) tuple
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| SynthesisError::Generate("no output tensor from model".into()))?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| gen_err("audio tensor", &e))?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(samples)
    }

    /// Play audio samples through rodio. Returns true if cancelled during playback.
    async fn play_audio(&self, samples: Vec<f32>, rate: u32, volume: f32, epoch: u64) -> bool {
        let stream = match &self.output_stream {
            Some(s) => s,
            None => {
                warn!("No audio output stream");
                return false;
            }
        };

        let sink = Sink::connect_new(stream.mixer());
        sink.set_volume(volume.clamp(0.0, 1.0));
        sink.append(SamplesBuffer::new(1, rate, samples));

        self.active_sink.install(epoch, sink);

        let current = self.epoch.clone();
        let active_sink = self.active_sink.clone();

        let was_cancelled = tokio::task::spawn_blocking(move || loop {
            // A sink from another utterance in the slot means ours was taken.
            if active_sink.owned_by(epoch, |sink| sink.empty()).unwrap_or(true) {
                return current.load(Ordering::Relaxed) != epoch;
            }

            if current.load(Ordering::Relaxed) != epoch {
                if let Some(sink) = active_sink.release(epoch) {
                    sink.stop();
                }
                return true;
            }

            std::thread::sleep(std::time::Duration::from_millis(50));
        })
        .await
        .unwrap_or(false);

        self.active_sink.release(epoch);

        was_cancelled
    }

    /// Cancel current speech immediately.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = self.active_sink.take() {
            sink.stop();
        }
        info!("TTS cancelled");
    }
}

/// The sink currently playing, tagged with the epoch of the utterance that
/// installed it. An utterance only ever clears its own entry.
struct ActiveSink<T> {
    slot: Mutex<Option<(u64, T)>>,
}

impl<T> Default for ActiveSink<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> ActiveSink<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, T)>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn install(&self, epoch: u64, item: T) {
        *self.lock() = Some((epoch, item));
    }

    /// Apply `f` to the entry if it belongs to `epoch`.
    fn owned_by<R>(&self, epoch: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &*self.lock() {
            Some((owner, item)) if *owner == epoch => Some(f(item)),
            _ => None,
        }
    }

    /// Remove the entry only if `epoch` installed it.
    fn release(&self, epoch: u64) -> Option<T> {
        let mut slot = self.lock();
        match &*slot {
            Some((owner, _)) if *owner == epoch => slot.take().map(|(_, item)| item),
            _ => None,
        }
    }

    fn take(&self) -> Option<T> {
        self.lock().take().map(|(_, item)| item)
    }
}

/// [`SpeechSynthesizer`] over a shared Kokoro engine.
pub struct KokoroSynthesizer {
    engine: Arc<KokoroTtsEngine>,
}

impl KokoroSynthesizer {
    /// Load the model on a blocking thread.
    pub async fn load(config: &TTSConfig) -> Result<Self, SynthesisError> {
        let config = config.clone();
        let engine = tokio::task::spawn_blocking(move || {
            let mut engine = KokoroTtsEngine::new(&config);
            engine.load_model_sync().map(|()| engine)
        })
        .await
        .map_err(|e| SynthesisError::Load(format!("loader task failed: {e}")))??;

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

impl SpeechSynthesizer for KokoroSynthesizer {
    fn speak(&self, text: String, params: SpeechParams, done: UtteranceDone) {
        let engine = self.engine.clone();
        // Captured now so a cancel issued before the task runs still applies.
        let epoch = engine.current_epoch();

        tokio::spawn(async move {
            let t_total = Instant::now();
            let result = engine.speak(&text, params, epoch).await;
            info!(
                "TTS complete: gen={:.0}ms play={:.0}ms total={:.0}ms cancelled={}",
                result.generate_ms,
                result.playback_ms,
                t_total.elapsed().as_secs_f64() * 1000.0,
                result.cancelled,
            );
            done();
        });
    }

    fn cancel(&self) {
        self.engine.cancel();
    }
}

// --- Helper functions ---

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, SynthesisError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| SynthesisError::Load(format!("read tokenizer: {e}")))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| SynthesisError::Load(format!("parse tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| SynthesisError::Load("missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| SynthesisError::Load(format!("token id for {token:?} is not an integer")))?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>, SynthesisError> {
    let load_err = |what: String| SynthesisError::Load(what);

    let file = fs::File::open(path).map_err(|e| load_err(format!("open voices file: {e}")))?;
    let mut npz = NpzReader::new(file).map_err(|e| load_err(format!("read NPZ voices: {e}")))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| load_err(format!("list NPZ entries: {e}")))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| load_err(format!("read voice '{name}': {e}")))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension to (510, 256).
        let (dim0, dim2) = (arr.shape()[0], arr.shape()[2]);
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| load_err(format!("reshape voice '{name}': {e}")))?;

        voices.insert(name, VoiceData { styles });
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("Hello there. How are you? I'm fine!"),
            vec!["Hello there.", "How are you?", "I'm fine!"]
        );
    }

    #[test]
    fn test_split_keeps_decimals_together() {
        assert_eq!(
            split_sentences("Take 2.5 tablets. Then rest."),
            vec!["Take 2.5 tablets.", "Then rest."]
        );
    }

    #[test]
    fn test_split_empty() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_model_files_resolved_next_to_model() {
        let config = TTSConfig {
            model_path: "/opt/kokoro/kokoro-v1.0.onnx".into(),
            ..TTSConfig::default()
        };
        let engine = KokoroTtsEngine::new(&config);
        assert_eq!(engine.voices_path, PathBuf::from("/opt/kokoro/voices-v1.0.bin"));
        assert_eq!(engine.tokenizer_path, PathBuf::from("/opt/kokoro/tokenizer.json"));
    }

    #[test]
    fn test_cancel_advances_epoch() {
        let engine = KokoroTtsEngine::new(&TTSConfig::default());
        let before = engine.current_epoch();
        engine.cancel();
        assert!(engine.is_cancelled(before));
        assert!(!engine.is_cancelled(engine.current_epoch()));
    }

    #[test]
    fn test_stale_utterance_leaves_new_sink_alone() {
        let active = ActiveSink::default();
        active.install(1, "first");
        assert_eq!(active.take(), Some("first"));

        active.install(2, "second");
        assert_eq!(active.release(1), None);
        assert_eq!(active.owned_by(1, |s| s.len()), None);
        assert_eq!(active.owned_by(2, |s| s.len()), Some(6));
        assert_eq!(active.release(2), Some("second"));
        assert_eq!(active.take(), None);
    }

    #[test]
    fn test_missing_tokenizer_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tokenizer(&dir.path().join("tokenizer.json")).unwrap_err();
        assert!(matches!(err, SynthesisError::Load(_)));
    }

    #[test]
    fn test_tokenizer_vocab_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        fs::write(&path, r#"{"model":{"vocab":{"a":43,"ə":83,"$":0}}}"#).unwrap();
        let vocab = load_tokenizer(&path).unwrap();
        assert_eq!(vocab.get(&'ə'), Some(&83));
        assert_eq!(vocab.len(), 3);
    }
}
