//! Configuration management for companion-voice.
//!
//! Loads config from YAML files in standard locations. Every section falls
//! back to its defaults, so a partial file (or none at all) is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_PERSONA: &str = "You are a warm, patient companion for an older adult. \
Answer in short, clear sentences using everyday words. \
Be kind and encouraging, and never rush the person. \
If you are unsure about something medical, suggest they talk to their doctor or a family member.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub persona: String,
    /// Overrides the reminders storage file location.
    pub storage_path: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.into(),
            storage_path: None,
        }
    }
}

impl AssistantConfig {
    pub fn storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("companion-voice/storage.json")
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub host: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "llama3.2:3b".into(),
            api_key: None,
            timeout_secs: 60,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechBackend {
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub backend: SpeechBackend,
    pub language: String,
    pub whisper_model: String,
    pub remote_url: String,
    pub remote_model: String,
    pub remote_api_key: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: SpeechBackend::Local,
            language: "en".into(),
            whisper_model: "base".into(),
            remote_url: "http://localhost:8000/v1/audio/transcriptions".into(),
            remote_model: "whisper-1".into(),
            remote_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub device_index: Option<u32>,
    pub channels: u16,
    pub chunk_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            device_index: None,
            channels: 1,
            chunk_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub threshold: f32,
    pub duration: f64,
    pub min_speech_duration: f64,
    pub max_recording_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        // Older speakers pause longer between phrases.
        Self {
            threshold: 0.01,
            duration: 2.0,
            min_speech_duration: 0.5,
            max_recording_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub enabled: bool,
    pub voice: String,
    pub normal_rate: f32,
    pub slow_rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub slow_by_default: bool,
    pub model_path: String,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "af_heart".into(),
            normal_rate: 1.0,
            slow_rate: 0.75,
            pitch: 1.0,
            volume: 1.0,
            slow_by_default: false,
            model_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub enabled: bool,
    pub combo: Vec<String>,
    pub alt_combos: Vec<Vec<String>>,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            combo: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into()],
            alt_combos: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub chat: ChatConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub tts: TTSConfig,
    pub hotkey: HotkeyConfig,
    pub feedback: FeedbackConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/companion-voice/config.yaml
    /// 3. /etc/companion-voice/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/companion-voice/config.yaml")),
                Some(PathBuf::from("/etc/companion-voice/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
