//! companion-voice: a patient voice chat companion with spoken replies and a
//! simple reminders list.

mod api;
mod app;
mod config;
mod hotkey;
mod notifier;
mod reminders;
mod router;
mod session;
mod surface;
mod transcript;
mod voice_input;
mod voice_output;

use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app::{AppEvent, Assistant, Components};
use config::Config;
use reminders::JsonFileStore;
use session::OllamaChat;
use surface::{TerminalSurface, HELP};
use voice_input::microphone::MicrophoneRecognizer;
use voice_input::transcriber::Transcriber;
use voice_input::{SpeechRecognizer, UnavailableRecognizer};
use voice_output::kokoro::KokoroSynthesizer;
use voice_output::{SpeechSynthesizer, TextOnlySynthesizer};

#[derive(Parser, Debug)]
#[command(name = "companion-voice", about = "Voice chat companion with reminders")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Text only: no microphone, no spoken replies
    #[arg(long)]
    no_voice: bool,

    /// Start with the slower speaking rate
    #[arg(long)]
    slow: bool,
}

async fn build_recognizer(config: &Config) -> Box<dyn SpeechRecognizer> {
    if !config.speech.enabled {
        return Box::new(UnavailableRecognizer::new("speech input is turned off"));
    }

    info!("Loading speech recognizer ({:?})...", config.speech.backend);
    match Transcriber::from_config(&config.speech).await {
        Ok(transcriber) => Box::new(MicrophoneRecognizer::new(
            config.audio.clone(),
            config.silence.clone(),
            transcriber,
        )),
        Err(e) => {
            warn!("Speech input unavailable: {e}");
            Box::new(UnavailableRecognizer::new(e.to_string()))
        }
    }
}

async fn build_synthesizer(config: &Config) -> Box<dyn SpeechSynthesizer> {
    if !config.tts.enabled {
        return Box::new(TextOnlySynthesizer);
    }

    info!("Loading Kokoro TTS model...");
    match KokoroSynthesizer::load(&config.tts).await {
        Ok(synth) => Box::new(synth),
        Err(e) => {
            warn!("{e}");
            info!("Continuing without voice output");
            Box::new(TextOnlySynthesizer)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so they stay out of the conversation on stdout.
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("companion-voice starting");

    let mut config = Config::load(args.config.as_deref());
    if args.no_voice {
        config.speech.enabled = false;
        config.tts.enabled = false;
    }
    if args.slow {
        config.tts.slow_by_default = true;
    }

    let storage_path = config.assistant.storage_path();
    info!("Reminders stored in {}", storage_path.display());

    let session = OllamaChat::new(config.chat.clone(), &config.assistant.persona)?;
    let recognizer = build_recognizer(&config).await;
    let synthesizer = build_synthesizer(&config).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let assistant = Assistant::new(
        Components {
            session: Box::new(session),
            recognizer,
            synthesizer,
            store: Box::new(JsonFileStore::new(storage_path)),
            surface: Box::new(TerminalSurface::stdout()),
        },
        &config,
        tx.clone(),
    );

    surface::spawn_console_reader(tx.clone());

    if config.hotkey.enabled {
        hotkey::HotkeyMonitor::new(&config.hotkey, tx.clone()).spawn();
    }

    if config.api.enabled {
        api::start_api(tx.clone(), config.api.port).await;
    }

    tokio::spawn({
        let tx = tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                let _ = tx.send(AppEvent::Quit);
            }
        }
    });

    let _ = tx.send(AppEvent::Notice(HELP.to_string()));
    drop(tx);

    assistant.run(rx).await;
    Ok(())
}
