//! Application context and event loop.
//!
//! Every input (console lines, the hotkey, the control API, chat replies,
//! recognizer outcomes, finished utterances) arrives as an [`AppEvent`] on
//! one channel and is handled in order on the main task. Nothing here runs
//! in parallel; background tasks only post events back.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::notifier::Notifier;
use crate::reminders::{KeyValueStore, Reminder, ReminderStore};
use crate::router::{reminder_confirmation, route, Route};
use crate::session::{ChatError, ChatSession, APOLOGY};
use crate::surface::{Surface, HELP};
use crate::transcript::{ChatTurn, Transcript};
use crate::voice_input::{RecognitionError, RecognitionEvent, SpeechRecognizer, VoiceInput};
use crate::voice_output::{SpeechSynthesizer, VoiceOutput};

pub const STORE_FAILURE: &str = "I couldn't save your reminders. Please try again.";

/// Optional reply channel for events coming from the control API.
pub type Reply<T> = Option<oneshot::Sender<T>>;

pub enum AppEvent {
    /// Typed text, routed like a spoken transcript.
    Submit(String),
    ToggleMicrophone,
    Recognition(RecognitionEvent),
    ChatReply(Result<String, ChatError>),
    UtteranceFinished(u64),
    SetSlowSpeech(bool),
    ToggleReminders,
    AddReminder(String, Reply<Result<Reminder, String>>),
    DeleteReminder(i64, Reply<Option<Reminder>>),
    CancelSpeech,
    Snapshot(oneshot::Sender<StatusSnapshot>),
    ShowHelp,
    Notice(String),
    Quit,
}

impl AppEvent {
    pub fn delete_reminder(id: i64) -> Self {
        Self::DeleteReminder(id, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub listening: bool,
    pub speaking: bool,
    pub slow_speech: bool,
    pub waiting_for_reply: bool,
    pub turns: usize,
    pub reminders: Vec<Reminder>,
}

/// External capabilities the assistant is built from.
pub struct Components {
    pub session: Box<dyn ChatSession>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub store: Box<dyn KeyValueStore>,
    pub surface: Box<dyn Surface>,
}

pub struct Assistant {
    session: Arc<Mutex<Box<dyn ChatSession>>>,
    transcript: Transcript,
    voice_in: VoiceInput,
    voice_out: VoiceOutput,
    reminders: ReminderStore,
    surface: Box<dyn Surface>,
    notifier: Notifier,
    events: mpsc::UnboundedSender<AppEvent>,
    pending_replies: usize,
    reminders_visible: bool,
}

impl Assistant {
    pub fn new(
        components: Components,
        config: &Config,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(components.session)),
            transcript: Transcript::new(),
            voice_in: VoiceInput::new(components.recognizer),
            voice_out: VoiceOutput::new(components.synthesizer, &config.tts),
            reminders: ReminderStore::load(components.store),
            surface: components.surface,
            notifier: Notifier::new(config.feedback.notifications),
            events,
            pending_replies: 0,
            reminders_visible: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn reminders(&self) -> &[Reminder] {
        self.reminders.items()
    }

    /// Handle events until `Quit`, then release the audio devices.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AppEvent>) {
        info!("Assistant ready");
        while let Some(event) = rx.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        self.shutdown();
    }

    pub fn handle(&mut self, event: AppEvent) -> ControlFlow<()> {
        match event {
            AppEvent::Submit(text) => self.submit(&text),
            AppEvent::ToggleMicrophone => self.toggle_microphone(),
            AppEvent::Recognition(event) => self.on_recognition(event),
            AppEvent::ChatReply(result) => self.on_chat_reply(result),
            AppEvent::UtteranceFinished(id) => self.voice_out.finished(id),
            AppEvent::SetSlowSpeech(slow) => self.voice_out.set_slow(slow),
            AppEvent::ToggleReminders => self.toggle_reminders(),
            AppEvent::AddReminder(text, reply) => {
                let result = self.add_reminder(&text);
                match &result {
                    Ok(reminder) => self
                        .surface
                        .show_notice(&format!("A reminder was added: \"{}\"", reminder.text)),
                    Err(_) => self.surface.show_notice(STORE_FAILURE),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            AppEvent::DeleteReminder(id, reply) => {
                let removed = self.delete_reminder(id);
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            AppEvent::CancelSpeech => self.voice_out.cancel(),
            AppEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            AppEvent::ShowHelp => self.surface.show_notice(HELP),
            AppEvent::Notice(text) => self.surface.show_notice(&text),
            AppEvent::Quit => {
                info!("Quit requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            listening: self.voice_in.is_listening(),
            speaking: self.voice_out.is_speaking(),
            slow_speech: self.voice_out.is_slow(),
            waiting_for_reply: self.pending_replies > 0,
            turns: self.transcript.len(),
            reminders: self.reminders.items().to_vec(),
        }
    }

    fn submit(&mut self, text: &str) {
        match route(text) {
            Route::Empty => debug!("Ignoring empty message"),
            Route::Reminder(item) => {
                self.append(ChatTurn::user(text.trim()));
                let answer = match self.add_reminder(&item) {
                    Ok(reminder) => reminder_confirmation(&reminder.text),
                    Err(_) => STORE_FAILURE.to_string(),
                };
                self.respond(answer);
            }
            Route::Chat(message) => {
                self.append(ChatTurn::user(message.clone()));
                self.ask(message);
            }
        }
    }

    /// Send `message` to the session in the background; the reply comes
    /// back as `ChatReply`.
    fn ask(&mut self, message: String) {
        self.pending_replies += 1;
        if self.pending_replies == 1 {
            self.surface.set_loading(true);
        }

        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = session.lock().await.send(&message).await;
            let _ = events.send(AppEvent::ChatReply(result));
        });
    }

    fn on_chat_reply(&mut self, result: Result<String, ChatError>) {
        self.pending_replies = self.pending_replies.saturating_sub(1);
        if self.pending_replies == 0 {
            self.surface.set_loading(false);
        }

        let answer = result.unwrap_or_else(|e| {
            warn!("No reply from chat session: {e}");
            APOLOGY.to_string()
        });
        self.respond(answer);
    }

    fn respond(&mut self, text: String) {
        self.speak(&text);
        self.append(ChatTurn::assistant(text));
    }

    fn append(&mut self, turn: ChatTurn) {
        let turn = self.transcript.push(turn);
        self.surface.show_turn(turn);
    }

    fn speak(&mut self, text: &str) {
        // The microphone must not hear our own voice.
        if self.voice_in.is_listening() {
            debug!("Stopping the microphone to speak");
            self.voice_in.stop();
            self.surface.set_listening(false);
        }

        let events = self.events.clone();
        self.voice_out.speak(text, move |id| {
            let _ = events.send(AppEvent::UtteranceFinished(id));
        });
    }

    fn toggle_microphone(&mut self) {
        if self.voice_in.is_listening() {
            self.voice_in.stop();
            self.surface.set_listening(false);
            return;
        }

        // Don't let the microphone pick up our own voice.
        self.voice_out.cancel();

        let events = self.events.clone();
        let started = self.voice_in.start(move |session| {
            Box::new(move |outcome| {
                let _ = events.send(AppEvent::Recognition(RecognitionEvent { session, outcome }));
            })
        });

        match started {
            Ok(_) => self.surface.set_listening(true),
            Err(e) => self.report_recognition_error(&e),
        }
    }

    fn on_recognition(&mut self, event: RecognitionEvent) {
        let was_listening = self.voice_in.is_listening();
        let outcome = self.voice_in.finish(event);
        if was_listening && !self.voice_in.is_listening() {
            self.surface.set_listening(false);
        }

        match outcome {
            Some(Ok(text)) => {
                info!("Heard: \"{text}\"");
                self.submit(&text);
            }
            Some(Err(e)) => self.report_recognition_error(&e),
            None => {}
        }
    }

    fn report_recognition_error(&mut self, error: &RecognitionError) {
        warn!("Speech recognition: {error}");
        if let Some(message) = error.user_message() {
            self.surface.show_notice(message);
            self.speak(message);
        }
    }

    fn add_reminder(&mut self, text: &str) -> Result<Reminder, String> {
        let reminder = match self.reminders.add(text) {
            Ok(reminder) => reminder.clone(),
            Err(e) => {
                warn!("Failed to save reminder: {e}");
                return Err(e.to_string());
            }
        };

        self.notifier.reminder_added(&reminder);
        self.refresh_reminders();
        Ok(reminder)
    }

    fn delete_reminder(&mut self, id: i64) -> Option<Reminder> {
        match self.reminders.delete(id) {
            Ok(Some(removed)) => {
                self.refresh_reminders();
                Some(removed)
            }
            Ok(None) => {
                self.surface
                    .show_notice(&format!("There is no reminder number {id}."));
                None
            }
            Err(e) => {
                warn!("Failed to delete reminder {id}: {e}");
                self.surface.show_notice(STORE_FAILURE);
                None
            }
        }
    }

    fn toggle_reminders(&mut self) {
        self.reminders_visible = !self.reminders_visible;
        if self.reminders_visible {
            self.surface.render_reminders(self.reminders.items());
        } else {
            self.surface.hide_reminders();
        }
    }

    fn refresh_reminders(&mut self) {
        if self.reminders_visible {
            self.surface.render_reminders(self.reminders.items());
        }
    }

    fn shutdown(&mut self) {
        self.voice_in.stop();
        self.voice_out.cancel();
        info!("Assistant stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::reminders::tests::MemoryStore;
    use crate::surface::tests::RecordingSurface;
    use crate::transcript::Speaker;
    use crate::voice_input::tests::FakeRecognizer;
    use crate::voice_output::tests::FakeSynthesizer;

    #[derive(Clone, Default)]
    struct FakeChat {
        log: Arc<StdMutex<Vec<String>>>,
        replies: Arc<StdMutex<VecDeque<Result<String, ChatError>>>>,
    }

    #[async_trait]
    impl ChatSession for FakeChat {
        async fn send(&mut self, text: &str) -> Result<String, ChatError> {
            self.log.lock().unwrap().push(format!("chat:{text}"));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("echo: {text}")))
        }
    }

    struct Harness {
        app: Assistant,
        rx: mpsc::UnboundedReceiver<AppEvent>,
        log: Arc<StdMutex<Vec<String>>>,
        chat: FakeChat,
        recognizer: FakeRecognizer,
        synth: FakeSynthesizer,
        surface: RecordingSurface,
        store: MemoryStore,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_store(MemoryStore::default())
        }

        fn with_store(store: MemoryStore) -> Self {
            let log = Arc::new(StdMutex::new(Vec::new()));
            let chat = FakeChat {
                log: log.clone(),
                ..FakeChat::default()
            };
            let recognizer = FakeRecognizer::with_log(log.clone());
            let synth = FakeSynthesizer::with_log(log.clone());
            let surface = RecordingSurface::default();

            let mut config = Config::default();
            config.feedback.notifications = false;

            let (tx, rx) = mpsc::unbounded_channel();
            let app = Assistant::new(
                Components {
                    session: Box::new(chat.clone()),
                    recognizer: Box::new(recognizer.clone()),
                    synthesizer: Box::new(synth.clone()),
                    store: Box::new(store.clone()),
                    surface: Box::new(surface.clone()),
                },
                &config,
                tx,
            );

            Self {
                app,
                rx,
                log,
                chat,
                recognizer,
                synth,
                surface,
                store,
            }
        }

        fn send(&mut self, event: AppEvent) {
            let _ = self.app.handle(event);
        }

        /// Handle the next event the app posted to itself.
        async fn next(&mut self) {
            let event = self.rx.recv().await.expect("event channel closed");
            let _ = self.app.handle(event);
        }

        fn turns(&self) -> Vec<(Speaker, String)> {
            self.app
                .transcript()
                .turns()
                .iter()
                .map(|t| (t.speaker, t.text.clone()))
                .collect()
        }

        fn chat_calls(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| entry.starts_with("chat:"))
                .cloned()
                .collect()
        }
    }

    #[tokio::test]
    async fn test_submit_appends_user_turn_then_reply() {
        let mut h = Harness::new();
        h.chat
            .replies
            .lock()
            .unwrap()
            .push_back(Ok("Good morning! How did you sleep?".into()));

        h.send(AppEvent::Submit("Good morning".into()));
        assert_eq!(h.turns(), vec![(Speaker::User, "Good morning".to_string())]);
        assert!(h.app.snapshot().waiting_for_reply);

        h.next().await;
        assert_eq!(
            h.turns(),
            vec![
                (Speaker::User, "Good morning".to_string()),
                (Speaker::Assistant, "Good morning! How did you sleep?".to_string()),
            ]
        );
        assert_eq!(h.synth.spoken(), vec!["Good morning! How did you sleep?"]);
        assert_eq!(
            h.surface.calls(),
            vec![
                "turn:You:Good morning",
                "loading:true",
                "loading:false",
                "turn:Assistant:Good morning! How did you sleep?",
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_submit_appends_nothing() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("   \t ".into()));
        h.send(AppEvent::Submit(String::new()));

        assert!(h.app.transcript().is_empty());
        assert!(h.surface.calls().is_empty());
        tokio::task::yield_now().await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.chat_calls().is_empty());
    }

    #[tokio::test]
    async fn test_reminder_command_bypasses_chat() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("Remind me to water the plants".into()));

        let confirmation = "I've added a reminder for you: \"water the plants\"";
        assert_eq!(
            h.turns(),
            vec![
                (Speaker::User, "Remind me to water the plants".to_string()),
                (Speaker::Assistant, confirmation.to_string()),
            ]
        );
        assert_eq!(h.app.reminders().len(), 1);
        assert_eq!(h.app.reminders()[0].text, "water the plants");
        assert_eq!(h.synth.spoken(), vec![confirmation]);

        tokio::task::yield_now().await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.chat_calls().is_empty());
    }

    #[tokio::test]
    async fn test_reminder_survives_restart() {
        let store = MemoryStore::default();
        let mut h = Harness::with_store(store.clone());
        h.send(AppEvent::Submit("remind me to call Sam".into()));
        let saved = h.app.reminders().to_vec();

        let fresh = Harness::with_store(store);
        assert_eq!(fresh.app.reminders(), saved.as_slice());
        assert_eq!(fresh.app.reminders()[0].text, "call Sam");
    }

    #[tokio::test]
    async fn test_chat_failure_becomes_apology() {
        let mut h = Harness::new();
        h.chat
            .replies
            .lock()
            .unwrap()
            .push_back(Err(ChatError::Connect("http://localhost:11434".into())));

        h.send(AppEvent::Submit("What's the weather?".into()));
        h.next().await;

        let last = h.app.transcript().last().unwrap();
        assert_eq!(last.speaker, Speaker::Assistant);
        assert_eq!(last.text, APOLOGY);
        assert_eq!(h.synth.spoken(), vec![APOLOGY]);
        assert!(!h.app.snapshot().waiting_for_reply);
    }

    #[tokio::test]
    async fn test_overlapping_submissions_all_get_replies() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("first".into()));
        h.send(AppEvent::Submit("second".into()));

        h.next().await;
        assert!(h.app.snapshot().waiting_for_reply);
        h.next().await;
        assert!(!h.app.snapshot().waiting_for_reply);

        let assistant_turns = h
            .turns()
            .into_iter()
            .filter(|(speaker, _)| *speaker == Speaker::Assistant)
            .count();
        assert_eq!(assistant_turns, 2);
        assert_eq!(h.chat_calls(), vec!["chat:first", "chat:second"]);

        let loading: Vec<String> = h
            .surface
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("loading"))
            .collect();
        assert_eq!(loading, vec!["loading:true", "loading:false"]);
    }

    #[tokio::test]
    async fn test_listening_cancels_speech_first() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("remind me to stretch".into()));
        assert!(h.app.snapshot().speaking);

        h.send(AppEvent::ToggleMicrophone);

        let log = h.log.lock().unwrap().clone();
        let tail: Vec<&str> = log.iter().rev().take(2).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["cancel", "listen"]);
        assert!(h.app.snapshot().listening);
        assert!(!h.app.snapshot().speaking);
    }

    #[tokio::test]
    async fn test_reply_while_listening_stops_microphone() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("hello".into()));
        h.send(AppEvent::ToggleMicrophone);
        assert!(h.app.snapshot().listening);

        h.next().await;
        let status = h.app.snapshot();
        assert!(status.speaking);
        assert!(!status.listening);
        assert_eq!(h.synth.spoken(), vec!["echo: hello"]);

        let log = h.log.lock().unwrap().clone();
        let tail: Vec<&str> = log.iter().rev().take(2).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["abort", "speak:echo: hello"]);
        assert!(h.surface.calls().contains(&"listening:false".to_string()));

        // A late outcome from the aborted session is ignored.
        h.recognizer.deliver(Ok("remind me to nap".into()));
        assert!(h.app.reminders().is_empty());
    }

    #[tokio::test]
    async fn test_spoken_transcript_is_routed() {
        let mut h = Harness::new();
        h.send(AppEvent::ToggleMicrophone);
        h.recognizer.deliver(Ok("Remind me to take my pills".into()));
        h.next().await;

        assert!(!h.app.snapshot().listening);
        assert_eq!(h.app.reminders()[0].text, "take my pills");
        let calls = h.surface.calls();
        assert_eq!(calls[0], "listening:true");
        assert_eq!(calls[1], "listening:false");
    }

    #[tokio::test]
    async fn test_recognition_error_shows_friendly_message() {
        let mut h = Harness::new();
        h.send(AppEvent::ToggleMicrophone);
        h.recognizer.deliver(Err(RecognitionError::NoSpeech));
        h.next().await;

        let message = RecognitionError::NoSpeech.user_message().unwrap();
        assert!(h.surface.calls().contains(&format!("notice:{message}")));
        assert_eq!(h.synth.spoken(), vec![message]);
        assert!(h.app.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_microphone_start_failure_is_reported() {
        let mut h = Harness::new();
        *h.recognizer.fail_with.lock().unwrap() =
            Some(RecognitionError::PermissionDenied("no input device".into()));
        h.send(AppEvent::ToggleMicrophone);

        let message = RecognitionError::PermissionDenied(String::new())
            .user_message()
            .unwrap();
        assert!(h.surface.calls().contains(&format!("notice:{message}")));
        assert!(!h.app.snapshot().listening);
    }

    #[tokio::test]
    async fn test_second_toggle_aborts_silently() {
        let mut h = Harness::new();
        h.send(AppEvent::ToggleMicrophone);
        h.send(AppEvent::ToggleMicrophone);

        assert_eq!(h.surface.calls(), vec!["listening:true", "listening:false"]);
        assert!(h.log.lock().unwrap().contains(&"abort".to_string()));
        assert!(h.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_reminders_panel_toggles_and_rerenders() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("remind me to a".into()));
        h.send(AppEvent::Submit("remind me to b".into()));
        h.send(AppEvent::Submit("remind me to c".into()));
        let b = h.app.reminders()[1].id;

        h.send(AppEvent::ToggleReminders);
        h.send(AppEvent::delete_reminder(b));
        h.send(AppEvent::ToggleReminders);

        let panel: Vec<String> = h
            .surface
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("reminders:"))
            .collect();
        assert_eq!(panel, vec!["reminders:a|b|c", "reminders:a|c", "reminders:hidden"]);

        let texts: Vec<&str> = h.app.reminders().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_delete_unknown_reminder_notices() {
        let mut h = Harness::new();
        h.send(AppEvent::delete_reminder(99));
        assert_eq!(h.surface.calls(), vec!["notice:There is no reminder number 99."]);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_turn_count() {
        let mut h = Harness::new();
        *h.store.fail_writes.lock().unwrap() = true;
        h.send(AppEvent::Submit("remind me to call Sam".into()));

        assert!(h.app.reminders().is_empty());
        assert_eq!(h.app.transcript().len(), 2);
        assert_eq!(h.app.transcript().last().unwrap().text, STORE_FAILURE);

        let shown = h
            .surface
            .calls()
            .iter()
            .filter(|c| c.ends_with(STORE_FAILURE))
            .count();
        assert_eq!(shown, 1, "failure is shown once, as the reply");
    }

    #[tokio::test]
    async fn test_api_store_failure_is_a_notice() {
        let mut h = Harness::new();
        *h.store.fail_writes.lock().unwrap() = true;
        let (tx, rx) = oneshot::channel();
        h.send(AppEvent::AddReminder("doctor at 3pm".into(), Some(tx)));

        assert!(rx.await.unwrap().is_err());
        assert_eq!(h.surface.calls(), vec![format!("notice:{STORE_FAILURE}")]);
        assert!(h.app.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_slow_speech_applies_to_next_utterance() {
        let mut h = Harness::new();
        h.send(AppEvent::SetSlowSpeech(true));
        h.send(AppEvent::Submit("remind me to rest".into()));

        let params = h.synth.params.lock().unwrap();
        assert!((params[0].rate - Config::default().tts.slow_rate).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_api_add_and_snapshot() {
        let mut h = Harness::new();
        let (tx, rx) = oneshot::channel();
        h.send(AppEvent::AddReminder("doctor at 3pm".into(), Some(tx)));
        let added = rx.await.unwrap().unwrap();
        assert_eq!(added.text, "doctor at 3pm");
        assert!(h.app.transcript().is_empty());

        let (tx, rx) = oneshot::channel();
        h.send(AppEvent::Snapshot(tx));
        let snapshot = rx.await.unwrap();
        assert_eq!(snapshot.reminders, vec![added]);
        assert_eq!(snapshot.turns, 0);
    }

    #[tokio::test]
    async fn test_utterance_finished_clears_speaking() {
        let mut h = Harness::new();
        h.send(AppEvent::Submit("remind me to walk".into()));
        assert!(h.app.snapshot().speaking);

        let done = h.synth.pending.lock().unwrap().pop().unwrap();
        done();
        h.next().await;
        assert!(!h.app.snapshot().speaking);
    }

    #[tokio::test]
    async fn test_run_stops_on_quit() {
        let h = Harness::new();
        let tx = h.app.events.clone();
        tx.send(AppEvent::Submit("remind me to sleep".into())).unwrap();
        tx.send(AppEvent::Quit).unwrap();
        h.app.run(h.rx).await;
        assert!(h.log.lock().unwrap().contains(&"cancel".to_string()));
    }
}
