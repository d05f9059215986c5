//! Reminder popups on the desktop, via notify-rust (D-Bus).
//!
//! A popup is extra feedback next to the spoken confirmation, so a missing
//! notification daemon only logs a warning.

use chrono::{Local, TimeZone};
use notify_rust::{Notification, Timeout};
use tracing::{debug, warn};

use crate::reminders::Reminder;

const POPUP_TIMEOUT_MS: u32 = 8_000;

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn reminder_added(&self, reminder: &Reminder) {
        if !self.enabled {
            return;
        }

        let (summary, body) = reminder_popup(reminder);
        debug!("Reminder popup for {}", reminder.id);

        if let Err(e) = Notification::new()
            .appname("companion-voice")
            .summary(&summary)
            .body(&body)
            .icon("appointment-new")
            .timeout(Timeout::Milliseconds(POPUP_TIMEOUT_MS))
            .show()
        {
            warn!("Failed to show reminder popup: {e}");
        }
    }
}

/// Summary and body text for a newly added reminder. Ids are creation
/// times in ms, so the body also says when it was added.
fn reminder_popup(reminder: &Reminder) -> (String, String) {
    let text = reminder.text.trim();
    let what = if text.is_empty() { "(no details)" } else { text };

    let body = match Local.timestamp_millis_opt(reminder.id).single() {
        Some(added) => format!("{what}\nAdded at {}", added.format("%H:%M")),
        None => what.to_string(),
    };
    ("New reminder".to_string(), body)
}
