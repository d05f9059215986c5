//! Push-to-talk hotkey using evdev.
//!
//! Watches every keyboard for the configured combos and posts
//! `ToggleMicrophone` each time one becomes fully held.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use evdev::{Device, EventType, InputEventKind, Key};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppEvent;
use crate::config::HotkeyConfig;

/// Resolve a key name like "KEY_LEFTMETA" to an evdev key.
fn resolve_key(name: &str) -> Option<Key> {
    let key = match name {
        "KEY_LEFTMETA" => Key::KEY_LEFTMETA,
        "KEY_RIGHTMETA" => Key::KEY_RIGHTMETA,
        "KEY_LEFTALT" => Key::KEY_LEFTALT,
        "KEY_RIGHTALT" => Key::KEY_RIGHTALT,
        "KEY_LEFTCTRL" => Key::KEY_LEFTCTRL,
        "KEY_RIGHTCTRL" => Key::KEY_RIGHTCTRL,
        "KEY_LEFTSHIFT" => Key::KEY_LEFTSHIFT,
        "KEY_RIGHTSHIFT" => Key::KEY_RIGHTSHIFT,
        "KEY_SPACE" => Key::KEY_SPACE,
        "KEY_ENTER" => Key::KEY_ENTER,
        "KEY_ESC" => Key::KEY_ESC,
        "KEY_M" => Key::KEY_M,
        "KEY_T" => Key::KEY_T,
        "KEY_V" => Key::KEY_V,
        "KEY_F1" => Key::KEY_F1,
        "KEY_F2" => Key::KEY_F2,
        "KEY_F3" => Key::KEY_F3,
        "KEY_F4" => Key::KEY_F4,
        "KEY_F5" => Key::KEY_F5,
        "KEY_F6" => Key::KEY_F6,
        "KEY_F7" => Key::KEY_F7,
        "KEY_F8" => Key::KEY_F8,
        "KEY_F9" => Key::KEY_F9,
        "KEY_F10" => Key::KEY_F10,
        "KEY_F11" => Key::KEY_F11,
        "KEY_F12" => Key::KEY_F12,
        _ => {
            warn!("Unknown key name: {name}");
            return None;
        }
    };
    Some(key)
}

fn parse_combo(names: &[String]) -> Option<HashSet<Key>> {
    let combo: HashSet<Key> = names.iter().filter_map(|s| resolve_key(s)).collect();
    (!combo.is_empty()).then_some(combo)
}

/// Pressed keys across all devices.
#[derive(Default)]
struct KeyState {
    pressed: HashSet<Key>,
    active: bool,
}

impl KeyState {
    /// Apply one key event; true when a combo has just become held.
    fn apply(&mut self, combos: &[HashSet<Key>], key: Key, value: i32) -> bool {
        // 0 = release, 1 = press, 2 = repeat
        match value {
            1 => {
                self.pressed.insert(key);
            }
            0 => {
                self.pressed.remove(&key);
            }
            _ => return false,
        }

        let held = combos.iter().any(|combo| combo.is_subset(&self.pressed));
        let triggered = held && !self.active;
        self.active = held;
        triggered
    }
}

pub struct HotkeyMonitor {
    combos: Vec<HashSet<Key>>,
    state: Arc<Mutex<KeyState>>,
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl HotkeyMonitor {
    pub fn new(config: &HotkeyConfig, tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        let combos: Vec<HashSet<Key>> = std::iter::once(&config.combo)
            .chain(config.alt_combos.iter())
            .filter_map(|names| parse_combo(names))
            .collect();

        info!("Hotkey combos: {} configured", combos.len());

        Self {
            combos,
            state: Arc::new(Mutex::new(KeyState::default())),
            tx,
        }
    }

    fn find_keyboards() -> Vec<Device> {
        evdev::enumerate()
            .map(|(_path, device)| device)
            .filter(|device| {
                device
                    .supported_keys()
                    .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
            })
            .inspect(|device| debug!("Found keyboard: {}", device.name().unwrap_or("unknown")))
            .collect()
    }

    async fn monitor_device(
        device: Device,
        combos: Vec<HashSet<Key>>,
        state: Arc<Mutex<KeyState>>,
        tx: mpsc::UnboundedSender<AppEvent>,
    ) {
        let name = device.name().unwrap_or("unknown").to_string();

        let mut events = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot create event stream for {name}: {e}");
                return;
            }
        };

        loop {
            let event = match events.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    warn!("Device {name} disconnected: {e}");
                    break;
                }
            };
            if event.event_type() != EventType::KEY {
                continue;
            }
            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };

            let triggered = match state.lock() {
                Ok(mut state) => state.apply(&combos, key, event.value()),
                Err(_) => break,
            };
            if triggered {
                debug!("Hotkey pressed");
                if tx.send(AppEvent::ToggleMicrophone).is_err() {
                    break;
                }
            }
        }
    }

    /// Watch all keyboards in the background. Without access to any
    /// keyboard the hotkey is simply unavailable.
    pub fn spawn(self) {
        if self.combos.is_empty() {
            warn!("No usable hotkey combo configured");
            return;
        }

        let keyboards = Self::find_keyboards();
        if keyboards.is_empty() {
            warn!(
                "No keyboards found, hotkey disabled. Add yourself to the 'input' group: \
                 sudo usermod -aG input $USER"
            );
            return;
        }

        info!("Monitoring {} keyboard(s) for the hotkey", keyboards.len());
        for device in keyboards {
            tokio::spawn(Self::monitor_device(
                device,
                self.combos.clone(),
                Arc::clone(&self.state),
                self.tx.clone(),
            ));
        }
    }
}
