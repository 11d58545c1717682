//! # Controller View Model
//!
//! The headless state behind a remote control surface: one button per
//! catalog clip with its playing highlight, volume slider, and color, plus
//! the global master volume and column count. A UI renders this; the model
//! itself never touches audio.
//!
//! Every inbound settings event is treated as authoritative and applied
//! idempotently: replaying the same event leaves the visible state
//! unchanged, so controllers converge no matter how often the relay
//! re-delivers state after reconnects.

use std::collections::HashMap;

use crate::catalog::{self, ClipId};
use crate::protocol::{Message, SettingKind};
use crate::settings::{GlobalSettings, SoundSettings};

/// One clip button as a control surface renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundButton {
    pub id: ClipId,
    /// Display name: the clip file name without its extension.
    pub label: String,
    /// Lit while the playback node has a current voice for this clip.
    pub playing: bool,
    pub volume: f32,
    /// Opaque color string; empty means the surface's default.
    pub color: String,
}

/// State a controller renders, built from the catalog and kept in sync by
/// applying inbound relay messages.
#[derive(Debug, Clone)]
pub struct ControllerViewModel {
    buttons: Vec<SoundButton>,
    index: HashMap<ClipId, usize>,
    pub master_volume: f32,
    pub columns: u32,
}

impl ControllerViewModel {
    /// Builds the board from the catalog's clip file names, in catalog order.
    pub fn new(clip_files: &[String]) -> Self {
        let mut buttons = Vec::with_capacity(clip_files.len());
        let mut index = HashMap::new();
        for name in clip_files {
            let id = catalog::clip_id(name);
            index.insert(id.clone(), buttons.len());
            buttons.push(SoundButton {
                id,
                label: catalog::display_name(name).to_string(),
                playing: false,
                volume: 1.0,
                color: String::new(),
            });
        }
        ControllerViewModel {
            buttons,
            index,
            master_volume: 1.0,
            columns: 3,
        }
    }

    pub fn buttons(&self) -> &[SoundButton] {
        &self.buttons
    }

    pub fn button(&self, id: &ClipId) -> Option<&SoundButton> {
        self.index.get(id).map(|&i| &self.buttons[i])
    }

    /// Applies one inbound message to the visible state.
    pub fn apply(&mut self, msg: &Message) {
        match msg {
            Message::SettingsInitialized { settings } | Message::SettingsUpdated { settings } => {
                self.apply_snapshot(settings);
            }
            Message::SettingChanged {
                sound_id,
                setting,
                value,
            } => self.apply_change(sound_id.as_ref(), *setting, value),
            Message::SoundStarted { sound_id } => self.set_playing(sound_id, true),
            Message::SoundEnded { sound_id } => self.set_playing(sound_id, false),
            // Commands and error notices carry no view state.
            Message::Play { .. }
            | Message::StopAll
            | Message::UpdateSetting { .. }
            | Message::SettingsError { .. } => {}
        }
    }

    /// Replaces all settings-derived state from a full snapshot. Clips the
    /// snapshot does not mention fall back to their defaults.
    fn apply_snapshot(&mut self, settings: &GlobalSettings) {
        self.master_volume = settings.master_volume;
        self.columns = settings.columns;
        let defaults = SoundSettings::default();
        for button in &mut self.buttons {
            let sound = settings.sounds.get(&button.id).unwrap_or(&defaults);
            button.volume = sound.volume;
            button.color = sound.color.clone();
        }
    }

    fn apply_change(&mut self, sound_id: Option<&ClipId>, setting: SettingKind, value: &serde_json::Value) {
        match (sound_id, setting) {
            (None, SettingKind::MasterVolume) => {
                if let Some(v) = value.as_f64() {
                    self.master_volume = v as f32;
                }
            }
            (None, SettingKind::Columns) => {
                if let Some(n) = value.as_u64() {
                    self.columns = n as u32;
                }
            }
            (Some(id), SettingKind::Volume) => {
                if let (Some(&i), Some(v)) = (self.index.get(id), value.as_f64()) {
                    self.buttons[i].volume = v as f32;
                }
            }
            (Some(id), SettingKind::Color) => {
                if let (Some(&i), Some(color)) = (self.index.get(id), value.as_str()) {
                    self.buttons[i].color = color.to_string();
                }
            }
            // A combination the store would never broadcast; ignore it.
            _ => {}
        }
    }

    fn set_playing(&mut self, id: &ClipId, playing: bool) {
        if let Some(&i) = self.index.get(id) {
            self.buttons[i].playing = playing;
        }
    }

    // ---- outbound commands: what the surface's widgets send ----

    pub fn press(&self, id: &ClipId) -> Message {
        Message::Play {
            sound_id: id.clone(),
        }
    }

    pub fn stop_all(&self) -> Message {
        Message::StopAll
    }

    pub fn change_volume(&self, id: &ClipId, volume: f32) -> Message {
        Message::UpdateSetting {
            sound_id: Some(id.clone()),
            setting: SettingKind::Volume,
            value: volume.into(),
        }
    }

    pub fn change_color(&self, id: &ClipId, color: &str) -> Message {
        Message::UpdateSetting {
            sound_id: Some(id.clone()),
            setting: SettingKind::Color,
            value: color.into(),
        }
    }

    pub fn change_master_volume(&self, volume: f32) -> Message {
        Message::UpdateSetting {
            sound_id: None,
            setting: SettingKind::MasterVolume,
            value: volume.into(),
        }
    }

    pub fn change_columns(&self, columns: u32) -> Message {
        Message::UpdateSetting {
            sound_id: None,
            setting: SettingKind::Columns,
            value: columns.into(),
        }
    }
}
