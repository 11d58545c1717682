//! # Wire Protocol
//!
//! Every participant speaks the same JSON message schema over its WebSocket
//! connection, tagged by an `action` field. The schema is modeled as a single
//! sum type so the relay and the playback engine match exhaustively; a payload
//! whose `action` is unknown fails to deserialize and is dropped as malformed
//! rather than silently ignored.
//!
//! ## Actions
//!
//! | Action | Direction | Payload |
//! |--------|-----------|---------|
//! | `settings_initialized` | server -> client, on connect | full settings |
//! | `settings_updated` | server -> all, after a bulk HTTP patch | full settings |
//! | `setting_changed` | server -> all, after a field patch | `soundId?`, `setting`, `value` |
//! | `update_setting` | controller -> server | `soundId?`, `setting`, `value` |
//! | `play` | controller -> playback node | `soundId` |
//! | `stopAll` | controller -> playback node | (none) |
//! | `sound_started` | playback node -> controllers | `soundId` |
//! | `sound_ended` | playback node -> controllers | `soundId` |
//! | `settings_error` | server -> initiating controller only | `message` |

use serde::{Deserialize, Serialize};

use crate::catalog::ClipId;
use crate::settings::GlobalSettings;

/// Which settings field a `setting_changed`/`update_setting` message targets.
///
/// `MasterVolume` and `Columns` are global (no `soundId`); `Volume` and
/// `Color` apply to the clip named by the message's `soundId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingKind {
    #[serde(rename = "masterVolume")]
    MasterVolume,
    #[serde(rename = "columns")]
    Columns,
    #[serde(rename = "volume")]
    Volume,
    #[serde(rename = "color")]
    Color,
}

/// A protocol message, tagged by its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Message {
    /// Full settings snapshot sent to a connection right after it joins.
    #[serde(rename = "settings_initialized")]
    SettingsInitialized { settings: GlobalSettings },

    /// Full settings document broadcast after a bulk update over HTTP.
    #[serde(rename = "settings_updated")]
    SettingsUpdated { settings: GlobalSettings },

    /// One settings field changed; echoed to every connection including the
    /// sender so all surfaces converge through the same code path.
    #[serde(rename = "setting_changed")]
    SettingChanged {
        #[serde(rename = "soundId", default, skip_serializing_if = "Option::is_none")]
        sound_id: Option<ClipId>,
        setting: SettingKind,
        value: serde_json::Value,
    },

    /// A controller requests a settings change.
    #[serde(rename = "update_setting")]
    UpdateSetting {
        #[serde(rename = "soundId", default, skip_serializing_if = "Option::is_none")]
        sound_id: Option<ClipId>,
        setting: SettingKind,
        value: serde_json::Value,
    },

    /// A controller requests playback of one clip.
    #[serde(rename = "play")]
    Play {
        #[serde(rename = "soundId")]
        sound_id: ClipId,
    },

    /// A controller requests that every playing clip stop.
    #[serde(rename = "stopAll")]
    StopAll,

    /// The playback node started a voice for this clip.
    #[serde(rename = "sound_started")]
    SoundStarted {
        #[serde(rename = "soundId")]
        sound_id: ClipId,
    },

    /// The playback node's current voice for this clip finished or was
    /// stopped by `stopAll`. Not emitted for retrigger pre-emptions.
    #[serde(rename = "sound_ended")]
    SoundEnded {
        #[serde(rename = "soundId")]
        sound_id: ClipId,
    },

    /// A settings save failed; sent to the initiating connection only.
    #[serde(rename = "settings_error")]
    SettingsError { message: String },
}

impl Message {
    /// The message's `action` tag, for log lines.
    pub fn action(&self) -> &'static str {
        match self {
            Message::SettingsInitialized { .. } => "settings_initialized",
            Message::SettingsUpdated { .. } => "settings_updated",
            Message::SettingChanged { .. } => "setting_changed",
            Message::UpdateSetting { .. } => "update_setting",
            Message::Play { .. } => "play",
            Message::StopAll => "stopAll",
            Message::SoundStarted { .. } => "sound_started",
            Message::SoundEnded { .. } => "sound_ended",
            Message::SettingsError { .. } => "settings_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kick() -> ClipId {
        crate::catalog::clip_id("kick.wav")
    }

    #[test]
    fn play_serializes_with_action_tag() {
        let msg = Message::Play { sound_id: kick() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"action": "play", "soundId": "sound-kick.wav"})
        );
    }

    #[test]
    fn stop_all_is_a_bare_action() {
        let msg = Message::StopAll;
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"action":"stopAll"}"#);
        let parsed: Message = serde_json::from_str(r#"{"action":"stopAll"}"#).unwrap();
        assert_eq!(parsed, Message::StopAll);
    }

    #[test]
    fn update_setting_parses_the_remote_payload() {
        let parsed: Message = serde_json::from_str(
            r#"{"action":"update_setting","soundId":"sound-kick.wav","setting":"volume","value":0.5}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Message::UpdateSetting {
                sound_id: Some(kick()),
                setting: SettingKind::Volume,
                value: json!(0.5),
            }
        );
    }

    #[test]
    fn global_setting_change_omits_sound_id() {
        let msg = Message::SettingChanged {
            sound_id: None,
            setting: SettingKind::MasterVolume,
            value: json!(0.8),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"action": "setting_changed", "setting": "masterVolume", "value": 0.8})
        );
        assert!(value.get("soundId").is_none());
    }

    #[test]
    fn events_round_trip() {
        for msg in [
            Message::SoundStarted { sound_id: kick() },
            Message::SoundEnded { sound_id: kick() },
            Message::SettingsError {
                message: "disk full".into(),
            },
        ] {
            let text = serde_json::to_string(&msg).unwrap();
            let parsed: Message = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, msg);
        }
    }

    #[test]
    fn snapshot_round_trips_with_settings_document() {
        let mut settings = GlobalSettings::default();
        settings.master_volume = 0.75;
        let msg = Message::SettingsInitialized { settings };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "settings_initialized");
        assert_eq!(value["settings"]["masterVolume"], json!(0.75));
        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"action":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<Message>(r#"{"volume":1}"#).is_err());
    }

    #[test]
    fn unknown_setting_kind_is_rejected() {
        assert!(serde_json::from_str::<Message>(
            r#"{"action":"update_setting","setting":"brightness","value":1}"#
        )
        .is_err());
    }
}
