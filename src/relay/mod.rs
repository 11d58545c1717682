//! # Relay
//!
//! The hub process every participant connects to. It owns the settings
//! store and propagates messages between connections under two deliberate
//! fan-out rules:
//!
//! * **Settings changes echo to everyone, the sender included.** A
//!   controller that moves a slider converges through the same
//!   `setting_changed` broadcast as every other surface, which is what
//!   makes optimistic UIs reconcile cleanly.
//! * **Playback traffic is forwarded to everyone except the sender.** A
//!   controller should not receive its own `play` request back, and the
//!   playback node should not hear its own `sound_started` echo.
//!
//! Settings mutations always round-trip through the store (and its durable
//! file) before the broadcast goes out, so no client ever observes a value
//! a crash could roll back.

pub mod hub;
pub mod server;

pub use hub::{ConnId, Hub, HubError, Role};

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::protocol::Message;
use crate::settings::{GlobalSettings, SettingsError, SettingsPatch, SettingsStore};

/// The relay's shared state: connection registry plus the authoritative
/// settings store.
pub struct Relay {
    hub: Hub,
    store: SettingsStore,
    sounds_dir: PathBuf,
}

impl Relay {
    pub fn new(store: SettingsStore, sounds_dir: impl Into<PathBuf>) -> Self {
        Relay {
            hub: Hub::new(),
            store,
            sounds_dir: sounds_dir.into(),
        }
    }

    pub fn sounds_dir(&self) -> &Path {
        &self.sounds_dir
    }

    pub fn settings(&self) -> GlobalSettings {
        self.store.get()
    }

    /// Admits a connection and immediately queues the full settings
    /// snapshot for it, so every joiner starts consistent before any
    /// incremental update arrives.
    pub fn connect(
        &self,
        role: Role,
    ) -> Result<(ConnId, mpsc::UnboundedReceiver<Message>), HubError> {
        let (id, rx) = self.hub.register(role)?;
        self.hub.send_to(
            id,
            Message::SettingsInitialized {
                settings: self.store.get(),
            },
        );
        info!("client #{id} connected ({role})");
        Ok((id, rx))
    }

    pub fn disconnect(&self, id: ConnId) {
        self.hub.unregister(id);
        info!("client #{id} disconnected");
    }

    /// Routes one inbound message from connection `from`.
    pub fn handle_message(&self, from: ConnId, msg: Message) {
        match msg {
            Message::UpdateSetting {
                sound_id,
                setting,
                value,
            } => {
                let patch = match SettingsPatch::from_setting(sound_id, setting, &value) {
                    Ok(patch) => patch,
                    Err(e) => {
                        warn!("dropping malformed update_setting from #{from}: {e}");
                        return;
                    }
                };
                match self.store.apply_patch(&patch) {
                    Ok(applied) => {
                        for field in applied {
                            self.hub.broadcast_all(&Message::SettingChanged {
                                sound_id: field.sound_id,
                                setting: field.setting,
                                value: field.value,
                            });
                        }
                    }
                    Err(e) => {
                        // Only the initiator learns about the failure.
                        warn!("settings patch from #{from} rejected: {e}");
                        self.hub.send_to(
                            from,
                            Message::SettingsError {
                                message: e.to_string(),
                            },
                        );
                    }
                }
            }

            msg @ (Message::Play { .. }
            | Message::StopAll
            | Message::SoundStarted { .. }
            | Message::SoundEnded { .. }) => {
                self.hub.broadcast_except(from, &msg);
            }

            msg @ (Message::SettingsInitialized { .. }
            | Message::SettingsUpdated { .. }
            | Message::SettingChanged { .. }
            | Message::SettingsError { .. }) => {
                warn!(
                    "dropping server-only message '{}' from client #{from}",
                    msg.action()
                );
            }
        }
    }

    /// The HTTP bulk-update path: merges a multi-field patch and broadcasts
    /// the resulting document to every connection.
    pub fn apply_bulk_patch(
        &self,
        patch: &SettingsPatch,
    ) -> Result<GlobalSettings, SettingsError> {
        self.store.apply_patch(patch)?;
        let merged = self.store.get();
        self.hub.broadcast_all(&Message::SettingsUpdated {
            settings: merged.clone(),
        });
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::clip_id;
    use crate::protocol::SettingKind;
    use serde_json::json;

    struct Fixture {
        relay: Relay,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
        let relay = Relay::new(store, dir.path().join("sounds"));
        Fixture { relay, _dir: dir }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn joiners_receive_the_snapshot_first() {
        let f = fixture();
        let (_, mut rx) = f.relay.connect(Role::Controller).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![Message::SettingsInitialized {
                settings: GlobalSettings::default()
            }]
        );
    }

    #[test]
    fn only_one_playback_connection_is_admitted() {
        let f = fixture();
        let (playback, _rx) = f.relay.connect(Role::Playback).unwrap();
        assert!(matches!(
            f.relay.connect(Role::Playback),
            Err(HubError::PlaybackRoleTaken)
        ));
        // Controllers are unaffected by the playback slot being taken.
        f.relay.connect(Role::Controller).unwrap();

        // Once the playback node leaves, the slot frees up.
        f.relay.disconnect(playback);
        f.relay.connect(Role::Playback).unwrap();
    }

    #[test]
    fn update_setting_echoes_to_every_connection_including_sender() {
        let f = fixture();
        let (a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        let (_b, mut rx_b) = f.relay.connect(Role::Controller).unwrap();
        let (_p, mut rx_p) = f.relay.connect(Role::Playback).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_p);

        let kick = clip_id("kick.wav");
        f.relay.handle_message(
            a,
            Message::UpdateSetting {
                sound_id: Some(kick.clone()),
                setting: SettingKind::Volume,
                value: json!(0.5),
            },
        );

        // The store committed before anyone heard about it.
        assert_eq!(f.relay.settings().sounds[&kick].volume, 0.5);

        let expected = Message::SettingChanged {
            sound_id: Some(kick.clone()),
            setting: SettingKind::Volume,
            value: json!(0.5),
        };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_p), vec![expected]);
    }

    #[test]
    fn playback_traffic_skips_the_sender() {
        let f = fixture();
        let (a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        let (_b, mut rx_b) = f.relay.connect(Role::Controller).unwrap();
        let (p, mut rx_p) = f.relay.connect(Role::Playback).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_p);

        let kick = clip_id("kick.wav");
        let play = Message::Play {
            sound_id: kick.clone(),
        };
        f.relay.handle_message(a, play.clone());
        assert!(drain(&mut rx_a).is_empty(), "sender must not hear its own play");
        assert_eq!(drain(&mut rx_b), vec![play.clone()]);
        assert_eq!(drain(&mut rx_p), vec![play]);

        let started = Message::SoundStarted { sound_id: kick };
        f.relay.handle_message(p, started.clone());
        assert_eq!(drain(&mut rx_a), vec![started.clone()]);
        assert_eq!(drain(&mut rx_b), vec![started]);
        assert!(drain(&mut rx_p).is_empty());
    }

    #[test]
    fn malformed_setting_combinations_are_dropped() {
        let f = fixture();
        let (a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        drain(&mut rx_a);

        // volume without a soundId makes no sense; nothing is broadcast and
        // the connection stays registered.
        f.relay.handle_message(
            a,
            Message::UpdateSetting {
                sound_id: None,
                setting: SettingKind::Volume,
                value: json!(0.5),
            },
        );
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(f.relay.hub.connection_count(), 1);
    }

    #[test]
    fn rejected_patch_notifies_only_the_sender() {
        let f = fixture();
        let (a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        let (_b, mut rx_b) = f.relay.connect(Role::Controller).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Out of range: the store refuses, so the sender gets an error and
        // nobody else hears anything.
        f.relay.handle_message(
            a,
            Message::UpdateSetting {
                sound_id: None,
                setting: SettingKind::MasterVolume,
                value: json!(7.5),
            },
        );

        let got = drain(&mut rx_a);
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], Message::SettingsError { .. }));
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(f.relay.settings(), GlobalSettings::default());
    }

    #[test]
    fn server_only_messages_from_clients_are_dropped() {
        let f = fixture();
        let (a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        let (_b, mut rx_b) = f.relay.connect(Role::Controller).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        f.relay.handle_message(
            a,
            Message::SettingsInitialized {
                settings: GlobalSettings::default(),
            },
        );
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn bulk_patch_broadcasts_the_merged_document() {
        let f = fixture();
        let (_a, mut rx_a) = f.relay.connect(Role::Controller).unwrap();
        drain(&mut rx_a);

        let patch = SettingsPatch {
            master_volume: Some(0.5),
            columns: Some(4),
            ..Default::default()
        };
        let merged = f.relay.apply_bulk_patch(&patch).unwrap();
        assert_eq!(merged.master_volume, 0.5);
        assert_eq!(merged.columns, 4);

        assert_eq!(
            drain(&mut rx_a),
            vec![Message::SettingsUpdated { settings: merged }]
        );
    }

    #[test]
    fn late_joiners_see_earlier_changes_in_their_snapshot() {
        let f = fixture();
        let (a, _rx_a) = f.relay.connect(Role::Controller).unwrap();
        f.relay.handle_message(
            a,
            Message::UpdateSetting {
                sound_id: None,
                setting: SettingKind::Columns,
                value: json!(6),
            },
        );

        let (_late, mut rx_late) = f.relay.connect(Role::Controller).unwrap();
        match &drain(&mut rx_late)[..] {
            [Message::SettingsInitialized { settings }] => assert_eq!(settings.columns, 6),
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }
}
