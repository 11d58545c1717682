//! # Settings Store
//!
//! The authoritative, durable settings document shared by every participant.
//!
//! ## Data Model
//! One JSON document holds the global fields and a map of per-clip entries:
//!
//! ```json
//! {
//!   "masterVolume": 1.0,
//!   "columns": 3,
//!   "sounds": { "sound-kick.wav": { "volume": 0.5, "color": "#007bff" } }
//! }
//! ```
//!
//! ## Lifecycle
//! - Missing file on startup: defaults are synthesized and persisted.
//! - Existing file: loaded verbatim; a file that exists but does not parse is
//!   a [`SettingsError::CorruptState`] and the server refuses to start over it.
//! - Mutation happens only through [`SettingsStore::apply_patch`], which
//!   persists the merged document (write-to-temp-then-rename, so a crash
//!   never leaves a half-written file) before the new state becomes visible
//!   to readers or any client is notified.
//!
//! ## Concurrency
//! Patches are serialized by a writer mutex: concurrent callers apply one at
//! a time and each merge reads the previous patch's result. Snapshots via
//! [`SettingsStore::get`] never touch the disk and never observe a torn merge.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::catalog::ClipId;
use crate::protocol::SettingKind;

/// Errors from loading or mutating the settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file exists but is not a valid settings document.
    #[error("settings file '{path}' is corrupt: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The merged document could not be written to disk. The in-memory
    /// state is left at its pre-patch values.
    #[error("failed to persist settings to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The patch carries a value the store refuses to hold.
    #[error("invalid settings patch: {reason}")]
    InvalidPatch { reason: String },
}

fn default_master_volume() -> f32 {
    1.0
}

fn default_columns() -> u32 {
    3
}

fn default_volume() -> f32 {
    1.0
}

/// Per-clip settings as stored and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundSettings {
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Button color, opaque to the engine. Empty means "unset".
    #[serde(default)]
    pub color: String,
}

impl Default for SoundSettings {
    fn default() -> Self {
        SoundSettings {
            volume: default_volume(),
            color: String::new(),
        }
    }
}

/// The full settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,
    #[serde(default = "default_columns")]
    pub columns: u32,
    #[serde(default)]
    pub sounds: BTreeMap<ClipId, SoundSettings>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            master_volume: default_master_volume(),
            columns: default_columns(),
            sounds: BTreeMap::new(),
        }
    }
}

/// A partial update: global fields and/or some clips' fields.
///
/// Merging is shallow and field-wise: only the fields present here change,
/// everything else keeps its current value. An unknown clip id creates a new
/// per-clip entry with defaults for its unpatched fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sounds: BTreeMap<ClipId, SoundPatch>,
}

/// The per-clip half of a [`SettingsPatch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoundPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SettingsPatch {
    pub fn master_volume(volume: f32) -> Self {
        SettingsPatch {
            master_volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn columns(columns: u32) -> Self {
        SettingsPatch {
            columns: Some(columns),
            ..Default::default()
        }
    }

    pub fn sound_volume(id: ClipId, volume: f32) -> Self {
        let mut patch = SettingsPatch::default();
        patch.sounds.insert(
            id,
            SoundPatch {
                volume: Some(volume),
                color: None,
            },
        );
        patch
    }

    pub fn sound_color(id: ClipId, color: impl Into<String>) -> Self {
        let mut patch = SettingsPatch::default();
        patch.sounds.insert(
            id,
            SoundPatch {
                volume: None,
                color: Some(color.into()),
            },
        );
        patch
    }

    /// Builds the patch for one `update_setting` message.
    ///
    /// Fails when the setting/target combination makes no sense (a clip
    /// setting without a `soundId`, a global setting with one) or the value
    /// has the wrong JSON type.
    pub fn from_setting(
        sound_id: Option<ClipId>,
        setting: SettingKind,
        value: &serde_json::Value,
    ) -> Result<Self, SettingsError> {
        let invalid = |reason: String| SettingsError::InvalidPatch { reason };
        match (sound_id, setting) {
            (None, SettingKind::MasterVolume) => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid("masterVolume must be a number".into()))?;
                Ok(SettingsPatch::master_volume(v as f32))
            }
            (None, SettingKind::Columns) => {
                let n = value
                    .as_u64()
                    .ok_or_else(|| invalid("columns must be a non-negative integer".into()))?;
                Ok(SettingsPatch::columns(n as u32))
            }
            (Some(id), SettingKind::Volume) => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid("volume must be a number".into()))?;
                Ok(SettingsPatch::sound_volume(id, v as f32))
            }
            (Some(id), SettingKind::Color) => {
                let color = value
                    .as_str()
                    .ok_or_else(|| invalid("color must be a string".into()))?;
                Ok(SettingsPatch::sound_color(id, color))
            }
            (None, kind) => Err(invalid(format!("setting {kind:?} requires a soundId"))),
            (Some(_), kind) => Err(invalid(format!("setting {kind:?} is global, not per-sound"))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.master_volume.is_none()
            && self.columns.is_none()
            && self.sounds.values().all(|s| s.volume.is_none() && s.color.is_none())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if let Some(v) = self.master_volume {
            validate_volume("masterVolume", v)?;
        }
        if let Some(c) = self.columns {
            if c == 0 {
                return Err(SettingsError::InvalidPatch {
                    reason: "columns must be at least 1".into(),
                });
            }
        }
        for (id, sound) in &self.sounds {
            if let Some(v) = sound.volume {
                validate_volume(&format!("volume for {id}"), v)?;
            }
        }
        Ok(())
    }
}

fn validate_volume(what: &str, v: f32) -> Result<(), SettingsError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(SettingsError::InvalidPatch {
            reason: format!("{what} must be between 0.0 and 1.0, got {v}"),
        })
    }
}

/// One field that a successful patch actually touched, in broadcast form.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedField {
    pub sound_id: Option<ClipId>,
    pub setting: SettingKind,
    pub value: serde_json::Value,
}

/// The authoritative settings document with durable storage.
pub struct SettingsStore {
    path: PathBuf,
    state: RwLock<GlobalSettings>,
    /// Serializes patch application so no merge reads a stale snapshot.
    writer: Mutex<()>,
}

impl SettingsStore {
    /// Loads the document at `path`, synthesizing and persisting defaults if
    /// no file exists yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| {
                SettingsError::CorruptState {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no settings at {}, writing defaults", path.display());
                let defaults = GlobalSettings::default();
                persist(&path, &defaults)?;
                defaults
            }
            Err(source) => return Err(SettingsError::ReadFile { path, source }),
        };
        Ok(SettingsStore {
            path,
            state: RwLock::new(settings),
            writer: Mutex::new(()),
        })
    }

    /// An immutable snapshot of the current document. Never blocks on I/O.
    pub fn get(&self) -> GlobalSettings {
        self.state.read().clone()
    }

    /// Merges `patch` into the document, persists the result, and commits it.
    ///
    /// Returns the list of fields the patch touched, in broadcast form. On
    /// [`SettingsError::Persistence`] the in-memory document keeps its
    /// pre-patch values, so the store and the disk never diverge.
    pub fn apply_patch(&self, patch: &SettingsPatch) -> Result<Vec<AppliedField>, SettingsError> {
        let _writer = self.writer.lock();
        patch.validate()?;

        let mut next = self.state.read().clone();
        let mut applied = Vec::new();

        if let Some(v) = patch.master_volume {
            next.master_volume = v;
            applied.push(AppliedField {
                sound_id: None,
                setting: SettingKind::MasterVolume,
                value: json!(v),
            });
        }
        if let Some(c) = patch.columns {
            next.columns = c;
            applied.push(AppliedField {
                sound_id: None,
                setting: SettingKind::Columns,
                value: json!(c),
            });
        }
        for (id, sound) in &patch.sounds {
            let entry = next.sounds.entry(id.clone()).or_default();
            if let Some(v) = sound.volume {
                entry.volume = v;
                applied.push(AppliedField {
                    sound_id: Some(id.clone()),
                    setting: SettingKind::Volume,
                    value: json!(v),
                });
            }
            if let Some(color) = &sound.color {
                entry.color = color.clone();
                applied.push(AppliedField {
                    sound_id: Some(id.clone()),
                    setting: SettingKind::Color,
                    value: json!(color),
                });
            }
        }

        if applied.is_empty() {
            return Ok(applied);
        }

        persist(&self.path, &next)?;
        *self.state.write() = next;
        Ok(applied)
    }
}

/// Writes the document atomically: serialize to a sibling temp file, then
/// rename over the target.
fn persist(path: &Path, settings: &GlobalSettings) -> Result<(), SettingsError> {
    let persistence = |source: std::io::Error| SettingsError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(persistence)?;
        }
    }

    let text = serde_json::to_string_pretty(settings).map_err(|e| SettingsError::Persistence {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(persistence)?;
    fs::rename(&tmp, path).map_err(persistence)
}
