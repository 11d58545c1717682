//! # Audio Output Seam
//!
//! The playback engine drives audio through a narrow trait boundary: decode a
//! file into a clip buffer, start a voice from a clip at a gain, retune or
//! stop a running voice. The production implementation is [`KiraBackend`];
//! the engine's tests substitute a scripted backend so the state machine can
//! be exercised without an audio device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub mod decoder;
pub mod kira;

pub use self::kira::KiraBackend;

/// A fetch or decode failure for a single clip.
///
/// Always localized: one clip failing to load never affects another clip's
/// state machine.
#[derive(Debug, Error)]
pub enum ClipLoadError {
    /// The clip file could not be opened.
    #[error("failed to open clip '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container or codec could not be decoded.
    #[error("failed to decode clip '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },

    /// The file carried no decodable audio track.
    #[error("no decodable audio track in '{path}'")]
    NoTrack { path: PathBuf },
}

/// A failure to start a voice on the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output error: {0}")]
    Output(String),
}

/// Control over one running voice.
pub trait VoiceControl: Send + 'static {
    /// Retunes the voice's output gain without restarting it.
    fn set_gain(&mut self, gain: f32);

    /// Silences the voice synchronously. After this returns the voice is
    /// guaranteed inaudible.
    fn stop(&mut self);
}

/// An audio output capable of decoding clips and playing voices.
pub trait AudioBackend: Send + 'static {
    /// A decoded, ready-to-play clip buffer. Cloning must be cheap (shared
    /// sample storage) because every voice start clones the clip.
    type Clip: Clone + Send + Sync + 'static;

    /// Handle controlling one running voice.
    type Voice: VoiceControl;

    /// Decodes the file at `path`. Runs on a blocking thread; may take
    /// arbitrarily long without stalling the engine.
    fn load(path: &Path) -> Result<Self::Clip, ClipLoadError>;

    /// The clip's play time at normal rate.
    fn duration(clip: &Self::Clip) -> Duration;

    /// Starts a new voice for `clip` at an absolute output gain.
    fn start(&mut self, clip: &Self::Clip, gain: f32) -> Result<Self::Voice, PlaybackError>;
}
