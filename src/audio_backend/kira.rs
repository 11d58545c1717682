//! Kira-backed audio output used by the playback binary.

use std::path::Path;
use std::time::Duration;

use kira::sound::static_sound::{StaticSoundData, StaticSoundHandle, StaticSoundSettings};
use kira::{AudioManager, AudioManagerSettings, Decibels, DefaultBackend, Tween};

use super::{decoder, AudioBackend, ClipLoadError, PlaybackError, VoiceControl};

/// Audio output backed by a kira [`AudioManager`] on the default device.
pub struct KiraBackend {
    manager: AudioManager,
}

impl KiraBackend {
    /// Opens the default audio device.
    pub fn new() -> Result<Self, PlaybackError> {
        let manager = AudioManager::<DefaultBackend>::new(AudioManagerSettings::default())
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        Ok(KiraBackend { manager })
    }
}

impl AudioBackend for KiraBackend {
    type Clip = StaticSoundData;
    type Voice = KiraVoice;

    fn load(path: &Path) -> Result<Self::Clip, ClipLoadError> {
        decoder::decode_clip(path)
    }

    fn duration(clip: &Self::Clip) -> Duration {
        clip.duration()
    }

    fn start(&mut self, clip: &Self::Clip, gain: f32) -> Result<Self::Voice, PlaybackError> {
        let sound = clip
            .clone()
            .with_settings(StaticSoundSettings::new().volume(amplitude_to_decibels(gain)));
        let handle = self
            .manager
            .play(sound)
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        Ok(KiraVoice { handle })
    }
}

/// One running kira voice.
pub struct KiraVoice {
    handle: StaticSoundHandle,
}

impl VoiceControl for KiraVoice {
    fn set_gain(&mut self, gain: f32) {
        // A few milliseconds of smoothing avoids zipper noise on slider drags.
        self.handle.set_volume(
            amplitude_to_decibels(gain),
            Tween {
                duration: Duration::from_millis(15),
                ..Default::default()
            },
        );
    }

    fn stop(&mut self) {
        // Pre-emption requires the old voice silent before the new one
        // starts, so the stop is not smoothed.
        self.handle.stop(Tween {
            duration: Duration::ZERO,
            ..Default::default()
        });
    }
}

/// Converts a linear 0.0–1.0 gain into kira's decibel volume.
fn amplitude_to_decibels(gain: f32) -> Decibels {
    if gain <= 1.0e-4 {
        Decibels::SILENCE
    } else {
        Decibels(20.0 * gain.log10())
    }
}
