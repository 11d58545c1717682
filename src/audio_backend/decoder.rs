//! Symphonia-based clip decoding.
//!
//! Decodes a whole clip file into kira frames up front. Cue clips are short
//! (seconds, not minutes), so buffering the decoded audio keeps retriggering
//! instant at the cost of a little memory per loaded clip.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use kira::sound::static_sound::{StaticSoundData, StaticSoundSettings};
use kira::Frame;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::ClipLoadError;

/// Decodes the audio file at `path` into a ready-to-play sound.
pub fn decode_clip(path: &Path) -> Result<StaticSoundData, ClipLoadError> {
    let src = File::open(path).map_err(|source| ClipLoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let decode_err = |source: Error| ClipLoadError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let no_track = || ClipLoadError::NoTrack {
        path: path.to_path_buf(),
    };

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;

    let mut format = probed.format;
    let track = format.default_track().ok_or_else(no_track)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or_else(no_track)?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .filter(|&c| c > 0)
        .ok_or_else(no_track)?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(e) => return Err(decode_err(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Corrupt packets are skipped; the rest of the clip still plays.
            Err(Error::IoError(_)) | Err(Error::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(e)),
        }
    }

    if samples.is_empty() {
        return Err(no_track());
    }

    Ok(StaticSoundData {
        sample_rate,
        frames: Arc::from(interleave_to_frames(&samples, channels)),
        settings: StaticSoundSettings::default(),
        slice: None,
    })
}

/// Folds interleaved samples into stereo frames: mono is duplicated, stereo
/// is taken as-is, anything wider keeps its first two channels.
fn interleave_to_frames(samples: &[f32], channels: usize) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(samples.len() / channels);
    if channels == 1 {
        for &sample in samples {
            frames.push(Frame::new(sample, sample));
        }
    } else {
        for chunk in samples.chunks(channels) {
            match chunk {
                [left, right, ..] => frames.push(Frame::new(*left, *right)),
                [only] => frames.push(Frame::new(*only, *only)),
                [] => {}
            }
        }
    }
    frames
}
