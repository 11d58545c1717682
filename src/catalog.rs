//! # Clip Catalog
//!
//! Enumerates the audio clips available to the board and defines the stable
//! identity each clip carries on the wire.
//!
//! A clip id is derived purely from its file name: `"sound-"` followed by the
//! percent-encoded name. The derivation is deterministic (the same name always
//! yields the same id), injective (distinct names yield distinct ids, since
//! the encoding is reversible), and invertible, which is how the playback
//! node maps an id arriving over the wire back to a file on disk.

use std::fmt;
use std::io;
use std::path::Path;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// File extensions the catalog recognizes as playable clips.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a"];

/// Prefix of every clip id.
const ID_PREFIX: &str = "sound-";

/// The characters escaped by JavaScript's `encodeURIComponent`: everything
/// except alphanumerics and `- _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Stable identity of one clip, valid for the lifetime of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self {
        ClipId(s.to_string())
    }
}

/// Derives the clip id for a file name.
pub fn clip_id(file_name: &str) -> ClipId {
    ClipId(format!(
        "{ID_PREFIX}{}",
        utf8_percent_encode(file_name, URI_COMPONENT)
    ))
}

/// Recovers the file name a clip id was derived from.
///
/// Returns `None` if the id does not carry the expected prefix or does not
/// decode to valid UTF-8; such an id never came out of [`clip_id`].
pub fn file_name(id: &ClipId) -> Option<String> {
    let encoded = id.0.strip_prefix(ID_PREFIX)?;
    let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
    Some(decoded.into_owned())
}

/// The name a control surface shows on a clip's button: the file name with
/// its extension stripped.
pub fn display_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(i) if i > 0 => &file_name[..i],
        _ => file_name,
    }
}

/// Lists the playable clip file names in `dir`, sorted by name.
///
/// A missing directory is created and yields an empty catalog, so a fresh
/// install starts with a working (if silent) board.
pub fn scan(dir: &Path) -> io::Result<Vec<String>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue, // non-UTF-8 names cannot travel over the wire
        };
        let recognized = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                AUDIO_EXTENSIONS.iter().any(|known| *known == ext)
            })
            .unwrap_or(false);
        if recognized {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
