//! # Cuecast
//!
//! Cuecast turns a directory of audio files into a networked sound cue board:
//! any number of remote controllers (phones, tablets, a second screen) trigger
//! and tune named clips that play on a single playback node, typically the
//! machine running a broadcast/streaming tool. All participants converge on
//! the same settings and playback state through a relay.
//!
//! ## Architecture
//!
//! ```text
//! [Controller] --ws--> [Relay + SettingsStore] --ws--> [Playback node]
//!      ^                        |                           |
//!      +--- setting_changed ----+<---- sound_started/ended -+
//! ```
//!
//! * The **relay** ([`relay`]) accepts one persistent WebSocket connection per
//!   participant, validates its declared role, and fans messages out:
//!   settings changes echo to every connection (sender included), playback
//!   traffic is forwarded to everyone but the sender.
//! * The **settings store** ([`settings`]) is the single point of truth for
//!   master volume, layout columns, and per-clip volume/color. Every patch is
//!   persisted to disk before any client hears about it.
//! * The **playback engine** ([`playback_engine`]) owns decoded clip buffers
//!   and active voices, loading clips lazily and enforcing the retrigger and
//!   two-stage gain contracts.
//! * The **controller view model** ([`controller`]) is the headless state a
//!   control surface renders from: playing highlights, sliders, colors,
//!   column count.

pub mod audio_backend;
pub mod catalog;
pub mod client;
pub mod controller;
pub mod net;
pub mod playback_engine;
pub mod protocol;
pub mod relay;
pub mod settings;
