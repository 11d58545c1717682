//! Playback node binary: renders the board's audio on the relay's machine.
//!
//! Joins the relay in the playback role. Clip ids arriving over the wire
//! reverse back to file names, so clips load straight from the local sounds
//! directory the relay also serves its catalog from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cuecast::audio_backend::KiraBackend;
use cuecast::client;

/// Audio-rendering participant for the cuecast sound board.
#[derive(Parser)]
#[command(name = "cuecast-playback", version, about)]
struct Args {
    /// Relay to join, as host:port.
    #[arg(long, default_value = "localhost:3000")]
    server: String,

    /// Directory the audio clips live in (the catalog the relay serves).
    #[arg(long, default_value = "sounds")]
    sounds_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let backend = KiraBackend::new().context("could not open the audio device")?;
    client::run_playback_node(backend, &args.server, args.sounds_dir).await;
    Ok(())
}
