//! Cuecast server binary: the relay every participant connects to.
//!
//! Hosts the settings store, the clip catalog, and the WebSocket hub, and
//! prints the two onboarding URLs: loopback for the playback node on this
//! machine, the LAN address for controllers on other devices.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cuecast::net;
use cuecast::relay::{server, Relay};
use cuecast::settings::SettingsStore;

/// Relay server for the cuecast sound board.
#[derive(Parser)]
#[command(name = "cuecast", version, about)]
struct Args {
    /// Port for the HTTP and WebSocket listener.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Directory the audio clips live in.
    #[arg(long, default_value = "sounds")]
    sounds_dir: PathBuf,

    /// Path of the durable settings document.
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = SettingsStore::load(&args.settings)?;
    let relay = Arc::new(Relay::new(store, &args.sounds_dir));

    print_banner(args.port);
    server::serve(relay, args.port).await
}

fn print_banner(port: u16) {
    let lan = net::lan_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    println!("----------------------------------------");
    println!("  cuecast relay is up");
    println!();
    println!("  playback node URL (this machine):");
    println!("  http://localhost:{port}");
    println!();
    println!("  controller URL (other devices):");
    println!("  http://{lan}:{port}");
    println!("----------------------------------------");
}
