//! # Participant Transport
//!
//! The WebSocket client side of the relay protocol, used by the playback
//! binary. The relay end of the link is plain axum ws ([`crate::relay::server`]);
//! this end declares its role in the connection URL, bridges inbound
//! messages to the playback engine, forwards engine events back out, and
//! survives link loss:
//!
//! * Reconnects with exponential backoff (1s doubling to a 30s cap), reset
//!   after every successful connect.
//! * Trusts no incremental update after a reconnect until the fresh
//!   settings snapshot for that session has arrived, since anything sent
//!   while the node was offline is gone for good.

use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio_backend::AudioBackend;
use crate::playback_engine::{EngineCommand, PlaybackEngine};
use crate::protocol::{Message, SettingKind};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runs the playback node against the relay at `server` (host:port).
///
/// The engine itself outlives any single connection: loaded clips and
/// running voices carry over a reconnect, only the link state resets.
pub async fn run_playback_node<B: AudioBackend>(backend: B, server: &str, sounds_dir: PathBuf) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let engine = PlaybackEngine::new(backend, sounds_dir, event_tx);
    tokio::spawn(engine.run(cmd_rx));

    let url = format!("ws://{server}/ws?role=playback");
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!("connected to relay at {url}");
                backoff = INITIAL_BACKOFF;
                drive_session(stream, &cmd_tx, &mut event_rx).await;
                warn!("relay connection lost");
            }
            Err(e) => warn!("could not reach relay: {e}"),
        }
        info!("retrying in {}s", backoff.as_secs());
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Pumps one connection until it drops.
async fn drive_session(
    mut stream: WsStream,
    commands: &mpsc::UnboundedSender<EngineCommand>,
    events: &mut mpsc::UnboundedReceiver<Message>,
) {
    // Incremental updates are ignored until this session's snapshot lands.
    let mut synced = false;
    loop {
        tokio::select! {
            // Engine events out to the relay.
            Some(event) = events.recv() => {
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if stream.send(WsMessage::Text(text.into())).await.is_err() {
                    return;
                }
            }
            // Relay traffic in to the engine.
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => dispatch(msg, &mut synced, commands),
                            Err(e) => warn!("malformed message from relay: {e}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {} // ping/pong/binary
                }
            }
        }
    }
}

/// Maps one relay message onto engine commands.
fn dispatch(msg: Message, synced: &mut bool, commands: &mpsc::UnboundedSender<EngineCommand>) {
    let send = |cmd: EngineCommand| {
        let _ = commands.send(cmd);
    };
    match msg {
        Message::SettingsInitialized { settings } | Message::SettingsUpdated { settings } => {
            *synced = true;
            send(EngineCommand::ApplySettings(settings));
        }
        _ if !*synced => {
            debug!("ignoring '{}' before the settings snapshot", msg.action());
        }
        Message::Play { sound_id } => send(EngineCommand::Play(sound_id)),
        Message::StopAll => send(EngineCommand::StopAll),
        Message::SettingChanged {
            sound_id,
            setting,
            value,
        } => match (sound_id, setting) {
            (None, SettingKind::MasterVolume) => {
                if let Some(v) = value.as_f64() {
                    send(EngineCommand::SetMasterVolume(v as f32));
                }
            }
            (Some(id), SettingKind::Volume) => {
                if let Some(v) = value.as_f64() {
                    send(EngineCommand::SetVolume(id, v as f32));
                }
            }
            // Columns and colors are controller-surface concerns.
            _ => {}
        },
        // Not addressed to the playback node.
        Message::SoundStarted { .. }
        | Message::SoundEnded { .. }
        | Message::UpdateSetting { .. }
        | Message::SettingsError { .. } => {}
    }
}
