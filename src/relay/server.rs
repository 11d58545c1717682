//! # HTTP / WebSocket Server
//!
//! Axum front end for the relay. It provides the bulk read/write endpoints
//! plus the persistent per-participant channel:
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /catalog` | Ordered clip file names from the sounds directory |
//! | `GET /settings-info` | The current settings document |
//! | `POST /settings-info` | Partial settings update (merged, persisted, broadcast) |
//! | `GET /ws?role=<controller\|playback>` | The participant's message channel |
//!
//! The server binds to `0.0.0.0` so phones and tablets on the local network
//! can reach the board; the playback node connects over loopback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, warn};

use crate::catalog;
use crate::protocol::Message;
use crate::relay::{Relay, Role};
use crate::settings::{GlobalSettings, SettingsError, SettingsPatch};

/// Builds the relay's router. Separated from [`serve`] so tests and
/// embedders can mount it themselves.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/catalog", get(get_catalog))
        .route("/settings-info", get(get_settings).post(post_settings))
        .route("/ws", get(ws_upgrade))
        .with_state(relay)
}

/// Binds on all interfaces and serves until the process exits.
pub async fn serve(relay: Arc<Relay>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(relay)).await?;
    Ok(())
}

async fn get_catalog(State(relay): State<Arc<Relay>>) -> Result<Json<Vec<String>>, StatusCode> {
    match catalog::scan(relay.sounds_dir()) {
        Ok(names) => Ok(Json(names)),
        Err(e) => {
            error!("could not list the sounds directory: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_settings(State(relay): State<Arc<Relay>>) -> Json<GlobalSettings> {
    Json(relay.settings())
}

async fn post_settings(
    State(relay): State<Arc<Relay>>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    match relay.apply_bulk_patch(&patch) {
        Ok(merged) => Json(merged).into_response(),
        Err(e @ SettingsError::InvalidPatch { .. }) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!("settings update failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
struct WsQuery {
    role: String,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(relay): State<Arc<Relay>>,
) -> Response {
    let Some(role) = Role::parse(&query.role) else {
        return (StatusCode::BAD_REQUEST, "role must be 'controller' or 'playback'")
            .into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, role, relay))
}

/// Manages one participant connection for its lifetime: registers it with
/// the relay (which queues the settings snapshot), then pumps messages both
/// ways until the socket closes.
async fn handle_socket(mut socket: WebSocket, role: Role, relay: Arc<Relay>) {
    let (id, mut outbound) = match relay.connect(role) {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!("refusing {role} connection: {e}");
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    loop {
        tokio::select! {
            // Fan-out from the hub to this participant.
            Some(msg) = outbound.recv() => {
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break; // client disconnected
                }
            }
            // Commands and events from this participant.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => relay.handle_message(id, msg),
                            // Malformed payloads are dropped; the
                            // connection stays open.
                            Err(e) => warn!("malformed message from #{id}: {e}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary
                }
            }
        }
    }

    relay.disconnect(id);
}
