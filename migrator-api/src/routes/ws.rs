//! Websocket event subscription
//!
//! A client connects to `/api/v1/tokens/:mint/events` and receives every
//! migration event for that mint as a JSON text frame until it disconnects.
//! Events published while the client is not connected are not replayed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use migrator_core::{Mint, Subscription};
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn subscribe_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(mint): Path<String>,
) -> Response {
    let mint = Mint::new(mint);
    // register before the upgrade completes so no event slips between
    let subscription = state.fanout.subscribe(&mint).await;
    ws.on_upgrade(move |socket| stream_events(socket, subscription))
}

async fn stream_events(mut socket: WebSocket, mut subscription: Subscription) {
    debug!(mint = %subscription.mint(), "event subscriber connected");
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive failed");
                    break;
                }
            },
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode migration event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(mint = %subscription.mint(), "event subscriber disconnected");
}
