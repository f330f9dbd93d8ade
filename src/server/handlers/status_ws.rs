use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use super::super::AppState;

/// GET /ws/status
pub async fn ws_status(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_status_socket(socket, state))
}

/// Snapshot first (already queued by `subscribe`), then every status change
/// until either side goes away. Anything the client sends is ignored.
async fn handle_status_socket(socket: WebSocket, state: AppState) {
    let mut subscription = state.control.subscribe();
    let subscriber = subscription.id;
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!("Status socket {} connected", subscriber);

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                let Some(event) = event else {
                    // hub dropped us (too slow) - close the socket
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize status event: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
            _ = state.shutdown.cancelled() => {
                let close_frame = CloseFrame {
                    code: axum::extract::ws::close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
                let _ = ws_tx.flush().await;
                break;
            }
        }
    }

    state.control.hub().unsubscribe(subscriber);
    tracing::debug!("Status socket {} disconnected", subscriber);
}
