//! WebSocket transport for STOMP channels.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::unix_now;
use crate::channel::{ChannelConnection, Flow, Frame, OUTBOUND_CAPACITY};

/// Subprotocol offered by STOMP-over-WebSocket clients.
pub const STOMP_SUBPROTOCOL: &str = "v12.stomp";

/// WebSocket upgrade handler.
pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols([STOMP_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one channel until either side closes it.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);

    // Sender task: forward frames to the WebSocket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender
                .send(WsMessage::Text(frame.to_wire().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut conn = ChannelConnection::new(state.channels.clone(), tx);
    let channel_id = conn.session().id().clone();
    info!(channel_id = %channel_id, "Channel transport opened");

    // Receiver loop: frames are handled one at a time, in order.
    while let Some(Ok(ws_msg)) = receiver.next().await {
        let text = match ws_msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        // Heart-beats are bare EOLs
        if text.trim_matches(['\r', '\n']).is_empty() {
            continue;
        }

        let frame = match Frame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel_id = %channel_id, "Malformed frame: {}", e);
                conn.emit_error("Malformed frame", None);
                break;
            }
        };
        debug!(channel_id = %channel_id, command = %frame.command(), "Frame received");

        if conn.handle_frame(frame, unix_now()).await == Flow::Close {
            break;
        }
    }

    info!(
        channel_id = %channel_id,
        user_id = ?conn.session().user_id(),
        "Channel closed"
    );

    // Clean up; dropping the connection ends its subscriptions.
    drop(conn);
    let _ = send_task.await;
}
