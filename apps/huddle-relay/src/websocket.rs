use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use huddle_proto::{decode_client_event, encode, ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::router::MessageRouter;
use crate::server::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let router = state.router.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, router))
}

/// Drive one signaling connection until the client goes away.
pub async fn handle_socket(socket: WebSocket, router: MessageRouter) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = router.connect(tx);

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match encode(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(connection_id = %writer_id, error = %err, "failed to encode event"),
            }
        }
        debug!(connection_id = %writer_id, "writer task finished");
    });

    info!(connection_id = %connection_id, "signaling connection opened");

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&router, &connection_id, &text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(&router, &connection_id, text),
                Err(_) => debug!(
                    connection_id = %connection_id,
                    bytes = data.len(),
                    "ignoring non-utf8 binary frame"
                ),
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving frame");
                break;
            }
        }
    }

    router.disconnect(&connection_id);
    writer.abort();
    info!(connection_id = %connection_id, "signaling connection closed");
}

/// Malformed frames are dropped without a reply.
fn handle_frame(router: &MessageRouter, connection_id: &ConnectionId, text: &str) {
    match decode_client_event(text) {
        Ok(event) => {
            debug!(connection_id = %connection_id, kind = event.kind(), "received client event");
            router.dispatch(connection_id, event);
        }
        Err(err) => {
            debug!(connection_id = %connection_id, error = %err, "ignoring malformed frame");
        }
    }
}
