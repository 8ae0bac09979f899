use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::Relay;

#[debug_handler(state = crate::AppState)]
pub async fn relay_ws(State(relay): State<Relay>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve_connection(relay, stream))
}

async fn serve_connection(relay: Relay, stream: WebSocket) {
    let (conn, mut outbox) = relay.connect().await;
    let (mut sender, mut receiver) = stream.split();

    let mut outbound_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%conn, %err, "dropping unencodable event");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut outbound_task => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => relay.handle_frame(conn, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(%conn, %err, "socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    relay.disconnect(conn).await;
    outbound_task.abort();
}
