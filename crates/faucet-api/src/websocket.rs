use {
    crate::rest::AppState,
    async_trait::async_trait,
    axum::{
        extract::{
            ws::{Message, WebSocket},
            State, WebSocketUpgrade,
        },
        response::IntoResponse,
    },
    faucet_common::types::WebsocketMessage,
    faucet_ledger::Connection,
    futures::{stream::SplitSink, SinkExt, StreamExt},
    std::sync::Arc,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

/// Writer half of an upgraded socket, shared by the hub and the read loop
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn write(&self, payload: &str) -> anyhow::Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(payload.to_string()))
            .await?;
        Ok(())
    }
}

pub async fn income_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn broadcast_users_online(state: &AppState, count: usize) {
    match serde_json::to_string(&WebsocketMessage::users_online(count)) {
        Ok(payload) => state.hub.broadcast(payload),
        Err(e) => warn!("Failed to encode users_online frame: {}", e),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let conn = Arc::new(WsConnection::new(sender));

    let online = state.hub.active_count().await + 1;
    let snapshot = WebsocketMessage {
        users_online: Some(online),
        latest_incomes: Some(state.cache.latest_incomes().await),
        delta_income: None,
    };
    let sent = match serde_json::to_string(&snapshot) {
        Ok(payload) => conn.write(&payload).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        debug!("Client left before the snapshot was sent: {}", e);
        return;
    }

    // tell everyone else before this client joins the hub
    broadcast_users_online(&state, online);
    let id = state.hub.subscribe(conn.clone()).await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) if text == "ping" => {
                if conn.write("pong").await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    if state.hub.unsubscribe(id).await {
        let remaining = state.hub.active_count().await;
        broadcast_users_online(&state, remaining);
    }
    debug!("WebSocket client {:?} disconnected", id);
}
