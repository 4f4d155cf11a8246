//! WebSocket adapter for the approval session.

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::ApprovalEvent;
use super::session::{ApprovalTransport, Disconnected};
use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct ApproverQuery {
    pub approver: Option<String>,
}

/// `GET /ws/campaigns/{id}/approval?approver=<name>`
pub async fn approval_ws(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(query): Query<ApproverQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let approver = query
        .approver
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    info!(campaign = %id, approver = %approver, "Approval client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, id, approver, state))
}

async fn handle_socket(socket: WebSocket, id: String, approver: String, state: AppState) {
    let mut transport = WsTransport { socket };

    let Ok(campaign_id) = Uuid::parse_str(&id) else {
        let event = ApprovalEvent::error("BAD_REQUEST", format!("Invalid campaign ID: {id}"));
        if transport.send(&event).await.is_ok() {
            transport.close().await;
        }
        return;
    };

    let outcome = state
        .approvals
        .run_session(campaign_id, &approver, &mut transport)
        .await;
    info!(campaign_id = %campaign_id, outcome = ?outcome, "Approval connection closed");
}

/// An axum socket speaking JSON text frames.
pub struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl ApprovalTransport for WsTransport {
    async fn send(&mut self, event: &ApprovalEvent) -> Result<(), Disconnected> {
        let json = serde_json::to_string(event).map_err(|e| {
            warn!(error = %e, "Failed to serialize approval event");
            Disconnected
        })?;
        self.socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| Disconnected)
    }

    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
                Some(Ok(Message::Ping(data))) => {
                    if self.socket.send(Message::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Approval client closed the socket");
                    return None;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return None;
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}
