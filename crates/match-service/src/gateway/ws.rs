//! WebSocket endpoint.
//!
//! `GET /ws?memberId=N` upgrades to a socket that speaks `{event, data}`
//! JSON frames. The socket itself holds no matchmaking state: it turns its
//! lifecycle into queue jobs (ENTER on connect, LEAVE on close) and relays
//! inbound frames. Room and sender are always resolved from the connection
//! binding the engine recorded, never from the frame.
//!
//! Inbound frames:
//!
//! - `{"event": "message", "data": {"text": "..."}}` - chat line
//! - `{"event": "choice", "data": {"targetId": 7}}` - vote for a participant

use crate::broadcast::{BroadcastSink, OutboundEvent};
use crate::errors::MatchError;
use crate::gateway::hub::HubMessage;
use crate::gateway::AppState;
use crate::queue::Job;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use common::types::{ConnectionId, MemberId};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub member_id: Option<String>,
}

impl ConnectParams {
    /// Member id if present and numeric.
    #[must_use]
    pub fn member_id(&self) -> Option<MemberId> {
        self.member_id.as_deref().and_then(|raw| raw.parse().ok())
    }
}

/// Client-to-server frames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundFrame {
    Message { text: String },
    #[serde(rename_all = "camelCase")]
    Choice { target_id: MemberId },
}

impl InboundFrame {
    /// # Errors
    ///
    /// `MalformedJob` if the frame is not a known event.
    pub fn decode(raw: &str) -> Result<Self, MatchError> {
        serde_json::from_str(raw).map_err(|e| MatchError::MalformedJob(e.to_string()))
    }
}

/// Handler for GET /ws
#[instrument(skip_all)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let member_id = params.member_id();
    ws.on_upgrade(move |socket| handle_socket(socket, state, member_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, member_id: Option<MemberId>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(member_id) = member_id else {
        info!(target: "mm.gateway", "Rejecting connection without a member id");
        send_event(
            &mut sender,
            &OutboundEvent::exception(&MatchError::MemberIdNotAvailable),
        )
        .await;
        close(&mut sender).await;
        return;
    };

    let connection_id = ConnectionId::new();
    let rx = match state.hub.register(connection_id.clone()) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(target: "mm.gateway", error = %e, "Failed to register connection");
            send_event(&mut sender, &OutboundEvent::exception(&e)).await;
            close(&mut sender).await;
            return;
        }
    };
    info!(target: "mm.gateway", member_id = %member_id, connection_id = %connection_id, "Connection opened");

    let mut writer = tokio::spawn(write_loop(sender, rx));

    if let Err(e) = state
        .queue
        .enqueue(&Job::enter(member_id, connection_id.clone()))
        .await
    {
        warn!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Failed to enqueue entry");
        report(&state, &connection_id, &e).await;
        if let Err(e) = state.hub.disconnect(&connection_id).await {
            debug!(target: "mm.gateway", error = %e, "Disconnect after failed entry");
        }
    }

    loop {
        tokio::select! {
            _ = &mut writer => break,
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, member_id, &connection_id, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Socket read failed");
                    break;
                }
            },
        }
    }

    finish(&state, member_id, &connection_id).await;
    writer.abort();
    info!(target: "mm.gateway", member_id = %member_id, connection_id = %connection_id, "Connection closed");
}

/// Apply one inbound frame. Failures go back to the connection as `exception`.
async fn handle_frame(
    state: &AppState,
    member_id: MemberId,
    connection_id: &ConnectionId,
    raw: &str,
) {
    let result = match InboundFrame::decode(raw) {
        Ok(InboundFrame::Message { text }) => {
            state.engine.handle_message(connection_id, text).await
        }
        Ok(InboundFrame::Choice { target_id }) => {
            enqueue_choice(state, member_id, connection_id, target_id).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        debug!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Inbound frame rejected");
        report(state, connection_id, &e).await;
    }
}

async fn enqueue_choice(
    state: &AppState,
    member_id: MemberId,
    connection_id: &ConnectionId,
    target_id: MemberId,
) -> Result<(), MatchError> {
    let room_id = state
        .engine
        .registry()
        .binding(connection_id)
        .await?
        .map(|binding| binding.room_id);
    state
        .queue
        .enqueue(&Job::choice(
            member_id,
            connection_id.clone(),
            target_id,
            room_id,
        ))
        .await
}

/// Drop the connection locally and queue its LEAVE.
async fn finish(state: &AppState, member_id: MemberId, connection_id: &ConnectionId) {
    if let Err(e) = state.hub.unregister(connection_id) {
        warn!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Failed to unregister connection");
    }

    let room_id = match state.engine.registry().binding(connection_id).await {
        Ok(binding) => binding.map(|b| b.room_id),
        Err(e) => {
            debug!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Binding lookup failed on close");
            None
        }
    };

    if let Err(e) = state
        .queue
        .enqueue(&Job::leave(member_id, connection_id.clone(), room_id))
        .await
    {
        warn!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Failed to enqueue leave");
    }
}

async fn report(state: &AppState, connection_id: &ConnectionId, error: &MatchError) {
    if let Err(e) = state
        .hub
        .to_connection(connection_id, OutboundEvent::exception(error))
        .await
    {
        debug!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Exception not delivered");
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<HubMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            HubMessage::Event(event) => {
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }
            HubMessage::Close => {
                close(&mut sender).await;
                break;
            }
        }
    }
}

/// Returns `false` once the socket stops accepting frames.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &OutboundEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "mm.gateway", event = event.name(), error = %e, "Failed to encode event");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn close(sender: &mut SplitSink<WebSocket, Message>) {
    if let Err(e) = sender.send(Message::Close(None)).await {
        debug!(target: "mm.gateway", error = %e, "Close frame not sent");
    }
}
