//! WS connection lifecycle (§4.12, §5): upgrade, admission, the single
//! per-connection task that both reads client frames and drains the
//! connection's send queue, and the heartbeat/close machinery.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use relayhub_core::config::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS, MAX_PAYLOAD_BYTES};
use relayhub_core::{HubError, Role, RoomId, UserId};
use relayhub_protocol::{ClientMessage, ServerEvent};
use relayhub_room::{AdmissionOutcome, AdmissionRequest, MpscEventSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth;
use crate::ws::dispatch;
use crate::ws::handshake::ConnParams;
use crate::ws::send::{self, WsSink};

/// How admission left this connection: fully joined, or still waiting on a
/// room-password answer (§4.5 steps 3-4).
enum Session {
    Established { room_id: RoomId, user_id: UserId },
    Pending { room_id: RoomId, conn_id: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params, state))
}

async fn handle_connection(socket: WebSocket, params: ConnParams, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let room_id = RoomId::from(params.session.clone());

    let user_id = match auth::resolve_token(params.token.as_deref(), state.config.auth.jwt_secret.as_deref()) {
        Ok(id) => id,
        Err(reason) => {
            warn!(conn_id, %reason, "token rejected");
            close_with_error(socket, &HubError::Unauthorized(reason)).await;
            return;
        }
    };
    if user_id.is_none() && !state.config.auth.allow_anonymous {
        close_with_error(socket, &HubError::Unauthorized("anonymous connections are disabled".into())).await;
        return;
    }

    let role = params.resolved_role();
    let expected_role_password = match role {
        Role::Owner => state.config.auth.owner_role_password.clone(),
        Role::Admin => state.config.auth.admin_role_password.clone(),
        _ => None,
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let req = AdmissionRequest {
        conn_id: conn_id.clone(),
        room_id: room_id.clone(),
        user_id,
        user_name: params.name.clone(),
        role,
        device_id: params.device_id.clone(),
        role_password: params.role_password.clone(),
        expected_role_password,
        pwd_question: params.pwd_question.clone(),
        pwd_answer: params.pwd_answer.clone(),
        sink: Box::new(MpscEventSink(events_tx)),
    };

    let mut session = match state.room_hub.admit(req).await {
        AdmissionOutcome::Rejected(err) => {
            let _ = send::json(&mut ws_tx, &ServerEvent::error(&err)).await;
            let _ = ws_tx.send(send::close_frame(1008, err.code())).await;
            return;
        }
        AdmissionOutcome::Established { user_id, .. } => Session::Established { room_id: room_id.clone(), user_id },
        AdmissionOutcome::PasswordPending { .. } => Session::Pending { room_id: room_id.clone(), conn_id: conn_id.clone() },
    };

    info!(conn_id, room = %room_id, "ws connection admitted");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_pong = tokio::time::Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large, closing connection");
                            break;
                        }
                        if !handle_text(&text, &mut session, &state, &mut ws_tx).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if send::json(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if last_pong.elapsed() > Duration::from_secs(HEARTBEAT_TIMEOUT_SECS) {
                    warn!(conn_id, "heartbeat timeout, closing connection");
                    let _ = ws_tx.send(send::close_frame(1008, "Heartbeat timeout")).await;
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    drain_send_queue(&mut ws_tx, &mut events_rx).await;
    leave_room(&session, &state);
    info!(conn_id, "ws connection closed");
}

/// Dispatches one inbound text frame. Returns `false` to close the socket.
async fn handle_text(text: &str, session: &mut Session, state: &Arc<AppState>, ws_tx: &mut WsSink) -> bool {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = send::json(ws_tx, &ServerEvent::error(&HubError::ProtocolDecode(e.to_string()))).await;
            return true;
        }
    };

    match session {
        Session::Pending { room_id, conn_id } => match msg {
            ClientMessage::VerifyPassword { answer } => match state.room_hub.verify_pending(room_id, conn_id, &answer).await {
                AdmissionOutcome::Established { user_id, .. } => {
                    *session = Session::Established { room_id: room_id.clone(), user_id };
                    true
                }
                // `PasswordIncorrect`/`PasswordRequired` already went out via
                // the connection's own sink from inside `verify_pending`.
                AdmissionOutcome::PasswordPending { .. } => true,
                AdmissionOutcome::Rejected(err) => {
                    let _ = send::json(ws_tx, &ServerEvent::error(&err)).await;
                    false
                }
            },
            _ => true,
        },
        Session::Established { room_id, user_id } => {
            dispatch::handle(msg, room_id, user_id, state).await;
            true
        }
    }
}

async fn drain_send_queue(ws_tx: &mut WsSink, events_rx: &mut mpsc::UnboundedReceiver<ServerEvent>) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events_rx.recv()).await {
        if send::json(ws_tx, &event).await.is_err() {
            break;
        }
    }
}

fn leave_room(session: &Session, state: &Arc<AppState>) {
    if let Session::Established { room_id, user_id } = session {
        if let Some(room) = state.room_hub.room(room_id) {
            room.remove_connection(user_id);
            room.broadcast(ServerEvent::UserLeft { user_id: user_id.to_string() }, None);
        }
    }
}

async fn close_with_error(mut socket: WebSocket, err: &HubError) {
    let text = serde_json::to_string(&ServerEvent::error(err)).unwrap_or_default();
    if socket.send(Message::Text(text.into())).await.is_err() {
        return;
    }
    let _ = socket.send(send::close_frame(1008, err.code())).await;
}
