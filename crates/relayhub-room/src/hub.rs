//! Room Hub (§4.5, C5): admission pipeline, message fan-out, moderation.

use crate::connection::{Connection, EventSink};
use crate::room::{PendingAdmission, Room};
use dashmap::DashMap;
use relayhub_core::{HubError, Result, Role, RoomId, UserId};
use relayhub_permissions::{Permission, PermissionChecker};
use relayhub_protocol::message::MessagePayload;
use relayhub_protocol::{ChatMessage, ServerEvent};
use relayhub_store::{FileMetadata, MessageStore, ParticipantRecord};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};
use uuid::Uuid;

/// A connection's admission request. The hub never sees a raw socket: the
/// caller (gateway) already resolved identity (or lack thereof) and supplies
/// an [`EventSink`] wired to that connection's send-queue task.
pub struct AdmissionRequest {
    pub conn_id: String,
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub user_name: String,
    pub role: Role,
    pub device_id: Option<String>,
    pub role_password: Option<String>,
    pub expected_role_password: Option<String>,
    pub pwd_question: Option<String>,
    pub pwd_answer: Option<String>,
    pub sink: Box<dyn EventSink>,
}

pub enum AdmissionOutcome {
    Established { room: Room, user_id: UserId },
    PasswordPending { question: String },
    Rejected(HubError),
}

/// Dispatches a mention-triggered agent invocation; implemented by
/// `relayhub-agent` so this crate stays decoupled from the LLM stack.
pub trait AgentDispatcher: Send + Sync {
    fn dispatch(&self, room_id: RoomId, trigger_message: ChatMessage);
}

pub struct RoomHub {
    rooms: DashMap<RoomId, Room>,
    store: Arc<dyn MessageStore>,
    blob: Arc<dyn relayhub_blob::BlobStore>,
    allow_anonymous: bool,
    agent_dispatcher: std::sync::OnceLock<Arc<dyn AgentDispatcher>>,
}

impl RoomHub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        blob: Arc<dyn relayhub_blob::BlobStore>,
        allow_anonymous: bool,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
            blob,
            allow_anonymous,
            agent_dispatcher: std::sync::OnceLock::new(),
        }
    }

    /// One-time wiring: the dispatcher depends on an `Arc<RoomHub>` (the same
    /// one it's attached to), so it can only be built after the hub is
    /// already behind its shared `Arc` — `OnceLock` lets that happen without
    /// a `&mut` borrow the rest of the app can no longer hold by then.
    pub fn set_agent_dispatcher(&self, dispatcher: Arc<dyn AgentDispatcher>) {
        let _ = self.agent_dispatcher.set(dispatcher);
    }

    pub fn room(&self, id: &RoomId) -> Option<Room> {
        self.rooms.get(id).map(|r| r.clone())
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    pub fn remove_room(&self, id: &RoomId) {
        self.rooms.remove(id);
    }

    async fn get_or_create_room(
        &self,
        id: &RoomId,
        creator: &UserId,
        pwd_question: Option<&str>,
        pwd_answer: Option<&str>,
    ) -> Room {
        if let Some(room) = self.rooms.get(id) {
            return room.clone();
        }
        let question_from_store = self
            .store
            .get_room_password_question(id.as_str())
            .await
            .ok()
            .flatten();
        if let Err(e) = self
            .store
            .ensure_room(id.as_str(), id.as_str(), creator.as_str(), pwd_question, pwd_answer)
            .await
        {
            warn!(room = %id, error = %e, "store unavailable creating room; continuing with in-memory room only");
        }
        let room = Room::new(id.clone(), id.as_str().to_string(), question_from_store, None);
        if let (Some(q), Some(a)) = (pwd_question, pwd_answer) {
            room.set_password(q.to_string(), a.to_string());
        }
        self.rooms.entry(id.clone()).or_insert(room).clone()
    }

    /// `true` if `answer` satisfies the room's password, consulting the
    /// store when the in-memory cache only knows the question (§4.5 step 3).
    async fn check_password(&self, room: &Room, answer: &str) -> bool {
        if room.password_question().is_none() {
            return true;
        }
        if room.has_cached_answer() {
            return room.verify_password(answer);
        }
        match self.store.verify_room_password(room.id().as_str(), answer).await {
            Ok(ok) => {
                if ok {
                    room.cache_answer(answer.to_string());
                }
                ok
            }
            Err(e) => {
                warn!(room = %room.id(), error = %e, "store unavailable verifying room password; allowing");
                true
            }
        }
    }

    /// Runs the full admission pipeline (§4.5 steps 1-6).
    #[instrument(skip(self, req), fields(room = %req.room_id))]
    pub async fn admit(&self, req: AdmissionRequest) -> AdmissionOutcome {
        // Step 1: authenticate.
        let user_id = match req.user_id {
            Some(id) => id,
            None if self.allow_anonymous => UserId::new(),
            None => return AdmissionOutcome::Rejected(HubError::Unauthorized("no credentials presented".into())),
        };

        // Step 2: role-password gate.
        if req.role.requires_role_password() {
            let ok = matches!(
                (&req.expected_role_password, &req.role_password),
                (Some(expected), Some(got)) if expected == got
            );
            if !ok {
                return AdmissionOutcome::Rejected(HubError::RolePasswordRequired);
            }
        }

        // Step 3/4: room-password gate + create-or-fetch.
        let creating_with_password = req.role.rank() >= Role::Admin.rank()
            && req.pwd_question.is_some()
            && req.pwd_answer.is_some();
        let room = self
            .get_or_create_room(
                &req.room_id,
                &user_id,
                req.pwd_question.as_deref(),
                req.pwd_answer.as_deref(),
            )
            .await;

        if !creating_with_password {
            if room.password_question().is_some() {
                match &req.pwd_answer {
                    None => {
                        let question = room.password_question().unwrap_or_default();
                        self.park(&req.conn_id, &room, user_id, req.user_name, req.role, req.device_id, req.sink, question.clone());
                        return AdmissionOutcome::PasswordPending { question };
                    }
                    Some(answer) => {
                        if !self.check_password(&room, answer).await {
                            let question = room.password_question().unwrap_or_default();
                            self.park(&req.conn_id, &room, user_id, req.user_name, req.role, req.device_id, req.sink, question.clone());
                            return AdmissionOutcome::PasswordPending { question };
                        }
                    }
                }
            }
        }

        self.finish_admission(room, user_id, req.user_name, req.role, req.device_id, req.sink)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn park(
        &self,
        conn_id: &str,
        room: &Room,
        user_id: UserId,
        user_name: String,
        role: Role,
        device_id: Option<String>,
        sink: Box<dyn EventSink>,
        question: String,
    ) {
        let _ = sink.send(ServerEvent::PasswordRequired { question });
        let connection = Connection::new(user_id.clone(), user_name.clone(), role, device_id.clone(), sink);
        room.park_pending(
            conn_id.to_string(),
            PendingAdmission {
                user_id,
                user_name,
                role,
                device_id,
                connection,
                deadline: Instant::now() + Duration::from_secs(relayhub_core::config::PENDING_PASSWORD_TTL_SECS),
            },
        );
    }

    /// Completes admission for a connection that just answered the room
    /// password challenge correctly.
    pub async fn verify_pending(&self, room_id: &RoomId, conn_id: &str, answer: &str) -> AdmissionOutcome {
        let Some(room) = self.room(room_id) else {
            return AdmissionOutcome::Rejected(HubError::RoomNotFound { id: room_id.to_string() });
        };
        let Some(pending) = room.take_pending(conn_id) else {
            return AdmissionOutcome::Rejected(HubError::Internal("no pending admission for connection".into()));
        };
        if !self.check_password(&room, answer).await {
            let question = room.password_question().unwrap_or_default();
            let _ = pending.connection.emit(ServerEvent::PasswordIncorrect);
            room.park_pending(
                conn_id.to_string(),
                PendingAdmission {
                    deadline: Instant::now() + Duration::from_secs(relayhub_core::config::PENDING_PASSWORD_TTL_SECS),
                    ..pending
                },
            );
            return AdmissionOutcome::PasswordPending { question };
        }
        let sink_owner = pending.connection;
        self.finish_admission(
            room,
            pending.user_id,
            pending.user_name,
            pending.role,
            pending.device_id,
            reclaim_sink(sink_owner),
        )
        .await
    }

    async fn finish_admission(
        &self,
        room: Room,
        user_id: UserId,
        user_name: String,
        role: Role,
        device_id: Option<String>,
        sink: Box<dyn EventSink>,
    ) -> AdmissionOutcome {
        // Step 4 (supersede): drop any prior live connection for this user.
        let connection = Connection::new(user_id.clone(), user_name.clone(), role, device_id, sink);
        if let Some(prior) = room.insert_connection(connection) {
            prior.emit(ServerEvent::error(&HubError::Unauthorized("superseded by a new connection".into())));
        }

        // Step 5: persist participant record; store failure degrades silently.
        if let Err(e) = self
            .store
            .save_participant(&ParticipantRecord {
                id: user_id.to_string(),
                session_id: room.id().to_string(),
                name: user_name.clone(),
                role,
                status: "online".to_string(),
                joined_at: chrono::Utc::now().to_rfc3339(),
                last_seen: chrono::Utc::now().to_rfc3339(),
            })
            .await
        {
            warn!(room = %room.id(), user = %user_id, error = %e, "store unavailable saving participant");
        }

        // Step 6: establish + broadcast join.
        room.send_to(
            &user_id,
            ServerEvent::ConnectionEstablished {
                participants: room.participants_snapshot(),
            },
        );
        room.broadcast(
            ServerEvent::UserJoined {
                user_id: user_id.to_string(),
                user_name,
            },
            Some(&user_id),
        );

        AdmissionOutcome::Established { room, user_id }
    }

    /// Message fan-out (§4.5 "Message fan-out").
    #[instrument(skip(self, content, payload))]
    #[allow(clippy::too_many_arguments)]
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        content: String,
        kind: relayhub_protocol::message::MessageType,
        mentions: Vec<String>,
        mentions_ai: bool,
        reply_to: Option<String>,
        payload: Option<MessagePayload>,
    ) -> Result<ChatMessage> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let role = room
            .role_of(sender)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        if !PermissionChecker::check(role, Permission::MessageSend).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "role lacks message:send".to_string(),
            });
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender.to_string(),
            sender_name: room.user_name_of(sender).unwrap_or_default(),
            sender_role: role,
            kind,
            content,
            mentions: mentions.into_iter().collect(),
            mentions_ai,
            reply_to,
            timestamp: chrono::Utc::now().to_rfc3339(),
            edited_at: None,
            payload,
        };

        if let Err(e) = self.store.save_message(&message).await {
            warn!(room = %room_id, error = %e, "store unavailable persisting message; ring remains authoritative");
        }
        room.push_ring(message.clone());

        let failed = room.broadcast(ServerEvent::MessageNew { message: message.clone() }, None);
        for uid in failed {
            room.remove_connection(&uid);
        }

        if mentions_ai {
            if let Some(dispatcher) = self.agent_dispatcher.get() {
                dispatcher.dispatch(room_id.clone(), message.clone());
            }
        }

        Ok(message)
    }

    pub async fn edit_message(&self, room_id: &RoomId, editor: &UserId, message_id: &str, content: String) -> Result<()> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let role = room
            .role_of(editor)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        let existing = room
            .find_ring_message(message_id)
            .ok_or_else(|| HubError::Internal("message not found".into()))?;

        let perm = if existing.sender_id == editor.to_string() {
            Permission::MessageEditOwn
        } else {
            Permission::MessageEditAny
        };
        if !PermissionChecker::check(role, perm).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "cannot edit this message".to_string(),
            });
        }

        let edited_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.store.update_message_content(message_id, &content, &edited_at).await {
            warn!(room = %room_id, error = %e, "store unavailable editing message");
        }
        room.update_ring_message(message_id, |m| {
            m.content = content;
            m.edited_at = Some(edited_at);
        });
        if let Some(updated) = room.find_ring_message(message_id) {
            room.broadcast(ServerEvent::MessageUpdated { message: updated }, None);
        }
        Ok(())
    }

    pub async fn delete_message(&self, room_id: &RoomId, actor: &UserId, message_id: &str) -> Result<()> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let role = room
            .role_of(actor)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        let existing = room
            .find_ring_message(message_id)
            .ok_or_else(|| HubError::Internal("message not found".into()))?;

        let perm = if existing.sender_id == actor.to_string() {
            Permission::MessageDeleteOwn
        } else {
            Permission::MessageDeleteAny
        };
        if !PermissionChecker::check(role, perm).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "cannot delete this message".to_string(),
            });
        }

        if let Err(e) = self.store.delete_message(message_id).await {
            warn!(room = %room_id, error = %e, "store unavailable deleting message");
        }
        room.remove_ring_message(message_id);
        room.broadcast(
            ServerEvent::MessageDeleted {
                message_id: message_id.to_string(),
            },
            None,
        );
        Ok(())
    }

    /// `invite`, `kick`, `change_role` all gate on strictly-outranks (§4.2).
    pub fn invite(&self, room_id: &RoomId, actor: &UserId, invitee_id: &str, invitee_name: &str) -> Result<()> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let role = room
            .role_of(actor)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        if !PermissionChecker::check(role, Permission::UserInvite).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "role lacks user:invite".to_string(),
            });
        }
        room.broadcast(
            ServerEvent::UserInvited {
                user_id: invitee_id.to_string(),
                user_name: invitee_name.to_string(),
            },
            None,
        );
        Ok(())
    }

    pub async fn kick(&self, room_id: &RoomId, actor: &UserId, target: &UserId, reason: Option<String>) -> Result<()> {
        if actor == target {
            return Err(HubError::PermissionDenied {
                reason: "cannot kick yourself".to_string(),
            });
        }
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let actor_role = room
            .role_of(actor)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        let target_role = room
            .role_of(target)
            .ok_or_else(|| HubError::Internal("target not in room".into()))?;
        if !PermissionChecker::check(actor_role, Permission::UserKick).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "role lacks user:kick".to_string(),
            });
        }
        if !PermissionChecker::can_manage(actor_role, target_role).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "cannot kick an equal-or-higher-ranked member".to_string(),
            });
        }

        if let Some(conn) = room.remove_connection(target) {
            conn.emit(ServerEvent::UserKicked {
                user_id: target.to_string(),
                reason: reason.clone(),
            });
        }
        if let Err(e) = self.store.update_participant_status(room_id.as_str(), target.as_str(), "kicked").await {
            warn!(room = %room_id, error = %e, "store unavailable marking participant kicked");
        }
        room.broadcast(
            ServerEvent::UserKicked {
                user_id: target.to_string(),
                reason,
            },
            None,
        );
        Ok(())
    }

    pub async fn change_role(&self, room_id: &RoomId, actor: &UserId, target: &UserId, new_role: Role) -> Result<()> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let actor_role = room
            .role_of(actor)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        let target_role = room
            .role_of(target)
            .ok_or_else(|| HubError::Internal("target not in room".into()))?;
        if !PermissionChecker::check(actor_role, Permission::UserChangeRole).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "role lacks user:change_role".to_string(),
            });
        }
        if !PermissionChecker::can_manage(actor_role, target_role).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "cannot change the role of an equal-or-higher-ranked member".to_string(),
            });
        }
        if !PermissionChecker::can_assign_role(actor_role, new_role).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "cannot assign a role at or above your own rank".to_string(),
            });
        }

        room.set_role(target, new_role);
        if let Err(e) = self
            .store
            .save_participant(&ParticipantRecord {
                id: target.to_string(),
                session_id: room_id.to_string(),
                name: String::new(),
                role: new_role,
                status: "online".to_string(),
                joined_at: chrono::Utc::now().to_rfc3339(),
                last_seen: chrono::Utc::now().to_rfc3339(),
            })
            .await
        {
            warn!(room = %room_id, error = %e, "store unavailable updating participant role");
        }
        room.broadcast(
            ServerEvent::UserRoleChanged {
                user_id: target.to_string(),
                new_role,
            },
            None,
        );
        Ok(())
    }

    /// History replay: store first, ring fallback (§4.5).
    pub async fn get_history(&self, room_id: &RoomId, limit: usize, before: Option<&str>) -> Vec<ChatMessage> {
        let Some(room) = self.room(room_id) else {
            return Vec::new();
        };
        match self.store.get_messages(room_id.as_str(), limit, before).await {
            Ok(mut messages) => {
                messages.reverse();
                messages
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "store unavailable loading history; serving ring");
                let mut messages = room.ring_history(limit, before);
                messages.reverse();
                messages
            }
        }
    }

    pub async fn share_file(
        &self,
        room_id: &RoomId,
        uploader: &UserId,
        file_name: String,
        file_size: u64,
        mime_type: String,
        bytes: &[u8],
    ) -> Result<FileMetadata> {
        let room = self.room(room_id).ok_or_else(|| HubError::RoomNotFound { id: room_id.to_string() })?;
        let role = room
            .role_of(uploader)
            .ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
        if !PermissionChecker::check(role, Permission::FileAny).is_allowed() {
            return Err(HubError::PermissionDenied {
                reason: "role lacks file:*".to_string(),
            });
        }

        let key = relayhub_blob::object_key(room_id.as_str(), "chat", &relayhub_blob::safe_name(&file_name));
        let url = self
            .blob
            .upload_bytes(&key, bytes, &mime_type)
            .await
            .map_err(relayhub_core::HubError::from)?;

        let metadata = FileMetadata {
            id: Uuid::new_v4().to_string(),
            session_id: room_id.to_string(),
            message_id: None,
            file_name,
            file_size,
            mime_type,
            blob_url: url.clone(),
            blob_key: key,
            uploaded_by: uploader.to_string(),
            uploaded_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.save_file_metadata(&metadata).await {
            warn!(room = %room_id, error = %e, "store unavailable saving file metadata");
        }
        room.broadcast(
            ServerEvent::FileShared {
                file_id: metadata.id.clone(),
                url,
            },
            None,
        );
        Ok(metadata)
    }

    /// Reaper hooks (§4.11 steps 1-3); steps 4-7 live in `relayhub-reaper`.
    pub fn reap_idle_rooms(&self) -> usize {
        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|e| e.value().is_empty_and_idle())
            .map(|e| e.key().clone())
            .collect();
        for id in &idle {
            self.rooms.remove(id);
        }
        idle.len()
    }

    pub fn clip_all_rings(&self, cap: usize) {
        for room in self.rooms.iter() {
            room.value().clip_ring(cap);
        }
    }

    pub fn evict_expired_pending(&self) -> usize {
        self.rooms.iter().map(|r| r.value().evict_expired_pending()).sum()
    }

    /// Heap-critical tier (§4.11 step 6): drop every pending admission across
    /// every room regardless of TTL.
    pub fn clear_all_pending(&self) -> usize {
        self.rooms.iter().map(|r| r.value().clear_all_pending()).sum()
    }
}

/// `PendingAdmission::connection` owns the sink; unwrap it back out once
/// admission actually succeeds so `finish_admission` can reuse the same
/// `Connection::new` constructor path as a first-time join.
fn reclaim_sink(connection: Connection) -> Box<dyn EventSink> {
    connection.into_sink()
}
