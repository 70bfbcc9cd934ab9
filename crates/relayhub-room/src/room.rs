//! Single-room state: members, in-memory ring, pending password admissions.
//!
//! Mirrors the `Arc<Shared>` + `Mutex<State>` split the reference relay's
//! room type uses: cheap clones of the handle, single-writer discipline on
//! membership and ring mutation enforced by the inner mutex (§5).

use crate::connection::Connection;
use relayhub_core::{RoomId, UserId};
use relayhub_protocol::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const RING_CAP: usize = relayhub_core::config::ROOM_RING_CAP;

/// A connection parked mid-admission, waiting on `verify_password` (§4.5 step 3).
pub struct PendingAdmission {
    pub user_id: UserId,
    pub user_name: String,
    pub role: relayhub_core::Role,
    pub device_id: Option<String>,
    pub connection: Connection,
    pub deadline: Instant,
}

struct RoomState {
    connections: HashMap<UserId, Connection>,
    ring: VecDeque<ChatMessage>,
    pw_question: Option<String>,
    pw_answer: Option<String>,
    pending: HashMap<String, PendingAdmission>,
}

struct Shared {
    id: RoomId,
    name: String,
    state: Mutex<RoomState>,
}

#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
}

impl Room {
    pub fn new(id: RoomId, name: String, pw_question: Option<String>, pw_answer: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                name,
                state: Mutex::new(RoomState {
                    connections: HashMap::new(),
                    ring: VecDeque::new(),
                    pw_question,
                    pw_answer,
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn password_question(&self) -> Option<String> {
        self.shared.state.lock().unwrap().pw_question.clone()
    }

    pub fn set_password(&self, question: String, answer: String) {
        let mut state = self.shared.state.lock().unwrap();
        state.pw_question = Some(question);
        state.pw_answer = Some(answer);
    }

    /// `true` only once the in-memory cache actually knows the answer (a
    /// freshly loaded room whose password predates this process only knows
    /// the question, and must fall back to the store to verify — §4.5).
    pub fn has_cached_answer(&self) -> bool {
        self.shared.state.lock().unwrap().pw_answer.is_some()
    }

    /// Case-insensitive; `true` if no password is configured.
    pub fn verify_password(&self, answer: &str) -> bool {
        let state = self.shared.state.lock().unwrap();
        match &state.pw_answer {
            None => true,
            Some(stored) => stored.to_lowercase() == answer.to_lowercase(),
        }
    }

    pub fn cache_answer(&self, answer: String) {
        self.shared.state.lock().unwrap().pw_answer = Some(answer);
    }

    pub fn park_pending(&self, conn_id: String, admission: PendingAdmission) {
        self.shared.state.lock().unwrap().pending.insert(conn_id, admission);
    }

    pub fn take_pending(&self, conn_id: &str) -> Option<PendingAdmission> {
        self.shared.state.lock().unwrap().pending.remove(conn_id)
    }

    /// Drops pending admissions past their TTL; returns how many were evicted.
    pub fn evict_expired_pending(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        let now = Instant::now();
        let before = state.pending.len();
        state.pending.retain(|_, p| p.deadline > now);
        before - state.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().unwrap().pending.len()
    }

    /// Drops every pending admission regardless of TTL (heap-critical tier,
    /// §4.11 step 6); returns how many were evicted.
    pub fn clear_all_pending(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        let count = state.pending.len();
        state.pending.clear();
        count
    }

    /// Inserts `connection`, superseding and returning any prior live
    /// connection for the same user (§4.5 step 4).
    pub fn insert_connection(&self, connection: Connection) -> Option<Connection> {
        let mut state = self.shared.state.lock().unwrap();
        state.connections.insert(connection.user_id.clone(), connection)
    }

    pub fn remove_connection(&self, user_id: &UserId) -> Option<Connection> {
        self.shared.state.lock().unwrap().connections.remove(user_id)
    }

    pub fn has_connection(&self, user_id: &UserId) -> bool {
        self.shared.state.lock().unwrap().connections.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().unwrap().connections.len()
    }

    pub fn set_status(&self, user_id: &UserId, status: &str) {
        if let Some(conn) = self.shared.state.lock().unwrap().connections.get_mut(user_id) {
            conn.status = status.to_string();
        }
    }

    pub fn role_of(&self, user_id: &UserId) -> Option<relayhub_core::Role> {
        self.shared.state.lock().unwrap().connections.get(user_id).map(|c| c.role)
    }

    pub fn user_name_of(&self, user_id: &UserId) -> Option<String> {
        self.shared
            .state
            .lock()
            .unwrap()
            .connections
            .get(user_id)
            .map(|c| c.user_name.clone())
    }

    pub fn set_role(&self, user_id: &UserId, role: relayhub_core::Role) {
        if let Some(conn) = self.shared.state.lock().unwrap().connections.get_mut(user_id) {
            conn.role = role;
        }
    }

    /// JSON-ish participant snapshot for `connection.established`.
    pub fn participants_snapshot(&self) -> Vec<serde_json::Value> {
        let state = self.shared.state.lock().unwrap();
        state
            .connections
            .values()
            .map(|c| {
                serde_json::json!({
                    "user_id": c.user_id.as_str(),
                    "user_name": c.user_name,
                    "role": c.role,
                    "status": c.status,
                    "joined_at": c.joined_at,
                })
            })
            .collect()
    }

    /// Fans `event` out to every live connection except (optionally) `skip`.
    /// Failing sends are collected so the caller can schedule those
    /// connections for close without aborting delivery to the rest (§4.5).
    pub fn broadcast(&self, event: relayhub_protocol::ServerEvent, skip: Option<&UserId>) -> Vec<UserId> {
        let state = self.shared.state.lock().unwrap();
        let mut failed = Vec::new();
        for (uid, conn) in state.connections.iter() {
            if Some(uid) == skip {
                continue;
            }
            if !conn.emit(event.clone()) {
                failed.push(uid.clone());
            }
        }
        failed
    }

    pub fn send_to(&self, user_id: &UserId, event: relayhub_protocol::ServerEvent) -> bool {
        let state = self.shared.state.lock().unwrap();
        match state.connections.get(user_id) {
            Some(conn) => conn.emit(event),
            None => false,
        }
    }

    pub fn push_ring(&self, message: ChatMessage) {
        let mut state = self.shared.state.lock().unwrap();
        state.ring.push_back(message);
        while state.ring.len() > RING_CAP {
            state.ring.pop_front();
        }
    }

    pub fn find_ring_message(&self, message_id: &str) -> Option<ChatMessage> {
        let state = self.shared.state.lock().unwrap();
        state.ring.iter().find(|m| m.id == message_id).cloned()
    }

    pub fn update_ring_message<F: FnOnce(&mut ChatMessage)>(&self, message_id: &str, f: F) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(m) = state.ring.iter_mut().find(|m| m.id == message_id) {
            f(m);
            true
        } else {
            false
        }
    }

    pub fn remove_ring_message(&self, message_id: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.ring.retain(|m| m.id != message_id);
    }

    pub fn clip_ring(&self, cap: usize) {
        let mut state = self.shared.state.lock().unwrap();
        while state.ring.len() > cap {
            state.ring.pop_front();
        }
    }

    /// Newest-first slice of the in-memory ring, used when the store is
    /// unavailable (§4.5 "History replay").
    pub fn ring_history(&self, limit: usize, before: Option<&str>) -> Vec<ChatMessage> {
        let state = self.shared.state.lock().unwrap();
        let mut iter: Box<dyn Iterator<Item = &ChatMessage>> = Box::new(state.ring.iter().rev());
        if let Some(before_id) = before {
            if let Some(pos) = state.ring.iter().rev().position(|m| m.id == before_id) {
                iter = Box::new(state.ring.iter().rev().skip(pos + 1));
            }
        }
        iter.take(limit).cloned().collect()
    }

    pub fn is_empty_and_idle(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.connections.is_empty() && state.pending.is_empty()
    }
}
