//! Room Hub (§4.5, C5): room membership, fan-out, moderation, admission.

pub mod connection;
pub mod hub;
pub mod room;

pub use connection::{Connection, EventSink, MpscEventSink};
pub use hub::{AdmissionOutcome, AdmissionRequest, AgentDispatcher, RoomHub};
pub use room::Room;

#[cfg(test)]
mod tests {
    use super::*;
    use relayhub_blob::fs::FsBlobStore;
    use relayhub_core::{Role, RoomId, UserId};
    use relayhub_protocol::message::MessageType;
    use relayhub_protocol::ServerEvent;
    use relayhub_store::sqlite::SqliteStore;
    use std::sync::{Arc, Mutex};

    struct CapturingSink(Mutex<Vec<ServerEvent>>);

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn events(&self) -> Vec<ServerEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl EventSink for Arc<CapturingSink> {
        fn send(&self, event: ServerEvent) -> bool {
            self.0.lock().unwrap().push(event);
            true
        }
    }

    fn hub() -> RoomHub {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let blob = Arc::new(FsBlobStore::new(
            std::env::temp_dir().join(format!("relayhub-room-test-{}", uuid::Uuid::new_v4())),
            "http://localhost:18080/blobs",
            "test-secret",
        ));
        RoomHub::new(store, blob, true)
    }

    async fn admit_member(hub: &RoomHub, room_id: &RoomId, name: &str) -> (UserId, Arc<CapturingSink>) {
        let sink = CapturingSink::new();
        let outcome = hub
            .admit(AdmissionRequest {
                conn_id: uuid::Uuid::new_v4().to_string(),
                room_id: room_id.clone(),
                user_id: Some(UserId::new()),
                user_name: name.to_string(),
                role: Role::Member,
                device_id: None,
                role_password: None,
                expected_role_password: None,
                pwd_question: None,
                pwd_answer: None,
                sink: Box::new(sink.clone()),
            })
            .await;
        match outcome {
            AdmissionOutcome::Established { user_id, .. } => (user_id, sink),
            _ => panic!("expected establishment"),
        }
    }

    #[tokio::test]
    async fn open_room_admits_without_password() {
        let hub = hub();
        let room_id = RoomId::from("room-1");
        let (_user, sink) = admit_member(&hub, &room_id, "Ada").await;
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, ServerEvent::ConnectionEstablished { .. })));
    }

    #[tokio::test]
    async fn second_member_sees_join_broadcast() {
        let hub = hub();
        let room_id = RoomId::from("room-1");
        let (_first, first_sink) = admit_member(&hub, &room_id, "Ada").await;
        let (_second, _second_sink) = admit_member(&hub, &room_id, "Grace").await;
        assert!(first_sink.events().iter().any(|e| matches!(e, ServerEvent::UserJoined { .. })));
    }

    #[tokio::test]
    async fn password_gated_room_parks_until_verified() {
        let hub = hub();
        let room_id = RoomId::from("room-2");

        let owner_sink = CapturingSink::new();
        let outcome = hub
            .admit(AdmissionRequest {
                conn_id: "owner-conn".to_string(),
                room_id: room_id.clone(),
                user_id: Some(UserId::new()),
                user_name: "Owner".to_string(),
                role: Role::Admin,
                device_id: None,
                role_password: Some("letmein".to_string()),
                expected_role_password: Some("letmein".to_string()),
                pwd_question: Some("favorite color?".to_string()),
                pwd_answer: Some("blue".to_string()),
                sink: Box::new(owner_sink.clone()),
            })
            .await;
        assert!(matches!(outcome, AdmissionOutcome::Established { .. }));

        let conn_id = "member-conn".to_string();
        let member_sink = CapturingSink::new();
        let outcome = hub
            .admit(AdmissionRequest {
                conn_id: conn_id.clone(),
                room_id: room_id.clone(),
                user_id: Some(UserId::new()),
                user_name: "Member".to_string(),
                role: Role::Member,
                device_id: None,
                role_password: None,
                expected_role_password: None,
                pwd_question: None,
                pwd_answer: None,
                sink: Box::new(member_sink.clone()),
            })
            .await;
        assert!(matches!(outcome, AdmissionOutcome::PasswordPending { .. }));

        let outcome = hub.verify_pending(&room_id, &conn_id, "Blue").await;
        assert!(matches!(outcome, AdmissionOutcome::Established { .. }));
    }

    #[tokio::test]
    async fn message_send_fans_out_and_respects_permissions() {
        let hub = hub();
        let room_id = RoomId::from("room-1");
        let (sender, _sink1) = admit_member(&hub, &room_id, "Ada").await;
        let (_other, sink2) = admit_member(&hub, &room_id, "Grace").await;

        hub.send_message(&room_id, &sender, "hello".to_string(), MessageType::Text, vec![], false, None, None)
            .await
            .unwrap();

        assert!(sink2.events().iter().any(|e| matches!(e, ServerEvent::MessageNew { .. })));
    }

    #[tokio::test]
    async fn guest_role_is_never_admitted_as_speaking_member() {
        let hub = hub();
        let room_id = RoomId::from("room-1");
        let sink = CapturingSink::new();
        hub.admit(AdmissionRequest {
            conn_id: "g1".to_string(),
            room_id: room_id.clone(),
            user_id: Some(UserId::new()),
            user_name: "Guest".to_string(),
            role: Role::Guest,
            device_id: None,
            role_password: None,
            expected_role_password: None,
            pwd_question: None,
            pwd_answer: None,
            sink: Box::new(sink.clone()),
        })
        .await;

        // Find the just-admitted guest id from the room's participant snapshot.
        let room = hub.room(&room_id).unwrap();
        let snapshot = room.participants_snapshot();
        let guest_id = snapshot[0]["user_id"].as_str().unwrap().to_string();
        let guest = UserId::from(guest_id);

        let err = hub
            .send_message(&room_id, &guest, "hi".to_string(), MessageType::Text, vec![], false, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn kicking_self_is_rejected() {
        let hub = hub();
        let room_id = RoomId::from("room-1");
        let (user, _sink) = admit_member(&hub, &room_id, "Ada").await;
        let err = hub.kick(&room_id, &user, &user, None).await.unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }
}
