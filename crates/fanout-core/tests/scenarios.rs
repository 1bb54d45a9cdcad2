//! End-to-end relay scenarios over an in-memory transport.

use bytes::Bytes;
use fanout_core::{
    Admission, ByIdentity, ByValue, ConnectionId, DeliveryError, FrameRouter, Identified, Outbound,
    Registry, Session, StaticAuthorizer, VIDEOROOM_NAMESPACE,
};
use fanout_protocol::control::{self, ControlCommand, ControlReply, Slot};
use fanout_protocol::envelope::{self, EnvelopeError, MalformedFrame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// In-memory transport: every member has an inbox.
#[derive(Default)]
struct Inboxes {
    received: Mutex<HashMap<String, Vec<Bytes>>>,
}

impl Inboxes {
    fn of(&self, name: &str) -> Vec<Bytes> {
        self.received
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn total(&self) -> usize {
        self.received.lock().unwrap().values().map(Vec::len).sum()
    }

    fn push(&self, name: String, payload: Bytes) {
        self.received
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .push(payload);
    }
}

impl Outbound<SocketAddr> for Inboxes {
    fn send(&self, member: &SocketAddr, _room_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        self.push(member.to_string(), payload);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Peer {
    id: ConnectionId,
    name: &'static str,
}

impl Peer {
    fn new(name: &'static str) -> Self {
        Self {
            id: ConnectionId::next(),
            name,
        }
    }
}

impl Identified for Peer {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Outbound<Peer> for Inboxes {
    fn send(&self, member: &Peer, _room_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        self.push(member.name.to_string(), payload);
        Ok(())
    }
}

fn endpoint(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn udp_router() -> (Arc<Inboxes>, FrameRouter<SocketAddr, ByValue, Arc<Inboxes>>) {
    let inboxes = Arc::new(Inboxes::default());
    let router = FrameRouter::new(Arc::new(Registry::new()), inboxes.clone(), VIDEOROOM_NAMESPACE);
    (inboxes, router)
}

#[test]
fn join_and_relay() {
    let (inboxes, router) = udp_router();
    let (a, b) = (endpoint(1000), endpoint(2000));
    router.registry().join("videoroom:r1", a);
    router.registry().join("videoroom:r1", b);

    let frame = envelope::encode(b"hello", "r1").unwrap();
    router.route_frame(&a, frame).unwrap();

    assert_eq!(inboxes.of(&b.to_string()), vec![Bytes::from_static(b"hello")]);
    assert!(inboxes.of(&a.to_string()).is_empty());
}

#[test]
fn no_self_delivery_for_any_sender() {
    let (inboxes, router) = udp_router();
    let members = [endpoint(1), endpoint(2), endpoint(3)];
    for m in members {
        router.registry().join("videoroom:room", m);
    }

    for sender in members {
        let frame = envelope::encode(sender.to_string().as_bytes(), "room").unwrap();
        let report = router.route_frame(&sender, frame).unwrap();
        assert_eq!(report.delivered, 2);
    }

    // Each member received the other two senders' frames, never its own.
    for m in members {
        let got = inboxes.of(&m.to_string());
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|p| p != m.to_string().as_bytes()));
    }
}

#[test]
fn malformed_frame_is_dropped() {
    let (inboxes, router) = udp_router();
    router.registry().join("videoroom:r1", endpoint(1));
    router.registry().join("videoroom:r1", endpoint(2));

    let result = router.route_frame(&endpoint(1), Bytes::from_static(&[5]));
    assert_eq!(
        result,
        Err(EnvelopeError::Malformed(MalformedFrame::LengthOutOfRange {
            claimed: 5,
            available: 0
        }))
    );
    assert_eq!(inboxes.total(), 0);
}

#[test]
fn idempotent_join_delivers_once() {
    let (inboxes, router) = udp_router();
    router.registry().join("videoroom:r", endpoint(1));
    router.registry().join("videoroom:r", endpoint(2));
    router.registry().join("videoroom:r", endpoint(2));
    assert_eq!(router.registry().member_count("videoroom:r"), 2);

    router.route(&endpoint(1), "r", Bytes::from_static(b"x"));
    assert_eq!(inboxes.of(&endpoint(2).to_string()).len(), 1);
}

#[test]
fn room_garbage_collection() {
    let (_, router) = udp_router();
    let registry = router.registry();

    registry.join("videoroom:fresh", endpoint(1));
    registry.leave("videoroom:fresh", &endpoint(1));

    assert!(registry.members_of("videoroom:fresh").is_empty());
    assert!(!registry.rooms().contains(&"videoroom:fresh".to_string()));
}

#[test]
fn roundtrip_payload_and_room_sizes() {
    let longest = "z".repeat(255);
    let room_ids = ["", "r", "é", longest.as_str(), "videoroom-with-a-longer-name"];
    for room_id in room_ids {
        for len in 0..=250usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let decoded = envelope::decode(envelope::encode(&payload, room_id).unwrap()).unwrap();
            assert_eq!(decoded.room_id, room_id);
            assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }
}

#[tokio::test]
async fn denied_join_over_control_message() {
    let authorizer = StaticAuthorizer::new()
        .with_slot("abc", Slot::Number(1), "u1")
        .with_token("token-of-u2", "u2");
    let admission = Arc::new(Admission::new(Arc::new(authorizer), VIDEOROOM_NAMESPACE));
    let registry: Arc<Registry<Peer, ByIdentity>> = Arc::new(Registry::new());
    let mut session = Session::new(admission, registry.clone(), Peer::new("a"));

    let command =
        control::parse(r#"{"videoroomId":"abc","slot":1,"idToken":"token-of-u2"}"#).unwrap();
    let ControlCommand::Join(request) = command else {
        panic!("expected join");
    };

    let reply = session.join(&request).await;
    assert_eq!(reply.to_json().unwrap(), r#"{"status":"error"}"#);
    assert_eq!(reply, ControlReply::Error);
    assert!(registry.members_of("videoroom:abc").is_empty());
}

#[tokio::test]
async fn connection_relay_with_teardown() {
    let authorizer = StaticAuthorizer::new()
        .with_slot("abc", Slot::Number(0), "u1")
        .with_slot("abc", Slot::Number(1), "u2")
        .with_token("t1", "u1")
        .with_token("t2", "u2");
    let admission = Arc::new(Admission::new(Arc::new(authorizer), VIDEOROOM_NAMESPACE));
    let registry: Arc<Registry<Peer, ByIdentity>> = Arc::new(Registry::new());
    let inboxes = Arc::new(Inboxes::default());
    let router = FrameRouter::new(registry.clone(), inboxes.clone(), VIDEOROOM_NAMESPACE);

    let (a, b) = (Peer::new("a"), Peer::new("b"));
    let mut session_a = Session::new(admission.clone(), registry.clone(), a.clone());
    let mut session_b = Session::new(admission, registry.clone(), b.clone());

    for (session, slot, token) in [(&mut session_a, 0, "t1"), (&mut session_b, 1, "t2")] {
        let ControlCommand::Join(request) = control::parse(&format!(
            r#"{{"videoroomId":"abc","slot":{},"idToken":"{}"}}"#,
            slot, token
        ))
        .unwrap() else {
            panic!("expected join");
        };
        assert!(session.join(&request).await.is_ok());
    }

    router
        .route_frame(&a, envelope::encode(b"frame-1", "abc").unwrap())
        .unwrap();
    assert_eq!(inboxes.of("b"), vec![Bytes::from_static(b"frame-1")]);

    // b disconnects: its session is dropped and a's frames reach nobody.
    drop(session_b);
    let report = router
        .route_frame(&a, envelope::encode(b"frame-2", "abc").unwrap())
        .unwrap();
    assert_eq!(report.recipients, 0);
    assert_eq!(inboxes.of("b").len(), 1);

    drop(session_a);
    assert!(registry.rooms().is_empty());
}
