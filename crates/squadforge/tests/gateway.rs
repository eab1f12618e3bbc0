//! Integration tests for the gateway: frames in, frames out.

use std::sync::Arc;
use std::time::Duration;

use squadforge::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

fn mid(id: u64) -> MemberId {
    MemberId(id)
}

fn gateway() -> (Gateway<InMemoryMatchHost>, Arc<InMemoryMatchHost>) {
    let host = Arc::new(InMemoryMatchHost::new());
    (GatewayBuilder::new().build(Arc::clone(&host)), host)
}

fn intent_frame(seq: u64, intent: ClientIntent) -> Vec<u8> {
    let envelope = Envelope {
        seq,
        timestamp: 0,
        delivery: Delivery::ReliableOrdered,
        channel: None,
        payload: Payload::Intent(intent),
    };
    serde_json::to_vec(&envelope).unwrap()
}

fn decode(frame: &[u8]) -> Envelope {
    serde_json::from_slice(frame).unwrap()
}

fn message(envelope: Envelope) -> ServerMessage {
    match envelope.payload {
        Payload::Message(msg) => msg,
        other => panic!("expected a server message, got {other:?}"),
    }
}

fn drain(link: &mut ClientLink) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Some(frame) = link.try_recv() {
        out.push(decode(&frame));
    }
    out
}

/// Lets the link pumps encode whatever the squads already sent.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Sends a frame and waits until the squad has applied it.
async fn send(gw: &Gateway<InMemoryMatchHost>, squad: SquadId, member: u64, intent: ClientIntent) -> SquadView {
    gw.handle_frame(mid(member), &intent_frame(1, intent)).await.unwrap();
    gw.snapshot(squad).await.unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_connect_sends_joined_then_state() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;

    let mut link = gw.connect(squad, mid(1), Some("Ann".into())).await.unwrap();
    gw.snapshot(squad).await.unwrap();
    settle().await;

    let frames = drain(&mut link);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].seq, 1);
    assert_eq!(frames[1].seq, 2);
    assert_eq!(frames[0].channel.as_deref(), Some("state"));
    match message(frames[0].clone()) {
        ServerMessage::Joined { member_id, reconnect_token } => {
            assert_eq!(member_id, mid(1));
            assert_eq!(reconnect_token, link.ticket.reconnect_token);
        }
        other => panic!("expected Joined, got {other:?}"),
    }
    match message(frames[1].clone()) {
        ServerMessage::State(view) => {
            assert_eq!(view.owner, Some(mid(1)));
            assert_eq!(view.members[0].name, "Ann");
        }
        other => panic!("expected State, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_start_flow_delivers_reservation_frames() {
    let (gw, host) = gateway();
    let squad = gw.open_squad().await;
    let mut ann = gw.connect(squad, mid(1), Some("Ann".into())).await.unwrap();
    let mut bob = gw.connect(squad, mid(2), Some("Bob".into())).await.unwrap();

    send(&gw, squad, 1, ClientIntent::Ready { ready: true }).await;
    send(&gw, squad, 2, ClientIntent::Ready { ready: true }).await;
    send(&gw, squad, 1, ClientIntent::Start).await;

    for _ in 0..100 {
        if gw.squad_info(squad).await.unwrap().phase == LobbyPhase::Launched {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    gw.snapshot(squad).await.unwrap();
    settle().await;

    for link in [&mut ann, &mut bob] {
        let frames = drain(link);
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "gap-free: {seqs:?}");

        let reservations: Vec<Envelope> = frames
            .into_iter()
            .filter(|f| matches!(f.payload, Payload::Message(ServerMessage::Reservation(_))))
            .collect();
        assert_eq!(reservations.len(), 1);
        assert_eq!(
            reservations[0].channel.as_deref(),
            Some("battle-royale-matchmaking-reservation")
        );
    }
    assert_eq!(host.reserved_seats().await, 2);
}

#[tokio::test]
async fn test_malformed_frame_returns_400_frame() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    let mut link = gw.connect(squad, mid(1), None).await.unwrap();
    gw.snapshot(squad).await.unwrap();
    settle().await;
    drain(&mut link);

    let result = gw.handle_frame(mid(1), b"{not json").await;
    settle().await;

    assert!(matches!(result, Err(SquadforgeError::Protocol(_))));
    let frames = drain(&mut link);
    assert!(matches!(
        message(frames[0].clone()),
        ServerMessage::Error { code: 400, .. }
    ));
}

#[tokio::test]
async fn test_unknown_intent_tag_is_rejected() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();

    let frame = br#"{"seq":1,"timestamp":0,"payload":{"type":"Intent","data":{"type":"Teleport"}}}"#;
    let result = gw.handle_frame(mid(1), frame).await;

    assert!(matches!(result, Err(SquadforgeError::Protocol(_))));
}

#[tokio::test]
async fn test_server_message_from_client_is_rejected() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();

    let envelope = Envelope {
        seq: 1,
        timestamp: 0,
        delivery: Delivery::ReliableOrdered,
        channel: None,
        payload: Payload::Message(ServerMessage::StartFailed { reason: "x".into() }),
    };
    let result = gw
        .handle_frame(mid(1), &serde_json::to_vec(&envelope).unwrap())
        .await;

    assert!(matches!(result, Err(ref e) if e.code() == 400));
}

#[tokio::test]
async fn test_join_frame_is_rejected() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();

    let result = gw
        .handle_frame(mid(1), &intent_frame(1, ClientIntent::Join { name: None }))
        .await;

    assert!(matches!(result, Err(SquadforgeError::Protocol(_))));
}

#[tokio::test]
async fn test_frame_from_unknown_member_returns_not_found() {
    let (gw, _host) = gateway();

    let result = gw
        .handle_frame(mid(9), &intent_frame(1, ClientIntent::Ready { ready: true }))
        .await;

    assert!(matches!(result, Err(ref e) if e.code() == 404));
}

#[tokio::test]
async fn test_move_frame_merges_position() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();
    let before = gw.snapshot(squad).await.unwrap().members[0].pos;

    let view = send(&gw, squad, 1, ClientIntent::Move { x: None, y: Some(-2.5) }).await;

    let after = view.members[0].pos;
    assert_eq!(after.x, before.x);
    assert_eq!(after.y, -2.5);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_then_reconnect_returns_fresh_link() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    let ann = gw.connect(squad, mid(1), Some("Ann".into())).await.unwrap();
    gw.connect(squad, mid(2), Some("Bob".into())).await.unwrap();
    send(&gw, squad, 1, ClientIntent::Ready { ready: true }).await;

    gw.disconnect(mid(1), false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let mut link = gw.reconnect(squad, &ann.ticket.reconnect_token).await.unwrap();
    gw.snapshot(squad).await.unwrap();
    settle().await;

    assert_eq!(link.member_id(), mid(1));
    let frames = drain(&mut link);
    assert_eq!(frames[0].seq, 1, "a new link numbers from 1");
    match message(frames.last().cloned().unwrap()) {
        ServerMessage::State(view) => {
            assert_eq!(view.member(mid(1)).map(|m| m.state), Some(MemberState::NotReady));
        }
        other => panic!("expected State, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_with_bad_token_fails() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();

    let result = gw.reconnect(squad, "0000").await;

    assert!(matches!(result, Err(ref e) if e.code() == 401));
}

#[tokio::test]
async fn test_consented_disconnect_ends_link_and_lists_squad_open() {
    let (gw, _host) = gateway();
    let squad = gw.open_squad().await;
    gw.connect(squad, mid(1), None).await.unwrap();
    let mut bob = gw.connect(squad, mid(2), None).await.unwrap();

    gw.disconnect(mid(2), true).await.unwrap();

    // Both the gateway and the squad dropped Bob's sender.
    while bob.recv().await.is_some() {}
    let open = gw.list_open().await;
    assert!(open.iter().any(|i| i.squad_id == squad && i.member_count == 1));
}
