//! End-to-end signaling flow over real WebSockets.
//!
//! Covers the full negotiation: room creation, offer delivery, answer and
//! candidate relay, plus the registry conflicts a third party can hit.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rendezvous_server::protocol::ServerFrame;
use rendezvous_test_utils::{TestPeer, TestRendezvousServer};
use serde_json::{json, Value};

async fn paired(server: &TestRendezvousServer) -> anyhow::Result<(TestPeer, TestPeer, String)> {
    let mut host = TestPeer::connect(&server.ws_url()).await?;
    let mut guest = TestPeer::connect(&server.ws_url()).await?;

    let room = host.server_init().await?;
    guest.client_init(&room, "offer-sdp").await?;
    assert_eq!(host.expect_event("client-init").await?, "offer-sdp");
    assert_eq!(guest.expect_event("client-init").await?, "offer-sdp");

    Ok((host, guest, room))
}

#[tokio::test]
async fn test_server_init_acknowledges_room_id() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let mut host = TestPeer::connect(&server.ws_url()).await?;

    let room = host.server_init().await?;
    assert_eq!(room.len(), 32);
    assert!(room.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(server.registry().status().await?.rooms, 1);

    Ok(())
}

#[tokio::test]
async fn test_full_negotiation() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let (mut host, mut guest, _room) = paired(&server).await?;

    host.emit("server-answer", vec![json!("answer-sdp")]).await?;
    assert_eq!(guest.expect_event("server-answer").await?, "answer-sdp");
    assert_eq!(host.expect_event("server-answer").await?, "answer-sdp");

    let ack = guest
        .emit_with_ack("ice-candidate", vec![json!("candidate:1")])
        .await?;
    assert_eq!(guest.expect_ack(ack).await?, vec![Value::Bool(true)]);
    assert_eq!(guest.expect_event("ice-candidate").await?, "candidate:1");
    assert_eq!(host.expect_event("ice-candidate").await?, "candidate:1");

    // Either side may send candidates.
    host.emit("ice-candidate", vec![json!("candidate:2")]).await?;
    assert_eq!(guest.expect_event("ice-candidate").await?, "candidate:2");

    let status = server.registry().status().await?;
    assert_eq!(status.rooms, 1);
    assert_eq!(status.members, 2);

    Ok(())
}

#[tokio::test]
async fn test_payloads_are_relayed_verbatim() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let (mut host, mut guest, _room) = paired(&server).await?;

    let sdp = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n\"quoted\" ünïcode";
    host.emit("server-answer", vec![json!(sdp)]).await?;
    assert_eq!(guest.expect_event("server-answer").await?, sdp);

    Ok(())
}

#[tokio::test]
async fn test_third_peer_is_rejected() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let (_host, _guest, room) = paired(&server).await?;

    let mut intruder = TestPeer::connect(&server.ws_url()).await?;
    intruder.client_init(&room, "offer-2").await?;
    assert_eq!(intruder.expect_event("custom-error").await?, "room is full");
    assert_eq!(server.registry().status().await?.members, 2);

    Ok(())
}

#[tokio::test]
async fn test_unknown_room_is_rejected() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let mut peer = TestPeer::connect(&server.ws_url()).await?;

    peer.client_init("0123456789abcdef0123456789abcdef", "offer")
        .await?;
    assert_eq!(peer.expect_event("custom-error").await?, "invalid roomID");

    Ok(())
}

#[tokio::test]
async fn test_relay_requires_paired_room() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let mut peer = TestPeer::connect(&server.ws_url()).await?;

    peer.emit("server-answer", vec![json!("answer")]).await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "unexpected event server-answer"
    );

    peer.server_init().await?;
    peer.emit("ice-candidate", vec![json!("candidate")]).await?;
    assert_eq!(peer.expect_event("custom-error").await?, "invalid room");

    Ok(())
}

#[tokio::test]
async fn test_invalid_arguments_keep_connection_open() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let mut peer = TestPeer::connect(&server.ws_url()).await?;

    peer.emit("client-init", vec![json!("room-only")]).await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "client-init invalid arguments"
    );

    peer.emit("client-init", vec![json!(42), json!("offer")])
        .await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "client-init invalid roomID"
    );

    peer.emit("server-answer", vec![json!({"sdp": "x"})]).await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "server-answer invalid description"
    );

    peer.emit("ice-candidate", vec![]).await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "ice-candidate invalid arguments"
    );

    peer.send_text("definitely not json").await?;
    assert_eq!(peer.expect_event("custom-error").await?, "malformed frame");

    peer.emit("renegotiate", vec![]).await?;
    assert_eq!(
        peer.expect_event("custom-error").await?,
        "unknown event renegotiate"
    );

    // Still usable afterwards.
    assert_eq!(peer.server_init().await?.len(), 32);

    Ok(())
}

#[tokio::test]
async fn test_ack_only_sent_when_requested() -> anyhow::Result<()> {
    let server = TestRendezvousServer::spawn().await?;
    let (mut host, mut guest, _room) = paired(&server).await?;

    guest.emit("ice-candidate", vec![json!("c1")]).await?;
    let frame = guest.next_frame().await?;
    assert_eq!(
        frame,
        ServerFrame::Event {
            event: "ice-candidate".to_string(),
            args: vec![json!("c1")],
        }
    );
    assert_eq!(host.expect_event("ice-candidate").await?, "c1");

    Ok(())
}
