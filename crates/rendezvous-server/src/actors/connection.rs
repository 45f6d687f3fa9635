//! `ConnectionActor` - one actor per signaling connection.
//!
//! Each `ConnectionActor`:
//! - Owns the connection's `ConnectionSession` and its negotiation deadline
//! - Processes inbound frames one at a time, in arrival order
//! - Turns registry deliveries into outbound frames for the socket writer;
//!   deliveries arrive on their own unbounded lane and are dropped if they
//!   name a room the session has since left
//! - Runs the disconnect cascade through the registry when it closes
//!
//! # Lifecycle
//!
//! 1. Spawned when the WebSocket upgrade completes; registered in the
//!    `ConnectionDirectory` before the handle is returned
//! 2. Runs until the peer disconnects, the deadline passes, the other room
//!    member leaves, or the server shuts down
//! 3. On exit, evicts itself from the registry, unregisters, and drops its
//!    outbound sender so the socket writer closes the socket

use crate::errors::{RendezvousError, SignalingError};
use crate::observability::metrics as prom;
use crate::protocol::{ClientFrame, InboundEvent, OutboundEvent, ServerFrame, EVENT_CLIENT_INIT};
use crate::transport::{ConnectionDirectory, ConnectionLink};
use crate::types::{ConnectionId, RoomId};

use super::messages::{CloseReason, ConnectionMessage, Delivery, JoinOutcome};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::PairingRegistryHandle;
use super::session::{ConnectionSession, SessionSnapshot};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Shared dependencies for spawning connection actors.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub registry: PairingRegistryHandle,
    pub directory: Arc<ConnectionDirectory>,
    pub metrics: Arc<ActorMetrics>,
    pub session_timeout: Duration,
    pub mailbox_capacity: usize,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    close_token: CancellationToken,
    connection_id: ConnectionId,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Decode a text frame from the peer and queue it for processing.
    pub async fn receive_text(&self, text: &str) -> Result<(), RendezvousError> {
        let message = match ClientFrame::decode(text) {
            Ok(frame) => ConnectionMessage::Inbound { frame },
            Err(_) => ConnectionMessage::Malformed,
        };
        self.send(message).await
    }

    /// Report that the peer went away.
    pub async fn disconnect(&self, reason: Option<String>) -> Result<(), RendezvousError> {
        self.send(ConnectionMessage::Disconnect { reason }).await
    }

    /// Get the current session state.
    pub async fn state(&self) -> Result<SessionSnapshot, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionMessage::GetState { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| RendezvousError::Internal(format!("response receive failed: {e}")))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_token.is_cancelled()
    }

    /// Token cancelled once the connection is closing.
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Frames and deliveries queued and not yet handled.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    async fn send(&self, message: ConnectionMessage) -> Result<(), RendezvousError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.mailbox.cancel_enqueue();
            return Err(RendezvousError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }
}

/// Failure while handling one inbound event.
enum EventError {
    /// Reported to the peer as `custom-error`.
    Signaling(SignalingError),
    /// Registry unavailable; the connection cannot continue.
    Internal(RendezvousError),
}

impl From<SignalingError> for EventError {
    fn from(err: SignalingError) -> Self {
        EventError::Signaling(err)
    }
}

impl From<RendezvousError> for EventError {
    fn from(err: RendezvousError) -> Self {
        EventError::Internal(err)
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    session: ConnectionSession,
    receiver: mpsc::Receiver<ConnectionMessage>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    outbound: mpsc::Sender<ServerFrame>,
    /// Cancelled to close this connection (child of `shutdown`).
    close_token: CancellationToken,
    shutdown: CancellationToken,
    registry: PairingRegistryHandle,
    directory: Arc<ConnectionDirectory>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Frames for the peer are written to `outbound`; the channel closes when
    /// the actor exits. Returns a handle and the task join handle, which
    /// yields the close reason.
    pub fn spawn(
        context: &ConnectionContext,
        outbound: mpsc::Sender<ServerFrame>,
        shutdown: &CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<CloseReason>) {
        let connection_id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(context.mailbox_capacity);
        let (delivery_tx, deliveries) = mpsc::unbounded_channel();
        let close_token = shutdown.child_token();
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.as_str(),
        ));

        context.directory.register(
            connection_id.clone(),
            ConnectionLink {
                deliveries: delivery_tx,
                close_token: close_token.clone(),
                mailbox: Arc::clone(&mailbox),
            },
        );
        context.metrics.connection_opened();

        let actor = Self {
            session: ConnectionSession::new(connection_id.clone(), context.session_timeout),
            receiver,
            deliveries,
            outbound,
            close_token: close_token.clone(),
            shutdown: shutdown.clone(),
            registry: context.registry.clone(),
            directory: Arc::clone(&context.directory),
            metrics: Arc::clone(&context.metrics),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            close_token,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "rendezvous.actor.connection",
        fields(connection_id = %self.session.id())
    )]
    async fn run(mut self) -> CloseReason {
        debug!(
            target: "rendezvous.actor.connection",
            connection_id = %self.session.id(),
            "ConnectionActor started"
        );

        let deadline = tokio::time::sleep_until(self.session.deadline());
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                () = self.close_token.cancelled() => {
                    if self.shutdown.is_cancelled() {
                        break CloseReason::ServerShutdown;
                    }
                    break CloseReason::PeerLeft;
                }

                () = &mut deadline => {
                    info!(
                        target: "rendezvous.actor.connection",
                        connection_id = %self.session.id(),
                        state = self.session.state().as_str(),
                        "Session deadline reached, closing"
                    );
                    prom::record_session_timeout();
                    break CloseReason::IdleTimeout;
                }

                Some(delivery) = self.deliveries.recv() => {
                    self.handle_delivery(delivery).await;
                    self.mailbox.record_dequeue();
                    self.metrics.record_message_processed();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if let Some(reason) = exit {
                                break reason;
                            }
                        }
                        None => break CloseReason::ClientDisconnect(None),
                    }
                }
            }
        };

        self.finish(&reason).await;
        reason
    }

    /// Handle a single message. Returns a close reason if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> Option<CloseReason> {
        match message {
            ConnectionMessage::Inbound { frame } => self.handle_frame(frame).await,

            ConnectionMessage::Malformed => {
                self.report(&SignalingError::MalformedFrame).await;
                None
            }

            ConnectionMessage::Disconnect { reason } => {
                Some(CloseReason::ClientDisconnect(reason))
            }

            ConnectionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.session.snapshot());
                None
            }
        }
    }

    /// Forward a registry delivery to the socket.
    async fn handle_delivery(&mut self, delivery: Delivery) {
        let Delivery { room_id, event } = delivery;

        // Broadcast to a room this session left while the delivery was queued.
        if self.session.room() != Some(&room_id) {
            debug!(
                target: "rendezvous.actor.connection",
                connection_id = %self.session.id(),
                event = event.name(),
                "Dropping delivery for a previous room"
            );
            return;
        }

        if matches!(event, OutboundEvent::ClientInit(_)) && self.session.peer_joined(&room_id) {
            debug!(
                target: "rendezvous.actor.connection",
                connection_id = %self.session.id(),
                "Peer joined room"
            );
        }
        self.emit(event.into_frame()).await;
    }

    async fn handle_frame(&mut self, frame: ClientFrame) -> Option<CloseReason> {
        let result = match InboundEvent::parse(&frame) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => Err(EventError::Signaling(err)),
        };

        match result {
            Ok(ack_args) => {
                if let (Some(ack), Some(args)) = (frame.ack, ack_args) {
                    self.emit(ServerFrame::Ack { ack, args }).await;
                }
                None
            }
            Err(EventError::Signaling(err)) => {
                self.report(&err).await;
                None
            }
            Err(EventError::Internal(err)) => {
                error!(
                    target: "rendezvous.actor.connection",
                    connection_id = %self.session.id(),
                    error = %err,
                    "Registry unavailable, closing connection"
                );
                Some(CloseReason::ServerShutdown)
            }
        }
    }

    /// Apply one validated event. Returns the acknowledgement arguments, if
    /// the event is acknowledged.
    async fn handle_event(&mut self, event: InboundEvent) -> Result<Option<Vec<Value>>, EventError> {
        match event {
            InboundEvent::ServerInit => {
                let room_id = self.registry.host_room(self.session.id().clone()).await?;
                self.session.hosted(room_id.clone());

                debug!(
                    target: "rendezvous.actor.connection",
                    connection_id = %self.session.id(),
                    "Hosting new room"
                );

                Ok(Some(vec![Value::String(room_id.as_str().to_string())]))
            }

            InboundEvent::ClientInit {
                room_id,
                description,
            } => {
                self.join_room(room_id, description).await?;
                Ok(None)
            }

            InboundEvent::ServerAnswer { description } => {
                self.relay(OutboundEvent::ServerAnswer(description)).await?;
                Ok(None)
            }

            InboundEvent::IceCandidate { candidate } => {
                self.relay(OutboundEvent::IceCandidate(candidate)).await?;
                Ok(Some(vec![Value::Bool(true)]))
            }
        }
    }

    async fn join_room(&mut self, room_id: RoomId, description: String) -> Result<(), EventError> {
        match self
            .registry
            .try_join(room_id.clone(), self.session.id().clone())
            .await?
        {
            Ok(outcome) => {
                match outcome {
                    JoinOutcome::Paired => self.session.joined(room_id.clone()),
                    JoinOutcome::Alone => self.session.hosted(room_id.clone()),
                }
                self.registry
                    .broadcast(room_id, OutboundEvent::ClientInit(description))
                    .await?;
                prom::record_relay(EVENT_CLIENT_INIT);
                Ok(())
            }
            Err(err) => {
                self.session.left();
                Err(EventError::Signaling(err.into()))
            }
        }
    }

    async fn relay(&mut self, event: OutboundEvent) -> Result<(), EventError> {
        let name = event.name();
        match self.registry.relay(self.session.id().clone(), event).await? {
            Ok(room_id) => {
                self.session.peer_joined(&room_id);
                prom::record_relay(name);
                Ok(())
            }
            Err(err) => Err(EventError::Signaling(err.into_signaling(name))),
        }
    }

    /// Send a `custom-error` to the peer.
    async fn report(&self, err: &SignalingError) {
        debug!(
            target: "rendezvous.actor.connection",
            connection_id = %self.session.id(),
            reason = %err,
            category = err.category().as_str(),
            "Signaling error"
        );
        prom::record_signaling_error(err.category().as_str());
        self.emit(OutboundEvent::CustomError(err.client_message()).into_frame())
            .await;
    }

    async fn emit(&self, frame: ServerFrame) {
        if self.outbound.send(frame).await.is_err() {
            warn!(
                target: "rendezvous.actor.connection",
                connection_id = %self.session.id(),
                "Outbound channel closed, dropping frame"
            );
        }
    }

    async fn finish(&mut self, reason: &CloseReason) {
        self.session.close();
        self.close_token.cancel();

        match self.registry.evict(self.session.id().clone()).await {
            Ok(peers) if !peers.is_empty() => {
                debug!(
                    target: "rendezvous.actor.connection",
                    connection_id = %self.session.id(),
                    peers_closed = peers.len(),
                    "Closed room peers"
                );
            }
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "rendezvous.actor.connection",
                    connection_id = %self.session.id(),
                    error = %e,
                    "Eviction skipped, registry unavailable"
                );
            }
        }

        self.directory.unregister(self.session.id());
        self.metrics.connection_closed();
        prom::record_session_duration(reason.as_str(), self.session.age());

        info!(
            target: "rendezvous.actor.connection",
            connection_id = %self.session.id(),
            reason = reason.as_str(),
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::metrics::CONNECTION_MAILBOX_NORMAL;
    use crate::actors::session::SessionState;
    use crate::transport::Transport;
    use serde_json::json;

    const MAILBOX_CAPACITY: usize = 16;
    const OUTBOUND_CAPACITY: usize = 16;

    struct Harness {
        context: ConnectionContext,
        shutdown: CancellationToken,
    }

    struct Peer {
        handle: ConnectionActorHandle,
        task: JoinHandle<CloseReason>,
        frames: mpsc::Receiver<ServerFrame>,
    }

    impl Harness {
        fn new(session_timeout: Duration) -> Self {
            let directory = Arc::new(ConnectionDirectory::new());
            let metrics = ActorMetrics::new();
            let shutdown = CancellationToken::new();
            let registry = PairingRegistryHandle::new(
                Arc::clone(&directory) as Arc<dyn crate::transport::Transport>,
                shutdown.child_token(),
                Arc::clone(&metrics),
            );
            Self {
                context: ConnectionContext {
                    registry,
                    directory,
                    metrics,
                    session_timeout,
                    mailbox_capacity: MAILBOX_CAPACITY,
                },
                shutdown,
            }
        }

        fn connect(&self) -> Peer {
            let (tx, frames) = mpsc::channel(OUTBOUND_CAPACITY);
            let (handle, task) = ConnectionActor::spawn(&self.context, tx, &self.shutdown);
            Peer {
                handle,
                task,
                frames,
            }
        }
    }

    impl Peer {
        async fn emit(&self, event: &str, args: Vec<Value>, ack: Option<u64>) {
            let text = serde_json::to_string(&ClientFrame::new(event, args, ack)).unwrap();
            self.handle.receive_text(&text).await.unwrap();
        }

        async fn next_frame(&mut self) -> ServerFrame {
            tokio::time::timeout(Duration::from_secs(1), self.frames.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("outbound channel closed")
        }

        async fn next_event(&mut self) -> (String, Vec<Value>) {
            match self.next_frame().await {
                ServerFrame::Event { event, args } => (event, args),
                ServerFrame::Ack { ack, .. } => unreachable!("expected event, got ack {ack}"),
            }
        }

        async fn host(&mut self) -> String {
            self.emit("server-init", vec![], Some(1)).await;
            match self.next_frame().await {
                ServerFrame::Ack { ack: 1, args } => {
                    args.first().and_then(Value::as_str).unwrap().to_string()
                }
                other => unreachable!("expected ack, got {other:?}"),
            }
        }

        async fn state(&self) -> SessionState {
            self.handle.state().await.unwrap().state
        }

        /// Queue `count` undecodable frames without reading the replies.
        /// Past `OUTBOUND_CAPACITY` the actor blocks writing its next frame.
        async fn stall(&self, count: usize) {
            for _ in 0..count {
                self.handle.receive_text("{").await.unwrap();
            }
        }

        /// Read frames until `event` arrives, giving up after `limit` frames.
        async fn find_event(&mut self, event: &str, limit: usize) -> Option<Vec<Value>> {
            for _ in 0..limit {
                if let ServerFrame::Event { event: name, args } = self.next_frame().await {
                    if name == event {
                        return Some(args);
                    }
                }
            }
            None
        }
    }

    async fn paired(harness: &Harness) -> (Peer, Peer, RoomId) {
        let mut host = harness.connect();
        let mut joiner = harness.connect();
        let room = host.host().await;
        joiner
            .emit("client-init", vec![json!(room), json!("offer")], None)
            .await;
        host.next_event().await;
        joiner.next_event().await;
        (host, joiner, RoomId::from(room.as_str()))
    }

    fn timeout() -> Duration {
        Duration::from_secs(80)
    }

    #[tokio::test]
    async fn test_server_init_acks_room_id() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();

        let room = host.host().await;
        assert_eq!(room.len(), 32);

        let snapshot = host.handle.state().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Alone);
        assert_eq!(snapshot.room, Some(RoomId::from(room.as_str())));
    }

    #[tokio::test]
    async fn test_server_init_twice_moves_to_new_room() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();

        let first = host.host().await;
        let second = host.host().await;
        assert_ne!(first, second);

        let status = harness.context.registry.status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert_eq!(
            host.handle.state().await.unwrap().room,
            Some(RoomId::from(second.as_str()))
        );
    }

    #[tokio::test]
    async fn test_client_init_pairs_and_delivers_offer() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let mut joiner = harness.connect();
        let room = host.host().await;

        joiner
            .emit("client-init", vec![json!(room), json!("offer")], None)
            .await;

        assert_eq!(
            host.next_event().await,
            ("client-init".to_string(), vec![json!("offer")])
        );
        assert_eq!(
            joiner.next_event().await,
            ("client-init".to_string(), vec![json!("offer")])
        );
        assert_eq!(host.state().await, SessionState::Paired);
        assert_eq!(joiner.state().await, SessionState::Paired);
    }

    #[tokio::test]
    async fn test_server_answer_and_candidates_relay() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let mut joiner = harness.connect();
        let room = host.host().await;
        joiner
            .emit("client-init", vec![json!(room), json!("offer")], None)
            .await;
        host.next_event().await;
        joiner.next_event().await;

        host.emit("server-answer", vec![json!("answer")], None).await;
        assert_eq!(
            joiner.next_event().await,
            ("server-answer".to_string(), vec![json!("answer")])
        );
        assert_eq!(
            host.next_event().await,
            ("server-answer".to_string(), vec![json!("answer")])
        );

        joiner
            .emit("ice-candidate", vec![json!("cand-1")], Some(7))
            .await;
        assert_eq!(
            joiner.next_frame().await,
            ServerFrame::Ack {
                ack: 7,
                args: vec![json!(true)]
            }
        );
        assert_eq!(
            joiner.next_event().await,
            ("ice-candidate".to_string(), vec![json!("cand-1")])
        );
        assert_eq!(
            host.next_event().await,
            ("ice-candidate".to_string(), vec![json!("cand-1")])
        );
    }

    #[tokio::test]
    async fn test_relay_reaches_peer_with_full_mailbox() {
        let harness = Harness::new(timeout());
        let (mut host, mut joiner, _room) = paired(&harness).await;

        // Outbound channel full, actor blocked, inbound mailbox full.
        host.stall(OUTBOUND_CAPACITY + 1 + MAILBOX_CAPACITY).await;
        assert!(host.handle.mailbox_depth() > CONNECTION_MAILBOX_NORMAL);

        joiner.emit("server-answer", vec![json!("answer")], None).await;
        assert_eq!(
            joiner.next_event().await,
            ("server-answer".to_string(), vec![json!("answer")])
        );

        let limit = OUTBOUND_CAPACITY + MAILBOX_CAPACITY + 4;
        assert_eq!(
            host.find_event("server-answer", limit).await,
            Some(vec![json!("answer")])
        );
    }

    #[tokio::test]
    async fn test_mailbox_depth_drains_to_zero() {
        let harness = Harness::new(timeout());
        let mut peer = harness.connect();

        peer.stall(OUTBOUND_CAPACITY + 4).await;
        assert!(peer.handle.mailbox_depth() > 0);

        for _ in 0..(OUTBOUND_CAPACITY + 4) {
            peer.next_event().await;
        }
        for _ in 0..100 {
            if peer.handle.mailbox_depth() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(peer.handle.mailbox_depth(), 0);
    }

    #[tokio::test]
    async fn test_delivery_for_previous_room_is_dropped() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let first = RoomId::from(host.host().await.as_str());
        let second = RoomId::from(host.host().await.as_str());
        let id = host.handle.connection_id().clone();

        let directory = &harness.context.directory;
        assert!(directory.deliver(
            &id,
            Delivery {
                room_id: first,
                event: OutboundEvent::ClientInit("offer".to_string()),
            }
        ));
        assert!(directory.deliver(
            &id,
            Delivery {
                room_id: second.clone(),
                event: OutboundEvent::IceCandidate("marker".to_string()),
            }
        ));

        // Same lane, so the stale offer was handled before the marker.
        assert_eq!(
            host.next_event().await,
            ("ice-candidate".to_string(), vec![json!("marker")])
        );
        let snapshot = host.handle.state().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Alone);
        assert_eq!(snapshot.room, Some(second));
    }

    #[tokio::test]
    async fn test_join_racing_rehost_leaves_host_alone() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let mut joiner = harness.connect();
        let first = host.host().await;

        // The re-host is queued behind a blocked write while the joiner
        // pairs into the first room.
        host.stall(OUTBOUND_CAPACITY + 1).await;
        host.emit("server-init", vec![], Some(2)).await;
        joiner
            .emit("client-init", vec![json!(first), json!("offer")], None)
            .await;
        assert_eq!(
            joiner.next_event().await,
            ("client-init".to_string(), vec![json!("offer")])
        );

        let mut second = None;
        for _ in 0..(OUTBOUND_CAPACITY + 4) {
            if let ServerFrame::Ack { ack: 2, args } = host.next_frame().await {
                second = args.first().and_then(Value::as_str).map(RoomId::from);
                break;
            }
        }
        let second = second.expect("server-init was not acknowledged");

        // Flush the delivery lane behind the first room's offer.
        assert!(harness.context.directory.deliver(
            host.handle.connection_id(),
            Delivery {
                room_id: second.clone(),
                event: OutboundEvent::IceCandidate("marker".to_string()),
            }
        ));
        assert!(host.find_event("ice-candidate", 4).await.is_some());

        let snapshot = host.handle.state().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Alone);
        assert_eq!(snapshot.room, Some(second.clone()));
        assert_eq!(harness.context.registry.snapshot(second).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_third_party_gets_room_full() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let joiner = harness.connect();
        let mut intruder = harness.connect();
        let room = host.host().await;
        joiner
            .emit("client-init", vec![json!(room), json!("offer")], None)
            .await;
        host.next_event().await;

        intruder
            .emit("client-init", vec![json!(room), json!("offer-2")], None)
            .await;
        assert_eq!(
            intruder.next_event().await,
            ("custom-error".to_string(), vec![json!("room is full")])
        );
        assert_eq!(intruder.state().await, SessionState::Idle);
        assert_eq!(host.state().await, SessionState::Paired);
    }

    #[tokio::test]
    async fn test_client_init_unknown_room() {
        let harness = Harness::new(timeout());
        let mut peer = harness.connect();

        peer.emit("client-init", vec![json!("no-such-room"), json!("offer")], None)
            .await;
        assert_eq!(
            peer.next_event().await,
            ("custom-error".to_string(), vec![json!("invalid roomID")])
        );
        assert_eq!(peer.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_join_leaves_previous_room() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        host.host().await;

        host.emit("client-init", vec![json!("no-such-room"), json!("offer")], None)
            .await;
        host.next_event().await;

        assert_eq!(host.state().await, SessionState::Idle);
        assert_eq!(harness.context.registry.status().await.unwrap().rooms, 0);
    }

    #[tokio::test]
    async fn test_relay_preconditions() {
        let harness = Harness::new(timeout());
        let mut peer = harness.connect();

        peer.emit("server-answer", vec![json!("answer")], None).await;
        assert_eq!(
            peer.next_event().await,
            (
                "custom-error".to_string(),
                vec![json!("unexpected event server-answer")]
            )
        );

        peer.host().await;
        peer.emit("ice-candidate", vec![json!("cand")], Some(2)).await;
        assert_eq!(
            peer.next_event().await,
            ("custom-error".to_string(), vec![json!("invalid room")])
        );
        assert_eq!(peer.state().await, SessionState::Alone);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames() {
        let harness = Harness::new(timeout());
        let mut peer = harness.connect();

        peer.handle.receive_text("{not json").await.unwrap();
        assert_eq!(
            peer.next_event().await,
            ("custom-error".to_string(), vec![json!("malformed frame")])
        );

        peer.emit("hello", vec![], None).await;
        assert_eq!(
            peer.next_event().await,
            ("custom-error".to_string(), vec![json!("unknown event hello")])
        );

        peer.emit("client-init", vec![json!("room")], None).await;
        assert_eq!(
            peer.next_event().await,
            (
                "custom-error".to_string(),
                vec![json!("client-init invalid arguments")]
            )
        );
        assert_eq!(peer.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_cascade_closes_peer() {
        let harness = Harness::new(timeout());
        let mut host = harness.connect();
        let mut joiner = harness.connect();
        let room = host.host().await;
        joiner
            .emit("client-init", vec![json!(room), json!("offer")], None)
            .await;
        host.next_event().await;
        joiner.next_event().await;

        host.handle.disconnect(Some("bye".to_string())).await.unwrap();
        assert_eq!(
            host.task.await.unwrap(),
            CloseReason::ClientDisconnect(Some("bye".to_string()))
        );
        assert_eq!(joiner.task.await.unwrap(), CloseReason::PeerLeft);
        assert!(joiner.frames.recv().await.is_none());

        let status = harness.context.registry.status().await.unwrap();
        assert_eq!(status.rooms, 0);
        assert_eq!(status.members, 0);
        assert!(harness.context.directory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_closes_session_once() {
        let harness = Harness::new(Duration::from_secs(80));
        let mut peer = harness.connect();

        tokio::time::advance(Duration::from_secs(79)).await;
        assert_eq!(peer.state().await, SessionState::Idle);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(peer.task.await.unwrap(), CloseReason::IdleTimeout);
        assert!(peer.frames.recv().await.is_none());
        assert!(peer.handle.is_closed());
        assert!(peer.handle.state().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_renewed_by_activity() {
        let harness = Harness::new(Duration::from_secs(80));
        let mut peer = harness.connect();

        tokio::time::advance(Duration::from_secs(60)).await;
        peer.host().await;

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(peer.task.await.unwrap(), CloseReason::IdleTimeout);
        assert_eq!(harness.context.registry.status().await.unwrap().rooms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_deadline_wins() {
        let harness = Harness::new(Duration::from_secs(80));
        let peer = harness.connect();

        peer.handle.disconnect(None).await.unwrap();
        assert_eq!(peer.task.await.unwrap(), CloseReason::ClientDisconnect(None));

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(harness.context.directory.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let harness = Harness::new(timeout());
        let peer = harness.connect();

        harness.shutdown.cancel();
        assert_eq!(peer.task.await.unwrap(), CloseReason::ServerShutdown);
    }
}
