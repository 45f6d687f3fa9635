//! WebSocket test peer.
//!
//! `TestPeer` speaks the signaling frame format over a real WebSocket so E2E
//! tests exercise the router, the socket pump and the actors together.

use futures::{SinkExt, StreamExt};
use rendezvous_server::protocol::{ClientFrame, ServerFrame};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long to wait for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestPeer {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_ack: u64,
}

impl TestPeer {
    /// Open a WebSocket to `url` (see `TestRendezvousServer::ws_url`).
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self {
            stream,
            next_ack: 1,
        })
    }

    /// Send an event without requesting an acknowledgement.
    pub async fn emit(&mut self, event: &str, args: Vec<Value>) -> Result<(), anyhow::Error> {
        self.send_frame(ClientFrame::new(event, args, None)).await
    }

    /// Send an event and return the ack id it carries.
    pub async fn emit_with_ack(
        &mut self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<u64, anyhow::Error> {
        let ack = self.next_ack;
        self.next_ack += 1;
        self.send_frame(ClientFrame::new(event, args, Some(ack)))
            .await?;
        Ok(ack)
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    async fn send_frame(&mut self, frame: ClientFrame) -> Result<(), anyhow::Error> {
        let text = serde_json::to_string(&frame)?;
        self.send_text(&text).await
    }

    /// Receive the next event or ack frame.
    pub async fn next_frame(&mut self) -> Result<ServerFrame, anyhow::Error> {
        loop {
            let message = tokio::time::timeout(FRAME_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for frame"))?;

            match message {
                Some(Ok(Message::Text(text))) => {
                    return ServerFrame::decode(&text)
                        .map_err(|e| anyhow::anyhow!("Undecodable frame {}: {}", text, e));
                }
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("Connection closed: {:?}", frame)
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => anyhow::bail!("WebSocket error: {}", e),
                None => anyhow::bail!("Connection closed"),
            }
        }
    }

    /// Receive the next frame, which must be an event; returns name and args.
    pub async fn next_event(&mut self) -> Result<(String, Vec<Value>), anyhow::Error> {
        match self.next_frame().await? {
            ServerFrame::Event { event, args } => Ok((event, args)),
            ServerFrame::Ack { ack, .. } => anyhow::bail!("Expected event, got ack {}", ack),
        }
    }

    /// Receive the next frame, which must be event `name` with one string argument.
    pub async fn expect_event(&mut self, name: &str) -> Result<String, anyhow::Error> {
        let (event, args) = self.next_event().await?;
        if event != name {
            anyhow::bail!("Expected event {}, got {} {:?}", name, event, args);
        }
        args.first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Event {} has no string argument: {:?}", name, args))
    }

    /// Receive the next frame, which must be the ack for `ack`; returns its args.
    pub async fn expect_ack(&mut self, ack: u64) -> Result<Vec<Value>, anyhow::Error> {
        match self.next_frame().await? {
            ServerFrame::Ack { ack: got, args } if got == ack => Ok(args),
            other => anyhow::bail!("Expected ack {}, got {:?}", ack, other),
        }
    }

    /// `server-init` and return the acknowledged room id.
    pub async fn server_init(&mut self) -> Result<String, anyhow::Error> {
        let ack = self.emit_with_ack("server-init", vec![]).await?;
        let args = self.expect_ack(ack).await?;
        args.first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("server-init ack has no room id: {:?}", args))
    }

    pub async fn client_init(&mut self, room: &str, description: &str) -> Result<(), anyhow::Error> {
        self.emit(
            "client-init",
            vec![Value::from(room), Value::from(description)],
        )
        .await
    }

    /// Close the socket with an optional reason.
    pub async fn close(&mut self, reason: &str) -> Result<(), anyhow::Error> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            }))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close: {}", e))
    }

    /// Wait until the server closes the socket, skipping any frames still in flight.
    pub async fn expect_closed(&mut self) -> Result<(), anyhow::Error> {
        loop {
            let message = tokio::time::timeout(FRAME_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for close"))?;

            match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => continue,
            }
        }
    }
}
