//! Server network layer: WebSocket transport between browsers and the hub
//!
//! Each accepted connection is upgraded to a WebSocket, its username is
//! checked, and it is registered with the hub. From then on two pumps run
//! per connection: the read pump turns text frames into hub requests and the
//! write pump drains the connection's outbound queue into text frames.
//! Whichever pump stops first takes the other down and the hub is told the
//! client left.

use crate::client_manager::{outbound_queue, ConnectionId, OutboundReceiver};
use crate::hub::{Hub, HubRequest};
use crate::username::{username_from_uri, UsernameGate};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_client_message, ClientMessage};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("Hub mailbox closed")]
    MailboxClosed,
}

/// Accepts connections until the listener fails for good
pub async fn serve(
    listener: TcpListener,
    hub: Hub,
    mailbox: mpsc::Sender<HubRequest>,
    gate: UsernameGate,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on {}", addr);
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = hub.clone();
                let mailbox = mailbox.clone();
                let gate = gate.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, hub, mailbox, gate).await {
                        debug!("Connection from {} ended: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Hub,
    mailbox: mpsc::Sender<HubRequest>,
    gate: UsernameGate,
) -> Result<(), ConnectionError> {
    let mut requested = None;
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        let username = username_from_uri(&request.uri().to_string()).unwrap_or_default();
        match gate.check_shape(&username) {
            Ok(()) => {
                requested = Some(username);
                Ok(response)
            }
            Err(rejection) => {
                let mut refusal = ErrorResponse::new(Some(rejection.to_string()));
                *refusal.status_mut() = StatusCode::BAD_REQUEST;
                Err(refusal)
            }
        }
    })
    .await?;
    let Some(username) = requested else {
        return Ok(());
    };

    let (mut sink, stream) = ws.split();

    if let Err(rejection) = gate.check_availability(&hub, &username).await {
        info!("Rejecting {:?} from {}: {}", username, addr, rejection);
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: rejection.to_string().into(),
        };
        sink.send(Message::Close(Some(frame))).await?;
        return Ok(());
    }

    let conn = hub.next_connection_id();
    info!("Connection {} from {} joining as {:?}", conn, addr, username);
    let (outgoing, queue) = outbound_queue(hub.config().outbound_capacity);
    mailbox
        .send(HubRequest::Join {
            conn,
            username,
            outgoing,
        })
        .await
        .map_err(|_| ConnectionError::MailboxClosed)?;

    let mut writer = tokio::spawn(write_pump(conn, sink, queue));
    let mut reader = tokio::spawn(read_pump(conn, stream, mailbox.clone()));
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    mailbox
        .send(HubRequest::Leave { conn })
        .await
        .map_err(|_| ConnectionError::MailboxClosed)
}

/// Writes queued messages as text frames until the queue closes or the
/// socket fails
pub async fn write_pump<S>(conn: ConnectionId, mut sink: S, mut queue: OutboundReceiver)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = queue.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode message for connection {}: {}", conn, e);
                continue;
            }
        };

        match sink.send(Message::Text(text)).await {
            Ok(()) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                debug!("Connection {} already closing", conn);
                return;
            }
            Err(e) => {
                warn!("Write to connection {} failed: {}", conn, e);
                return;
            }
        }
    }

    // Queue closed by the hub
    if let Err(e) = sink.close().await {
        debug!("Closing connection {} failed: {}", conn, e);
    }
}

/// Forwards decoded client frames to the hub until the socket closes
pub async fn read_pump<S>(conn: ConnectionId, mut stream: S, mailbox: mpsc::Sender<HubRequest>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Read from connection {} failed: {}", conn, e);
                break;
            }
        };

        match decode_client_message(&text) {
            Ok(Some(ClientMessage::Update(update))) => {
                if mailbox.send(HubRequest::Update { conn, update }).await.is_err() {
                    break;
                }
            }
            Ok(None) => debug!("Ignoring frame from connection {}: {}", conn, text),
            Err(e) => warn!("Malformed frame from connection {}: {}", conn, e),
        }
    }
}
