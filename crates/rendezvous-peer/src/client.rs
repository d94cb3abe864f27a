//! Relay session driver
//!
//! This module handles:
//! - WebSocket connection to the relay
//! - Feeding relay messages, transport events and application commands into
//!   the `PeerManager`
//! - Flushing the manager's outbox back to the relay
//! - Reconnecting with exponential backoff when the relay connection drops

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use rendezvous_core::{ClientConfig, EndpointId, RoomId, ServerMessage};

use crate::backoff::Backoff;
use crate::error::SessionError;
use crate::handler::SessionHandler;
use crate::manager::PeerManager;
use crate::transport::{TransportEvent, TransportFactory};

/// Timeout for establishing the WebSocket connection
const WS_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the application to the running session
enum Command {
    CreateRoom(Option<RoomId>),
    JoinRoom(RoomId),
    LeaveRoom,
    RoomInfo(RoomId),
    Send {
        peer: EndpointId,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Broadcast {
        data: Vec<u8>,
        reply: oneshot::Sender<usize>,
    },
    ClosePeer(EndpointId),
    Shutdown,
}

/// How a single relay connection ended
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Cloneable handle for driving a running `RelayClient`
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Create a room; the relay picks the code when `room_id` is `None`
    pub fn create_room(&self, room_id: Option<RoomId>) -> Result<(), SessionError> {
        self.command(Command::CreateRoom(room_id))
    }

    pub fn join_room(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.command(Command::JoinRoom(room_id))
    }

    /// Leave the current room, closing every peer connection
    pub fn leave_room(&self) -> Result<(), SessionError> {
        self.command(Command::LeaveRoom)
    }

    /// Ask for a room snapshot; the answer arrives via `on_room_update`
    pub fn request_room_info(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.command(Command::RoomInfo(room_id))
    }

    /// Send data to one connected peer
    pub async fn send(&self, peer: EndpointId, data: Vec<u8>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { peer, data, reply })?;
        rx.await.map_err(|_| session_ended())?
    }

    /// Send data to every connected peer; returns how many accepted it
    pub async fn broadcast(&self, data: Vec<u8>) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Broadcast { data, reply })?;
        rx.await.map_err(|_| session_ended())
    }

    pub fn close_peer(&self, peer: EndpointId) -> Result<(), SessionError> {
        self.command(Command::ClosePeer(peer))
    }

    /// Close every peer connection and end the session
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.command(Command::Shutdown)
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| session_ended())
    }
}

fn session_ended() -> SessionError {
    SessionError::Connection("session has ended".into())
}

/// Endpoint-side relay client
pub struct RelayClient<F: TransportFactory, H: SessionHandler> {
    config: ClientConfig,
    manager: PeerManager<F, H>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_events: mpsc::UnboundedReceiver<(EndpointId, TransportEvent)>,
}

impl<F: TransportFactory, H: SessionHandler> RelayClient<F, H> {
    /// Create a client and the handle used to drive it
    pub fn new(config: ClientConfig, factory: F, handler: H) -> (Self, SessionHandle) {
        let (events_tx, transport_events) = mpsc::unbounded_channel();
        let (tx, commands) = mpsc::unbounded_channel();

        let client = Self {
            config,
            manager: PeerManager::new(factory, handler, events_tx),
            commands,
            transport_events,
        };

        (client, SessionHandle { tx })
    }

    pub fn manager(&self) -> &PeerManager<F, H> {
        &self.manager
    }

    /// Run the session until shutdown or until the relay stays unreachable
    ///
    /// The first connection is attempted immediately. Every later attempt
    /// waits out the backoff delay; once the attempt cap is reached the
    /// handler gets `RelayUnreachable` and it is returned.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let url = self.config.relay_url.clone();
        let mut backoff = Backoff::from(&self.config.reconnect);

        let mut connection = match connect_ws(&url).await {
            Ok(ws) => Some(ws),
            Err(e) => {
                warn!("Initial relay connection failed: {}", e);
                None
            }
        };

        loop {
            let ws = match connection.take() {
                Some(ws) => ws,
                None => {
                    let attempt = reconnect(&mut backoff, || connect_ws(&url));
                    tokio::pin!(attempt);

                    // Keep serving the application while waiting
                    loop {
                        tokio::select! {
                            result = &mut attempt => match result {
                                Ok(ws) => break ws,
                                Err(e) => {
                                    error!("Giving up on relay: {}", e);
                                    self.manager.handler_mut().on_error(&e);
                                    return Err(e);
                                }
                            },
                            Some((remote, event)) = self.transport_events.recv() => {
                                self.manager.handle_transport_event(remote, event);
                            }
                            command = self.commands.recv() => match command {
                                Some(Command::Shutdown) | None => {
                                    self.manager.close_all();
                                    return Ok(());
                                }
                                Some(command) => apply(&mut self.manager, command),
                            },
                        }
                    }
                }
            };

            match self.session(ws).await {
                SessionEnd::Shutdown => {
                    info!("Session closed");
                    return Ok(());
                }
                SessionEnd::Disconnected => warn!("Lost relay connection"),
            }
        }
    }

    /// Serve one relay connection until it drops or shutdown is requested
    ///
    /// Nothing is written before this connection's `welcome` has been
    /// applied: handshake messages queued while disconnected were addressed
    /// under the previous id and are dropped when the new id arrives.
    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut welcomed = false;

        loop {
            // A message leaves the outbox only once it has been written
            while let Some(msg) = self.manager.peek_outbound().filter(|_| welcomed) {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Dropping unserializable message: {}", e);
                        self.manager.pop_outbound();
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("Relay write failed: {}", e);
                    return SessionEnd::Disconnected;
                }
                self.manager.pop_outbound();
            }

            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            welcomed |= matches!(msg, ServerMessage::Welcome { .. });
                            self.manager.handle_relay(msg);
                        }
                        Err(e) => warn!("Ignoring malformed relay message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay closed the connection");
                        return SessionEnd::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay connection error: {}", e);
                        return SessionEnd::Disconnected;
                    }
                },
                Some((remote, event)) = self.transport_events.recv() => {
                    self.manager.handle_transport_event(remote, event);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.manager.close_all();
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(command) => apply(&mut self.manager, command),
                },
            }
        }
    }
}

fn apply<F: TransportFactory, H: SessionHandler>(manager: &mut PeerManager<F, H>, command: Command) {
    match command {
        Command::CreateRoom(room_id) => manager.create_room(room_id),
        Command::JoinRoom(room_id) => manager.join_room(room_id),
        Command::LeaveRoom => manager.leave_room(),
        Command::RoomInfo(room_id) => manager.request_room_info(room_id),
        Command::Send { peer, data, reply } => {
            let _ = reply.send(manager.send(&peer, &data));
        }
        Command::Broadcast { data, reply } => {
            let _ = reply.send(manager.broadcast(&data));
        }
        Command::ClosePeer(peer) => {
            manager.close_peer(&peer);
        }
        Command::Shutdown => manager.close_all(),
    }
}

/// Connect to the relay's WebSocket endpoint
async fn connect_ws(url: &str) -> Result<WsStream, SessionError> {
    debug!("Connecting to relay: {}", url);

    match timeout(WS_TIMEOUT, connect_async(url)).await {
        Ok(Ok((ws, _response))) => {
            info!("Connected to relay");
            Ok(ws)
        }
        Ok(Err(e)) => Err(SessionError::Connection(e.to_string())),
        Err(_) => Err(SessionError::Connection("connection timed out".into())),
    }
}

/// Retry `connect` on the backoff schedule
///
/// Sleeps before every attempt and resets the schedule on success. Fails
/// with `RelayUnreachable` once the attempt cap is reached.
pub async fn reconnect<T, C, Fut>(backoff: &mut Backoff, mut connect: C) -> Result<T, SessionError>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    while let Some(delay) = backoff.next_delay() {
        info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            backoff.attempts()
        );
        tokio::time::sleep(delay).await;

        match connect().await {
            Ok(conn) => {
                backoff.reset();
                return Ok(conn);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", backoff.attempts(), e),
        }
    }

    Err(SessionError::RelayUnreachable {
        attempts: backoff.attempts(),
    })
}
