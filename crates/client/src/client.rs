//! Async driver running a [`Session`] over UDP.

use crate::{ClientConfig, ClientError, ClientEvent, Session};
use facnet_net::{ClientMultiplayerState, InputAction, Observer, UdpTransport};
use std::net::SocketAddr;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Multiplayer client.
///
/// Events are delivered on the channel returned by [`Client::new`]. Nothing
/// happens on the wire unless [`Client::connect`] or [`Client::run`] is being
/// awaited.
pub struct Client {
    session: Session,
    transport: Option<UdpTransport>,
    observer: Option<Observer>,
    events: UnboundedSender<ClientEvent>,
}

impl Client {
    /// Create a client and the receiving end of its event channel.
    pub fn new(config: ClientConfig) -> (Self, UnboundedReceiver<ClientEvent>) {
        let (events, receiver) = unbounded_channel();
        let client = Self {
            session: Session::new(config),
            transport: None,
            observer: None,
            events,
        };
        (client, receiver)
    }

    /// Underlying state machine.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current client state.
    pub fn state(&self) -> ClientMultiplayerState {
        self.session.state()
    }

    /// Local address of the open transport.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|transport| transport.local_addr().ok())
    }

    /// Watch every datagram of the next transport opened by [`Client::connect`].
    pub fn set_transport_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }

    /// Connect to `server_addr` and wait until the game was joined.
    ///
    /// Returns the assigned player index. If the returned future is dropped
    /// before it completes, the attempt is aborted and the client is back in
    /// [`ClientMultiplayerState::Ready`].
    pub async fn connect(&mut self, server_addr: SocketAddr) -> Result<u16, ClientError> {
        info!("Connecting to server at {}", server_addr);
        self.abort();

        let mut transport =
            UdpTransport::connect(server_addr, self.session.config().max_fragment_payload).await?;
        if let Some(observer) = self.observer.take() {
            transport.set_observer(observer);
        }
        self.transport = Some(transport);
        self.session.connect(&mut rand::thread_rng());

        let limit = self.session.config().connect_timeout();
        let mut guard = ConnectGuard {
            client: self,
            armed: true,
        };
        let result = match timeout(limit, guard.client.drive(Session::player_index)).await {
            Ok(result) => result,
            Err(_) => Err(guard.client.session.fail(ClientError::Timeout)),
        };
        if let Ok(player_index) = result {
            info!("Joined as player {}", player_index);
            guard.armed = false;
        }
        result
    }

    /// Keep the session going until it ends. The error says why it ended.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        self.drive(|_| None::<()>).await
    }

    /// Queue `action` for the closure of `tick`.
    pub fn send_in_tick_closure(&mut self, tick: u32, action: InputAction) -> Result<(), ClientError> {
        self.session.send_in_tick_closure(tick, action)
    }

    /// Queue `action` for the earliest open tick and return that tick.
    pub fn send_in_next_tick_closure(&mut self, action: InputAction) -> Result<u32, ClientError> {
        self.session.send_in_next_tick_closure(action)
    }

    /// Report a new local state to the server with the next heartbeat.
    pub fn change_state(&mut self, state: ClientMultiplayerState) {
        self.session.change_state(state);
        self.forward_events();
    }

    /// Leave the game, telling the server if connected.
    pub fn abort(&mut self) {
        self.session.abort();
        self.flush_best_effort();
        if let Some(transport) = self.transport.as_mut() {
            transport.reset();
        }
    }

    /// Abort and release the socket.
    pub fn close(&mut self) {
        self.abort();
        if self.transport.take().is_some() {
            info!("Client closed");
            let _ = self.events.send(ClientEvent::Closed);
        }
    }

    async fn drive<T>(
        &mut self,
        mut until: impl FnMut(&Session) -> Option<T>,
    ) -> Result<T, ClientError> {
        let mut heartbeat = interval(self.session.config().heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.flush()?;
            if let Some(done) = until(&self.session) {
                return Ok(done);
            }
            let transport = self.transport.as_mut().ok_or(ClientError::Closed)?;
            let outcome = tokio::select! {
                received = transport.recv() => match received {
                    Ok(received) => self.session.handle_received(received),
                    Err(err) => Err(self.session.fail(err.into())),
                },
                _ = heartbeat.tick() => self.session.step(),
            };
            if let Err(err) = outcome {
                self.flush_best_effort();
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> Result<(), ClientError> {
        while let Some(message) = self.session.poll_transmit() {
            let Some(transport) = self.transport.as_mut() else {
                debug!("Dropping {} message, no transport", message.message_type());
                continue;
            };
            if let Err(err) = transport.send(&message) {
                let err = self.session.fail(err.into());
                self.flush_best_effort();
                return Err(err);
            }
        }
        self.forward_events();
        Ok(())
    }

    fn flush_best_effort(&mut self) {
        while let Some(message) = self.session.poll_transmit() {
            if let Some(transport) = self.transport.as_mut() {
                if let Err(err) = transport.send(&message) {
                    warn!("Failed to send {} message: {}", message.message_type(), err);
                }
            }
        }
        self.forward_events();
    }

    fn forward_events(&mut self) {
        while let Some(event) = self.session.poll_event() {
            // A dropped receiver only means nobody is listening.
            let _ = self.events.send(event);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Aborts an unfinished connection attempt, including a cancelled one.
struct ConnectGuard<'a> {
    client: &'a mut Client,
    armed: bool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Connection attempt abandoned");
            self.client.abort();
            self.client.transport = None;
        }
    }
}
