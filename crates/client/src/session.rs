//! Connection state machine.
//!
//! [`Session`] never touches a socket or a clock. Feed it received messages
//! and call [`Session::step`] once per heartbeat period; collect what it wants
//! sent with [`Session::poll_transmit`] and what happened with
//! [`Session::poll_event`].

use crate::pacing::TickPacer;
use crate::segments::SegmentBuffer;
use crate::{ClientConfig, ClientError, ClientEvent};
use facnet_net::{
    ClientMultiplayerState, ConnectionAcceptOrDeny, ConnectionRequest, ConnectionRequestReply,
    ConnectionRequestReplyConfirm, ConnectionRequestStatus, DisconnectReason, Heartbeat,
    InputAction, InputActionData, Message, NetworkMessageType, PropertyTree, Received,
    SynchronizerAction, SynchronizerActionData, TickClosure,
};
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, error, info, trace, warn};

/// Everything that is reset when a session ends.
#[derive(Debug, Default)]
struct ConnectionState {
    state: ClientMultiplayerState,
    client_request_id: Option<u32>,
    connected: bool,
    peer_id: Option<u16>,
    player_index: Option<u16>,
    client_sequence: u32,
    server_sequence: Option<u32>,
    update_tick: Option<u32>,
    tick_closures_received: BTreeMap<u32, TickClosure>,
    segments: SegmentBuffer,
    pacer: TickPacer,
    synchronizer_actions_to_send: Vec<SynchronizerAction>,
    sent_heartbeats: VecDeque<Heartbeat>,
}

/// Client side of one multiplayer connection.
#[derive(Debug)]
pub struct Session {
    config: ClientConfig,
    conn: ConnectionState,
    transmits: VecDeque<Message>,
    events: VecDeque<ClientEvent>,
}

impl Session {
    /// Idle session using `config` for the handshake.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: ConnectionState::default(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current client state.
    pub fn state(&self) -> ClientMultiplayerState {
        self.conn.state
    }

    /// True between acceptance and the end of the session.
    pub fn is_connected(&self) -> bool {
        self.conn.connected
    }

    /// Peer id assigned by the server.
    pub fn peer_id(&self) -> Option<u16> {
        self.conn.peer_id
    }

    /// Player index, known once the game was joined.
    pub fn player_index(&self) -> Option<u16> {
        self.conn.player_index
    }

    /// Latency window in ticks.
    pub fn latency(&self) -> u8 {
        self.conn.pacer.latency()
    }

    /// Next server tick to execute.
    pub fn update_tick(&self) -> Option<u32> {
        self.conn.update_tick
    }

    /// Next tick this client will produce a closure for.
    pub fn next_tick_closure_to_send(&self) -> Option<u32> {
        self.conn.pacer.next_tick_closure_to_send()
    }

    /// Next message to send, oldest first.
    pub fn poll_transmit(&mut self) -> Option<Message> {
        self.transmits.pop_front()
    }

    /// Next notification, oldest first.
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Start a connection attempt, abandoning any current session.
    pub fn connect<R: Rng>(&mut self, rng: &mut R) {
        if self.conn.state != ClientMultiplayerState::Ready {
            self.abort();
        }
        let client_request_id = rng.gen();
        debug!("Connection request id {:#010x}", client_request_id);
        self.conn.client_request_id = Some(client_request_id);
        self.change_state(ClientMultiplayerState::Connecting);
        self.transmits
            .push_back(Message::ConnectionRequest(ConnectionRequest {
                version: self.config.game_version,
                client_request_id,
            }));
    }

    /// Move to `state`, telling the server when connected.
    pub fn change_state(&mut self, state: ClientMultiplayerState) {
        if self.conn.connected {
            self.conn
                .synchronizer_actions_to_send
                .push(SynchronizerAction::client(
                    SynchronizerActionData::ClientChangedState { state },
                ));
        }
        self.set_state(state);
    }

    fn set_state(&mut self, state: ClientMultiplayerState) {
        if self.conn.state != state {
            info!("Client state {} -> {}", self.conn.state, state);
            self.conn.state = state;
            self.events.push_back(ClientEvent::StateChanged(state));
        }
    }

    /// Process one result of the transport. Malformed data ends the session.
    pub fn handle_received(&mut self, received: Received) -> Result<(), ClientError> {
        match received {
            Received::Message(message) => self.handle_message(message),
            Received::Malformed(err) => {
                self.events.push_back(ClientEvent::Malformed(err.clone()));
                Err(self.fail(err.into()))
            }
        }
    }

    /// Process one received message. Any error ends the session.
    pub fn handle_message(&mut self, message: Message) -> Result<(), ClientError> {
        self.process_message(message).map_err(|err| self.fail(err))
    }

    /// Heartbeat period elapsed: execute received ticks and send a heartbeat.
    pub fn step(&mut self) -> Result<(), ClientError> {
        if !self.conn.connected {
            return Ok(());
        }
        self.run_step().map_err(|err| self.fail(err))
    }

    /// Queue `action` for the closure of `tick`.
    pub fn send_in_tick_closure(&mut self, tick: u32, action: InputAction) -> Result<(), ClientError> {
        if self.conn.player_index.is_none() {
            return Err(ClientError::NotInGame);
        }
        self.conn.pacer.queue(tick, action)
    }

    /// Queue `action` for the earliest tick still open. Returns that tick.
    pub fn send_in_next_tick_closure(&mut self, action: InputAction) -> Result<u32, ClientError> {
        if self.conn.player_index.is_none() {
            return Err(ClientError::NotInGame);
        }
        let tick = self
            .conn
            .update_tick
            .and_then(|update_tick| self.conn.pacer.earliest_open_tick(update_tick))
            .ok_or(ClientError::NotInGame)?;
        self.conn.pacer.queue(tick, action)?;
        Ok(tick)
    }

    /// End the session. A connected session sends a final heartbeat saying it
    /// quit. Safe to call at any time.
    pub fn abort(&mut self) {
        if self.conn.connected {
            info!("Leaving game");
            self.conn.synchronizer_actions_to_send = vec![SynchronizerAction::client(
                SynchronizerActionData::PeerDisconnect {
                    reason: DisconnectReason::Quit,
                },
            )];
            self.conn.pacer.discard_unsent();
            self.send_heartbeat();
        }
        self.reset();
    }

    /// Abort because of `err`, report it and hand it back.
    pub fn fail(&mut self, err: ClientError) -> ClientError {
        error!("Connection failed: {}", err);
        self.abort();
        self.events.push_back(ClientEvent::Error(err.clone()));
        err
    }

    fn reset(&mut self) {
        let previous = self.conn.state;
        self.conn = ConnectionState::default();
        if previous != self.conn.state {
            self.events.push_back(ClientEvent::StateChanged(self.conn.state));
        }
    }

    fn process_message(&mut self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::ConnectionRequestReply(reply) => self.handle_reply(reply),
            Message::ConnectionAcceptOrDeny(accept) => self.handle_accept(accept),
            Message::ServerToClientHeartbeat(heartbeat) => {
                if !self.conn.connected {
                    return Err(ClientError::UnexpectedMessage(
                        NetworkMessageType::ServerToClientHeartbeat,
                    ));
                }
                self.handle_heartbeat(heartbeat)
            }
            Message::Empty => Ok(()),
            other => Err(ClientError::UnexpectedMessage(other.message_type())),
        }
    }

    fn handle_reply(&mut self, reply: ConnectionRequestReply) -> Result<(), ClientError> {
        self.events
            .push_back(ClientEvent::ConnectionRequestReply(reply.clone()));
        if self.conn.state != ClientMultiplayerState::Connecting {
            debug!("Ignoring connection request reply in state {}", self.conn.state);
            return Ok(());
        }
        let Some(client_request_id) = self.conn.client_request_id else {
            return Err(ClientError::UnexpectedMessage(
                NetworkMessageType::ConnectionRequestReply,
            ));
        };
        if reply.client_request_id != client_request_id {
            return Err(ClientError::UnexpectedMessage(
                NetworkMessageType::ConnectionRequestReply,
            ));
        }

        info!("Server runs version {}, sending credentials", reply.version);
        self.transmits
            .push_back(Message::ConnectionRequestReplyConfirm(
                ConnectionRequestReplyConfirm {
                    client_request_id,
                    server_request_id: reply.server_request_id,
                    instance_id: 0,
                    username: self.config.player_name.clone(),
                    password_hash: self.config.password.clone(),
                    server_key: String::new(),
                    server_key_timestamp: String::new(),
                    core_checksum: self.config.core_checksum,
                    prototype_list_checksum: self.config.prototype_list_checksum,
                    active_mods: self.config.active_mods.clone(),
                    startup_mod_settings: PropertyTree::empty_dictionary(),
                },
            ));
        Ok(())
    }

    fn handle_accept(&mut self, accept: ConnectionAcceptOrDeny) -> Result<(), ClientError> {
        self.events
            .push_back(ClientEvent::ConnectionAcceptOrDeny(Box::new(accept.clone())));
        if self.conn.state != ClientMultiplayerState::Connecting {
            debug!("Ignoring connection verdict in state {}", self.conn.state);
            return Ok(());
        }
        if Some(accept.client_request_id) != self.conn.client_request_id {
            return Err(ClientError::UnexpectedMessage(
                NetworkMessageType::ConnectionAcceptOrDeny,
            ));
        }
        if accept.status != ConnectionRequestStatus::Valid {
            return Err(ClientError::ConnectionRefused {
                status: accept.status,
            });
        }

        info!(
            "Connected to {} as peer {} (latency {})",
            accept.game_name, accept.new_peer_id, accept.latency
        );
        self.conn.connected = true;
        self.conn.peer_id = Some(accept.new_peer_id);
        self.conn.pacer = TickPacer::new(accept.latency);
        self.conn.client_sequence = accept.first_sequence_number_to_send;
        self.conn.server_sequence = Some(accept.first_sequence_number_to_expect);
        self.change_state(ClientMultiplayerState::ConnectedWaitingForMap);
        Ok(())
    }

    fn handle_heartbeat(&mut self, heartbeat: Heartbeat) -> Result<(), ClientError> {
        self.events
            .push_back(ClientEvent::ServerHeartbeat(heartbeat.clone()));

        let sequence = heartbeat.sequence_number;
        match self.conn.server_sequence {
            Some(expected) if sequence > expected => {
                debug!("Server heartbeats {}..{} missing", expected, sequence);
            }
            _ => {}
        }
        let next = sequence.wrapping_add(1);
        self.conn.server_sequence = Some(self.conn.server_sequence.map_or(next, |s| s.max(next)));

        for closure in heartbeat.tick_closures {
            if self.conn.update_tick.is_some_and(|tick| closure.update_tick < tick) {
                trace!("Ignoring stale tick closure {}", closure.update_tick);
                continue;
            }
            self.conn
                .tick_closures_received
                .entry(closure.update_tick)
                .or_insert(closure);
        }

        for action in heartbeat.synchronizer_actions {
            self.handle_synchronizer_action(action)?;
        }

        for requested in heartbeat.requests_for_heartbeat {
            let resend = self
                .conn
                .sent_heartbeats
                .iter()
                .find(|sent| sent.sequence_number == requested)
                .cloned();
            match resend {
                Some(sent) => {
                    debug!("Resending heartbeat {}", requested);
                    self.transmits
                        .push_back(Message::ClientToServerHeartbeat(sent));
                }
                None => warn!("Server requested heartbeat {} which is no longer kept", requested),
            }
        }
        Ok(())
    }

    fn handle_synchronizer_action(&mut self, action: SynchronizerAction) -> Result<(), ClientError> {
        self.events
            .push_back(ClientEvent::SynchronizerAction(action.clone()));
        let own = action.peer_id.is_some() && action.peer_id == self.conn.peer_id;
        let ty = action.action_type();

        match action.data {
            SynchronizerActionData::PeerDisconnect { reason } if own => {
                info!("Disconnected by server: {}", reason);
                self.reset();
                return Err(ClientError::Disconnected { reason });
            }
            SynchronizerActionData::MapReadyForDownload(map) if own => {
                info!("Map ready at tick {} ({} bytes)", map.update_tick, map.size);
                self.conn.update_tick = Some(map.update_tick);
                self.conn
                    .tick_closures_received
                    .retain(|tick, _| *tick >= map.update_tick);
                if self.conn.state == ClientMultiplayerState::DesyncedWaitingForMap {
                    self.change_state(ClientMultiplayerState::DesyncedDownloadingMap);
                } else {
                    self.change_state(ClientMultiplayerState::ConnectedDownloadingMap);
                }
                self.change_state(ClientMultiplayerState::WaitingForCommandToStartSendingTickClosures);
            }
            SynchronizerActionData::ClientShouldStartSendingTickClosures { first_tick } if own => {
                self.conn.pacer.start(first_tick);
                self.change_state(ClientMultiplayerState::InGame);
            }
            SynchronizerActionData::PlayerDesynced if own => {
                warn!("Desynchronized from the server, waiting for a new map");
                self.conn.pacer = TickPacer::new(self.conn.pacer.latency());
                self.change_state(ClientMultiplayerState::DesyncedWaitingForMap);
            }
            SynchronizerActionData::ClientChangedState { state } if own => {
                self.set_state(state);
            }
            SynchronizerActionData::ChangeLatency { latency } => {
                let update_tick = self.conn.update_tick;
                if let Some(confirm) = self.conn.pacer.change_latency(latency, update_tick) {
                    self.conn
                        .synchronizer_actions_to_send
                        .push(SynchronizerAction::client(confirm));
                }
            }
            SynchronizerActionData::PeerDisconnect { .. }
            | SynchronizerActionData::MapReadyForDownload(_)
            | SynchronizerActionData::ClientShouldStartSendingTickClosures { .. }
            | SynchronizerActionData::PlayerDesynced
            | SynchronizerActionData::ClientChangedState { .. }
            | SynchronizerActionData::NewPeerInfo { .. }
            | SynchronizerActionData::MapLoadingProgressUpdate(_)
            | SynchronizerActionData::MapSavingProgressUpdate(_)
            | SynchronizerActionData::MapDownloadingProgressUpdate(_)
            | SynchronizerActionData::CatchingUpProgressUpdate(_)
            | SynchronizerActionData::PeerDroppingProgressUpdate(_)
            | SynchronizerActionData::SavingForUpdate
            | SynchronizerActionData::SavingCountDown { .. }
            | SynchronizerActionData::BeginPause
            | SynchronizerActionData::EndPause
            | SynchronizerActionData::GameEnd => {
                trace!("Ignoring synchronizer action {} for peer {:?}", ty, action.peer_id);
            }
            SynchronizerActionData::IncreasedLatencyConfirm { .. } => {
                return Err(ClientError::UnexpectedSynchronizerAction(ty));
            }
        }
        Ok(())
    }

    fn run_step(&mut self) -> Result<(), ClientError> {
        while let Some(tick) = self.conn.update_tick {
            let Some(closure) = self.conn.tick_closures_received.remove(&tick) else {
                break;
            };
            self.step_tick(tick, closure)?;
        }
        self.send_heartbeat();
        Ok(())
    }

    fn step_tick(&mut self, tick: u32, closure: TickClosure) -> Result<(), ClientError> {
        trace!("Executing tick {}", tick);
        self.events.push_back(ClientEvent::Tick(tick));

        for action in closure.input_actions {
            self.handle_input_action(action);
        }
        for segment in closure.input_action_segments {
            self.conn.segments.push(segment);
        }
        for action in self.conn.segments.take_completed()? {
            self.handle_input_action(action);
        }

        self.conn.pacer.on_server_tick(tick);
        self.conn.update_tick = Some(tick.wrapping_add(1));
        Ok(())
    }

    fn handle_input_action(&mut self, action: InputAction) {
        let joined = match &action.data {
            InputActionData::PlayerJoinGame(join)
                if self.conn.peer_id == Some(join.peer_id) && self.conn.player_index.is_none() =>
            {
                Some(join.player_index)
            }
            _ => None,
        };
        self.events.push_back(ClientEvent::InputAction(action));
        if let Some(player_index) = joined {
            info!("Joined game as player {}", player_index);
            self.conn.player_index = Some(player_index);
            self.events.push_back(ClientEvent::JoinedGame { player_index });
        }
    }

    /// Closures for ticks at or past this bound would reach the server before
    /// it accepts them.
    fn send_window_end(&self) -> Option<u32> {
        self.conn
            .update_tick
            .map(|tick| tick.saturating_add(u32::from(self.conn.pacer.latency())))
    }

    fn send_heartbeat(&mut self) {
        let window_end = self.send_window_end();
        let heartbeat = Heartbeat {
            sequence_number: self.conn.client_sequence,
            tick_closures: self.conn.pacer.take_for_heartbeat(window_end),
            next_to_receive_server_tick_closure: self.conn.update_tick,
            synchronizer_actions: std::mem::take(&mut self.conn.synchronizer_actions_to_send),
            requests_for_heartbeat: Vec::new(),
        };
        self.conn.client_sequence = self.conn.client_sequence.wrapping_add(1);
        trace!(
            "Sending heartbeat {} with {} closures",
            heartbeat.sequence_number,
            heartbeat.tick_closures.len()
        );

        self.conn.sent_heartbeats.push_back(heartbeat.clone());
        while self.conn.sent_heartbeats.len() > self.config.heartbeat_history {
            self.conn.sent_heartbeats.pop_front();
        }
        self.events.push_back(ClientEvent::HeartbeatSent {
            sequence_number: heartbeat.sequence_number,
        });
        self.transmits
            .push_back(Message::ClientToServerHeartbeat(heartbeat));
    }
}
