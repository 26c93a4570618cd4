//! Notifications emitted by the client.

use crate::ClientError;
use facnet_net::{
    ClientMultiplayerState, ConnectionAcceptOrDeny, ConnectionRequestReply, DecodeError, Heartbeat,
    InputAction, SynchronizerAction,
};

/// Something the owner of a client may want to react to.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server answered the connection request.
    ConnectionRequestReply(ConnectionRequestReply),
    /// The server accepted or refused the connection.
    ConnectionAcceptOrDeny(Box<ConnectionAcceptOrDeny>),
    /// A heartbeat arrived from the server.
    ServerHeartbeat(Heartbeat),
    /// A server tick was executed.
    Tick(u32),
    /// An input action took effect, including reassembled segmented ones.
    InputAction(InputAction),
    /// A synchronizer action arrived from the server.
    SynchronizerAction(SynchronizerAction),
    /// A heartbeat was queued for sending.
    HeartbeatSent {
        /// Its sequence number.
        sequence_number: u32,
    },
    /// The local state machine moved.
    StateChanged(ClientMultiplayerState),
    /// This client's player joined the game.
    JoinedGame {
        /// Player index assigned by the server.
        player_index: u16,
    },
    /// A datagram was dropped because it failed to decode.
    Malformed(DecodeError),
    /// The session ended with an error.
    Error(ClientError),
    /// The client was closed.
    Closed,
}
