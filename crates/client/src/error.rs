//! Client error taxonomy.

use facnet_net::{
    ConnectionRequestStatus, DecodeError, DisconnectReason, EncodeError, NetworkMessageType,
    SynchronizerActionType, TransportError,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the client session and its driver.
///
/// Every error other than [`ClientError::TickTooEarly`] and
/// [`ClientError::NotInGame`] ends the session; it is also broadcast as a
/// [`ClientEvent::Error`](crate::ClientEvent::Error).
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Received data could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Outgoing data could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    /// Socket failure.
    #[error("socket error: {0}")]
    Io(Arc<std::io::Error>),
    /// The server refused the connection.
    #[error("{status}")]
    ConnectionRefused {
        /// Refusal reason reported by the server.
        status: ConnectionRequestStatus,
    },
    /// The server disconnected this peer.
    #[error("disconnected: {reason}")]
    Disconnected {
        /// Reason reported by the server.
        reason: DisconnectReason,
    },
    /// A message that is not valid in the current state.
    #[error("unexpected {0} message")]
    UnexpectedMessage(NetworkMessageType),
    /// A synchronizer action the client does not handle.
    #[error("unexpected synchronizer action {0}")]
    UnexpectedSynchronizerAction(SynchronizerActionType),
    /// Input actions require a joined game.
    #[error("cannot send input actions before having joined the game")]
    NotInGame,
    /// The tick closure for the requested tick was already produced.
    #[error("cannot send in tick {tick}, earliest open tick is {earliest}")]
    TickTooEarly {
        /// Requested tick.
        tick: u32,
        /// First tick still accepting actions.
        earliest: u32,
    },
    /// A segmented input action had a gap when its last segment arrived.
    #[error("input action segment group {id} of player {player_index} is incomplete")]
    SegmentOutOfOrder {
        /// Player the action belongs to.
        player_index: u16,
        /// Segment group id.
        id: u32,
    },
    /// `connect` did not finish in time.
    #[error("timed out waiting to join the game")]
    Timeout,
    /// The client has no open transport.
    #[error("client is closed")]
    Closed,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(err) => err.into(),
            TransportError::Encode(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_displays_status_name() {
        let err = ClientError::ConnectionRefused {
            status: ConnectionRequestStatus::PrototypeChecksumMismatch,
        };
        assert_eq!(err.to_string(), "PrototypeChecksumMismatch");
    }

    #[test]
    fn test_transport_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ClientError::from(TransportError::Io(io)),
            ClientError::Io(_)
        ));
        assert!(matches!(
            ClientError::from(TransportError::Encode(EncodeError::MessageIdOverflow(0x8000))),
            ClientError::Encode(_)
        ));
    }
}
