#![warn(missing_docs)]
//! Wire protocol of the multiplayer UDP connection: binary codec, frames,
//! fragmentation, the message catalog and the datagram transport.

pub mod codec;
pub mod data;
mod error;
pub mod fragment;
pub mod frame;
pub mod heartbeat;
pub mod input;
pub mod message;
pub mod synchronizer;
pub mod transport;

pub use codec::{decode_exact, encode_to_vec, Decode, Encode, Reader, Writer};
pub use data::{
    ClientMultiplayerState, ConnectionRequestStatus, Direction, DisconnectReason, MapPosition,
    ModId, ModVersion, PackedDirection, PropertyTree, PropertyValue, SmallProgress, Version,
};
pub use error::{DecodeError, DecodeErrorKind, EncodeError, TransportError};
pub use fragment::{fragment, MessageIdCounter, Reassembler};
pub use frame::{ConfirmRecord, Frame};
pub use heartbeat::{Heartbeat, TickClosure, FIRST_PLAYER_INDEX_BASE, NO_TICK};
pub use input::{InputAction, InputActionData, InputActionSegment, InputActionType};
pub use message::{
    ClientPeerInfo, ClientsPeerInfo, ConnectionAcceptOrDeny, ConnectionRequest,
    ConnectionRequestReply, ConnectionRequestReplyConfirm, Message, NetworkMessageType,
};
pub use synchronizer::{Origin, SynchronizerAction, SynchronizerActionData, SynchronizerActionType};
pub use transport::{
    MessageCodec, Observer, Received, TransportEvent, UdpTransport, DEFAULT_MAX_FRAGMENT_PAYLOAD,
};
