//! Error types shared by the codec, the message catalog and the transport.

use crate::input::InputActionType;
use crate::synchronizer::SynchronizerActionType;
use thiserror::Error;

/// Failure to interpret received bytes.
///
/// Carries the byte offset into the buffer being decoded so a malformed
/// capture can be located.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at byte offset {offset})")]
pub struct DecodeError {
    /// Offset of the read that failed.
    pub offset: usize,
    /// What went wrong.
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    /// Build an error for the given offset.
    pub fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
}

/// Classification of decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    /// Read would run past the end of the buffer.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// Boolean byte other than 0 or 1.
    #[error("invalid boolean value {0}")]
    InvalidBool(u8),
    /// String payload was not valid UTF-8.
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    /// Top-level message type with no known body layout.
    #[error("unknown network message type {0}")]
    UnknownMessageType(u8),
    /// Input action tag outside the known table.
    #[error("unknown input action type {0}")]
    UnknownInputAction(u8),
    /// Known input action whose payload layout is not implemented.
    #[error("unimplemented input action {0:?}")]
    UnimplementedInputAction(InputActionType),
    /// Synchronizer action tag outside the known table.
    #[error("unknown synchronizer action type {0}")]
    UnknownSynchronizerAction(u8),
    /// Known synchronizer action that is never sent in this protocol revision.
    #[error("unsupported synchronizer action {0:?}")]
    UnsupportedSynchronizerAction(SynchronizerActionType),
    /// Enumerated field held a value outside its range.
    #[error("invalid {name} value {value}")]
    InvalidEnumValue {
        /// Field type name.
        name: &'static str,
        /// Raw value read.
        value: u32,
    },
    /// Message body was followed by unread bytes.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

/// Failure to serialize a value that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Message ids are 15 bits wide.
    #[error("message id {0} does not fit in 15 bits")]
    MessageIdOverflow(u16),
    /// Confirm record count is a single byte.
    #[error("{0} confirm records exceed the limit of 255")]
    TooManyConfirmRecords(usize),
    /// Confirm records can only ride on frames that carry a message id.
    #[error("confirm records on a frame without a message id")]
    ConfirmWithoutMessageId,
    /// Fragment numbers are a single byte.
    #[error("payload of {len} bytes needs {fragments} fragments, limit is 256")]
    TooManyFragments {
        /// Payload length.
        len: usize,
        /// Fragments required.
        fragments: usize,
    },
    /// Input action data does not match the payload shape of its type.
    #[error("input action {ty:?} cannot carry {data} data")]
    InputActionMismatch {
        /// Declared action type.
        ty: InputActionType,
        /// Name of the data variant supplied.
        data: &'static str,
    },
    /// Input action whose payload layout is not implemented.
    #[error("unimplemented input action {0:?}")]
    UnimplementedInputAction(InputActionType),
    /// Synchronizer action that is never sent in this protocol revision.
    #[error("unsupported synchronizer action {0:?}")]
    UnsupportedSynchronizerAction(SynchronizerActionType),
    /// Server-direction synchronizer actions need a peer id suffix.
    #[error("server-direction synchronizer action {0:?} has no peer id")]
    MissingPeerId(SynchronizerActionType),
    /// Length or count wider than its prefix allows.
    #[error("{0} does not fit in its wire field")]
    ValueOutOfRange(&'static str),
}

/// Errors raised by the datagram transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    /// Outbound message could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}
