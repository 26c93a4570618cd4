//! Datagram framing.
//!
//! Layout of one datagram:
//!
//! ```text
//! u8   flags: bits 0-4 message type, 0x20 random, 0x40 fragmented, 0x80 last fragment
//! u16  message id | 0x8000 confirm flag   (fragmented, or a connection request type)
//! u8   fragment number                    (fragmented only)
//! u8   confirm count + count * (u16, u16) (confirm flag only)
//! ..   payload
//! ```

use crate::codec::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::message::NetworkMessageType;

/// Mask of the message type bits in the flags byte.
pub const MESSAGE_TYPE_MASK: u8 = 0x1f;
/// Random padding bit.
pub const RANDOM_FLAG: u8 = 0x20;
/// Fragmented bit.
pub const FRAGMENTED_FLAG: u8 = 0x40;
/// Last fragment bit.
pub const LAST_FRAGMENT_FLAG: u8 = 0x80;
/// Largest message id.
pub const MAX_MESSAGE_ID: u16 = 0x7fff;
/// Confirm records present bit of the message id word.
pub const CONFIRM_FLAG: u16 = 0x8000;

/// Acknowledgment pair piggy-backed on id-bearing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfirmRecord(pub u16, pub u16);

/// One datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Raw five-bit message type; unknown values are resolved by the message layer.
    pub message_type: u8,
    /// Random padding bit, preserved as read.
    pub random: bool,
    /// Frame is one fragment of a larger message.
    pub fragmented: bool,
    /// Frame is the final fragment.
    pub last_fragment: bool,
    /// Message id, meaningful when [`Frame::has_message_id`].
    pub message_id: u16,
    /// Fragment index, meaningful when fragmented.
    pub fragment_number: u8,
    /// Acknowledgments carried by this frame.
    pub confirm_records: Vec<ConfirmRecord>,
    /// Message body or fragment bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Unfragmented frame around a complete message body.
    pub fn new(message_type: NetworkMessageType, payload: Vec<u8>) -> Self {
        Self {
            message_type: message_type as u8,
            payload,
            ..Self::default()
        }
    }

    /// True when the header carries the message id word.
    pub fn has_message_id(&self) -> bool {
        self.fragmented
            || NetworkMessageType::try_from(self.message_type)
                .map(NetworkMessageType::always_has_message_id)
                .unwrap_or(false)
    }

    /// Parse one datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let flags = r.read_u8()?;
        let mut frame = Self {
            message_type: flags & MESSAGE_TYPE_MASK,
            random: flags & RANDOM_FLAG != 0,
            fragmented: flags & FRAGMENTED_FLAG != 0,
            last_fragment: flags & LAST_FRAGMENT_FLAG != 0,
            ..Self::default()
        };

        if frame.has_message_id() {
            let word = r.read_u16()?;
            frame.message_id = word & MAX_MESSAGE_ID;
            if frame.fragmented {
                frame.fragment_number = r.read_u8()?;
            }
            if word & CONFIRM_FLAG != 0 {
                let count = usize::from(r.read_u8()?);
                frame.confirm_records =
                    r.read_n(count, |r| Ok(ConfirmRecord(r.read_u16()?, r.read_u16()?)))?;
            }
        }

        frame.payload = r.read_rest();
        Ok(frame)
    }

    /// Serialize to one datagram.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        let mut flags = self.message_type & MESSAGE_TYPE_MASK;
        if self.random {
            flags |= RANDOM_FLAG;
        }
        if self.fragmented {
            flags |= FRAGMENTED_FLAG;
        }
        if self.last_fragment {
            flags |= LAST_FRAGMENT_FLAG;
        }
        w.write_u8(flags);

        if self.has_message_id() {
            if self.message_id > MAX_MESSAGE_ID {
                return Err(EncodeError::MessageIdOverflow(self.message_id));
            }
            let has_confirm = !self.confirm_records.is_empty();
            w.write_u16(self.message_id | if has_confirm { CONFIRM_FLAG } else { 0 });
            if self.fragmented {
                w.write_u8(self.fragment_number);
            }
            if has_confirm {
                let count = u8::try_from(self.confirm_records.len())
                    .map_err(|_| EncodeError::TooManyConfirmRecords(self.confirm_records.len()))?;
                w.write_u8(count);
                for ConfirmRecord(a, b) in &self.confirm_records {
                    w.write_u16(*a);
                    w.write_u16(*b);
                }
            }
        } else if !self.confirm_records.is_empty() {
            return Err(EncodeError::ConfirmWithoutMessageId);
        }

        w.write_bytes(&self.payload);
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorKind;

    #[test]
    fn test_plain_frame_has_no_header_words() {
        let frame = Frame::new(NetworkMessageType::ClientToServerHeartbeat, vec![9, 9]);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![6, 9, 9]);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_connection_request_always_carries_id() {
        let mut frame = Frame::new(NetworkMessageType::ConnectionRequest, vec![1]);
        frame.message_id = 0x1234;
        frame.random = true;
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![0x22, 0x34, 0x12, 1]);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_fragment_with_confirms_roundtrip() {
        let frame = Frame {
            message_type: NetworkMessageType::ServerToClientHeartbeat as u8,
            random: false,
            fragmented: true,
            last_fragment: true,
            message_id: 5,
            fragment_number: 2,
            confirm_records: vec![ConfirmRecord(1, 2), ConfirmRecord(0xffff, 0)],
            payload: vec![0xaa],
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0xc7, 0x05, 0x80, 2, 2, 1, 0, 2, 0, 0xff, 0xff, 0, 0, 0xaa]
        );
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_unknown_type_is_not_a_frame_error() {
        let frame = Frame::decode(&[0x1f, 1, 2]).unwrap();
        assert_eq!(frame.message_type, 0x1f);
        assert_eq!(frame.payload, vec![1, 2]);
    }

    #[test]
    fn test_truncated_header() {
        let err = Frame::decode(&[0x42, 0x01]).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::UnexpectedEof { .. }));
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn test_encode_limits() {
        let mut frame = Frame::new(NetworkMessageType::Empty, Vec::new());
        frame.confirm_records.push(ConfirmRecord(0, 0));
        assert_eq!(frame.encode(), Err(EncodeError::ConfirmWithoutMessageId));

        frame.fragmented = true;
        frame.message_id = 0x8000;
        assert_eq!(frame.encode(), Err(EncodeError::MessageIdOverflow(0x8000)));
    }
}
