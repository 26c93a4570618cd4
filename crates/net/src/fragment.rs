//! Fragmentation of oversized messages and reassembly of received fragments.

use crate::error::EncodeError;
use crate::frame::{Frame, MAX_MESSAGE_ID};
use crate::message::NetworkMessageType;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// Fragment numbers are one byte wide.
pub const MAX_FRAGMENTS: usize = 256;
/// Partially received messages kept at once.
pub const MAX_IN_FLIGHT: usize = 128;
/// Completed message ids remembered to drop late duplicates.
pub const FINISHED_HISTORY: usize = 256;

/// Split a message body into frames carrying at most `max_payload` body bytes each.
///
/// Bodies that fit are sent as one unfragmented frame.
pub fn fragment(
    message_type: NetworkMessageType,
    body: Vec<u8>,
    message_id: u16,
    max_payload: usize,
) -> Result<Vec<Frame>, EncodeError> {
    let max_payload = max_payload.max(1);
    if body.len() <= max_payload {
        let mut frame = Frame::new(message_type, body);
        frame.message_id = message_id;
        return Ok(vec![frame]);
    }

    let fragments = body.len().div_ceil(max_payload);
    if fragments > MAX_FRAGMENTS {
        return Err(EncodeError::TooManyFragments {
            len: body.len(),
            fragments,
        });
    }
    Ok(body
        .chunks(max_payload)
        .enumerate()
        .map(|(index, chunk)| Frame {
            message_type: message_type as u8,
            fragmented: true,
            last_fragment: index + 1 == fragments,
            message_id,
            // Bounded by MAX_FRAGMENTS above.
            fragment_number: index as u8,
            payload: chunk.to_vec(),
            ..Frame::default()
        })
        .collect())
}

/// Wrapping 15-bit message id source, one per connection.
#[derive(Debug, Default, Clone)]
pub struct MessageIdCounter {
    next: u16,
}

impl MessageIdCounter {
    /// Take the next id.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = (self.next + 1) & MAX_MESSAGE_ID;
        id
    }
}

#[derive(Debug)]
struct FragmentAssembly {
    message_type: u8,
    fragments: Vec<Option<Vec<u8>>>,
    received_count: usize,
    total_count: Option<usize>,
}

impl FragmentAssembly {
    fn new(message_type: u8) -> Self {
        Self {
            message_type,
            fragments: Vec::new(),
            received_count: 0,
            total_count: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.total_count == Some(self.received_count)
    }

    fn insert(&mut self, message_id: u16, frame: Frame) {
        let index = usize::from(frame.fragment_number);
        if frame.last_fragment {
            match self.total_count {
                None => {
                    self.total_count = Some(index + 1);
                    self.fragments.resize(index + 1, None);
                    // Fragments past the end were bogus.
                    self.received_count = self.fragments.iter().flatten().count();
                }
                Some(total) if total != index + 1 => {
                    warn!(
                        "Conflicting last fragment {} for message {} (expected {})",
                        index,
                        message_id,
                        total - 1
                    );
                    return;
                }
                Some(_) => {}
            }
        }

        if let Some(total) = self.total_count {
            if index >= total {
                warn!(
                    "Fragment {} of message {} beyond last fragment {}",
                    index,
                    message_id,
                    total - 1
                );
                return;
            }
        }

        if self.fragments.len() <= index {
            self.fragments.resize(index + 1, None);
        }
        let slot = &mut self.fragments[index];
        if slot.is_none() {
            *slot = Some(frame.payload);
            self.received_count += 1;
        } else {
            trace!("Duplicate fragment {} of message {}", index, message_id);
        }
    }

    fn assemble(self) -> Vec<u8> {
        self.fragments.into_iter().flatten().flatten().collect()
    }
}

/// Reassembles fragmented messages received out of order or duplicated.
#[derive(Debug, Default)]
pub struct Reassembler {
    in_flight: HashMap<u16, FragmentAssembly>,
    arrival_order: VecDeque<u16>,
    finished: VecDeque<u16>,
}

impl Reassembler {
    /// Empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partially received messages.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Record one fragment. Returns `(message_type, body)` once every fragment
    /// of its message has arrived; that happens exactly once per message.
    pub fn push(&mut self, frame: Frame) -> Option<(u8, Vec<u8>)> {
        let id = frame.message_id;
        if self.finished.contains(&id) {
            trace!("Dropping fragment {} of finished message {}", frame.fragment_number, id);
            return None;
        }

        if !self.in_flight.contains_key(&id) {
            if self.in_flight.len() >= MAX_IN_FLIGHT {
                self.evict_oldest();
            }
            self.in_flight.insert(id, FragmentAssembly::new(frame.message_type));
            self.arrival_order.push_back(id);
        }

        let assembly = self.in_flight.get_mut(&id)?;
        assembly.insert(id, frame);
        if !assembly.is_complete() {
            return None;
        }

        let assembly = self.in_flight.remove(&id)?;
        self.arrival_order.retain(|pending| *pending != id);
        self.finished.push_back(id);
        if self.finished.len() > FINISHED_HISTORY {
            self.finished.pop_front();
        }
        debug!(
            "Reassembled message {} from {} fragments",
            id, assembly.received_count
        );
        Some((assembly.message_type, assembly.assemble()))
    }

    /// Drop every partial and finished record.
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.arrival_order.clear();
        self.finished.clear();
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.arrival_order.pop_front() {
            warn!("Abandoning incomplete message {}: too many in flight", oldest);
            self.in_flight.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(len: usize, max: usize) -> Vec<Frame> {
        let body: Vec<u8> = (0..len).map(|i| i as u8).collect();
        fragment(NetworkMessageType::ServerToClientHeartbeat, body, 17, max).unwrap()
    }

    #[test]
    fn test_small_body_is_unfragmented() {
        let out = frames(10, 10);
        assert_eq!(out.len(), 1);
        assert!(!out[0].fragmented);
    }

    #[test]
    fn test_split_marks_last_fragment() {
        let out = frames(25, 10);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.iter().map(|f| f.fragment_number).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(out.iter().all(|f| f.fragmented && f.message_id == 17));
        assert_eq!(
            out.iter().map(|f| f.last_fragment).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(out[2].payload.len(), 5);
    }

    #[test]
    fn test_too_many_fragments() {
        let err = fragment(NetworkMessageType::TransferBlock, vec![0; 257], 0, 1).unwrap_err();
        assert_eq!(
            err,
            EncodeError::TooManyFragments {
                len: 257,
                fragments: 257
            }
        );
    }

    #[test]
    fn test_reassembly_out_of_order_with_duplicates() {
        let out = frames(25, 10);
        let expected: Vec<u8> = (0..25).collect();
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(out[2].clone()), None);
        assert_eq!(reassembler.push(out[0].clone()), None);
        assert_eq!(reassembler.push(out[0].clone()), None);
        let (ty, body) = reassembler.push(out[1].clone()).unwrap();
        assert_eq!(ty, NetworkMessageType::ServerToClientHeartbeat as u8);
        assert_eq!(body, expected);
        assert_eq!(reassembler.in_flight(), 0);

        // Late duplicates of a finished message are ignored.
        assert_eq!(reassembler.push(out[1].clone()), None);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_first_write_wins() {
        let out = frames(20, 10);
        let mut reassembler = Reassembler::new();
        let mut tampered = out[0].clone();
        reassembler.push(out[0].clone());
        tampered.payload = vec![0xee; 10];
        reassembler.push(tampered);
        let (_, body) = reassembler.push(out[1].clone()).unwrap();
        assert_eq!(body, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_in_flight_is_bounded() {
        let mut reassembler = Reassembler::new();
        for id in 0..(MAX_IN_FLIGHT as u16 + 5) {
            let mut frame = frames(20, 10).remove(0);
            frame.message_id = id;
            reassembler.push(frame);
        }
        assert_eq!(reassembler.in_flight(), MAX_IN_FLIGHT);
        reassembler.clear();
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_message_id_wraps_at_15_bits() {
        let mut ids = MessageIdCounter { next: MAX_MESSAGE_ID };
        assert_eq!(ids.next_id(), MAX_MESSAGE_ID);
        assert_eq!(ids.next_id(), 0);
    }
}
