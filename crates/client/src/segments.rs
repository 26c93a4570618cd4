//! Reassembly of segmented input actions.

use crate::ClientError;
use facnet_net::{InputAction, InputActionSegment, Reader};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SegmentGroup {
    segments: BTreeMap<u32, InputActionSegment>,
    complete: bool,
}

/// Buffers segments per `(player_index, id)` until their groups close.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    groups: HashMap<(u16, u32), SegmentGroup>,
}

impl SegmentBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups still open or awaiting reassembly.
    pub fn pending(&self) -> usize {
        self.groups.len()
    }

    /// Buffer one segment; the first copy of each segment number is kept.
    pub fn push(&mut self, segment: InputActionSegment) {
        let key = (segment.player_index, segment.id);
        let group = self.groups.entry(key).or_default();
        if segment.is_last() {
            group.complete = true;
        }
        if group.segments.contains_key(&segment.segment_number) {
            warn!(
                "Ignoring duplicate segment {} of action {} from player {}",
                segment.segment_number, segment.id, segment.player_index
            );
            return;
        }
        group.segments.insert(segment.segment_number, segment);
    }

    /// Decode every group whose last segment has arrived.
    ///
    /// Called once all segments of a tick closure are buffered, so segments of
    /// one closure may arrive in any order. A closed group with a gap is an error.
    pub fn take_completed(&mut self) -> Result<Vec<InputAction>, ClientError> {
        let mut keys: Vec<_> = self
            .groups
            .iter()
            .filter(|(_, group)| group.complete)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();

        let mut actions = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(group) = self.groups.remove(&key) {
                actions.push(reassemble(key, group)?);
            }
        }
        Ok(actions)
    }

    /// Drop every buffered segment.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

fn reassemble(
    (player_index, id): (u16, u32),
    group: SegmentGroup,
) -> Result<InputAction, ClientError> {
    let out_of_order = || ClientError::SegmentOutOfOrder { player_index, id };

    let (&last_number, last) = group.segments.last_key_value().ok_or_else(out_of_order)?;
    let ty = last.ty;
    let contiguous = group.segments.keys().copied().eq(0..=last_number);
    if !contiguous || !last.is_last() {
        return Err(out_of_order());
    }

    let payload: Vec<u8> = group
        .segments
        .into_values()
        .flat_map(|segment| segment.payload)
        .collect();
    debug!(
        "Reassembled {:?} from {} segments of player {}",
        ty,
        last_number + 1,
        player_index
    );

    let r = &mut Reader::new(&payload);
    let action = InputAction::decode_payload(r, ty, 0)?;
    r.finish()?;
    Ok(action)
}
