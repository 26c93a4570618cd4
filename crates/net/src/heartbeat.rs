//! Heartbeats and the tick closures they carry.

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::input::{InputAction, InputActionSegment};
use crate::synchronizer::{Origin, SynchronizerAction};

/// Player index the first action of a closure is delta-encoded against.
pub const FIRST_PLAYER_INDEX_BASE: u16 = 0xFFFF;

/// Tick sent as "next expected" before any server closure has been seen.
pub const NO_TICK: u32 = u32::MAX;

/// Heartbeat flag: a heartbeat request list follows.
pub const HAS_HEARTBEAT_REQUESTS: u8 = 0x01;
/// Heartbeat flag: tick closures follow.
pub const HAS_TICK_CLOSURES: u8 = 0x02;
/// Heartbeat flag: exactly one closure, without a count prefix.
pub const HAS_SINGLE_TICK_CLOSURE: u8 = 0x04;
/// Heartbeat flag: every closure is empty and written as its tick only.
pub const ALL_TICK_CLOSURES_EMPTY: u8 = 0x08;
/// Heartbeat flag: synchronizer actions follow.
pub const HAS_SYNCHRONIZER_ACTIONS: u8 = 0x10;

/// Player commands that take effect on one simulation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickClosure {
    /// Tick the closure applies to.
    pub update_tick: u32,
    /// Whole actions, in application order.
    pub input_actions: Vec<InputAction>,
    /// Chunks of oversized actions.
    pub input_action_segments: Vec<InputActionSegment>,
}

impl TickClosure {
    /// Closure with no commands.
    pub fn empty(update_tick: u32) -> Self {
        Self {
            update_tick,
            ..Self::default()
        }
    }

    /// True when the closure carries nothing besides its tick.
    pub fn is_empty(&self) -> bool {
        self.input_actions.is_empty() && self.input_action_segments.is_empty()
    }

    /// Read a closure; with `is_empty` set only the tick is present.
    pub fn decode(r: &mut Reader<'_>, is_empty: bool) -> Result<Self, DecodeError> {
        let update_tick = r.read_u32()?;
        if is_empty {
            return Ok(Self::empty(update_tick));
        }

        let flags = r.read_so_u32()?;
        let has_segments = flags & 1 != 0;
        let mut last_player_index = FIRST_PLAYER_INDEX_BASE;
        let input_actions = r.read_n((flags >> 1) as usize, |r| {
            let action = InputAction::decode(r, last_player_index)?;
            last_player_index = action.player_index;
            Ok(action)
        })?;
        let input_action_segments = if has_segments {
            r.read_vec(InputActionSegment::decode)?
        } else {
            Vec::new()
        };

        Ok(Self {
            update_tick,
            input_actions,
            input_action_segments,
        })
    }

    /// Write a closure; with `write_empty` set only the tick is written.
    pub fn encode(&self, w: &mut Writer, write_empty: bool) -> Result<(), EncodeError> {
        w.write_u32(self.update_tick);
        if write_empty {
            return Ok(());
        }

        let count = u32::try_from(self.input_actions.len())
            .ok()
            .filter(|count| *count <= u32::MAX >> 1)
            .ok_or(EncodeError::ValueOutOfRange("input action count"))?;
        let has_segments = !self.input_action_segments.is_empty();
        w.write_so_u32(count << 1 | u32::from(has_segments));

        let mut last_player_index = FIRST_PLAYER_INDEX_BASE;
        for action in &self.input_actions {
            action.encode(w, last_player_index)?;
            last_player_index = action.player_index;
        }
        if has_segments {
            w.write_vec(&self.input_action_segments, |w, s| s.encode(w))?;
        }
        Ok(())
    }
}

/// Periodic envelope exchanged in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// Sender's heartbeat counter.
    pub sequence_number: u32,
    /// Tick closures, oldest first.
    pub tick_closures: Vec<TickClosure>,
    /// Next server tick closure the client expects; client-written heartbeats only.
    pub next_to_receive_server_tick_closure: Option<u32>,
    /// Lifecycle actions.
    pub synchronizer_actions: Vec<SynchronizerAction>,
    /// Sequence numbers of heartbeats the sender wants resent.
    pub requests_for_heartbeat: Vec<u32>,
}

impl Heartbeat {
    /// Flags byte describing which sections this heartbeat writes.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if !self.requests_for_heartbeat.is_empty() {
            flags |= HAS_HEARTBEAT_REQUESTS;
        }
        if !self.tick_closures.is_empty() {
            flags |= HAS_TICK_CLOSURES;
            if self.tick_closures.len() == 1 {
                flags |= HAS_SINGLE_TICK_CLOSURE;
            }
            if self.tick_closures.iter().all(TickClosure::is_empty) {
                flags |= ALL_TICK_CLOSURES_EMPTY;
            }
        }
        if !self.synchronizer_actions.is_empty() {
            flags |= HAS_SYNCHRONIZER_ACTIONS;
        }
        flags
    }

    /// Read a heartbeat written by `origin`.
    pub fn decode(r: &mut Reader<'_>, origin: Origin) -> Result<Self, DecodeError> {
        let flags = r.read_u8()?;
        let sequence_number = r.read_u32()?;

        let mut tick_closures = Vec::new();
        if flags & HAS_TICK_CLOSURES != 0 {
            let count = if flags & HAS_SINGLE_TICK_CLOSURE != 0 {
                1
            } else {
                r.read_so_u32()? as usize
            };
            let all_empty = flags & ALL_TICK_CLOSURES_EMPTY != 0;
            tick_closures = r.read_n(count, |r| TickClosure::decode(r, all_empty))?;
        }

        let next_to_receive_server_tick_closure = match origin {
            Origin::Client => Some(r.read_u32()?),
            Origin::Server => None,
        };

        let synchronizer_actions = if flags & HAS_SYNCHRONIZER_ACTIONS != 0 {
            r.read_vec(|r| SynchronizerAction::decode(r, origin))?
        } else {
            Vec::new()
        };

        let requests_for_heartbeat = if flags & HAS_HEARTBEAT_REQUESTS != 0 {
            r.read_vec(u32::decode)?
        } else {
            Vec::new()
        };

        Ok(Self {
            sequence_number,
            tick_closures,
            next_to_receive_server_tick_closure,
            synchronizer_actions,
            requests_for_heartbeat,
        })
    }

    /// Write as `origin`, choosing the most compact flag combination.
    pub fn encode(&self, w: &mut Writer, origin: Origin) -> Result<(), EncodeError> {
        let flags = self.flags();
        w.write_u8(flags);
        w.write_u32(self.sequence_number);

        let all_empty = flags & ALL_TICK_CLOSURES_EMPTY != 0;
        if flags & HAS_SINGLE_TICK_CLOSURE != 0 {
            self.tick_closures[0].encode(w, all_empty)?;
        } else if flags & HAS_TICK_CLOSURES != 0 {
            w.write_vec(&self.tick_closures, |w, c| c.encode(w, all_empty))?;
        }

        if origin == Origin::Client {
            w.write_u32(self.next_to_receive_server_tick_closure.unwrap_or(NO_TICK));
        }

        if flags & HAS_SYNCHRONIZER_ACTIONS != 0 {
            w.write_vec(&self.synchronizer_actions, |w, a| a.encode(w, origin))?;
        }
        if flags & HAS_HEARTBEAT_REQUESTS != 0 {
            w.write_vec(&self.requests_for_heartbeat, |w, v| v.encode(w))?;
        }
        Ok(())
    }
}
