//! Tick closure pacing.
//!
//! The server runs `latency` ticks ahead of the closures it has received from
//! this client. Executing server tick `T` produces the client's closure for
//! `T + latency`; queued actions ride in the closure of the tick they target.

use crate::ClientError;
use facnet_net::{InputAction, SynchronizerActionData, TickClosure};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// Most tick closures carried by one heartbeat.
pub const MAX_TICK_CLOSURES_PER_HEARTBEAT: usize = 3;
/// Most tick closures produced by one executed server tick. A start tick far
/// behind the server is caught up over several ticks.
pub const MAX_TICK_CLOSURES_PER_SERVER_TICK: u32 = 60;

/// Outgoing tick closure queue for one session.
#[derive(Debug, Default)]
pub struct TickPacer {
    latency: u8,
    next_tick_closure_to_send: Option<u32>,
    actions_to_send: BTreeMap<u32, Vec<InputAction>>,
    closures_to_send: VecDeque<TickClosure>,
}

impl TickPacer {
    /// Pacer for the latency announced on acceptance.
    pub fn new(latency: u8) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Current latency in ticks.
    pub fn latency(&self) -> u8 {
        self.latency
    }

    /// Next tick a closure will be produced for, once sending has started.
    pub fn next_tick_closure_to_send(&self) -> Option<u32> {
        self.next_tick_closure_to_send
    }

    /// Closures produced but not yet sent.
    pub fn pending_closures(&self) -> usize {
        self.closures_to_send.len()
    }

    /// Begin producing closures at `first_tick`.
    pub fn start(&mut self, first_tick: u32) {
        debug!("Sending tick closures from tick {}", first_tick);
        self.next_tick_closure_to_send = Some(first_tick);
    }

    /// First tick an action can still be queued for.
    ///
    /// `update_tick` is the next server tick the client will execute.
    pub fn earliest_open_tick(&self, update_tick: u32) -> Option<u32> {
        let next = self.next_tick_closure_to_send?;
        Some(next.max(update_tick.saturating_add(u32::from(self.latency))))
    }

    /// Queue an action for the closure of `tick`.
    pub fn queue(&mut self, tick: u32, action: InputAction) -> Result<(), ClientError> {
        if let Some(earliest) = self.next_tick_closure_to_send {
            if tick < earliest {
                return Err(ClientError::TickTooEarly { tick, earliest });
            }
        }
        self.actions_to_send.entry(tick).or_default().push(action);
        Ok(())
    }

    /// Produce the closures that become due once server tick `tick` executed.
    pub fn on_server_tick(&mut self, tick: u32) {
        let Some(mut next) = self.next_tick_closure_to_send else {
            return;
        };
        let due = tick.saturating_add(u32::from(self.latency));
        let mut produced = 0;
        while next <= due && produced < MAX_TICK_CLOSURES_PER_SERVER_TICK {
            let input_actions = self.actions_to_send.remove(&next).unwrap_or_default();
            self.closures_to_send.push_back(TickClosure {
                update_tick: next,
                input_actions,
                input_action_segments: Vec::new(),
            });
            produced += 1;
            match next.checked_add(1) {
                Some(following) => next = following,
                None => {
                    warn!("Tick counter exhausted, no further tick closures");
                    self.next_tick_closure_to_send = None;
                    return;
                }
            }
        }
        if next <= due {
            debug!("Tick closures {} behind server tick {}", due - next + 1, tick);
        }
        self.next_tick_closure_to_send = Some(next);
    }

    /// Apply a latency change.
    ///
    /// An increase skips the ticks the wider window jumps over and returns the
    /// confirmation to send; actions queued for skipped ticks move to the first
    /// tick after them.
    pub fn change_latency(
        &mut self,
        latency: u8,
        update_tick: Option<u32>,
    ) -> Option<SynchronizerActionData> {
        let old = self.latency;
        self.latency = latency;
        if latency <= old {
            debug!("Latency lowered from {} to {}", old, latency);
            return None;
        }
        let update_tick = update_tick?;

        let first_tick_to_skip = update_tick.saturating_add(u32::from(old));
        let resume = update_tick.saturating_add(u32::from(latency));
        warn!(
            "Latency raised from {} to {}, skipping ticks {}..{}",
            old, latency, first_tick_to_skip, resume
        );

        if let Some(next) = self.next_tick_closure_to_send.as_mut() {
            *next = (*next).max(resume);
            let later = self.actions_to_send.split_off(&resume);
            let skipped = std::mem::replace(&mut self.actions_to_send, later);
            if !skipped.is_empty() {
                let moved: Vec<InputAction> = skipped.into_values().flatten().collect();
                debug!("Moving {} queued actions to tick {}", moved.len(), resume);
                let target = self.actions_to_send.entry(resume).or_default();
                target.splice(0..0, moved);
            }
        }

        Some(SynchronizerActionData::IncreasedLatencyConfirm {
            first_tick_to_skip,
            ticks_to_skip: latency - old,
        })
    }

    /// Take the closures that may go out in the next heartbeat.
    ///
    /// Only closures for ticks before `window_end` are sent, oldest first and
    /// at most [`MAX_TICK_CLOSURES_PER_HEARTBEAT`] at a time.
    pub fn take_for_heartbeat(&mut self, window_end: Option<u32>) -> Vec<TickClosure> {
        let Some(window_end) = window_end else {
            return Vec::new();
        };
        let mut closures = Vec::new();
        while closures.len() < MAX_TICK_CLOSURES_PER_HEARTBEAT {
            match self.closures_to_send.front() {
                Some(closure) if closure.update_tick < window_end => {
                    closures.extend(self.closures_to_send.pop_front());
                }
                _ => break,
            }
        }
        closures
    }

    /// Drop produced closures that were not sent yet.
    pub fn discard_unsent(&mut self) {
        self.closures_to_send.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facnet_net::InputActionType;

    fn action() -> InputAction {
        InputAction::empty(InputActionType::StopWalking, 1)
    }

    fn ticks(closures: &[TickClosure]) -> Vec<u32> {
        closures.iter().map(|c| c.update_tick).collect()
    }

    #[test]
    fn test_nothing_before_start() {
        let mut pacer = TickPacer::new(2);
        pacer.on_server_tick(100);
        assert_eq!(pacer.pending_closures(), 0);
        pacer.queue(5, action()).unwrap();
    }

    #[test]
    fn test_closure_produced_latency_ahead() {
        let mut pacer = TickPacer::new(2);
        pacer.start(10);
        pacer.queue(11, action()).unwrap();
        pacer.on_server_tick(8);
        pacer.on_server_tick(9);
        let closures = pacer.take_for_heartbeat(Some(12));
        assert_eq!(ticks(&closures), vec![10, 11]);
        assert!(closures[0].input_actions.is_empty());
        assert_eq!(closures[1].input_actions, vec![action()]);
        assert_eq!(pacer.next_tick_closure_to_send(), Some(12));
    }

    #[test]
    fn test_heartbeat_cap_and_window() {
        let mut pacer = TickPacer::new(2);
        pacer.start(10);
        for tick in 8..=12 {
            pacer.on_server_tick(tick);
        }
        assert_eq!(pacer.pending_closures(), 5);
        assert_eq!(ticks(&pacer.take_for_heartbeat(Some(15))), vec![10, 11, 12]);
        assert_eq!(ticks(&pacer.take_for_heartbeat(Some(14))), vec![13]);
        assert_eq!(ticks(&pacer.take_for_heartbeat(None)), Vec::<u32>::new());
        assert_eq!(ticks(&pacer.take_for_heartbeat(Some(15))), vec![14]);
    }

    #[test]
    fn test_queue_rejects_produced_ticks() {
        let mut pacer = TickPacer::new(2);
        pacer.start(10);
        pacer.on_server_tick(8);
        assert!(matches!(
            pacer.queue(10, action()),
            Err(ClientError::TickTooEarly {
                tick: 10,
                earliest: 11
            })
        ));
        assert_eq!(pacer.earliest_open_tick(9), Some(11));
        assert_eq!(pacer.earliest_open_tick(12), Some(14));
    }

    #[test]
    fn test_latency_increase_skips_ticks() {
        let mut pacer = TickPacer::new(2);
        pacer.start(10);
        for tick in 8..20 {
            pacer.on_server_tick(tick);
        }
        assert_eq!(pacer.next_tick_closure_to_send(), Some(22));
        pacer.queue(23, action()).unwrap();
        pacer.queue(26, action()).unwrap();

        let confirm = pacer.change_latency(5, Some(20));
        assert_eq!(
            confirm,
            Some(SynchronizerActionData::IncreasedLatencyConfirm {
                first_tick_to_skip: 22,
                ticks_to_skip: 3
            })
        );
        assert_eq!(pacer.latency(), 5);
        assert_eq!(pacer.next_tick_closure_to_send(), Some(25));

        pacer.discard_unsent();
        pacer.on_server_tick(20);
        pacer.on_server_tick(21);
        let closures = pacer.take_for_heartbeat(Some(27));
        assert_eq!(ticks(&closures), vec![25, 26]);
        assert_eq!(closures[0].input_actions.len(), 1);
        assert_eq!(closures[1].input_actions.len(), 1);
    }

    #[test]
    fn test_last_tick_does_not_overflow() {
        let mut pacer = TickPacer::new(2);
        pacer.start(u32::MAX - 1);
        pacer.on_server_tick(u32::MAX - 1);
        let closures = pacer.take_for_heartbeat(Some(u32::MAX));
        assert_eq!(ticks(&closures), vec![u32::MAX - 1]);
        assert_eq!(pacer.pending_closures(), 1);
        assert_eq!(pacer.next_tick_closure_to_send(), None);

        pacer.on_server_tick(u32::MAX);
        assert_eq!(pacer.pending_closures(), 1);
    }

    #[test]
    fn test_far_behind_start_is_caught_up_in_bounded_steps() {
        let mut pacer = TickPacer::new(2);
        pacer.start(0);
        pacer.on_server_tick(1_000);
        assert_eq!(
            pacer.pending_closures(),
            MAX_TICK_CLOSURES_PER_SERVER_TICK as usize
        );
        assert_eq!(
            pacer.next_tick_closure_to_send(),
            Some(MAX_TICK_CLOSURES_PER_SERVER_TICK)
        );

        pacer.on_server_tick(1_001);
        assert_eq!(
            pacer.pending_closures(),
            2 * MAX_TICK_CLOSURES_PER_SERVER_TICK as usize
        );
        let closures = pacer.take_for_heartbeat(Some(1_003));
        assert_eq!(ticks(&closures), vec![0, 1, 2]);
    }

    #[test]
    fn test_latency_decrease_pauses_production() {
        let mut pacer = TickPacer::new(4);
        pacer.start(14);
        pacer.on_server_tick(10);
        assert_eq!(pacer.change_latency(2, Some(11)), None);
        pacer.discard_unsent();
        pacer.on_server_tick(11);
        pacer.on_server_tick(12);
        assert_eq!(pacer.pending_closures(), 0);
        pacer.on_server_tick(13);
        assert_eq!(ticks(&pacer.take_for_heartbeat(Some(16))), vec![15]);
    }
}
