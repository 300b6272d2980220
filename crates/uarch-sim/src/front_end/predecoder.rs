//! Predecode: the first stage every fetched instruction passes through,
//! regardless of whether it ends up decoded by the MITE or served from the
//! DSB on a later pass.

use std::collections::VecDeque;

use crate::uop::{InstanceId, LaminatedUopId};
use uarch_types::MicroArchConfig;

/// A predecoded instruction waiting to become decode-eligible.
#[derive(Debug, Clone, Copy)]
pub struct PredecodedInstr {
    pub instance: InstanceId,
    /// Cycle this instruction may be picked up by the decoder.
    pub decode_eligible_cycle: u64,
    pub ends_decode_group: bool,
    /// A stack-engine sync uop triggered by this instruction, if any,
    /// delivered to the IDQ immediately ahead of the instruction's own uops
    /// once it decodes.
    pub stack_sync: Option<LaminatedUopId>,
}

/// Buffers freshly-fetched instructions for `predecode_decode_delay` cycles
/// before the legacy decoder may consume them, and enforces
/// `pre_decode_width` instructions predecoded per cycle.
#[derive(Debug, Default)]
pub struct PreDecoder {
    queue: VecDeque<PredecodedInstr>,
}

impl PreDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues up to `pre_decode_width` fresh instructions for `cycle`,
    /// stopping when `fetch_next` runs out (end of program, handled by the
    /// caller wrapping around) or the predecode queue would exceed `iq_width`.
    pub fn predecode_cycle(
        &mut self,
        cfg: &MicroArchConfig,
        cycle: u64,
        mut fetch_next: impl FnMut() -> (InstanceId, bool, Option<LaminatedUopId>),
    ) {
        let capacity = cfg.iq_width as usize;
        let mut budget = cfg.pre_decode_width as usize;
        while budget > 0 && self.queue.len() < capacity {
            let (instance, ends_decode_group, stack_sync) = fetch_next();
            self.queue.push_back(PredecodedInstr {
                instance,
                decode_eligible_cycle: cycle + u64::from(cfg.predecode_decode_delay),
                ends_decode_group,
                stack_sync,
            });
            budget -= 1;
        }
    }

    /// Removes and returns the oldest predecoded instruction if it is
    /// eligible to decode by `cycle`.
    pub fn pop_eligible(&mut self, cycle: u64) -> Option<PredecodedInstr> {
        let eligible = self.queue.front().is_some_and(|p| p.decode_eligible_cycle <= cycle);
        if eligible {
            self.queue.pop_front()
        } else {
            None
        }
    }

    #[must_use]
    pub fn peek_eligible(&self, cycle: u64) -> bool {
        self.queue.front().is_some_and(|p| p.decode_eligible_cycle <= cycle)
    }

    /// Returns a copy of the oldest entry without removing it, if eligible.
    #[must_use]
    pub fn peek_front(&self, cycle: u64) -> Option<PredecodedInstr> {
        self.queue
            .front()
            .filter(|p| p.decode_eligible_cycle <= cycle)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_predecode_decode_delay() {
        let cfg = MicroArchConfig::haswell_like();
        let mut pd = PreDecoder::new();
        let mut next_id = 0u32;
        pd.predecode_cycle(&cfg, 10, || {
            let id = InstanceId(next_id);
            next_id += 1;
            (id, false, None)
        });
        assert!(!pd.peek_eligible(10));
        assert!(pd.peek_eligible(10 + u64::from(cfg.predecode_decode_delay)));
    }

    #[test]
    fn respects_pre_decode_width() {
        let cfg = MicroArchConfig::haswell_like();
        let mut pd = PreDecoder::new();
        let mut calls = 0u32;
        pd.predecode_cycle(&cfg, 0, || {
            calls += 1;
            (InstanceId(calls), false, None)
        });
        assert_eq!(calls, cfg.pre_decode_width);
    }
}
