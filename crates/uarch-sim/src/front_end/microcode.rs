//! The Microcode Sequencer (MS): delivers the uops of instructions too
//! complex for the legacy decoder or DSB to hand over directly (string
//! instructions, `ENTER`, other microcoded iforms).
//!
//! Entering the MS right after a DSB delivery costs a fixed bubble
//! (`dsb_ms_stall`); entering right after the legacy decoder does not,
//! matching the reference model's asymmetry between the two handoffs.

use uarch_types::MicroArchConfig;

/// Fused uops the MS can hand to the IDQ in one cycle. Not part of
/// `MicroArchConfig` in the reference tables; modeled as a fixed rate here
/// (see the grounding ledger's Open Question on MS throughput).
const MS_UOPS_PER_CYCLE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MsState {
    Idle,
    Stalling { remaining: u32, total_uops: u32 },
    Delivering { remaining: u32 },
}

/// Sequences delivery of one instruction's microcoded uops.
#[derive(Debug)]
pub struct MicrocodeSequencer {
    state: MsState,
}

impl Default for MicrocodeSequencer {
    fn default() -> Self {
        Self { state: MsState::Idle }
    }
}

impl MicrocodeSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, MsState::Idle)
    }

    /// Begins sequencing `total_uops` uops, paying the DSB->MS bubble if
    /// the previous source was the DSB.
    pub fn enter(&mut self, cfg: &MicroArchConfig, total_uops: u32, came_from_dsb: bool) {
        let stall = if came_from_dsb { cfg.dsb_ms_stall } else { 0 };
        self.state = if stall > 0 {
            MsState::Stalling {
                remaining: stall,
                total_uops,
            }
        } else {
            MsState::Delivering { remaining: total_uops }
        };
    }

    /// Advances by one cycle, returning how many uops (if any) become
    /// deliverable this cycle. Once the remaining count reaches zero the
    /// sequencer goes idle.
    pub fn cycle(&mut self) -> u32 {
        match self.state {
            MsState::Idle => 0,
            MsState::Stalling {
                remaining,
                total_uops,
            } => {
                self.state = if remaining > 1 {
                    MsState::Stalling {
                        remaining: remaining - 1,
                        total_uops,
                    }
                } else {
                    MsState::Delivering { remaining: total_uops }
                };
                0
            }
            MsState::Delivering { remaining } => {
                let delivered = remaining.min(MS_UOPS_PER_CYCLE);
                let left = remaining - delivered;
                self.state = if left == 0 {
                    MsState::Idle
                } else {
                    MsState::Delivering { remaining: left }
                };
                delivered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_without_stall_from_mite() {
        let cfg = MicroArchConfig::haswell_like();
        let mut ms = MicrocodeSequencer::new();
        ms.enter(&cfg, 6, false);
        let mut total = 0;
        while !ms.is_idle() {
            total += ms.cycle();
        }
        assert_eq!(total, 6);
    }

    #[test]
    fn pays_bubble_entering_from_dsb() {
        let cfg = MicroArchConfig::haswell_like();
        let mut ms = MicrocodeSequencer::new();
        ms.enter(&cfg, 4, true);
        assert_eq!(ms.cycle(), 0);
        assert!(!ms.is_idle());
    }
}
