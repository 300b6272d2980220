//! The stack engine: folds the RSP adjustments implicit in `PUSH`/`POP`/
//! `CALL`/`RET` into a running offset instead of dispatching a uop for each
//! one, only materializing a synchronization uop when something needs RSP's
//! true value.

use uarch_types::operand::canonical_reg;
use uarch_types::{Instr, MicroArchConfig, Operand};

/// Above this magnitude the running offset itself needs folding back into a
/// real write, independent of whether anything reads RSP explicitly yet.
const PENDING_OFFSET_SYNC_THRESHOLD: i64 = 192;

/// Tracks the RSP offset accumulated by implicit stack operations that
/// haven't yet been folded into an explicit read.
#[derive(Debug, Default)]
pub struct StackEngine {
    pending_offset: i64,
}

impl StackEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending_offset(&self) -> i64 {
        self.pending_offset
    }

    /// Folds `instr` into the running offset and reports whether a
    /// synchronization uop must be injected before it:
    /// - a nonzero pending offset plus an explicit (non-implicit) RSP read
    ///   forces a sync, resetting the offset;
    /// - folding in this instruction's own implicit adjustment may push the
    ///   offset's magnitude past the threshold, which also forces a sync;
    /// - an explicit RSP write always resets the offset (no sync needed for
    ///   that alone — the write itself establishes RSP's true value).
    pub fn observe(&mut self, instr: &Instr) -> bool {
        let (reads_rsp, writes_rsp) = explicit_rsp_access(instr);
        let mut needs_sync = false;

        if self.pending_offset != 0 && reads_rsp {
            needs_sync = true;
            self.pending_offset = 0;
        }

        if let Some(delta) = instr.implicit_rsp_change {
            self.pending_offset += delta;
            if self.pending_offset.abs() > PENDING_OFFSET_SYNC_THRESHOLD {
                needs_sync = true;
                self.pending_offset = 0;
            }
        }

        if writes_rsp {
            self.pending_offset = 0;
        }

        needs_sync
    }

    /// Ports a synthetic sync uop may use, per the microarchitecture table.
    #[must_use]
    pub fn sync_uop_ports(cfg: &MicroArchConfig) -> &[uarch_types::Port] {
        &cfg.stack_sync_uop_ports
    }
}

/// Whether `instr` reads or writes RSP through an explicit (not merely
/// implicit-stack) operand, across every uop it expands to.
fn explicit_rsp_access(instr: &Instr) -> (bool, bool) {
    let mut reads = false;
    let mut writes = false;
    for props in instr.uop_properties.iter().chain(&instr.reg_merge_uop_properties) {
        reads |= props.input_operands.iter().any(is_explicit_rsp);
        writes |= props.output_operands.iter().any(is_explicit_rsp);
    }
    (reads, writes)
}

fn is_explicit_rsp(op: &Operand) -> bool {
    match op {
        Operand::Reg(r) => !r.is_implicit_stack_operand && canonical_reg(&r.reg) == "RSP",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uarch_types::{RegOperand, UopProperties};

    fn push_instr() -> Instr {
        let mut i = Instr::unknown("push rax", 1, &[1, 5, 6]);
        i.implicit_rsp_change = Some(-8);
        i.uop_properties = vec![UopProperties::new(vec![1, 5, 6], 1)
            .with_outputs(vec![Operand::Reg(RegOperand::implicit_stack("RSP"))])];
        i
    }

    fn mov_from_rsp_instr() -> Instr {
        let mut i = Instr::unknown("mov rax, [rsp+8]", 4, &[2, 3]);
        i.uop_properties = vec![UopProperties::new(vec![2, 3], 5).with_inputs(vec![Operand::reg("RSP")])];
        i
    }

    fn mov_to_rsp_instr() -> Instr {
        let mut i = Instr::unknown("mov rsp, rax", 3, &[0, 1, 5, 6]);
        i.uop_properties = vec![UopProperties::new(vec![0, 1, 5, 6], 1).with_outputs(vec![Operand::reg("RSP")])];
        i
    }

    #[test]
    fn accumulates_pending_offset_across_pushes() {
        let mut engine = StackEngine::new();
        assert!(!engine.observe(&push_instr()));
        assert!(!engine.observe(&push_instr()));
        assert_eq!(engine.pending_offset(), -16);
    }

    #[test]
    fn requires_sync_before_explicit_rsp_read() {
        let mut engine = StackEngine::new();
        engine.observe(&push_instr());
        assert!(engine.observe(&mov_from_rsp_instr()));
        assert_eq!(engine.pending_offset(), 0);
        assert!(!engine.observe(&mov_from_rsp_instr()));
    }

    #[test]
    fn large_running_offset_forces_its_own_sync() {
        let mut engine = StackEngine::new();
        let mut injected = false;
        for _ in 0..30 {
            injected |= engine.observe(&push_instr());
        }
        assert!(injected, "offset of -240 should have crossed the threshold");
        assert!(engine.pending_offset().abs() <= PENDING_OFFSET_SYNC_THRESHOLD);
    }

    #[test]
    fn explicit_write_resets_offset_without_requesting_a_sync() {
        let mut engine = StackEngine::new();
        engine.observe(&push_instr());
        assert!(!engine.observe(&mov_to_rsp_instr()));
        assert_eq!(engine.pending_offset(), 0);
    }
}
