//! Microarchitecture configuration.
//!
//! `MicroArchConfig` is the single static description of a target core that
//! every pipeline stage reads from. It never changes during a simulation.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// An execution port, numbered the way Intel's optimization manual numbers
/// them (`0`..=`9`). Real microarchitectures use a subset of this range.
pub type Port = u8;

/// A move-elimination quota: either a fixed per-cycle slot count, or
/// unconstrained (`unlimited` in the reference configuration format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveEliminationSlots {
    /// At most this many eliminations of this register class per cycle.
    Limited(u32),
    /// No per-cycle cap (the quota-tracking machinery in the renamer is
    /// bypassed entirely for this register class).
    Unlimited,
}

impl MoveEliminationSlots {
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

/// Static parameters of one microarchitecture's out-of-order core.
///
/// Field names mirror the reference simulator's configuration object so that
/// presets transcribed from its microarchitecture table stay recognisable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroArchConfig {
    /// Human-readable name (e.g. `"SKL"`), used only for reporting.
    pub name: String,
    /// Capacity of the pre-decoded Instruction Queue (IQ).
    pub iq_width: u32,
    /// Capacity of the Instruction Decode Queue (IDQ).
    pub idq_width: u32,
    /// Capacity of the Reorder Buffer.
    pub rb_width: u32,
    /// Capacity of the unified scheduler (Reservation Station).
    pub rs_width: u32,
    /// Max fused uops the renamer can issue per cycle.
    pub issue_width: u32,
    /// Max fused uops the RB can retire per cycle.
    pub retire_width: u32,
    /// Number of legacy (MITE) decoders.
    pub n_decoders: u32,
    /// Instructions predecoded per cycle.
    pub pre_decode_width: u32,
    /// Cycles between predecode and decode eligibility.
    pub predecode_decode_delay: u32,
    /// DSB (uop cache) entries delivered per cycle.
    pub dsb_width: u32,
    /// DSB block granularity: 32 or 64 bytes.
    pub dsb_block_size: u32,
    /// Whether both halves of a 64-byte block must independently qualify
    /// for caching when `dsb_block_size == 32`.
    pub both_32_byte_blocks_must_be_cacheable: bool,
    /// Whether a branch may be the last instruction of a cached DSB block
    /// (false on Skylake: see the DSB termination heuristic).
    pub branch_can_be_last_instr_in_cached_block: bool,
    /// Ordered list of execution ports this core exposes.
    pub all_ports: Vec<Port>,
    /// Ports a synthetic stack-sync uop may use.
    pub stack_sync_uop_ports: Vec<Port>,
    /// Whether the Loop Stream Detector is enabled.
    pub lsd_enabled: bool,
    /// LSD unroll factor as a function of a loop body's total uop count.
    /// Stored as a lookup table indexed by uop count, falling back to 1.
    #[serde(default)]
    pub lsd_unroll_table: Vec<(u32, u32)>,
    /// Stall cycles the MS incurs when entered right after a DSB delivery.
    pub dsb_ms_stall: u32,
    /// GPR move-elimination quota.
    pub move_elimination_gpr_slots: MoveEliminationSlots,
    /// SIMD/vector move-elimination quota.
    pub move_elimination_simd_slots: MoveEliminationSlots,
    /// Depth of the in-flight alias-slot pipeline the quota draws down over.
    pub move_elimination_pipeline_length: u32,
    /// Whether every architectural alias of a physical name must be
    /// overwritten before its multi-use tracking entry is dropped.
    pub move_elimination_gpr_all_aliases_must_be_overwritten: bool,
    /// Minimum cycles between issue and dispatch eligibility.
    pub issue_dispatch_delay: u32,
    /// Use uniformly-random port assignment instead of the load-balancing
    /// heuristics (useful for coarse microarchitectures with undocumented
    /// assignment policies).
    pub simple_port_assignment: bool,
    /// Whether zero-displacement, base-only loads feeding a dependent load
    /// get a 1-cycle latency discount ("fast pointer chasing").
    pub fast_pointer_chasing: bool,
    /// Whether a `movzx` reading a high-8 alias may itself be eliminated.
    pub movzx_high8_alias_can_be_eliminated: bool,
    /// Whether `POP r/m` with a 0x5C-style encoding requires the complex
    /// decoder.
    pub pop5c_requires_complex_decoder: bool,
    /// Whether that same form ends the legacy-decode group.
    pub pop5c_ends_decode_group: bool,
    /// Whether a macro-fusible instruction may be decoded as the last
    /// instruction of a decode group (if not, a slot is reserved for the
    /// fusion partner).
    pub macro_fusible_instr_can_be_decoded_as_last_instr: bool,
    /// Name used to look up this microarchitecture in an external XED-style
    /// instruction data table (opaque to the core).
    pub xed_name: String,
}

impl MicroArchConfig {
    /// Looks up the LSD unroll factor for a loop body of `n_uops` total
    /// uops, per `lsd_unroll_table`. Falls back to no unrolling.
    #[must_use]
    pub fn lsd_unroll_count(&self, n_uops: u32) -> u32 {
        self.lsd_unroll_table
            .iter()
            .rev()
            .find(|(threshold, _)| n_uops >= *threshold)
            .map_or(1, |(_, count)| *count)
    }

    /// Checks the invariants a pipeline stage assumes hold, returning a
    /// `SimError::InvalidConfig` describing the first one that doesn't.
    pub fn validate(&self) -> Result<(), SimError> {
        let fail = |reason: &str| {
            Err(SimError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.issue_width == 0 || self.retire_width == 0 {
            return fail("issue_width and retire_width must be nonzero");
        }
        if self.issue_width > self.rb_width {
            return fail("issue_width must not exceed rb_width");
        }
        if self.retire_width > self.rb_width {
            return fail("retire_width must not exceed rb_width");
        }
        if self.dsb_width == 0 || self.n_decoders == 0 || self.pre_decode_width == 0 {
            return fail("dsb_width, n_decoders and pre_decode_width must be nonzero");
        }
        if self.dsb_block_size != 32 && self.dsb_block_size != 64 {
            return fail("dsb_block_size must be 32 or 64");
        }
        if self.all_ports.is_empty() {
            return fail("all_ports must not be empty");
        }
        Ok(())
    }

    /// A representative 4-wide microarchitecture preset (Haswell-class):
    /// ports `{0,1,2,3,4,5,6,7}`, no paired-store ports.
    #[must_use]
    pub fn haswell_like() -> Self {
        Self {
            name: "HSW".into(),
            iq_width: 25,
            idq_width: 56,
            rb_width: 192,
            rs_width: 60,
            issue_width: 4,
            retire_width: 4,
            n_decoders: 4,
            pre_decode_width: 5,
            predecode_decode_delay: 1,
            dsb_width: 4,
            dsb_block_size: 32,
            both_32_byte_blocks_must_be_cacheable: false,
            branch_can_be_last_instr_in_cached_block: true,
            all_ports: vec![0, 1, 2, 3, 4, 5, 6, 7],
            stack_sync_uop_ports: vec![1, 5, 6],
            lsd_enabled: true,
            lsd_unroll_table: vec![(0, 1)],
            dsb_ms_stall: 2,
            move_elimination_gpr_slots: MoveEliminationSlots::Limited(2),
            move_elimination_simd_slots: MoveEliminationSlots::Limited(2),
            move_elimination_pipeline_length: 4,
            move_elimination_gpr_all_aliases_must_be_overwritten: false,
            issue_dispatch_delay: 5,
            simple_port_assignment: false,
            fast_pointer_chasing: false,
            movzx_high8_alias_can_be_eliminated: true,
            pop5c_requires_complex_decoder: false,
            pop5c_ends_decode_group: false,
            macro_fusible_instr_can_be_decoded_as_last_instr: true,
            xed_name: "HSW".into(),
        }
    }

    /// A representative 8-port microarchitecture preset (Skylake-class):
    /// adds the paired store-address/store-data ports `{7,8}` behavior and
    /// the SKL-specific DSB termination guard.
    #[must_use]
    pub fn skylake_like() -> Self {
        Self {
            name: "SKL".into(),
            all_ports: vec![0, 1, 2, 3, 4, 5, 6, 7],
            branch_can_be_last_instr_in_cached_block: false,
            fast_pointer_chasing: true,
            ..Self::haswell_like()
        }
    }

    /// A representative 10-port microarchitecture preset (Ice Lake-class):
    /// adds ports `8` and `9`, enabling the paired-store and `{4,9}`
    /// round-robin port-assignment rules.
    #[must_use]
    pub fn icelake_like() -> Self {
        Self {
            name: "ICL".into(),
            idq_width: 70,
            rb_width: 352,
            rs_width: 97,
            issue_width: 5,
            retire_width: 8,
            n_decoders: 5,
            dsb_width: 6,
            dsb_block_size: 64,
            both_32_byte_blocks_must_be_cacheable: true,
            all_ports: vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            move_elimination_gpr_slots: MoveEliminationSlots::Unlimited,
            move_elimination_simd_slots: MoveEliminationSlots::Unlimited,
            fast_pointer_chasing: true,
            ..Self::haswell_like()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haswell_like_is_valid() {
        assert!(MicroArchConfig::haswell_like().validate().is_ok());
    }

    #[test]
    fn skylake_like_is_valid() {
        assert!(MicroArchConfig::skylake_like().validate().is_ok());
    }

    #[test]
    fn icelake_like_is_valid() {
        assert!(MicroArchConfig::icelake_like().validate().is_ok());
    }

    #[test]
    fn rejects_issue_width_over_rb_width() {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.issue_width = cfg.rb_width + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn lsd_unroll_count_uses_highest_matching_threshold() {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.lsd_unroll_table = vec![(0, 1), (8, 2), (16, 4)];
        assert_eq!(cfg.lsd_unroll_count(3), 1);
        assert_eq!(cfg.lsd_unroll_count(8), 2);
        assert_eq!(cfg.lsd_unroll_count(20), 4);
    }
}
