//! Renamed operand handles and the store buffer.
//!
//! A `RenamedOperand` is what the rename map actually stores: either "this
//! value was already architecturally valid when the uop that reads it was
//! renamed" or "this value is produced by that uop over there". Either way,
//! readers need its ready cycle, which is unknown until its producer
//! finishes executing. Computing it eagerly would mean revisiting it every
//! cycle; computing it lazily and caching a negative answer would wedge the
//! simulation forever on a uop that hasn't executed yet. So the cache is
//! write-once-positive: `get_ready_cycle` recomputes every time until the
//! producer has actually finished, then remembers the answer forever.

use std::cell::Cell;

use crate::uop::{UopArena, UopId};
use uarch_types::Instr;

/// A value the renamer has bound an operand to.
#[derive(Debug, Clone)]
pub enum RenamedOperand {
    /// Already architecturally valid at (or before) the rename cycle, e.g.
    /// a register never written by any in-flight instruction.
    Ready(u64),
    /// Produced by a specific uop still in flight.
    Producer {
        uop: UopId,
        ready_cycle: Cell<Option<u64>>,
    },
}

impl RenamedOperand {
    #[must_use]
    pub fn ready_at(cycle: u64) -> Self {
        Self::Ready(cycle)
    }

    #[must_use]
    pub fn produced_by(uop: UopId) -> Self {
        Self::Producer {
            uop,
            ready_cycle: Cell::new(None),
        }
    }

    /// The cycle this value becomes available, if known yet. Returns
    /// `None` without caching anything when the producer hasn't executed
    /// yet — callers must re-issue the check on a later cycle.
    #[must_use]
    pub fn get_ready_cycle(&self, arena: &UopArena) -> Option<u64> {
        match self {
            Self::Ready(cycle) => Some(*cycle),
            Self::Producer { uop, ready_cycle } => {
                if let Some(c) = ready_cycle.get() {
                    return Some(c);
                }
                let c = arena.uop(*uop).executed_cycle?;
                ready_cycle.set(Some(c));
                Some(c)
            }
        }
    }
}

/// One in-flight entry in the store buffer: a store's symbolic address
/// fingerprint plus the uop that computes its data, so a later load can
/// decide whether to forward from it instead of waiting on memory.
#[derive(Debug, Clone)]
pub struct StoreBufferEntry {
    /// Program order index, used to find the *youngest* store older than a
    /// given load when scanning for a forwarding candidate.
    pub program_order: u64,
    /// Symbolic address fingerprint: `None` means the address could not be
    /// proven distinct from anything, so loads must treat it as a may-alias
    /// hazard rather than a forwarding opportunity.
    pub address_fingerprint: Option<String>,
    /// The structured address itself, kept alongside the fingerprint so the
    /// scheduler's paired-store dispatch constraint can compare two stores'
    /// base/index/scale and displacement numerically instead of through the
    /// fingerprint's opaque string.
    pub mem_addr: Option<uarch_types::MemAddr>,
    pub store_address_uop: UopId,
    pub store_data_uop: UopId,
}

impl StoreBufferEntry {
    /// Whether this store and `other_fingerprint` are provably the same
    /// memory location and thus a forwarding candidate (as opposed to
    /// merely "not provably different", which still blocks reordering but
    /// cannot forward).
    #[must_use]
    pub fn provably_same_address(&self, other_fingerprint: &Option<String>) -> bool {
        match (&self.address_fingerprint, other_fingerprint) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Cycle the store's data is ready to be forwarded, if known.
    #[must_use]
    pub fn data_ready_cycle(&self, arena: &UopArena) -> Option<u64> {
        arena.uop(self.store_data_uop).executed_cycle
    }
}

/// Builds the symbolic fingerprint two memory operands are compared
/// against for forwarding, from their base/index/scale/displacement and the
/// renamed value bound to base/index at the time of the access. `None`
/// register operands (absolute or RIP-relative addressing) fingerprint on
/// displacement alone.
#[must_use]
pub fn address_fingerprint(mem: &uarch_types::MemAddr, base_value: Option<&str>) -> Option<String> {
    let base = mem.base.as_deref().map(|_| base_value.unwrap_or("?"));
    if base == Some("?") {
        return None;
    }
    Some(format!(
        "{}+{}*{}+{}",
        base.unwrap_or("none"),
        mem.index.as_deref().unwrap_or("none"),
        mem.scale,
        mem.displacement
    ))
}

#[must_use]
pub fn properties_len(instr: &Instr) -> usize {
    instr.uop_properties.len() + instr.reg_merge_uop_properties.len()
}
