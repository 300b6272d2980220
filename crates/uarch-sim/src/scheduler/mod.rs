//! Unified scheduler: holds renamed uops until their inputs are ready, then
//! dispatches at most one per port per cycle, subject to shared-resource
//! (divider) and fence ordering constraints.

pub mod ports;

use std::collections::HashMap;

use tracing::trace;
use uarch_types::{EventLog, Instr, MemAddr, MicroArchConfig, Port, StallReason, Stage, UopProperties};

use crate::renamed_operand::address_fingerprint;
use crate::renamer::Renamer;
use crate::uop::{UopArena, UopId};
use ports::PortAssigner;

struct RsEntry {
    uop: UopId,
    program_order: u64,
    is_serializing: bool,
    is_load: bool,
    is_store_address: bool,
    is_store_data: bool,
}

/// The unified out-of-order scheduler (Reservation Station).
pub struct Scheduler {
    entries: Vec<RsEntry>,
    capacity: u32,
    port_last_dispatch_cycle: HashMap<Port, u64>,
    /// Cycles remaining until the divider is free, decremented to zero
    /// every cycle rather than tracked as an absolute "busy until" cycle —
    /// charging it is additive (`+= divider_cycles`), matching a unit that
    /// can be re-queued for before it's even drained once.
    divider_busy: u32,
    /// Per-instruction-template (keyed by `instr_index`, not per dynamic
    /// instance) cooldown before another first-uop of the same iform may
    /// become ready, re-armed to the instruction's `tp` every time one does.
    blocked_resources: HashMap<u32, u32>,
    assigner: PortAssigner,
    next_program_order: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new(cfg: &MicroArchConfig) -> Self {
        Self {
            entries: Vec::new(),
            capacity: cfg.rs_width,
            port_last_dispatch_cycle: HashMap::new(),
            divider_busy: 0,
            blocked_resources: HashMap::new(),
            assigner: PortAssigner::new(),
            next_program_order: 0,
        }
    }

    #[must_use]
    pub fn free_slots(&self) -> u32 {
        self.capacity - self.entries.len() as u32
    }

    /// Admits a newly-issued uop, assigning it a port immediately.
    /// `is_serializing` should be set for every uop of an instruction the
    /// reference model treats as serializing, so fencing blocks younger
    /// loads/stores regardless of which of the instruction's uops they
    /// raced against.
    pub fn add_uop(
        &mut self,
        cfg: &MicroArchConfig,
        arena: &mut UopArena,
        instrs: &[Instr],
        uop_id: UopId,
        is_serializing: bool,
    ) {
        let props = arena.uop_properties(uop_id, instrs).clone();
        let port = self.assigner.assign(cfg, &props.possible_ports);
        arena.uop_mut(uop_id).assigned_port = Some(port);

        self.entries.push(RsEntry {
            uop: uop_id,
            program_order: self.next_program_order,
            is_serializing,
            is_load: props.is_load,
            is_store_address: props.is_store_address,
            is_store_data: props.is_store_data,
        });
        self.next_program_order += 1;
    }

    /// Runs one cycle: resolves readiness for pending uops, then dispatches
    /// whatever can dispatch given port and divider availability, the
    /// paired-store same-cache-line constraint, and fence ordering, in
    /// program order.
    pub fn cycle(
        &mut self,
        cfg: &MicroArchConfig,
        arena: &mut UopArena,
        instrs: &[Instr],
        renamer: &Renamer,
        events: &mut EventLog,
        cycle: u64,
    ) {
        self.assigner.begin_cycle();
        self.divider_busy = self.divider_busy.saturating_sub(1);
        for count in self.blocked_resources.values_mut() {
            *count = count.saturating_sub(1);
        }
        self.blocked_resources.retain(|_, count| *count > 0);

        let ready = self.resolve_readiness(cfg, arena, instrs, renamer, events, cycle);
        let excluded = self.paired_store_exclusion(arena, renamer, &ready);

        let mut fence_hit = false;
        let mut dispatched_indices = Vec::new();

        for (idx, entry) in self.entries.iter().enumerate() {
            if fence_hit && (entry.is_load || entry.is_store_address) {
                events.record_stall(cycle, StallReason::FenceStall);
                continue;
            }
            if !ready[idx] {
                continue;
            }
            if excluded == Some(idx) {
                events.record_stall(cycle, StallReason::PortContention);
                continue;
            }

            let port = arena.uop(entry.uop).assigned_port.expect("port assigned at add_uop");
            if self.port_last_dispatch_cycle.get(&port) == Some(&cycle) {
                events.record_stall(cycle, StallReason::PortContention);
                continue;
            }

            let props = arena.uop_properties(entry.uop, instrs).clone();
            if let Some(divider_cycles) = props.divider_cycles {
                if self.divider_busy > 0 {
                    events.record_stall(cycle, StallReason::DividerBusy);
                    continue;
                }
                self.divider_busy = divider_cycles;
            }

            self.port_last_dispatch_cycle.insert(port, cycle);
            let instr_index = arena.instr_index_of(entry.uop);
            let finish = finish_time(cfg, &instrs[instr_index as usize], &props, cycle);
            let dispatched = arena.uop_mut(entry.uop);
            dispatched.dispatched_cycle = Some(cycle);
            dispatched.executed_cycle = Some(finish);
            events.record_stage(cycle, Stage::Dispatched);

            if entry.is_serializing {
                fence_hit = true;
            }
            dispatched_indices.push(idx);
        }

        for &idx in dispatched_indices.iter().rev() {
            self.entries.remove(idx);
        }

        trace!(cycle, dispatched = dispatched_indices.len(), rs_len = self.entries.len(), "scheduler cycle");
    }

    /// Resolves which entries are ready to dispatch this cycle, independent
    /// of port/fence/divider contention: inputs ready, store-forwarding
    /// ready, past `issue_dispatch_delay`, and not held back by an
    /// instruction-throughput blocked resource. Also records each uop's
    /// first ready cycle and re-arms the blocked-resource cooldown for its
    /// instruction template the first time a first-uop becomes ready.
    fn resolve_readiness(
        &mut self,
        cfg: &MicroArchConfig,
        arena: &mut UopArena,
        instrs: &[Instr],
        renamer: &Renamer,
        events: &mut EventLog,
        cycle: u64,
    ) -> Vec<bool> {
        let mut ready = vec![false; self.entries.len()];
        for idx in 0..self.entries.len() {
            let (uop_id, program_order, is_load) = {
                let e = &self.entries[idx];
                (e.uop, e.program_order, e.is_load)
            };

            let Some(issued_cycle) = arena.uop(uop_id).issued_cycle else {
                continue;
            };
            if cycle < issued_cycle + u64::from(cfg.issue_dispatch_delay) {
                continue;
            }
            if !Self::inputs_ready(arena, uop_id, cycle) {
                continue;
            }
            if is_load && !Self::forwarding_ready(arena, instrs, program_order, uop_id, renamer, cycle) {
                continue;
            }

            let instr_index = arena.instr_index_of(uop_id);
            let props = arena.uop_properties(uop_id, instrs).clone();
            if props.is_first_uop_of_instr && self.blocked_resources.contains_key(&instr_index) {
                continue;
            }

            ready[idx] = true;
            if arena.uop(uop_id).ready_for_dispatch_cycle.is_none() {
                arena.uop_mut(uop_id).ready_for_dispatch_cycle = Some(cycle);
                events.record_stage(cycle, Stage::ReadyForDispatch);
                if props.is_first_uop_of_instr {
                    if let Some(tp) = instrs[instr_index as usize].tp {
                        self.blocked_resources.insert(instr_index, tp);
                    }
                }
            }
        }
        ready
    }

    /// True once every input this uop was bound to at rename time has a
    /// known ready cycle at or before `cycle`. A binding whose producer
    /// hasn't executed yet reports `None` (see `RenamedOperand`), which
    /// this treats as "not ready" and leaves uncached so it's rechecked
    /// next cycle.
    fn inputs_ready(arena: &UopArena, uop_id: UopId, cycle: u64) -> bool {
        arena
            .uop(uop_id)
            .input_bindings
            .iter()
            .all(|binding| binding.get_ready_cycle(arena).is_some_and(|ready| ready <= cycle))
    }

    fn forwarding_ready(
        arena: &UopArena,
        instrs: &[Instr],
        program_order: u64,
        uop_id: UopId,
        renamer: &Renamer,
        cycle: u64,
    ) -> bool {
        let props = arena.uop_properties(uop_id, instrs);
        let Some(mem) = props.input_operands.iter().find_map(uarch_types::Operand::as_mem) else {
            return true;
        };
        let fingerprint = address_fingerprint(&mem.mem_addr, mem.mem_addr.base.as_deref());
        if let Some(store) = renamer.find_forwarding_store(program_order, &fingerprint) {
            return store.data_ready_cycle(arena).is_some_and(|c| c <= cycle);
        }
        true
    }

    /// The index of the younger of ports 4 and 9's ready store-data heads,
    /// if both are ready this cycle and their addresses don't provably land
    /// in the same cache line — only that one is excluded from dispatching
    /// this cycle, mirroring real cores' inability to retire two stores to
    /// different lines through a single paired store port in one cycle.
    fn paired_store_exclusion(&self, arena: &UopArena, renamer: &Renamer, ready: &[bool]) -> Option<usize> {
        let head4 = self.oldest_ready_store_data_head(arena, 4, ready)?;
        let head9 = self.oldest_ready_store_data_head(arena, 9, ready)?;

        let addr4 = renamer.store_buffer_entry_for(head4.1)?.mem_addr.as_ref()?;
        let addr9 = renamer.store_buffer_entry_for(head9.1)?.mem_addr.as_ref()?;
        if !different_cache_line(addr4, addr9) {
            return None;
        }
        Some(if head4.2 < head9.2 { head9.0 } else { head4.0 })
    }

    /// `(entry index, uop id, program order)` of the oldest ready store-data
    /// entry assigned to `port`, if any.
    fn oldest_ready_store_data_head(&self, arena: &UopArena, port: Port, ready: &[bool]) -> Option<(usize, UopId, u64)> {
        self.entries.iter().enumerate().find_map(|(idx, e)| {
            (ready[idx] && e.is_store_data && arena.uop(e.uop).assigned_port == Some(port))
                .then_some((idx, e.uop, e.program_order))
        })
    }
}

/// Whether two store addresses provably land in different cache lines:
/// any difference in base, index, or scale, or a displacement gap of at
/// least 64 bytes.
fn different_cache_line(a: &MemAddr, b: &MemAddr) -> bool {
    a.base != b.base || a.index != b.index || a.scale != b.scale || (a.displacement - b.displacement).abs() >= 64
}

/// A uop's finish (`executed_cycle`) time: the latest of a flat 2-cycle
/// floor, its own latency (discounted by `effective_latency` where
/// applicable — this core's single latency-per-uop model stands in for the
/// reference model's per-output-operand ready cycle), its instruction's
/// reciprocal-throughput floor if it's the first uop of its instruction,
/// and the store-address/store-data floors.
fn finish_time(cfg: &MicroArchConfig, instr: &Instr, props: &UopProperties, cycle: u64) -> u64 {
    let mut finish = cycle + 2;
    finish = finish.max(cycle + effective_latency(cfg, props).saturating_sub(1));
    if props.is_first_uop_of_instr {
        if let Some(tp) = instr.tp {
            finish = finish.max(cycle + u64::from(tp));
        }
    }
    if props.is_store_address {
        finish = finish.max(cycle + 5);
    }
    if props.is_store_data {
        finish = finish.max(cycle + 1);
    }
    finish
}

/// A load's latency, minus one cycle if `fast_pointer_chasing` is enabled
/// and the load addresses through a bare base register with no index and
/// no displacement — the cheap, common case real cores special-case for
/// chasing linked lists / chained loads. Detecting the full "is this load's
/// base itself produced by another load" chain (the reference model's
/// exact trigger) is left as a refinement; this approximates it from the
/// addressing mode alone.
fn effective_latency(cfg: &MicroArchConfig, props: &UopProperties) -> u64 {
    let base_latency = u64::from(props.latency.max(1));
    if !cfg.fast_pointer_chasing || !props.is_load {
        return base_latency;
    }
    let simple_base_only = props
        .input_operands
        .iter()
        .find_map(uarch_types::Operand::as_mem)
        .is_some_and(|mem| mem.mem_addr.index.is_none() && mem.mem_addr.displacement == 0 && mem.mem_addr.base.is_some());
    if simple_base_only {
        base_latency.saturating_sub(1).max(1)
    } else {
        base_latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uop::{FusedUop, InstrInstance, LaminatedUop, Uop};

    /// Hand-builds one uop's full arena chain (instance/laminated/fused/uop)
    /// for `instrs[instr_index]`'s single `UopProperties`, bypassing the
    /// front-end and renamer entirely — this exercises the scheduler in
    /// isolation the way `renamer.rs`'s tests exercise the renamer alone.
    fn spawn_uop(arena: &mut UopArena, instr_index: u32) -> UopId {
        let instance = arena.push_instance(InstrInstance {
            instr_index,
            address: 0,
            laminated_uops: Vec::new(),
            added_to_idq_cycle: None,
            retire_cycle: None,
        });
        let laminated = arena.push_laminated(LaminatedUop {
            instance,
            fused_uops: Vec::new(),
            is_macro_fused: false,
        });
        let fused = arena.push_fused(FusedUop {
            laminated,
            uops: Vec::new(),
        });
        let uop = arena.push_uop(Uop::new(fused, 0));
        arena.fused[fused.0 as usize].uops.push(uop);
        arena.laminated[laminated.0 as usize].fused_uops.push(fused);
        arena.instance_mut(instance).laminated_uops.push(laminated);
        uop
    }

    #[test]
    fn instruction_throughput_blocked_resource_delays_second_instance() {
        let cfg = MicroArchConfig::haswell_like();
        let mut props = UopProperties::new(vec![0], 1);
        props.is_first_uop_of_instr = true;
        props.is_last_uop_of_instr = true;
        let mut instr = Instr::unknown("div-like", 1, &[0]);
        instr.tp = Some(4);
        instr.uop_properties = vec![props];
        let instrs = vec![instr];

        let mut arena = UopArena::new();
        let uop_a = spawn_uop(&mut arena, 0);
        let uop_b = spawn_uop(&mut arena, 0);
        arena.uop_mut(uop_a).issued_cycle = Some(0);
        arena.uop_mut(uop_b).issued_cycle = Some(0);

        let mut scheduler = Scheduler::new(&cfg);
        scheduler.add_uop(&cfg, &mut arena, &instrs, uop_a, false);
        scheduler.add_uop(&cfg, &mut arena, &instrs, uop_b, false);

        let renamer = Renamer::new(&cfg);
        let mut events = EventLog::new();
        for cycle in 0..12 {
            scheduler.cycle(&cfg, &mut arena, &instrs, &renamer, &mut events, cycle);
        }

        let dispatch_delay = u64::from(cfg.issue_dispatch_delay);
        assert_eq!(arena.uop(uop_a).dispatched_cycle, Some(dispatch_delay));
        // Blocked behind the instruction's own throughput floor (tp=4) even
        // though its inputs were ready at the same cycle as uop_a's.
        assert_eq!(arena.uop(uop_b).dispatched_cycle, Some(dispatch_delay + 4));
    }

    #[test]
    fn paired_store_different_cache_lines_blocks_the_younger() {
        let cfg = MicroArchConfig::icelake_like();
        let mut props = UopProperties::new(vec![4, 9], 1);
        props.is_store_data = true;
        let mut instr = Instr::unknown("store", 1, &[4, 9]);
        instr.uop_properties = vec![props];
        let instrs = vec![instr];

        let mut arena = UopArena::new();
        let older = spawn_uop(&mut arena, 0);
        let younger = spawn_uop(&mut arena, 0);
        arena.uop_mut(older).issued_cycle = Some(0);
        arena.uop_mut(younger).issued_cycle = Some(0);

        let mut scheduler = Scheduler::new(&cfg);
        scheduler.add_uop(&cfg, &mut arena, &instrs, older, false);
        scheduler.add_uop(&cfg, &mut arena, &instrs, younger, false);
        // Ports assigned round-robin as (4, 9): `older` on 4, `younger` on 9.
        assert_eq!(arena.uop(older).assigned_port, Some(4));
        assert_eq!(arena.uop(younger).assigned_port, Some(9));

        let mut renamer = Renamer::new(&cfg);
        renamer.store_buffer.push(crate::renamed_operand::StoreBufferEntry {
            program_order: 0,
            address_fingerprint: None,
            mem_addr: Some(uarch_types::MemAddr {
                base: Some("RAX".into()),
                index: None,
                scale: 1,
                displacement: 0,
            }),
            store_address_uop: older,
            store_data_uop: older,
        });
        renamer.store_buffer.push(crate::renamed_operand::StoreBufferEntry {
            program_order: 1,
            address_fingerprint: None,
            mem_addr: Some(uarch_types::MemAddr {
                base: Some("RBX".into()),
                index: None,
                scale: 1,
                displacement: 0,
            }),
            store_address_uop: younger,
            store_data_uop: younger,
        });

        let mut events = EventLog::new();
        let dispatch_delay = u64::from(cfg.issue_dispatch_delay);
        for cycle in 0..=dispatch_delay {
            scheduler.cycle(&cfg, &mut arena, &instrs, &renamer, &mut events, cycle);
        }
        // The older store dispatches on schedule; the younger, to a
        // different base register (a different cache line), is held back
        // one extra cycle rather than dispatching alongside it.
        assert_eq!(arena.uop(older).dispatched_cycle, Some(dispatch_delay));
        assert_eq!(arena.uop(younger).dispatched_cycle, None);

        scheduler.cycle(&cfg, &mut arena, &instrs, &renamer, &mut events, dispatch_delay + 1);
        assert_eq!(arena.uop(younger).dispatched_cycle, Some(dispatch_delay + 1));
    }

    #[test]
    fn executed_cycle_takes_the_store_address_floor_over_a_short_latency() {
        let cfg = MicroArchConfig::haswell_like();
        let mut props = UopProperties::new(vec![2], 1);
        props.is_store_address = true;
        let mut instr = Instr::unknown("store-addr", 1, &[2]);
        instr.uop_properties = vec![props];
        let instrs = vec![instr];

        let mut arena = UopArena::new();
        let uop = spawn_uop(&mut arena, 0);
        arena.uop_mut(uop).issued_cycle = Some(0);

        let mut scheduler = Scheduler::new(&cfg);
        scheduler.add_uop(&cfg, &mut arena, &instrs, uop, false);

        let renamer = Renamer::new(&cfg);
        let mut events = EventLog::new();
        let dispatch_delay = u64::from(cfg.issue_dispatch_delay);
        for cycle in 0..=dispatch_delay {
            scheduler.cycle(&cfg, &mut arena, &instrs, &renamer, &mut events, cycle);
        }

        // Latency 1 alone would finish at dispatch+0 (before the 2-cycle
        // floor even applies); the store-address floor of 5 wins instead.
        assert_eq!(arena.uop(uop).executed_cycle, Some(dispatch_delay + 5));
    }
}
