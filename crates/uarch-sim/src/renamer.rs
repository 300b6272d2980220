//! Rename/allocate: binds every uop's operands to the producer (or
//! already-ready value) currently live for that architectural name, tracks
//! the store buffer, and performs move elimination.

use std::collections::{HashMap, VecDeque};

use uarch_types::{EventLog, Instr, MicroArchConfig, MoveEliminationSlots, Operand, RenameKey, Stage};

use crate::renamed_operand::{address_fingerprint, RenamedOperand, StoreBufferEntry};
use crate::uop::{FusedUopId, InstanceId, LaminatedUopId, UopArena, UopId};

/// Draws down a fixed per-cycle quota over a fixed pipeline depth: an
/// elimination taken this cycle occupies a slot until `pipeline_length`
/// cycles have passed, then frees automatically.
#[derive(Debug)]
struct QuotaTracker {
    in_flight: VecDeque<u32>,
    pipeline_length: usize,
}

impl QuotaTracker {
    fn new(pipeline_length: u32) -> Self {
        Self {
            in_flight: VecDeque::new(),
            pipeline_length: pipeline_length.max(1) as usize,
        }
    }

    fn used(&self) -> u32 {
        self.in_flight.iter().sum()
    }

    /// Advances the tracker by one cycle, dropping eliminations that have
    /// drained past `pipeline_length`, and opens this cycle's bucket.
    fn begin_cycle(&mut self) {
        self.in_flight.push_back(0);
        while self.in_flight.len() > self.pipeline_length {
            self.in_flight.pop_front();
        }
    }

    /// Tries to take one slot this cycle against `slots`; returns whether
    /// it succeeded.
    fn try_take(&mut self, slots: MoveEliminationSlots) -> bool {
        match slots {
            MoveEliminationSlots::Unlimited => true,
            MoveEliminationSlots::Limited(max) => {
                if self.used() >= max {
                    return false;
                }
                *self.in_flight.back_mut().expect("begin_cycle called") += 1;
                true
            }
        }
    }
}

/// Rename/allocate stage state.
pub struct Renamer {
    rename_map: HashMap<RenameKey, RenamedOperand>,
    pub store_buffer: Vec<StoreBufferEntry>,
    gpr_quota: QuotaTracker,
    simd_quota: QuotaTracker,
    next_program_order: u64,
    pub eliminated_this_run: u64,
}

impl Renamer {
    #[must_use]
    pub fn new(cfg: &MicroArchConfig) -> Self {
        Self {
            rename_map: HashMap::new(),
            store_buffer: Vec::new(),
            gpr_quota: QuotaTracker::new(cfg.move_elimination_pipeline_length),
            simd_quota: QuotaTracker::new(cfg.move_elimination_pipeline_length),
            next_program_order: 0,
            eliminated_this_run: 0,
        }
    }

    fn lookup_or_ready(&self, key: &RenameKey, cycle: u64) -> RenamedOperand {
        self.rename_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| RenamedOperand::ready_at(cycle))
    }

    /// Tries to eliminate a whole-instruction move instead of renaming its
    /// uop: valid only for a single-input, single-output, both-register
    /// move with quota remaining. Returns whether it did.
    fn try_eliminate_move(&mut self, cfg: &MicroArchConfig, instr: &Instr, cycle: u64) -> bool {
        if !instr.may_be_eliminated || instr.uop_properties.len() != 1 {
            return false;
        }
        let props = &instr.uop_properties[0];
        let (Some(input), Some(output)) = (props.input_operands.first(), props.output_operands.first())
        else {
            return false;
        };
        let (Operand::Reg(in_reg), Operand::Reg(_)) = (input, output) else {
            return false;
        };
        let is_gpr = uarch_types::operand::GPR_NAMES.contains(&uarch_types::operand::canonical_reg(&in_reg.reg));
        let (quota, slots) = if is_gpr {
            (&mut self.gpr_quota, cfg.move_elimination_gpr_slots)
        } else {
            (&mut self.simd_quota, cfg.move_elimination_simd_slots)
        };
        if !quota.try_take(slots) {
            return false;
        }
        let Some(input_key) = input.rename_key() else {
            return false;
        };
        let Some(output_key) = output.rename_key() else {
            return false;
        };
        let value = self.lookup_or_ready(&input_key, cycle);
        self.rename_map.insert(output_key, value);
        self.eliminated_this_run += 1;
        true
    }

    /// Renames every uop reachable from `idq_items`, respecting
    /// `issue_width` fused-domain slots per cycle and never allocating more
    /// than `rb_free_slots` entries. Returns the fused uops issued (tagged
    /// with their instance and whether they're its last) and how many IDQ
    /// entries were consumed, so the caller can pop exactly that many.
    pub fn cycle(
        &mut self,
        cfg: &MicroArchConfig,
        arena: &mut UopArena,
        instrs: &[Instr],
        idq_items: &[LaminatedUopId],
        events: &mut EventLog,
        cycle: u64,
        rb_free_slots: u32,
    ) -> (Vec<(FusedUopId, InstanceId, bool)>, usize) {
        self.gpr_quota.begin_cycle();
        self.simd_quota.begin_cycle();

        let budget = cfg.issue_width.min(rb_free_slots);
        let mut issued = Vec::new();
        let mut fused_slots_used = 0u32;
        let mut consumed = 0usize;

        for &lam_id in idq_items {
            let fused_ids = arena.laminated(lam_id).fused_uops.clone();
            // A laminated uop's fused uops must all issue together or not
            // at all this cycle, so its instruction instance's retirement
            // accounting never straddles a partial issue.
            if fused_slots_used + fused_ids.len() as u32 > budget {
                break;
            }

            let instance = arena.laminated(lam_id).instance;
            let instr_index = arena.instance(instance).instr_index;
            let instr = &instrs[instr_index as usize];
            let is_last_laminated = arena.instance(instance).laminated_uops.last() == Some(&lam_id);

            if arena.instance(instance).added_to_idq_cycle.is_none() {
                arena.instance_mut(instance).added_to_idq_cycle = Some(cycle);
            }

            consumed += 1;
            if self.try_eliminate_move(cfg, instr, cycle) {
                if is_last_laminated {
                    arena.instance_mut(instance).retire_cycle = Some(cycle);
                    events.record_stage(cycle, Stage::Retired);
                }
                continue;
            }

            let n_fused = fused_ids.len();
            for (i, fused_id) in fused_ids.into_iter().enumerate() {
                let uop_ids = arena.fused(fused_id).uops.clone();
                for uop_id in &uop_ids {
                    self.rename_one(arena, instrs, *uop_id);
                    arena.uop_mut(*uop_id).issued_cycle = Some(cycle);
                }
                events.record_stage(cycle, Stage::Issued);
                let is_last = is_last_laminated && i + 1 == n_fused;
                issued.push((fused_id, instance, is_last));
                fused_slots_used += 1;
            }
            self.next_program_order += 1;
        }

        (issued, consumed)
    }

    fn rename_one(&mut self, arena: &mut UopArena, instrs: &[Instr], uop_id: UopId) {
        let props = arena.uop_properties(uop_id, instrs).clone();

        let bindings: Vec<RenamedOperand> = props
            .input_operands
            .iter()
            .map(|input| match input.rename_key() {
                Some(key) => self.lookup_or_ready(&key, 0),
                // Memory operands aren't looked up in the architectural
                // rename map; their producer, if any, is tracked through
                // the store buffer instead, so treat them as immediately
                // available here (load/store ordering is enforced
                // separately by the scheduler's forwarding check).
                None => RenamedOperand::ready_at(0),
            })
            .collect();
        arena.uop_mut(uop_id).input_bindings = bindings;

        for output in &props.output_operands {
            if let Some(key) = output.rename_key() {
                self.rename_map
                    .insert(key, RenamedOperand::produced_by(uop_id));
            }
        }

        if props.is_store_address || props.is_store_data {
            self.update_store_buffer(uop_id, &props);
        }
    }

    fn update_store_buffer(&mut self, uop_id: UopId, props: &uarch_types::UopProperties) {
        let Some(mem) = props
            .input_operands
            .iter()
            .chain(props.output_operands.iter())
            .find_map(Operand::as_mem)
        else {
            return;
        };
        let base_value = mem.mem_addr.base.as_deref();
        let fingerprint = address_fingerprint(&mem.mem_addr, base_value);

        if props.is_store_address {
            self.store_buffer.push(StoreBufferEntry {
                program_order: self.next_program_order,
                address_fingerprint: fingerprint,
                mem_addr: Some(mem.mem_addr.clone()),
                store_address_uop: uop_id,
                store_data_uop: uop_id,
            });
        } else if let Some(entry) = self
            .store_buffer
            .iter_mut()
            .rev()
            .find(|e| e.program_order == self.next_program_order)
        {
            entry.store_data_uop = uop_id;
        }
    }

    /// The youngest store older than `program_order` whose fingerprint
    /// matches `fingerprint`, if any — the forwarding candidate for a load.
    #[must_use]
    pub fn find_forwarding_store(
        &self,
        program_order: u64,
        fingerprint: &Option<String>,
    ) -> Option<&StoreBufferEntry> {
        self.store_buffer
            .iter()
            .rev()
            .find(|e| e.program_order < program_order && e.provably_same_address(fingerprint))
    }

    /// The store-buffer entry a store-data uop belongs to, if any — used by
    /// the scheduler's paired-store dispatch constraint to compare two
    /// ready store-data uops' addresses.
    #[must_use]
    pub fn store_buffer_entry_for(&self, uop_id: UopId) -> Option<&StoreBufferEntry> {
        self.store_buffer.iter().find(|e| e.store_data_uop == uop_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uarch_types::UopProperties;

    fn mov_instr() -> Instr {
        let mut instr = Instr::unknown("mov rbx, rax", 3, &[0, 1, 5, 6]);
        instr.may_be_eliminated = true;
        instr.uop_properties = vec![UopProperties::new(vec![0, 1, 5, 6], 1)
            .with_inputs(vec![Operand::reg("RAX")])
            .with_outputs(vec![Operand::reg("RBX")])];
        instr
    }

    #[test]
    fn eliminates_moves_up_to_quota_then_falls_back() {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.move_elimination_gpr_slots = MoveEliminationSlots::Limited(1);
        cfg.move_elimination_pipeline_length = 100;
        let mut renamer = Renamer::new(&cfg);
        let instr = mov_instr();

        assert!(renamer.try_eliminate_move(&cfg, &instr, 0));
        // Quota of 1 is exhausted for the rest of this pipeline window.
        assert!(!renamer.try_eliminate_move(&cfg, &instr, 0));
    }

    #[test]
    fn unlimited_quota_never_blocks() {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.move_elimination_gpr_slots = MoveEliminationSlots::Unlimited;
        let mut renamer = Renamer::new(&cfg);
        let instr = mov_instr();
        for _ in 0..50 {
            assert!(renamer.try_eliminate_move(&cfg, &instr, 0));
        }
    }
}
