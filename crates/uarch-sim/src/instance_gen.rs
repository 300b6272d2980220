//! Building instruction instances and their lamination trees.
//!
//! This is a throughput simulator for a steady-state instruction stream: the
//! program is a fixed sequence of `Instr` templates that repeats (a loop
//! body, or a straight-line block run back to back for enough iterations to
//! reach steady state). `InstanceGenerator` walks that sequence indefinitely,
//! handing the front-end one freshly-built `InstrInstance` at a time.

use uarch_types::Instr;

use crate::uop::{FusedUop, InstanceId, InstrInstance, LaminatedUop, Uop, UopArena};

/// The static program: deduplicated instruction templates plus the order
/// they execute in, referenced by index into `instrs`.
#[derive(Debug, Clone)]
pub struct Program {
    pub instrs: Vec<Instr>,
    pub order: Vec<u32>,
}

impl Program {
    #[must_use]
    pub fn new(instrs: Vec<Instr>, order: Vec<u32>) -> Self {
        Self { instrs, order }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Produces `InstrInstance`s (and their lamination trees) from `Program`,
/// wrapping back to the start once the sequence is exhausted.
pub struct InstanceGenerator<'a> {
    program: &'a Program,
    next_order_index: usize,
    next_address: u64,
}

impl<'a> InstanceGenerator<'a> {
    #[must_use]
    pub fn new(program: &'a Program, start_address: u64) -> Self {
        Self {
            program,
            next_order_index: 0,
            next_address: start_address,
        }
    }

    /// True when the next instance would begin a fresh iteration of the
    /// program (used by the front-end to detect loop-body boundaries for
    /// LSD admission).
    #[must_use]
    pub fn at_loop_boundary(&self) -> bool {
        self.next_order_index == 0
    }

    /// Builds and appends the next instruction instance, returning its id.
    pub fn generate_next(&mut self, arena: &mut UopArena) -> InstanceId {
        let instr_index = self.program.order[self.next_order_index];
        let address = self.next_address;
        let instr = &self.program.instrs[instr_index as usize];

        self.next_order_index = (self.next_order_index + 1) % self.program.order.len();
        self.next_address += u64::from(instr.instr_len);

        let instance_id = arena.push_instance(InstrInstance {
            instr_index,
            address,
            laminated_uops: Vec::new(),
            added_to_idq_cycle: None,
            retire_cycle: None,
        });
        build_laminated_uops(arena, instr, instance_id);
        instance_id
    }
}

/// Expands one instruction's static uop properties into its laminated/fused/
/// uop tree, appending the resulting ids to the instance's `laminated_uops`.
/// Runs of uops sharing `starts_new_fused_uop == false` collapse into a
/// single `FusedUop`; register-merge uops (appended after the main uops)
/// each get their own laminated uop, since they never macro-fuse.
fn build_laminated_uops(arena: &mut UopArena, instr: &Instr, instance_id: InstanceId) {
    let n_main = instr.uop_properties.len();
    let mut properties_index = 0u32;
    while (properties_index as usize) < n_main {
        let lam_id = arena.push_laminated(LaminatedUop {
            instance: instance_id,
            fused_uops: Vec::new(),
            is_macro_fused: false,
        });
        let fused_id = arena.push_fused(FusedUop {
            laminated: lam_id,
            uops: Vec::new(),
        });

        // First uop of the group always starts it; pull in any following
        // uops microfused onto it.
        loop {
            let uop_id = arena.push_uop(Uop::new(fused_id, properties_index));
            arena.fused[fused_id.0 as usize].uops.push(uop_id);
            properties_index += 1;
            let at_end = properties_index as usize >= n_main;
            if at_end || instr.uop_properties[properties_index as usize].starts_new_fused_uop {
                break;
            }
        }

        arena.laminated[lam_id.0 as usize].fused_uops.push(fused_id);
        arena
            .instance_mut(instance_id)
            .laminated_uops
            .push(lam_id);
    }

    for _ in &instr.reg_merge_uop_properties {
        let lam_id = arena.push_laminated(LaminatedUop {
            instance: instance_id,
            fused_uops: Vec::new(),
            is_macro_fused: false,
        });
        let fused_id = arena.push_fused(FusedUop {
            laminated: lam_id,
            uops: Vec::new(),
        });
        let uop_id = arena.push_uop(Uop::new(fused_id, properties_index));
        arena.fused[fused_id.0 as usize].uops.push(uop_id);
        arena.laminated[lam_id.0 as usize].fused_uops.push(fused_id);
        arena
            .instance_mut(instance_id)
            .laminated_uops
            .push(lam_id);
        properties_index += 1;
    }
}

/// Builds one instance of a synthetic instruction not drawn from
/// `Program::order` — used by the stack engine to splice a sync uop into
/// the laminated-uop stream at the point it was triggered, rather than at
/// its own position in program order.
pub fn build_synthetic_instance(
    arena: &mut UopArena,
    instr: &Instr,
    instr_index: u32,
    address: u64,
) -> InstanceId {
    let instance_id = arena.push_instance(InstrInstance {
        instr_index,
        address,
        laminated_uops: Vec::new(),
        added_to_idq_cycle: None,
        retire_cycle: None,
    });
    build_laminated_uops(arena, instr, instance_id);
    instance_id
}

/// Macro-fuses the last laminated uop of `prev` into the first laminated
/// uop of `next` (e.g. `CMP`/`Jcc`), called by the front-end when it
/// recognises an eligible pair during predecoding. The two laminated uops
/// become one: `next`'s leading laminated uop absorbs `prev`'s trailing one
/// as a second fused uop and is marked `is_macro_fused`.
pub fn macro_fuse(arena: &mut UopArena, prev: InstanceId, next: InstanceId) {
    let Some(prev_lam) = arena.instance(prev).laminated_uops.last().copied() else {
        return;
    };
    let Some(&next_lam) = arena.instance(next).laminated_uops.first() else {
        return;
    };
    let absorbed_fused: Vec<_> = arena.laminated(prev_lam).fused_uops.clone();
    for fused_id in absorbed_fused {
        arena.fused[fused_id.0 as usize].laminated = next_lam;
        arena.laminated[next_lam.0 as usize].fused_uops.push(fused_id);
    }
    arena.laminated[next_lam.0 as usize].is_macro_fused = true;
    arena.instance_mut(prev).laminated_uops.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use uarch_types::UopProperties;

    fn one_uop_instr() -> Instr {
        Instr::unknown("nop", 1, &[0, 1, 5, 6])
    }

    fn microfused_load_op_instr() -> Instr {
        let mut instr = Instr::unknown("add eax, [rax]", 3, &[2, 3]);
        instr.uop_properties = vec![
            UopProperties::new(vec![2, 3], 5).with_load(),
            UopProperties::new(vec![0, 1, 5, 6], 1).microfused_with_previous(),
        ];
        instr
    }

    #[test]
    fn simple_instr_yields_one_laminated_fused_uop() {
        let program = Program::new(vec![one_uop_instr()], vec![0]);
        let mut arena = UopArena::new();
        let mut gen = InstanceGenerator::new(&program, 0x1000);
        let instance_id = gen.generate_next(&mut arena);
        let instance = arena.instance(instance_id);
        assert_eq!(instance.laminated_uops.len(), 1);
        let lam = arena.laminated(instance.laminated_uops[0]);
        assert_eq!(lam.fused_uops.len(), 1);
        assert_eq!(arena.fused(lam.fused_uops[0]).uops.len(), 1);
    }

    #[test]
    fn microfused_pair_shares_one_fused_uop() {
        let program = Program::new(vec![microfused_load_op_instr()], vec![0]);
        let mut arena = UopArena::new();
        let mut gen = InstanceGenerator::new(&program, 0x1000);
        let instance_id = gen.generate_next(&mut arena);
        let instance = arena.instance(instance_id);
        assert_eq!(instance.laminated_uops.len(), 1);
        let lam = arena.laminated(instance.laminated_uops[0]);
        assert_eq!(lam.fused_uops.len(), 1);
        assert_eq!(arena.fused(lam.fused_uops[0]).uops.len(), 2);
    }

    #[test]
    fn generator_wraps_around_program_order() {
        let program = Program::new(vec![one_uop_instr()], vec![0]);
        let mut arena = UopArena::new();
        let mut gen = InstanceGenerator::new(&program, 0);
        let first = gen.generate_next(&mut arena);
        let second = gen.generate_next(&mut arena);
        assert_ne!(first, second);
        assert!(gen.at_loop_boundary());
    }
}
