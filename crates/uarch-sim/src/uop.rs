//! Arena-allocated uop state.
//!
//! The reference model links uops to their fused/laminated parents and back
//! to the instruction instance that spawned them — an inherently cyclic
//! graph. Rather than fight the borrow checker with `Rc<RefCell<_>>`, every
//! uop, fused uop, laminated uop, and instruction instance lives in its own
//! `Vec` inside `Program`/`Simulator` state, addressed by a dense `u32`
//! index. Indices are `Copy` and never dangle for the run's lifetime.

use uarch_types::{Instr, UopProperties};

use crate::renamed_operand::RenamedOperand;

/// Index of an `InstrInstance` within a run's instance arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

/// Index of a `LaminatedUop` within a run's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaminatedUopId(pub u32);

/// Index of a `FusedUop` within a run's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FusedUopId(pub u32);

/// Index of a `Uop` within a run's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UopId(pub u32);

/// One dynamic occurrence of an `Instr` in the program's instruction
/// stream, with its own address and a back-reference to its template.
#[derive(Debug, Clone)]
pub struct InstrInstance {
    pub instr_index: u32,
    pub address: u64,
    /// Laminated uops this instance expands into, in program order.
    pub laminated_uops: Vec<LaminatedUopId>,
    /// Cycle this instance's first uop was added to the IDQ, once known.
    pub added_to_idq_cycle: Option<u64>,
    /// Cycle the last uop of this instance retired, once known.
    pub retire_cycle: Option<u64>,
}

/// A laminated uop: the macro-op-fusion-and-lamination unit the front-end
/// actually moves through the IDQ/DSB/LSD as a single item. Carries one or
/// two fused uops (two only for a macro-fused compare-and-branch pair).
#[derive(Debug, Clone)]
pub struct LaminatedUop {
    pub instance: InstanceId,
    pub fused_uops: Vec<FusedUopId>,
    pub is_macro_fused: bool,
}

/// A fused uop: the unlaminated-domain unit the renamer issues and the RB
/// retires as a single slot. Usually one `Uop`; a microfused load+op is
/// still one fused uop containing two `Uop`s (one per port-assigned half).
#[derive(Debug, Clone)]
pub struct FusedUop {
    pub laminated: LaminatedUopId,
    pub uops: Vec<UopId>,
}

/// A single scheduler-dispatched uop: the finest-grained unit the
/// scheduler assigns a port to and executes.
#[derive(Debug, Clone)]
pub struct Uop {
    pub fused: FusedUopId,
    pub properties_index: u32,
    pub is_register_merge: bool,
    pub is_stack_sync: bool,
    /// The value each input operand was bound to at rename time, in the
    /// same order as the uop's `UopProperties::input_operands`. Checking
    /// readiness means walking these, not re-querying the rename map
    /// (which has moved on to later writers by dispatch time).
    pub input_bindings: Vec<RenamedOperand>,

    // Timeline, filled in as the uop progresses through the pipeline.
    pub issued_cycle: Option<u64>,
    pub ready_for_dispatch_cycle: Option<u64>,
    pub dispatched_cycle: Option<u64>,
    pub executed_cycle: Option<u64>,
    pub retired_cycle: Option<u64>,
    pub assigned_port: Option<uarch_types::Port>,
}

impl Uop {
    #[must_use]
    pub fn new(fused: FusedUopId, properties_index: u32) -> Self {
        Self {
            fused,
            properties_index,
            is_register_merge: false,
            is_stack_sync: false,
            input_bindings: Vec::new(),
            issued_cycle: None,
            ready_for_dispatch_cycle: None,
            dispatched_cycle: None,
            executed_cycle: None,
            retired_cycle: None,
            assigned_port: None,
        }
    }
}

/// Owns every arena used during one simulation run, plus the static
/// program (the deduplicated `Instr` templates and the per-cycle address
/// stream referencing them).
#[derive(Debug, Default)]
pub struct UopArena {
    pub instances: Vec<InstrInstance>,
    pub laminated: Vec<LaminatedUop>,
    pub fused: Vec<FusedUop>,
    pub uops: Vec<Uop>,
}

impl UopArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_instance(&mut self, instance: InstrInstance) -> InstanceId {
        self.instances.push(instance);
        InstanceId((self.instances.len() - 1) as u32)
    }

    pub fn push_laminated(&mut self, lam: LaminatedUop) -> LaminatedUopId {
        self.laminated.push(lam);
        LaminatedUopId((self.laminated.len() - 1) as u32)
    }

    pub fn push_fused(&mut self, fused: FusedUop) -> FusedUopId {
        self.fused.push(fused);
        FusedUopId((self.fused.len() - 1) as u32)
    }

    pub fn push_uop(&mut self, uop: Uop) -> UopId {
        self.uops.push(uop);
        UopId((self.uops.len() - 1) as u32)
    }

    #[must_use]
    pub fn instance(&self, id: InstanceId) -> &InstrInstance {
        &self.instances[id.0 as usize]
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut InstrInstance {
        &mut self.instances[id.0 as usize]
    }

    #[must_use]
    pub fn laminated(&self, id: LaminatedUopId) -> &LaminatedUop {
        &self.laminated[id.0 as usize]
    }

    #[must_use]
    pub fn fused(&self, id: FusedUopId) -> &FusedUop {
        &self.fused[id.0 as usize]
    }

    #[must_use]
    pub fn uop(&self, id: UopId) -> &Uop {
        &self.uops[id.0 as usize]
    }

    pub fn uop_mut(&mut self, id: UopId) -> &mut Uop {
        &mut self.uops[id.0 as usize]
    }

    /// The template index (into the program's `Instr` slice) of the
    /// instruction a uop belongs to, looked up through its fused/laminated
    /// parents — the key the scheduler's instruction-throughput blocked-
    /// resource map uses, since that resource is shared by every dynamic
    /// instance of the same iform.
    #[must_use]
    pub fn instr_index_of(&self, id: UopId) -> u32 {
        let uop = self.uop(id);
        let fused = self.fused(uop.fused);
        let lam = self.laminated(fused.laminated);
        self.instance(lam.instance).instr_index
    }

    /// The static properties of a uop, looked up through its fused uop's
    /// laminated uop's instruction instance.
    #[must_use]
    pub fn uop_properties<'a>(&self, id: UopId, instrs: &'a [Instr]) -> &'a UopProperties {
        let uop = self.uop(id);
        let fused = self.fused(uop.fused);
        let lam = self.laminated(fused.laminated);
        let instance = self.instance(lam.instance);
        let instr = &instrs[instance.instr_index as usize];
        if (uop.properties_index as usize) < instr.uop_properties.len() {
            &instr.uop_properties[uop.properties_index as usize]
        } else {
            let merge_index = uop.properties_index as usize - instr.uop_properties.len();
            &instr.reg_merge_uop_properties[merge_index]
        }
    }
}
