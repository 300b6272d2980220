//! Static instruction templates.
//!
//! An `Instr` is the per-iform template looked up once per distinct
//! instruction in the program; every dynamic occurrence (`InstrInstance`,
//! in `uarch-sim`) shares the same `Instr` and just carries its own operand
//! bindings and addresses. Field names and the uop-properties shape mirror
//! the reference instruction tables this core's inputs are transcribed from.

use crate::config::Port;
use crate::operand::Operand;

/// Per-uop static properties: which ports it may issue to, what it reads
/// and writes, and its latency class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UopProperties {
    /// Ports this uop may be assigned to dispatch on.
    pub possible_ports: Vec<Port>,
    pub input_operands: Vec<Operand>,
    pub output_operands: Vec<Operand>,
    /// Cycles from dispatch to result availability.
    pub latency: u32,
    pub is_load: bool,
    pub is_store_address: bool,
    pub is_store_data: bool,
    /// Cycles the divider (or other serially-shared unit) is occupied for,
    /// if this uop ties one up; `None` for uops with no such resource.
    pub divider_cycles: Option<u32>,
    pub is_first_uop_of_instr: bool,
    pub is_last_uop_of_instr: bool,
    /// False only for the second half of a microfused pair (e.g. the ALU
    /// half of a load+op), which shares its predecessor's fused-domain slot
    /// instead of starting a new one.
    pub starts_new_fused_uop: bool,
}

impl UopProperties {
    #[must_use]
    pub fn new(possible_ports: Vec<Port>, latency: u32) -> Self {
        Self {
            possible_ports,
            input_operands: Vec::new(),
            output_operands: Vec::new(),
            latency,
            is_load: false,
            is_store_address: false,
            is_store_data: false,
            divider_cycles: None,
            is_first_uop_of_instr: false,
            is_last_uop_of_instr: false,
            starts_new_fused_uop: true,
        }
    }

    #[must_use]
    pub const fn microfused_with_previous(mut self) -> Self {
        self.starts_new_fused_uop = false;
        self
    }

    #[must_use]
    pub fn with_inputs(mut self, ops: Vec<Operand>) -> Self {
        self.input_operands = ops;
        self
    }

    #[must_use]
    pub fn with_outputs(mut self, ops: Vec<Operand>) -> Self {
        self.output_operands = ops;
        self
    }

    #[must_use]
    pub const fn with_load(mut self) -> Self {
        self.is_load = true;
        self
    }

    #[must_use]
    pub const fn with_store_address(mut self) -> Self {
        self.is_store_address = true;
        self
    }

    #[must_use]
    pub const fn with_store_data(mut self) -> Self {
        self.is_store_data = true;
        self
    }

    #[must_use]
    pub const fn with_divider_cycles(mut self, cycles: u32) -> Self {
        self.divider_cycles = Some(cycles);
        self
    }
}

/// A static instruction template: one entry per distinct iform appearing in
/// the program, shared by every dynamic instance of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    /// The disassembled form, used only for reporting.
    pub asm: String,
    /// Encoded length in bytes, as the predecoder needs to know it.
    pub instr_len: u32,
    /// True if a length-changing prefix forces the legacy decoder to stall
    /// when decoding this instruction.
    pub lcp_stall: bool,
    /// Uop templates generated when decoded by the legacy decoder or read
    /// from the DSB; empty for instructions handled entirely by the MS.
    pub uop_properties: Vec<UopProperties>,
    /// Extra "register merge" uops appended when a later read of a stale
    /// high-8 alias forces a merge with the zero/sign-extended write that
    /// preceded it. Populated by `with_register_merges`.
    pub reg_merge_uop_properties: Vec<UopProperties>,
    /// Uops generated instead when this instruction comes from the
    /// Microcode Sequencer; `None` for everything but MS-only instructions.
    pub ms_uop_count: Option<u32>,
    /// Fused-domain retirement slots this instruction consumes.
    pub retire_slots: u32,
    /// Whether the legacy decoder must use its complex decoder slot.
    pub uses_complex_decoder: bool,
    /// Whether this instruction ends its decode group (branches do).
    pub ends_decode_group: bool,
    pub is_branch: bool,
    pub is_serializing: bool,
    /// Whether this is a GPR/SIMD register-to-register move the renamer may
    /// eliminate instead of dispatching a uop for it.
    pub may_be_eliminated: bool,
    /// True if this instruction may macro-fuse with the one preceding it
    /// (e.g. a `CMP`/`TEST` immediately followed by a conditional jump).
    pub macro_fusible_with_previous: bool,
    /// Net RSP adjustment this instruction makes through the stack engine,
    /// if any (e.g. `-8` for `PUSH`, `+8` for `POP`).
    pub implicit_rsp_change: Option<i64>,
    /// Reciprocal throughput in cycles, when the reference table records
    /// one: the scheduler treats this instruction's string as a blocked
    /// resource for `tp` cycles after its first uop becomes ready, so back-
    /// to-back instances of the same iform can't ready faster than this.
    pub tp: Option<u32>,
}

impl Instr {
    /// Total uops this instruction expands to through the legacy decoder or
    /// DSB path (excludes MS and register-merge uops).
    #[must_use]
    pub fn n_uops(&self) -> u32 {
        self.uop_properties.len() as u32
    }

    /// A conservative stand-in for an iform absent from the instruction
    /// table: one uop, eligible for any port, with a generic latency.
    #[must_use]
    pub fn unknown(asm: impl Into<String>, instr_len: u32, all_ports: &[Port]) -> Self {
        Self {
            asm: asm.into(),
            instr_len,
            lcp_stall: false,
            uop_properties: vec![UopProperties::new(all_ports.to_vec(), 1)],
            reg_merge_uop_properties: Vec::new(),
            ms_uop_count: None,
            retire_slots: 1,
            uses_complex_decoder: false,
            ends_decode_group: false,
            is_branch: false,
            is_serializing: false,
            may_be_eliminated: false,
            macro_fusible_with_previous: false,
            implicit_rsp_change: None,
            tp: None,
        }
    }

    /// The synthetic stack-engine synchronization instruction the front-end
    /// injects when the running RSP offset needs folding back into an
    /// explicit write: a single unfused uop, one ALU port set, latency 1.
    #[must_use]
    pub fn stack_sync(ports: &[Port]) -> Self {
        let mut props = UopProperties::new(ports.to_vec(), 1);
        props.is_first_uop_of_instr = true;
        props.is_last_uop_of_instr = true;
        props.output_operands = vec![crate::operand::Operand::reg("RSP")];
        Self {
            asm: "<stack sync>".into(),
            instr_len: 0,
            lcp_stall: false,
            uop_properties: vec![props],
            reg_merge_uop_properties: Vec::new(),
            ms_uop_count: None,
            retire_slots: 1,
            uses_complex_decoder: false,
            ends_decode_group: false,
            is_branch: false,
            is_serializing: false,
            may_be_eliminated: false,
            macro_fusible_with_previous: false,
            implicit_rsp_change: None,
            tp: None,
        }
    }
}
