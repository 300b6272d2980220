//! Front-end: fetch through delivery into the Instruction Decode Queue.
//!
//! Each cycle the front-end picks exactly one uop source — the DSB, the
//! legacy decoder (MITE), the Loop Stream Detector (LSD), or the Microcode
//! Sequencer (MS) — and appends whatever it delivers to the IDQ, which the
//! renamer drains from independently. Priority: MS (if an MS instruction is
//! mid-delivery) > LSD (once a loop has been recognised as LSD-eligible) >
//! DSB (once a block has been established as cacheable) > MITE.

pub mod decoder;
pub mod dsb;
pub mod microcode;
pub mod predecoder;
pub mod stack_engine;

use std::collections::VecDeque;

use tracing::trace;
use uarch_types::operand::HIGH8_REGS;
use uarch_types::{Instr, MicroArchConfig, Operand};

use crate::instance_gen::{build_synthetic_instance, macro_fuse, InstanceGenerator, Program};
use crate::uop::{InstanceId, LaminatedUopId, UopArena};
use decoder::decode_cycle;
use dsb::Dsb;
use microcode::MicrocodeSequencer;
use predecoder::PreDecoder;
use stack_engine::StackEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSource {
    Mite,
    Dsb,
    Lsd,
    Ms,
}

/// Whether the LSD may ever replay `instr`: it must produce no MS uops,
/// make no implicit RSP adjustment (the stack engine's running offset isn't
/// modeled across LSD replay), and touch no stale high-8 alias (the
/// register-merge uops those force aren't modeled there either).
fn can_be_used_by_lsd(instr: &Instr) -> bool {
    if instr.ms_uop_count.is_some() || instr.implicit_rsp_change.is_some() {
        return false;
    }
    !instr
        .uop_properties
        .iter()
        .chain(&instr.reg_merge_uop_properties)
        .flat_map(|p| p.input_operands.iter().chain(&p.output_operands))
        .any(|op| matches!(op, Operand::Reg(r) if HIGH8_REGS.contains(&r.reg.as_str())))
}

/// Orchestrates fetch, predecode, decode, DSB lookup, LSD replay, and MS
/// sequencing, handing the renamer a stream of laminated uops through `idq`.
pub struct FrontEnd<'p> {
    cfg: &'p MicroArchConfig,
    instrs: &'p [Instr],
    order_len: usize,
    /// Index into `instrs` of the synthetic stack-sync instruction template
    /// the caller appended for this run.
    stack_sync_instr_index: u32,

    gen: InstanceGenerator<'p>,
    predecoder: PreDecoder,
    dsb: Dsb,
    ms: MicrocodeSequencer,
    pub stack_engine: StackEngine,

    idq: VecDeque<LaminatedUopId>,
    order_position: usize,
    last_source: Option<LastSource>,

    lsd_eligible: bool,
    iterations_completed: u32,
    lsd_unroll: u32,

    /// Last instance predecoded through the MITE, kept so a following
    /// macro-fusible instruction (e.g. a `Jcc` after its `CMP`/`TEST`) can
    /// be fused into it.
    last_mite_instance: Option<InstanceId>,
}

impl<'p> FrontEnd<'p> {
    #[must_use]
    pub fn new(
        program: &'p Program,
        cfg: &'p MicroArchConfig,
        start_address: u64,
        stack_sync_instr_index: u32,
    ) -> Self {
        let mut dsb = Dsb::new();
        let mut addr = start_address;
        let addresses: Vec<u64> = program
            .order
            .iter()
            .map(|&idx| {
                let a = addr;
                addr += u64::from(program.instrs[idx as usize].instr_len);
                a
            })
            .collect();
        dsb.warm_up(cfg, &program.instrs, &program.order, &addresses);

        let total_uops: u32 = program
            .order
            .iter()
            .map(|&idx| program.instrs[idx as usize].n_uops())
            .sum();
        let lsd_eligible = cfg.lsd_enabled
            && total_uops <= cfg.idq_width
            && dsb.all_covered(program.order.len())
            && program
                .order
                .iter()
                .all(|&idx| can_be_used_by_lsd(&program.instrs[idx as usize]));
        let lsd_unroll = cfg.lsd_unroll_count(total_uops);

        Self {
            cfg,
            instrs: &program.instrs,
            order_len: program.order.len(),
            stack_sync_instr_index,
            gen: InstanceGenerator::new(program, start_address),
            predecoder: PreDecoder::new(),
            dsb,
            ms: MicrocodeSequencer::new(),
            stack_engine: StackEngine::new(),
            idq: VecDeque::new(),
            order_position: 0,
            last_source: None,
            lsd_eligible,
            iterations_completed: 0,
            lsd_unroll,
            last_mite_instance: None,
        }
    }

    #[must_use]
    pub fn idq_len(&self) -> usize {
        self.idq.len()
    }

    /// Copies up to `max` laminated uops from the head of the IDQ without
    /// removing them, for the renamer to decide how many it can actually
    /// issue this cycle.
    #[must_use]
    pub fn peek_idq(&self, max: usize) -> Vec<LaminatedUopId> {
        self.idq.iter().take(max).copied().collect()
    }

    /// Removes the `n` oldest IDQ entries, once the renamer has issued them.
    pub fn consume_idq(&mut self, n: usize) {
        self.idq.drain(..n.min(self.idq.len()));
    }

    fn instr_of(&self, arena: &UopArena, instance: InstanceId) -> &'p Instr {
        &self.instrs[arena.instance(instance).instr_index as usize]
    }

    fn using_lsd(&self) -> bool {
        self.lsd_eligible && self.iterations_completed >= 1
    }

    /// Builds the synthetic instance for a stack-sync uop triggered at
    /// `address`, returning its (sole) laminated uop.
    fn synthesize_stack_sync(&self, arena: &mut UopArena, address: u64) -> LaminatedUopId {
        let instr = &self.instrs[self.stack_sync_instr_index as usize];
        let instance = build_synthetic_instance(arena, instr, self.stack_sync_instr_index, address);
        arena.instance(instance).laminated_uops[0]
    }

    /// Advances the front-end by one cycle, generating new instruction
    /// instances as needed and appending whatever this cycle's chosen
    /// source delivers to the IDQ.
    pub fn cycle(&mut self, arena: &mut UopArena, cycle: u64) {
        if self.idq.len() >= self.cfg.idq_width as usize {
            return;
        }

        if !self.ms.is_idle() {
            self.deliver_from_ms(arena, cycle);
            return;
        }

        if self.using_lsd() {
            self.deliver_from_lsd(arena, cycle);
            return;
        }

        if self.dsb.covers(self.order_position) {
            self.deliver_from_dsb(arena, cycle);
        } else {
            self.deliver_from_mite(arena, cycle);
        }
    }

    fn advance_order_position(&mut self) {
        let was_at_end = self.order_position + 1 >= self.order_len;
        self.order_position = (self.order_position + 1) % self.order_len;
        if was_at_end {
            self.iterations_completed += 1;
        }
    }

    fn maybe_enter_ms(&mut self, arena: &UopArena, instance: InstanceId) -> bool {
        let instr = self.instr_of(arena, instance);
        if let Some(_ms_uops) = instr.ms_uop_count {
            let came_from_dsb = self.last_source == Some(LastSource::Dsb);
            self.ms.enter(self.cfg, instr.n_uops(), came_from_dsb);
            self.last_source = Some(LastSource::Ms);
            true
        } else {
            false
        }
    }

    fn deliver_from_mite(&mut self, arena: &mut UopArena, cycle: u64) {
        self.predecoder.predecode_cycle(self.cfg, cycle, || {
            let instance = self.gen.generate_next(arena);
            let instr = self.instr_of(arena, instance);
            let address = arena.instance(instance).address;
            let needs_sync = self.stack_engine.observe(instr);
            let ends_group = instr.ends_decode_group || instr.is_branch;
            if instr.macro_fusible_with_previous {
                if let Some(prev) = self.last_mite_instance {
                    macro_fuse(arena, prev, instance);
                }
            }
            self.last_mite_instance = Some(instance);
            self.advance_order_position();
            let stack_sync = needs_sync.then(|| self.synthesize_stack_sync(arena, address));
            (instance, ends_group, stack_sync)
        });

        let mut out = Vec::new();
        let decoded = decode_cycle(self.cfg, &mut self.predecoder, arena, self.instrs, cycle, &mut out);
        for instance in &decoded {
            if self.maybe_enter_ms(arena, *instance) {
                break;
            }
        }
        trace!(cycle, n = out.len(), "MITE delivered uops to IDQ");
        self.idq.extend(out);
        self.last_source = Some(LastSource::Mite);
    }

    fn deliver_from_dsb(&mut self, arena: &mut UopArena, cycle: u64) {
        let mut out = Vec::new();
        let mut positions_consumed = 0;
        while positions_consumed == 0 || (out.len() as u32) < self.cfg.dsb_width {
            let position = self.order_position;
            if !self.dsb.covers(position) {
                break;
            }
            let instance = self.gen.generate_next(arena);
            let instr = self.instr_of(arena, instance);
            let address = arena.instance(instance).address;
            if self.stack_engine.observe(instr) {
                out.push(self.synthesize_stack_sync(arena, address));
            }
            out.extend(arena.instance(instance).laminated_uops.iter().copied());
            self.advance_order_position();
            positions_consumed += 1;
            if self.maybe_enter_ms(arena, instance) {
                break;
            }
            if out.len() as u32 >= self.cfg.dsb_width {
                break;
            }
        }
        trace!(cycle, n = out.len(), "DSB delivered uops to IDQ");
        self.idq.extend(out);
        self.last_source = Some(LastSource::Dsb);
    }

    fn deliver_from_lsd(&mut self, arena: &mut UopArena, cycle: u64) {
        let mut out = Vec::new();
        for _ in 0..self.lsd_unroll.max(1) {
            if (out.len() as u32) >= self.cfg.idq_width {
                break;
            }
            let instance = self.gen.generate_next(arena);
            let instr = self.instr_of(arena, instance);
            let address = arena.instance(instance).address;
            if self.stack_engine.observe(instr) {
                out.push(self.synthesize_stack_sync(arena, address));
            }
            out.extend(arena.instance(instance).laminated_uops.iter().copied());
            self.advance_order_position();
        }
        trace!(cycle, n = out.len(), "LSD replayed loop body to IDQ");
        self.idq.extend(out);
        self.last_source = Some(LastSource::Lsd);
    }

    fn deliver_from_ms(&mut self, _arena: &mut UopArena, cycle: u64) {
        let delivered = self.ms.cycle();
        trace!(cycle, delivered, "MS delivering");
        if self.ms.is_idle() {
            self.last_source = Some(LastSource::Ms);
        }
    }
}
