//! End-to-end scenarios exercising the assembled pipeline against small,
//! hand-built instruction streams instead of synthetic single-uop stand-ins.

use uarch_sim::{run, Bottleneck, Program};
use uarch_types::{Instr, MemAddr, MemOperand, MicroArchConfig, Operand, UopProperties};

fn mem(base: &str) -> Operand {
    Operand::Mem(MemOperand {
        mem_addr: MemAddr {
            base: Some(base.to_string()),
            index: None,
            scale: 1,
            displacement: 0,
        },
    })
}

#[test]
fn four_independent_adds_saturate_four_ports() {
    // Each instance is independent (distinct architectural destination), so
    // nothing but port/issue/retire width can throttle throughput.
    let cfg = MicroArchConfig::haswell_like();
    let mut instr = Instr::unknown("add", 3, &[0, 1, 5, 6]);
    instr.uop_properties = vec![UopProperties::new(vec![0, 1, 5, 6], 1)];
    let program = Program::new(vec![instr], vec![0]);

    let report = run(&program, &cfg, 400).expect("valid run");
    // issue_width and retire_width are both 4 and the uop can land on any of
    // four distinct ports, so steady state should retire close to one
    // instance per cycle.
    assert!(
        report.cycles_per_instruction < 1.3,
        "expected near-1 CPI, got {}",
        report.cycles_per_instruction
    );
}

#[test]
fn divider_bound_stream_is_throttled_to_divider_bottleneck() {
    let cfg = MicroArchConfig::haswell_like();
    let mut instr = Instr::unknown("div", 3, &[0]);
    instr.uop_properties = vec![UopProperties::new(vec![0], 1).with_divider_cycles(20)];
    let program = Program::new(vec![instr], vec![0]);

    let report = run(&program, &cfg, 600).expect("valid run");
    assert!(
        report.cycles_per_instruction >= 15.0,
        "expected the shared divider to dominate, got CPI {}",
        report.cycles_per_instruction
    );
    assert_eq!(report.bottleneck, Bottleneck::Divider);
}

#[test]
fn store_then_load_to_same_address_forwards_and_retires() {
    let cfg = MicroArchConfig::haswell_like();

    let mut store = Instr::unknown("mov [rax], rbx", 3, &[2, 3, 4]);
    store.uop_properties = vec![UopProperties::new(vec![4], 1)
        .with_store_address()
        .with_store_data()
        .with_inputs(vec![mem("RAX"), Operand::reg("RBX")])];

    let mut load = Instr::unknown("mov rcx, [rax]", 3, &[2, 3]);
    load.uop_properties = vec![UopProperties::new(vec![2, 3], 5)
        .with_load()
        .with_inputs(vec![mem("RAX")])
        .with_outputs(vec![Operand::reg("RCX")])];

    let program = Program::new(vec![store, load], vec![0, 1]);
    let report = run(&program, &cfg, 300).expect("valid run");

    assert!(report.instances_retired > 0);
    assert!(report.cycles_per_instruction.is_finite());
}

#[test]
fn lsd_eligible_small_loop_runs_to_completion() {
    // A loop body well under idq_width is exactly the case the Loop Stream
    // Detector is meant to replay from instead of re-fetching every
    // iteration; this only checks the whole pipeline keeps making forward
    // progress once LSD replay takes over; it does not assert LSD was
    // actually used, since that's internal front-end state.
    let mut cfg = MicroArchConfig::haswell_like();
    cfg.lsd_enabled = true;

    let mut add = Instr::unknown("add eax, 1", 3, &[0, 1, 5, 6]);
    add.uop_properties = vec![UopProperties::new(vec![0, 1, 5, 6], 1)
        .with_inputs(vec![Operand::reg("EAX")])
        .with_outputs(vec![Operand::reg("EAX")])];

    let mut dec = Instr::unknown("dec ecx", 2, &[0, 1, 5, 6]);
    dec.uop_properties = vec![UopProperties::new(vec![0, 1, 5, 6], 1)
        .with_inputs(vec![Operand::reg("ECX")])
        .with_outputs(vec![Operand::reg("ECX")])];

    let program = Program::new(vec![add, dec], vec![0, 1]);
    let report = run(&program, &cfg, 300).expect("valid run");

    assert!(report.instances_retired > 50);
}

#[test]
fn fast_pointer_chasing_shortens_a_base_only_load_chain() {
    // A chain of loads where each load's base register is the previous
    // load's own result: "mov rax, [rax]" repeated. With fastPointerChasing
    // enabled, bare base-register addressing gets a 1-cycle latency
    // discount, so the chain should retire faster than with it disabled.
    let chain = |fast: bool| {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.fast_pointer_chasing = fast;

        let mut load = Instr::unknown("mov rax, [rax]", 3, &[2, 3]);
        load.uop_properties = vec![UopProperties::new(vec![2, 3], 4)
            .with_load()
            .with_inputs(vec![Operand::reg("RAX"), mem("RAX")])
            .with_outputs(vec![Operand::reg("RAX")])];

        let program = Program::new(vec![load], vec![0]);
        run(&program, &cfg, 400).expect("valid run").cycles_per_instruction
    };

    let with_discount = chain(true);
    let without_discount = chain(false);
    assert!(
        with_discount < without_discount,
        "expected fast_pointer_chasing to shorten the chain: {with_discount} vs {without_discount}"
    );
}
