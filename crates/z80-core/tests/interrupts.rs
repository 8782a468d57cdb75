//! Interrupt acceptance, all three maskable modes plus NMI and HALT.

use machine_core::{Cpu, FlatBus};
use z80_core::{Trace, Z80};

fn run_ticks(cpu: &mut Z80, mem: &mut FlatBus, io: &mut FlatBus, n: usize) {
    for _ in 0..n {
        cpu.tick(mem, io).expect("decode failure");
    }
}

fn step(cpu: &mut Z80, mem: &mut FlatBus, io: &mut FlatBus) -> usize {
    let mut ticks = 0;
    loop {
        cpu.tick(mem, io).expect("decode failure");
        ticks += 1;
        if cpu.is_instruction_complete() {
            return ticks;
        }
        assert!(ticks < 64, "instruction did not complete");
    }
}

fn interruptible_cpu(pc: u16, im: u8) -> Z80 {
    let mut cpu = Z80::new();
    cpu.regs.pc = pc;
    cpu.regs.sp = 0xFFFE;
    cpu.iff1 = true;
    cpu.iff2 = true;
    cpu.im = im;
    cpu
}

#[test]
fn mode_2_vectors_through_the_table() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 2);
    cpu.regs.i = 0x80;
    // Vector table entry at 0x8000 points at the handler.
    mem.load(0x8000, &[0x00, 0x90]);
    // Handler starts with EI.
    mem.load(0x9000, &[0xFB]);

    assert!(cpu.interrupt_with_data(&[0x00]));

    // 19 T-cycles to reach the handler's first instruction.
    run_ticks(&mut cpu, &mut mem, &mut io, 18);
    assert!(!cpu.is_instruction_complete());
    run_ticks(&mut cpu, &mut mem, &mut io, 1);
    assert!(cpu.is_instruction_complete());

    assert_eq!(cpu.regs.pc, 0x9000);
    assert_eq!(cpu.regs.sp, 0xFFFC);
    assert_eq!(mem.peek(0xFFFD), 0x01, "pushed return address high");
    assert_eq!(mem.peek(0xFFFC), 0x00, "pushed return address low");
    assert!(!cpu.iff1);
    assert!(!cpu.iff2);
    assert_eq!(cpu.most_recent_instruction, Some(Trace::Int(2)));
}

#[test]
fn mode_2_exhausted_data_source_reads_zero() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 2);
    cpu.regs.i = 0x80;
    mem.load(0x8000, &[0x34, 0x12]);

    // No acknowledge bytes at all: the vector byte reads as 0x00.
    assert!(cpu.interrupt_with_data(&[]));
    run_ticks(&mut cpu, &mut mem, &mut io, 19);
    assert_eq!(cpu.regs.pc, 0x1234);
}

#[test]
fn mode_2_masks_bit_zero_of_the_vector() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 2);
    cpu.regs.i = 0x80;
    mem.load(0x8002, &[0x00, 0x60]);

    assert!(cpu.interrupt_with_data(&[0x03]));
    run_ticks(&mut cpu, &mut mem, &mut io, 19);
    assert_eq!(cpu.regs.pc, 0x6000, "vector byte taken as 0x02");
}

#[test]
fn mode_1_jumps_to_0x38() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0200, 1);

    assert!(cpu.interrupt_with_data(&[]));
    run_ticks(&mut cpu, &mut mem, &mut io, 12);
    assert!(!cpu.is_instruction_complete());
    run_ticks(&mut cpu, &mut mem, &mut io, 1);
    assert!(cpu.is_instruction_complete());

    assert_eq!(cpu.regs.pc, 0x0038);
    assert_eq!(cpu.regs.sp, 0xFFFC);
    assert_eq!(mem.peek(0xFFFD), 0x02);
    assert_eq!(mem.peek(0xFFFC), 0x00);
    assert!(!cpu.iff1);
    assert_eq!(cpu.most_recent_instruction, Some(Trace::Int(1)));
}

#[test]
fn mode_0_executes_the_supplied_opcode() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0200, 0);

    // The device puts RST 38H on the bus.
    assert!(cpu.interrupt_with_data(&[0xFF]));

    // RST costs 11; the acknowledge fetch adds two extra cycles.
    let mut ticks = 0;
    loop {
        cpu.tick(&mut mem, &mut io).expect("decode failure");
        ticks += 1;
        if cpu.is_instruction_complete() {
            break;
        }
    }
    assert_eq!(ticks, 13);
    assert_eq!(cpu.regs.pc, 0x0038);
    // PC was never advanced by the injected fetch: the interrupted
    // address is what gets pushed.
    assert_eq!(mem.peek(0xFFFD), 0x02);
    assert_eq!(mem.peek(0xFFFC), 0x00);
}

#[test]
fn maskable_interrupt_ignored_while_disabled() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 1);
    cpu.iff1 = false;
    cpu.iff2 = false;
    mem.load(0x0100, &[0x00, 0x00]);

    assert!(!cpu.interrupt_with_data(&[]));
    let ticks = step(&mut cpu, &mut mem, &mut io);
    assert_eq!(ticks, 4, "plain NOP, no acceptance");
    assert_eq!(cpu.regs.pc, 0x0101);
}

#[test]
fn nmi_bypasses_iff1_and_retn_restores_it() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 1);
    // Handler: RETN.
    mem.load(0x0066, &[0xED, 0x45]);

    cpu.nmi();
    run_ticks(&mut cpu, &mut mem, &mut io, 11);
    assert!(cpu.is_instruction_complete());
    assert_eq!(cpu.regs.pc, 0x0066);
    assert_eq!(cpu.regs.sp, 0xFFFC);
    assert!(!cpu.iff1, "NMI clears IFF1");
    assert!(cpu.iff2, "IFF2 preserved for RETN");
    assert_eq!(cpu.most_recent_instruction, Some(Trace::Nmi));

    let ticks = step(&mut cpu, &mut mem, &mut io);
    assert_eq!(ticks, 14);
    assert_eq!(cpu.regs.pc, 0x0100);
    assert_eq!(cpu.regs.sp, 0xFFFE);
    assert!(cpu.iff1, "RETN restores IFF1 from IFF2");
}

#[test]
fn halt_spins_until_an_interrupt_is_latched() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 1);
    mem.load(0x0100, &[0x76]);
    mem.load(0x0038, &[0xFB]);

    // Three full refetches of the HALT opcode.
    for _ in 0..3 {
        let ticks = step(&mut cpu, &mut mem, &mut io);
        assert_eq!(ticks, 4);
        assert_eq!(cpu.regs.pc, 0x0100, "PC backed up to refetch HALT");
        assert!(cpu.halted);
    }

    // Latch the interrupt partway through the next refetch: the
    // in-flight HALT completes without backing up.
    run_ticks(&mut cpu, &mut mem, &mut io, 2);
    assert!(cpu.interrupt_with_data(&[]));
    run_ticks(&mut cpu, &mut mem, &mut io, 2);
    assert!(cpu.is_instruction_complete());
    assert_eq!(cpu.regs.pc, 0x0101);
    assert!(!cpu.halted);

    // ...and the next machine cycle accepts the interrupt.
    run_ticks(&mut cpu, &mut mem, &mut io, 13);
    assert_eq!(cpu.regs.pc, 0x0038);
    assert_eq!(mem.peek(0xFFFC), 0x01, "return address is past the HALT");
}

#[test]
fn interrupt_waits_for_the_current_instruction() {
    let mut mem = FlatBus::new();
    let mut io = FlatBus::new();
    let mut cpu = interruptible_cpu(0x0100, 1);
    // A 10-cycle instruction to interrupt in the middle of.
    mem.load(0x0100, &[0x01, 0x34, 0x12]);

    run_ticks(&mut cpu, &mut mem, &mut io, 5);
    assert!(cpu.interrupt_with_data(&[]));
    run_ticks(&mut cpu, &mut mem, &mut io, 5);

    // LD BC,nn ran to completion before acceptance.
    assert_eq!(cpu.regs.get(z80_core::Reg::BC), 0x1234);
    assert_eq!(cpu.regs.pc, 0x0103);

    run_ticks(&mut cpu, &mut mem, &mut io, 13);
    assert_eq!(cpu.regs.pc, 0x0038);
    assert_eq!(mem.peek(0xFFFD), 0x01);
    assert_eq!(mem.peek(0xFFFC), 0x03);
}
