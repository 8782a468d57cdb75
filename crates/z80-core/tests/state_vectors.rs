//! JSON-driven whole-instruction state tests.
//!
//! Each vector gives an initial CPU/RAM state, the expected final state,
//! and the T-cycle count; the harness runs exactly that many ticks and
//! diffs everything. The vector format follows the single-step test
//! convention: sparse RAM as `(address, value)` pairs, preloaded port
//! reads as `(port, value, "r")` triples.

use machine_core::FlatBus;
use serde::Deserialize;
use z80_core::Z80;

#[derive(Deserialize)]
struct TestCase {
    name: String,
    initial: CpuState,
    #[serde(rename = "final")]
    final_state: CpuState,
    cycles: usize,
    #[serde(default)]
    ports: Vec<(u16, u8, String)>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CpuState {
    pc: u16,
    sp: u16,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    f: u8,
    h: u8,
    l: u8,
    i: u8,
    r: u8,
    ix: u16,
    iy: u16,
    iff1: u8,
    iff2: u8,
    im: u8,
    ram: Vec<(u16, u8)>,
}

fn setup(cpu: &mut Z80, mem: &mut FlatBus, io: &mut FlatBus, state: &CpuState, ports: &[(u16, u8, String)]) {
    for &(addr, value) in &state.ram {
        mem.load(addr, &[value]);
    }
    for &(port, value, ref dir) in ports {
        if dir == "r" {
            io.port_reads.insert(port, value);
        }
    }

    cpu.regs.a = state.a;
    cpu.regs.f = state.f;
    cpu.regs.b = state.b;
    cpu.regs.c = state.c;
    cpu.regs.d = state.d;
    cpu.regs.e = state.e;
    cpu.regs.h = state.h;
    cpu.regs.l = state.l;
    cpu.regs.i = state.i;
    cpu.regs.r = state.r;
    cpu.regs.ix = state.ix;
    cpu.regs.iy = state.iy;
    cpu.regs.sp = state.sp;
    cpu.regs.pc = state.pc;
    cpu.iff1 = state.iff1 != 0;
    cpu.iff2 = state.iff2 != 0;
    cpu.im = state.im;
}

fn compare(cpu: &Z80, mem: &FlatBus, expected: &CpuState) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |name: &str, actual: u16, want: u16| {
        if actual != want {
            errors.push(format!("{name}: got ${actual:04X}, want ${want:04X}"));
        }
    };

    check("A", u16::from(cpu.regs.a), u16::from(expected.a));
    check("F", u16::from(cpu.regs.f), u16::from(expected.f));
    check("B", u16::from(cpu.regs.b), u16::from(expected.b));
    check("C", u16::from(cpu.regs.c), u16::from(expected.c));
    check("D", u16::from(cpu.regs.d), u16::from(expected.d));
    check("E", u16::from(cpu.regs.e), u16::from(expected.e));
    check("H", u16::from(cpu.regs.h), u16::from(expected.h));
    check("L", u16::from(cpu.regs.l), u16::from(expected.l));
    check("I", u16::from(cpu.regs.i), u16::from(expected.i));
    check("R", u16::from(cpu.regs.r), u16::from(expected.r));
    check("IX", cpu.regs.ix, expected.ix);
    check("IY", cpu.regs.iy, expected.iy);
    check("SP", cpu.regs.sp, expected.sp);
    check("PC", cpu.regs.pc, expected.pc);

    for &(addr, want) in &expected.ram {
        let actual = mem.peek(addr);
        if actual != want {
            errors.push(format!("RAM[${addr:04X}]: got ${actual:02X}, want ${want:02X}"));
        }
    }
    errors
}

fn run_vectors(json: &str) {
    let tests: Vec<TestCase> = serde_json::from_str(json).expect("malformed test vectors");
    let mut failures = Vec::new();

    for test in &tests {
        let mut cpu = Z80::new();
        let mut mem = FlatBus::new();
        let mut io = FlatBus::new();
        setup(&mut cpu, &mut mem, &mut io, &test.initial, &test.ports);

        for _ in 0..test.cycles {
            if let Err(e) = cpu.tick(&mut mem, &mut io) {
                failures.push(format!("[{}] {e}", test.name));
                break;
            }
        }
        if !cpu.is_instruction_complete() {
            failures.push(format!("[{}] not at an instruction boundary", test.name));
        }
        for error in compare(&cpu, &mem, &test.final_state) {
            failures.push(format!("[{}] {error}", test.name));
        }
    }

    assert!(failures.is_empty(), "\n{}", failures.join("\n"));
}

#[test]
fn embedded_vectors() {
    run_vectors(
        r#"[
        {
            "name": "3E 42: LD A,n",
            "initial": { "pc": 256, "ram": [[256, 62], [257, 66]] },
            "final":   { "pc": 258, "a": 66, "ram": [[256, 62], [257, 66]] },
            "cycles": 7
        },
        {
            "name": "80: ADD B",
            "initial": { "pc": 256, "a": 63, "b": 1, "ram": [[256, 128]] },
            "final":   { "pc": 257, "a": 64, "b": 1, "f": 16, "ram": [[256, 128]] },
            "cycles": 4
        },
        {
            "name": "C5: PUSH BC",
            "initial": { "pc": 256, "sp": 65534, "b": 190, "c": 239, "ram": [[256, 197]] },
            "final":   { "pc": 257, "sp": 65532, "b": 190, "c": 239,
                         "ram": [[65533, 190], [65532, 239]] },
            "cycles": 11
        },
        {
            "name": "C3 00 20: JP nn",
            "initial": { "pc": 256, "ram": [[256, 195], [257, 0], [258, 32]] },
            "final":   { "pc": 8192, "ram": [[256, 195]] },
            "cycles": 10
        },
        {
            "name": "DB FE: IN A,n",
            "initial": { "pc": 256, "a": 18, "ram": [[256, 219], [257, 254]] },
            "final":   { "pc": 258, "a": 90, "ram": [[256, 219]] },
            "cycles": 11,
            "ports": [[4862, 90, "r"]]
        },
        {
            "name": "ED 44: NEG",
            "initial": { "pc": 256, "a": 1, "ram": [[256, 237], [257, 68]] },
            "final":   { "pc": 258, "a": 255, "f": 191, "ram": [[256, 237]] },
            "cycles": 8
        }
    ]"#,
    );
}
