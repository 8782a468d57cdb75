//! The instruction decode tables.
//!
//! Seven 256-entry tables — unprefixed plus one per prefix (CB, DD, ED,
//! FD, DDCB, FDCB) — map each opcode to the extra T-cycles its fetch
//! consumes, the micro-ops run at the end of the fetch, the follow-on
//! machine states, and the mnemonic/length pair the disassembler uses.
//! Prefix bytes map to placeholder entries of length 0 whose only
//! follow-on is a nested fetch carrying the prefix.
//!
//! The tables are built once, behind a `OnceLock`, so in-flight machine
//! states can borrow entry data for the whole run.

use std::sync::OnceLock;

use crate::error::UnrecognisedInstruction;
use crate::flags::Flag;
use crate::microcode::{AluOp, Ctx, FlagUpdate, MicroOp, Pred, RotOp, Src8, Val};
use crate::registers::Reg;
use crate::state::{AddrMode, Key, Opcode, Prefix, StateSpec, Transform, WriteSrc};

/// One decode-table entry.
#[derive(Debug)]
pub struct Entry {
    /// Extra T-cycles added to the opcode fetch that decodes this entry.
    pub(crate) extra: u8,
    /// Micro-ops run when the fetch completes.
    pub(crate) actions: Vec<MicroOp>,
    /// Machine states appended to the pipeline.
    pub(crate) states: Vec<StateSpec>,
    /// Disassembly template; `nn`, `n` and `+d` are substituted.
    pub mnemonic: String,
    /// Encoded instruction length in bytes, prefixes included. Zero
    /// marks a prefix placeholder.
    pub length: u8,
}

pub struct Decoder {
    main: [Option<Entry>; 256],
    cb: [Option<Entry>; 256],
    dd: [Option<Entry>; 256],
    ed: [Option<Entry>; 256],
    fd: [Option<Entry>; 256],
    ddcb: [Option<Entry>; 256],
    fdcb: [Option<Entry>; 256],
    /// Pipelines injected on interrupt acceptance.
    pub(crate) nmi_states: Vec<StateSpec>,
    pub(crate) im0_states: Vec<StateSpec>,
    pub(crate) im1_states: Vec<StateSpec>,
    pub(crate) im2_states: Vec<StateSpec>,
}

static DECODER: OnceLock<Decoder> = OnceLock::new();
static NO_ENTRY: Option<Entry> = None;

/// The process-wide decoder, built on first use.
pub fn decoder() -> &'static Decoder {
    DECODER.get_or_init(Decoder::build)
}

impl Decoder {
    /// Look an opcode up, surfacing the offending bytes on a miss.
    pub fn lookup(&self, op: Opcode) -> Result<&Entry, UnrecognisedInstruction> {
        let slot = match op {
            Opcode::One(b) => &self.main[usize::from(b)],
            Opcode::Two(0xCB, b) => &self.cb[usize::from(b)],
            Opcode::Two(0xDD, b) => &self.dd[usize::from(b)],
            Opcode::Two(0xED, b) => &self.ed[usize::from(b)],
            Opcode::Two(0xFD, b) => &self.fd[usize::from(b)],
            Opcode::Three(0xDD, 0xCB, b) => &self.ddcb[usize::from(b)],
            Opcode::Three(0xFD, 0xCB, b) => &self.fdcb[usize::from(b)],
            _ => &NO_ENTRY,
        };
        slot.as_ref().ok_or(UnrecognisedInstruction(op))
    }

    fn build() -> Self {
        Self {
            main: build_main(),
            cb: build_cb(),
            dd: build_index(Reg::IX, Reg::IXH, Reg::IXL, Prefix::DdCb),
            ed: build_ed(),
            fd: build_index(Reg::IY, Reg::IYH, Reg::IYL, Prefix::FdCb),
            ddcb: build_index_cb(Reg::IX),
            fdcb: build_index_cb(Reg::IY),
            nmi_states: vec![
                io(5, Some(MicroOp::IntAck)),
                sw(WriteSrc::Reg(Reg::PCH), 0, None),
                sw(WriteSrc::Reg(Reg::PCL), 0, Some(jp(Val::Lit(0x0066)))),
            ],
            im0_states: vec![StateSpec::Ocf {
                prefix: None,
                extra: 2,
            }],
            im1_states: vec![
                io(7, Some(MicroOp::IntAck)),
                sw(WriteSrc::Reg(Reg::PCH), 0, None),
                sw(WriteSrc::Reg(Reg::PCL), 0, Some(jp(Val::Lit(0x0038)))),
            ],
            im2_states: vec![
                io(4, None),
                StateSpec::Od {
                    key: Key::Value,
                    signed: false,
                    compound: true,
                    action: Some(stash(Key::Address, Val::F(im2_vector))),
                },
                sw(WriteSrc::Reg(Reg::PCH), 0, None),
                sw(WriteSrc::Reg(Reg::PCL), 0, None),
                mr(AddrMode::Bag, true, None),
                mr(AddrMode::Bag, true, Some(jp(Val::Arg))),
            ],
        }
    }
}

// =========================================================================
// Entry and micro-op construction helpers
// =========================================================================

fn entry(
    extra: u8,
    actions: Vec<MicroOp>,
    states: Vec<StateSpec>,
    mnemonic: impl Into<String>,
    length: u8,
) -> Entry {
    Entry {
        extra,
        actions,
        states,
        mnemonic: mnemonic.into(),
        length,
    }
}

fn empty_table() -> [Option<Entry>; 256] {
    std::array::from_fn(|_| None)
}

fn set(table: &mut [Option<Entry>; 256], op: u8, e: Entry) {
    debug_assert!(table[usize::from(op)].is_none(), "duplicate entry {op:#04X}");
    table[usize::from(op)] = Some(e);
}

fn ld(r: Reg, v: Val) -> MicroOp {
    MicroOp::Ld(r, v)
}

fn ldrr(dst: Reg, src: Reg) -> MicroOp {
    MicroOp::Ld(dst, Val::Reg(src))
}

fn stash(key: Key, v: Val) -> MicroOp {
    MicroOp::Stash(key, v)
}

fn jp(v: Val) -> MicroOp {
    MicroOp::Jp(v)
}

fn seq(ops: Vec<MicroOp>) -> MicroOp {
    MicroOp::Seq(ops)
}

fn on_flag(f: Flag, op: MicroOp) -> MicroOp {
    MicroOp::OnFlag(f, Box::new(op))
}

fn unless_flag(f: Flag, op: MicroOp) -> MicroOp {
    MicroOp::UnlessFlag(f, Box::new(op))
}

fn on_zero(r: Reg, op: MicroOp) -> MicroOp {
    MicroOp::OnZero(r, Box::new(op))
}

fn force_h(pred: Pred) -> MicroOp {
    MicroOp::ForceFlag(Flag::H, pred)
}

/// `set_flags` storing the masked value in the `value` slot.
fn flags(template: &[u8; 8], value: Val) -> MicroOp {
    MicroOp::SetFlags(FlagUpdate {
        template: crate::flags::FlagTemplate::parse(template),
        value,
        dest: None,
        store: Some(Key::Value),
    })
}

/// `set_flags` also writing the masked value to a register.
fn flags_to(template: &[u8; 8], value: Val, dest: Reg) -> MicroOp {
    MicroOp::SetFlags(FlagUpdate {
        template: crate::flags::FlagTemplate::parse(template),
        value,
        dest: Some(dest),
        store: Some(Key::Value),
    })
}

/// `set_flags` leaving the bag alone (RRD/RLD keep `value` for the
/// write-back).
fn flags_reg_only(template: &[u8; 8], value: Val, dest: Reg) -> MicroOp {
    MicroOp::SetFlags(FlagUpdate {
        template: crate::flags::FlagTemplate::parse(template),
        value,
        dest: Some(dest),
        store: None,
    })
}

// =========================================================================
// Machine-state construction helpers
// =========================================================================

fn ocf(prefix: Prefix) -> StateSpec {
    StateSpec::Ocf {
        prefix: Some(prefix),
        extra: 0,
    }
}

/// Plain operand fetch into the `value` slot.
fn od() -> StateSpec {
    StateSpec::Od {
        key: Key::Value,
        signed: false,
        compound: true,
        action: None,
    }
}

fn od_act(action: MicroOp) -> StateSpec {
    StateSpec::Od {
        key: Key::Value,
        signed: false,
        compound: true,
        action: Some(action),
    }
}

fn od_key(key: Key) -> StateSpec {
    StateSpec::Od {
        key,
        signed: false,
        compound: true,
        action: None,
    }
}

fn od_signed(action: MicroOp) -> StateSpec {
    StateSpec::Od {
        key: Key::Value,
        signed: true,
        compound: true,
        action: Some(action),
    }
}

/// Signed displacement fetch into the `address` slot, resolved later by
/// an index-register add.
fn od_disp() -> StateSpec {
    StateSpec::Od {
        key: Key::Address,
        signed: true,
        compound: true,
        action: None,
    }
}

fn mr(addr: AddrMode, incaddr: bool, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Mr {
        addr,
        compound: true,
        incaddr,
        action,
    }
}

fn mw(addr: AddrMode, source: WriteSrc, extra: u8, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Mw {
        addr,
        source,
        extra,
        action,
    }
}

fn sr(extra: u8, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Sr { extra, action }
}

fn sw(source: WriteSrc, extra: u8, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Sw {
        source,
        extra,
        action,
    }
}

fn pr(high: Option<Reg>, low: Option<Reg>, dest: Option<Reg>, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Pr {
        high,
        low,
        dest,
        action,
    }
}

fn pw(high: Option<Reg>, low: Option<Reg>, source: WriteSrc, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Pw {
        high,
        low,
        source,
        action,
    }
}

fn io(ticks: u8, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Io {
        ticks,
        locked: true,
        transform: None,
        action,
    }
}

fn io_tr(ticks: u8, transform: Transform, action: Option<MicroOp>) -> StateSpec {
    StateSpec::Io {
        ticks,
        locked: true,
        transform: Some(transform),
        action,
    }
}

// =========================================================================
// Shared instruction recipes
// =========================================================================

/// Register order of the low three opcode bits; index 6 is the (HL) slot.
const R8: [Option<Reg>; 8] = [
    Some(Reg::B),
    Some(Reg::C),
    Some(Reg::D),
    Some(Reg::E),
    Some(Reg::H),
    Some(Reg::L),
    None,
    Some(Reg::A),
];

/// Register-pair order of opcode bits 4–5.
const RP: [Reg; 4] = [Reg::BC, Reg::DE, Reg::HL, Reg::SP];

const ALU_OPS: [(AluOp, &str); 8] = [
    (AluOp::Add, "ADD"),
    (AluOp::Adc, "ADC"),
    (AluOp::Sub, "SUB"),
    (AluOp::Sbc, "SBC"),
    (AluOp::And, "AND"),
    (AluOp::Xor, "XOR"),
    (AluOp::Or, "OR"),
    // CP is the odd one out; handled separately.
    (AluOp::Sub, "CP"),
];

const ROT_OPS: [(RotOp, &str); 8] = [
    (RotOp::Rlc, "RLC"),
    (RotOp::Rrc, "RRC"),
    (RotOp::Rl, "RL"),
    (RotOp::Rr, "RR"),
    (RotOp::Sla, "SLA"),
    (RotOp::Sra, "SRA"),
    (RotOp::Sl1, "SL1"),
    (RotOp::Srl, "SRL"),
];

/// Condition order of opcode bits 3–5: NZ, Z, NC, C, PO, PE, P, M.
/// `(flag, taken_when_set)`.
const CONDS: [(Flag, bool, &str); 8] = [
    (Flag::Z, false, "NZ"),
    (Flag::Z, true, "Z"),
    (Flag::C, false, "NC"),
    (Flag::C, true, "C"),
    (Flag::P, false, "PO"),
    (Flag::P, true, "PE"),
    (Flag::S, false, "P"),
    (Flag::S, true, "M"),
];

/// Abort the instruction when the condition is NOT met.
fn gate_abort(cc: usize) -> MicroOp {
    let (flag, taken_when_set, _) = CONDS[cc];
    if taken_when_set {
        unless_flag(flag, MicroOp::EarlyAbort)
    } else {
        on_flag(flag, MicroOp::EarlyAbort)
    }
}

/// Run `op` only when the condition IS met.
fn gate_do(cc: usize, op: MicroOp) -> MicroOp {
    let (flag, taken_when_set, _) = CONDS[cc];
    if taken_when_set {
        on_flag(flag, op)
    } else {
        unless_flag(flag, op)
    }
}

fn rot_reg(kind: RotOp, r: Reg) -> MicroOp {
    flags_to(b"--503-0C", Val::Rot(kind, Src8::Reg(r)), r)
}

fn rot_arg(kind: RotOp) -> MicroOp {
    flags(b"--503-0C", Val::Rot(kind, Src8::Arg))
}

fn bit_reg(n: u8, r: Reg) -> MicroOp {
    flags(b"SZ513P0-", Val::BitOf(n, Src8::Reg(r)))
}

fn bit_arg(n: u8) -> MicroOp {
    flags(b"SZ513P0-", Val::BitOf(n, Src8::Arg))
}

/// Accumulator ALU against a register: half-carry, template, write-back.
fn alu_reg_actions(kind: AluOp, mnem: &str, r: Reg) -> Vec<MicroOp> {
    if mnem == "CP" {
        return vec![flags(b"SZ5H3V1C", Val::Alu(AluOp::Sub, Src8::Reg(r)))];
    }
    match kind {
        AluOp::Add | AluOp::Adc => vec![
            force_h(Pred::Half(kind, Src8::Reg(r))),
            flags(b"SZ5H3V0C", Val::Alu(kind, Src8::Reg(r))),
            ld(Reg::A, Val::Bag(Key::Value)),
        ],
        AluOp::Sub | AluOp::Sbc => vec![
            force_h(Pred::Half(kind, Src8::Reg(r))),
            flags(b"SZ5H3V1C", Val::Alu(kind, Src8::Reg(r))),
            ld(Reg::A, Val::Bag(Key::Value)),
        ],
        AluOp::And => vec![
            flags(b"SZ513P00", Val::Alu(kind, Src8::Reg(r))),
            ld(Reg::A, Val::Bag(Key::Value)),
        ],
        AluOp::Xor | AluOp::Or => vec![
            flags(b"SZ503P00", Val::Alu(kind, Src8::Reg(r))),
            ld(Reg::A, Val::Bag(Key::Value)),
        ],
    }
}

/// Accumulator ALU against a cascaded operand (immediate or memory).
fn alu_arg_action(kind: AluOp, mnem: &str) -> MicroOp {
    if mnem == "CP" {
        return flags(b"SZ5H3V1C", Val::Alu(AluOp::Sub, Src8::Arg));
    }
    match kind {
        AluOp::Add | AluOp::Adc => seq(vec![
            force_h(Pred::Half(kind, Src8::Arg)),
            flags_to(b"SZ5H3V0C", Val::Alu(kind, Src8::Arg), Reg::A),
        ]),
        AluOp::Sub | AluOp::Sbc => seq(vec![
            force_h(Pred::Half(kind, Src8::Arg)),
            flags_to(b"SZ5H3V1C", Val::Alu(kind, Src8::Arg), Reg::A),
        ]),
        AluOp::And => flags_to(b"SZ513P00", Val::Alu(kind, Src8::Arg), Reg::A),
        AluOp::Xor | AluOp::Or => flags_to(b"SZ503P00", Val::Alu(kind, Src8::Arg), Reg::A),
    }
}

/// 16-bit add into `dst`: half-carry and 5/3/C from the high-byte sum.
fn add16_actions(dst: Reg, src: Reg) -> Vec<MicroOp> {
    vec![
        force_h(Pred::Half16(dst, src)),
        flags(b"--5-3-0C", Val::Add16Hi(dst, src)),
        ld(dst, Val::Add16(dst, src)),
    ]
}

/// ADC HL,rr via the summand/value bag recipe.
fn adc16_actions(src: Reg) -> Vec<MicroOp> {
    vec![
        stash(Key::Value, Val::Reg(Reg::HL)),
        stash(Key::Summand, Val::Reg(src)),
        force_h(Pred::F(adc16_half)),
        ld(Reg::HL, Val::F(adc16_sum)),
        flags(b"S-5-3V0C", Val::F(adc16_hi)),
        MicroOp::ForceFlag(Flag::Z, Pred::F(hl_is_zero)),
    ]
}

/// SBC HL,rr: same recipe with the subtrahend negated into the summand.
fn sbc16_actions(src: Reg) -> Vec<MicroOp> {
    vec![
        stash(Key::Value, Val::Reg(Reg::HL)),
        stash(Key::Summand, Val::Neg16(src)),
        force_h(Pred::F(sbc16_half)),
        ld(Reg::HL, Val::F(sbc16_sum)),
        flags(b"S-5-3V1C", Val::F(sbc16_hi)),
        MicroOp::ForceFlag(Flag::Z, Pred::F(hl_is_zero)),
    ]
}

/// INC r / INC (operand): half-carry, flags, masked result in `value`.
fn inc8_action(s: Src8) -> Vec<MicroOp> {
    vec![
        force_h(Pred::HalfInc(s)),
        flags(b"SZ5-3V0-", Val::IncOf(s)),
    ]
}

fn dec8_action(s: Src8) -> Vec<MicroOp> {
    vec![
        force_h(Pred::HalfDec(s)),
        flags(b"SZ5H3V1-", Val::DecOf(s)),
    ]
}

// =========================================================================
// Value/predicate functions for the one-off recipes
// =========================================================================

fn scf_value(c: &Ctx) -> i32 {
    i32::from((c.cpu.regs.f & 0xC4) | (c.cpu.regs.a & 0x28) | 0x01)
}

fn ccf_value(c: &Ctx) -> i32 {
    i32::from((c.cpu.regs.f & 0xEC) | (!c.cpu.regs.f & 0x11))
}

fn cpl_value(c: &Ctx) -> i32 {
    i32::from(!c.cpu.regs.a)
}

fn neg_value(c: &Ctx) -> i32 {
    -i32::from(c.cpu.regs.a) & 0xFF
}

fn rrd_merge(c: &Ctx) -> i32 {
    (c.arg >> 4) | (i32::from(c.cpu.regs.a) << 4)
}

fn rrd_low(c: &Ctx) -> i32 {
    c.arg & 0x0F
}

fn rld_merge(c: &Ctx) -> i32 {
    (c.arg << 4) | (i32::from(c.cpu.regs.a) & 0x0F)
}

fn rld_high(c: &Ctx) -> i32 {
    c.arg >> 4
}

/// Undocumented 5/3 source for the block loads: copied byte plus A.
fn ldi_undoc(c: &Ctx) -> i32 {
    c.bag.expect(crate::state::Key::Value) + i32::from(c.cpu.regs.a)
}

fn b_is_zero(c: &Ctx) -> bool {
    c.cpu.regs.b == 0
}

fn hl_is_zero(c: &Ctx) -> bool {
    c.cpu.regs.get(Reg::HL) == 0
}

fn carry(c: &Ctx) -> i32 {
    i32::from(c.cpu.regs.f & 0x01)
}

fn adc16_half(c: &Ctx) -> bool {
    let s = c.bag.expect(Key::Summand);
    let v = c.bag.expect(Key::Value);
    ((s >> 8) & 0xF) + ((v >> 8) & 0xF) + (((s & 0xFF) + (v & 0xFF) + carry(c)) >> 8) > 0xF
}

fn adc16_sum(c: &Ctx) -> i32 {
    (c.bag.expect(Key::Summand) + c.bag.expect(Key::Value) + carry(c)) & 0xFFFF
}

fn adc16_hi(c: &Ctx) -> i32 {
    let s = c.bag.expect(Key::Summand);
    let v = c.bag.expect(Key::Value);
    (s >> 8) + (v >> 8) + (((s & 0xFF) + (v & 0xFF) + carry(c)) >> 8)
}

fn sbc16_half(c: &Ctx) -> bool {
    let s = c.bag.expect(Key::Summand);
    let v = c.bag.expect(Key::Value);
    ((s >> 8) & 0xF) + ((v >> 8) & 0xF) + (((s & 0xFF) + (v & 0xFF) - carry(c)) >> 8) > 0xF
}

fn sbc16_sum(c: &Ctx) -> i32 {
    (c.bag.expect(Key::Summand) + c.bag.expect(Key::Value) - carry(c)) & 0xFFFF
}

fn sbc16_hi(c: &Ctx) -> i32 {
    let s = c.bag.expect(Key::Summand);
    let v = c.bag.expect(Key::Value);
    (s >> 8) + (v >> 8) + (((s & 0xFF) + (v & 0xFF) - carry(c)) >> 8)
}

/// IM 2 vector-table address: I on the high lines, the acknowledge byte
/// (bit 0 masked) on the low lines.
fn im2_vector(c: &Ctx) -> i32 {
    (i32::from(c.cpu.regs.i) << 8) | (c.arg & 0xFE)
}

// =========================================================================
// Table builders
// =========================================================================

fn build_main() -> [Option<Entry>; 256] {
    let mut t = empty_table();

    set(&mut t, 0x00, entry(0, vec![], vec![], "NOP", 1));

    // LD rr,nn / INC rr / DEC rr / ADD HL,rr
    for (i, &rr) in RP.iter().enumerate() {
        let base = (i as u8) << 4;
        set(
            &mut t,
            0x01 | base,
            entry(
                0,
                vec![],
                vec![od(), od_act(ld(rr, Val::Arg))],
                format!("LD {},nn", rr.name()),
                3,
            ),
        );
        set(
            &mut t,
            0x03 | base,
            entry(2, vec![MicroOp::Inc(rr)], vec![], format!("INC {}", rr.name()), 1),
        );
        set(
            &mut t,
            0x0B | base,
            entry(2, vec![MicroOp::Dec(rr)], vec![], format!("DEC {}", rr.name()), 1),
        );
        set(
            &mut t,
            0x09 | base,
            entry(
                0,
                add16_actions(Reg::HL, rr),
                vec![io(4, None), io(3, None)],
                format!("ADD HL,{}", rr.name()),
                1,
            ),
        );
    }

    // INC r / DEC r / LD r,n
    for (i, slot) in R8.iter().enumerate() {
        let base = (i as u8) << 3;
        match slot {
            Some(r) => {
                let mut inc = inc8_action(Src8::Reg(*r));
                inc.push(ld(*r, Val::Bag(Key::Value)));
                set(
                    &mut t,
                    0x04 | base,
                    entry(0, inc, vec![], format!("INC {}", r.name()), 1),
                );
                let mut dec = dec8_action(Src8::Reg(*r));
                dec.push(ld(*r, Val::Bag(Key::Value)));
                set(
                    &mut t,
                    0x05 | base,
                    entry(0, dec, vec![], format!("DEC {}", r.name()), 1),
                );
                set(
                    &mut t,
                    0x06 | base,
                    entry(
                        0,
                        vec![],
                        vec![od_act(ld(*r, Val::Arg))],
                        format!("LD {},n", r.name()),
                        2,
                    ),
                );
            }
            None => {
                set(
                    &mut t,
                    0x34,
                    entry(
                        0,
                        vec![],
                        vec![
                            mr(AddrMode::Reg(Reg::HL), true, Some(seq(inc8_action(Src8::Arg)))),
                            mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 1, None),
                        ],
                        "INC (HL)",
                        1,
                    ),
                );
                set(
                    &mut t,
                    0x35,
                    entry(
                        0,
                        vec![],
                        vec![
                            mr(AddrMode::Reg(Reg::HL), true, Some(seq(dec8_action(Src8::Arg)))),
                            mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 1, None),
                        ],
                        "DEC (HL)",
                        1,
                    ),
                );
                set(
                    &mut t,
                    0x36,
                    entry(
                        0,
                        vec![],
                        vec![od(), mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None)],
                        "LD (HL),n",
                        2,
                    ),
                );
            }
        }
    }

    // Accumulator loads through BC/DE
    set(
        &mut t,
        0x02,
        entry(
            0,
            vec![],
            vec![mw(AddrMode::Reg(Reg::BC), WriteSrc::Reg(Reg::A), 0, None)],
            "LD (BC),A",
            1,
        ),
    );
    set(
        &mut t,
        0x0A,
        entry(
            0,
            vec![],
            vec![mr(AddrMode::Reg(Reg::BC), true, Some(ld(Reg::A, Val::Arg)))],
            "LD A,(BC)",
            1,
        ),
    );
    set(
        &mut t,
        0x12,
        entry(
            0,
            vec![],
            vec![mw(AddrMode::Reg(Reg::DE), WriteSrc::Reg(Reg::A), 0, None)],
            "LD (DE),A",
            1,
        ),
    );
    set(
        &mut t,
        0x1A,
        entry(
            0,
            vec![],
            vec![mr(AddrMode::Reg(Reg::DE), true, Some(ld(Reg::A, Val::Arg)))],
            "LD A,(DE)",
            1,
        ),
    );

    // Accumulator rotates
    set(&mut t, 0x07, entry(0, vec![rot_reg(RotOp::Rlc, Reg::A)], vec![], "RLCA", 1));
    set(&mut t, 0x0F, entry(0, vec![rot_reg(RotOp::Rrc, Reg::A)], vec![], "RRCA", 1));
    set(&mut t, 0x17, entry(0, vec![rot_reg(RotOp::Rl, Reg::A)], vec![], "RLA", 1));
    set(&mut t, 0x1F, entry(0, vec![rot_reg(RotOp::Rr, Reg::A)], vec![], "RRA", 1));

    set(&mut t, 0x08, entry(0, vec![MicroOp::ExAf], vec![], "EX AF,AF'", 1));

    // DJNZ: decrement B during the operand fetch, bail out on zero, pay
    // the five-cycle branch only when looping.
    set(
        &mut t,
        0x10,
        entry(
            1,
            vec![],
            vec![
                od_signed(seq(vec![
                    ld(Reg::B, Val::DecOf(Src8::Reg(Reg::B))),
                    MicroOp::OnCond(b_is_zero, Box::new(MicroOp::EarlyAbort)),
                    stash(Key::Value, Val::Arg),
                ])),
                io(5, Some(MicroOp::Jr(Val::Bag(Key::Value)))),
            ],
            "DJNZ n",
            2,
        ),
    );

    // JR / JR cc
    set(
        &mut t,
        0x18,
        entry(
            0,
            vec![],
            vec![
                StateSpec::Od {
                    key: Key::Value,
                    signed: true,
                    compound: true,
                    action: None,
                },
                io(5, Some(MicroOp::Jr(Val::Bag(Key::Value)))),
            ],
            "JR n",
            2,
        ),
    );
    for (op, cc) in [(0x20u8, 0usize), (0x28, 1), (0x30, 2), (0x38, 3)] {
        set(
            &mut t,
            op,
            entry(
                0,
                vec![],
                vec![
                    od_signed(seq(vec![stash(Key::Value, Val::Arg), gate_abort(cc)])),
                    io(5, Some(MicroOp::Jr(Val::Bag(Key::Value)))),
                ],
                format!("JR {},n", CONDS[cc].2),
                2,
            ),
        );
    }

    // 16-bit and accumulator absolute loads
    set(
        &mut t,
        0x22,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mw(AddrMode::Bag, WriteSrc::Reg(Reg::L), 0, None),
                mw(AddrMode::Bag, WriteSrc::Reg(Reg::H), 0, None),
            ],
            "LD (nn),HL",
            3,
        ),
    );
    set(
        &mut t,
        0x2A,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mr(AddrMode::Bag, true, Some(ld(Reg::L, Val::Arg))),
                mr(AddrMode::Bag, true, Some(ld(Reg::H, Val::Arg))),
            ],
            "LD HL,(nn)",
            3,
        ),
    );
    set(
        &mut t,
        0x32,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mw(AddrMode::Bag, WriteSrc::Reg(Reg::A), 0, None),
            ],
            "LD (nn),A",
            3,
        ),
    );
    set(
        &mut t,
        0x3A,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mr(AddrMode::Bag, true, Some(ld(Reg::A, Val::Arg))),
            ],
            "LD A,(nn)",
            3,
        ),
    );

    set(&mut t, 0x27, entry(0, vec![MicroOp::Daa], vec![], "DAA", 1));
    set(
        &mut t,
        0x2F,
        entry(
            0,
            vec![
                flags(b"--*1*-1-", Val::Reg(Reg::A)),
                ld(Reg::A, Val::F(cpl_value)),
            ],
            vec![],
            "CPL",
            1,
        ),
    );
    set(&mut t, 0x37, entry(0, vec![ld(Reg::F, Val::F(scf_value))], vec![], "SCF", 1));
    set(&mut t, 0x3F, entry(0, vec![ld(Reg::F, Val::F(ccf_value))], vec![], "CCF", 1));

    // LD r,r' block, (HL) forms included
    for (d, dslot) in R8.iter().enumerate() {
        for (s, sslot) in R8.iter().enumerate() {
            let op = 0x40 | ((d as u8) << 3) | (s as u8);
            match (dslot, sslot) {
                (None, None) => {
                    set(&mut t, 0x76, entry(0, vec![MicroOp::Halt], vec![], "HALT", 1));
                }
                (None, Some(src)) => set(
                    &mut t,
                    op,
                    entry(
                        0,
                        vec![],
                        vec![mw(AddrMode::Reg(Reg::HL), WriteSrc::Reg(*src), 0, None)],
                        format!("LD (HL),{}", src.name()),
                        1,
                    ),
                ),
                (Some(dst), None) => set(
                    &mut t,
                    op,
                    entry(
                        0,
                        vec![],
                        vec![mr(AddrMode::Reg(Reg::HL), true, Some(ld(*dst, Val::Arg)))],
                        format!("LD {},(HL)", dst.name()),
                        1,
                    ),
                ),
                (Some(dst), Some(src)) => set(
                    &mut t,
                    op,
                    entry(
                        0,
                        vec![ldrr(*dst, *src)],
                        vec![],
                        format!("LD {},{}", dst.name(), src.name()),
                        1,
                    ),
                ),
            }
        }
    }

    // Accumulator ALU block and the immediate forms
    for (k, &(kind, mnem)) in ALU_OPS.iter().enumerate() {
        for (s, slot) in R8.iter().enumerate() {
            let op = 0x80 | ((k as u8) << 3) | (s as u8);
            match slot {
                Some(r) => set(
                    &mut t,
                    op,
                    entry(
                        0,
                        alu_reg_actions(kind, mnem, *r),
                        vec![],
                        format!("{mnem} {}", r.name()),
                        1,
                    ),
                ),
                None => set(
                    &mut t,
                    op,
                    entry(
                        0,
                        vec![],
                        vec![mr(AddrMode::Reg(Reg::HL), true, Some(alu_arg_action(kind, mnem)))],
                        format!("{mnem} (HL)"),
                        1,
                    ),
                ),
            }
        }
        set(
            &mut t,
            0xC6 | ((k as u8) << 3),
            entry(
                0,
                vec![],
                vec![od_act(alu_arg_action(kind, mnem))],
                format!("{mnem} n"),
                2,
            ),
        );
    }

    // RET cc / JP cc / CALL cc / RST
    for cc in 0..8 {
        let base = (cc as u8) << 3;
        // 0xC8 carries a mislabelled mnemonic; the gating micro-op is
        // what defines the behaviour.
        let ret_name = if cc == 1 {
            "RET NZ".to_owned()
        } else {
            format!("RET {}", CONDS[cc].2)
        };
        set(
            &mut t,
            0xC0 | base,
            entry(
                1,
                vec![gate_abort(cc)],
                vec![sr(0, None), sr(0, Some(jp(Val::Arg)))],
                ret_name,
                1,
            ),
        );
        set(
            &mut t,
            0xC2 | base,
            entry(
                0,
                vec![],
                vec![od(), od_act(gate_do(cc, jp(Val::Arg)))],
                format!("JP {},nn", CONDS[cc].2),
                3,
            ),
        );
        set(
            &mut t,
            0xC4 | base,
            entry(
                0,
                vec![],
                vec![
                    od(),
                    od_act(seq(vec![stash(Key::Target, Val::Arg), gate_abort(cc)])),
                    sw(WriteSrc::Reg(Reg::PCH), 1, None),
                    sw(WriteSrc::Reg(Reg::PCL), 0, Some(jp(Val::Bag(Key::Target)))),
                ],
                format!("CALL {},nn", CONDS[cc].2),
                3,
            ),
        );
        let target = u16::from(base);
        set(
            &mut t,
            0xC7 | base,
            entry(
                1,
                vec![],
                vec![
                    sw(WriteSrc::Reg(Reg::PCH), 0, None),
                    sw(WriteSrc::Reg(Reg::PCL), 0, Some(jp(Val::Lit(target)))),
                ],
                format!("RST {target:02X}H"),
                1,
            ),
        );
    }

    // POP / PUSH
    for (i, (hi, lo, name)) in [
        (Reg::B, Reg::C, "BC"),
        (Reg::D, Reg::E, "DE"),
        (Reg::H, Reg::L, "HL"),
        (Reg::A, Reg::F, "AF"),
    ]
    .into_iter()
    .enumerate()
    {
        let base = (i as u8) << 4;
        let pair = match name {
            "BC" => Reg::BC,
            "DE" => Reg::DE,
            "HL" => Reg::HL,
            _ => Reg::AF,
        };
        set(
            &mut t,
            0xC1 | base,
            entry(
                0,
                vec![],
                vec![sr(0, None), sr(0, Some(ld(pair, Val::Arg)))],
                format!("POP {name}"),
                1,
            ),
        );
        set(
            &mut t,
            0xC5 | base,
            entry(
                1,
                vec![],
                vec![sw(WriteSrc::Reg(hi), 0, None), sw(WriteSrc::Reg(lo), 0, None)],
                format!("PUSH {name}"),
                1,
            ),
        );
    }

    set(
        &mut t,
        0xC3,
        entry(0, vec![], vec![od(), od_act(jp(Val::Arg))], "JP nn", 3),
    );
    set(
        &mut t,
        0xC9,
        entry(0, vec![], vec![sr(0, None), sr(0, Some(jp(Val::Arg)))], "RET", 1),
    );
    set(
        &mut t,
        0xCD,
        entry(
            0,
            vec![],
            vec![
                od(),
                od_act(stash(Key::Target, Val::Arg)),
                sw(WriteSrc::Reg(Reg::PCH), 1, None),
                sw(WriteSrc::Reg(Reg::PCL), 0, Some(jp(Val::Bag(Key::Target)))),
            ],
            "CALL nn",
            3,
        ),
    );

    // Prefixes
    set(&mut t, 0xCB, entry(0, vec![], vec![ocf(Prefix::Cb)], "", 0));
    set(&mut t, 0xDD, entry(0, vec![], vec![ocf(Prefix::Dd)], "", 0));
    set(&mut t, 0xED, entry(0, vec![], vec![ocf(Prefix::Ed)], "", 0));
    set(&mut t, 0xFD, entry(0, vec![], vec![ocf(Prefix::Fd)], "", 0));

    // I/O through the immediate port
    set(
        &mut t,
        0xD3,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                pw(Some(Reg::A), None, WriteSrc::Reg(Reg::A), None),
            ],
            "OUT (n),A",
            2,
        ),
    );
    set(
        &mut t,
        0xDB,
        entry(
            0,
            vec![],
            vec![od(), pr(Some(Reg::A), None, Some(Reg::A), None)],
            "IN A,n",
            2,
        ),
    );

    set(&mut t, 0xD9, entry(0, vec![MicroOp::Exx], vec![], "EXX", 1));
    set(
        &mut t,
        0xE3,
        entry(
            0,
            vec![stash(Key::H, Val::Reg(Reg::H)), stash(Key::L, Val::Reg(Reg::L))],
            vec![
                sr(0, None),
                sr(1, Some(ld(Reg::HL, Val::Arg))),
                sw(WriteSrc::Bag(Key::H), 0, None),
                sw(WriteSrc::Bag(Key::L), 2, None),
            ],
            "EX (SP),HL",
            1,
        ),
    );
    set(&mut t, 0xE9, entry(0, vec![jp(Val::Reg(Reg::HL))], vec![], "JP (HL)", 1));
    set(
        &mut t,
        0xEB,
        entry(0, vec![MicroOp::Ex(Reg::DE, Reg::HL)], vec![], "EX DE,HL", 1),
    );
    set(&mut t, 0xF3, entry(0, vec![MicroOp::Di], vec![], "DI", 1));
    set(&mut t, 0xFB, entry(0, vec![MicroOp::Ei], vec![], "EI", 1));
    set(
        &mut t,
        0xF9,
        entry(2, vec![ldrr(Reg::SP, Reg::HL)], vec![], "LD SP,HL", 1),
    );

    t
}

fn build_cb() -> [Option<Entry>; 256] {
    let mut t = empty_table();

    // Rotates and shifts, 0x00–0x3F
    for (k, &(kind, mnem)) in ROT_OPS.iter().enumerate() {
        for (s, slot) in R8.iter().enumerate() {
            let op = ((k as u8) << 3) | (s as u8);
            match slot {
                Some(r) => set(
                    &mut t,
                    op,
                    entry(0, vec![rot_reg(kind, *r)], vec![], format!("{mnem} {}", r.name()), 2),
                ),
                None => set(
                    &mut t,
                    op,
                    entry(
                        1,
                        vec![],
                        vec![
                            mr(AddrMode::Reg(Reg::HL), true, Some(rot_arg(kind))),
                            mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None),
                        ],
                        format!("{mnem} (HL)"),
                        2,
                    ),
                ),
            }
        }
    }

    // BIT / RES / SET grids
    for n in 0..8u8 {
        for (s, slot) in R8.iter().enumerate() {
            let col = (n << 3) | (s as u8);
            match slot {
                Some(r) => {
                    set(
                        &mut t,
                        0x40 | col,
                        entry(0, vec![bit_reg(n, *r)], vec![], format!("BIT {n},{}", r.name()), 2),
                    );
                    set(
                        &mut t,
                        0x80 | col,
                        entry(
                            0,
                            vec![ld(*r, Val::ResOf(n, Src8::Reg(*r)))],
                            vec![],
                            format!("RES {n},{}", r.name()),
                            2,
                        ),
                    );
                    set(
                        &mut t,
                        0xC0 | col,
                        entry(
                            0,
                            vec![ld(*r, Val::SetOf(n, Src8::Reg(*r)))],
                            vec![],
                            format!("SET {n},{}", r.name()),
                            2,
                        ),
                    );
                }
                None => {
                    set(
                        &mut t,
                        0x40 | col,
                        entry(
                            1,
                            vec![],
                            vec![mr(AddrMode::Reg(Reg::HL), true, Some(bit_arg(n)))],
                            format!("BIT {n},(HL)"),
                            2,
                        ),
                    );
                    set(
                        &mut t,
                        0x80 | col,
                        entry(
                            1,
                            vec![],
                            vec![
                                mr(
                                    AddrMode::Reg(Reg::HL),
                                    true,
                                    Some(stash(Key::Value, Val::ResOf(n, Src8::Arg))),
                                ),
                                mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None),
                            ],
                            format!("RES {n},(HL)"),
                            2,
                        ),
                    );
                    set(
                        &mut t,
                        0xC0 | col,
                        entry(
                            1,
                            vec![],
                            vec![
                                mr(
                                    AddrMode::Reg(Reg::HL),
                                    true,
                                    Some(stash(Key::Value, Val::SetOf(n, Src8::Arg))),
                                ),
                                mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None),
                            ],
                            format!("SET {n},(HL)"),
                            2,
                        ),
                    );
                }
            }
        }
    }

    t
}

/// DD and FD share everything but the index register; `nested` is the
/// prefix the trailing OCF of the 4-byte forms carries.
fn build_index(ix: Reg, ixh: Reg, ixl: Reg, nested: Prefix) -> [Option<Entry>; 256] {
    let mut t = empty_table();
    let xname = ix.name();
    let disp = |ticks: u8| io_tr(ticks, Transform::AddReg(Key::Address, ix), None);

    // ADD ix,rr — the HL slot of the pair order is the index register
    // itself.
    for (i, &rr) in [Reg::BC, Reg::DE, ix, Reg::SP].iter().enumerate() {
        set(
            &mut t,
            0x09 | ((i as u8) << 4),
            entry(
                0,
                vec![
                    force_h(Pred::Half16(ix, rr)),
                    flags(b"--5-3-0C", Val::Add16Hi(ix, rr)),
                    ld(ix, Val::Add16(ix, rr)),
                ],
                vec![io(4, None), io(3, None)],
                format!("ADD {xname},{}", rr.name()),
                2,
            ),
        );
    }

    set(
        &mut t,
        0x21,
        entry(
            0,
            vec![],
            vec![od(), od_act(ld(ix, Val::Arg))],
            format!("LD {xname},nn"),
            4,
        ),
    );
    set(
        &mut t,
        0x22,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mw(AddrMode::Bag, WriteSrc::Reg(ixl), 0, None),
                mw(AddrMode::Bag, WriteSrc::Reg(ixh), 0, None),
            ],
            format!("LD (nn),{xname}"),
            4,
        ),
    );
    set(
        &mut t,
        0x23,
        entry(2, vec![MicroOp::Inc(ix)], vec![], format!("INC {xname}"), 2),
    );
    set(
        &mut t,
        0x2A,
        entry(
            0,
            vec![],
            vec![
                od_key(Key::Address),
                od_key(Key::Address),
                mr(AddrMode::Bag, true, Some(ld(ixl, Val::Arg))),
                mr(AddrMode::Bag, true, Some(ld(ixh, Val::Arg))),
            ],
            format!("LD {xname},(nn)"),
            4,
        ),
    );
    set(
        &mut t,
        0x2B,
        entry(2, vec![MicroOp::Dec(ix)], vec![], format!("DEC {xname}"), 2),
    );

    set(
        &mut t,
        0x34,
        entry(
            0,
            vec![],
            vec![
                od_disp(),
                disp(5),
                mr(AddrMode::Bag, false, Some(seq(inc8_action(Src8::Arg)))),
                mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 1, None),
            ],
            format!("INC ({xname}+d)"),
            3,
        ),
    );
    set(
        &mut t,
        0x35,
        entry(
            0,
            vec![],
            vec![
                od_disp(),
                disp(5),
                mr(AddrMode::Bag, false, Some(seq(dec8_action(Src8::Arg)))),
                mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 1, None),
            ],
            format!("DEC ({xname}+d)"),
            3,
        ),
    );
    // The displacement add overlaps the operand fetch here, hence the
    // short internal state.
    set(
        &mut t,
        0x36,
        entry(
            0,
            vec![],
            vec![
                od_disp(),
                od(),
                disp(2),
                mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 0, None),
            ],
            format!("LD ({xname}+d),n"),
            4,
        ),
    );

    // LD r,(ix+d) / LD (ix+d),r
    for (s, slot) in R8.iter().enumerate() {
        let Some(r) = slot else { continue };
        set(
            &mut t,
            0x46 | ((s as u8) << 3),
            entry(
                0,
                vec![],
                vec![od_disp(), disp(5), mr(AddrMode::Bag, false, Some(ld(*r, Val::Arg)))],
                format!("LD {},({xname}+d)", r.name()),
                3,
            ),
        );
        set(
            &mut t,
            0x70 | (s as u8),
            entry(
                0,
                vec![],
                vec![od_disp(), disp(5), mw(AddrMode::Bag, WriteSrc::Reg(*r), 0, None)],
                format!("LD ({xname}+d),{}", r.name()),
                3,
            ),
        );
    }

    // ALU against (ix+d)
    for (k, &(kind, mnem)) in ALU_OPS.iter().enumerate() {
        set(
            &mut t,
            0x86 | ((k as u8) << 3),
            entry(
                0,
                vec![],
                vec![
                    od_disp(),
                    disp(5),
                    mr(AddrMode::Bag, false, Some(alu_arg_action(kind, mnem))),
                ],
                format!("{mnem} ({xname}+d)"),
                3,
            ),
        );
    }

    // Second and third bytes of the 4-byte bit operations: displacement
    // first, then the final opcode byte.
    set(
        &mut t,
        0xCB,
        entry(0, vec![], vec![od_disp(), disp(1), ocf(nested)], "", 0),
    );

    set(
        &mut t,
        0xE1,
        entry(
            0,
            vec![],
            vec![sr(0, None), sr(0, Some(ld(ix, Val::Arg)))],
            format!("POP {xname}"),
            2,
        ),
    );
    set(
        &mut t,
        0xE3,
        entry(
            0,
            vec![stash(Key::H, Val::Reg(ixh)), stash(Key::L, Val::Reg(ixl))],
            vec![
                sr(0, None),
                sr(1, Some(ld(ix, Val::Arg))),
                sw(WriteSrc::Bag(Key::H), 0, None),
                sw(WriteSrc::Bag(Key::L), 2, None),
            ],
            format!("EX (SP),{xname}"),
            2,
        ),
    );
    set(
        &mut t,
        0xE5,
        entry(
            1,
            vec![],
            vec![sw(WriteSrc::Reg(ixh), 0, None), sw(WriteSrc::Reg(ixl), 0, None)],
            format!("PUSH {xname}"),
            2,
        ),
    );
    set(
        &mut t,
        0xE9,
        entry(0, vec![jp(Val::Reg(ix))], vec![], format!("JP ({xname})"), 2),
    );
    set(
        &mut t,
        0xF9,
        entry(2, vec![ldrr(Reg::SP, ix)], vec![], format!("LD SP,{xname}"), 2),
    );

    t
}

fn build_ed() -> [Option<Entry>; 256] {
    let mut t = empty_table();

    // IN r,(C) / OUT (C),r — the (HL) slot is the undocumented flag
    // register transfer.
    const IO_REGS: [Reg; 8] = [
        Reg::B,
        Reg::C,
        Reg::D,
        Reg::E,
        Reg::H,
        Reg::L,
        Reg::F,
        Reg::A,
    ];
    for (i, &r) in IO_REGS.iter().enumerate() {
        let base = (i as u8) << 3;
        set(
            &mut t,
            0x40 | base,
            entry(
                0,
                vec![],
                vec![pr(
                    Some(Reg::B),
                    Some(Reg::C),
                    Some(r),
                    Some(flags(b"SZ503P0-", Val::Arg)),
                )],
                format!("IN {},(C)", r.name()),
                2,
            ),
        );
        set(
            &mut t,
            0x41 | base,
            entry(
                0,
                vec![],
                vec![pw(Some(Reg::B), Some(Reg::C), WriteSrc::Reg(r), None)],
                format!("OUT (C),{}", r.name()),
                2,
            ),
        );
    }

    // 16-bit carry arithmetic and the absolute register-pair loads
    for (i, &rr) in RP.iter().enumerate() {
        let base = (i as u8) << 4;
        set(
            &mut t,
            0x42 | base,
            entry(
                0,
                sbc16_actions(rr),
                vec![io(4, None), io(3, None)],
                format!("SBC HL,{}", rr.name()),
                2,
            ),
        );
        set(
            &mut t,
            0x4A | base,
            entry(
                0,
                adc16_actions(rr),
                vec![io(4, None), io(3, None)],
                format!("ADC HL,{}", rr.name()),
                2,
            ),
        );
        // The HL forms of the absolute loads were left to the unprefixed
        // opcodes in the source table; mirror that.
        if rr == Reg::HL {
            continue;
        }
        let (hi, lo) = match rr {
            Reg::BC => (Reg::B, Reg::C),
            Reg::DE => (Reg::D, Reg::E),
            _ => (Reg::SPH, Reg::SPL),
        };
        set(
            &mut t,
            0x43 | base,
            entry(
                0,
                vec![],
                vec![
                    od_key(Key::Address),
                    od_key(Key::Address),
                    mw(AddrMode::Bag, WriteSrc::Reg(lo), 0, None),
                    mw(AddrMode::Bag, WriteSrc::Reg(hi), 0, None),
                ],
                format!("LD (nn),{}", rr.name()),
                4,
            ),
        );
        set(
            &mut t,
            0x4B | base,
            entry(
                0,
                vec![],
                vec![
                    od_key(Key::Address),
                    od_key(Key::Address),
                    mr(AddrMode::Bag, true, Some(ld(lo, Val::Arg))),
                    mr(AddrMode::Bag, true, Some(ld(hi, Val::Arg))),
                ],
                format!("LD {},(nn)", rr.name()),
                4,
            ),
        );
    }

    set(
        &mut t,
        0x44,
        entry(
            0,
            vec![flags_to(b"SZ513V11", Val::F(neg_value), Reg::A)],
            vec![],
            "NEG",
            2,
        ),
    );
    set(
        &mut t,
        0x45,
        entry(
            0,
            vec![],
            vec![
                sr(0, None),
                sr(0, Some(seq(vec![MicroOp::RestoreIff, jp(Val::Arg)]))),
            ],
            "RETN",
            2,
        ),
    );
    set(
        &mut t,
        0x4D,
        entry(0, vec![], vec![sr(0, None), sr(0, Some(jp(Val::Arg)))], "RETI", 2),
    );
    set(&mut t, 0x46, entry(0, vec![MicroOp::Im(0)], vec![], "IM0", 2));
    set(&mut t, 0x56, entry(0, vec![MicroOp::Im(1)], vec![], "IM1", 2));
    set(&mut t, 0x5E, entry(0, vec![MicroOp::Im(2)], vec![], "IM2", 2));

    set(&mut t, 0x47, entry(1, vec![ldrr(Reg::I, Reg::A)], vec![], "LD I,A", 2));
    set(&mut t, 0x4F, entry(1, vec![ldrr(Reg::R, Reg::A)], vec![], "LD R,A", 2));
    set(
        &mut t,
        0x57,
        entry(
            1,
            vec![ldrr(Reg::A, Reg::I), flags(b"SZ503*0-", Val::Reg(Reg::I))],
            vec![],
            "LD A,I",
            2,
        ),
    );
    set(
        &mut t,
        0x5F,
        entry(
            1,
            vec![ldrr(Reg::A, Reg::R), flags(b"SZ503*0-", Val::Reg(Reg::R))],
            vec![],
            "LD A,R",
            2,
        ),
    );

    // Nibble rotates through A and (HL)
    set(
        &mut t,
        0x67,
        entry(
            0,
            vec![],
            vec![
                mr(
                    AddrMode::Reg(Reg::HL),
                    true,
                    Some(seq(vec![
                        stash(Key::Value, Val::F(rrd_merge)),
                        flags_reg_only(b"SZ503P0-", Val::F(rrd_low), Reg::A),
                    ])),
                ),
                io(4, None),
                mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None),
            ],
            "RRD",
            2,
        ),
    );
    set(
        &mut t,
        0x6F,
        entry(
            0,
            vec![],
            vec![
                mr(
                    AddrMode::Reg(Reg::HL),
                    true,
                    Some(seq(vec![
                        stash(Key::Value, Val::F(rld_merge)),
                        flags_reg_only(b"SZ503P0-", Val::F(rld_high), Reg::A),
                    ])),
                ),
                io(4, None),
                mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, None),
            ],
            "RLD",
            2,
        ),
    );

    // Block transfer/search/I-O, single-shot and repeating forms.
    for (base, step_hl, repeat) in [
        (0xA0u8, MicroOp::Inc(Reg::HL), false),
        (0xA8, MicroOp::Dec(Reg::HL), false),
        (0xB0, MicroOp::Inc(Reg::HL), true),
        (0xB8, MicroOp::Dec(Reg::HL), true),
    ] {
        let step_de = match step_hl {
            MicroOp::Inc(_) => MicroOp::Inc(Reg::DE),
            _ => MicroOp::Dec(Reg::DE),
        };
        let dir = matches!(step_hl, MicroOp::Inc(_));

        // LDI / LDD / LDIR / LDDR
        let mut ld_tail = vec![
            flags(b"--50310-", Val::F(ldi_undoc)),
            step_hl.clone(),
            step_de,
            MicroOp::Dec(Reg::BC),
            on_zero(Reg::BC, MicroOp::ClearFlag(Flag::P)),
        ];
        if repeat {
            ld_tail.push(on_zero(Reg::BC, MicroOp::EarlyAbort));
        }
        let mut ld_states = vec![
            mr(AddrMode::Reg(Reg::HL), true, None),
            mw(AddrMode::Reg(Reg::DE), WriteSrc::Bag(Key::Value), 2, Some(seq(ld_tail))),
        ];
        if repeat {
            ld_states.push(io(
                5,
                Some(seq(vec![MicroOp::Dec(Reg::PC), MicroOp::Dec(Reg::PC)])),
            ));
        }
        let ld_name = match (dir, repeat) {
            (true, false) => "LDI",
            (false, false) => "LDD",
            (true, true) => "LDIR",
            (false, true) => "LDDR",
        };
        set(&mut t, base, entry(0, vec![], ld_states, ld_name, 2));

        // CPI / CPD / CPIR / CPDR
        let mut cp_tail = vec![
            flags(b"-Z50311-", Val::Bag(Key::Value)),
            step_hl.clone(),
            MicroOp::Dec(Reg::BC),
            on_zero(Reg::BC, MicroOp::ClearFlag(Flag::P)),
        ];
        if repeat {
            cp_tail.push(on_zero(Reg::BC, MicroOp::EarlyAbort));
            cp_tail.push(on_flag(Flag::Z, MicroOp::EarlyAbort));
        }
        let mut cp_states = vec![
            mr(AddrMode::Reg(Reg::HL), true, None),
            io_tr(5, Transform::SubFromA(Key::Value), Some(seq(cp_tail))),
        ];
        if repeat {
            cp_states.push(io(
                5,
                Some(seq(vec![MicroOp::Dec(Reg::PC), MicroOp::Dec(Reg::PC)])),
            ));
        }
        let cp_name = match (dir, repeat) {
            (true, false) => "CPI",
            (false, false) => "CPD",
            (true, true) => "CPIR",
            (false, true) => "CPDR",
        };
        set(&mut t, base | 0x01, entry(0, vec![], cp_states, cp_name, 2));

        // INI / IND / INIR / INDR
        let mut in_tail = vec![
            step_hl.clone(),
            MicroOp::Dec(Reg::B),
            flags(b"SZ503P0-", Val::Reg(Reg::B)),
        ];
        if repeat {
            in_tail.push(on_flag(Flag::Z, MicroOp::EarlyAbort));
        }
        let mut in_states = vec![
            pr(Some(Reg::B), Some(Reg::C), None, None),
            mw(AddrMode::Reg(Reg::HL), WriteSrc::Bag(Key::Value), 0, Some(seq(in_tail))),
        ];
        if repeat {
            in_states.push(io(
                5,
                Some(seq(vec![MicroOp::Dec(Reg::PC), MicroOp::Dec(Reg::PC)])),
            ));
        }
        let in_name = match (dir, repeat) {
            (true, false) => "INI",
            (false, false) => "IND",
            (true, true) => "INIR",
            (false, true) => "INDR",
        };
        set(&mut t, base | 0x02, entry(1, vec![], in_states, in_name, 2));

        // OUTI / OUTD and the repeating forms, mnemonics OUTIR/OUTDR
        let mut out_tail = vec![
            step_hl.clone(),
            MicroOp::Dec(Reg::B),
            flags(b"SZ503P0-", Val::Reg(Reg::B)),
        ];
        if repeat {
            out_tail.push(on_flag(Flag::Z, MicroOp::EarlyAbort));
        }
        let mut out_states = vec![
            mr(AddrMode::Reg(Reg::HL), true, None),
            pw(Some(Reg::B), Some(Reg::C), WriteSrc::Bag(Key::Value), Some(seq(out_tail))),
        ];
        if repeat {
            out_states.push(io(
                5,
                Some(seq(vec![MicroOp::Dec(Reg::PC), MicroOp::Dec(Reg::PC)])),
            ));
        }
        let out_name = match (dir, repeat) {
            (true, false) => "OUTI",
            (false, false) => "OUTD",
            (true, true) => "OUTIR",
            (false, true) => "OUTDR",
        };
        set(&mut t, base | 0x03, entry(1, vec![], out_states, out_name, 2));
    }

    t
}

/// The DDCB/FDCB opcode column operating on (ix+d). The displacement has
/// already been folded into the `address` slot by the time these decode.
fn build_index_cb(ix: Reg) -> [Option<Entry>; 256] {
    let mut t = empty_table();
    let xname = ix.name();

    for (k, &(kind, mnem)) in ROT_OPS.iter().enumerate() {
        set(
            &mut t,
            0x06 | ((k as u8) << 3),
            entry(
                0,
                vec![],
                vec![
                    mr(AddrMode::Bag, false, Some(rot_arg(kind))),
                    mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 1, None),
                ],
                format!("{mnem} ({xname}+d)"),
                4,
            ),
        );
    }
    for n in 0..8u8 {
        set(
            &mut t,
            0x46 | (n << 3),
            entry(
                1,
                vec![],
                vec![mr(AddrMode::Bag, false, Some(bit_arg(n)))],
                format!("BIT {n},({xname}+d)"),
                4,
            ),
        );
        set(
            &mut t,
            0x86 | (n << 3),
            entry(
                0,
                vec![],
                vec![
                    mr(
                        AddrMode::Bag,
                        false,
                        Some(stash(Key::Value, Val::ResOf(n, Src8::Arg))),
                    ),
                    mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 1, None),
                ],
                format!("RES {n},({xname}+d)"),
                4,
            ),
        );
        set(
            &mut t,
            0xC6 | (n << 3),
            entry(
                0,
                vec![],
                vec![
                    mr(
                        AddrMode::Bag,
                        false,
                        Some(stash(Key::Value, Val::SetOf(n, Src8::Arg))),
                    ),
                    mw(AddrMode::Bag, WriteSrc::Bag(Key::Value), 1, None),
                ],
                format!("SET {n},({xname}+d)"),
                4,
            ),
        );
    }

    t
}
