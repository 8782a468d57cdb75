//! The micro-operation library.
//!
//! A micro-op is a side effect applied between T-cycles, at the end of a
//! machine state: load a register, jump, exchange banks, recompute flags
//! from a template, truncate the pipeline. The decode table composes
//! instruction semantics entirely out of these values; an interpreter on
//! [`Z80`] executes them against the register file and the pipeline's
//! parameter bag.
//!
//! Everything here is plain data — value sources that need computation are
//! either dedicated variants (the ALU and rotate forms the table uses per
//! register) or non-capturing `fn` pointers for one-off recipes.

use crate::cpu::Z80;
use crate::flags::{CF, Flag, FlagTemplate, HF, NF, ZF};
use crate::registers::Reg;
use crate::state::{Bag, Key};

/// Evaluation context for value and predicate functions: the CPU, the
/// current pipeline bag, and the cascaded operand (0 when absent).
pub(crate) struct Ctx<'a> {
    pub cpu: &'a Z80,
    pub bag: &'a Bag,
    pub arg: i32,
}

pub(crate) type ValFn = fn(&Ctx) -> i32;
pub(crate) type PredFn = fn(&Ctx) -> bool;

/// An 8-bit operand source: a named register or the cascaded operand.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Src8 {
    Reg(Reg),
    Arg,
}

/// 8-bit accumulator operations, carry variants included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
}

/// Rotate/shift operations. `Sl1` is the undocumented shift-left that
/// sets bit 0 (also known as SLL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RotOp {
    Rlc,
    Rl,
    Rrc,
    Rr,
    Sla,
    Sra,
    Sl1,
    Srl,
}

/// A value source. Arithmetic variants produce the *raw* result — 9-bit
/// sums, negative borrows — which is what the flag templates evaluate.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Val {
    Lit(u16),
    Reg(Reg),
    Bag(Key),
    /// The operand cascaded into the action call.
    Arg,
    /// `A op src`, unsigned operand arithmetic.
    Alu(AluOp, Src8),
    IncOf(Src8),
    DecOf(Src8),
    /// `(a + b) & 0xFFFF`.
    Add16(Reg, Reg),
    /// High-byte sum with the low-byte carry folded in, for 16-bit add
    /// flag computation.
    Add16Hi(Reg, Reg),
    /// `(-r) & 0xFFFF`.
    Neg16(Reg),
    /// 9-bit rotate/shift result (carry-out in bit 8 where applicable).
    Rot(RotOp, Src8),
    BitOf(u8, Src8),
    ResOf(u8, Src8),
    SetOf(u8, Src8),
    F(ValFn),
}

/// A predicate source for `force_flag` and `on_condition`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pred {
    F(PredFn),
    /// Half-carry/borrow of the corresponding 8-bit ALU operation.
    Half(AluOp, Src8),
    HalfInc(Src8),
    HalfDec(Src8),
    /// Half-carry of a 16-bit add, computed on the high bytes with the
    /// low-byte carry folded in.
    Half16(Reg, Reg),
}

/// A flag-template application: the single site of flag mutation.
///
/// After the template is evaluated the masked 8-bit value is written back
/// to the `store` bag slot and/or the `dest` register when present.
#[derive(Debug, Clone)]
pub(crate) struct FlagUpdate {
    pub template: FlagTemplate,
    pub value: Val,
    pub dest: Option<Reg>,
    pub store: Option<Key>,
}

/// One micro-operation.
#[derive(Debug, Clone)]
pub(crate) enum MicroOp {
    /// Write a value into a register (masked to the register's width).
    Ld(Reg, Val),
    /// PC ← value.
    Jp(Val),
    /// PC ← PC + value (value already sign-mapped).
    Jr(Val),
    /// Swap AF with AF'.
    ExAf,
    /// Swap BC/DE/HL with the shadow bank.
    Exx,
    /// Swap two registers.
    Ex(Reg, Reg),
    /// Modular increment/decrement by register width.
    Inc(Reg),
    Dec(Reg),
    /// Copy a value into a parameter-bag slot.
    Stash(Key, Val),
    SetFlags(FlagUpdate),
    ForceFlag(Flag, Pred),
    ClearFlag(Flag),
    OnFlag(Flag, Box<MicroOp>),
    UnlessFlag(Flag, Box<MicroOp>),
    OnZero(Reg, Box<MicroOp>),
    OnCond(PredFn, Box<MicroOp>),
    /// Run each micro-op in order with the same operand.
    Seq(Vec<MicroOp>),
    /// Truncate the pipeline to the currently executing state.
    EarlyAbort,
    Di,
    Ei,
    Im(u8),
    /// IFF1 ← IFF2 (RETN).
    RestoreIff,
    Daa,
    /// HALT: back PC up to refetch the opcode until an interrupt is
    /// latched, tracking the halted flag.
    Halt,
    /// Consume and discard one interrupt-acknowledge byte.
    IntAck,
}

impl Z80 {
    /// Execute one micro-op against the given bag, with `arg` as the
    /// cascaded operand when the containing state supplies one.
    pub(crate) fn apply(&mut self, bag: &mut Bag, op: &MicroOp, arg: Option<i32>) {
        match op {
            MicroOp::Ld(r, v) => {
                let value = self.eval(bag, *v, arg);
                self.regs.set(*r, value as u16);
            }
            MicroOp::Jp(v) => {
                let target = self.eval(bag, *v, arg);
                self.regs.pc = target as u16;
            }
            MicroOp::Jr(v) => {
                let offset = self.eval(bag, *v, arg);
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            }
            MicroOp::ExAf => self.regs.ex_af(),
            MicroOp::Exx => self.regs.exx(),
            MicroOp::Ex(a, b) => {
                let tmp = self.regs.get(*a);
                let other = self.regs.get(*b);
                self.regs.set(*a, other);
                self.regs.set(*b, tmp);
            }
            MicroOp::Inc(r) => {
                let value = self.regs.get(*r).wrapping_add(1);
                self.regs.set(*r, value);
            }
            MicroOp::Dec(r) => {
                let value = self.regs.get(*r).wrapping_sub(1);
                self.regs.set(*r, value);
            }
            MicroOp::Stash(key, v) => {
                let value = self.eval(bag, *v, arg);
                bag.set(*key, value);
            }
            MicroOp::SetFlags(update) => {
                let raw = self.eval(bag, update.value, arg);
                let iff2 = self.iff2;
                let low = update.template.apply(&mut self.regs, raw, iff2);
                if let Some(key) = update.store {
                    bag.set(key, i32::from(low));
                }
                if let Some(dest) = update.dest {
                    self.regs.set(dest, u16::from(low));
                }
            }
            MicroOp::ForceFlag(flag, pred) => {
                let on = self.test(bag, *pred, arg);
                self.regs.put_flag(*flag, on);
            }
            MicroOp::ClearFlag(flag) => self.regs.reset_flag(*flag),
            MicroOp::OnFlag(flag, inner) => {
                if self.regs.flag(*flag) {
                    self.apply(bag, inner, arg);
                }
            }
            MicroOp::UnlessFlag(flag, inner) => {
                if !self.regs.flag(*flag) {
                    self.apply(bag, inner, arg);
                }
            }
            MicroOp::OnZero(r, inner) => {
                if self.regs.get(*r) == 0 {
                    self.apply(bag, inner, arg);
                }
            }
            MicroOp::OnCond(pred, inner) => {
                let hit = pred(&Ctx {
                    cpu: self,
                    bag,
                    arg: arg.unwrap_or(0),
                });
                if hit {
                    self.apply(bag, inner, arg);
                }
            }
            MicroOp::Seq(ops) => {
                for inner in ops {
                    self.apply(bag, inner, arg);
                }
            }
            MicroOp::EarlyAbort => self.truncate_pipeline(),
            MicroOp::Di => {
                self.iff1 = false;
                self.iff2 = false;
            }
            MicroOp::Ei => {
                self.iff1 = true;
                self.iff2 = true;
            }
            MicroOp::Im(mode) => self.im = *mode,
            MicroOp::RestoreIff => self.iff1 = self.iff2,
            MicroOp::Daa => self.daa(),
            MicroOp::Halt => {
                if self.int_pending() {
                    self.halted = false;
                } else {
                    self.regs.pc = self.regs.pc.wrapping_sub(1);
                    self.halted = true;
                }
            }
            MicroOp::IntAck => {
                self.ack_byte();
            }
        }
    }

    /// Decimal adjust of A. F is rebuilt from scratch: C from the
    /// correction, N preserved, S/5/3 copied from the result, Z from the
    /// result, H and P cleared.
    fn daa(&mut self) {
        let mut a = i32::from(self.regs.a);
        let c = self.regs.f & CF != 0;
        let h = self.regs.f & HF != 0;
        let n = self.regs.f & NF != 0;

        let mut f = 0u8;
        if n {
            if (a & 0xF) > 9 || h {
                a -= 0x06;
            }
            if (a >> 4) > 9 || c {
                a -= 0x60;
                f = CF;
            }
        } else {
            if (a & 0xF) > 9 || h {
                a += 0x06;
            }
            if (a >> 4) > 9 || c {
                a += 0x60;
                f = CF;
            }
        }
        let a = (a & 0xFF) as u8;
        f |= if n { NF } else { 0 };
        f |= a & 0xA8;
        if a == 0 {
            f |= ZF;
        }
        self.regs.a = a;
        self.regs.f = f;
    }

    fn src8(&self, s: Src8, arg: Option<i32>) -> i32 {
        match s {
            Src8::Reg(r) => i32::from(self.regs.get(r)),
            Src8::Arg => arg.expect("micro-op needs a cascaded operand"),
        }
    }

    fn carry(&self) -> i32 {
        i32::from(self.regs.f & CF)
    }

    /// Resolve a value source to its raw result.
    pub(crate) fn eval(&self, bag: &Bag, val: Val, arg: Option<i32>) -> i32 {
        match val {
            Val::Lit(v) => i32::from(v),
            Val::Reg(r) => i32::from(self.regs.get(r)),
            Val::Bag(key) => bag.expect(key),
            Val::Arg => arg.expect("micro-op needs a cascaded operand"),
            Val::Alu(op, s) => {
                let a = i32::from(self.regs.a);
                let v = self.src8(s, arg);
                match op {
                    AluOp::Add => a + v,
                    AluOp::Adc => a + v + self.carry(),
                    AluOp::Sub => a - v,
                    AluOp::Sbc => a - v - self.carry(),
                    AluOp::And => a & v,
                    AluOp::Xor => a ^ v,
                    AluOp::Or => a | v,
                }
            }
            Val::IncOf(s) => self.src8(s, arg) + 1,
            Val::DecOf(s) => self.src8(s, arg) - 1,
            Val::Add16(a, b) => {
                (i32::from(self.regs.get(a)) + i32::from(self.regs.get(b))) & 0xFFFF
            }
            Val::Add16Hi(a, b) => {
                let a = i32::from(self.regs.get(a));
                let b = i32::from(self.regs.get(b));
                (a >> 8) + (b >> 8) + (((a & 0xFF) + (b & 0xFF)) >> 8)
            }
            Val::Neg16(r) => -i32::from(self.regs.get(r)) & 0xFFFF,
            Val::Rot(op, s) => {
                let v = self.src8(s, arg);
                match op {
                    RotOp::Rlc => (v << 1) | (v >> 7),
                    RotOp::Rl => (v << 1) | self.carry(),
                    RotOp::Rrc => (v >> 1) | ((v & 0x01) << 7) | ((v & 0x01) << 8),
                    RotOp::Rr => (v >> 1) | (self.carry() << 7) | ((v & 0x01) << 8),
                    RotOp::Sla => v << 1,
                    RotOp::Sra => (v >> 1) | (v & 0x80) | ((v & 0x01) << 8),
                    RotOp::Sl1 => (v << 1) | 0x01,
                    RotOp::Srl => (v >> 1) | ((v & 0x01) << 8),
                }
            }
            Val::BitOf(n, s) => self.src8(s, arg) & (1 << n),
            Val::ResOf(n, s) => self.src8(s, arg) & (0xFF - (1 << n)),
            Val::SetOf(n, s) => self.src8(s, arg) | (1 << n),
            Val::F(f) => f(&Ctx {
                cpu: self,
                bag,
                arg: arg.unwrap_or(0),
            }),
        }
    }

    /// Resolve a predicate source.
    pub(crate) fn test(&self, bag: &Bag, pred: Pred, arg: Option<i32>) -> bool {
        match pred {
            Pred::F(f) => f(&Ctx {
                cpu: self,
                bag,
                arg: arg.unwrap_or(0),
            }),
            Pred::Half(op, s) => {
                let a = i32::from(self.regs.a) & 0xF;
                let v = self.src8(s, arg) & 0xF;
                match op {
                    AluOp::Add => a + v > 0xF,
                    AluOp::Adc => a + v + self.carry() > 0xF,
                    AluOp::Sub => a - v < 0,
                    AluOp::Sbc => a - v - self.carry() < 0,
                    AluOp::And | AluOp::Xor | AluOp::Or => {
                        unreachable!("logical ops force H from the template")
                    }
                }
            }
            Pred::HalfInc(s) => (self.src8(s, arg) & 0xF) + 1 > 0xF,
            Pred::HalfDec(s) => (self.src8(s, arg) & 0xF) - 1 < 0,
            Pred::Half16(a, b) => {
                let a = i32::from(self.regs.get(a));
                let b = i32::from(self.regs.get(b));
                ((a >> 8) & 0xF) + ((b >> 8) & 0xF) + (((a & 0xFF) + (b & 0xFF)) >> 8) > 0xF
            }
        }
    }
}
