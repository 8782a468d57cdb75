//! Machine-state primitives.
//!
//! Every instruction decomposes into a sequence of these states: opcode
//! fetch (OCF), operand fetch (OD), memory read/write (MR/MW), stack
//! read/write (SR/SW), port read/write (PR/PW) and internal cycles (IO).
//! Each state consumes a fixed number of T-cycles, performs its bus event
//! on the same cycle the hardware would, and cascades values to the next
//! state through the pipeline's parameter bag.

use std::fmt;

use machine_core::{Iobus, Membus};

use crate::cpu::{Trace, Z80};
use crate::decode::{Entry, decoder};
use crate::error::UnrecognisedInstruction;
use crate::microcode::MicroOp;
use crate::registers::Reg;

/// An opcode key: one byte, or a prefixed two/three-byte tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    One(u8),
    Two(u8, u8),
    Three(u8, u8, u8),
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::One(a) => write!(f, "0x{a:02X}"),
            Opcode::Two(a, b) => write!(f, "(0x{a:02X}, 0x{b:02X})"),
            Opcode::Three(a, b, c) => write!(f, "(0x{a:02X}, 0x{b:02X}, 0x{c:02X})"),
        }
    }
}

/// Slot names in the parameter bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Key {
    Value,
    Address,
    Target,
    Summand,
    /// Scratch byte used by EX (SP),rr.
    H,
    /// Scratch byte used by EX (SP),rr.
    L,
}

/// The per-pipeline parameter bag, cascaded from each completed state to
/// the next. Slots hold `i32` because signed displacements pass through
/// `address` before the index-register add resolves them.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Bag {
    slots: [Option<i32>; 6],
}

impl Bag {
    pub fn get(&self, key: Key) -> Option<i32> {
        self.slots[key as usize]
    }

    pub fn set(&mut self, key: Key, value: i32) {
        self.slots[key as usize] = Some(value);
    }

    /// Fetch a slot that the decode table guarantees is populated.
    pub fn expect(&self, key: Key) -> i32 {
        match self.slots[key as usize] {
            Some(v) => v,
            None => panic!("parameter bag slot {key:?} not populated — decode table bug"),
        }
    }
}

/// Opcode prefix carried by a nested OCF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    Cb,
    Dd,
    Ed,
    Fd,
    DdCb,
    FdCb,
}

/// Address source for MR/MW: the `address` bag slot or a register.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AddrMode {
    Bag,
    Reg(Reg),
}

/// Data source for MW/SW/PW: a register or a bag slot.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteSrc {
    Reg(Reg),
    Bag(Key),
}

/// In-place bag transform applied on an IO state's first cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Transform {
    /// slot ← register + slot (index-register displacement add).
    AddReg(Key, Reg),
    /// slot ← A − slot (the block-compare subtract).
    SubFromA(Key),
}

/// Decode-time description of one machine state.
///
/// T-cycle counts: OCF 4 (+ its own and the decoded entry's extras),
/// OD/MR 3, MW/SR/SW 3+extra, PR/PW 4, IO as given.
#[derive(Debug, Clone)]
pub(crate) enum StateSpec {
    Ocf {
        prefix: Option<Prefix>,
        extra: u8,
    },
    Od {
        key: Key,
        signed: bool,
        compound: bool,
        action: Option<MicroOp>,
    },
    Mr {
        addr: AddrMode,
        compound: bool,
        incaddr: bool,
        action: Option<MicroOp>,
    },
    Mw {
        addr: AddrMode,
        source: WriteSrc,
        extra: u8,
        action: Option<MicroOp>,
    },
    Sr {
        extra: u8,
        action: Option<MicroOp>,
    },
    Sw {
        source: WriteSrc,
        extra: u8,
        action: Option<MicroOp>,
    },
    Pr {
        high: Option<Reg>,
        low: Option<Reg>,
        dest: Option<Reg>,
        action: Option<MicroOp>,
    },
    Pw {
        high: Option<Reg>,
        low: Option<Reg>,
        source: WriteSrc,
        action: Option<MicroOp>,
    },
    Io {
        ticks: u8,
        locked: bool,
        transform: Option<Transform>,
        action: Option<MicroOp>,
    },
}

/// A machine state in flight: its decode-time spec, the cascading bag,
/// and the per-state latches filled in as the T-cycles elapse.
#[derive(Clone, Copy)]
pub(crate) struct MachineState {
    pub spec: &'static StateSpec,
    pub bag: Bag,
    tick: u8,
    addr: u16,
    data: u8,
    op: Opcode,
    entry: Option<&'static Entry>,
    total: u8,
}

impl MachineState {
    pub fn new(spec: &'static StateSpec) -> Self {
        Self {
            spec,
            bag: Bag::default(),
            tick: 0,
            addr: 0,
            data: 0,
            op: Opcode::One(0),
            entry: None,
            total: 0,
        }
    }

    /// True if the scheduler must not inject a new opcode fetch while
    /// this state is pending.
    pub fn fetch_locked(&self) -> bool {
        match self.spec {
            StateSpec::Io { locked, .. } => *locked,
            _ => true,
        }
    }
}

impl Z80 {
    /// Advance a machine state by one T-cycle. Returns true when the
    /// state has completed and should be retired from the pipeline.
    pub(crate) fn run_state<M: Membus, I: Iobus>(
        &mut self,
        st: &mut MachineState,
        mem: &mut M,
        io: &mut I,
    ) -> Result<bool, UnrecognisedInstruction> {
        st.tick += 1;
        let t = st.tick;

        match st.spec {
            StateSpec::Ocf { prefix, extra } => {
                match t {
                    1 => st.addr = self.regs.pc,
                    2 => {
                        let byte = if self.from_int {
                            self.ack_byte()
                        } else {
                            mem.read(st.addr)
                        };
                        st.op = match prefix {
                            None => Opcode::One(byte),
                            Some(Prefix::Cb) => Opcode::Two(0xCB, byte),
                            Some(Prefix::Dd) => Opcode::Two(0xDD, byte),
                            Some(Prefix::Ed) => Opcode::Two(0xED, byte),
                            Some(Prefix::Fd) => Opcode::Two(0xFD, byte),
                            Some(Prefix::DdCb) => Opcode::Three(0xDD, 0xCB, byte),
                            Some(Prefix::FdCb) => Opcode::Three(0xFD, 0xCB, byte),
                        };
                        self.most_recent_instruction = Some(Trace::Op(st.op));
                    }
                    3 => {
                        let entry = decoder().lookup(st.op)?;
                        st.entry = Some(entry);
                        st.total = 4 + extra + entry.extra;
                        if !self.from_int {
                            self.regs.pc = st.addr.wrapping_add(1);
                        }
                    }
                    _ => {}
                }
                if t >= 4 && t == st.total {
                    let Some(entry) = st.entry else {
                        unreachable!("OCF completing before decode")
                    };
                    for spec in &entry.states {
                        self.push_state(MachineState::new(spec));
                    }
                    for action in &entry.actions {
                        self.apply(&mut st.bag, action, None);
                    }
                    return Ok(true);
                }
                Ok(false)
            }

            StateSpec::Od {
                key,
                signed,
                compound,
                action,
            } => {
                match t {
                    1 => st.addr = self.regs.pc,
                    2 => {
                        st.data = if self.from_int {
                            self.ack_byte()
                        } else {
                            mem.read(st.addr)
                        };
                    }
                    _ => {
                        if !self.from_int {
                            self.regs.pc = st.addr.wrapping_add(1);
                        }
                        let mut d = i32::from(st.data);
                        if *signed && d >= 0x80 {
                            d -= 0x100;
                        }
                        if *compound {
                            if let Some(old) = st.bag.get(*key) {
                                d = (d << 8) | old;
                            }
                        }
                        if let Some(op) = action {
                            self.apply(&mut st.bag, op, Some(d));
                        } else {
                            st.bag.set(*key, d);
                        }
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            StateSpec::Mr {
                addr,
                compound,
                incaddr,
                action,
            } => {
                match t {
                    1 => st.addr = self.resolve_addr(st, *addr, "MR"),
                    2 => st.data = mem.read(st.addr),
                    _ => {
                        let mut d = i32::from(st.data);
                        if *compound {
                            if let Some(old) = st.bag.get(Key::Value) {
                                d = (d << 8) | old;
                            }
                        }
                        if *incaddr {
                            st.bag
                                .set(Key::Address, i32::from(st.addr.wrapping_add(1)));
                        }
                        if let Some(op) = action {
                            self.apply(&mut st.bag, op, Some(d));
                        } else {
                            st.bag.set(Key::Value, d);
                        }
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            StateSpec::Mw {
                addr,
                source,
                extra,
                action,
            } => {
                match t {
                    1 => st.addr = self.resolve_addr(st, *addr, "MW"),
                    2 => st.data = self.resolve_write(st, *source),
                    3 => {
                        mem.write(st.addr, st.data);
                        st.bag
                            .set(Key::Address, i32::from(st.addr.wrapping_add(1)));
                    }
                    _ => {}
                }
                if t == 3 + extra {
                    if let Some(op) = action {
                        let d = i32::from(st.data);
                        self.apply(&mut st.bag, op, Some(d));
                    }
                    return Ok(true);
                }
                Ok(false)
            }

            StateSpec::Sr { extra, action } => {
                match t {
                    1 => st.addr = self.regs.sp,
                    2 => st.data = mem.read(st.addr),
                    _ => {}
                }
                if t == 3 + extra {
                    let mut d = i32::from(st.data);
                    if let Some(old) = st.bag.get(Key::Value) {
                        d = (d << 8) | old;
                    }
                    st.bag.set(Key::Value, d);
                    self.regs.sp = self.regs.sp.wrapping_add(1);
                    if let Some(op) = action {
                        self.apply(&mut st.bag, op, Some(d));
                    }
                    return Ok(true);
                }
                Ok(false)
            }

            StateSpec::Sw {
                source,
                extra,
                action,
            } => {
                if t == 1 {
                    self.regs.sp = self.regs.sp.wrapping_sub(1);
                } else if t == 2 + extra {
                    st.addr = self.regs.sp;
                } else if t == 3 + extra {
                    let d = self.resolve_write(st, *source);
                    mem.write(st.addr, d);
                    if let Some(op) = action {
                        self.apply(&mut st.bag, op, Some(i32::from(d)));
                    }
                    return Ok(true);
                }
                Ok(false)
            }

            StateSpec::Pr {
                high,
                low,
                dest,
                action,
            } => {
                match t {
                    1 => {
                        let lo = match low {
                            Some(r) => self.regs.get(*r) as u8,
                            None => (st.bag.expect(Key::Value) & 0xFF) as u8,
                        };
                        let hi = match high {
                            Some(r) => self.regs.get(*r) as u8,
                            None => 0x00,
                        };
                        st.addr = (u16::from(hi) << 8) | u16::from(lo);
                    }
                    2 => st.data = io.read(st.addr as u8, (st.addr >> 8) as u8),
                    4 => {
                        if let Some(r) = dest {
                            self.regs.set(*r, u16::from(st.data));
                        }
                        st.bag.set(Key::Value, i32::from(st.data));
                        if let Some(op) = action {
                            self.apply(&mut st.bag, op, Some(i32::from(st.data)));
                        }
                        return Ok(true);
                    }
                    _ => {}
                }
                Ok(false)
            }

            StateSpec::Pw {
                high,
                low,
                source,
                action,
            } => {
                match t {
                    1 => {
                        let lo = match low {
                            Some(r) => self.regs.get(*r) as u8,
                            None => (st.bag.expect(Key::Address) & 0xFF) as u8,
                        };
                        let hi = match high {
                            Some(r) => self.regs.get(*r) as u8,
                            None => 0x00,
                        };
                        st.addr = (u16::from(hi) << 8) | u16::from(lo);
                    }
                    2 => st.data = self.resolve_write(st, *source),
                    3 => io.write(st.addr as u8, (st.addr >> 8) as u8, st.data),
                    4 => {
                        st.bag.set(Key::Value, i32::from(st.data));
                        if let Some(op) = action {
                            self.apply(&mut st.bag, op, Some(i32::from(st.data)));
                        }
                        return Ok(true);
                    }
                    _ => {}
                }
                Ok(false)
            }

            StateSpec::Io {
                ticks,
                transform,
                action,
                ..
            } => {
                if t == 1 {
                    match transform {
                        Some(Transform::AddReg(key, r)) => {
                            if let Some(old) = st.bag.get(*key) {
                                st.bag.set(*key, i32::from(self.regs.get(*r)) + old);
                            }
                        }
                        Some(Transform::SubFromA(key)) => {
                            if let Some(old) = st.bag.get(*key) {
                                st.bag.set(*key, i32::from(self.regs.a) - old);
                            }
                        }
                        None => {}
                    }
                }
                if t == *ticks {
                    if let Some(op) = action {
                        self.apply(&mut st.bag, op, None);
                    }
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    fn resolve_addr(&self, st: &MachineState, mode: AddrMode, kind: &str) -> u16 {
        match mode {
            AddrMode::Reg(r) => self.regs.get(r),
            AddrMode::Bag => match st.bag.get(Key::Address) {
                Some(a) => (a & 0xFFFF) as u16,
                None => panic!("{kind} state without an address — decode table bug"),
            },
        }
    }

    fn resolve_write(&self, st: &MachineState, source: WriteSrc) -> u8 {
        match source {
            WriteSrc::Reg(r) => self.regs.get(r) as u8,
            WriteSrc::Bag(key) => (st.bag.expect(key) & 0xFF) as u8,
        }
    }
}
