//! The Z80 itself: register file, interrupt state, and the T-cycle
//! scheduler that drives the machine-state pipeline.

use machine_core::{Cpu, Iobus, Membus};

use crate::decode::decoder;
use crate::error::UnrecognisedInstruction;
use crate::pipeline::Pipeline;
use crate::registers::Registers;
use crate::state::{MachineState, Opcode, StateSpec};

/// A plain opcode fetch, injected by the scheduler whenever the pipeline
/// runs dry.
static FETCH: StateSpec = StateSpec::Ocf {
    prefix: None,
    extra: 0,
};

/// What the CPU most recently began executing, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    Op(Opcode),
    Nmi,
    /// Maskable interrupt acceptance, tagged with the interrupt mode.
    Int(u8),
}

/// Cursor over the bytes a bus device supplies during interrupt
/// acknowledge. Exhausted reads yield 0x00; re-arming restarts it.
#[derive(Debug, Clone, Default)]
struct AckData {
    bytes: Vec<u8>,
    pos: usize,
}

impl AckData {
    fn arm(&mut self, bytes: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
        self.pos = 0;
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }
}

/// Cycle-accurate Z80 CPU core.
///
/// Call [`Z80::tick`] once per T-cycle. When the pipeline is empty the
/// scheduler injects either an interrupt response or a fresh opcode
/// fetch; otherwise the head machine state receives the cycle. The
/// scheduler itself never consumes cycles — every observable bus event
/// belongs to exactly one machine state.
pub struct Z80 {
    pub regs: Registers,
    pub iff1: bool,
    pub iff2: bool,
    /// Interrupt mode, 0..=2.
    pub im: u8,
    pub halted: bool,
    /// Maskable-interrupt latch, consulted by HALT and the scheduler.
    pub int: bool,
    pub most_recent_instruction: Option<Trace>,
    nmi_line: bool,
    ack: AckData,
    pub(crate) pipeline: Pipeline,
    /// True while the current pipeline consumes injected acknowledge
    /// bytes instead of the instruction stream.
    pub(crate) from_int: bool,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            iff1: false,
            iff2: false,
            im: 0,
            halted: false,
            int: false,
            most_recent_instruction: None,
            nmi_line: false,
            ack: AckData::default(),
            pipeline: Pipeline::new(),
            from_int: false,
        }
    }

    /// Advance the CPU by exactly one T-cycle.
    ///
    /// Decode failure aborts the instruction, leaves PC at the offending
    /// opcode, and empties the pipeline so the driver can decide how to
    /// proceed.
    pub fn tick<M: Membus, I: Iobus>(
        &mut self,
        membus: &mut M,
        iobus: &mut I,
    ) -> Result<(), UnrecognisedInstruction> {
        if self.pipeline.is_empty() && !self.pipeline.fetch_locked() {
            if self.int && self.iff1 {
                self.interrupt_response(false);
            } else if self.nmi_line {
                self.interrupt_response(true);
            } else {
                self.from_int = false;
                self.pipeline.push_back(MachineState::new(&FETCH));
            }
        }

        let Some(mut head) = self.pipeline.pop_front() else {
            unreachable!("scheduler always leaves a state to run")
        };
        match self.run_state(&mut head, membus, iobus) {
            Ok(true) => {
                if let Some(next) = self.pipeline.front_mut() {
                    next.bag = head.bag;
                } else {
                    self.from_int = false;
                }
                Ok(())
            }
            Ok(false) => {
                self.pipeline.push_front(head);
                Ok(())
            }
            Err(err) => {
                self.pipeline.clear();
                self.from_int = false;
                Err(err)
            }
        }
    }

    /// Build and inject the pipeline that answers an accepted interrupt.
    ///
    /// Must only be called between instructions (empty pipeline); the
    /// scheduler does this itself from the latches, but drivers that
    /// manage acceptance manually may call it directly.
    pub fn interrupt_response(&mut self, nmi: bool) {
        debug_assert!(self.pipeline.is_empty(), "interrupt mid-instruction");
        let d = decoder();
        let states = if nmi {
            &d.nmi_states
        } else {
            match self.im {
                0 => &d.im0_states,
                1 => &d.im1_states,
                _ => &d.im2_states,
            }
        };
        for spec in states {
            self.pipeline.push_back(MachineState::new(spec));
        }
        self.from_int = true;
        self.halted = false;
        if nmi {
            self.nmi_line = false;
            self.iff1 = false;
            self.most_recent_instruction = Some(Trace::Nmi);
        } else {
            self.int = false;
            self.iff1 = false;
            self.iff2 = false;
            self.most_recent_instruction = Some(Trace::Int(self.im));
        }
    }

    /// Latch a maskable interrupt and supply the acknowledge bytes the
    /// requesting device will put on the bus (the IM 0 opcode stream or
    /// the IM 2 vector byte). Returns true if interrupts are enabled.
    pub fn interrupt_with_data(&mut self, bytes: &[u8]) -> bool {
        self.ack.arm(bytes);
        self.int = true;
        self.iff1
    }

    /// True when no instruction is partway through execution.
    #[must_use]
    pub fn is_instruction_complete(&self) -> bool {
        self.pipeline.is_empty()
    }

    /// Consume one acknowledge byte; 0x00 once the device's bytes run out.
    pub(crate) fn ack_byte(&mut self) -> u8 {
        self.ack.next().unwrap_or(0x00)
    }

    pub(crate) fn int_pending(&self) -> bool {
        self.int
    }

    pub(crate) fn push_state(&mut self, state: MachineState) {
        self.pipeline.push_back(state);
    }

    /// `early_abort`: cancel everything queued behind the currently
    /// executing state (which the scheduler holds checked out).
    pub(crate) fn truncate_pipeline(&mut self) {
        self.pipeline.clear();
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for Z80 {
    type Registers = Registers;
    type Error = UnrecognisedInstruction;

    fn tick<M: Membus, I: Iobus>(
        &mut self,
        membus: &mut M,
        iobus: &mut I,
    ) -> Result<(), Self::Error> {
        Z80::tick(self, membus, iobus)
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn registers(&self) -> Registers {
        self.regs.clone()
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn interrupt(&mut self) -> bool {
        self.int = true;
        self.iff1
    }

    fn nmi(&mut self) {
        self.nmi_line = true;
    }

    fn reset(&mut self) {
        *self = Z80::new();
    }
}
