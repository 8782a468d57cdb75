//! CPU core trait.

use crate::{Iobus, Membus};

/// A CPU core driven one T-cycle at a time.
///
/// The buses are passed in, not owned, so they can be shared with other
/// components (video, peripherals). All observable bus activity happens
/// inside `tick`, attributed to exactly one machine cycle.
pub trait Cpu {
    /// The type used for register inspection.
    type Registers;

    /// The error surfaced when the core cannot continue the current
    /// instruction (e.g. an opcode missing from the decode table). The
    /// driver decides whether to halt, skip, or log.
    type Error;

    /// Advance the CPU by exactly one T-cycle.
    fn tick<M: Membus, I: Iobus>(&mut self, membus: &mut M, iobus: &mut I)
    -> Result<(), Self::Error>;

    /// Returns the current program counter.
    fn pc(&self) -> u16;

    /// Returns a snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// Returns true if the CPU is halted.
    fn is_halted(&self) -> bool;

    /// Latch a maskable interrupt request. Returns true if the core will
    /// accept it (interrupts enabled).
    fn interrupt(&mut self) -> bool;

    /// Latch a non-maskable interrupt request.
    fn nmi(&mut self);

    /// Reset the CPU to its initial state.
    fn reset(&mut self);
}
