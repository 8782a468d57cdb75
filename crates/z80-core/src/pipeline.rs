//! Fixed-capacity queue of machine states for one in-flight instruction.
//!
//! The longest Z80 instruction needs well under a dozen states, so the
//! queue is a fixed ring — no allocation while executing.

use crate::state::{MachineState, StateSpec};

/// Maximum number of machine states queued at once.
const CAPACITY: usize = 12;

/// Placeholder occupying unused ring slots.
static FILLER: StateSpec = StateSpec::Ocf {
    prefix: None,
    extra: 0,
};

#[derive(Clone, Copy)]
pub(crate) struct Pipeline {
    states: [MachineState; CAPACITY],
    head: u8,
    len: u8,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            states: [MachineState::new(&FILLER); CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// True if any pending state forbids injecting a new opcode fetch.
    pub fn fetch_locked(&self) -> bool {
        (0..usize::from(self.len)).any(|i| {
            let idx = (usize::from(self.head) + i) % CAPACITY;
            self.states[idx].fetch_locked()
        })
    }

    /// Drop every queued state. Used by `early_abort` while the head is
    /// checked out of the queue, so "truncate behind the head" and
    /// "clear" coincide.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn push_back(&mut self, state: MachineState) {
        debug_assert!(usize::from(self.len) < CAPACITY, "pipeline overflow");
        let idx = (usize::from(self.head) + usize::from(self.len)) % CAPACITY;
        self.states[idx] = state;
        self.len += 1;
    }

    pub fn push_front(&mut self, state: MachineState) {
        debug_assert!(usize::from(self.len) < CAPACITY, "pipeline overflow");
        self.head = if self.head == 0 {
            (CAPACITY - 1) as u8
        } else {
            self.head - 1
        };
        self.states[usize::from(self.head)] = state;
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<MachineState> {
        if self.len == 0 {
            None
        } else {
            let state = self.states[usize::from(self.head)];
            self.head = ((usize::from(self.head) + 1) % CAPACITY) as u8;
            self.len -= 1;
            Some(state)
        }
    }

    pub fn front_mut(&mut self) -> Option<&mut MachineState> {
        if self.len == 0 {
            None
        } else {
            Some(&mut self.states[usize::from(self.head)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut p = Pipeline::new();
        assert!(p.is_empty());
        for _ in 0..3 {
            p.push_back(MachineState::new(&FILLER));
        }
        assert_eq!(p.len(), 3);
        while p.pop_front().is_some() {}
        assert!(p.is_empty());
    }

    #[test]
    fn push_front_wraps() {
        let mut p = Pipeline::new();
        p.push_back(MachineState::new(&FILLER));
        p.pop_front();
        // Head has advanced; front-pushing must wrap cleanly.
        p.push_front(MachineState::new(&FILLER));
        p.push_front(MachineState::new(&FILLER));
        assert_eq!(p.len(), 2);
        p.clear();
        assert!(p.is_empty());
    }
}
