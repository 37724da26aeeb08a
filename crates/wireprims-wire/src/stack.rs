//! Per-reader stack of nested container states.
//!
//! Readers descend into sequences, objects and maps recursively. Each depth
//! gets a slot describing the window being read; slots are allocated on first
//! use and reset (not dropped) when a later descent reaches the same depth, so
//! a long-lived reader stops allocating once it has seen its deepest document.

use crate::error::{Result, WireError};

/// Deepest nesting of containers and type prefixes a reader follows before
/// rejecting the input as malformed.
pub const MAX_NESTING_DEPTH: usize = 256;

/// State that can be returned to its initial condition for reuse.
pub trait Reset {
    fn reset(&mut self);
}

/// Byte window of the container being read at one nesting depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueInState {
    /// Offset of the first byte inside the container.
    pub start: usize,
    /// Offset one past the last byte inside the container.
    pub limit: usize,
}

impl Reset for ValueInState {
    fn reset(&mut self) {
        self.start = 0;
        self.limit = 0;
    }
}

/// Ordered slots plus the current depth.
#[derive(Debug)]
pub struct NestedContextStack<S> {
    slots: Vec<S>,
    level: usize,
}

impl<S: Reset + Default> NestedContextStack<S> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            level: 0,
        }
    }

    /// Return to depth 0 and reset the slot there. Deeper slots are kept.
    pub fn reset(&mut self) {
        self.level = 0;
        if let Some(slot) = self.slots.first_mut() {
            slot.reset();
        }
    }

    /// Descend one level; a slot previously allocated at that depth is reset.
    pub fn push(&mut self) {
        self.level += 1;
        if let Some(slot) = self.slots.get_mut(self.level) {
            slot.reset();
        }
    }

    /// Ascend one level.
    pub fn pop(&mut self) -> Result<()> {
        if self.level == 0 {
            return Err(WireError::IllegalState(
                "pop on an empty nested context stack".to_string(),
            ));
        }
        self.level -= 1;
        Ok(())
    }

    /// Slot for the current depth, allocating intermediate slots lazily.
    pub fn curr(&mut self) -> &mut S {
        while self.slots.len() <= self.level {
            self.slots.push(S::default());
        }
        &mut self.slots[self.level]
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of slots allocated so far; never shrinks.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}

impl<S: Reset + Default> Default for NestedContextStack<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_returns_to_zero() {
        let mut stack = NestedContextStack::<ValueInState>::new();
        stack.push();
        stack.push();
        assert_eq!(stack.level(), 2);
        stack.pop().unwrap();
        stack.pop().unwrap();
        assert_eq!(stack.level(), 0);
    }

    #[test]
    fn pop_at_zero_is_illegal_state() {
        let mut stack = NestedContextStack::<ValueInState>::new();
        let err = stack.pop().unwrap_err();
        assert!(matches!(err, WireError::IllegalState(_)));
    }

    #[test]
    fn curr_grows_lazily_and_never_shrinks() {
        let mut stack = NestedContextStack::<ValueInState>::new();
        assert_eq!(stack.allocated(), 0);
        stack.push();
        stack.push();
        stack.push();
        stack.curr().limit = 9;
        assert_eq!(stack.allocated(), 4);

        stack.reset();
        assert_eq!(stack.level(), 0);
        assert_eq!(stack.allocated(), 4);
    }

    #[test]
    fn push_resets_reused_slot() {
        let mut stack = NestedContextStack::<ValueInState>::new();
        stack.push();
        *stack.curr() = ValueInState {
            start: 3,
            limit: 7,
        };
        stack.pop().unwrap();

        stack.push();
        assert_eq!(*stack.curr(), ValueInState::default());
    }

    #[test]
    fn reset_clears_only_level_zero() {
        let mut stack = NestedContextStack::<ValueInState>::new();
        stack.curr().limit = 5;
        stack.push();
        stack.curr().limit = 6;

        stack.reset();
        assert_eq!(stack.curr().limit, 0);
        stack.push();
        // reset on push, so the stale 6 is gone either way
        assert_eq!(stack.curr().limit, 0);
    }
}
