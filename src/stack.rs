//! Interpreter value stack
//!
//! A last-in-first-out stack of 256-bit words with a fixed depth limit.
//! Bounds are checked up front by the instruction table, but every operation
//! still reports underflow/overflow on its own.

use crate::errors::{Result, VmError};
use crate::types::{STACK_LIMIT, U256};

/// Fixed-capacity LIFO stack of `U256` words.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    items: Vec<U256>,
}

impl Stack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(32),
        }
    }

    /// Number of items currently on the stack.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no items are on the stack.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Push a word, failing once the depth limit is reached.
    pub fn push(&mut self, value: U256) -> Result<()> {
        if self.items.len() >= STACK_LIMIT {
            return Err(VmError::StackOverflow);
        }
        self.items.push(value);
        Ok(())
    }

    /// Pop the top word.
    pub fn pop(&mut self) -> Result<U256> {
        self.items.pop().ok_or(VmError::StackUnderflow)
    }

    /// Peek at the n-th word from the top (0 = top) without removing it.
    pub fn peek(&self, depth: usize) -> Result<U256> {
        if depth >= self.items.len() {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.items[self.items.len() - 1 - depth])
    }

    /// Duplicate the n-th word from the top (1 = top), pushing the copy.
    pub fn dup(&mut self, n: usize) -> Result<()> {
        let value = self.peek(n - 1)?;
        self.push(value)
    }

    /// Swap the top word with the n-th word below it (1 = directly below).
    pub fn swap(&mut self, n: usize) -> Result<()> {
        if n >= self.items.len() {
            return Err(VmError::StackUnderflow);
        }
        let top = self.items.len() - 1;
        self.items.swap(top, top - n);
        Ok(())
    }
}
