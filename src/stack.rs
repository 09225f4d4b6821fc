//! The data stack threading tensors between composed layers.
//!
//! A [`Stack`] is an ordered sequence mutated only by push/pop of contiguous
//! prefixes. Sequences exchanged with callers are top-first: index 0 of the
//! vector handed to `push_front` (or returned by `pop_n`) is the top of the
//! stack. The same container is reused at signature level during
//! initialization, so it is generic over the item type.

use crate::error::{LayerError, Result};

/// Ordered sequence with push/pop of contiguous prefixes.
#[derive(Debug, Clone)]
pub struct Stack<T> {
    // Stored bottom-to-top; the end of the vector is the top.
    items: Vec<T>,
}

impl<T> Stack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Builds a stack from a top-first sequence.
    pub fn from_items(top_first: Vec<T>) -> Self {
        let mut items = top_first;
        items.reverse();
        Self { items }
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the stack holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pops the top `n` items, returned top-first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<T>> {
        if n > self.items.len() {
            return Err(LayerError::StackUnderflow {
                requested: n,
                available: self.items.len(),
            });
        }
        let mut popped = self.items.split_off(self.items.len() - n);
        popped.reverse();
        Ok(popped)
    }

    /// Pushes a top-first sequence back onto the stack.
    pub fn push_front(&mut self, top_first: Vec<T>) {
        self.items.extend(top_first.into_iter().rev());
    }

    /// Consumes the stack, returning all items top-first.
    pub fn into_items(self) -> Vec<T> {
        let mut items = self.items;
        items.reverse();
        items
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_returns_items_top_first() -> Result<()> {
        let mut stack = Stack::from_items(vec!["a", "b", "c"]);
        let popped = stack.pop_n(2)?;
        assert_eq!(popped, vec!["a", "b"]);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.into_items(), vec!["c"]);
        Ok(())
    }

    #[test]
    fn push_front_round_trips_pop() -> Result<()> {
        let mut stack = Stack::from_items(vec![3, 4]);
        stack.push_front(vec![1, 2]);
        assert_eq!(stack.pop_n(4)?, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn underflow_is_reported_with_depths() {
        let mut stack: Stack<u8> = Stack::from_items(vec![1]);
        let err = stack.pop_n(3).unwrap_err();
        match err {
            LayerError::StackUnderflow {
                requested,
                available,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
