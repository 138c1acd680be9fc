//! Bounded LIFO cache of recycled objects.
//!
//! A [`Upool`] keeps up to `depth` previously-released objects so hot
//! allocation paths (urefs, dictionaries, pump tokens) skip the allocator.
//! `pop` hands back a recycled object or `None` (the caller then builds a
//! fresh one); `push` accepts the object or returns it to the caller when
//! the pool is full (the caller then lets it drop).
//!
//! The pool is shared across threads; the depth is fixed at construction.

use std::sync::Mutex;

/// Bounded LIFO recycler.
pub struct Upool<T> {
    depth: usize,
    slots: Mutex<Vec<T>>,
}

impl<T> Upool<T> {
    /// Create a pool caching at most `depth` objects.
    ///
    /// A depth of zero is allowed and makes the pool a no-op: every `push`
    /// bounces and every `pop` misses.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            slots: Mutex::new(Vec::with_capacity(depth)),
        }
    }

    /// Maximum number of cached objects.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of objects currently cached.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the most recently pushed object, if any.
    pub fn pop(&self) -> Option<T> {
        self.slots.lock().unwrap().pop()
    }

    /// Offer an object for recycling.
    ///
    /// Returns `Ok(())` when cached, or gives the object back as
    /// `Err(value)` when the pool is already at depth.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let mut slots = self.slots.lock().unwrap();
        if slots.len() >= self.depth {
            return Err(value);
        }
        slots.push(value);
        Ok(())
    }

    /// Drop every cached object, leaving the pool empty but usable.
    pub fn vacuum(&self) {
        self.slots.lock().unwrap().clear();
    }
}

impl<T> std::fmt::Debug for Upool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upool")
            .field("depth", &self.depth)
            .field("len", &self.len())
            .finish()
    }
}
