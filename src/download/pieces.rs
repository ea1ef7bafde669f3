//! Authoritative pieces-set
//!
//! One bit per piece, set only after a verified write. Bits transition
//! false to true and never back, so relaxed atomics are all the sharing
//! discipline this needs.

use std::sync::atomic::{AtomicBool, Ordering};

/// A shared flag per piece
#[derive(Debug)]
pub struct PiecesSet {
    bits: Vec<AtomicBool>,
}

impl PiecesSet {
    pub fn from_bools(initial: &[bool]) -> Self {
        Self {
            bits: initial.iter().map(|&b| AtomicBool::new(b)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits[index].load(Ordering::Relaxed)
    }

    /// Mark a piece verified
    pub fn set(&self, index: usize) {
        self.bits[index].store(true, Ordering::Relaxed);
    }

    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .filter(|bit| bit.load(Ordering::Relaxed))
            .count()
    }

    pub fn all(&self) -> bool {
        self.count() == self.len()
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.bits
            .iter()
            .map(|bit| bit.load(Ordering::Relaxed))
            .collect()
    }
}
