//! Least recently used ordering of bond slots

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Permutation of all slot indices, least recently used first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LruList<const N: usize> {
    order: Vec<u8, N>,
}

impl<const N: usize> Default for LruList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LruList<N> {
    /// Slot 0 is the first victim, slot `N - 1` the last.
    pub fn new() -> Self {
        const { assert!(N > 0 && N <= 256, "Bond capacity must be in 1..=256") };
        let mut order = Vec::new();
        for slot in 0..N {
            // Capacity is N, so this can't fail
            let _ = order.push(slot as u8);
        }
        Self { order }
    }

    /// Whether every slot index appears exactly once.
    pub fn is_valid(&self) -> bool {
        if self.order.len() != N {
            return false;
        }
        let mut seen = [false; N];
        for &slot in self.order.iter() {
            let slot = slot as usize;
            if slot >= N || seen[slot] {
                return false;
            }
            seen[slot] = true;
        }
        true
    }

    /// Mark `slot` as the most recently used.
    pub fn touch(&mut self, slot: u8) {
        if let Some(pos) = self.order.iter().position(|s| *s == slot) {
            let slot = self.order.remove(pos);
            let _ = self.order.push(slot);
        }
    }

    /// The least recently used slot
    pub fn victim(&self) -> u8 {
        self.order.first().copied().unwrap_or(0)
    }

    /// Slots from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.order.iter().copied()
    }
}
