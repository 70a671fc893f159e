//! Holding-register tables
//!
//! A register table maps 16-bit addresses to 16-bit values. Lookups of an
//! address the table does not hold return `None`; writes to such an address
//! fail and leave the table unchanged. The protocol engine turns a missing
//! register into the wire-level 0 fill, not this API.

use std::collections::BTreeMap;

/// Addressable holding-register storage
pub trait RegisterTable {
    /// Read a register, `None` if the address is not held
    fn get(&self, address: u16) -> Option<u16>;

    /// Write a register, `false` if the address is not held
    fn set(&mut self, address: u16, value: u16) -> bool;

    /// Whether the address is held by this table
    fn contains(&self, address: u16) -> bool {
        self.get(address).is_some()
    }

    /// Whether every address in `[start, start + count)` is held
    ///
    /// A range running past 0xFFFF is never valid.
    fn valid_range(&self, start: u16, count: u16) -> bool {
        if start as u32 + count as u32 > 0x1_0000 {
            return false;
        }
        (0..count).all(|i| self.contains(start + i))
    }
}

/// Fixed-size table covering `[base, base + len)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseRegisters {
    base: u16,
    values: Vec<u16>,
}

impl DenseRegisters {
    /// Create a zeroed table of `count` registers starting at `base`
    ///
    /// The table is truncated so that it never extends past address 0xFFFF.
    pub fn new(base: u16, count: u16) -> Self {
        let count = (count as u32).min(0x1_0000 - base as u32);
        Self {
            base,
            values: vec![0; count as usize],
        }
    }

    /// First address held
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Number of registers held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn index(&self, address: u16) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset < self.values.len()).then_some(offset)
    }
}

impl RegisterTable for DenseRegisters {
    fn get(&self, address: u16) -> Option<u16> {
        self.index(address).map(|i| self.values[i])
    }

    fn set(&mut self, address: u16, value: u16) -> bool {
        match self.index(address) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    fn valid_range(&self, start: u16, count: u16) -> bool {
        let end = start as u32 + count as u32;
        start >= self.base && end <= self.base as u32 + self.values.len() as u32
    }
}

/// Sparse table that grows on demand
///
/// Only addresses introduced through [`SparseRegisters::add`] are held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseRegisters {
    values: BTreeMap<u16, u16>,
}

impl SparseRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `address`, initialised (or overwritten) with `value`
    pub fn add(&mut self, address: u16, value: u16) {
        self.values.insert(address, value);
    }

    /// Hold `count` consecutive addresses starting at `start`, zero initialised
    ///
    /// Addresses already held keep their value.
    pub fn add_range(&mut self, start: u16, count: u16) {
        for offset in 0..count {
            let Some(address) = start.checked_add(offset) else {
                break;
            };
            self.values.entry(address).or_insert(0);
        }
    }

    /// Stop holding `address`
    pub fn remove(&mut self, address: u16) -> Option<u16> {
        self.values.remove(&address)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl RegisterTable for SparseRegisters {
    fn get(&self, address: u16) -> Option<u16> {
        self.values.get(&address).copied()
    }

    fn set(&mut self, address: u16, value: u16) -> bool {
        match self.values.get_mut(&address) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_round_trip_and_bounds() {
        let mut regs = DenseRegisters::new(10, 4);
        assert!(regs.set(10, 703));
        assert!(regs.set(13, 0xFFFF));
        assert_eq!(regs.get(10), Some(703));
        assert_eq!(regs.get(13), Some(0xFFFF));
        assert!(!regs.set(14, 1));
        assert!(!regs.set(9, 1));
        assert_eq!(regs.get(14), None);
        assert_eq!(regs.get(9), None);
    }

    #[test]
    fn test_dense_valid_range() {
        let regs = DenseRegisters::new(10, 4);
        assert!(regs.valid_range(10, 4));
        assert!(regs.valid_range(12, 2));
        assert!(!regs.valid_range(12, 3));
        assert!(!regs.valid_range(9, 1));
    }

    #[test]
    fn test_dense_truncated_at_top_of_space() {
        let regs = DenseRegisters::new(0xFFFE, 10);
        assert_eq!(regs.len(), 2);
        assert!(regs.contains(0xFFFF));
    }

    #[test]
    fn test_sparse_absent_register() {
        let mut regs = SparseRegisters::new();
        regs.add(3, 703);
        assert_eq!(regs.get(3), Some(703));
        assert_eq!(regs.get(4), None);
        assert!(!regs.set(4, 1));
        assert_eq!(regs.get(4), None);
    }

    #[test]
    fn test_sparse_valid_range_with_gap() {
        let mut regs = SparseRegisters::new();
        regs.add_range(0, 3);
        regs.add(4, 9);
        assert!(regs.valid_range(0, 3));
        assert!(!regs.valid_range(0, 5));
        assert!(!regs.valid_range(0xFFFF, 2));
    }

    #[test]
    fn test_sparse_add_range_keeps_values() {
        let mut regs = SparseRegisters::new();
        regs.add(1, 42);
        regs.add_range(0, 3);
        assert_eq!(regs.get(1), Some(42));
        assert_eq!(regs.len(), 3);
        assert_eq!(regs.remove(1), Some(42));
        assert!(!regs.contains(1));
    }
}
