//! Allocation bitmaps. A set bit marks the inode or block at that index as occupied.

use bitvec::{order::Lsb0, vec::BitVec};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bits: BitVec<u8, Lsb0>,
}

impl Bitmap {
    /// A bitmap of `len` clear bits.
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    /// Rebuilds a bitmap of `len` bits from its stored bytes.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut bits = BitVec::<u8, Lsb0>::from_slice(bytes);
        bits.resize(len, false);

        Self { bits }
    }

    /// The stored form: `ceil(len / 8)` bytes, bit `i` at bit `i % 8` of byte `i / 8`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        bits.set_uninitialized(false);

        bits.into_vec()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Marks the lowest clear bit as occupied and returns its index.
    pub fn allocate(&mut self) -> Option<usize> {
        let assigned = self.bits.first_zero();

        if let Some(index) = assigned {
            self.bits.set(index, true);
        }

        assigned
    }

    /// Marks `index` as occupied regardless of its current state.
    pub fn reserve(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, true);
        }
    }

    /// Clears `index`. Returns whether it was set; freeing a clear bit changes nothing.
    pub fn free(&mut self, index: usize) -> bool {
        let was_set = self.is_set(index);

        if was_set {
            self.bits.set(index, false);
        }

        was_set
    }

    /// Out-of-range indices read as clear.
    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    pub fn count_used(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn count_free(&self) -> usize {
        self.bits.count_zeros()
    }

    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}
