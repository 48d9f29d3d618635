//! Sorted, fixed-capacity index of block references.
//!
//! The heap keeps its holes here, smallest first, so the first entry that fits
//! a request is also the best fit. Storage is handed in by the caller (the heap
//! gets it from the bootstrap allocator), the index never allocates.

use core::slice;

/// Ordering rule injected into an [`OrderedIndex`].
pub trait Precedes<T> {
    /// Returns `true` if `a` sorts strictly before `b`.
    fn precedes(&self, a: &T, b: &T) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// Every slot of the backing storage is in use.
    CapacityExceeded,
    /// A rank at or past the current length was requested.
    OutOfRange,
}

/// A dense array of `T` kept sorted under `O`.
pub struct OrderedIndex<'a, T, O> {
    slots: &'a mut [T],
    len: usize,
    order: O,
}

impl<'a, T: Copy, O: Precedes<T>> OrderedIndex<'a, T, O> {
    /// Creates an empty index whose capacity is the length of `slots`.
    pub fn new(slots: &'a mut [T], order: O) -> Self {
        OrderedIndex {
            slots,
            len: 0,
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Inserts `item` after every entry that precedes it and returns its rank.
    ///
    /// `item` lands in front of any entries it ties with.
    pub fn insert(&mut self, item: T) -> Result<usize, IndexError> {
        if self.is_full() {
            return Err(IndexError::CapacityExceeded);
        }

        let mut rank = 0;
        while rank < self.len && self.order.precedes(&self.slots[rank], &item) {
            rank += 1;
        }

        self.slots.copy_within(rank..self.len, rank + 1);
        self.slots[rank] = item;
        self.len += 1;
        Ok(rank)
    }

    /// Returns the entry at `rank`.
    pub fn lookup(&self, rank: usize) -> Result<T, IndexError> {
        if rank >= self.len {
            return Err(IndexError::OutOfRange);
        }
        Ok(self.slots[rank])
    }

    /// Removes and returns the entry at `rank`, closing the gap.
    pub fn remove(&mut self, rank: usize) -> Result<T, IndexError> {
        if rank >= self.len {
            return Err(IndexError::OutOfRange);
        }

        let item = self.slots[rank];
        self.slots.copy_within(rank + 1..self.len, rank);
        self.len -= 1;
        Ok(item)
    }

    /// Returns the rank of the first entry matching `pred`.
    pub fn position(&self, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.iter().position(pred)
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.slots[..self.len].iter()
    }

    /// Checks that no entry precedes the one ranked before it.
    pub fn is_sorted(&self) -> bool {
        self.slots[..self.len]
            .windows(2)
            .all(|pair| !self.order.precedes(&pair[1], &pair[0]))
    }
}
