//! Thread masks for scheduling groups
//!
//! A fixed-size bitset over scheduler thread ids, one bit per thread.
//! Masks are plain values: the group registry copies them in and out
//! under its own lock.

use core::fmt;

use crate::constants::MAX_THREADS;
use crate::handle::ThreadId;

/// Number of bits per block
const BITS_PER_BLOCK: usize = 64;

/// Number of blocks covering `MAX_THREADS`
const NUM_BLOCKS: usize = (MAX_THREADS + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK;

/// Set of scheduler threads
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ThreadMask {
    blocks: [u64; NUM_BLOCKS],
}

impl ThreadMask {
    /// Empty mask
    pub const fn zero() -> Self {
        Self { blocks: [0; NUM_BLOCKS] }
    }

    /// Mask with every representable thread set
    pub fn all() -> Self {
        let mut mask = Self::zero();
        for i in 0..MAX_THREADS {
            mask.set_index(i);
        }
        mask
    }

    /// Mask containing a single thread
    pub fn from_thread(id: ThreadId) -> Self {
        let mut mask = Self::zero();
        mask.set(id);
        mask
    }

    #[inline]
    fn set_index(&mut self, idx: usize) {
        self.blocks[idx / BITS_PER_BLOCK] |= 1u64 << (idx % BITS_PER_BLOCK);
    }

    /// Add a thread. Out-of-range ids are ignored.
    #[inline]
    pub fn set(&mut self, id: ThreadId) {
        let idx = id.index();
        if idx < MAX_THREADS {
            self.set_index(idx);
        }
    }

    /// Remove a thread
    #[inline]
    pub fn clear(&mut self, id: ThreadId) {
        let idx = id.index();
        if idx < MAX_THREADS {
            self.blocks[idx / BITS_PER_BLOCK] &= !(1u64 << (idx % BITS_PER_BLOCK));
        }
    }

    /// Check if a thread is a member
    #[inline]
    pub fn is_set(&self, id: ThreadId) -> bool {
        let idx = id.index();
        if idx >= MAX_THREADS {
            return false;
        }
        (self.blocks[idx / BITS_PER_BLOCK] >> (idx % BITS_PER_BLOCK)) & 1 != 0
    }

    /// Set union, in place
    pub fn union_with(&mut self, other: &ThreadMask) {
        for (a, b) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *a |= *b;
        }
    }

    /// Set difference (`self & !other`), in place
    pub fn difference_with(&mut self, other: &ThreadMask) {
        for (a, b) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *a &= !*b;
        }
    }

    /// Set intersection, in place
    pub fn intersect_with(&mut self, other: &ThreadMask) {
        for (a, b) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *a &= *b;
        }
    }

    /// Number of member threads
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == 0)
    }

    /// Lowest member thread
    pub fn first(&self) -> Option<ThreadId> {
        self.iter().next()
    }

    /// Iterate member threads in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.blocks.iter().enumerate().flat_map(|(block_idx, &block)| {
            let mut bits = block;
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(ThreadId::new((block_idx * BITS_PER_BLOCK + bit) as u32))
            })
        })
    }
}

impl FromIterator<ThreadId> for ThreadMask {
    fn from_iter<I: IntoIterator<Item = ThreadId>>(iter: I) -> Self {
        let mut mask = ThreadMask::zero();
        for id in iter {
            mask.set(id);
        }
        mask
    }
}

impl fmt::Debug for ThreadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadMask{{")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", id.as_u32())?;
        }
        write!(f, "}}")
    }
}
