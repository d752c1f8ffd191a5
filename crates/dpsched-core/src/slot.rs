//! Id allocator with LIFO reuse
//!
//! Hands out dense `u32` ids below a fixed capacity. Recently released
//! ids are reused first, which keeps thread masks and event slots
//! compact and cache-warm. Allocation never touches the heap after
//! construction.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::spinlock::SpinLock;

/// Fixed-capacity id allocator
pub struct IdAllocator {
    /// LIFO stack of released ids
    free_stack: SpinLock<Vec<u32>>,

    /// Next never-used id
    next_fresh: AtomicU32,

    /// Capacity
    max_ids: u32,

    /// Per-id allocation flag, catches double release
    in_use: Box<[AtomicBool]>,

    allocated_count: AtomicU32,
}

impl IdAllocator {
    pub fn new(max_ids: usize) -> Self {
        Self {
            // Pre-allocate so release never reallocates
            free_stack: SpinLock::new(Vec::with_capacity(max_ids)),
            next_fresh: AtomicU32::new(0),
            max_ids: max_ids as u32,
            in_use: (0..max_ids).map(|_| AtomicBool::new(false)).collect(),
            allocated_count: AtomicU32::new(0),
        }
    }

    /// Allocate an id, `None` when exhausted
    pub fn allocate(&self) -> Option<u32> {
        let recycled = self.free_stack.lock().pop();
        let id = match recycled {
            Some(id) => id,
            None => loop {
                let current = self.next_fresh.load(Ordering::Acquire);
                if current >= self.max_ids {
                    return None;
                }
                if self
                    .next_fresh
                    .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break current;
                }
            },
        };
        self.in_use[id as usize].store(true, Ordering::Release);
        self.allocated_count.fetch_add(1, Ordering::Relaxed);
        Some(id)
    }

    /// Return an id. Returns false for out-of-range or not-allocated ids.
    pub fn release(&self, id: u32) -> bool {
        if id >= self.max_ids {
            return false;
        }
        if !self.in_use[id as usize].swap(false, Ordering::AcqRel) {
            return false;
        }
        self.free_stack.lock().push(id);
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Check if an id is currently allocated
    #[inline]
    pub fn is_allocated(&self, id: u32) -> bool {
        id < self.max_ids && self.in_use[id as usize].load(Ordering::Acquire)
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.max_ids
    }
}
