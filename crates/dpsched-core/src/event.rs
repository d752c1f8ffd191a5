//! Events and the event arena
//!
//! An `Event` is an opaque handle to one unit of work (packet, timeout,
//! control buffer). It is deliberately neither `Clone` nor `Copy`: moving
//! it into a queue gives the queue sole ownership, and dequeue moves it
//! back out. An event therefore lives in exactly one place at a time.
//!
//! `EventPool<T>` is a fixed-capacity arena that backs events with a
//! payload. Callers that manage payloads elsewhere can mint events
//! directly with `Event::from_raw`.

use core::fmt;

use crate::error::{SchedError, SchedResult};
use crate::slot::IdAllocator;
use crate::spinlock::SpinLock;

/// Move-only handle to one unit of queued work
#[derive(PartialEq, Eq, Hash)]
pub struct Event(u64);

impl Event {
    /// Wrap a raw handle value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Event(raw)
    }

    /// Raw handle value, without giving up ownership
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Consume the event, returning its raw handle value
    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({:#x})", self.0)
    }
}

/// Fixed-capacity arena of event payloads indexed by event handle
pub struct EventPool<T> {
    slots: Box<[SpinLock<Option<T>>]>,
    ids: IdAllocator,
}

impl<T> EventPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| SpinLock::new(None)).collect(),
            ids: IdAllocator::new(capacity),
        }
    }

    /// Store a payload and return the event that owns it
    pub fn alloc(&self, value: T) -> SchedResult<Event> {
        let id = self.ids.allocate().ok_or(SchedError::NoFreeEvent)?;
        *self.slots[id as usize].lock() = Some(value);
        Ok(Event(id as u64))
    }

    /// Run `f` on the payload of `ev`. `None` if `ev` is not from this pool.
    pub fn with<R>(&self, ev: &Event, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.slots.get(usize::try_from(ev.0).ok()?)?;
        let mut guard = slot.lock();
        guard.as_mut().map(f)
    }

    /// Release the event and hand back its payload
    pub fn free(&self, ev: Event) -> SchedResult<T> {
        let idx = u32::try_from(ev.0).map_err(|_| SchedError::InvalidHandle)?;
        if !self.ids.is_allocated(idx) {
            return Err(SchedError::InvalidHandle);
        }
        let value = self.slots[idx as usize]
            .lock()
            .take()
            .ok_or(SchedError::InvalidHandle)?;
        self.ids.release(idx);
        Ok(value)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.ids.allocated_count() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free() {
        let pool: EventPool<Vec<u8>> = EventPool::new(2);
        let a = pool.alloc(vec![1, 2, 3]).unwrap();
        let b = pool.alloc(vec![4]).unwrap();
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.alloc(vec![]), Err(SchedError::NoFreeEvent));

        assert_eq!(pool.with(&a, |p| p.len()), Some(3));
        pool.with(&b, |p| p.push(5));
        assert_eq!(pool.free(b).unwrap(), vec![4, 5]);
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.free(a).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_pool_foreign_event() {
        let pool: EventPool<u32> = EventPool::new(4);
        assert_eq!(pool.with(&Event::from_raw(100), |v| *v), None);
        assert_eq!(pool.free(Event::from_raw(1)), Err(SchedError::InvalidHandle));
    }

    #[test]
    fn test_event_raw() {
        let ev = Event::from_raw(0x2a);
        assert_eq!(ev.raw(), 42);
        assert_eq!(format!("{:?}", ev), "Event(0x2a)");
        assert_eq!(ev.into_raw(), 42);
    }
}
