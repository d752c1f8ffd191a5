//! Schedule commands and per-priority dispatch tiers
//!
//! Every schedulable queue and every started packet-input device owns
//! exactly one schedule command for its whole lifetime. A command sits in
//! the tier of its priority while its source may have work, and is held
//! by at most one worker at a time: popped, acted upon, then pushed back
//! or dropped.
//!
//! Commands are fixed slots in a `CommandPool`; their ids are recycled
//! through a lock-free free list. Tiers are bounded FIFOs of command ids
//! under a spinlock, each with a count of commands registered at that
//! priority so an empty priority is skipped without taking its lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_queue::ArrayQueue;

use dpsched_core::constants::CACHE_LINE_SIZE;

use dpsched_core::{
    dps_error, CmdId, GroupId, PktioHandle, Priority, QueueHandle, SchedError, SchedResult,
    SpinLock, SyncMode,
};

/// What a worker does when it pops a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedCmd {
    /// Drain events from a schedulable queue
    Dequeue {
        queue: QueueHandle,
        prio: Priority,
        sync: SyncMode,
        group: GroupId,
    },
    /// Poll a packet-input device into its input queue
    PollPktin {
        pktio: PktioHandle,
        prio: Priority,
        group: GroupId,
    },
}

impl SchedCmd {
    #[inline]
    pub(crate) fn prio(&self) -> Priority {
        match self {
            SchedCmd::Dequeue { prio, .. } | SchedCmd::PollPktin { prio, .. } => *prio,
        }
    }

    #[inline]
    pub(crate) fn group(&self) -> GroupId {
        match self {
            SchedCmd::Dequeue { group, .. } | SchedCmd::PollPktin { group, .. } => *group,
        }
    }
}

/// Fixed pool of command slots
pub(crate) struct CommandPool {
    slots: Box<[SpinLock<Option<SchedCmd>>]>,
    free: ArrayQueue<u32>,
}

impl CommandPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity.max(1));
        for id in 0..capacity as u32 {
            let _ = free.push(id);
        }
        Self {
            slots: (0..capacity).map(|_| SpinLock::new(None)).collect(),
            free,
        }
    }

    pub(crate) fn alloc(&self, cmd: SchedCmd) -> SchedResult<CmdId> {
        let id = self.free.pop().ok_or(SchedError::NoFreeCommand)?;
        *self.slots[id as usize].lock() = Some(cmd);
        Ok(CmdId::new(id))
    }

    #[inline]
    pub(crate) fn get(&self, id: CmdId) -> Option<SchedCmd> {
        *self.slots.get(id.index())?.lock()
    }

    /// Free a slot, returning the command it held
    pub(crate) fn release(&self, id: CmdId) -> Option<SchedCmd> {
        let cmd = self.slots.get(id.index())?.lock().take()?;
        // Cannot overflow: each id is pushed at most once per take
        let _ = self.free.push(id.as_u32());
        Some(cmd)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Allocated commands matching `pred`
    pub(crate) fn count_where(&self, pred: impl Fn(&SchedCmd) -> bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().as_ref().map_or(false, &pred))
            .count()
    }
}

#[cfg_attr(any(target_arch = "aarch64", target_arch = "powerpc64"), repr(C, align(128)))]
#[cfg_attr(not(any(target_arch = "aarch64", target_arch = "powerpc64")), repr(C, align(64)))]
struct Tier {
    ready: SpinLock<VecDeque<CmdId>>,
    /// Commands registered at this priority, queued or held
    registered: AtomicU32,
}

const _: () = assert!(std::mem::align_of::<Tier>() == CACHE_LINE_SIZE);

/// Command pool plus one FIFO tier per priority
pub(crate) struct Dispatch {
    pool: CommandPool,
    tiers: Box<[Tier]>,
    tier_capacity: usize,
}

impl Dispatch {
    pub(crate) fn new(num_cmd: usize) -> Self {
        Self {
            pool: CommandPool::new(num_cmd),
            tiers: (0..Priority::COUNT)
                .map(|_| Tier {
                    ready: SpinLock::new(VecDeque::with_capacity(num_cmd)),
                    registered: AtomicU32::new(0),
                })
                .collect(),
            tier_capacity: num_cmd,
        }
    }

    /// Allocate a command and count it against its priority.
    /// The command is not queued; the caller decides when to push it.
    pub(crate) fn register(&self, cmd: SchedCmd) -> SchedResult<CmdId> {
        let id = self.pool.alloc(cmd)?;
        self.tiers[cmd.prio().as_index()]
            .registered
            .fetch_add(1, Ordering::AcqRel);
        Ok(id)
    }

    /// Free a command that is not queued in any tier
    pub(crate) fn unregister(&self, id: CmdId) {
        if let Some(cmd) = self.pool.release(id) {
            self.tiers[cmd.prio().as_index()]
                .registered
                .fetch_sub(1, Ordering::AcqRel);
        }
    }

    #[inline]
    pub(crate) fn command(&self, id: CmdId) -> Option<SchedCmd> {
        self.pool.get(id)
    }

    /// Queue a command at the tail of its tier.
    ///
    /// Tiers are sized for every command at once, so a full tier means a
    /// command was queued twice. That breaks the one-holder rule and
    /// cannot be recovered from.
    pub(crate) fn push(&self, prio: Priority, id: CmdId) {
        let mut ready = self.tiers[prio.as_index()].ready.lock();
        if ready.len() >= self.tier_capacity {
            drop(ready);
            dps_error!("dispatch tier {} overflow re-arming {}", prio, id);
            panic!("dispatch tier {} overflow", prio);
        }
        ready.push_back(id);
    }

    #[inline]
    pub(crate) fn pop(&self, prio: Priority) -> Option<CmdId> {
        self.tiers[prio.as_index()].ready.lock().pop_front()
    }

    /// Commands registered at `prio`, queued or currently held
    #[inline]
    pub(crate) fn registered(&self, prio: Priority) -> u32 {
        self.tiers[prio.as_index()].registered.load(Ordering::Acquire)
    }

    /// Commands currently waiting in the tier of `prio`
    pub(crate) fn queued(&self, prio: Priority) -> usize {
        self.tiers[prio.as_index()].ready.lock().len()
    }

    /// Take every queued command out of one tier
    pub(crate) fn drain(&self, prio: Priority) -> Vec<CmdId> {
        self.tiers[prio.as_index()].ready.lock().drain(..).collect()
    }

    pub(crate) fn commands_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Live commands, queued or held, that schedule on behalf of `group`
    pub(crate) fn bound_to(&self, group: GroupId) -> usize {
        self.pool.count_where(|cmd| cmd.group() == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dequeue_cmd(q: u32, prio: Priority) -> SchedCmd {
        SchedCmd::Dequeue {
            queue: QueueHandle::new(q),
            prio,
            sync: SyncMode::Parallel,
            group: GroupId::ALL,
        }
    }

    #[test]
    fn test_pool_exhaustion_and_reuse() {
        let pool = CommandPool::new(2);
        let a = pool.alloc(dequeue_cmd(0, Priority::HIGHEST)).unwrap();
        let _b = pool.alloc(dequeue_cmd(1, Priority::HIGHEST)).unwrap();
        assert_eq!(
            pool.alloc(dequeue_cmd(2, Priority::HIGHEST)),
            Err(SchedError::NoFreeCommand)
        );
        assert_eq!(pool.in_use(), 2);

        assert!(pool.release(a).is_some());
        assert!(pool.release(a).is_none());
        assert!(pool.alloc(dequeue_cmd(2, Priority::HIGHEST)).is_ok());
    }

    #[test]
    fn test_tier_fifo() {
        let d = Dispatch::new(8);
        let prio = Priority::new(3).unwrap();
        let a = d.register(dequeue_cmd(0, prio)).unwrap();
        let b = d.register(dequeue_cmd(1, prio)).unwrap();
        assert_eq!(d.registered(prio), 2);
        assert_eq!(d.queued(prio), 0);

        d.push(prio, a);
        d.push(prio, b);
        assert_eq!(d.pop(prio), Some(a));
        assert_eq!(d.pop(prio), Some(b));
        assert_eq!(d.pop(prio), None);
        assert_eq!(d.pop(Priority::HIGHEST), None);
    }

    #[test]
    fn test_unregister_counts() {
        let d = Dispatch::new(4);
        let id = d.register(dequeue_cmd(0, Priority::LOWEST)).unwrap();
        assert_eq!(d.registered(Priority::LOWEST), 1);
        assert_eq!(d.command(id).map(|c| c.prio()), Some(Priority::LOWEST));

        d.unregister(id);
        assert_eq!(d.registered(Priority::LOWEST), 0);
        assert_eq!(d.command(id), None);
        assert_eq!(d.commands_in_use(), 0);

        // Second unregister is a no-op
        d.unregister(id);
        assert_eq!(d.registered(Priority::LOWEST), 0);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_double_push_overflows() {
        let d = Dispatch::new(1);
        let id = d.register(dequeue_cmd(0, Priority::DEFAULT)).unwrap();
        d.push(Priority::DEFAULT, id);
        d.push(Priority::DEFAULT, id);
    }

    #[test]
    fn test_drain() {
        let d = Dispatch::new(4);
        let p = Priority::DEFAULT;
        let ids: Vec<_> = (0..3).map(|q| d.register(dequeue_cmd(q, p)).unwrap()).collect();
        for &id in &ids {
            d.push(p, id);
        }
        assert_eq!(d.drain(p), ids);
        assert_eq!(d.queued(p), 0);
    }

    #[test]
    fn test_bound_to_group() {
        let d = Dispatch::new(4);
        let g = GroupId::new(5);
        let a = d
            .register(SchedCmd::Dequeue {
                queue: QueueHandle::new(0),
                prio: Priority::DEFAULT,
                sync: SyncMode::Atomic,
                group: g,
            })
            .unwrap();
        let b = d
            .register(SchedCmd::PollPktin {
                pktio: PktioHandle::new(0),
                prio: Priority::HIGHEST,
                group: g,
            })
            .unwrap();
        d.register(dequeue_cmd(1, Priority::DEFAULT)).unwrap();

        assert_eq!(d.bound_to(g), 2);
        assert_eq!(d.bound_to(GroupId::ALL), 1);
        d.unregister(a);
        d.unregister(b);
        assert_eq!(d.bound_to(g), 0);
    }
}
