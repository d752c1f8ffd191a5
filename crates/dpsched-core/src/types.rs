//! Queue state, queue type, sync discipline and priority types

use core::fmt;

use crate::constants::NUM_PRIOS;
use crate::handle::GroupId;

/// Status of a queue table slot
///
/// Transitions are made only while holding the queue's own lock.
/// The numeric order matters: anything below `Ready` cannot be
/// enqueued to or dequeued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QueueStatus {
    /// Slot unused
    Free = 0,

    /// Destroy requested while a schedule command still referenced the
    /// queue; the scheduler frees it when it next sees the command
    Destroyed = 1,

    /// Plain (non-scheduled) queue in use
    Ready = 2,

    /// Schedulable queue, idle: no command in any dispatch tier
    NotScheduled = 3,

    /// Schedulable queue whose command is in a tier or held by a worker
    Scheduled = 4,
}

impl QueueStatus {
    /// Queue accepts enqueue and dequeue
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(
            self,
            QueueStatus::Ready | QueueStatus::NotScheduled | QueueStatus::Scheduled
        )
    }
}

impl From<QueueStatus> for u8 {
    fn from(s: QueueStatus) -> u8 {
        s as u8
    }
}

/// Kind of queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueType {
    /// FIFO polled directly with dequeue
    #[default]
    Plain,
    /// Drained by the scheduler
    Sched,
    /// Input queue of a packet-input device; may carry a classifier
    PktIn,
    /// Output queue of a packet-output device
    PktOut,
}

impl QueueType {
    /// Queues of this type get a schedule command at create time
    #[inline]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, QueueType::Sched | QueueType::PktIn)
    }
}

/// Concurrency discipline of a schedulable queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Any number of workers drain concurrently, no ordering
    #[default]
    Parallel,
    /// At most one worker holds the queue at a time
    Atomic,
    /// Concurrent draining, strictly increasing order numbers on dequeue
    Ordered,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Parallel => write!(f, "PARALLEL"),
            SyncMode::Atomic => write!(f, "ATOMIC"),
            SyncMode::Ordered => write!(f, "ORDERED"),
        }
    }
}

/// Scheduling priority
///
/// Level 0 is the highest. The scheduler scans tiers from `HIGHEST`
/// down to `LOWEST` on every pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Number of priority levels
    pub const COUNT: usize = NUM_PRIOS;

    pub const HIGHEST: Priority = Priority(0);
    pub const LOWEST: Priority = Priority((NUM_PRIOS - 1) as u8);
    pub const DEFAULT: Priority = Priority((NUM_PRIOS / 2) as u8);

    /// Get priority from a level, `None` if out of range
    #[inline]
    pub const fn new(level: u8) -> Option<Priority> {
        if (level as usize) < NUM_PRIOS {
            Some(Priority(level))
        } else {
            None
        }
    }

    /// Get priority as tier index (0 = highest)
    #[inline]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }

    /// Iterator over all priorities (highest to lowest)
    pub fn iter() -> impl Iterator<Item = Priority> {
        (0..NUM_PRIOS as u8).map(Priority)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PRIO{}", self.0)
    }
}

/// Role a thread declares when attaching to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadType {
    Worker,
    Control,
}

/// Scheduling parameters of a schedulable queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedParam {
    pub prio: Priority,
    pub sync: SyncMode,
    pub group: GroupId,
    /// Ordering-lock slots, meaningful for `SyncMode::Ordered` only
    pub lock_count: u32,
}

impl Default for SchedParam {
    fn default() -> Self {
        Self {
            prio: Priority::DEFAULT,
            sync: SyncMode::Parallel,
            group: GroupId::ALL,
            lock_count: 0,
        }
    }
}

/// Queue creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueParam {
    pub queue_type: QueueType,
    pub sched: SchedParam,
}

impl QueueParam {
    /// Plain FIFO queue
    pub fn plain() -> Self {
        Self::default()
    }

    /// Schedulable queue at the given priority and sync discipline
    pub fn sched(prio: Priority, sync: SyncMode) -> Self {
        Self {
            queue_type: QueueType::Sched,
            sched: SchedParam {
                prio,
                sync,
                ..SchedParam::default()
            },
        }
    }

    /// Packet-input queue
    pub fn pktin(prio: Priority, sync: SyncMode) -> Self {
        Self {
            queue_type: QueueType::PktIn,
            ..Self::sched(prio, sync)
        }
    }

    /// Packet-output queue
    pub fn pktout() -> Self {
        Self {
            queue_type: QueueType::PktOut,
            ..Self::default()
        }
    }

    pub fn group(mut self, group: GroupId) -> Self {
        self.sched.group = group;
        self
    }

    pub fn lock_count(mut self, n: u32) -> Self {
        self.sched.lock_count = n;
        self
    }
}
