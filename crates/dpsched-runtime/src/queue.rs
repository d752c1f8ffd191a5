//! Queue Manager
//!
//! A fixed table of queues. Each entry owns a ticket lock guarding its
//! event FIFO and status, so contention on one queue never touches any
//! other.
//!
//! # Status machine
//!
//! ```text
//!            create (plain/pktout)          create (sched/pktin)
//!   FREE ─────────────────────► READY   FREE ───────────────► NOTSCHED
//!                                                 enqueue into empty │ ▲ drained empty
//!                                                                    ▼ │ by scheduler
//!                                                                  SCHED
//!   destroy: READY/NOTSCHED ──► FREE
//!            SCHED ──► DESTROYED ──(scheduler finalizes)──► FREE
//! ```
//!
//! A schedulable queue owns one schedule command from create until it
//! returns to FREE. The command is in a dispatch tier (or held by a
//! worker) exactly while the queue is SCHED or DESTROYED.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dpsched_core::constants::{CACHE_LINE_SIZE, MAX_ORDERED_LOCKS, MAX_SCHED_GROUPS, NUM_PRIOS};
use dpsched_core::spinlock::relax;
use dpsched_core::{
    dps_debug, dps_error, dps_warn, truncate_name, CmdId, Event, GroupId, Priority, QueueHandle,
    QueueParam, QueueStatus, QueueType, SchedError, SchedResult, SyncMode, TicketLock,
};

use crate::dispatch::{Dispatch, SchedCmd};
use crate::pktio::Classifier;

/// Opaque per-queue user context
pub type QueueContext = Arc<dyn Any + Send + Sync>;

/// Order metadata handed out with events dequeued from an ordered queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStamp {
    /// Order number of the first event in the batch
    pub order: u64,
    /// Ticket per ordering-lock slot, valid below `lock_count`
    pub tickets: [u64; MAX_ORDERED_LOCKS],
    pub lock_count: u32,
}

/// Result of a dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeqBatch {
    pub count: usize,
    /// Present for non-empty batches from ordered queues
    pub order: Option<OrderStamp>,
}

/// Snapshot of a live queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub param: QueueParam,
    pub status: QueueStatus,
}

/// Static limits of this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub max_queues: usize,
    pub max_ordered_locks: usize,
    pub max_sched_groups: usize,
    pub sched_prios: usize,
}

/// Failed single-event enqueue; the event is handed back
pub struct EnqueueError {
    pub error: SchedError,
    pub event: Event,
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("error", &self.error)
            .field("event", &self.event)
            .finish()
    }
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enqueue of {:?} failed: {}", self.event, self.error)
    }
}

impl std::error::Error for EnqueueError {}

struct QueueInner {
    status: QueueStatus,
    name: String,
    param: QueueParam,
    events: VecDeque<Event>,
    /// Schedule command, INVALID for non-schedulable queues
    cmd: CmdId,
    /// Next order number (ordered queues)
    order_in: u64,
    /// Tickets issued per ordering-lock slot
    tickets_issued: [u64; MAX_ORDERED_LOCKS],
    classifier: Option<Arc<dyn Classifier>>,
    context: Option<QueueContext>,
}

impl QueueInner {
    fn empty() -> Self {
        Self {
            status: QueueStatus::Free,
            name: String::new(),
            param: QueueParam::default(),
            events: VecDeque::new(),
            cmd: CmdId::INVALID,
            order_in: 0,
            tickets_issued: [0; MAX_ORDERED_LOCKS],
            classifier: None,
            context: None,
        }
    }

    #[inline]
    fn is_ordered(&self) -> bool {
        self.param.queue_type.is_schedulable() && self.param.sched.sync == SyncMode::Ordered
    }

    fn check_live(&self) -> SchedResult<()> {
        match self.status {
            QueueStatus::Free => Err(SchedError::QueueFree),
            QueueStatus::Destroyed => Err(SchedError::QueueDestroyed),
            _ => Ok(()),
        }
    }
}

#[cfg_attr(any(target_arch = "aarch64", target_arch = "powerpc64"), repr(C, align(128)))]
#[cfg_attr(not(any(target_arch = "aarch64", target_arch = "powerpc64")), repr(C, align(64)))]
struct QueueEntry {
    inner: TicketLock<QueueInner>,
    /// Copy of the status for lock-free skips during lookup and create
    status_hint: AtomicU8,
    /// Tickets consumed per ordering-lock slot
    tickets_consumed: [AtomicU64; MAX_ORDERED_LOCKS],
    /// Scheduler-held ordered contexts not yet released
    ordered_held: AtomicU32,
    /// Events deferred by ordered contexts and bound for this queue
    deferred_in: AtomicU64,
}

const _: () = assert!(std::mem::align_of::<QueueEntry>() == CACHE_LINE_SIZE);

impl QueueEntry {
    fn new() -> Self {
        Self {
            inner: TicketLock::new(QueueInner::empty()),
            status_hint: AtomicU8::new(QueueStatus::Free as u8),
            tickets_consumed: [const { AtomicU64::new(0) }; MAX_ORDERED_LOCKS],
            ordered_held: AtomicU32::new(0),
            deferred_in: AtomicU64::new(0),
        }
    }

    #[inline]
    fn set_status(&self, inner: &mut QueueInner, status: QueueStatus) {
        inner.status = status;
        self.status_hint.store(status as u8, Ordering::Release);
    }

    #[inline]
    fn hint_live(&self) -> bool {
        let s = self.status_hint.load(Ordering::Acquire);
        s != QueueStatus::Free as u8 && s != QueueStatus::Destroyed as u8
    }
}

/// Fixed-capacity queue table
pub struct QueueTable {
    entries: Box<[QueueEntry]>,
}

impl QueueTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| QueueEntry::new()).collect(),
        }
    }

    #[inline]
    fn entry(&self, q: QueueHandle) -> SchedResult<&QueueEntry> {
        self.entries.get(q.index()).ok_or(SchedError::InvalidHandle)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn capability(&self) -> Capability {
        Capability {
            max_queues: self.entries.len(),
            max_ordered_locks: MAX_ORDERED_LOCKS,
            max_sched_groups: MAX_SCHED_GROUPS,
            sched_prios: NUM_PRIOS,
        }
    }

    /// Create a queue in the first free slot.
    ///
    /// Schedulable queues get their schedule command here, so a full
    /// command pool fails the create and leaves the slot free.
    pub(crate) fn create(
        &self,
        name: &str,
        param: QueueParam,
        dispatch: &Dispatch,
    ) -> SchedResult<QueueHandle> {
        let schedulable = param.queue_type.is_schedulable();
        let mut param = param;
        if schedulable && param.sched.sync == SyncMode::Ordered {
            if param.sched.lock_count as usize > MAX_ORDERED_LOCKS {
                return Err(SchedError::TooManyOrderedLocks {
                    requested: param.sched.lock_count,
                    max: MAX_ORDERED_LOCKS as u32,
                });
            }
        } else {
            param.sched.lock_count = 0;
        }

        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.status_hint.load(Ordering::Acquire) != QueueStatus::Free as u8 {
                continue;
            }
            let mut inner = entry.inner.lock();
            if inner.status != QueueStatus::Free {
                continue;
            }
            let handle = QueueHandle::new(idx as u32);

            let (cmd, status) = if schedulable {
                let cmd = dispatch.register(SchedCmd::Dequeue {
                    queue: handle,
                    prio: param.sched.prio,
                    sync: param.sched.sync,
                    group: param.sched.group,
                })?;
                (cmd, QueueStatus::NotScheduled)
            } else {
                (CmdId::INVALID, QueueStatus::Ready)
            };

            inner.name = truncate_name(name);
            inner.param = param;
            inner.events.clear();
            inner.cmd = cmd;
            inner.order_in = 0;
            inner.tickets_issued = [0; MAX_ORDERED_LOCKS];
            inner.classifier = None;
            inner.context = None;
            for consumed in &entry.tickets_consumed {
                consumed.store(0, Ordering::Release);
            }
            entry.ordered_held.store(0, Ordering::Release);
            entry.set_status(&mut inner, status);

            dps_debug!(
                "queue {} created as {} ({:?}, {})",
                inner.name,
                handle,
                param.queue_type,
                param.sched.sync
            );
            return Ok(handle);
        }
        Err(SchedError::NoFreeQueue)
    }

    /// Destroy a queue.
    ///
    /// Rejected while events remain, while ordered contexts hold deferred
    /// enqueues bound for it, or while an ordered context taken from this
    /// queue is still held. A queue whose command is in flight
    /// is only marked DESTROYED; the scheduler frees it when it next pops
    /// that command.
    pub(crate) fn destroy(&self, q: QueueHandle, dispatch: &Dispatch) -> SchedResult<()> {
        let entry = self.entry(q)?;
        let mut inner = entry.inner.lock();
        match inner.status {
            QueueStatus::Free => {
                dps_error!("queue {} already free", q);
                return Err(SchedError::QueueFree);
            }
            QueueStatus::Destroyed => {
                dps_error!("queue {} already destroyed", q);
                return Err(SchedError::QueueDestroyed);
            }
            _ => {}
        }
        if !inner.events.is_empty() {
            dps_error!("queue {} not empty", inner.name);
            return Err(SchedError::QueueNotEmpty);
        }
        let deferred = entry.deferred_in.load(Ordering::Acquire);
        if deferred > 0 {
            dps_warn!("queue {} has {} deferred events inbound", inner.name, deferred);
            return Err(SchedError::ReorderPending);
        }
        if inner.is_ordered() && entry.ordered_held.load(Ordering::Acquire) > 0 {
            dps_warn!("queue {} has ordered contexts outstanding", inner.name);
            return Err(SchedError::ReorderPending);
        }

        match inner.status {
            QueueStatus::Ready => Self::free_locked(entry, &mut inner, dispatch),
            QueueStatus::NotScheduled => Self::free_locked(entry, &mut inner, dispatch),
            QueueStatus::Scheduled => {
                entry.set_status(&mut inner, QueueStatus::Destroyed);
                dps_debug!("queue {} destroy deferred to scheduler", inner.name);
            }
            status => panic!("queue {} in unexpected status {:?}", q, status),
        }
        Ok(())
    }

    /// Complete a deferred destroy. Returns true if the queue was freed.
    pub(crate) fn finalize_destroy(&self, q: QueueHandle, dispatch: &Dispatch) -> bool {
        let Ok(entry) = self.entry(q) else {
            return false;
        };
        let mut inner = entry.inner.lock();
        if inner.status != QueueStatus::Destroyed {
            return false;
        }
        Self::free_locked(entry, &mut inner, dispatch);
        true
    }

    fn free_locked(entry: &QueueEntry, inner: &mut QueueInner, dispatch: &Dispatch) {
        if inner.cmd.is_valid() {
            dispatch.unregister(inner.cmd);
            inner.cmd = CmdId::INVALID;
        }
        dps_debug!("queue {} freed", inner.name);
        inner.name.clear();
        inner.classifier = None;
        inner.context = None;
        entry.set_status(inner, QueueStatus::Free);
    }

    /// Append all of `events` to `q`, draining the vector on success.
    ///
    /// On a packet-input queue with a classifier, each event goes to the
    /// queue the classifier picks; events it does not match, or whose
    /// class queue rejects them, stay on `q`.
    pub(crate) fn enqueue_multi(
        &self,
        q: QueueHandle,
        events: &mut Vec<Event>,
        dispatch: &Dispatch,
    ) -> SchedResult<usize> {
        let entry = self.entry(q)?;
        let classifier = {
            let inner = entry.inner.lock();
            inner.check_live()?;
            inner.classifier.clone()
        };
        let Some(classifier) = classifier else {
            return self.append(entry, events, dispatch);
        };

        let total = events.len();
        let mut stay = Vec::with_capacity(total);
        let mut one = Vec::with_capacity(1);
        for ev in events.drain(..) {
            match classifier.classify(&ev) {
                Some(target) if target != q => {
                    one.push(ev);
                    let routed = self
                        .entry(target)
                        .and_then(|t| self.append(t, &mut one, dispatch));
                    if let Err(e) = routed {
                        dps_warn!("class queue {} rejected event: {}", target, e);
                        stay.append(&mut one);
                    }
                }
                _ => stay.push(ev),
            }
        }
        if let Err(e) = self.append(entry, &mut stay, dispatch) {
            // Input queue went away mid-classification
            events.append(&mut stay);
            return Err(e);
        }
        Ok(total)
    }

    fn append(
        &self,
        entry: &QueueEntry,
        events: &mut Vec<Event>,
        dispatch: &Dispatch,
    ) -> SchedResult<usize> {
        let count = events.len();
        let rearm = {
            let mut inner = entry.inner.lock();
            inner.check_live()?;
            if count == 0 {
                return Ok(0);
            }
            inner.events.extend(events.drain(..));
            if inner.status == QueueStatus::NotScheduled {
                entry.set_status(&mut inner, QueueStatus::Scheduled);
                Some((inner.param.sched.prio, inner.cmd))
            } else {
                None
            }
        };
        if let Some((prio, cmd)) = rearm {
            dispatch.push(prio, cmd);
        }
        Ok(count)
    }

    /// Put events taken from `q` back at its head, ahead of anything
    /// enqueued since, keeping their relative order. Drains `events` on
    /// success.
    pub(crate) fn requeue_head(
        &self,
        q: QueueHandle,
        events: &mut Vec<Event>,
        dispatch: &Dispatch,
    ) -> SchedResult<usize> {
        let entry = self.entry(q)?;
        let count = events.len();
        let rearm = {
            let mut inner = entry.inner.lock();
            inner.check_live()?;
            if count == 0 {
                return Ok(0);
            }
            for ev in events.drain(..).rev() {
                inner.events.push_front(ev);
            }
            if inner.status == QueueStatus::NotScheduled {
                entry.set_status(&mut inner, QueueStatus::Scheduled);
                Some((inner.param.sched.prio, inner.cmd))
            } else {
                None
            }
        };
        if let Some((prio, cmd)) = rearm {
            dispatch.push(prio, cmd);
        }
        Ok(count)
    }

    /// Remove up to `max` events from the head of `q` into `out`.
    ///
    /// `QueueDestroyed` is the signal for the scheduler to finalize.
    /// An empty queue is `count == 0`, not an error; only the scheduler
    /// path moves an empty SCHED queue back to NOTSCHED, since only it
    /// holds the command.
    pub(crate) fn dequeue_multi(
        &self,
        q: QueueHandle,
        out: &mut Vec<Event>,
        max: usize,
        scheduler: bool,
    ) -> SchedResult<DeqBatch> {
        let entry = self.entry(q)?;
        let mut inner = entry.inner.lock();
        inner.check_live()?;

        let ordered = inner.is_ordered();
        let lock_count = inner.param.sched.lock_count;
        if ordered && lock_count > 0 && !scheduler {
            return Err(SchedError::InvalidOperation);
        }

        if inner.events.is_empty() {
            if scheduler && inner.status == QueueStatus::Scheduled {
                entry.set_status(&mut inner, QueueStatus::NotScheduled);
            }
            return Ok(DeqBatch::default());
        }

        let count = max.min(inner.events.len());
        out.extend(inner.events.drain(..count));

        let order = if ordered {
            let stamp = OrderStamp {
                order: inner.order_in,
                tickets: inner.tickets_issued,
                lock_count,
            };
            inner.order_in += count as u64;
            for issued in inner.tickets_issued.iter_mut().take(lock_count as usize) {
                *issued += count as u64;
            }
            if scheduler {
                entry.ordered_held.fetch_add(1, Ordering::AcqRel);
            }
            Some(stamp)
        } else {
            None
        };

        Ok(DeqBatch { count, order })
    }

    /// Scheduler-side emptiness probe used at shutdown.
    /// An empty SCHED queue moves to NOTSCHED as if drained.
    pub(crate) fn probe_empty(&self, q: QueueHandle) -> SchedResult<bool> {
        let entry = self.entry(q)?;
        let mut inner = entry.inner.lock();
        inner.check_live()?;
        if !inner.events.is_empty() {
            return Ok(false);
        }
        if inner.status == QueueStatus::Scheduled {
            entry.set_status(&mut inner, QueueStatus::NotScheduled);
        }
        Ok(true)
    }

    /// Block until slot `slot` of `q` reaches `ticket`
    pub(crate) fn wait_ticket(&self, q: QueueHandle, slot: usize, ticket: u64) {
        let Ok(entry) = self.entry(q) else {
            return;
        };
        while entry.tickets_consumed[slot].load(Ordering::Acquire) != ticket {
            relax();
        }
    }

    /// Hand slot `slot` of `q` to the holder of `ticket + 1`
    pub(crate) fn consume_ticket(&self, q: QueueHandle, slot: usize, ticket: u64) {
        if let Ok(entry) = self.entry(q) {
            entry.tickets_consumed[slot].store(ticket + 1, Ordering::Release);
        }
    }

    /// Announce `count` events that an ordered context will enqueue to
    /// `q` on release. Fails if `q` is not live; once this succeeds `q`
    /// cannot be destroyed until the matching `settle_deferred`.
    pub(crate) fn reserve_deferred(&self, q: QueueHandle, count: usize) -> SchedResult<()> {
        let entry = self.entry(q)?;
        entry.deferred_in.fetch_add(count as u64, Ordering::AcqRel);
        let live = entry.inner.lock().check_live();
        if live.is_err() {
            entry.deferred_in.fetch_sub(count as u64, Ordering::AcqRel);
        }
        live
    }

    pub(crate) fn settle_deferred(&self, q: QueueHandle, count: usize) {
        if let Ok(entry) = self.entry(q) {
            entry.deferred_in.fetch_sub(count as u64, Ordering::AcqRel);
        }
    }

    pub(crate) fn release_ordered_held(&self, q: QueueHandle) {
        if let Ok(entry) = self.entry(q) {
            entry.ordered_held.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// First live queue with this (truncated) name
    pub fn lookup(&self, name: &str) -> Option<QueueHandle> {
        let name = truncate_name(name);
        self.entries.iter().enumerate().find_map(|(idx, entry)| {
            if !entry.hint_live() {
                return None;
            }
            let inner = entry.inner.lock();
            (inner.status.is_live() && inner.name == name).then(|| QueueHandle::new(idx as u32))
        })
    }

    pub fn context_set(&self, q: QueueHandle, context: Option<QueueContext>) -> SchedResult<()> {
        let mut inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        inner.context = context;
        Ok(())
    }

    pub fn context(&self, q: QueueHandle) -> SchedResult<Option<QueueContext>> {
        let inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        Ok(inner.context.clone())
    }

    /// Attach or clear the classifier of a packet-input queue
    pub fn set_classifier(
        &self,
        q: QueueHandle,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> SchedResult<()> {
        let mut inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        if inner.param.queue_type != QueueType::PktIn {
            return Err(SchedError::InvalidOperation);
        }
        inner.classifier = classifier;
        Ok(())
    }

    pub fn info(&self, q: QueueHandle) -> SchedResult<QueueInfo> {
        let inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        Ok(QueueInfo {
            name: inner.name.clone(),
            param: inner.param,
            status: inner.status,
        })
    }

    /// Current status of any slot, FREE included
    pub fn status(&self, q: QueueHandle) -> SchedResult<QueueStatus> {
        Ok(self.entry(q)?.inner.lock().status)
    }

    fn param(&self, q: QueueHandle) -> SchedResult<QueueParam> {
        let inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        Ok(inner.param)
    }

    pub fn queue_type(&self, q: QueueHandle) -> SchedResult<QueueType> {
        Ok(self.param(q)?.queue_type)
    }

    pub fn sched_sync(&self, q: QueueHandle) -> SchedResult<SyncMode> {
        Ok(self.param(q)?.sched.sync)
    }

    pub fn sched_prio(&self, q: QueueHandle) -> SchedResult<Priority> {
        Ok(self.param(q)?.sched.prio)
    }

    pub fn sched_group(&self, q: QueueHandle) -> SchedResult<GroupId> {
        Ok(self.param(q)?.sched.group)
    }

    /// Ordering-lock slots, `None` for queues that are not ordered
    pub fn lock_count(&self, q: QueueHandle) -> SchedResult<Option<u32>> {
        let inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        Ok(inner.is_ordered().then_some(inner.param.sched.lock_count))
    }

    /// Events currently queued
    pub fn len(&self, q: QueueHandle) -> SchedResult<usize> {
        let inner = self.entry(q)?.inner.lock();
        inner.check_live()?;
        Ok(inner.events.len())
    }

    /// Log every queue still allocated. Returns how many there are.
    pub fn term(&self) -> usize {
        let mut leftover = 0;
        for (idx, entry) in self.entries.iter().enumerate() {
            let inner = entry.inner.lock();
            if inner.status != QueueStatus::Free {
                dps_warn!(
                    "queue {} ({}) not destroyed, status {:?}",
                    inner.name,
                    QueueHandle::new(idx as u32),
                    inner.status
                );
                leftover += 1;
            }
        }
        leftover
    }
}
