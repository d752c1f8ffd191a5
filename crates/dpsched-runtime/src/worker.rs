//! Worker-local scheduling context
//!
//! A `Worker` is what a thread gets when it attaches to a `Scheduler`.
//! It owns everything the pop algorithm keeps between calls: the cached
//! batch, a held ATOMIC command, a held ordered context, the pause flag.
//! Nothing here is shared, so the hot path touches no thread-local
//! storage and no extra locks.
//!
//! # Pop algorithm
//!
//! 1. Serve cached events from the previous pop.
//! 2. Release the held context (re-arm ATOMIC, finish ORDERED).
//! 3. Paused threads stop here.
//! 4. Scan priorities from highest; pop one command per priority.
//! 5. Poll commands: poll the device, then re-arm or retire.
//! 6. Drain commands: skip (re-arm) if not in the queue's group,
//!    otherwise dequeue a batch and apply the sync discipline.
//! 7. Nothing found: the wait policy decides whether to scan again.

use std::collections::VecDeque;

use dpsched_core::constants::QUEUE_MULTI_MAX;
use dpsched_core::spinlock::relax;
use dpsched_core::{
    dps_debug, dps_error, dps_warn, CmdId, Event, Priority, QueueHandle, SchedError, SchedResult,
    SyncMode, ThreadId, ThreadType,
};

use crate::clock::Deadline;
use crate::dispatch::SchedCmd;
use crate::ordered::OrderedContext;
use crate::pktio::PollOutcome;
use crate::queue::EnqueueError;
use crate::scheduler::Scheduler;

/// How long a schedule call keeps scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// One scan
    NoWait,
    /// Scan until work arrives
    Forever,
    /// Scan until work arrives or this many nanoseconds pass
    Ns(u64),
}

impl Wait {
    #[inline]
    pub fn from_ns(ns: u64) -> Self {
        Wait::Ns(ns)
    }
}

/// A thread attached to a scheduler
pub struct Worker<'s> {
    sched: &'s Scheduler,
    thread: ThreadId,
    thread_type: ThreadType,

    /// Events dequeued but not yet handed out
    cache: VecDeque<Event>,
    /// Source of the cached events
    cache_queue: QueueHandle,

    /// ATOMIC command held until release
    atomic: Option<(Priority, CmdId)>,
    ordered: Option<OrderedContext>,
    paused: bool,

    /// Dequeue and receive buffer
    scratch: Vec<Event>,
}

impl<'s> Worker<'s> {
    pub(crate) fn new(sched: &'s Scheduler, thread: ThreadId, thread_type: ThreadType) -> Self {
        let batch = sched.config().max_deq.max(QUEUE_MULTI_MAX);
        Self {
            sched,
            thread,
            thread_type,
            cache: VecDeque::with_capacity(batch),
            cache_queue: QueueHandle::INVALID,
            atomic: None,
            ordered: None,
            paused: false,
            scratch: Vec::with_capacity(batch),
        }
    }

    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    #[inline]
    pub fn thread_type(&self) -> ThreadType {
        self.thread_type
    }

    /// Next event, with the queue it came from
    pub fn schedule(&mut self, wait: Wait) -> Option<(QueueHandle, Event)> {
        if !self.wait_for_work(wait) {
            return None;
        }
        let ev = self.cache.pop_front()?;
        Some((self.cache_queue, ev))
    }

    /// Append up to `max` events from one queue to `out`.
    /// Returns the source queue and how many were appended.
    pub fn schedule_multi(
        &mut self,
        wait: Wait,
        out: &mut Vec<Event>,
        max: usize,
    ) -> Option<(QueueHandle, usize)> {
        if max == 0 || !self.wait_for_work(wait) {
            return None;
        }
        let n = max.min(self.cache.len());
        out.extend(self.cache.drain(..n));
        Some((self.cache_queue, n))
    }

    /// Stop taking new work. Cached events are still served.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Events cached locally and not yet returned
    #[inline]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Hand a held ATOMIC queue back to the scheduler.
    /// No-op while cached events from it remain.
    pub fn release_atomic(&mut self) {
        if !self.cache.is_empty() {
            return;
        }
        if let Some((prio, cmd)) = self.atomic.take() {
            self.sched.dispatch.push(prio, cmd);
        }
    }

    /// End a held ordered context. No-op if none is held.
    pub fn release_ordered(&mut self) {
        if let Some(ctx) = self.ordered.take() {
            ctx.finish(&self.sched.queues, &self.sched.dispatch);
        }
    }

    /// Release whatever context is held
    pub fn release_context(&mut self) {
        self.release_ordered();
        self.release_atomic();
    }

    /// Order number and source of the held ordered context
    pub fn ordered_context(&self) -> Option<(QueueHandle, u64)> {
        self.ordered.as_ref().map(|c| (c.queue(), c.order()))
    }

    /// Wait until the held context's ticket on `slot` is served
    pub fn acquire_slot(&mut self, slot: u32) -> SchedResult<()> {
        let ctx = self.ordered.as_mut().ok_or(SchedError::NoOrderedContext)?;
        ctx.acquire(slot, &self.sched.queues)
    }

    /// Pass `slot` on to the next ticket holder
    pub fn release_slot(&mut self, slot: u32) -> SchedResult<()> {
        let ctx = self.ordered.as_mut().ok_or(SchedError::NoOrderedContext)?;
        ctx.release(slot, &self.sched.queues)
    }

    /// Enqueue one event from inside a schedule loop.
    ///
    /// While an ordered context is held the enqueue is deferred until the
    /// context is released; `sustain == false` releases it right away.
    /// `q` cannot be destroyed while a deferred enqueue to it is pending.
    pub fn enqueue(&mut self, q: QueueHandle, ev: Event, sustain: bool) -> Result<(), EnqueueError> {
        let mut events = vec![ev];
        match self.enqueue_multi(q, &mut events, sustain) {
            Ok(_) => Ok(()),
            Err(error) => match events.pop() {
                Some(event) => Err(EnqueueError { error, event }),
                None => Ok(()),
            },
        }
    }

    /// Batch form of [`Worker::enqueue`]. Drains `events` on success.
    pub fn enqueue_multi(
        &mut self,
        q: QueueHandle,
        events: &mut Vec<Event>,
        sustain: bool,
    ) -> SchedResult<usize> {
        let Some(ctx) = self.ordered.as_mut() else {
            return self.sched.enqueue_multi(q, events);
        };
        let count = ctx.defer(q, events, &self.sched.queues)?;
        if !sustain {
            self.release_ordered();
        }
        Ok(count)
    }

    /// Leave the scheduler.
    ///
    /// Fails with `PrescheduledEvents` if events were still cached; they
    /// are put back at the head of their queue before the thread detaches
    /// either way.
    pub fn detach(self) -> SchedResult<()> {
        if self.cache.is_empty() {
            Ok(())
        } else {
            Err(SchedError::PrescheduledEvents)
        }
    }

    fn wait_for_work(&mut self, wait: Wait) -> bool {
        let deadline = match wait {
            Wait::Ns(ns) => Some(Deadline::after_ns(ns)),
            _ => None,
        };
        loop {
            if !self.cache.is_empty() || self.schedule_once() {
                return true;
            }
            match (wait, &deadline) {
                (Wait::NoWait, _) => return false,
                (_, Some(d)) if d.expired() => return false,
                _ => {}
            }
            relax();
        }
    }

    /// Steps 2..7 of the pop algorithm. True if the cache was refilled.
    fn schedule_once(&mut self) -> bool {
        self.release_context();
        if self.paused {
            return false;
        }

        let sched = self.sched;
        for prio in Priority::iter() {
            if sched.dispatch.registered(prio) == 0 {
                continue;
            }
            let Some(cmd_id) = sched.dispatch.pop(prio) else {
                continue;
            };
            let Some(cmd) = sched.dispatch.command(cmd_id) else {
                dps_error!("popped unallocated command {}", cmd_id);
                continue;
            };

            match cmd {
                SchedCmd::PollPktin { pktio, group, .. } => {
                    if !sched.groups.is_member(group, self.thread) {
                        sched.dispatch.push(prio, cmd_id);
                        continue;
                    }
                    let outcome = sched.pktios.poll(
                        pktio,
                        &sched.queues,
                        &sched.dispatch,
                        sched.config().poll_burst,
                        &mut self.scratch,
                    );
                    match outcome {
                        PollOutcome::Rearm => sched.dispatch.push(prio, cmd_id),
                        PollOutcome::Retire => sched.dispatch.unregister(cmd_id),
                    }
                }
                SchedCmd::Dequeue {
                    queue, sync, group, ..
                } => {
                    if !sched.groups.is_member(group, self.thread) {
                        sched.dispatch.push(prio, cmd_id);
                        continue;
                    }
                    let max = match sync {
                        SyncMode::Ordered => 1,
                        _ => sched.config().max_deq,
                    };
                    self.scratch.clear();
                    let batch =
                        match sched.queues.dequeue_multi(queue, &mut self.scratch, max, true) {
                            Ok(batch) => batch,
                            Err(SchedError::QueueDestroyed) => {
                                sched.queues.finalize_destroy(queue, &sched.dispatch);
                                continue;
                            }
                            Err(e) => {
                                dps_error!("command {} for {}: {}", cmd_id, queue, e);
                                continue;
                            }
                        };
                    if batch.count == 0 {
                        // Queue went idle; the command is dropped
                        continue;
                    }

                    self.cache.extend(self.scratch.drain(..));
                    self.cache_queue = queue;
                    match sync {
                        SyncMode::Atomic => self.atomic = Some((prio, cmd_id)),
                        SyncMode::Ordered => {
                            sched.dispatch.push(prio, cmd_id);
                            if let Some(stamp) = batch.order {
                                self.ordered = Some(OrderedContext::new(queue, stamp));
                            }
                        }
                        SyncMode::Parallel => sched.dispatch.push(prio, cmd_id),
                    }
                    return true;
                }
            }
        }
        false
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            let q = self.cache_queue;
            let mut events: Vec<Event> = self.cache.drain(..).collect();
            dps_warn!(
                "{} detaching with {} cached events, returning them to {}",
                self.thread,
                events.len(),
                q
            );
            // Back at the head while a held ATOMIC command still excludes
            // other workers
            let requeued = self
                .sched
                .queues
                .requeue_head(q, &mut events, &self.sched.dispatch);
            if let Err(e) = requeued {
                dps_error!("{} events from {} lost: {}", events.len(), q, e);
            }
        }
        self.release_context();
        self.sched.detach_thread(self.thread);
        dps_debug!("{} detached", self.thread);
    }
}
