//! Scheduler context
//!
//! One `Scheduler` owns the queue table, the group registry, the
//! packet-input table and the dispatch tiers. It is created at startup,
//! shared by reference with every attached thread, and consumed by
//! `shutdown`. Queue, group and device operations are methods on it;
//! per-thread operations live on the `Worker` returned by `attach`.

use std::sync::Arc;

use dpsched_core::constants::NUM_PRIOS;
use dpsched_core::{
    dps_debug, dps_error, dps_info, dps_warn, Event, GroupId, IdAllocator, PktioHandle,
    Priority, QueueHandle, QueueParam, SchedError, SchedResult, ThreadId, ThreadType,
};

use crate::config::SchedulerConfig;
use crate::dispatch::{Dispatch, SchedCmd};
use crate::group::GroupRegistry;
use crate::pktio::{PktInput, PktioTable};
use crate::queue::{Capability, DeqBatch, EnqueueError, QueueTable};
use crate::worker::{Wait, Worker};

/// The scheduler context
pub struct Scheduler {
    config: SchedulerConfig,
    pub(crate) queues: QueueTable,
    pub(crate) groups: GroupRegistry,
    pub(crate) pktios: PktioTable,
    pub(crate) dispatch: Dispatch,
    threads: IdAllocator,
}

impl Scheduler {
    /// Build a scheduler. All tables are allocated here and never grow.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        dpsched_core::log::init();
        config.validate()?;
        dps_debug!(
            "scheduler init: {} queues, {} pktio, {} commands",
            config.max_queues,
            config.max_pktio,
            config.num_sched_cmd()
        );
        Ok(Self {
            queues: QueueTable::new(config.max_queues),
            groups: GroupRegistry::new(),
            pktios: PktioTable::new(config.max_pktio),
            dispatch: Dispatch::new(config.num_sched_cmd()),
            threads: IdAllocator::new(config.max_threads),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attach the calling thread. It joins ALL and the built-in group
    /// of its type.
    pub fn attach(&self, thread_type: ThreadType) -> SchedResult<Worker<'_>> {
        let id = self.threads.allocate().ok_or(SchedError::NoFreeThread)?;
        let thread = ThreadId::new(id);
        self.groups.attach_thread(thread, thread_type);
        dps_debug!("{} attached as {:?}", thread, thread_type);
        Ok(Worker::new(self, thread, thread_type))
    }

    pub(crate) fn detach_thread(&self, thread: ThreadId) {
        self.groups.detach_thread(thread);
        self.threads.release(thread.as_u32());
    }

    pub fn attached_threads(&self) -> usize {
        self.threads.allocated_count() as usize
    }

    /// Queue table, for lookup, context and introspection
    #[inline]
    pub fn queues(&self) -> &QueueTable {
        &self.queues
    }

    /// Scheduling group registry
    #[inline]
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Destroy a named group.
    ///
    /// Refused with `GroupInUse` while any queue or started device still
    /// schedules through it, since its command could then never be
    /// served, or would follow a later group reusing the id.
    pub fn group_destroy(&self, id: GroupId) -> SchedResult<()> {
        if id.is_builtin() {
            return Err(SchedError::BuiltinGroup);
        }
        let bound = self.dispatch.bound_to(id);
        if bound > 0 {
            dps_warn!("group {} still bound to {} schedule commands", id, bound);
            return Err(SchedError::GroupInUse);
        }
        self.groups.destroy(id)?;
        dps_debug!("group {} destroyed", id);
        Ok(())
    }

    #[inline]
    pub fn pktios(&self) -> &PktioTable {
        &self.pktios
    }

    // Queue operations

    pub fn queue_create(&self, name: &str, param: QueueParam) -> SchedResult<QueueHandle> {
        self.queues.create(name, param, &self.dispatch)
    }

    pub fn queue_destroy(&self, q: QueueHandle) -> SchedResult<()> {
        self.queues.destroy(q, &self.dispatch)
    }

    pub fn queue_lookup(&self, name: &str) -> Option<QueueHandle> {
        self.queues.lookup(name)
    }

    pub fn enqueue(&self, q: QueueHandle, ev: Event) -> Result<(), EnqueueError> {
        let mut events = vec![ev];
        match self.queues.enqueue_multi(q, &mut events, &self.dispatch) {
            Ok(_) => Ok(()),
            Err(error) => match events.pop() {
                Some(event) => Err(EnqueueError { error, event }),
                None => Ok(()),
            },
        }
    }

    /// Append `events` to `q`. Drains the vector on success and leaves
    /// it untouched on failure.
    pub fn enqueue_multi(&self, q: QueueHandle, events: &mut Vec<Event>) -> SchedResult<usize> {
        self.queues.enqueue_multi(q, events, &self.dispatch)
    }

    pub fn dequeue(&self, q: QueueHandle) -> SchedResult<Option<Event>> {
        let mut out = Vec::with_capacity(1);
        self.queues.dequeue_multi(q, &mut out, 1, false)?;
        Ok(out.pop())
    }

    /// Move up to `max` events from the head of `q` into `out`
    pub fn dequeue_multi(
        &self,
        q: QueueHandle,
        out: &mut Vec<Event>,
        max: usize,
    ) -> SchedResult<DeqBatch> {
        self.queues.dequeue_multi(q, out, max, false)
    }

    pub fn capability(&self) -> Capability {
        self.queues.capability()
    }

    // Packet input

    pub fn pktio_open(
        &self,
        device: Arc<dyn PktInput>,
        input_queue: QueueHandle,
    ) -> SchedResult<PktioHandle> {
        self.pktios.open(device, input_queue, &self.queues)
    }

    /// Start polling a device from threads in `group` at `prio`
    pub fn pktio_start(&self, h: PktioHandle, prio: Priority, group: GroupId) -> SchedResult<()> {
        self.pktios.start(h, prio, group, &self.dispatch)
    }

    pub fn pktio_stop(&self, h: PktioHandle) -> SchedResult<()> {
        self.pktios.stop(h)
    }

    pub fn pktio_close(&self, h: PktioHandle) -> SchedResult<()> {
        self.pktios.close(h)
    }

    // Misc

    #[inline]
    pub fn num_prio(&self) -> usize {
        NUM_PRIOS
    }

    /// Wait value for a bounded schedule call
    #[inline]
    pub fn wait_time(ns: u64) -> Wait {
        Wait::from_ns(ns)
    }

    /// Commands waiting in the tier of `prio` (for diagnostics)
    pub fn pending_commands(&self, prio: Priority) -> usize {
        self.dispatch.queued(prio)
    }

    /// Schedule commands allocated, queued or held (for diagnostics)
    pub fn commands_in_use(&self) -> usize {
        self.dispatch.commands_in_use()
    }

    /// Tear down: drain the dispatch tiers, finalize destroyed queues and
    /// retire poll commands. Fails with `QueueNotEmpty` if a scheduled
    /// queue still held events.
    pub fn shutdown(self) -> SchedResult<()> {
        let mut busy = 0;
        for prio in Priority::iter() {
            for cmd_id in self.dispatch.drain(prio) {
                match self.dispatch.command(cmd_id) {
                    Some(SchedCmd::Dequeue { queue, .. }) => match self.queues.probe_empty(queue) {
                        Ok(true) => {}
                        Ok(false) => {
                            dps_warn!("queue {} not empty at shutdown", queue);
                            busy += 1;
                        }
                        Err(SchedError::QueueDestroyed) => {
                            self.queues.finalize_destroy(queue, &self.dispatch);
                        }
                        Err(e) => dps_error!("queue {} at shutdown: {}", queue, e),
                    },
                    Some(SchedCmd::PollPktin { pktio, .. }) => {
                        dps_debug!("retiring poll command for {}", pktio);
                        self.dispatch.unregister(cmd_id);
                    }
                    None => dps_error!("unallocated command {} in tier {}", cmd_id, prio),
                }
            }
        }

        let leftover = self.queues.term();
        if leftover > 0 {
            dps_info!("{} queues still allocated at shutdown", leftover);
        }
        if busy > 0 {
            return Err(SchedError::QueueNotEmpty);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktio::tests::CountingDevice;
    use dpsched_core::constants::MAX_DEQ;
    use dpsched_core::{ConfigError, QueueStatus, SyncMode, ThreadMask};
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn sched() -> Scheduler {
        Scheduler::new(SchedulerConfig::new().max_queues(64).max_threads(16)).unwrap()
    }

    fn fill(s: &Scheduler, q: QueueHandle, raw: impl IntoIterator<Item = u64>) {
        let mut evs: Vec<Event> = raw.into_iter().map(Event::from_raw).collect();
        s.enqueue_multi(q, &mut evs).unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Scheduler::new(SchedulerConfig::new().max_deq(0)).err();
        assert_eq!(
            err,
            Some(SchedError::Config(ConfigError::InvalidValue(
                "max_deq must be in 1..=MAX_DEQ"
            )))
        );
    }

    #[test]
    fn test_plain_round_trip() {
        let s = sched();
        let q = s.queue_create("fifo", QueueParam::plain()).unwrap();
        for raw in 1..=5 {
            s.enqueue(q, Event::from_raw(raw)).unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(s.dequeue_multi(q, &mut out, 5).unwrap().count, 5);
        let raws: Vec<u64> = out.iter().map(Event::raw).collect();
        assert_eq!(raws, vec![1, 2, 3, 4, 5]);
        assert_eq!(s.dequeue(q).unwrap(), None);
    }

    #[test]
    fn test_empty_dequeue_and_failed_destroy() {
        let s = sched();
        let q = s
            .queue_create("s", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        let mut out = Vec::new();
        assert_eq!(s.dequeue_multi(q, &mut out, 4).unwrap().count, 0);
        assert_eq!(s.queues().status(q).unwrap(), QueueStatus::NotScheduled);

        s.enqueue(q, Event::from_raw(1)).unwrap();
        assert_eq!(s.queue_destroy(q), Err(SchedError::QueueNotEmpty));
        s.enqueue(q, Event::from_raw(2)).unwrap();

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let mut got = Vec::new();
        assert_eq!(w.schedule_multi(Wait::NoWait, &mut got, 8), Some((q, 2)));
    }

    #[test]
    fn test_enqueue_error_returns_event() {
        let s = sched();
        let err = s.enqueue(QueueHandle::new(63), Event::from_raw(9)).unwrap_err();
        assert_eq!(err.error, SchedError::QueueFree);
        assert_eq!(err.event.raw(), 9);
        assert!(s.enqueue(QueueHandle::new(1000), Event::from_raw(1)).is_err());
    }

    #[test]
    fn test_parallel_exactly_once() {
        const N: u64 = 1000;
        let s = sched();
        let q = s
            .queue_create("par", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        fill(&s, q, 0..N);

        let seen = Mutex::new(Vec::new());
        let total = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut w = s.attach(ThreadType::Worker).unwrap();
                    while total.load(Ordering::SeqCst) < N as usize {
                        if let Some((src, ev)) = w.schedule(Wait::NoWait) {
                            assert_eq!(src, q);
                            seen.lock().unwrap().push(ev.raw());
                            total.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..N).collect::<Vec<_>>());
    }

    #[test]
    fn test_atomic_exclusive_and_in_order() {
        const N: usize = 400;
        let s = sched();
        let q = s
            .queue_create("atom", QueueParam::sched(Priority::DEFAULT, SyncMode::Atomic))
            .unwrap();
        fill(&s, q, 0..N as u64);

        let in_flight = AtomicI32::new(0);
        let max_seen = AtomicI32::new(0);
        let total = AtomicUsize::new(0);
        let log = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut w = s.attach(ThreadType::Worker).unwrap();
                    let mut batch = Vec::new();
                    while total.load(Ordering::SeqCst) < N {
                        batch.clear();
                        let Some((_, n)) = w.schedule_multi(Wait::NoWait, &mut batch, MAX_DEQ)
                        else {
                            continue;
                        };
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        log.lock().unwrap().extend(batch.iter().map(Event::raw));
                        std::hint::spin_loop();
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        total.fetch_add(n, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(log.into_inner().unwrap(), (0..N as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_atomic_held_until_release() {
        let s = sched();
        let q = s
            .queue_create("atom", QueueParam::sched(Priority::DEFAULT, SyncMode::Atomic))
            .unwrap();
        fill(&s, q, 0..6);

        let mut a = s.attach(ThreadType::Worker).unwrap();
        let mut b = s.attach(ThreadType::Worker).unwrap();
        let mut out = Vec::new();
        assert_eq!(a.schedule_multi(Wait::NoWait, &mut out, MAX_DEQ), Some((q, MAX_DEQ)));
        assert!(b.schedule(Wait::NoWait).is_none());

        a.release_atomic();
        assert_eq!(b.schedule_multi(Wait::NoWait, &mut out, MAX_DEQ), Some((q, 2)));
    }

    #[test]
    fn test_ordered_numbers_in_dequeue_order() {
        const N: u64 = 1000;
        let s = sched();
        let q = s
            .queue_create("ord", QueueParam::sched(Priority::DEFAULT, SyncMode::Ordered))
            .unwrap();
        fill(&s, q, 0..N);

        let stamps = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for max in [1usize, 3, 7] {
                let (s, stamps) = (&s, &stamps);
                scope.spawn(move || {
                    let mut out = Vec::new();
                    loop {
                        out.clear();
                        let batch = s.dequeue_multi(q, &mut out, max).unwrap();
                        if batch.count == 0 {
                            break;
                        }
                        let first = batch.order.unwrap().order;
                        let mut stamps = stamps.lock().unwrap();
                        for (i, ev) in out.iter().enumerate() {
                            // FIFO head and order counter advance together
                            assert_eq!(ev.raw(), first + i as u64);
                            stamps.push(first + i as u64);
                        }
                    }
                });
            }
        });

        let mut stamps = stamps.into_inner().unwrap();
        stamps.sort_unstable();
        assert_eq!(stamps, (0..N).collect::<Vec<_>>());
    }

    #[test]
    fn test_ordered_slot_serializes_workers() {
        const N: usize = 1000;
        let s = sched();
        let q = s
            .queue_create(
                "ord",
                QueueParam::sched(Priority::DEFAULT, SyncMode::Ordered).lock_count(1),
            )
            .unwrap();
        fill(&s, q, 0..N as u64);

        let log = Mutex::new(Vec::new());
        let done = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut w = s.attach(ThreadType::Worker).unwrap();
                    while done.load(Ordering::SeqCst) < N {
                        let Some((_, ev)) = w.schedule(Wait::NoWait) else {
                            continue;
                        };
                        let (src, order) = w.ordered_context().unwrap();
                        assert_eq!(src, q);
                        assert_eq!(ev.raw(), order);
                        w.acquire_slot(0).unwrap();
                        log.lock().unwrap().push(order);
                        w.release_slot(0).unwrap();
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(log.into_inner().unwrap(), (0..N as u64).collect::<Vec<_>>());
        assert_eq!(s.queue_destroy(q), Ok(()));
    }

    #[test]
    fn test_ordered_deferred_enqueue() {
        let s = sched();
        let q = s
            .queue_create("ord", QueueParam::sched(Priority::DEFAULT, SyncMode::Ordered))
            .unwrap();
        let out_q = s.queue_create("out", QueueParam::plain()).unwrap();
        fill(&s, q, 0..2);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let (_, ev) = w.schedule(Wait::NoWait).unwrap();
        w.enqueue(out_q, ev, true).unwrap();
        assert_eq!(s.queues().len(out_q).unwrap(), 0);
        w.release_ordered();
        assert_eq!(s.queues().len(out_q).unwrap(), 1);
        assert!(w.ordered_context().is_none());
        w.release_ordered();

        let (_, ev) = w.schedule(Wait::NoWait).unwrap();
        w.enqueue(out_q, ev, false).unwrap();
        assert_eq!(s.queues().len(out_q).unwrap(), 2);
        assert!(w.ordered_context().is_none());
        assert_eq!(w.acquire_slot(0), Err(SchedError::NoOrderedContext));
    }

    #[test]
    fn test_priority_order() {
        let s = sched();
        let prio = |p| Priority::new(p).unwrap();
        for (i, p) in [0u8, 0, 1, 2].into_iter().enumerate() {
            let q = s
                .queue_create(&format!("q{}", i), QueueParam::sched(prio(p), SyncMode::Parallel))
                .unwrap();
            s.enqueue(q, Event::from_raw(p as u64)).unwrap();
        }

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let got: Vec<u64> = std::iter::from_fn(|| w.schedule(Wait::NoWait))
            .map(|(_, ev)| ev.raw())
            .collect();
        assert_eq!(got, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_group_excludes_other_threads() {
        let s = sched();
        let mut t1 = s.attach(ThreadType::Worker).unwrap();
        let mut t2 = s.attach(ThreadType::Worker).unwrap();
        let g = s
            .groups()
            .create("only-t1", &ThreadMask::from_thread(t1.thread_id()))
            .unwrap();
        let q = s
            .queue_create(
                "grouped",
                QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel).group(g),
            )
            .unwrap();
        fill(&s, q, 0..3);

        for _ in 0..100 {
            assert!(t2.schedule(Wait::NoWait).is_none());
        }
        assert_eq!(t1.schedule(Wait::NoWait).map(|(src, _)| src), Some(q));

        s.groups().join(g, &ThreadMask::from_thread(t2.thread_id())).unwrap();
        t1.pause();
        assert!(t1.schedule(Wait::NoWait).is_some());
        assert_eq!(t2.schedule(Wait::NoWait).map(|(src, _)| src), None);
        t1.resume();
    }

    #[test]
    fn test_stopped_pktio_not_rearmed() {
        let s = sched();
        let inq = s
            .queue_create("rx", QueueParam::pktin(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        let dev = Arc::new(CountingDevice::new(5));
        let h = s.pktio_open(dev.clone(), inq).unwrap();
        s.pktio_start(h, Priority::HIGHEST, GroupId::ALL).unwrap();
        assert_eq!(s.dispatch.registered(Priority::HIGHEST), 1);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let (src, ev) = w.schedule(Wait::NoWait).unwrap();
        assert_eq!((src, ev.raw()), (inq, 0));
        let calls = dev.receive_calls.load(Ordering::SeqCst);
        assert!(calls >= 1);

        dev.stopped.store(true, Ordering::SeqCst);
        let mut rest = Vec::new();
        while let Some((_, ev)) = w.schedule(Wait::NoWait) {
            rest.push(ev.raw());
        }
        assert_eq!(rest, vec![1, 2, 3, 4]);
        assert_eq!(s.dispatch.registered(Priority::HIGHEST), 0);

        for _ in 0..10 {
            assert!(w.schedule(Wait::NoWait).is_none());
        }
        assert_eq!(dev.receive_calls.load(Ordering::SeqCst), calls);
        drop(w);
        s.pktio_close(h).unwrap();
    }

    #[test]
    fn test_destroy_finalized_by_scheduler() {
        let s = sched();
        let prio = Priority::LOWEST;
        let q = s
            .queue_create("doomed", QueueParam::sched(prio, SyncMode::Parallel))
            .unwrap();
        s.enqueue(q, Event::from_raw(1)).unwrap();
        assert!(s.dequeue(q).unwrap().is_some());

        s.queue_destroy(q).unwrap();
        assert_eq!(s.queues().status(q).unwrap(), QueueStatus::Destroyed);
        assert_eq!(s.dispatch.registered(prio), 1);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        assert!(w.schedule(Wait::NoWait).is_none());
        assert_eq!(s.queues().status(q).unwrap(), QueueStatus::Free);
        assert_eq!(s.dispatch.registered(prio), 0);
    }

    #[test]
    fn test_pause_serves_cache_only() {
        let s = sched();
        let q = s
            .queue_create("p", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        fill(&s, q, 0..3);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        assert!(w.schedule(Wait::NoWait).is_some());
        w.pause();
        assert!(w.is_paused());
        assert_eq!(w.cached(), 2);
        fill(&s, q, 10..12);
        assert!(w.schedule(Wait::NoWait).is_some());
        assert!(w.schedule(Wait::NoWait).is_some());
        assert!(w.schedule(Wait::NoWait).is_none());
        w.resume();
        assert_eq!(w.schedule(Wait::NoWait).map(|(_, ev)| ev.raw()), Some(10));
    }

    #[test]
    fn test_detach_with_cached_events() {
        let s = sched();
        let q = s
            .queue_create("a", QueueParam::sched(Priority::DEFAULT, SyncMode::Atomic))
            .unwrap();
        fill(&s, q, 0..3);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let (_, first) = w.schedule(Wait::NoWait).unwrap();
        assert_eq!(first.raw(), 0);
        assert_eq!(w.detach(), Err(SchedError::PrescheduledEvents));
        assert_eq!(s.queues().len(q).unwrap(), 2);
        assert_eq!(s.attached_threads(), 0);

        // Atomic command was released with the context
        let mut w = s.attach(ThreadType::Worker).unwrap();
        let mut out = Vec::new();
        assert_eq!(w.schedule_multi(Wait::NoWait, &mut out, 8), Some((q, 2)));
        assert_eq!(out.iter().map(Event::raw).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(w.detach(), Ok(()));
    }

    #[test]
    fn test_attach_limits_and_builtin_groups() {
        let s = Scheduler::new(SchedulerConfig::new().max_threads(2)).unwrap();
        let w = s.attach(ThreadType::Worker).unwrap();
        let c = s.attach(ThreadType::Control).unwrap();
        assert!(matches!(s.attach(ThreadType::Worker), Err(SchedError::NoFreeThread)));

        let groups = s.groups();
        assert_eq!(groups.thrmask(GroupId::ALL).unwrap().count(), 2);
        assert!(groups.is_member(GroupId::WORKER, w.thread_id()));
        assert!(groups.is_member(GroupId::CONTROL, c.thread_id()));
        assert!(!groups.is_member(GroupId::WORKER, c.thread_id()));

        drop(w);
        assert_eq!(groups.thrmask(GroupId::WORKER).unwrap(), ThreadMask::zero());
        assert!(s.attach(ThreadType::Worker).is_ok());
    }

    #[test]
    fn test_control_thread_skips_worker_group() {
        let s = sched();
        let q = s
            .queue_create(
                "w",
                QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel).group(GroupId::WORKER),
            )
            .unwrap();
        fill(&s, q, 0..1);
        let mut ctl = s.attach(ThreadType::Control).unwrap();
        assert!(ctl.schedule(Wait::NoWait).is_none());
        let mut wrk = s.attach(ThreadType::Worker).unwrap();
        assert!(wrk.schedule(Wait::NoWait).is_some());
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let s = sched();
        let mut w = s.attach(ThreadType::Worker).unwrap();
        let start = Instant::now();
        assert!(w.schedule(Scheduler::wait_time(5_000_000)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_wait_forever_sees_late_producer() {
        let s = sched();
        let q = s
            .queue_create("late", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(5));
                s.enqueue(q, Event::from_raw(77)).unwrap();
            });
            let mut w = s.attach(ThreadType::Worker).unwrap();
            let (src, ev) = w.schedule(Wait::Forever).unwrap();
            assert_eq!((src, ev.raw()), (q, 77));
        });
    }

    #[test]
    fn test_shutdown_reports_busy_queue() {
        let s = sched();
        let q = s
            .queue_create("busy", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        fill(&s, q, 0..1);
        assert_eq!(s.shutdown(), Err(SchedError::QueueNotEmpty));

        let s = sched();
        let q = s
            .queue_create("idle", QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        fill(&s, q, 0..1);
        assert!(s.dequeue(q).unwrap().is_some());
        s.queue_destroy(q).unwrap();
        assert_eq!(s.shutdown(), Ok(()));
    }

    #[test]
    fn test_misc_queries() {
        let s = sched();
        assert_eq!(s.num_prio(), NUM_PRIOS);
        assert_eq!(Scheduler::wait_time(10), Wait::Ns(10));
        assert_eq!(s.capability().max_queues, 64);
        let q = s.queue_create("named", QueueParam::plain()).unwrap();
        assert_eq!(s.queue_lookup("named"), Some(q));

        let p = s
            .queue_create("sched", QueueParam::sched(Priority::HIGHEST, SyncMode::Atomic))
            .unwrap();
        assert_eq!(s.commands_in_use(), 1);
        assert_eq!(s.pending_commands(Priority::HIGHEST), 0);
        s.enqueue(p, Event::from_raw(3)).unwrap();
        assert_eq!(s.pending_commands(Priority::HIGHEST), 1);
    }

    #[test]
    fn test_dropped_worker_keeps_atomic_fifo() {
        let s = sched();
        let q = s
            .queue_create("a", QueueParam::sched(Priority::DEFAULT, SyncMode::Atomic))
            .unwrap();
        fill(&s, q, 0..10);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let (_, first) = w.schedule(Wait::NoWait).unwrap();
        assert_eq!(first.raw(), 0);
        assert!(w.cached() > 0);
        fill(&s, q, 10..12);
        drop(w);

        let mut out = Vec::new();
        s.dequeue_multi(q, &mut out, 16).unwrap();
        assert_eq!(
            out.iter().map(Event::raw).collect::<Vec<_>>(),
            (1..12).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn test_deferred_target_cannot_be_destroyed() {
        let s = sched();
        let q = s
            .queue_create("ord", QueueParam::sched(Priority::DEFAULT, SyncMode::Ordered))
            .unwrap();
        let out_q = s.queue_create("out", QueueParam::plain()).unwrap();
        fill(&s, q, 5..6);

        let mut w = s.attach(ThreadType::Worker).unwrap();
        let (_, ev) = w.schedule(Wait::NoWait).unwrap();
        w.enqueue(out_q, ev, true).unwrap();
        assert_eq!(s.queue_destroy(out_q), Err(SchedError::ReorderPending));
        assert_eq!(s.queues().status(out_q).unwrap(), QueueStatus::Ready);

        w.release_ordered();
        assert_eq!(s.dequeue(out_q).unwrap().map(|ev| ev.raw()), Some(5));
        s.queue_destroy(out_q).unwrap();

        // A target already gone hands the event straight back
        fill(&s, q, 6..7);
        let (_, ev) = w.schedule(Wait::NoWait).unwrap();
        let err = w.enqueue(out_q, ev, true).unwrap_err();
        assert_eq!(err.error, SchedError::QueueFree);
        assert_eq!(err.event.raw(), 6);
    }

    #[test]
    fn test_bounded_wait_counts_from_call() {
        let s = sched();
        let inq = s
            .queue_create("rx", QueueParam::pktin(Priority::DEFAULT, SyncMode::Parallel))
            .unwrap();
        let mut dev = CountingDevice::new(0);
        dev.delay = Duration::from_millis(5);
        let dev = Arc::new(dev);
        let h = s.pktio_open(dev.clone(), inq).unwrap();
        s.pktio_start(h, Priority::HIGHEST, GroupId::ALL).unwrap();

        // One scan outlasts the whole wait, so it is the only scan
        let mut w = s.attach(ThreadType::Worker).unwrap();
        assert!(w.schedule(Wait::Ns(1_000_000)).is_none());
        assert_eq!(dev.receive_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_group_destroy_refused_while_bound() {
        let s = sched();
        let g = s.groups().create("g", &ThreadMask::zero()).unwrap();
        let q = s
            .queue_create(
                "bound",
                QueueParam::sched(Priority::DEFAULT, SyncMode::Parallel).group(g),
            )
            .unwrap();
        assert_eq!(s.group_destroy(g), Err(SchedError::GroupInUse));
        assert_eq!(s.groups().lookup("g"), Some(g));
        assert_eq!(s.group_destroy(GroupId::WORKER), Err(SchedError::BuiltinGroup));

        s.queue_destroy(q).unwrap();
        s.group_destroy(g).unwrap();
        assert_eq!(s.groups().lookup("g"), None);
        assert_eq!(s.group_destroy(g), Err(SchedError::InvalidHandle));
    }
}
