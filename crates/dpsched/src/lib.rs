//! # dpsched - Dataplane Event Scheduler
//!
//! Shared event queues and a priority scheduler for manycore packet
//! processing. Producers enqueue events; worker threads poll the
//! scheduler, which hands each one a batch from the highest-priority
//! queue it is eligible for while enforcing that queue's discipline.
//!
//! ## Features
//!
//! - **PARALLEL** queues: exactly-once delivery, any number of consumers
//! - **ATOMIC** queues: one worker at a time, FIFO preserved
//! - **ORDERED** queues: concurrent consumers with dequeue-order numbers
//!   and ordering-lock slots for order-sensitive side effects
//! - **Scheduling groups**: bind queues to subsets of threads
//! - **Packet input**: poll devices as schedulable sources
//! - **Allocation-free hot path**: fixed tables sized at startup
//!
//! ## Quick Start
//!
//! ```ignore
//! use dpsched::{Event, Priority, QueueParam, Scheduler, SchedulerConfig, SyncMode, Wait};
//!
//! let sched = Scheduler::new(SchedulerConfig::from_env())?;
//! let q = sched.queue_create("rx", QueueParam::sched(Priority::HIGHEST, SyncMode::Atomic))?;
//! sched.enqueue(q, Event::from_raw(1)).unwrap();
//!
//! dpsched::run_workers(&sched, 4, |worker| {
//!     while let Some((src, ev)) = worker.schedule(Wait::NoWait) {
//!         // process ev from src
//!     }
//! })?;
//! sched.shutdown()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Producers / Workers                        │
//! │        enqueue(), schedule(), acquire_slot()                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │     priority tiers of schedule commands, group filtering    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Queue    │      │  Group    │      │  Pktio    │
//!    │  table    │      │  registry │      │  poller   │
//!    └───────────┘      └───────────┘      └───────────┘
//! ```

// Re-export core types
pub use dpsched_core::{
    constants, CmdId, ConfigError, Event, EventPool, GroupId, PktioHandle, Priority, QueueHandle,
    QueueParam, QueueStatus, QueueType, SchedError, SchedParam, SchedResult, SyncMode, ThreadId,
    ThreadMask, ThreadType,
};

// Re-export logging macros
pub use dpsched_core::{dps_debug, dps_error, dps_info, dps_println, dps_trace, dps_warn};
pub use dpsched_core::log::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export runtime types
pub use dpsched_runtime::{
    Capability, Classifier, DeqBatch, EnqueueError, GroupRegistry, OrderStamp, PktInput,
    PktioState, QueueContext, QueueInfo, QueueTable, Scheduler, SchedulerConfig, Wait, Worker,
};

/// Run `f` on `count` scoped threads, each attached as a worker.
///
/// Returns once every thread has returned from `f` and detached. Fails
/// with `NoFreeThread` if the scheduler cannot take `count` more threads;
/// threads that did attach still run.
pub fn run_workers<F>(sched: &Scheduler, count: usize, f: F) -> SchedResult<()>
where
    F: Fn(&mut Worker<'_>) + Sync,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .map(|_| {
                let f = &f;
                scope.spawn(move || -> SchedResult<()> {
                    let mut worker = sched.attach(ThreadType::Worker)?;
                    f(&mut worker);
                    worker.release_context();
                    Ok(())
                })
            })
            .collect();

        let mut result = Ok(());
        for h in handles {
            match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => result = Err(e),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        result
    })
}
