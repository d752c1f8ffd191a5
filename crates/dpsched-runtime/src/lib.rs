//! # dpsched-runtime
//!
//! The event scheduler and queue subsystem.
//!
//! This crate provides:
//! - The queue table and its status machine
//! - Scheduling groups
//! - Schedule commands and per-priority dispatch tiers
//! - The worker-local pop algorithm with PARALLEL, ATOMIC and ORDERED
//!   disciplines
//! - Ordering-lock slots for ordered pipelines
//! - The packet-input poll adapter
//!
//! Waiting is busy polling throughout. No call in this crate blocks in
//! the OS on the scheduling path.

pub mod config;
pub mod clock;
mod dispatch;
pub mod queue;
pub mod group;
pub mod pktio;
mod ordered;
pub mod worker;
pub mod scheduler;

// Re-exports
pub use config::SchedulerConfig;
pub use group::GroupRegistry;
pub use pktio::{Classifier, PktInput, PktioState, PktioTable};
pub use queue::{Capability, DeqBatch, EnqueueError, OrderStamp, QueueContext, QueueInfo, QueueTable};
pub use scheduler::Scheduler;
pub use worker::{Wait, Worker};
