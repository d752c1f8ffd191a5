//! # dpsched-core
//!
//! Core types for the dataplane event scheduler.
//!
//! This crate is platform-agnostic and holds no scheduling policy.
//! The queue manager, dispatch tiers and worker contexts live in
//! `dpsched-runtime`.
//!
//! ## Modules
//!
//! - `handle` - Queue, group, packet-input, thread and command handles
//! - `types` - Queue status/type, sync discipline, priority, queue params
//! - `thrmask` - Thread membership masks for scheduling groups
//! - `event` - Move-only event handle and fixed-capacity event arena
//! - `slot` - Id allocator (LIFO reuse) for threads and events
//! - `spinlock` - Spin and ticket locks used on the hot path
//! - `error` - Error types
//! - `log` - Leveled stderr logging macros

pub mod handle;
pub mod types;
pub mod thrmask;
pub mod event;
pub mod slot;
pub mod spinlock;
pub mod error;
pub mod log;

// Re-exports for convenience
pub use handle::{CmdId, GroupId, PktioHandle, QueueHandle, ThreadId};
pub use types::{
    Priority, QueueParam, QueueStatus, QueueType, SchedParam, SyncMode, ThreadType,
};
pub use thrmask::ThreadMask;
pub use event::{Event, EventPool};
pub use slot::IdAllocator;
pub use spinlock::{SpinLock, SpinLockGuard, TicketLock, TicketLockGuard};
pub use error::{ConfigError, SchedError, SchedResult};

/// Compile-time limits. These form part of the public contract: handles,
/// masks and static pools are sized from them.
pub mod constants {
    /// Number of scheduling priority levels (0 is the highest)
    pub const NUM_PRIOS: usize = 8;

    /// Maximum number of queues in the queue table
    pub const MAX_QUEUES: usize = 1024;

    /// Maximum ordering-lock slots per ordered queue
    pub const MAX_ORDERED_LOCKS: usize = 2;

    /// Maximum scheduling groups, built-in groups included
    pub const MAX_SCHED_GROUPS: usize = 16;

    /// Maximum packet-input devices that can be polled
    pub const MAX_PKTIO: usize = 16;

    /// Schedule commands: one per queue and one per packet-input device
    pub const NUM_SCHED_CMD: usize = MAX_QUEUES + MAX_PKTIO;

    /// Events dequeued per scheduler pop
    pub const MAX_DEQ: usize = 4;

    /// Packets received per poll of a packet-input device
    pub const QUEUE_MULTI_MAX: usize = 8;

    /// Maximum threads attached to one scheduler
    pub const MAX_THREADS: usize = 128;

    /// Queue and group name length, terminator included
    pub const NAME_LEN: usize = 32;

    /// First group id handed out by `group_create`
    pub const FIRST_NAMED_GROUP: u32 = 3;

    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "aarch64", target_arch = "powerpc64"))] {
            /// Cache line size used to pad per-queue and per-tier state
            pub const CACHE_LINE_SIZE: usize = 128;
        } else {
            /// Cache line size used to pad per-queue and per-tier state
            pub const CACHE_LINE_SIZE: usize = 64;
        }
    }
}

/// Truncate a queue or group name to `NAME_LEN - 1` bytes on a char boundary.
pub fn truncate_name(name: &str) -> String {
    let max = constants::NAME_LEN - 1;
    if name.len() <= max {
        return name.to_string();
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("rx"), "rx");
        let long = "q".repeat(64);
        assert_eq!(truncate_name(&long).len(), constants::NAME_LEN - 1);
        // Multi-byte char straddling the cut is dropped whole
        let mut s = "a".repeat(constants::NAME_LEN - 2);
        s.push('é');
        assert_eq!(truncate_name(&s).len(), constants::NAME_LEN - 2);
    }

    #[test]
    fn test_command_pool_size() {
        assert_eq!(
            constants::NUM_SCHED_CMD,
            constants::MAX_QUEUES + constants::MAX_PKTIO
        );
    }
}
