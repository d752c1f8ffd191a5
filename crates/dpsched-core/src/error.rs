//! Error types for the event scheduler
//!
//! Three kinds of failure show up here:
//! - resource exhaustion (no free queue, command, group, thread, event)
//! - protocol misuse (bad handle, wrong queue state, double release)
//! - packet-input backend errors
//!
//! An empty queue is not an error: dequeue and schedule return zero events.

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in queue and scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Queue table is full
    NoFreeQueue,

    /// Schedule command pool exhausted
    NoFreeCommand,

    /// Group table is full
    NoFreeGroup,

    /// Too many threads attached
    NoFreeThread,

    /// Packet-input table is full
    NoFreePktio,

    /// Event pool exhausted
    NoFreeEvent,

    /// Handle out of range or never allocated
    InvalidHandle,

    /// Queue slot is free
    QueueFree,

    /// Queue was destroyed; the scheduler finalizes it on next sight
    QueueDestroyed,

    /// Destroy refused: events still queued
    QueueNotEmpty,

    /// Destroy refused: ordered contexts still outstanding, or deferred
    /// enqueues from one still bound for this queue
    ReorderPending,

    /// More ordering-lock slots requested than configured
    TooManyOrderedLocks { requested: u32, max: u32 },

    /// Name already used by a live group
    NameInUse,

    /// Built-in groups cannot be modified or destroyed
    BuiltinGroup,

    /// Destroy refused: queues or devices still schedule through the group
    GroupInUse,

    /// Operation needs an ordered queue
    NotOrdered,

    /// Ordered-lock operation without a held ordered context
    NoOrderedContext,

    /// Ordering-lock slot already released in this context
    SlotAlreadyReleased,

    /// Operation not allowed for this queue type or state
    InvalidOperation,

    /// Thread still holds events from a previous pop
    PrescheduledEvents,

    /// Packet-input receive failed with a backend code
    PktioRecv(i32),

    /// Invalid configuration
    Config(ConfigError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::NoFreeQueue => write!(f, "no free queue slot"),
            SchedError::NoFreeCommand => write!(f, "no free schedule command"),
            SchedError::NoFreeGroup => write!(f, "schedule group table full"),
            SchedError::NoFreeThread => write!(f, "too many scheduler threads"),
            SchedError::NoFreePktio => write!(f, "no free packet-input slot"),
            SchedError::NoFreeEvent => write!(f, "event pool exhausted"),
            SchedError::InvalidHandle => write!(f, "invalid handle"),
            SchedError::QueueFree => write!(f, "queue already free"),
            SchedError::QueueDestroyed => write!(f, "queue destroyed"),
            SchedError::QueueNotEmpty => write!(f, "queue not empty"),
            SchedError::ReorderPending => {
                write!(f, "ordered contexts or deferred enqueues outstanding")
            }
            SchedError::TooManyOrderedLocks { requested, max } => {
                write!(f, "{} ordered locks requested, max {}", requested, max)
            }
            SchedError::NameInUse => write!(f, "name already in use"),
            SchedError::GroupInUse => write!(f, "group still bound to queues or devices"),
            SchedError::BuiltinGroup => write!(f, "built-in group"),
            SchedError::NotOrdered => write!(f, "queue is not ordered"),
            SchedError::NoOrderedContext => write!(f, "no ordered context held"),
            SchedError::SlotAlreadyReleased => write!(f, "ordered lock slot already released"),
            SchedError::InvalidOperation => write!(f, "invalid operation for queue"),
            SchedError::PrescheduledEvents => write!(f, "locally pre-scheduled events exist"),
            SchedError::PktioRecv(code) => write!(f, "packet receive error: {}", code),
            SchedError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SchedError {}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SchedError::QueueNotEmpty), "queue not empty");
        let e = SchedError::TooManyOrderedLocks { requested: 3, max: 2 };
        assert_eq!(format!("{}", e), "3 ordered locks requested, max 2");
        let e = SchedError::Config(ConfigError::InvalidValue("max_deq must be > 0"));
        assert_eq!(format!("{}", e), "invalid config: max_deq must be > 0");
    }

    #[test]
    fn test_error_conversion() {
        let e: SchedError = ConfigError::InvalidValue("x").into();
        assert!(matches!(e, SchedError::Config(ConfigError::InvalidValue("x"))));
    }
}
