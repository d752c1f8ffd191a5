//! Handle types
//!
//! Every shared table (queues, groups, packet-input devices, threads,
//! schedule commands) is indexed by a 32-bit handle. `u32::MAX` is
//! reserved as the invalid sentinel.

use core::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel for "no such object"
            pub const INVALID: $name = $name(u32::MAX);

            /// Create a handle from a table index
            #[inline]
            pub const fn new(index: u32) -> Self {
                $name(index)
            }

            /// Get the raw u32 value
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Get as usize for table indexing
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Check that this is not the INVALID sentinel
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            /// Convert to Option
            #[inline]
            pub const fn to_option(self) -> Option<$name> {
                if self.is_valid() {
                    Some(self)
                } else {
                    None
                }
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(index: u32) -> Self {
                $name(index)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(h: $name) -> u32 {
                h.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                } else {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Index of a queue in the queue table
    QueueHandle,
    "queue"
);

define_handle!(
    /// Scheduling group id
    GroupId,
    "group"
);

define_handle!(
    /// Index of a packet-input device in the pktio table
    PktioHandle,
    "pktio"
);

define_handle!(
    /// Scheduler-local thread id, used as the bit index in thread masks
    ThreadId,
    "thread"
);

define_handle!(
    /// Index of a schedule command in the static command pool
    CmdId,
    "cmd"
);

impl GroupId {
    /// Every attached thread
    pub const ALL: GroupId = GroupId(0);
    /// Threads attached as workers
    pub const WORKER: GroupId = GroupId(1);
    /// Threads attached as control threads
    pub const CONTROL: GroupId = GroupId(2);

    /// Built-in groups can never be destroyed
    #[inline]
    pub const fn is_builtin(self) -> bool {
        self.0 < crate::constants::FIRST_NAMED_GROUP
    }
}
