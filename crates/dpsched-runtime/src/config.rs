//! Scheduler configuration
//!
//! Library defaults with runtime environment overrides, then builder
//! methods on top.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use dpsched_runtime::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .max_queues(256)
//!     .max_deq(2);
//! ```
//!
//! Every limit is capped by the matching compile-time constant in
//! `dpsched_core::constants`; the static pools are sized from the
//! configured values.

use std::str::FromStr;

use dpsched_core::constants::{
    MAX_DEQ, MAX_PKTIO, MAX_QUEUES, MAX_THREADS, QUEUE_MULTI_MAX,
};
use dpsched_core::{dps_println, ConfigError};

/// Library defaults
pub mod defaults {
    use super::*;

    pub const MAX_QUEUES: usize = super::MAX_QUEUES;
    pub const MAX_PKTIO: usize = super::MAX_PKTIO;
    pub const MAX_DEQ: usize = super::MAX_DEQ;
    pub const POLL_BURST: usize = QUEUE_MULTI_MAX;
    pub const MAX_THREADS: usize = super::MAX_THREADS;
}

/// Get environment variable parsed as `T`, or the default
fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Queue table size
    pub max_queues: usize,
    /// Packet-input devices that can be opened
    pub max_pktio: usize,
    /// Events taken from a queue per scheduler pop
    pub max_deq: usize,
    /// Packets requested per device poll
    pub poll_burst: usize,
    /// Threads that can attach at once
    pub max_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DPS_MAX_QUEUES` - Queue table size
    /// - `DPS_MAX_PKTIO` - Packet-input table size
    /// - `DPS_MAX_DEQ` - Events per scheduler pop
    /// - `DPS_POLL_BURST` - Packets per device poll
    /// - `DPS_MAX_THREADS` - Attached thread limit
    pub fn from_env() -> Self {
        Self {
            max_queues: env_get("DPS_MAX_QUEUES", defaults::MAX_QUEUES),
            max_pktio: env_get("DPS_MAX_PKTIO", defaults::MAX_PKTIO),
            max_deq: env_get("DPS_MAX_DEQ", defaults::MAX_DEQ),
            poll_burst: env_get("DPS_POLL_BURST", defaults::POLL_BURST),
            max_threads: env_get("DPS_MAX_THREADS", defaults::MAX_THREADS),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_queues: defaults::MAX_QUEUES,
            max_pktio: defaults::MAX_PKTIO,
            max_deq: defaults::MAX_DEQ,
            poll_burst: defaults::POLL_BURST,
            max_threads: defaults::MAX_THREADS,
        }
    }

    // Builder methods

    pub fn max_queues(mut self, n: usize) -> Self {
        self.max_queues = n;
        self
    }

    pub fn max_pktio(mut self, n: usize) -> Self {
        self.max_pktio = n;
        self
    }

    pub fn max_deq(mut self, n: usize) -> Self {
        self.max_deq = n;
        self
    }

    pub fn poll_burst(mut self, n: usize) -> Self {
        self.poll_burst = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// Schedule commands needed: one per queue plus one per device
    pub fn num_sched_cmd(&self) -> usize {
        self.max_queues + self.max_pktio
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queues == 0 {
            return Err(ConfigError::InvalidValue("max_queues must be > 0"));
        }
        if self.max_queues > MAX_QUEUES {
            return Err(ConfigError::InvalidValue("max_queues exceeds MAX_QUEUES"));
        }
        if self.max_pktio > MAX_PKTIO {
            return Err(ConfigError::InvalidValue("max_pktio exceeds MAX_PKTIO"));
        }
        if self.max_deq == 0 || self.max_deq > MAX_DEQ {
            return Err(ConfigError::InvalidValue("max_deq must be in 1..=MAX_DEQ"));
        }
        if self.poll_burst == 0 || self.poll_burst > QUEUE_MULTI_MAX {
            return Err(ConfigError::InvalidValue(
                "poll_burst must be in 1..=QUEUE_MULTI_MAX",
            ));
        }
        if self.max_threads == 0 || self.max_threads > MAX_THREADS {
            return Err(ConfigError::InvalidValue(
                "max_threads must be in 1..=MAX_THREADS",
            ));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        dps_println!("dpsched configuration:");
        dps_println!("  max_queues:   {}", self.max_queues);
        dps_println!("  max_pktio:    {}", self.max_pktio);
        dps_println!("  max_deq:      {}", self.max_deq);
        dps_println!("  poll_burst:   {}", self.poll_burst);
        dps_println!("  max_threads:  {}", self.max_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = SchedulerConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_sched_cmd(), MAX_QUEUES + MAX_PKTIO);
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new().max_queues(64).max_deq(1).poll_burst(2);
        assert_eq!(config.max_queues, 64);
        assert_eq!(config.max_deq, 1);
        assert_eq!(config.poll_burst, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::new().max_queues(0).validate().is_err());
        assert!(SchedulerConfig::new().max_queues(MAX_QUEUES + 1).validate().is_err());
        assert!(SchedulerConfig::new().max_deq(0).validate().is_err());
        assert!(SchedulerConfig::new().max_deq(MAX_DEQ + 1).validate().is_err());
        assert!(SchedulerConfig::new().poll_burst(QUEUE_MULTI_MAX + 1).validate().is_err());
        assert!(SchedulerConfig::new().max_threads(0).validate().is_err());
        assert!(SchedulerConfig::new().max_pktio(0).validate().is_ok());
    }

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__DPS_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
    }
}
