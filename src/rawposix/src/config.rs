//! Per-cage limits and timeouts.
//!
//! A `CageConfig` is handed to a cage when it is created and never changes
//! afterwards.  It derives serde so an embedder can keep it in whatever
//! configuration format it already uses; unknown keys are rejected so that a
//! typo does not silently fall back to a default.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::constants::lind_platform_const::{
    FD_PER_PROCESS_MAX, MAX_EVENTS_PER_WAIT, POLLERS_PER_PROCESS_MAX,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CageConfig {
    /// Sockets one cage may hold open at once.
    pub max_descriptors: u32,
    /// Pollers one cage may hold open at once.
    pub max_pollers: u32,
    /// Upper bound applied to every `listen` backlog.
    pub max_backlog: u32,
    /// Deadline of a `poller_wait` that does not name one.  `None` waits
    /// until something is ready.
    pub wait_deadline_ms: Option<u64>,
    /// How long a send / recv on a blocking-mode socket may wait for
    /// readiness before failing with `ETIMEDOUT`.  `None` waits forever.
    pub blocking_io_timeout_ms: Option<u64>,
    /// Events returned by one wait, whatever capacity the guest offers.
    pub max_events_per_wait: u32,
}

impl Default for CageConfig {
    fn default() -> Self {
        CageConfig {
            max_descriptors: FD_PER_PROCESS_MAX,
            max_pollers: POLLERS_PER_PROCESS_MAX,
            max_backlog: libc::SOMAXCONN as u32,
            wait_deadline_ms: Some(1000),
            blocking_io_timeout_ms: Some(30_000),
            max_events_per_wait: MAX_EVENTS_PER_WAIT,
        }
    }
}

impl CageConfig {
    pub fn wait_deadline(&self) -> Option<Duration> {
        self.wait_deadline_ms.map(Duration::from_millis)
    }

    pub fn blocking_io_timeout(&self) -> Option<Duration> {
        self.blocking_io_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects limits no cage could work with.
    pub fn validate(&self) -> Result<(), Errno> {
        if self.max_descriptors == 0 || self.max_pollers == 0 {
            return Err(syscall_error(
                Errno::EINVAL,
                "cage_config",
                "descriptor and poller limits must be non-zero",
            ));
        }
        if self.max_events_per_wait == 0 {
            return Err(syscall_error(
                Errno::EINVAL,
                "cage_config",
                "max_events_per_wait must be non-zero",
            ));
        }
        if self.max_backlog > i32::MAX as u32 {
            return Err(syscall_error(
                Errno::EINVAL,
                "cage_config",
                "max_backlog does not fit a host backlog",
            ));
        }
        Ok(())
    }
}
