//! Limits of the platform a cage runs on.

/// Maximum number of socket descriptors a single cage may hold at once.
/// `CageConfig::max_descriptors` may lower or raise it per cage.
pub const FD_PER_PROCESS_MAX: u32 = 1024;

/// Default number of pollers a single cage may hold at once.
pub const POLLERS_PER_PROCESS_MAX: u32 = 64;

/// Upper bound on the number of iovecs one send/recv may carry
/// (Linux `UIO_MAXIOV`).
pub const MAX_IOVECS: u32 = 1024;

/// Upper bound on the events one wait may return, whatever the guest asks.
pub const MAX_EVENTS_PER_WAIT: u32 = 1024;
