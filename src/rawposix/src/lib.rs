// RawPOSIX Library - host-side socket bridge for sandboxed guests
//
// A guest has no direct OS access.  It asks the host for sockets and
// readiness through a small ABI (see `dispatcher`); this library resolves
// those requests against a per-guest `Cage` and performs them on real host
// sockets.

pub mod cage;
pub mod config;
pub mod dispatcher;
pub mod poller;
pub mod retry;
pub mod syscalls;

pub use cage::{Cage, CageTable, SocketEntry};
pub use config::CageConfig;
pub use sysdefs::constants::err_const::{Errno, ErrorKind};
pub use sysdefs::data::net_struct::{Interest, PollEvent, SocketAddress};
pub use typemap::guest_memory::{GuestIoVecs, GuestMemory};

#[cfg(test)]
mod tests;
