//! Linux `epoll`-based selector.
//!
//! Registrations are level-triggered and carry the guest descriptor id in
//! `epoll_event.u64`.  This backend is selected automatically on Linux and
//! Android targets.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use sysdefs::constants::err_const::{get_errno, handle_errno, Errno};
use sysdefs::data::net_struct::Interest;

use super::{timeout_to_millis, HostEvent};

/// `epoll_ctl` may run while another thread sits in `epoll_wait` on the
/// same instance, so every operation only needs `&self`.
pub struct EpollSelector {
    /// Epoll file descriptor; closed on drop.
    epoll: OwnedFd,
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;
    if interest.readable {
        flags |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.writable {
        flags |= EPOLLOUT;
    }
    flags as u32
}

impl EpollSelector {
    pub fn new() -> Result<Self, Errno> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(handle_errno(get_errno(), "epoll_create1"));
        }
        Ok(EpollSelector {
            // SAFETY: freshly created and owned by nobody else.
            epoll: unsafe { OwnedFd::from_raw_fd(epoll) },
        })
    }

    fn ctl(&self, op: i32, hostfd: RawFd, fd: u32, interest: Interest) -> Result<(), Errno> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: u64::from(fd),
        };
        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, hostfd, &mut event) };
        if rc < 0 {
            return Err(handle_errno(get_errno(), "epoll_ctl"));
        }
        Ok(())
    }

    /// Register a host descriptor under guest id `fd`.
    pub fn register(&self, hostfd: RawFd, fd: u32, interest: Interest) -> Result<(), Errno> {
        self.ctl(EPOLL_CTL_ADD, hostfd, fd, interest)
    }

    /// Update interest flags for an already registered descriptor.
    pub fn reregister(&self, hostfd: RawFd, fd: u32, interest: Interest) -> Result<(), Errno> {
        self.ctl(EPOLL_CTL_MOD, hostfd, fd, interest)
    }

    /// Remove a descriptor.  Failure only means the host already forgot it.
    pub fn deregister(&self, hostfd: RawFd, fd: u32) {
        let rc = unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                hostfd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            log::debug!(
                "epoll_ctl(DEL) for fd {} failed with errno {}",
                fd,
                get_errno()
            );
        }
    }

    /// Wait for readiness on the registered descriptors.
    ///
    /// `out` is cleared and refilled with at most `capacity` entries.  An
    /// interrupted wait yields no entries rather than an error.
    pub fn select(
        &self,
        out: &mut Vec<HostEvent>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), Errno> {
        out.clear();
        let capacity = capacity.clamp(1, i32::MAX as usize);
        let mut events = vec![epoll_event { events: 0, u64: 0 }; capacity];

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                capacity as i32,
                timeout_to_millis(timeout),
            )
        };

        if n < 0 {
            let errno = get_errno();
            if errno == libc::EINTR {
                return Ok(());
            }
            return Err(handle_errno(errno, "epoll_wait"));
        }

        let failed = (EPOLLERR | EPOLLHUP) as u32;
        for ev in &events[..n as usize] {
            let flags = ev.events;
            // Copy out of the (packed on x86_64) struct before using it.
            let data = ev.u64;
            out.push(HostEvent {
                fd: data as u32,
                readable: flags & ((EPOLLIN | EPOLLRDHUP) as u32 | failed) != 0,
                writable: flags & (EPOLLOUT as u32 | failed) != 0,
            });
        }
        Ok(())
    }
}
