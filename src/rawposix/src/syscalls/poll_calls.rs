//! Poller operations of a cage.
//!
//! A poller is a level-triggered readiness set over the cage's socket
//! descriptors, modelled on `epoll`.  Registrations name a descriptor, a
//! guest token handed back in events, and the readiness of interest.
use std::sync::Arc;
use std::time::Duration;

use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::data::net_struct::PollEvent;

use crate::cage::Cage;
use crate::poller::Poller;

impl Cage {
    /// Reference to Linux: https://man7.org/linux/man-pages/man2/epoll_create.2.html
    ///
    /// Creates an empty poller.  `EMFILE` once the cage holds its maximum
    /// number of pollers.
    pub fn poller_create(&self) -> Result<u32, Errno> {
        let mut pollers = self.pollers.lock();
        // Check before creating a host selector we would only throw away.
        if pollers.len() >= pollers.max_fds() as usize {
            return Err(syscall_error(Errno::EMFILE, "poller_create", "too many pollers"));
        }
        let poller = Poller::new()?;
        let poll = pollers.get_unused_virtual_fd(Arc::new(poller))?;
        log::trace!("cage {}: poller_create -> {}", self.cageid, poll);
        Ok(poll)
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/epoll_ctl.2.html (EPOLL_CTL_ADD)
    ///
    /// Registers `fd` with `event.token` and the interest in `event`.
    ///
    /// Return:
    ///     - On failure: `EBADF` for a stale poller or descriptor, `EEXIST` if
    ///       `fd` is already registered in this poller
    pub fn poller_add(&self, poll: u32, fd: u32, event: PollEvent) -> Result<(), Errno> {
        let poller = self.poller_ref(poll, "poller_add")?;
        // Hold the socket table while registering, so a concurrent close
        // either runs before (and we fail with EBADF) or after (and purges
        // this registration).
        let sockets = self.sockets.lock();
        let entry = sockets
            .translate_virtual_fd(fd)
            .map_err(|e| syscall_error(e, "poller_add", "Bad File Descriptor"))?;
        let hostfd = entry.raw_fd();
        poller.add(fd, hostfd, event)
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/epoll_ctl.2.html (EPOLL_CTL_MOD)
    ///
    /// Replaces the token and interest of an existing registration.  `ENOENT`
    /// if `fd` is not registered in this poller.
    pub fn poller_modify(&self, poll: u32, fd: u32, event: PollEvent) -> Result<(), Errno> {
        let poller = self.poller_ref(poll, "poller_modify")?;
        poller.modify(fd, event)
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/epoll_ctl.2.html (EPOLL_CTL_DEL)
    ///
    /// Removes one registration; the others are untouched.  `ENOENT` if `fd`
    /// was never registered (or already removed).
    pub fn poller_delete(&self, poll: u32, fd: u32) -> Result<(), Errno> {
        let poller = self.poller_ref(poll, "poller_delete")?;
        poller.delete(fd)
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/epoll_wait.2.html
    ///
    /// Blocks until at least one registration is ready or `timeout` passes
    /// (`None` waits indefinitely) and returns up to `capacity` events.  Zero
    /// events is a valid result.  `capacity` is also capped by the cage's
    /// `max_events_per_wait`.
    ///
    /// No lock is held while waiting, so other calls of the cage (including
    /// registrations on this same poller) proceed.
    pub fn poller_wait(
        &self,
        poll: u32,
        capacity: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<PollEvent>, Errno> {
        if capacity == 0 {
            return Err(syscall_error(
                Errno::EINVAL,
                "poller_wait",
                "capacity must be non-zero",
            ));
        }
        let capacity = capacity.min(self.config.max_events_per_wait) as usize;
        let poller = self.poller_ref(poll, "poller_wait")?;
        poller.wait(capacity, timeout)
    }

    /// Closes a poller and everything registered on it.  `EBADF` if `poll`
    /// is not open.
    pub fn poller_close(&self, poll: u32) -> Result<(), Errno> {
        let poller = self
            .pollers
            .lock()
            .close_virtualfd(poll)
            .map_err(|e| syscall_error(e, "poller_close", "Bad poller handle"))?;
        poller.close();
        log::trace!("cage {}: poller_close {}", self.cageid, poll);
        Ok(())
    }
}
