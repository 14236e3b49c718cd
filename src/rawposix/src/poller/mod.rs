//! Host readiness multiplexing behind a guest poller handle.
//!
//! A [`Poller`] owns one host selector and the registrations a guest made
//! on it.  The selector only ever sees guest descriptor ids as its user data;
//! turning readiness back into the guest's tokens goes through the
//! registration map, so readiness for a descriptor that is no longer
//! registered (closed, deleted) is dropped instead of reported.
//!
//! The concrete selector is selected at compile time: `epoll` on Linux and
//! Android, `poll(2)` on the other Unix hosts.
//!
//! The registration map sits behind its own short-lived lock and the selector
//! is shared by reference, so a thread blocked in [`Poller::wait`] holds no
//! lock at all.  Registrations made during a wait are seen by `epoll` at once
//! and by `poll(2)` on its next wait.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::Duration;

use parking_lot::Mutex;
use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::data::net_struct::{Interest, PollEvent};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;

pub mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type Selector = epoll::EpollSelector;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type Selector = poll::PollSelector;

/// Readiness of one registered descriptor, as a selector reports it.
///
/// `readable` / `writable` already fold in error and hang-up conditions, so
/// a guest waiting to read from a reset connection wakes up and gets the
/// error from its next recv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEvent {
    pub fd: u32,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    token: u32,
    interest: Interest,
    hostfd: RawFd,
}

/// Converts an optional wait duration into the millisecond timeout both
/// `epoll_wait` and `poll` take.  Sub-millisecond remainders round up so a
/// short deadline still sleeps.
pub(crate) fn timeout_to_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis();
            if t.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    }
}

pub struct Poller {
    selector: Selector,
    // Never held across a selector wait.
    registrations: Mutex<HashMap<u32, Registration>>,
}

impl Poller {
    pub fn new() -> Result<Self, Errno> {
        Ok(Poller {
            selector: Selector::new()?,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    pub fn is_registered(&self, fd: u32) -> bool {
        self.registrations.lock().contains_key(&fd)
    }

    /// Registers guest descriptor `fd` (host socket `hostfd`).
    pub fn add(&self, fd: u32, hostfd: RawFd, event: PollEvent) -> Result<(), Errno> {
        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&fd) {
            return Err(syscall_error(
                Errno::EEXIST,
                "poller_add",
                "descriptor already registered",
            ));
        }
        let interest = event.interest();
        self.selector.register(hostfd, fd, interest)?;
        registrations.insert(
            fd,
            Registration {
                token: event.token,
                interest,
                hostfd,
            },
        );
        Ok(())
    }

    pub fn modify(&self, fd: u32, event: PollEvent) -> Result<(), Errno> {
        let mut registrations = self.registrations.lock();
        let registration = registrations.get_mut(&fd).ok_or_else(|| {
            syscall_error(Errno::ENOENT, "poller_modify", "descriptor not registered")
        })?;
        let interest = event.interest();
        self.selector
            .reregister(registration.hostfd, fd, interest)?;
        registration.token = event.token;
        registration.interest = interest;
        Ok(())
    }

    pub fn delete(&self, fd: u32) -> Result<(), Errno> {
        let mut registrations = self.registrations.lock();
        let registration = registrations.remove(&fd).ok_or_else(|| {
            syscall_error(Errno::ENOENT, "poller_delete", "descriptor not registered")
        })?;
        self.selector.deregister(registration.hostfd, fd);
        Ok(())
    }

    /// Drops the registration of `fd` if there is one.  Used while closing a
    /// descriptor, before its host socket is released.
    pub fn purge(&self, fd: u32) -> bool {
        let mut registrations = self.registrations.lock();
        match registrations.remove(&fd) {
            Some(registration) => {
                self.selector.deregister(registration.hostfd, fd);
                true
            }
            None => false,
        }
    }

    /// Waits for readiness and returns at most `capacity` events.  An empty
    /// result means the deadline passed (or the wait was interrupted).
    pub fn wait(
        &self,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<PollEvent>, Errno> {
        if capacity == 0 {
            return Err(syscall_error(
                Errno::EINVAL,
                "poller_wait",
                "capacity must be non-zero",
            ));
        }

        let mut host_events = Vec::new();
        self.selector.select(&mut host_events, capacity, timeout)?;

        let registrations = self.registrations.lock();
        let mut events = Vec::with_capacity(host_events.len());
        for host_event in &host_events {
            // Anything not in the map was deleted or closed while the
            // selector still had it queued.
            let Some(registration) = registrations.get(&host_event.fd) else {
                log::trace!("poller_wait: dropping event for stale fd {}", host_event.fd);
                continue;
            };
            let ready = Interest {
                readable: registration.interest.readable && host_event.readable,
                writable: registration.interest.writable && host_event.writable,
            };
            if ready.is_empty() {
                continue;
            }
            events.push(PollEvent {
                token: registration.token,
                readable: ready.readable,
                writable: ready.writable,
            });
        }
        events.truncate(capacity);
        Ok(events)
    }

    /// Releases every registration.  The host selector itself is released
    /// when the poller is dropped.
    pub fn close(&self) {
        for (fd, registration) in self.registrations.lock().drain() {
            self.selector.deregister(registration.hostfd, fd);
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("registrations", &self.len())
            .finish()
    }
}
