//! Portable `poll(2)` selector.
//!
//! Used on Unix hosts without `epoll`.  It keeps its own list of registered
//! descriptors and rebuilds the `pollfd` array on every wait, which is fine
//! for the handful of sockets a guest usually watches.  The list is locked
//! only while that array is built, so changes made during a wait take effect
//! on the next one.  `poll` is always level-triggered.

use std::os::fd::RawFd;
use std::time::Duration;

use libc::{pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
use parking_lot::Mutex;
use sysdefs::constants::err_const::{get_errno, handle_errno, syscall_error, Errno};
use sysdefs::data::net_struct::Interest;

use super::{timeout_to_millis, HostEvent};

#[derive(Debug, Default)]
pub struct PollSelector {
    registered: Mutex<Vec<(u32, RawFd, Interest)>>,
}

fn interest_flags(interest: Interest) -> libc::c_short {
    let mut flags = 0;
    if interest.readable {
        flags |= POLLIN;
    }
    if interest.writable {
        flags |= POLLOUT;
    }
    flags
}

impl PollSelector {
    pub fn new() -> Result<Self, Errno> {
        Ok(PollSelector::default())
    }

    pub fn register(&self, hostfd: RawFd, fd: u32, interest: Interest) -> Result<(), Errno> {
        let mut registered = self.registered.lock();
        if registered.iter().any(|(_, h, _)| *h == hostfd) {
            return Err(syscall_error(
                Errno::EEXIST,
                "poll_register",
                "host descriptor already registered",
            ));
        }
        registered.push((fd, hostfd, interest));
        Ok(())
    }

    pub fn reregister(&self, hostfd: RawFd, fd: u32, interest: Interest) -> Result<(), Errno> {
        let mut registered = self.registered.lock();
        let slot = registered
            .iter_mut()
            .find(|(_, h, _)| *h == hostfd)
            .ok_or_else(|| syscall_error(Errno::ENOENT, "poll_reregister", "not registered"))?;
        *slot = (fd, hostfd, interest);
        Ok(())
    }

    pub fn deregister(&self, hostfd: RawFd, _fd: u32) {
        self.registered.lock().retain(|(_, h, _)| *h != hostfd);
    }

    /// Same contract as the epoll selector: `out` gets at most `capacity`
    /// entries and an interrupted wait yields none.
    pub fn select(
        &self,
        out: &mut Vec<HostEvent>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), Errno> {
        out.clear();
        let (ids, mut pollfds): (Vec<u32>, Vec<pollfd>) = self
            .registered
            .lock()
            .iter()
            .map(|(fd, hostfd, interest)| {
                let entry = pollfd {
                    fd: *hostfd,
                    events: interest_flags(*interest),
                    revents: 0,
                };
                (*fd, entry)
            })
            .unzip();

        let n = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_to_millis(timeout),
            )
        };

        if n < 0 {
            let errno = get_errno();
            if errno == libc::EINTR {
                return Ok(());
            }
            return Err(handle_errno(errno, "poll"));
        }

        let failed = POLLERR | POLLHUP | POLLNVAL;
        for (fd, p) in ids.iter().zip(pollfds.iter()) {
            if out.len() == capacity {
                break;
            }
            if p.revents == 0 {
                continue;
            }
            out.push(HostEvent {
                fd: *fd,
                readable: p.revents & (POLLIN | failed) != 0,
                writable: p.revents & (POLLOUT | failed) != 0,
            });
        }
        Ok(())
    }
}
