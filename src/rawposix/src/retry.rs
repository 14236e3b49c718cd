//! Attempt / await / retry.
//!
//! Every host socket is kernel-non-blocking.  When the guest asked for a
//! blocking socket, send and recv get their blocking behaviour from this
//! state machine instead: try the operation, and on `EAGAIN` wait for the
//! descriptor to become ready, then try again, until it succeeds, fails with
//! anything else, or the deadline passes (`ETIMEDOUT`).
//!
//! ```text
//! Idle -> Attempting -> Done
//!             |  ^
//!     EAGAIN  v  | ready
//!   AwaitingReadiness -> Retrying
//! ```
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use sysdefs::constants::err_const::{get_errno, handle_errno, syscall_error, Errno};
use sysdefs::data::net_struct::Interest;

use crate::poller::timeout_to_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Idle,
    Attempting,
    AwaitingReadiness,
    Retrying,
    Done,
}

/// Something that can block until a descriptor is ready.
pub trait AwaitReadiness {
    /// Blocks until `interest` is satisfied or `timeout` passes.
    /// `Ok(true)` means ready, `Ok(false)` means the timeout passed first.
    fn await_readiness(
        &mut self,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<bool, Errno>;
}

/// Waits on a single host descriptor with `poll(2)`.
#[derive(Debug, Clone, Copy)]
pub struct SingleFdWaiter {
    hostfd: RawFd,
}

impl SingleFdWaiter {
    pub fn new(hostfd: RawFd) -> Self {
        SingleFdWaiter { hostfd }
    }
}

impl AwaitReadiness for SingleFdWaiter {
    fn await_readiness(
        &mut self,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<bool, Errno> {
        let mut events = 0;
        if interest.readable {
            events |= libc::POLLIN;
        }
        if interest.writable {
            events |= libc::POLLOUT;
        }
        let mut pfd = libc::pollfd {
            fd: self.hostfd,
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_to_millis(timeout)) };
        if rc < 0 {
            let errno = get_errno();
            // Interrupted: let the caller attempt again.
            if errno == libc::EINTR {
                return Ok(true);
            }
            return Err(handle_errno(errno, "poll"));
        }
        // Error and hang-up count as ready; the retry surfaces the actual
        // error.
        Ok(rc > 0)
    }
}

/// One operation driven through the attempt / await / retry cycle.
pub struct IoOp<F> {
    state: IoState,
    interest: Interest,
    op: F,
    deadline: Option<Instant>,
    attempts: u32,
}

impl<T, F> IoOp<F>
where
    F: FnMut() -> Result<T, Errno>,
{
    /// `op` is attempted each time the machine reaches `Attempting`;
    /// `interest` is what to wait for when it reports `EAGAIN`.
    pub fn new(interest: Interest, timeout: Option<Duration>, op: F) -> Self {
        IoOp {
            state: IoState::Idle,
            interest,
            op,
            deadline: timeout.map(|t| Instant::now() + t),
            attempts: 0,
        }
    }

    pub fn state(&self) -> IoState {
        self.state
    }

    /// How many times the operation has been attempted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Performs one transition.  Returns the outcome once the machine
    /// reaches `Done`, `None` while it is still running.
    pub fn step<W: AwaitReadiness>(&mut self, waiter: &mut W) -> Option<Result<T, Errno>> {
        match self.state {
            IoState::Idle | IoState::Retrying => {
                self.state = IoState::Attempting;
                None
            }
            IoState::Attempting => {
                self.attempts += 1;
                match (self.op)() {
                    Err(Errno::EAGAIN) => {
                        self.state = IoState::AwaitingReadiness;
                        None
                    }
                    Err(Errno::EINTR) => {
                        self.state = IoState::Retrying;
                        None
                    }
                    outcome => {
                        self.state = IoState::Done;
                        Some(outcome)
                    }
                }
            }
            IoState::AwaitingReadiness => {
                let remaining = match self.deadline {
                    None => None,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            self.state = IoState::Done;
                            return Some(Err(syscall_error(
                                Errno::ETIMEDOUT,
                                "retry",
                                "deadline passed while waiting for readiness",
                            )));
                        }
                        Some(deadline - now)
                    }
                };
                match waiter.await_readiness(self.interest, remaining) {
                    Ok(true) => {
                        self.state = IoState::Retrying;
                        None
                    }
                    // Timed out inside the wait; the next step reports it.
                    Ok(false) => {
                        if self.deadline.is_none() {
                            self.state = IoState::Retrying;
                        }
                        None
                    }
                    Err(e) => {
                        self.state = IoState::Done;
                        Some(Err(e))
                    }
                }
            }
            IoState::Done => Some(Err(syscall_error(
                Errno::EINVAL,
                "retry",
                "operation already completed",
            ))),
        }
    }

    /// Drives the machine to completion.
    pub fn run<W: AwaitReadiness>(&mut self, waiter: &mut W) -> Result<T, Errno> {
        loop {
            if let Some(outcome) = self.step(waiter) {
                return outcome;
            }
        }
    }
}
