//! Guest ABI.
//!
//! One function per guest import.  Arguments arrive as the guest passed
//! them: scalars by value, everything else as a `u32` offset into the
//! guest's linear memory.  Each function returns the guest errno as a `u32`,
//! 0 on success.
//!
//! Output pointers are bounds-checked before the operation runs, so a bad
//! pointer is `EFAULT` and nothing happens on the host.  In an optional slot
//! (e.g. accept's peer address) offset 0 means "not wanted".
//!
//! Structs the C headers pass by value (`__wasi_poll_event_t` in
//! `poller_add` / `poller_modify`) arrive by pointer, as the wasm32 C ABI
//! passes aggregates indirectly.
use std::time::Duration;

use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::data::net_struct::{POLL_EVENT_SIZE, SOCKADDR_UNION_SIZE};
use typemap::guest_memory::GuestMemory;
use typemap::network_helpers::{read_socket_address, write_socket_address};

use crate::cage::Cage;

fn errno_code(result: Result<(), Errno>) -> u32 {
    match result {
        Ok(()) => Errno::ESUCCESS.as_u32(),
        Err(e) => e.as_u32(),
    }
}

/// Checks that a `u32` out-pointer is writable.
fn check_out_u32(memory: &GuestMemory, offset: u32) -> Result<(), Errno> {
    memory.deref_buffer(offset, 4).map(|_| ())
}

/// `socket_create(domain, ty, protocol, fd_out)`
pub fn socket_create(
    cage: &Cage,
    memory: &mut GuestMemory,
    domain: i32,
    ty: i32,
    protocol: i32,
    fd_out: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        check_out_u32(memory, fd_out)?;
        let fd = cage.socket_create(domain, ty, protocol)?;
        memory.write_u32(fd_out, fd)
    })())
}

/// `socket_bind(fd, address)`
pub fn socket_bind(cage: &Cage, memory: &mut GuestMemory, fd: u32, address: u32) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        let address = read_socket_address(memory, address)?;
        cage.socket_bind(fd, &address)
    })())
}

/// `socket_listen(fd, backlog)`
pub fn socket_listen(cage: &Cage, _memory: &mut GuestMemory, fd: u32, backlog: u32) -> u32 {
    errno_code(cage.socket_listen(fd, backlog))
}

/// `socket_accept(fd, remote_address, remote_fd)`; `remote_address` may be 0.
pub fn socket_accept(
    cage: &Cage,
    memory: &mut GuestMemory,
    fd: u32,
    remote_address: u32,
    remote_fd: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        check_out_u32(memory, remote_fd)?;
        let want_address = remote_address != 0;
        if want_address {
            memory.deref_buffer(remote_address, SOCKADDR_UNION_SIZE)?;
        }
        let (child, address) = cage.socket_accept(fd, want_address)?;
        memory.write_u32(remote_fd, child)?;
        if let Some(address) = address {
            write_socket_address(memory, remote_address, &address)?;
        }
        Ok(())
    })())
}

/// `socket_send(fd, iov, iov_size, iov_flags, io_size_out)`
pub fn socket_send(
    cage: &Cage,
    memory: &mut GuestMemory,
    fd: u32,
    iov: u32,
    iov_size: u32,
    flags: u16,
    io_size_out: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        check_out_u32(memory, io_size_out)?;
        let sent = {
            let iovs = memory.iovecs(iov, iov_size)?;
            cage.socket_send(fd, &iovs, flags)?
        };
        memory.write_u32(io_size_out, sent)
    })())
}

/// `socket_recv(fd, iov, iov_size, iov_flags, io_size_out)`
pub fn socket_recv(
    cage: &Cage,
    memory: &mut GuestMemory,
    fd: u32,
    iov: u32,
    iov_size: u32,
    flags: u16,
    io_size_out: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        check_out_u32(memory, io_size_out)?;
        let received = {
            let mut iovs = memory.iovecs(iov, iov_size)?;
            cage.socket_recv(fd, &mut iovs, flags)?
        };
        memory.write_u32(io_size_out, received)
    })())
}

/// `socket_set_nonblocking(fd, nonblocking)`
pub fn socket_set_nonblocking(
    cage: &Cage,
    _memory: &mut GuestMemory,
    fd: u32,
    nonblocking: bool,
) -> u32 {
    errno_code(cage.socket_set_nonblocking(fd, nonblocking))
}

/// `socket_shutdown(fd, how)`
pub fn socket_shutdown(cage: &Cage, _memory: &mut GuestMemory, fd: u32, how: i32) -> u32 {
    errno_code(cage.socket_shutdown(fd, how))
}

/// `socket_close(fd)`
pub fn socket_close(cage: &Cage, _memory: &mut GuestMemory, fd: u32) -> u32 {
    errno_code(cage.socket_close(fd))
}

/// `socket_local_address(fd, address_out)`
pub fn socket_local_address(
    cage: &Cage,
    memory: &mut GuestMemory,
    fd: u32,
    address_out: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        memory.deref_buffer(address_out, SOCKADDR_UNION_SIZE)?;
        let address = cage.socket_local_address(fd)?;
        write_socket_address(memory, address_out, &address)
    })())
}

/// `poller_create(poll_out)`
pub fn poller_create(cage: &Cage, memory: &mut GuestMemory, poll_out: u32) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        check_out_u32(memory, poll_out)?;
        let poll = cage.poller_create()?;
        memory.write_u32(poll_out, poll)
    })())
}

/// `poller_add(poll, fd, event)`
pub fn poller_add(cage: &Cage, memory: &mut GuestMemory, poll: u32, fd: u32, event: u32) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        let event = memory.read_poll_event(event)?;
        cage.poller_add(poll, fd, event)
    })())
}

/// `poller_modify(poll, fd, event)`
pub fn poller_modify(
    cage: &Cage,
    memory: &mut GuestMemory,
    poll: u32,
    fd: u32,
    event: u32,
) -> u32 {
    errno_code((|| -> Result<(), Errno> {
        let event = memory.read_poll_event(event)?;
        cage.poller_modify(poll, fd, event)
    })())
}

/// `poller_delete(poll, fd)`
pub fn poller_delete(cage: &Cage, _memory: &mut GuestMemory, poll: u32, fd: u32) -> u32 {
    errno_code(cage.poller_delete(poll, fd))
}

fn wait_into_guest(
    cage: &Cage,
    memory: &mut GuestMemory,
    poll: u32,
    events: u32,
    events_size: u32,
    events_size_out: u32,
    timeout: Option<Duration>,
) -> Result<(), Errno> {
    let buffer_len = events_size
        .checked_mul(POLL_EVENT_SIZE)
        .ok_or_else(|| syscall_error(Errno::EFAULT, "poller_wait", "event buffer overflows"))?;
    memory.deref_buffer(events, buffer_len)?;
    check_out_u32(memory, events_size_out)?;

    let ready = cage.poller_wait(poll, events_size, timeout)?;
    memory.write_poll_events(events, &ready)?;
    // At most `events_size` events, so this fits.
    memory.write_u32(events_size_out, ready.len() as u32)
}

/// `poller_wait(poll, events, events_size, events_size_out)`, bounded by the
/// cage's configured wait deadline.
pub fn poller_wait(
    cage: &Cage,
    memory: &mut GuestMemory,
    poll: u32,
    events: u32,
    events_size: u32,
    events_size_out: u32,
) -> u32 {
    let timeout = cage.config.wait_deadline();
    errno_code(wait_into_guest(
        cage,
        memory,
        poll,
        events,
        events_size,
        events_size_out,
        timeout,
    ))
}

/// `poller_wait_timeout(poll, events, events_size, events_size_out,
/// timeout_ms)`; `timeout_ms == -1` waits indefinitely, other negative values
/// are `EINVAL`.
pub fn poller_wait_timeout(
    cage: &Cage,
    memory: &mut GuestMemory,
    poll: u32,
    events: u32,
    events_size: u32,
    events_size_out: u32,
    timeout_ms: i32,
) -> u32 {
    let timeout = match timeout_ms {
        -1 => None,
        ms if ms < 0 => {
            return syscall_error(Errno::EINVAL, "poller_wait_timeout", "negative timeout")
                .as_u32()
        }
        ms => Some(Duration::from_millis(ms as u64)),
    };
    errno_code(wait_into_guest(
        cage,
        memory,
        poll,
        events,
        events_size,
        events_size_out,
        timeout,
    ))
}

/// `poller_close(poll)`
pub fn poller_close(cage: &Cage, _memory: &mut GuestMemory, poll: u32) -> u32 {
    errno_code(cage.poller_close(poll))
}
