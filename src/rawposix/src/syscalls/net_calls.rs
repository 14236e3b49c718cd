//! Socket operations of a cage.
//!
//! Each call resolves the guest descriptor through the cage's socket table,
//! performs the host action through `libc`, and reports failures as guest
//! `Errno`s.  A call either fully applies or leaves no trace: new descriptors
//! are only allocated after the host side succeeded, and a host socket that
//! could not be given an id is closed again before returning.
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use sysdefs::constants::err_const::{get_errno, handle_errno, syscall_error, Errno};
use sysdefs::constants::net_const::{
    Shutdown, SocketDomain, SocketProtocol, SocketType, MSG_PEEK, MSG_WAITALL, RECV_FLAGS_MASK,
    SEND_FLAGS_MASK,
};
use sysdefs::data::net_struct::{Interest, SocketAddress};
use typemap::guest_memory::GuestIoVecs;
use typemap::network_helpers::{socket_address_from_host, socket_address_to_host};

use crate::cage::{Cage, SocketEntry};
use crate::retry::{IoOp, SingleFdWaiter};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_HOST_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_HOST_FLAGS: libc::c_int = 0;

fn host_domain(domain: SocketDomain) -> Result<libc::c_int, Errno> {
    match domain {
        SocketDomain::Inet => Ok(libc::AF_INET),
        SocketDomain::Inet6 => Ok(libc::AF_INET6),
        SocketDomain::Unix => Ok(libc::AF_UNIX),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        SocketDomain::Packet => Ok(libc::AF_PACKET),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        SocketDomain::Vsock => Ok(libc::AF_VSOCK),
        #[allow(unreachable_patterns)]
        _ => Err(syscall_error(
            Errno::ENOTSUP,
            "socket_create",
            "domain not available on this host",
        )),
    }
}

fn host_socktype(socktype: SocketType) -> libc::c_int {
    match socktype {
        SocketType::Stream => libc::SOCK_STREAM,
        SocketType::Datagram => libc::SOCK_DGRAM,
        SocketType::SeqPacket => libc::SOCK_SEQPACKET,
        SocketType::Raw => libc::SOCK_RAW,
    }
}

fn host_protocol(protocol: SocketProtocol) -> libc::c_int {
    match protocol {
        SocketProtocol::Default => 0,
        SocketProtocol::Icmpv4 => libc::IPPROTO_ICMP,
        SocketProtocol::Icmpv6 => libc::IPPROTO_ICMPV6,
        SocketProtocol::Tcp => libc::IPPROTO_TCP,
        SocketProtocol::Udp => libc::IPPROTO_UDP,
    }
}

/// Sets close-on-exec and `O_NONBLOCK` on a host descriptor, for hosts where
/// `socket` / `accept` cannot do it atomically.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec_nonblocking(fd: RawFd, syscall: &str) -> Result<(), Errno> {
    unsafe {
        let fdflags = libc::fcntl(fd, libc::F_GETFD);
        if fdflags < 0 || libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC) < 0 {
            return Err(handle_errno(get_errno(), syscall));
        }
        let flflags = libc::fcntl(fd, libc::F_GETFL);
        if flflags < 0 || libc::fcntl(fd, libc::F_SETFL, flflags | libc::O_NONBLOCK) < 0 {
            return Err(handle_errno(get_errno(), syscall));
        }
    }
    Ok(())
}

/// Without `MSG_NOSIGNAL`, SIGPIPE is suppressed per socket instead.
#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
fn suppress_sigpipe(fd: RawFd, syscall: &str) -> Result<(), Errno> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(handle_errno(get_errno(), syscall));
    }
    Ok(())
}

#[cfg(not(any(target_vendor = "apple", target_os = "freebsd")))]
fn suppress_sigpipe(_fd: RawFd, _syscall: &str) -> Result<(), Errno> {
    Ok(())
}

/// Creates a host socket that is close-on-exec and non-blocking.
fn host_socket(domain: libc::c_int, socktype: libc::c_int, protocol: libc::c_int) -> Result<OwnedFd, Errno> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let socktype = socktype | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK;

    let kernel_fd = unsafe { libc::socket(domain, socktype, protocol) };
    if kernel_fd < 0 {
        let errno = get_errno();
        // "This host cannot do that", which the guest sees as a
        // capability problem rather than an address one.
        if errno == libc::EAFNOSUPPORT {
            return Err(syscall_error(
                Errno::ENOTSUP,
                "socket_create",
                "address family not supported by host",
            ));
        }
        return Err(handle_errno(errno, "socket"));
    }
    // SAFETY: freshly created and owned by nobody else.
    let owned = unsafe { OwnedFd::from_raw_fd(kernel_fd) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    set_cloexec_nonblocking(owned.as_raw_fd(), "socket")?;
    suppress_sigpipe(owned.as_raw_fd(), "socket")?;
    Ok(owned)
}

/// `accept` without blocking; the child comes back close-on-exec and
/// non-blocking like every other host socket.
fn host_accept(
    listener: RawFd,
    want_address: bool,
) -> Result<(OwnedFd, Option<SocketAddress>), Errno> {
    // SAFETY: sockaddr_storage is plain old data.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let (addr_ptr, len_ptr) = if want_address {
        (
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len as *mut libc::socklen_t,
        )
    } else {
        (ptr::null_mut(), ptr::null_mut())
    };

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let client_fd = unsafe {
        libc::accept4(
            listener,
            addr_ptr,
            len_ptr,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        )
    };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let client_fd = unsafe { libc::accept(listener, addr_ptr, len_ptr) };

    if client_fd < 0 {
        return Err(handle_errno(get_errno(), "accept"));
    }
    // SAFETY: freshly accepted and owned by nobody else.
    let owned = unsafe { OwnedFd::from_raw_fd(client_fd) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    set_cloexec_nonblocking(owned.as_raw_fd(), "accept")?;
    suppress_sigpipe(owned.as_raw_fd(), "accept")?;

    let address = if want_address {
        Some(socket_address_from_host(&storage, len)?)
    } else {
        None
    };
    Ok((owned, address))
}

/// One `sendmsg` over the gathered buffers.
fn host_send(hostfd: RawFd, iovs: &GuestIoVecs) -> Result<u32, Errno> {
    // SAFETY: msghdr is plain old data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iovs.as_iovec_ptr() as *mut libc::iovec;
    msg.msg_iovlen = iovs.len() as _;
    // SAFETY: every iovec points into memory borrowed by `iovs`.
    let sent = unsafe { libc::sendmsg(hostfd, &msg, SEND_HOST_FLAGS) };
    if sent < 0 {
        return Err(handle_errno(get_errno(), "sendmsg"));
    }
    Ok(u32::try_from(sent).unwrap_or(u32::MAX))
}

/// One `recvmsg` into the scattered buffers.
fn host_recv(hostfd: RawFd, iovs: &mut GuestIoVecs, flags: libc::c_int) -> Result<u32, Errno> {
    // SAFETY: msghdr is plain old data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iovs.as_iovec_mut_ptr();
    msg.msg_iovlen = iovs.len() as _;
    // SAFETY: every iovec points into writable memory borrowed by `iovs`.
    let received = unsafe { libc::recvmsg(hostfd, &mut msg, flags) };
    if received < 0 {
        return Err(handle_errno(get_errno(), "recvmsg"));
    }
    Ok(u32::try_from(received).unwrap_or(u32::MAX))
}

impl Cage {
    /// Reference to Linux: https://man7.org/linux/man-pages/man2/socket.2.html
    ///
    /// Creates an endpoint for communication and registers it in the cage's
    /// socket table under the lowest free descriptor.  The host socket is
    /// always close-on-exec and non-blocking; the guest starts out in
    /// blocking mode, as with POSIX.
    ///
    /// Input:
    ///     - domain: guest domain (`AF_INET` = 1 ... `AF_VSOCK` = 5)
    ///     - ty: guest socket type (`SOCK_STREAM` = 1 ... `SOCK_RAW` = 4)
    ///     - protocol: guest protocol (`DEFAULT_PROTOCOL` = 0 ... `UDP` = 4)
    ///
    /// Return:
    ///     - On success: the new descriptor
    ///     - On failure: `ENOTSUP` for domains / types this host or bridge does
    ///       not offer, `EPROTONOSUPPORT` for unknown protocols, `EMFILE` when
    ///       the cage is out of descriptors
    pub fn socket_create(&self, domain: i32, ty: i32, protocol: i32) -> Result<u32, Errno> {
        let domain = SocketDomain::from_discriminant(domain).ok_or_else(|| {
            syscall_error(Errno::ENOTSUP, "socket_create", "unknown domain")
        })?;
        let socktype = SocketType::from_discriminant(ty)
            .ok_or_else(|| syscall_error(Errno::ENOTSUP, "socket_create", "unknown type"))?;
        let protocol = SocketProtocol::from_discriminant(protocol).ok_or_else(|| {
            syscall_error(Errno::EPROTONOSUPPORT, "socket_create", "unknown protocol")
        })?;

        let hostfd = host_socket(
            host_domain(domain)?,
            host_socktype(socktype),
            host_protocol(protocol),
        )?;

        // If this fails, `hostfd` is dropped and the host socket closed.
        let fd = self
            .sockets
            .lock()
            .get_unused_virtual_fd(SocketEntry::new(hostfd, domain, socktype))?;
        log::trace!("cage {}: socket_create -> fd {}", self.cageid, fd);
        Ok(fd)
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/bind.2.html
    ///
    /// Assigns `address` to the socket.  Only IP sockets can be bound through
    /// this interface, and the address family has to match the socket's
    /// domain.
    ///
    /// Return:
    ///     - On success: ()
    ///     - On failure: `EBADF`, `EAFNOSUPPORT` on a family mismatch,
    ///       `EADDRINUSE`, `EACCES`, ...
    pub fn socket_bind(&self, fd: u32, address: &SocketAddress) -> Result<(), Errno> {
        let entry = self.socket_entry(fd, "socket_bind")?;
        let matches = matches!(
            (entry.domain, address),
            (SocketDomain::Inet, SocketAddress::V4 { .. })
                | (SocketDomain::Inet6, SocketAddress::V6 { .. })
        );
        if !matches {
            return Err(syscall_error(
                Errno::EAFNOSUPPORT,
                "socket_bind",
                "address family does not match socket domain",
            ));
        }

        let (storage, len) = socket_address_to_host(address);
        let rc = unsafe {
            libc::bind(
                entry.raw_fd(),
                &storage as *const _ as *const libc::sockaddr,
                len,
            )
        };
        if rc < 0 {
            return Err(handle_errno(get_errno(), "bind"));
        }
        Ok(())
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/listen.2.html
    ///
    /// Marks the socket as passive.  `backlog` is clamped to the cage's
    /// configured maximum.
    ///
    /// Return:
    ///     - On success: ()
    ///     - On failure: `EBADF`, `ENOTSUP` for socket types without a
    ///       connection queue, or the host's error
    pub fn socket_listen(&self, fd: u32, backlog: u32) -> Result<(), Errno> {
        let entry = self.socket_entry(fd, "socket_listen")?;
        if !entry.socktype.is_connection_oriented() {
            return Err(syscall_error(
                Errno::ENOTSUP,
                "socket_listen",
                "socket type has no connection queue",
            ));
        }
        let backlog = backlog.min(self.config.max_backlog);
        let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
        let rc = unsafe { libc::listen(entry.raw_fd(), backlog) };
        if rc < 0 {
            return Err(handle_errno(get_errno(), "listen"));
        }
        Ok(())
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/accept.2.html
    ///
    /// Takes the first pending connection off the queue and gives it a new
    /// descriptor.  This never blocks, whatever the socket's mode: with an
    /// empty queue it fails with `EAGAIN` and the guest is expected to wait
    /// for readability on a poller.
    ///
    /// The child descriptor is independent of the listener and starts in
    /// blocking mode.  With `want_address == false` the peer address is not
    /// computed.
    ///
    /// Return:
    ///     - On success: (child descriptor, peer address if asked for)
    ///     - On failure: `EBADF`, `EAGAIN`, `EMFILE`, or the host's error
    pub fn socket_accept(
        &self,
        fd: u32,
        want_address: bool,
    ) -> Result<(u32, Option<SocketAddress>), Errno> {
        let entry = self.socket_entry(fd, "socket_accept")?;
        let (hostfd, address) = host_accept(entry.raw_fd(), want_address)?;

        let child = SocketEntry::new(hostfd, entry.domain, entry.socktype);
        // If this fails, `child` is dropped and the accepted socket closed.
        let child_fd = self.sockets.lock().get_unused_virtual_fd(child)?;
        log::trace!(
            "cage {}: socket_accept on fd {} -> fd {}",
            self.cageid,
            fd,
            child_fd
        );
        Ok((child_fd, address))
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/sendmsg.2.html
    ///
    /// Gathers `iovs` and sends them.  Partial sends succeed with the number
    /// of bytes written.  A non-blocking socket fails with `EAGAIN` when the
    /// host buffer is full; a blocking one waits for writability, up to the
    /// cage's blocking I/O timeout (`ETIMEDOUT` after that).  Writing to a
    /// connection the peer closed is `EPIPE`, never a signal.
    ///
    /// No send flags are defined; any set bit is `EINVAL`.
    pub fn socket_send(&self, fd: u32, iovs: &GuestIoVecs, flags: u16) -> Result<u32, Errno> {
        if flags & !SEND_FLAGS_MASK != 0 {
            return Err(syscall_error(Errno::EINVAL, "socket_send", "unknown send flags"));
        }
        let entry = self.socket_entry(fd, "socket_send")?;
        let hostfd = entry.raw_fd();

        if entry.nonblocking {
            return host_send(hostfd, iovs);
        }
        IoOp::new(
            Interest::WRITABLE,
            self.config.blocking_io_timeout(),
            || host_send(hostfd, iovs),
        )
        .run(&mut SingleFdWaiter::new(hostfd))
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/recvmsg.2.html
    ///
    /// Receives into `iovs`, filling the buffers in order.  Returns the number
    /// of bytes read; 0 means the peer shut down its side (or all buffers are
    /// empty).  Blocking behaves as in `socket_send`, waiting for readability.
    ///
    /// Flags: `MSG_PEEK` = 1, `MSG_WAITALL` = 2; other bits are `EINVAL`.
    pub fn socket_recv(&self, fd: u32, iovs: &mut GuestIoVecs, flags: u16) -> Result<u32, Errno> {
        if flags & !RECV_FLAGS_MASK != 0 {
            return Err(syscall_error(Errno::EINVAL, "socket_recv", "unknown recv flags"));
        }
        let mut host_flags = 0;
        if flags & MSG_PEEK != 0 {
            host_flags |= libc::MSG_PEEK;
        }
        if flags & MSG_WAITALL != 0 {
            host_flags |= libc::MSG_WAITALL;
        }

        let entry = self.socket_entry(fd, "socket_recv")?;
        let hostfd = entry.raw_fd();

        if entry.nonblocking {
            return host_recv(hostfd, iovs, host_flags);
        }
        IoOp::new(
            Interest::READABLE,
            self.config.blocking_io_timeout(),
            || host_recv(hostfd, iovs, host_flags),
        )
        .run(&mut SingleFdWaiter::new(hostfd))
    }

    /// Switches the guest-visible blocking mode.  Only bookkeeping: the host
    /// socket stays non-blocking either way.
    pub fn socket_set_nonblocking(&self, fd: u32, nonblocking: bool) -> Result<(), Errno> {
        self.sockets
            .lock()
            .translate_virtual_fd_mut(fd)
            .map_err(|e| syscall_error(e, "socket_set_nonblocking", "Bad File Descriptor"))?
            .nonblocking = nonblocking;
        Ok(())
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/shutdown.2.html
    ///
    /// `how`: `SHUT_RD` = 1, `SHUT_WR` = 2, `SHUT_RDWR` = 3; anything else is
    /// `EINVAL`.
    pub fn socket_shutdown(&self, fd: u32, how: i32) -> Result<(), Errno> {
        let how = Shutdown::from_discriminant(how).ok_or_else(|| {
            syscall_error(Errno::EINVAL, "socket_shutdown", "invalid shutdown mode")
        })?;
        let entry = self.socket_entry(fd, "socket_shutdown")?;
        let host_how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        let rc = unsafe { libc::shutdown(entry.raw_fd(), host_how) };
        if rc < 0 {
            return Err(handle_errno(get_errno(), "shutdown"));
        }
        Ok(())
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/close.2.html
    ///
    /// Removes the descriptor, drops its registrations from every poller of
    /// the cage, then releases the host socket.  A second close of the same
    /// descriptor is `EBADF`.
    pub fn socket_close(&self, fd: u32) -> Result<(), Errno> {
        let entry = self
            .sockets
            .lock()
            .close_virtualfd(fd)
            .map_err(|e| syscall_error(e, "socket_close", "Bad File Descriptor"))?;
        self.purge_registrations(fd);
        // Last reference closes the host socket (unless a blocking call in
        // flight still holds it; it closes when that call returns).
        drop(entry);
        log::trace!("cage {}: socket_close fd {}", self.cageid, fd);
        Ok(())
    }

    /// Reference to Linux: https://man7.org/linux/man-pages/man2/getsockname.2.html
    ///
    /// The address the socket is bound to, e.g. to learn the port picked
    /// after binding port 0.
    pub fn socket_local_address(&self, fd: u32) -> Result<SocketAddress, Errno> {
        let entry = self.socket_entry(fd, "socket_local_address")?;
        // SAFETY: sockaddr_storage is plain old data.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                entry.raw_fd(),
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(handle_errno(get_errno(), "getsockname"));
        }
        socket_address_from_host(&storage, len)
    }
}
