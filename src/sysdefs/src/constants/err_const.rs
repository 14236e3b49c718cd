//! The guest-visible error space.
//!
//! Codes are numbered like WASI preview1 errno, which is what guest libcs
//! expect.  Host errno values never reach a guest directly: they go through
//! [`Errno::from_host`], which matches on the host's symbolic `libc` names so
//! the result is the same on every host we build for.
use crate::reversible_enum;

reversible_enum! {
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
    /// Errno values for guest calls
    #[non_exhaustive]
    pub enum Errno {
        #[error("no error")]
        ESUCCESS = 0,
        #[error("argument list too long")]
        E2BIG = 1,
        #[error("permission denied")]
        EACCES = 2,
        #[error("address in use")]
        EADDRINUSE = 3,
        #[error("address not available")]
        EADDRNOTAVAIL = 4,
        #[error("address family not supported")]
        EAFNOSUPPORT = 5,
        #[error("resource unavailable, try again")]
        EAGAIN = 6,
        #[error("connection already in progress")]
        EALREADY = 7,
        #[error("bad file descriptor")]
        EBADF = 8,
        #[error("bad message")]
        EBADMSG = 9,
        #[error("device or resource busy")]
        EBUSY = 10,
        #[error("operation canceled")]
        ECANCELED = 11,
        #[error("no child processes")]
        ECHILD = 12,
        #[error("connection aborted")]
        ECONNABORTED = 13,
        #[error("connection refused")]
        ECONNREFUSED = 14,
        #[error("connection reset")]
        ECONNRESET = 15,
        #[error("resource deadlock would occur")]
        EDEADLK = 16,
        #[error("destination address required")]
        EDESTADDRREQ = 17,
        #[error("argument out of domain")]
        EDOM = 18,
        #[error("disk quota exceeded")]
        EDQUOT = 19,
        #[error("already exists")]
        EEXIST = 20,
        #[error("bad address")]
        EFAULT = 21,
        #[error("file too large")]
        EFBIG = 22,
        #[error("host is unreachable")]
        EHOSTUNREACH = 23,
        #[error("identifier removed")]
        EIDRM = 24,
        #[error("illegal byte sequence")]
        EILSEQ = 25,
        #[error("operation in progress")]
        EINPROGRESS = 26,
        #[error("interrupted function")]
        EINTR = 27,
        #[error("invalid argument")]
        EINVAL = 28,
        #[error("I/O error")]
        EIO = 29,
        #[error("socket is connected")]
        EISCONN = 30,
        #[error("is a directory")]
        EISDIR = 31,
        #[error("too many levels of symbolic links")]
        ELOOP = 32,
        #[error("too many open descriptors")]
        EMFILE = 33,
        #[error("too many links")]
        EMLINK = 34,
        #[error("message too large")]
        EMSGSIZE = 35,
        #[error("multihop attempted")]
        EMULTIHOP = 36,
        #[error("name too long")]
        ENAMETOOLONG = 37,
        #[error("network is down")]
        ENETDOWN = 38,
        #[error("connection aborted by network")]
        ENETRESET = 39,
        #[error("network unreachable")]
        ENETUNREACH = 40,
        #[error("too many descriptors open in system")]
        ENFILE = 41,
        #[error("no buffer space available")]
        ENOBUFS = 42,
        #[error("no such device")]
        ENODEV = 43,
        #[error("no such entry")]
        ENOENT = 44,
        #[error("executable format error")]
        ENOEXEC = 45,
        #[error("no locks available")]
        ENOLCK = 46,
        #[error("link has been severed")]
        ENOLINK = 47,
        #[error("not enough space")]
        ENOMEM = 48,
        #[error("no message of the desired type")]
        ENOMSG = 49,
        #[error("protocol not available")]
        ENOPROTOOPT = 50,
        #[error("no space left on device")]
        ENOSPC = 51,
        #[error("function not supported")]
        ENOSYS = 52,
        #[error("the socket is not connected")]
        ENOTCONN = 53,
        #[error("not a directory")]
        ENOTDIR = 54,
        #[error("directory not empty")]
        ENOTEMPTY = 55,
        #[error("state not recoverable")]
        ENOTRECOVERABLE = 56,
        #[error("not a socket")]
        ENOTSOCK = 57,
        #[error("not supported")]
        ENOTSUP = 58,
        #[error("inappropriate I/O control operation")]
        ENOTTY = 59,
        #[error("no such device or address")]
        ENXIO = 60,
        #[error("value too large to be stored in data type")]
        EOVERFLOW = 61,
        #[error("previous owner died")]
        EOWNERDEAD = 62,
        #[error("operation not permitted")]
        EPERM = 63,
        #[error("broken pipe")]
        EPIPE = 64,
        #[error("protocol error")]
        EPROTO = 65,
        #[error("protocol not supported")]
        EPROTONOSUPPORT = 66,
        #[error("protocol wrong type for socket")]
        EPROTOTYPE = 67,
        #[error("result too large")]
        ERANGE = 68,
        #[error("read-only file system")]
        EROFS = 69,
        #[error("invalid seek")]
        ESPIPE = 70,
        #[error("no such process")]
        ESRCH = 71,
        #[error("stale handle")]
        ESTALE = 72,
        #[error("connection timed out")]
        ETIMEDOUT = 73,
        #[error("text file busy")]
        ETXTBSY = 74,
        #[error("cross-device link")]
        EXDEV = 75,
        #[error("capabilities insufficient")]
        ENOTCAPABLE = 76,
    }
}

/// Coarse classes a caller can branch on without knowing every code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown, stale or exhausted descriptor / poller handles.
    Handle,
    /// Address in use, unavailable, or of the wrong family.
    Address,
    /// Domain, type or protocol the host or the bridge does not offer.
    Capability,
    /// The operation cannot make progress now; retry after a readiness event.
    WouldBlock,
    Permission,
    NotFound,
    /// Malformed arguments, including guest pointers outside linear memory.
    InvalidArgument,
    /// Everything the host reports that is none of the above.
    Io,
}

impl Errno {
    /// The value handed back across the guest ABI.
    pub fn as_u32(self) -> u32 {
        self.discriminant() as u32
    }

    pub fn kind(self) -> ErrorKind {
        use Errno::*;
        match self {
            // EEXIST is a duplicate registration of an existing handle.
            EBADF | ENOTSOCK | EMFILE | ENFILE | ESTALE | EEXIST => ErrorKind::Handle,
            EADDRINUSE | EADDRNOTAVAIL | EAFNOSUPPORT | EDESTADDRREQ => ErrorKind::Address,
            ENOTSUP | EPROTONOSUPPORT | EPROTOTYPE | ENOPROTOOPT | ENOTCAPABLE | ENOSYS => {
                ErrorKind::Capability
            }
            EAGAIN | EINPROGRESS | EALREADY => ErrorKind::WouldBlock,
            EACCES | EPERM => ErrorKind::Permission,
            ENOENT | ESRCH | ENXIO | ENODEV => ErrorKind::NotFound,
            EINVAL | EFAULT | E2BIG | EMSGSIZE | ERANGE | EOVERFLOW | ENAMETOOLONG => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::Io,
        }
    }

    /// Maps a raw host errno onto the guest code space.  Total: anything the
    /// table does not know becomes `EIO`.
    pub fn from_host(raw: i32) -> Errno {
        use Errno::*;
        match raw {
            0 => ESUCCESS,
            libc::E2BIG => E2BIG,
            libc::EACCES => EACCES,
            libc::EADDRINUSE => EADDRINUSE,
            libc::EADDRNOTAVAIL => EADDRNOTAVAIL,
            libc::EAFNOSUPPORT => EAFNOSUPPORT,
            libc::EAGAIN => EAGAIN,
            libc::EALREADY => EALREADY,
            libc::EBADF => EBADF,
            libc::EBADMSG => EBADMSG,
            libc::EBUSY => EBUSY,
            libc::ECANCELED => ECANCELED,
            libc::ECHILD => ECHILD,
            libc::ECONNABORTED => ECONNABORTED,
            libc::ECONNREFUSED => ECONNREFUSED,
            libc::ECONNRESET => ECONNRESET,
            libc::EDEADLK => EDEADLK,
            libc::EDESTADDRREQ => EDESTADDRREQ,
            libc::EDOM => EDOM,
            libc::EDQUOT => EDQUOT,
            libc::EEXIST => EEXIST,
            libc::EFAULT => EFAULT,
            libc::EFBIG => EFBIG,
            libc::EHOSTUNREACH => EHOSTUNREACH,
            libc::EIDRM => EIDRM,
            libc::EILSEQ => EILSEQ,
            libc::EINPROGRESS => EINPROGRESS,
            libc::EINTR => EINTR,
            libc::EINVAL => EINVAL,
            libc::EIO => EIO,
            libc::EISCONN => EISCONN,
            libc::EISDIR => EISDIR,
            libc::ELOOP => ELOOP,
            libc::EMFILE => EMFILE,
            libc::EMLINK => EMLINK,
            libc::EMSGSIZE => EMSGSIZE,
            libc::EMULTIHOP => EMULTIHOP,
            libc::ENAMETOOLONG => ENAMETOOLONG,
            libc::ENETDOWN => ENETDOWN,
            libc::ENETRESET => ENETRESET,
            libc::ENETUNREACH => ENETUNREACH,
            libc::ENFILE => ENFILE,
            libc::ENOBUFS => ENOBUFS,
            libc::ENODEV => ENODEV,
            libc::ENOENT => ENOENT,
            libc::ENOEXEC => ENOEXEC,
            libc::ENOLCK => ENOLCK,
            libc::ENOLINK => ENOLINK,
            libc::ENOMEM => ENOMEM,
            libc::ENOMSG => ENOMSG,
            libc::ENOPROTOOPT => ENOPROTOOPT,
            libc::ENOSPC => ENOSPC,
            libc::ENOSYS => ENOSYS,
            libc::ENOTCONN => ENOTCONN,
            libc::ENOTDIR => ENOTDIR,
            libc::ENOTEMPTY => ENOTEMPTY,
            libc::ENOTRECOVERABLE => ENOTRECOVERABLE,
            libc::ENOTSOCK => ENOTSOCK,
            libc::ENOTSUP => ENOTSUP,
            libc::ENOTTY => ENOTTY,
            libc::ENXIO => ENXIO,
            libc::EOVERFLOW => EOVERFLOW,
            libc::EOWNERDEAD => EOWNERDEAD,
            libc::EPERM => EPERM,
            libc::EPIPE => EPIPE,
            libc::EPROTO => EPROTO,
            libc::EPROTONOSUPPORT => EPROTONOSUPPORT,
            libc::EPROTOTYPE => EPROTOTYPE,
            libc::ERANGE => ERANGE,
            libc::EROFS => EROFS,
            libc::ESPIPE => ESPIPE,
            libc::ESRCH => ESRCH,
            libc::ESTALE => ESTALE,
            libc::ETIMEDOUT => ETIMEDOUT,
            libc::ETXTBSY => ETXTBSY,
            libc::EXDEV => EXDEV,
            // Aliases on Linux, distinct values elsewhere.
            e if e == libc::EWOULDBLOCK => EAGAIN,
            e if e == libc::EOPNOTSUPP => ENOTSUP,
            e if e == libc::ESOCKTNOSUPPORT => ENOTSUP,
            _ => EIO,
        }
    }
}

/// The errno of the last failing host call on this thread.
pub fn get_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Translates the errno of a failed host call and logs it against the call
/// that produced it.
pub fn handle_errno(e: i32, syscall: &str) -> Errno {
    let errno = Errno::from_host(e);
    if errno == Errno::EIO && e != libc::EIO {
        log::warn!("{}: unmapped host errno {}, reporting EIO", syscall, e);
    } else {
        log::debug!("{}: host errno {} -> {:?}", syscall, e, errno);
    }
    errno
}

/// Logs a failure detected by the bridge itself and hands the code back, so
/// callers can write `return Err(syscall_error(..))`.
pub fn syscall_error(e: Errno, syscall: &str, message: &str) -> Errno {
    log::debug!("{}: {} ({:?})", syscall, message, e);
    e
}
