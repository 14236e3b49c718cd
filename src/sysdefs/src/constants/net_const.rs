//! Networking constants as the guest sees them.
//!
//! These are *not* the host's `AF_*` / `SOCK_*` values.  The guest ABI has
//! its own small numbering, and `rawposix` translates to `libc` right before
//! a host call.
use crate::reversible_enum;

// ===== Domains (`__wasi_socket_domain_t`) =====
pub const AF_INET: i32 = 1;
pub const AF_INET6: i32 = 2;
pub const AF_UNIX: i32 = 3;
pub const AF_PACKET: i32 = 4;
pub const AF_VSOCK: i32 = 5;

// ===== Types (`__wasi_socket_type_t`) =====
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_SEQPACKET: i32 = 3;
pub const SOCK_RAW: i32 = 4;

// ===== Protocols (`__wasi_socket_protocol_t`) =====
pub const DEFAULT_PROTOCOL: i32 = 0;
pub const ICMPV4: i32 = 1;
pub const ICMPV6: i32 = 2;
pub const TCP: i32 = 3;
pub const UDP: i32 = 4;

// ===== Shutdown (`__wasi_shutdown_t`) =====
pub const SHUT_RD: i32 = 1;
pub const SHUT_WR: i32 = 2;
pub const SHUT_RDWR: i32 = 3;

// ===== Recv flags (`__wasi_riflags_t`) =====
pub const MSG_PEEK: u16 = 1;
pub const MSG_WAITALL: u16 = 2;
pub const RECV_FLAGS_MASK: u16 = MSG_PEEK | MSG_WAITALL;

// ===== Send flags (`__wasi_siflags_t`) =====
// No send flag is defined yet; any set bit is rejected.
pub const SEND_FLAGS_MASK: u16 = 0;

reversible_enum! {
    #[repr(i32)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Communication domain a socket was created in.
    pub enum SocketDomain {
        Inet = 1,
        Inet6 = 2,
        Unix = 3,
        Packet = 4,
        Vsock = 5,
    }
}

reversible_enum! {
    #[repr(i32)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum SocketType {
        Stream = 1,
        Datagram = 2,
        SeqPacket = 3,
        Raw = 4,
    }
}

reversible_enum! {
    #[repr(i32)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum SocketProtocol {
        Default = 0,
        Icmpv4 = 1,
        Icmpv6 = 2,
        Tcp = 3,
        Udp = 4,
    }
}

reversible_enum! {
    #[repr(i32)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Shutdown {
        Read = 1,
        Write = 2,
        Both = 3,
    }
}

impl SocketType {
    /// Whether sockets of this type keep a queue of pending connections, and
    /// so can `listen` / `accept`.
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, SocketType::Stream | SocketType::SeqPacket)
    }
}
