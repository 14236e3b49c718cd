use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::constants::net_const::{AF_INET, AF_INET6};

/// A socket address as the guest passes it.  The guest side is a C union of
/// `__wasi_socket_address_in_t` and `__wasi_socket_address_in6_t`; here the
/// family tag picks the variant and only that variant's fields exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    V4 {
        /// Octets in network order.
        address: [u8; 4],
        port: u16,
    },
    V6 {
        address: [u8; 16],
        port: u16,
        flow_info: u32,
        scope_id: u32,
    },
}

impl SocketAddress {
    /// The guest family tag (`AF_INET` / `AF_INET6` in guest numbering).
    pub fn family(&self) -> i32 {
        match self {
            SocketAddress::V4 { .. } => AF_INET,
            SocketAddress::V6 { .. } => AF_INET6,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            SocketAddress::V4 { port, .. } | SocketAddress::V6 { port, .. } => *port,
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => SocketAddress::V4 {
                address: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => SocketAddress::V6 {
                address: v6.ip().octets(),
                port: v6.port(),
                flow_info: v6.flowinfo(),
                scope_id: v6.scope_id(),
            },
        }
    }
}

impl From<SocketAddress> for SocketAddr {
    fn from(addr: SocketAddress) -> Self {
        match addr {
            SocketAddress::V4 { address, port } => {
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(address), port))
            }
            SocketAddress::V6 {
                address,
                port,
                flow_info,
                scope_id,
            } => SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(address),
                port,
                flow_info,
                scope_id,
            )),
        }
    }
}

/// Which readiness a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// `__wasi_poll_event_t`: what the guest registers, and what a wait hands
/// back for each ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollEvent {
    pub token: u32,
    pub readable: bool,
    pub writable: bool,
}

impl PollEvent {
    pub fn interest(&self) -> Interest {
        Interest {
            readable: self.readable,
            writable: self.writable,
        }
    }
}

/// `__wasi_ciovec_t`: one (offset, length) pair into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CioVec {
    pub buf: u32,
    pub buf_len: u32,
}

// ===== Wire layouts (little-endian guest memory) =====

/// `__wasi_poll_event_t`: token u32 @0, readable u8 @4, writable u8 @5.
pub const POLL_EVENT_SIZE: u32 = 8;
pub const POLL_EVENT_TOKEN_OFFSET: u32 = 0;
pub const POLL_EVENT_READABLE_OFFSET: u32 = 4;
pub const POLL_EVENT_WRITABLE_OFFSET: u32 = 5;

/// `__wasi_socket_address_in_t`: family i32 @0, address @4, port u16 @8.
pub const SOCKADDR_IN_SIZE: u32 = 12;
pub const SOCKADDR_IN_ADDRESS_OFFSET: u32 = 4;
pub const SOCKADDR_IN_PORT_OFFSET: u32 = 8;

/// `__wasi_socket_address_in6_t`: family u16 @0, port u16 @2, flow-info u32
/// @4, address @8, scope-id u32 @24.
pub const SOCKADDR_IN6_SIZE: u32 = 28;
pub const SOCKADDR_IN6_PORT_OFFSET: u32 = 2;
pub const SOCKADDR_IN6_FLOWINFO_OFFSET: u32 = 4;
pub const SOCKADDR_IN6_ADDRESS_OFFSET: u32 = 8;
pub const SOCKADDR_IN6_SCOPE_ID_OFFSET: u32 = 24;

/// `__wasi_socket_address_t` is the union of both.
pub const SOCKADDR_UNION_SIZE: u32 = 28;

/// `__wasi_ciovec_t`: buf u32 @0, buf_len u32 @4.
pub const CIOVEC_SIZE: u32 = 8;
