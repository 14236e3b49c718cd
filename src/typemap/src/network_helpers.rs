//! Network-related helpers
//!
//! This module decodes the guest's `__wasi_socket_address_t` union into a
//! [`SocketAddress`], encodes one back, and converts between `SocketAddress`
//! and the host's `sockaddr_storage` so socket calls can hand it to `libc`.
//!
//! Ports cross the guest boundary as plain little-endian integers and are
//! flipped to network order only when a host `sockaddr` is built.  Address
//! octets are already in network order on both sides.
use std::mem;

use libc::{sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::constants::net_const::{AF_INET, AF_INET6};
use sysdefs::data::net_struct::{
    SocketAddress, SOCKADDR_IN6_ADDRESS_OFFSET, SOCKADDR_IN6_FLOWINFO_OFFSET,
    SOCKADDR_IN6_PORT_OFFSET, SOCKADDR_IN6_SCOPE_ID_OFFSET, SOCKADDR_IN6_SIZE,
    SOCKADDR_IN_ADDRESS_OFFSET, SOCKADDR_IN_PORT_OFFSET, SOCKADDR_IN_SIZE,
    SOCKADDR_UNION_SIZE,
};

use crate::guest_memory::GuestMemory;

/// Reads a guest socket address at `offset`.
///
/// The family tag (low 16 bits at offset 0, shared by both variants) is read
/// first; only the fields of the variant it names are read after that, and
/// only that variant's size has to be in bounds.  An IPv4 record must carry
/// its family as the whole 32-bit field.
///
/// ## Returns:
/// `EAFNOSUPPORT` for a tag that is neither `AF_INET` nor `AF_INET6`,
/// `EFAULT` if the record does not fit in memory.
pub fn read_socket_address(memory: &GuestMemory, offset: u32) -> Result<SocketAddress, Errno> {
    let family = i32::from(memory.read_u16(offset)?);
    match family {
        AF_INET => {
            let raw = memory.deref_buffer(offset, SOCKADDR_IN_SIZE)?;
            // The v4 family is a full i32; stray high bits are not a tag.
            if memory.read_i32(offset)? != AF_INET {
                return Err(syscall_error(
                    Errno::EAFNOSUPPORT,
                    "read_socket_address",
                    "malformed IPv4 family field",
                ));
            }
            let a = SOCKADDR_IN_ADDRESS_OFFSET as usize;
            let mut address = [0u8; 4];
            address.copy_from_slice(&raw[a..a + 4]);
            Ok(SocketAddress::V4 {
                address,
                port: memory.read_u16(offset + SOCKADDR_IN_PORT_OFFSET)?,
            })
        }
        AF_INET6 => {
            let raw = memory.deref_buffer(offset, SOCKADDR_IN6_SIZE)?;
            let a = SOCKADDR_IN6_ADDRESS_OFFSET as usize;
            let mut address = [0u8; 16];
            address.copy_from_slice(&raw[a..a + 16]);
            Ok(SocketAddress::V6 {
                address,
                port: memory.read_u16(offset + SOCKADDR_IN6_PORT_OFFSET)?,
                flow_info: memory.read_u32(offset + SOCKADDR_IN6_FLOWINFO_OFFSET)?,
                scope_id: memory.read_u32(offset + SOCKADDR_IN6_SCOPE_ID_OFFSET)?,
            })
        }
        _ => Err(syscall_error(
            Errno::EAFNOSUPPORT,
            "read_socket_address",
            "unknown address family tag",
        )),
    }
}

/// Writes `address` into the guest union at `offset`.  The whole union must
/// be in bounds; bytes past the variant are zeroed.
pub fn write_socket_address(
    memory: &mut GuestMemory,
    offset: u32,
    address: &SocketAddress,
) -> Result<(), Errno> {
    memory.deref_buffer_mut(offset, SOCKADDR_UNION_SIZE)?.fill(0);
    match address {
        SocketAddress::V4 { address, port } => {
            memory.write_i32(offset, AF_INET)?;
            memory
                .deref_buffer_mut(offset + SOCKADDR_IN_ADDRESS_OFFSET, 4)?
                .copy_from_slice(address);
            memory.write_u16(offset + SOCKADDR_IN_PORT_OFFSET, *port)?;
        }
        SocketAddress::V6 {
            address,
            port,
            flow_info,
            scope_id,
        } => {
            memory.write_u16(offset, AF_INET6 as u16)?;
            memory.write_u16(offset + SOCKADDR_IN6_PORT_OFFSET, *port)?;
            memory.write_u32(offset + SOCKADDR_IN6_FLOWINFO_OFFSET, *flow_info)?;
            memory
                .deref_buffer_mut(offset + SOCKADDR_IN6_ADDRESS_OFFSET, 16)?
                .copy_from_slice(address);
            memory.write_u32(offset + SOCKADDR_IN6_SCOPE_ID_OFFSET, *scope_id)?;
        }
    }
    Ok(())
}

/// Builds the host `sockaddr` for `address`, with the port in network order.
pub fn socket_address_to_host(address: &SocketAddress) -> (sockaddr_storage, socklen_t) {
    // SAFETY: sockaddr_storage is plain old data; all-zero is a valid value.
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match address {
        SocketAddress::V4 { address, port } => {
            // SAFETY: sockaddr_storage is large and aligned enough for any sockaddr.
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = port.to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(*address);
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddress::V6 {
            address,
            port,
            flow_info,
            scope_id,
        } => {
            // SAFETY: as above.
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = port.to_be();
            sa.sin6_addr.s6_addr = *address;
            sa.sin6_flowinfo = *flow_info;
            sa.sin6_scope_id = *scope_id;
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Reads back a host `sockaddr` filled in by `accept` / `getsockname`.
///
/// ## Returns:
/// `EAFNOSUPPORT` for any family other than IPv4 / IPv6 (e.g., a UNIX peer).
pub fn socket_address_from_host(
    storage: &sockaddr_storage,
    len: socklen_t,
) -> Result<SocketAddress, Errno> {
    match i32::from(storage.ss_family) {
        libc::AF_INET if len as usize >= mem::size_of::<sockaddr_in>() => {
            // SAFETY: the family says the storage holds a sockaddr_in.
            let sa = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            Ok(SocketAddress::V4 {
                address: sa.sin_addr.s_addr.to_ne_bytes(),
                port: u16::from_be(sa.sin_port),
            })
        }
        libc::AF_INET6 if len as usize >= mem::size_of::<sockaddr_in6>() => {
            // SAFETY: the family says the storage holds a sockaddr_in6.
            let sa = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            Ok(SocketAddress::V6 {
                address: sa.sin6_addr.s6_addr,
                port: u16::from_be(sa.sin6_port),
                flow_info: sa.sin6_flowinfo,
                scope_id: sa.sin6_scope_id,
            })
        }
        family => {
            log::debug!("socket_address_from_host: host family {} not representable", family);
            Err(Errno::EAFNOSUPPORT)
        }
    }
}
