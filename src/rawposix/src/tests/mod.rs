// RawPOSIX Test Suite
//
// Unit tests for the cage's socket and poller calls.  They run against real
// host sockets on the loopback interface, with std sockets playing the remote
// peer, so no guest engine is needed.
//
// Every test builds its own cage, so there is no shared state to serialize.

mod poll_tests; // Poller tests

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use sysdefs::constants::err_const::Errno;
use sysdefs::constants::net_const::{AF_INET, DEFAULT_PROTOCOL, SOCK_STREAM};
use sysdefs::data::net_struct::{PollEvent, SocketAddress};

use typemap::guest_memory::GuestIoVecs;

use crate::cage::Cage;
use crate::config::CageConfig;

/// Test cage ID used for all tests
pub const TEST_CAGE_ID: u64 = 999;

/// Upper bound for waits that are expected to succeed.
pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Setup function for tests
/// Installs the test logger and returns a fresh cage with default limits
pub fn test_setup() -> Cage {
    test_setup_with(CageConfig::default())
}

pub fn test_setup_with(config: CageConfig) -> Cage {
    let _ = env_logger::builder().is_test(true).try_init();
    Cage::new(TEST_CAGE_ID, config).unwrap()
}

pub const LOOPBACK_ANY_PORT: SocketAddress = SocketAddress::V4 {
    address: [127, 0, 0, 1],
    port: 0,
};

/// Creates a listening IPv4 stream socket on an ephemeral loopback port and
/// returns (descriptor, host address to connect to).
pub fn listening_socket(cage: &Cage) -> (u32, SocketAddr) {
    let fd = cage
        .socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL)
        .unwrap();
    cage.socket_bind(fd, &LOOPBACK_ANY_PORT).unwrap();
    cage.socket_listen(fd, 16).unwrap();
    let local = cage.socket_local_address(fd).unwrap();
    (fd, SocketAddr::from(local))
}

/// Connects a std client to `listener` and accepts it inside the cage.
/// Returns (client stream, accepted descriptor).
pub fn connected_pair(cage: &Cage, listener: u32, addr: SocketAddr) -> (TcpStream, u32) {
    let client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(WAIT).unwrap();
    let (fd, _) = accept_soon(cage, listener, false);
    (client, fd)
}

/// Accepts on `listener`, retrying `EAGAIN` until a connection that is
/// already on its way has landed in the queue.
pub fn accept_soon(cage: &Cage, listener: u32, want_address: bool) -> (u32, Option<SocketAddress>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match cage.socket_accept(listener, want_address) {
            Err(Errno::EAGAIN) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(2));
            }
            other => return other.unwrap(),
        }
    }
}

/// Sends `data` as a single buffer.
pub fn send_bytes(cage: &Cage, fd: u32, data: &[u8]) -> Result<u32, Errno> {
    let mut copy = data.to_vec();
    let mut bufs: [&mut [u8]; 1] = [copy.as_mut_slice()];
    let iovs = GuestIoVecs::from_buffers(&mut bufs);
    cage.socket_send(fd, &iovs, 0)
}

/// Receives at most `len` bytes into a single buffer.
pub fn recv_bytes(cage: &Cage, fd: u32, len: usize, flags: u16) -> Result<Vec<u8>, Errno> {
    let mut buf = vec![0u8; len];
    let received = {
        let mut bufs: [&mut [u8]; 1] = [buf.as_mut_slice()];
        let mut iovs = GuestIoVecs::from_buffers(&mut bufs);
        cage.socket_recv(fd, &mut iovs, flags)?
    };
    buf.truncate(received as usize);
    Ok(buf)
}

pub fn readable(token: u32) -> PollEvent {
    PollEvent {
        token,
        readable: true,
        writable: false,
    }
}

pub fn writable(token: u32) -> PollEvent {
    PollEvent {
        token,
        readable: false,
        writable: true,
    }
}
