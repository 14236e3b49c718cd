// Poller unit tests
//
// Registration bookkeeping, level-triggered readiness, and what happens to
// registrations when descriptors or pollers go away.

use crate::tests::*;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sysdefs::constants::err_const::{Errno, ErrorKind};
use sysdefs::constants::net_const::{AF_INET, DEFAULT_PROTOCOL, SOCK_STREAM};
use sysdefs::data::net_struct::PollEvent;

use crate::config::CageConfig;

const BRIEF: Option<Duration> = Some(Duration::from_millis(50));

// === REGISTRATION ===

/// Test: a descriptor can be registered once per poller
#[test]
fn test_add_twice_is_eexist() {
    let cage = test_setup();
    let fd = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    let poll = cage.poller_create().unwrap();

    cage.poller_add(poll, fd, readable(1)).unwrap();
    let err = cage.poller_add(poll, fd, readable(2)).unwrap_err();
    assert_eq!(err, Errno::EEXIST);
    assert_eq!(err.kind(), ErrorKind::Handle);

    // A second poller is a separate set.
    let other = cage.poller_create().unwrap();
    assert_eq!(cage.poller_add(other, fd, readable(3)), Ok(()));
}

/// Test: registering a descriptor that is not open is EBADF
#[test]
fn test_add_bad_descriptor() {
    let cage = test_setup();
    let poll = cage.poller_create().unwrap();
    let err = cage.poller_add(poll, 5, readable(1)).unwrap_err();
    assert_eq!(err, Errno::EBADF);
    assert_eq!(err.kind(), ErrorKind::Handle);
}

/// Test: deleting a registration that never existed is ENOENT
/// Verifies that the other registrations are left alone
#[test]
fn test_delete_unregistered_keeps_others() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (mut client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(11)).unwrap();

    let err = cage.poller_delete(poll, listener).unwrap_err();
    assert_eq!(err, Errno::ENOENT);
    assert_eq!(err.kind(), ErrorKind::NotFound);

    client.write_all(b"x").unwrap();
    let events = cage.poller_wait(poll, 8, WAIT).unwrap();
    assert_eq!(events, vec![readable(11)]);

    cage.poller_delete(poll, fd).unwrap();
    assert_eq!(cage.poller_delete(poll, fd), Err(Errno::ENOENT));
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());
}

/// Test: modify needs an existing registration
#[test]
fn test_modify_unregistered_is_enoent() {
    let cage = test_setup();
    let fd = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    let poll = cage.poller_create().unwrap();
    assert_eq!(cage.poller_modify(poll, fd, readable(1)), Err(Errno::ENOENT));
}

/// Test: modify replaces both token and interest
#[test]
fn test_modify_changes_token_and_interest() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (_client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();

    // Nothing to read yet.
    cage.poller_add(poll, fd, readable(1)).unwrap();
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());

    // A connected socket with an empty send buffer is writable.
    cage.poller_modify(poll, fd, writable(2)).unwrap();
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![writable(2)]);
}

// === WAIT ===

/// Test: readiness is reported with the guest's token, level-triggered
/// Verifies that the event repeats until the data is drained
#[test]
fn test_readable_event_then_drained() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (mut client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(42)).unwrap();

    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());

    client.write_all(b"ping").unwrap();
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![readable(42)]);
    // Still unread, so still ready.
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![readable(42)]);

    assert_eq!(recv_bytes(&cage, fd, 16, 0).unwrap(), b"ping");
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());
}

/// Test: a pending connection makes the listener readable
#[test]
fn test_listener_readable_on_connect() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, listener, readable(7)).unwrap();

    let _client = std::net::TcpStream::connect(addr).unwrap();
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![readable(7)]);
    cage.socket_accept(listener, false).unwrap();
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());
}

/// Test: a hang-up is reported as readiness
#[test]
fn test_peer_close_is_readable() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(3)).unwrap();

    drop(client);
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![readable(3)]);
    assert_eq!(recv_bytes(&cage, fd, 8, 0).unwrap(), b"");
}

/// Test: one wait never returns more events than the capacity
#[test]
fn test_capacity_limits_events() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (_c1, a) = connected_pair(&cage, listener, addr);
    let (_c2, b) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, a, writable(100)).unwrap();
    cage.poller_add(poll, b, writable(200)).unwrap();

    assert_eq!(cage.poller_wait(poll, 1, WAIT).unwrap().len(), 1);

    let mut tokens: Vec<u32> = cage
        .poller_wait(poll, 8, WAIT)
        .unwrap()
        .iter()
        .map(|event| event.token)
        .collect();
    tokens.sort_unstable();
    assert_eq!(tokens, vec![100, 200]);
}

/// Test: the cage's per-wait maximum caps a larger capacity
#[test]
fn test_capacity_capped_by_config() {
    let cage = test_setup_with(CageConfig {
        max_events_per_wait: 1,
        ..CageConfig::default()
    });
    let (listener, addr) = listening_socket(&cage);
    let (_c1, a) = connected_pair(&cage, listener, addr);
    let (_c2, b) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, a, writable(1)).unwrap();
    cage.poller_add(poll, b, writable(2)).unwrap();

    assert_eq!(cage.poller_wait(poll, 64, WAIT).unwrap().len(), 1);
}

/// Test: interest in both directions reports both when both hold
#[test]
fn test_both_directions() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (mut client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    let both = PollEvent {
        token: 9,
        readable: true,
        writable: true,
    };
    cage.poller_add(poll, fd, both).unwrap();

    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![writable(9)]);
    client.write_all(b"x").unwrap();
    // Writable is immediate; wait until the byte has arrived too.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events = cage.poller_wait(poll, 8, WAIT).unwrap();
        if events == vec![both] || std::time::Instant::now() > deadline {
            assert_eq!(events, vec![both]);
            break;
        }
    }
}

/// Test: zero capacity is EINVAL
#[test]
fn test_wait_zero_capacity() {
    let cage = test_setup();
    let poll = cage.poller_create().unwrap();
    assert_eq!(cage.poller_wait(poll, 0, BRIEF), Err(Errno::EINVAL));
}

/// Test: an empty poller times out with zero events
#[test]
fn test_wait_times_out_empty() {
    let cage = test_setup();
    let poll = cage.poller_create().unwrap();
    let start = std::time::Instant::now();
    assert!(cage.poller_wait(poll, 4, BRIEF).unwrap().is_empty());
    assert!(start.elapsed() >= Duration::from_millis(40));
}

/// Test: a long wait does not hold up the rest of the cage
/// Verifies that another thread can register on the waiting poller and
/// create and close sockets while the wait is still sleeping
#[test]
fn test_calls_proceed_during_wait() {
    let cage = Arc::new(test_setup());
    let poll = cage.poller_create().unwrap();

    let waiter = {
        let cage = Arc::clone(&cage);
        thread::spawn(move || cage.poller_wait(poll, 8, Some(Duration::from_secs(2))))
    };
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    let fd = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    cage.poller_add(poll, fd, readable(1)).unwrap();
    let other = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    cage.poller_modify(poll, fd, writable(2)).unwrap();
    cage.socket_close(other).unwrap();
    cage.socket_close(fd).unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "calls waited {:?} behind poller_wait",
        start.elapsed()
    );

    // Whatever the wait saw, the closed socket is no longer registered.
    assert!(waiter.join().unwrap().is_ok());
    assert!(cage.poller_ref(poll, "test").unwrap().is_empty());
}

// === CLOSE / LIFETIME ===

/// Test: closing a registered descriptor removes it from the poller
/// Verifies that the token never shows up again, even when the id is reused
#[test]
fn test_close_purges_registration() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (mut client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(77)).unwrap();
    client.write_all(b"unread").unwrap();
    assert_eq!(cage.poller_wait(poll, 8, WAIT).unwrap(), vec![readable(77)]);

    cage.socket_close(fd).unwrap();
    assert!(!cage.poller_ref(poll, "test").unwrap().is_registered(fd));
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());

    // Same id, new socket, not registered.
    let (mut client2, reused) = connected_pair(&cage, listener, addr);
    assert_eq!(reused, fd);
    client2.write_all(b"x").unwrap();
    assert!(cage.poller_wait(poll, 8, BRIEF).unwrap().is_empty());
    assert_eq!(cage.poller_modify(poll, reused, readable(1)), Err(Errno::ENOENT));

    // The old peer sees the connection go away.
    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
}

/// Test: a closed poller is EBADF for every later call
#[test]
fn test_closed_poller_is_ebadf() {
    let cage = test_setup();
    let fd = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(1)).unwrap();

    cage.poller_close(poll).unwrap();
    assert_eq!(cage.poller_close(poll), Err(Errno::EBADF));
    assert_eq!(cage.poller_add(poll, fd, readable(1)), Err(Errno::EBADF));
    assert_eq!(cage.poller_modify(poll, fd, readable(1)), Err(Errno::EBADF));
    assert_eq!(cage.poller_delete(poll, fd), Err(Errno::EBADF));
    assert_eq!(cage.poller_wait(poll, 1, BRIEF), Err(Errno::EBADF));
    assert_eq!(cage.poller_count(), 0);

    // The socket outlives the poller.
    assert_eq!(cage.socket_close(fd), Ok(()));
}

/// Test: the poller limit is enforced and recovers after close
#[test]
fn test_poller_limit() {
    let cage = test_setup_with(CageConfig {
        max_pollers: 2,
        ..CageConfig::default()
    });
    assert_eq!(cage.poller_create(), Ok(0));
    assert_eq!(cage.poller_create(), Ok(1));
    assert_eq!(cage.poller_create(), Err(Errno::EMFILE));
    cage.poller_close(0).unwrap();
    assert_eq!(cage.poller_create(), Ok(0));
}

/// Test: poller and socket ids come from separate tables
#[test]
fn test_poller_ids_independent_of_sockets() {
    let cage = test_setup();
    let fd = cage.socket_create(AF_INET, SOCK_STREAM, DEFAULT_PROTOCOL).unwrap();
    let poll = cage.poller_create().unwrap();
    assert_eq!((fd, poll), (0, 0));
    // A poller id is not a socket.
    cage.poller_close(poll).unwrap();
    assert_eq!(cage.socket_close(fd), Ok(()));
}

/// Test: teardown releases every poller and socket of the cage
#[test]
fn test_teardown_releases_everything() {
    let cage = test_setup();
    let (listener, addr) = listening_socket(&cage);
    let (mut client, fd) = connected_pair(&cage, listener, addr);
    let poll = cage.poller_create().unwrap();
    cage.poller_add(poll, fd, readable(1)).unwrap();

    cage.teardown();
    assert_eq!(cage.socket_count(), 0);
    assert_eq!(cage.poller_count(), 0);
    assert_eq!(cage.poller_wait(poll, 1, BRIEF), Err(Errno::EBADF));

    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}
