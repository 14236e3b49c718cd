//! This file contains the Cage structure, the per-guest context every call
//! runs against, and the `CageTable` that lets one host process run many
//! guests side by side.
//!
//! A cage owns two handle tables, one for sockets and one for pollers.  Ids in
//! one cage mean nothing in another: two cages both hand out descriptor 0
//! first, and neither can reach the other's sockets.
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fdtables::FdTable;
// Uses spinlocks first (for short waits) and parks threads when blocking.
use parking_lot::Mutex;
use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::constants::net_const::{SocketDomain, SocketType};

use crate::config::CageConfig;
use crate::poller::Poller;

/// What a socket descriptor refers to.
#[derive(Debug, Clone)]
pub struct SocketEntry {
    // The host socket.  Shared so an in-flight blocking send/recv keeps it
    // open even if the guest closes the descriptor meanwhile; the last
    // holder closes it.
    pub hostfd: Arc<OwnedFd>,
    pub domain: SocketDomain,
    pub socktype: SocketType,
    // Guest-visible mode.  The host socket is always non-blocking.
    pub nonblocking: bool,
}

impl SocketEntry {
    pub fn new(hostfd: OwnedFd, domain: SocketDomain, socktype: SocketType) -> Self {
        SocketEntry {
            hostfd: Arc::new(hostfd),
            domain,
            socktype,
            nonblocking: false,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.hostfd.as_raw_fd()
    }
}

pub type PollerRef = Arc<Poller>;

#[derive(Debug)]
pub struct Cage {
    // Identifying ID number for this cage
    pub cageid: u64,
    pub config: CageConfig,
    // Lock order: `sockets` before a poller's registration map.  A wait holds
    // no lock while it sleeps.
    pub(crate) sockets: Mutex<FdTable<SocketEntry>>,
    pub(crate) pollers: Mutex<FdTable<PollerRef>>,
}

impl Cage {
    pub fn new(cageid: u64, config: CageConfig) -> Result<Self, Errno> {
        config.validate()?;
        Ok(Cage {
            cageid,
            sockets: Mutex::new(FdTable::with_max(config.max_descriptors)),
            pollers: Mutex::new(FdTable::with_max(config.max_pollers)),
            config,
        })
    }

    /// Number of open socket descriptors.
    pub fn socket_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Number of open pollers.
    pub fn poller_count(&self) -> usize {
        self.pollers.lock().len()
    }

    /// Clones the socket entry behind `fd` out of the table, so the caller can
    /// use the host socket without holding the table lock.
    pub(crate) fn socket_entry(&self, fd: u32, syscall: &str) -> Result<SocketEntry, Errno> {
        self.sockets
            .lock()
            .translate_virtual_fd(fd)
            .cloned()
            .map_err(|e| syscall_error(e, syscall, "Bad File Descriptor"))
    }

    pub(crate) fn poller_ref(&self, poll: u32, syscall: &str) -> Result<PollerRef, Errno> {
        self.pollers
            .lock()
            .translate_virtual_fd(poll)
            .cloned()
            .map_err(|e| syscall_error(e, syscall, "Bad poller handle"))
    }

    /// Drops `fd` from every poller of this cage.
    pub(crate) fn purge_registrations(&self, fd: u32) {
        let pollers: Vec<PollerRef> = self
            .pollers
            .lock()
            .iter()
            .map(|(_, poller)| Arc::clone(poller))
            .collect();
        for poller in pollers {
            if poller.purge(fd) {
                log::trace!("cage {}: purged fd {} from a poller", self.cageid, fd);
            }
        }
    }

    /// Releases everything the cage holds: every poller first, so no
    /// registration outlives its socket, then every socket.
    pub fn teardown(&self) {
        let pollers = self.pollers.lock().empty_fdtable();
        for (_, poller) in &pollers {
            poller.close();
        }
        let sockets = self.sockets.lock().empty_fdtable();
        log::debug!(
            "cage {}: teardown released {} pollers and {} sockets",
            self.cageid,
            pollers.len(),
            sockets.len()
        );
    }
}

/// All live cages of this host process, by cage id.
#[derive(Debug, Default)]
pub struct CageTable {
    cages: DashMap<u64, Arc<Cage>>,
}

impl CageTable {
    pub fn new() -> Self {
        CageTable::default()
    }

    /// Creates and registers cage `cageid`.  `EEXIST` if the id is taken.
    pub fn add_cage(&self, cageid: u64, config: CageConfig) -> Result<Arc<Cage>, Errno> {
        match self.cages.entry(cageid) {
            Entry::Occupied(_) => Err(syscall_error(
                Errno::EEXIST,
                "add_cage",
                "cage id already in use",
            )),
            Entry::Vacant(slot) => {
                let cage = Arc::new(Cage::new(cageid, config)?);
                slot.insert(Arc::clone(&cage));
                log::debug!("cage {} added", cageid);
                Ok(cage)
            }
        }
    }

    pub fn get_cage(&self, cageid: u64) -> Option<Arc<Cage>> {
        self.cages.get(&cageid).map(|cage| Arc::clone(cage.value()))
    }

    /// Unregisters cage `cageid` and releases everything it holds.
    pub fn remove_cage(&self, cageid: u64) -> Option<Arc<Cage>> {
        let (_, cage) = self.cages.remove(&cageid)?;
        cage.teardown();
        log::debug!("cage {} removed", cageid);
        Some(cage)
    }

    /// Removes every cage, e.g. at host shutdown.
    pub fn cagetable_clear(&self) {
        let ids: Vec<u64> = self.cages.iter().map(|entry| *entry.key()).collect();
        for cageid in ids {
            self.remove_cage(cageid);
        }
    }

    pub fn len(&self) -> usize {
        self.cages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cages.is_empty()
    }
}
