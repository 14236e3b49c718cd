//! This module provides an fdtable, an abstraction which makes it easy
//! to separate out descriptors for different cages.  Different cages are not
//! permitted to see or access each others' descriptors, and each cage numbers
//! its descriptors on its own (two cages will both hand out 0 first).
//!
//! Unlike a process-global table, an [`FdTable`] is a plain value: the cage
//! that owns it decides how it is locked and when it goes away.  The table is
//! generic over the entry it stores, so the same code backs the socket table
//! and the poller table of a cage.
//!
//! Virtual fds are always the lowest free number, like Linux does it, and
//! the table refuses to grow past its per-cage maximum.
//!
//! ```text
//!       EMFILE The per-process limit on the number of open file
//!              descriptors has been reached.
//! ```

// ********************** CLIPPY DISCUSSION **************************** //
// We set base lints to give the fullest, most pedantic feedback possible.
// Though we prefer that they are just warnings during development so that build-denial
// is only enforced in CI.
//
#![warn(
    // `clippy::all` is already on by default.
    clippy::all,

    // It's always good to write as much documentation as possible
    missing_docs,

    // > clippy::pedantic lints which are rather strict or might have false positives
    clippy::pedantic,
)]
// I do a fair amount of casting to usize so that I can index values in arrays.
// I can't annotate them all separately because I can't assign attributes to
// expressions.  So I'll turn this off.
#![allow(clippy::cast_possible_truncation)]

// ********************* END CLIPPY DISCUSSION ************************* //

pub use sysdefs::constants::err_const::Errno;
pub use sysdefs::constants::lind_platform_const::FD_PER_PROCESS_MAX;

/// A table of virtual descriptors for one cage.
///
/// Slot `n` holds the entry for virtual fd `n`.  The vector only grows as far
/// as the highest fd handed out so far, so small cages stay small.
#[derive(Debug, Clone)]
pub struct FdTable<T> {
    entries: Vec<Option<T>>,
    // Number of `Some` slots, so `len` does not have to walk the vector.
    count: usize,
    max_fds: u32,
}

impl<T> Default for FdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FdTable<T> {
    /// An empty table with the platform default limit
    /// ([`FD_PER_PROCESS_MAX`]).
    #[must_use]
    pub fn new() -> Self {
        Self::with_max(FD_PER_PROCESS_MAX)
    }

    /// An empty table that hands out at most `max_fds` descriptors at once.
    #[must_use]
    pub fn with_max(max_fds: u32) -> Self {
        FdTable {
            entries: Vec::new(),
            count: 0,
            max_fds,
        }
    }

    /// The per-cage limit this table enforces.
    #[must_use]
    pub fn max_fds(&self) -> u32 {
        self.max_fds
    }

    /// Stores `entry` under the lowest unused virtual fd and returns that fd.
    ///
    /// Picking the number and inserting happen in one step, so no other
    /// caller can observe (or take) the slot in between.
    ///
    /// # Errors
    ///
    /// `EMFILE` when the table already holds `max_fds` entries.  The entry is
    /// dropped in that case.
    pub fn get_unused_virtual_fd(&mut self, entry: T) -> Result<u32, Errno> {
        // Check the fds in order.  Freed slots below the high water mark get
        // reused before the vector grows.
        if let Some(fdcandidate) = self.entries.iter().position(Option::is_none) {
            self.entries[fdcandidate] = Some(entry);
            self.count += 1;
            return Ok(fdcandidate as u32);
        }

        // I must have checked all fds and failed to find one open.  Grow, if
        // the limit allows it.
        let fdcandidate = self.entries.len();
        if fdcandidate >= self.max_fds as usize {
            return Err(Errno::EMFILE);
        }
        self.entries.push(Some(entry));
        self.count += 1;
        Ok(fdcandidate as u32)
    }

    /// Looks up the entry behind a virtual fd.
    ///
    /// # Errors
    ///
    /// `EBADF` if the fd is out of range or not open.
    pub fn translate_virtual_fd(&self, virtualfd: u32) -> Result<&T, Errno> {
        // Below condition checks if the virtualfd is out of bounds and if yes it throws an error
        self.entries
            .get(virtualfd as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::EBADF)
    }

    /// Like [`FdTable::translate_virtual_fd`], but lets the caller update the
    /// entry in place (e.g., to flip a flag).
    ///
    /// # Errors
    ///
    /// `EBADF` if the fd is out of range or not open.
    pub fn translate_virtual_fd_mut(&mut self, virtualfd: u32) -> Result<&mut T, Errno> {
        self.entries
            .get_mut(virtualfd as usize)
            .and_then(Option::as_mut)
            .ok_or(Errno::EBADF)
    }

    /// Removes a virtual fd and hands its entry back to the caller, who is now
    /// responsible for releasing whatever it refers to.
    ///
    /// # Errors
    ///
    /// `EBADF` if the fd is out of range or not open.  An fd can be closed
    /// once; the second close fails.
    pub fn close_virtualfd(&mut self, virtualfd: u32) -> Result<T, Errno> {
        let entry = self
            .entries
            .get_mut(virtualfd as usize)
            .and_then(Option::take)
            .ok_or(Errno::EBADF)?;
        self.count -= 1;

        // Trim trailing empty slots so the next allocation scan stays short.
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        Ok(entry)
    }

    /// Removes every entry, returning them in fd order.  Used when a cage
    /// goes away and everything it holds must be released.
    pub fn empty_fdtable(&mut self) -> Vec<(u32, T)> {
        self.count = 0;
        std::mem::take(&mut self.entries)
            .into_iter()
            .enumerate()
            .filter_map(|(fd, entry)| entry.map(|e| (fd as u32, e)))
            .collect()
    }

    /// Iterates over the open fds in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(fd, entry)| entry.as_ref().map(|e| (fd as u32, e)))
    }

    /// The number of open fds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no fd is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether `virtualfd` is currently open.
    #[must_use]
    pub fn contains(&self, virtualfd: u32) -> bool {
        self.translate_virtual_fd(virtualfd).is_ok()
    }
}

/***************************** TESTS FOLLOW ******************************/

// I'm including my unit tests in-line, in this code.  Each test builds its own
// table, so unlike a global table nothing needs to be reset between tests.
#[cfg(test)]
mod tests {

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TestEntry {
        underfd: i32,
        nonblocking: bool,
    }

    const ENTRY: TestEntry = TestEntry {
        underfd: 10,
        nonblocking: false,
    };

    #[test]
    // Basic test to ensure that I can get a virtual fd and the info back
    // find the value in the table afterwards...
    fn get_and_translate_work() {
        let mut table = FdTable::new();
        // Acquire a virtual fd...
        let my_virt_fd = table.get_unused_virtual_fd(ENTRY).unwrap();
        let _ = table.get_unused_virtual_fd(ENTRY).unwrap();
        let _ = table.get_unused_virtual_fd(ENTRY).unwrap();
        assert_eq!(my_virt_fd, 0);
        assert_eq!(10, table.translate_virtual_fd(my_virt_fd).unwrap().underfd);
        assert_eq!(table.len(), 3);
    }

    #[test]
    // Let's see if I can change a flag through the mutable translation...
    fn translate_mut_updates_in_place() {
        let mut table = FdTable::new();
        let fd1 = table.get_unused_virtual_fd(ENTRY).unwrap();
        let fd2 = table.get_unused_virtual_fd(ENTRY).unwrap();
        table.translate_virtual_fd_mut(fd1).unwrap().nonblocking = true;

        assert!(table.translate_virtual_fd(fd1).unwrap().nonblocking);
        // Changing one should not have changed the other...
        assert!(!table.translate_virtual_fd(fd2).unwrap().nonblocking);
    }

    #[test]
    fn lowest_free_fd_is_reused() {
        let mut table = FdTable::new();
        for _ in 0..4 {
            table.get_unused_virtual_fd(ENTRY).unwrap();
        }
        table.close_virtualfd(1).unwrap();
        table.close_virtualfd(2).unwrap();
        assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), 1);
        assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), 2);
        assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), 4);
    }

    #[test]
    fn close_returns_entry_exactly_once() {
        let mut table = FdTable::new();
        let fd = table
            .get_unused_virtual_fd(TestEntry {
                underfd: 42,
                nonblocking: true,
            })
            .unwrap();
        assert_eq!(table.close_virtualfd(fd).unwrap().underfd, 42);
        assert_eq!(table.close_virtualfd(fd), Err(Errno::EBADF));
        assert_eq!(table.translate_virtual_fd(fd), Err(Errno::EBADF));
        assert!(table.is_empty());
    }

    #[test]
    fn out_of_range_is_ebadf() {
        let mut table: FdTable<TestEntry> = FdTable::new();
        assert_eq!(table.translate_virtual_fd(0), Err(Errno::EBADF));
        assert_eq!(table.translate_virtual_fd(u32::MAX), Err(Errno::EBADF));
        assert_eq!(table.translate_virtual_fd_mut(7), Err(Errno::EBADF));
        assert_eq!(table.close_virtualfd(FD_PER_PROCESS_MAX), Err(Errno::EBADF));
    }

    #[test]
    // Do we fail when the table is full?
    fn emfile_at_limit() {
        let mut table = FdTable::with_max(8);
        for fd in 0..8 {
            assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), fd);
        }
        assert_eq!(table.get_unused_virtual_fd(ENTRY), Err(Errno::EMFILE));
        // Freeing one makes room again...
        table.close_virtualfd(3).unwrap();
        assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), 3);
    }

    #[test]
    fn default_limit_is_platform_max() {
        let mut table = FdTable::new();
        for _ in 0..FD_PER_PROCESS_MAX {
            table.get_unused_virtual_fd(()).unwrap();
        }
        assert_eq!(table.get_unused_virtual_fd(()), Err(Errno::EMFILE));
        assert_eq!(table.len(), FD_PER_PROCESS_MAX as usize);
    }

    #[test]
    fn empty_fdtable_drains_everything() {
        let mut table = FdTable::new();
        for underfd in 0..5 {
            table
                .get_unused_virtual_fd(TestEntry {
                    underfd,
                    nonblocking: false,
                })
                .unwrap();
        }
        table.close_virtualfd(2).unwrap();

        let drained = table.empty_fdtable();
        let fds: Vec<u32> = drained.iter().map(|(fd, _)| *fd).collect();
        assert_eq!(fds, vec![0, 1, 3, 4]);
        assert_eq!(drained[2].1.underfd, 3);
        assert!(table.is_empty());
        // ...and numbering starts over.
        assert_eq!(table.get_unused_virtual_fd(ENTRY).unwrap(), 0);
    }

    #[test]
    fn iter_and_contains() {
        let mut table = FdTable::new();
        table.get_unused_virtual_fd("a").unwrap();
        table.get_unused_virtual_fd("b").unwrap();
        table.get_unused_virtual_fd("c").unwrap();
        table.close_virtualfd(1).unwrap();

        let seen: Vec<(u32, &str)> = table.iter().map(|(fd, s)| (fd, *s)).collect();
        assert_eq!(seen, vec![(0, "a"), (2, "c")]);
        assert!(table.contains(2));
        assert!(!table.contains(1));
        assert!(!table.contains(9));
    }

    #[test]
    // Two tables (two cages) number their fds on their own.
    fn tables_are_independent() {
        let mut cage_a = FdTable::new();
        let mut cage_b = FdTable::new();
        assert_eq!(cage_a.get_unused_virtual_fd(1).unwrap(), 0);
        assert_eq!(cage_b.get_unused_virtual_fd(2).unwrap(), 0);
        cage_a.close_virtualfd(0).unwrap();
        assert_eq!(*cage_b.translate_virtual_fd(0).unwrap(), 2);
    }
}
