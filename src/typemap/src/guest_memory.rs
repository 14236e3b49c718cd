//! Guest linear memory
//!
//! A guest hands us `u32` offsets, never host pointers.  Everything the host
//! reads or writes on a guest's behalf goes through a `GuestMemory`, which
//! checks every (offset, length) pair against the size of linear memory before
//! producing a slice.  A bad range is `EFAULT`, and is reported before any host
//! call is made.
use std::marker::PhantomData;

use sysdefs::constants::err_const::{syscall_error, Errno};
use sysdefs::constants::lind_platform_const::MAX_IOVECS;
use sysdefs::data::net_struct::{CioVec, CIOVEC_SIZE};

/// A borrowed view of one guest's linear memory.
#[derive(Debug)]
pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        GuestMemory { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Host range for `len` bytes at guest `offset`, or `EFAULT` if any of it
    /// lies outside linear memory.  Overflow of `offset + len` counts as out
    /// of bounds.
    fn check_range(&self, offset: u32, len: u32) -> Result<std::ops::Range<usize>, Errno> {
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or_else(|| syscall_error(Errno::EFAULT, "guest_memory", "range overflows"))?;
        if end > self.bytes.len() {
            return Err(syscall_error(
                Errno::EFAULT,
                "guest_memory",
                "range outside linear memory",
            ));
        }
        Ok(start..end)
    }

    /// `len` guest bytes at `offset`, read-only.
    pub fn deref_buffer(&self, offset: u32, len: u32) -> Result<&[u8], Errno> {
        let range = self.check_range(offset, len)?;
        Ok(&self.bytes[range])
    }

    /// `len` guest bytes at `offset`, writable.
    pub fn deref_buffer_mut(&mut self, offset: u32, len: u32) -> Result<&mut [u8], Errno> {
        let range = self.check_range(offset, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Reads `count` `__wasi_ciovec_t` records at `offset`.
    ///
    /// More than `MAX_IOVECS` records is `EINVAL`; a table that does not fit in
    /// memory is `EFAULT`.
    pub fn read_ciovecs(&self, offset: u32, count: u32) -> Result<Vec<CioVec>, Errno> {
        if count > MAX_IOVECS {
            return Err(syscall_error(Errno::EINVAL, "iovec", "too many iovecs"));
        }
        // count <= MAX_IOVECS, so this cannot overflow.
        let table = self.deref_buffer(offset, count * CIOVEC_SIZE)?;
        Ok(table
            .chunks_exact(CIOVEC_SIZE as usize)
            .map(|raw| CioVec {
                buf: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                buf_len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            })
            .collect())
    }

    /// Resolves a guest iovec table into host `iovec`s that point straight into
    /// linear memory, ready for `sendmsg` / `recvmsg`.
    ///
    /// Every buffer is bounds-checked first, so either all of them are valid
    /// or nothing is produced.  The result borrows this memory mutably, which
    /// keeps the buffers alive and unaliased by Rust code for the duration of
    /// the one host call that uses them.
    pub fn iovecs(&mut self, offset: u32, count: u32) -> Result<GuestIoVecs<'_>, Errno> {
        let records = self.read_ciovecs(offset, count)?;
        for record in &records {
            self.check_range(record.buf, record.buf_len)?;
        }

        let base = self.bytes.as_mut_ptr();
        let iovs = records
            .iter()
            .map(|record| libc::iovec {
                // In bounds: checked above.
                iov_base: base.wrapping_add(record.buf as usize).cast(),
                iov_len: record.buf_len as usize,
            })
            .collect();
        Ok(GuestIoVecs {
            iovs,
            _memory: PhantomData,
        })
    }
}

/// A scatter/gather list over memory the caller borrowed for one call.
///
/// Ranges may overlap (a guest is free to pass the same buffer twice), which
/// is why this holds raw `iovec`s instead of Rust slices.
#[derive(Debug)]
pub struct GuestIoVecs<'a> {
    iovs: Vec<libc::iovec>,
    _memory: PhantomData<&'a mut [u8]>,
}

impl<'a> GuestIoVecs<'a> {
    /// Builds a list over host buffers, for embedders that already hold
    /// slices.
    pub fn from_buffers(buffers: &'a mut [&mut [u8]]) -> Self {
        let iovs = buffers
            .iter_mut()
            .map(|buf| libc::iovec {
                iov_base: buf.as_mut_ptr().cast(),
                iov_len: buf.len(),
            })
            .collect();
        GuestIoVecs {
            iovs,
            _memory: PhantomData,
        }
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.iovs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iovs.is_empty()
    }

    /// Sum of all buffer lengths.
    pub fn total_len(&self) -> usize {
        self.iovs.iter().map(|iov| iov.iov_len).sum()
    }

    /// The `iovec` array for `msghdr.msg_iov`.
    pub fn as_iovec_ptr(&self) -> *const libc::iovec {
        self.iovs.as_ptr()
    }

    pub fn as_iovec_mut_ptr(&mut self) -> *mut libc::iovec {
        self.iovs.as_mut_ptr()
    }
}
