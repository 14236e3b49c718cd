//! Basic primitive type conversion API
//!
//! Helpers that read and write the primitive values and small structs a guest
//! passes by pointer: little-endian integers, single-byte booleans, and
//! `__wasi_poll_event_t` records.  All of them go through the bounds checks
//! of [`GuestMemory`], so a bad pointer is `EFAULT`.
use sysdefs::constants::err_const::Errno;
use sysdefs::data::net_struct::{
    PollEvent, POLL_EVENT_READABLE_OFFSET, POLL_EVENT_SIZE, POLL_EVENT_TOKEN_OFFSET,
    POLL_EVENT_WRITABLE_OFFSET,
};

use crate::guest_memory::GuestMemory;

impl GuestMemory<'_> {
    fn read_array<const N: usize>(&self, offset: u32) -> Result<[u8; N], Errno> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.deref_buffer(offset, N as u32)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: u32) -> Result<u8, Errno> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub fn read_u16(&self, offset: u32) -> Result<u16, Errno> {
        self.read_array(offset).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, Errno> {
        self.read_array(offset).map(u32::from_le_bytes)
    }

    pub fn read_i32(&self, offset: u32) -> Result<i32, Errno> {
        self.read_array(offset).map(i32::from_le_bytes)
    }

    /// A guest `bool` is one byte; any non-zero value is true.
    pub fn read_bool(&self, offset: u32) -> Result<bool, Errno> {
        Ok(self.read_u8(offset)? != 0)
    }

    pub fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), Errno> {
        self.deref_buffer_mut(offset, 2)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), Errno> {
        self.deref_buffer_mut(offset, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, offset: u32, value: i32) -> Result<(), Errno> {
        self.deref_buffer_mut(offset, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads one `__wasi_poll_event_t`.
    pub fn read_poll_event(&self, offset: u32) -> Result<PollEvent, Errno> {
        // Check the whole record up front so a half-readable record is EFAULT
        // rather than a partial read.
        self.deref_buffer(offset, POLL_EVENT_SIZE)?;
        Ok(PollEvent {
            token: self.read_u32(offset + POLL_EVENT_TOKEN_OFFSET)?,
            readable: self.read_bool(offset + POLL_EVENT_READABLE_OFFSET)?,
            writable: self.read_bool(offset + POLL_EVENT_WRITABLE_OFFSET)?,
        })
    }

    /// Writes `events` as consecutive `__wasi_poll_event_t` records starting
    /// at `offset`.  The padding bytes of each record are zeroed.
    pub fn write_poll_events(&mut self, offset: u32, events: &[PollEvent]) -> Result<(), Errno> {
        let total = u32::try_from(events.len())
            .ok()
            .and_then(|n| n.checked_mul(POLL_EVENT_SIZE))
            .ok_or(Errno::EFAULT)?;
        let out = self.deref_buffer_mut(offset, total)?;
        for (record, event) in out
            .chunks_exact_mut(POLL_EVENT_SIZE as usize)
            .zip(events.iter())
        {
            record.fill(0);
            record[..4].copy_from_slice(&event.token.to_le_bytes());
            record[POLL_EVENT_READABLE_OFFSET as usize] = u8::from(event.readable);
            record[POLL_EVENT_WRITABLE_OFFSET as usize] = u8::from(event.writable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_integers() {
        let mut raw = vec![0u8; 16];
        let mut mem = GuestMemory::new(&mut raw);
        mem.write_u32(0, 0x0403_0201).unwrap();
        mem.write_i32(4, -2).unwrap();
        mem.write_u16(8, 0xBEEF).unwrap();
        assert_eq!(mem.read_u32(0).unwrap(), 0x0403_0201);
        assert_eq!(mem.read_u8(0).unwrap(), 1);
        assert_eq!(mem.read_i32(4).unwrap(), -2);
        assert_eq!(mem.read_u16(8).unwrap(), 0xBEEF);
        assert_eq!(mem.deref_buffer(8, 2).unwrap(), &[0xEF, 0xBE]);
        assert_eq!(mem.read_u32(13), Err(Errno::EFAULT));
        assert_eq!(mem.write_u32(13, 1), Err(Errno::EFAULT));
    }

    #[test]
    fn test_poll_event_layout() {
        let mut raw = vec![0xAAu8; 32];
        let mut mem = GuestMemory::new(&mut raw);
        let events = [
            PollEvent {
                token: 7,
                readable: true,
                writable: false,
            },
            PollEvent {
                token: 0x0102_0304,
                readable: false,
                writable: true,
            },
        ];
        mem.write_poll_events(8, &events).unwrap();
        assert_eq!(
            mem.deref_buffer(8, 16).unwrap(),
            &[7, 0, 0, 0, 1, 0, 0, 0, 4, 3, 2, 1, 0, 1, 0, 0]
        );
        assert_eq!(mem.read_poll_event(16).unwrap(), events[1]);
        // Bytes outside the records are untouched.
        assert_eq!(mem.read_u8(7).unwrap(), 0xAA);
        assert_eq!(mem.read_u8(24).unwrap(), 0xAA);
    }

    #[test]
    fn test_poll_event_bounds() {
        let mut raw = vec![0u8; 12];
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(mem.read_poll_event(8), Err(Errno::EFAULT));
        let event = PollEvent {
            token: 1,
            readable: true,
            writable: true,
        };
        assert_eq!(mem.write_poll_events(8, &[event]), Err(Errno::EFAULT));
        assert_eq!(mem.read_u8(8).unwrap(), 0);
    }
}
