//! The block-device interface the driver is built on (§6.2).
//!
//! This is the runtime-sized descendant of the teacher crate's `Storage`
//! trait: that trait pinned the sector size at compile time via
//! `typenum`/`generic-array` (`GenericArray<u8, U512>`), which cannot
//! express a BPB-declared, per-volume sector size in the 512..4096 range.
//! Here the sector size is a runtime property of the device
//! (`BlockDevice::sector_size`) and sector buffers are plain `&mut [u8]`
//! slices sized by the caller.

use core::fmt::Debug;

bitflags::bitflags! {
    /// Status flags a block device can report (mirrors `DSTATUS` bits).
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct DeviceStatus: u8 {
        /// `initialize` has not (yet) succeeded.
        const NOT_INITIALIZED = 0x01;
        /// No media is present.
        const NO_DISK         = 0x02;
        /// The device refuses writes.
        const WRITE_PROTECTED = 0x04;
    }
}

/// Implementors provide access to a partition on some sector-based storage
/// medium. The driver never interprets a specific underlying error code;
/// it only distinguishes "it worked" from "it didn't", per §6.2.
pub trait BlockDevice {
    type Error: Debug;

    /// Bytes per sector. Must be a power of two in `512..=4096`; the driver
    /// reads this once at mount time and treats it as fixed for the life of
    /// the volume.
    fn sector_size(&self) -> u16;

    /// Number of sectors visible through this device (i.e. the partition,
    /// not necessarily the whole physical medium).
    fn sector_count(&self) -> u64;

    /// Bring the device up. Mount calls this before doing anything else.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Current status flags.
    fn status(&self) -> DeviceStatus;

    /// Read `count` consecutive sectors starting at `lba` into `buf`.
    /// `buf.len()` must equal `count as usize * sector_size() as usize`.
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `count` consecutive sectors starting at `lba` from `buf`.
    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<(), Self::Error>;

    /// Flush any write-back cache the device itself keeps. Has no bearing
    /// on the driver's own sector window, which is flushed separately.
    fn sync(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Hint that the sectors in `lba_start..lba_end` no longer hold live
    /// data and may be discarded. Best-effort; devices that can't support
    /// this just no-op.
    fn trim(&mut self, _lba_start: u64, _lba_end: u64) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Convenience: read a single sector.
    #[inline]
    fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.read_sectors(lba, 1, buf)
    }

    /// Convenience: write a single sector.
    #[inline]
    fn write_sector(&mut self, lba: u64, buf: &[u8]) -> Result<(), Self::Error> {
        self.write_sectors(lba, 1, buf)
    }
}

/// An in-memory `BlockDevice`, used by the test/bench harness (§4.Q) and by
/// the formatter round-trip tests. Replaces the teacher crate's
/// file-backed `storage-traits::FileBackedStorage`, which needed a real
/// disk image and an external git dependency.
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    sector_size: u16,
    sectors: Vec<u8>,
    initialized: bool,
    write_protected: bool,
}

impl MemoryBlockDevice {
    pub fn new(sector_size: u16, sector_count: u64) -> Self {
        assert!(sector_size.is_power_of_two());
        assert!((512..=4096).contains(&sector_size));

        Self {
            sector_size,
            sectors: vec![0u8; sector_size as usize * sector_count as usize],
            initialized: false,
            write_protected: false,
        }
    }

    pub fn set_write_protected(&mut self, wp: bool) {
        self.write_protected = wp;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.sectors
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDeviceError {
    #[error("out of range: lba {lba} + {count} sectors exceeds device capacity")]
    OutOfRange { lba: u64, count: u32 },
    #[error("device not initialized")]
    NotInitialized,
    #[error("device is write protected")]
    WriteProtected,
}

impl BlockDevice for MemoryBlockDevice {
    type Error = MemoryDeviceError;

    fn sector_size(&self) -> u16 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64 / self.sector_size as u64
    }

    fn initialize(&mut self) -> Result<(), Self::Error> {
        self.initialized = true;
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        let mut s = DeviceStatus::empty();
        if !self.initialized {
            s |= DeviceStatus::NOT_INITIALIZED;
        }
        if self.write_protected {
            s |= DeviceStatus::WRITE_PROTECTED;
        }
        s
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(MemoryDeviceError::NotInitialized);
        }
        let start = lba
            .checked_mul(self.sector_size as u64)
            .ok_or(MemoryDeviceError::OutOfRange { lba, count })? as usize;
        let len = count as usize * self.sector_size as usize;
        let end = start.checked_add(len).ok_or(MemoryDeviceError::OutOfRange { lba, count })?;

        if end > self.sectors.len() || buf.len() < len {
            return Err(MemoryDeviceError::OutOfRange { lba, count });
        }

        buf[..len].copy_from_slice(&self.sectors[start..end]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(MemoryDeviceError::NotInitialized);
        }
        if self.write_protected {
            return Err(MemoryDeviceError::WriteProtected);
        }
        let start = lba
            .checked_mul(self.sector_size as u64)
            .ok_or(MemoryDeviceError::OutOfRange { lba, count })? as usize;
        let len = count as usize * self.sector_size as usize;
        let end = start.checked_add(len).ok_or(MemoryDeviceError::OutOfRange { lba, count })?;

        if end > self.sectors.len() || buf.len() < len {
            return Err(MemoryDeviceError::OutOfRange { lba, count });
        }

        self.sectors[start..end].copy_from_slice(&buf[..len]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mut dev = MemoryBlockDevice::new(512, 16);
        dev.initialize().unwrap();

        let mut sector = vec![0xA5u8; 512];
        dev.write_sector(3, &sector).unwrap();

        sector.fill(0);
        dev.read_sector(3, &mut sector).unwrap();
        assert!(sector.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn out_of_range_read_fails() {
        let mut dev = MemoryBlockDevice::new(512, 4);
        dev.initialize().unwrap();

        let mut sector = vec![0u8; 512];
        assert!(dev.read_sector(4, &mut sector).is_err());
    }

    #[test]
    fn write_protected_device_refuses_writes() {
        let mut dev = MemoryBlockDevice::new(512, 4);
        dev.initialize().unwrap();
        dev.set_write_protected(true);

        let sector = vec![0u8; 512];
        assert_eq!(dev.write_sector(0, &sector), Err(MemoryDeviceError::WriteProtected));
        assert!(dev.status().contains(DeviceStatus::WRITE_PROTECTED));
    }
}
