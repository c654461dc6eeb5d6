//! The sector window: the single point through which every read and
//! write to the underlying `BlockDevice` flows (§4.B, §4.C).
//!
//! The teacher crate's `cache.rs` sketched a multi-entry LRU `CacheEntry`
//! scheme (`Resident`/`Dirty`/`Free`, age counters, eviction) that was
//! never finished — it has a use-before-definition bug
//! (`new_last_accessed`) and no eviction policy actually wired up. The
//! spec calls for exactly one dirty-tracked sector buffer per volume, so
//! rather than complete the teacher's unfinished LRU we replace it with
//! the simpler single-window design real FatFs ports use: one buffer,
//! one "which sector is this" tag, one dirty bit. Moving the window to a
//! different sector flushes the old one first; `sync` additionally
//! mirrors FAT-region writes across every FAT copy the BPB declares.

use crate::error::{FatError, FatResult};
use crate::storage::BlockDevice;

/// Tracks which sector (if any) the window currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Empty,
    Clean(u64),
    Dirty(u64),
}

/// A single sector-sized read/write buffer shared by every layer above
/// the block device (directory engine, FAT access layer, file I/O).
pub struct SectorWindow {
    buf: Vec<u8>,
    state: WindowState,
    /// First sector of the (first copy of the) FAT, and how many sectors
    /// each copy spans; used by `sync` to mirror a dirty FAT sector
    /// across every other FAT copy.
    fat_base: u64,
    fat_size: u64,
    num_fats: u8,
}

impl SectorWindow {
    pub fn new(sector_size: u16, fat_base: u64, fat_size: u64, num_fats: u8) -> Self {
        Self {
            buf: vec![0u8; sector_size as usize],
            state: WindowState::Empty,
            fat_base,
            fat_size,
            num_fats,
        }
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Moves the window onto `lba`, flushing any pending dirty sector
    /// first. If the window already holds `lba`, this is a no-op other
    /// than the (already-loaded) buffer being returned.
    pub fn move_window<D: BlockDevice>(&mut self, device: &mut D, lba: u64) -> FatResult<&mut [u8]> {
        let already_here = matches!(self.state, WindowState::Clean(s) | WindowState::Dirty(s) if s == lba);

        if !already_here {
            self.sync(device)?;
            device.read_sector(lba, &mut self.buf).map_err(|_| FatError::DiskErr)?;
            self.state = WindowState::Clean(lba);
        }

        Ok(&mut self.buf)
    }

    /// Marks the currently-windowed sector dirty. Panics (in the sense of
    /// returning `IntErr`) if the window is empty — callers must move
    /// the window before writing into it.
    pub fn mark_dirty(&mut self) -> FatResult<()> {
        self.state = match self.state {
            WindowState::Clean(s) | WindowState::Dirty(s) => WindowState::Dirty(s),
            WindowState::Empty => return Err(FatError::IntErr),
        };
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, WindowState::Dirty(_))
    }

    pub fn current_sector(&self) -> Option<u64> {
        match self.state {
            WindowState::Clean(s) | WindowState::Dirty(s) => Some(s),
            WindowState::Empty => None,
        }
    }

    /// Writes back the window if dirty, mirroring into every other FAT
    /// copy when the dirty sector falls inside the (first copy of the)
    /// FAT region.
    pub fn sync<D: BlockDevice>(&mut self, device: &mut D) -> FatResult<()> {
        let lba = match self.state {
            WindowState::Dirty(s) => s,
            _ => return Ok(()),
        };

        device.write_sector(lba, &self.buf).map_err(|_| FatError::DiskErr)?;

        if self.num_fats > 1 && lba >= self.fat_base && lba < self.fat_base + self.fat_size {
            let offset_within_fat = lba - self.fat_base;
            for copy in 1..self.num_fats as u64 {
                let mirror_lba = self.fat_base + copy * self.fat_size + offset_within_fat;
                device.write_sector(mirror_lba, &self.buf).map_err(|_| FatError::DiskErr)?;
            }
        }

        self.state = WindowState::Clean(lba);
        device.sync().map_err(|_| FatError::DiskErr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockDevice;

    fn dev() -> MemoryBlockDevice {
        let mut d = MemoryBlockDevice::new(512, 64);
        d.initialize().unwrap();
        d
    }

    #[test]
    fn move_window_loads_sector_contents() {
        let mut device = dev();
        let mut sector = vec![0x11u8; 512];
        device.write_sector(5, &sector).unwrap();

        let mut window = SectorWindow::new(512, 1, 2, 1);
        let buf = window.move_window(&mut device, 5).unwrap();
        sector.fill(0x11);
        assert_eq!(buf, &sector[..]);
    }

    #[test]
    fn dirty_sector_flushes_before_moving_away() {
        let mut device = dev();
        let mut window = SectorWindow::new(512, 1, 2, 1);

        window.move_window(&mut device, 5).unwrap();
        window.buf.fill(0xAB);
        window.mark_dirty().unwrap();

        window.move_window(&mut device, 10).unwrap();

        let mut readback = vec![0u8; 512];
        device.read_sector(5, &mut readback).unwrap();
        assert!(readback.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn sync_mirrors_fat_sectors_across_copies() {
        let mut device = dev();
        // FAT base at sector 1, 2 sectors per copy, 2 copies: copy 0 at
        // sectors 1-2, copy 1 at sectors 3-4.
        let mut window = SectorWindow::new(512, 1, 2, 2);

        window.move_window(&mut device, 1).unwrap();
        window.buf.fill(0xCD);
        window.mark_dirty().unwrap();
        window.sync(&mut device).unwrap();

        let mut mirror = vec![0u8; 512];
        device.read_sector(3, &mut mirror).unwrap();
        assert!(mirror.iter().all(|&b| b == 0xCD));
    }
}
