//! The directory engine (§4.E): the 32-byte on-disk directory entry, and
//! a cursor that walks a directory's entries across sector and cluster
//! boundaries, growing the directory on demand.
//!
//! Grounded on the teacher's `DirEntry`/`DirIter` (field layout, the
//! state-byte convention for end/deleted/live entries) but rebuilt on
//! top of [`crate::fat::table`] and [`crate::fat::window`] instead of the
//! teacher's `FatEntryTracer`/`FatEntryWrapper` pair, and extended past a
//! single cluster: `DirIter::add_entry` in the teacher crate gives up
//! (`unimplemented!()`) once a directory's one cluster fills up. Here
//! `DirCursor::advance` stretches the chain by allocating a fresh
//! cluster, and `FixedRoot` region support lets FAT12/16 (whose root
//! directory is a flat, non-chained run of sectors) share the same
//! cursor as FAT32 and ordinary subdirectories.

use core::convert::TryInto;
use core::fmt::{self, Debug};

use crate::error::{FatError, FatResult};
use crate::fat::table::{self, Cluster, FatGeometry};
use crate::fat::window::SectorWindow;
use crate::storage::BlockDevice;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct Attr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        /// The four attribute bits LFN entries set together to mark
        /// themselves as long-name fragments rather than short entries.
        const LONG_NAME = Self::READ_ONLY.bits | Self::HIDDEN.bits | Self::SYSTEM.bits | Self::VOLUME_ID.bits;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Live,
    Deleted,
    /// Marks the end of allocated-but-unused entries; everything after it
    /// in the directory is also unused.
    End,
}

/// A directory entry as read from or about to be written to disk — the
/// short (8.3) form. LFN fragments are handled separately by
/// [`crate::fat::lfn`]; this type only models the 11-byte-name entry.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RawDirEntry {
    pub name: [u8; 11],
    pub attr: Attr,
    pub nt_reserved: u8,
    pub creation_time_tenths: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub last_access_date: u16,
    pub cluster_high: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub cluster_low: u16,
    pub file_size: u32,
}

impl Debug for RawDirEntry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("RawDirEntry")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("attr", &self.attr)
            .field("cluster", &self.cluster())
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl RawDirEntry {
    pub fn state(&self) -> EntryState {
        match self.name[0] {
            0x00 => EntryState::End,
            0xE5 => EntryState::Deleted,
            _ => EntryState::Live,
        }
    }

    pub fn is_lfn_fragment(&self) -> bool {
        self.attr.contains(Attr::LONG_NAME) && !self.attr.contains(Attr::DIRECTORY) && !self.attr.contains(Attr::ARCHIVE)
    }

    pub fn cluster(&self) -> Cluster {
        ((self.cluster_high as u32) << 16) | self.cluster_low as u32
    }

    pub fn set_cluster(&mut self, cluster: Cluster) {
        self.cluster_high = (cluster >> 16) as u16;
        self.cluster_low = cluster as u16;
    }

    pub fn read(buf: &[u8; 32]) -> Self {
        Self {
            name: buf[0..11].try_into().unwrap(),
            attr: Attr::from_bits_truncate(buf[11]),
            nt_reserved: buf[12],
            creation_time_tenths: buf[13],
            creation_time: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            creation_date: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            last_access_date: u16::from_le_bytes(buf[18..20].try_into().unwrap()),
            cluster_high: u16::from_le_bytes(buf[20..22].try_into().unwrap()),
            write_time: u16::from_le_bytes(buf[22..24].try_into().unwrap()),
            write_date: u16::from_le_bytes(buf[24..26].try_into().unwrap()),
            cluster_low: u16::from_le_bytes(buf[26..28].try_into().unwrap()),
            file_size: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }

    pub fn write(&self, buf: &mut [u8; 32]) {
        buf[0..11].copy_from_slice(&self.name);
        buf[11] = self.attr.bits();
        buf[12] = self.nt_reserved;
        buf[13] = self.creation_time_tenths;
        buf[14..16].copy_from_slice(&self.creation_time.to_le_bytes());
        buf[16..18].copy_from_slice(&self.creation_date.to_le_bytes());
        buf[18..20].copy_from_slice(&self.last_access_date.to_le_bytes());
        buf[20..22].copy_from_slice(&self.cluster_high.to_le_bytes());
        buf[22..24].copy_from_slice(&self.write_time.to_le_bytes());
        buf[24..26].copy_from_slice(&self.write_date.to_le_bytes());
        buf[26..28].copy_from_slice(&self.cluster_low.to_le_bytes());
        buf[28..32].copy_from_slice(&self.file_size.to_le_bytes());
    }

    pub fn deleted_marker() -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0] = 0xE5;
        buf
    }
}

/// Identifies exactly where an entry lives, for the open-file registry
/// (§4.K) and for `unlink`/`rename` to rewrite it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    pub cluster: Cluster,
    pub offset_in_cluster: u32,
}

/// Which kind of directory region a cursor is walking.
#[derive(Debug, Clone, Copy)]
enum Region {
    /// FAT12/16's root directory: a fixed run of sectors that isn't part
    /// of the cluster chain and can never grow.
    FixedRoot { start_lba: u64, sector_count: u32 },
    /// A regular directory (any subdirectory, or FAT32's root): a normal
    /// cluster chain.
    Chain { first_cluster: Cluster },
}

/// Walks a directory's 32-byte entry slots in order, optionally growing
/// the directory (via [`DirCursor::advance`] past the last cluster, or
/// [`DirCursor::allocate`]) to make room for new entries.
pub struct DirCursor {
    region: Region,
    /// Current cluster (meaningless for `FixedRoot`).
    cluster: Cluster,
    /// Byte offset within the current cluster (or, for `FixedRoot`, within
    /// the whole fixed region).
    offset: u32,
}

impl DirCursor {
    pub fn root(fixed_root: Option<(u64, u32)>, root_cluster: Cluster) -> Self {
        match fixed_root {
            Some((start_lba, sector_count)) => Self {
                region: Region::FixedRoot { start_lba, sector_count },
                cluster: 0,
                offset: 0,
            },
            None => Self { region: Region::Chain { first_cluster: root_cluster }, cluster: root_cluster, offset: 0 },
        }
    }

    pub fn at_cluster(first_cluster: Cluster) -> Self {
        Self { region: Region::Chain { first_cluster }, cluster: first_cluster, offset: 0 }
    }

    pub fn rewind(&mut self) {
        self.offset = 0;
        if let Region::Chain { first_cluster } = self.region {
            self.cluster = first_cluster;
        }
    }

    fn entry_lba_and_offset(&self, geometry: &FatGeometry) -> (u64, usize) {
        let bytes_per_sector = geometry.bytes_per_sector as u32;
        match self.region {
            Region::FixedRoot { start_lba, .. } => {
                let sector_in_region = self.offset / bytes_per_sector;
                (start_lba + sector_in_region as u64, (self.offset % bytes_per_sector) as usize)
            }
            Region::Chain { .. } => {
                let cluster_lba = geometry.cluster_to_lba(self.cluster);
                let bytes_per_cluster = bytes_per_sector * geometry.sectors_per_cluster as u32;
                let offset_in_cluster = self.offset % bytes_per_cluster;
                let sector_in_cluster = offset_in_cluster / bytes_per_sector;
                (cluster_lba + sector_in_cluster as u64, (offset_in_cluster % bytes_per_sector) as usize)
            }
        }
    }

    /// Reads the raw 32 bytes at the cursor without moving it. Shared by
    /// `peek` (short-entry interpretation) and callers that need to
    /// reinterpret the same bytes as an LFN fragment.
    pub fn peek_raw<D: BlockDevice>(
        &self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
    ) -> FatResult<Option<[u8; 32]>> {
        if let Region::FixedRoot { sector_count, .. } = self.region {
            if self.offset >= sector_count * geometry.bytes_per_sector as u32 {
                return Ok(None);
            }
        }

        let (lba, offset) = self.entry_lba_and_offset(geometry);
        let sector = window.move_window(device, lba)?;
        Ok(Some(sector[offset..offset + 32].try_into().unwrap()))
    }

    /// Reads the entry at the cursor without moving it.
    pub fn peek<D: BlockDevice>(
        &self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
    ) -> FatResult<Option<RawDirEntry>> {
        Ok(self.peek_raw(geometry, window, device)?.map(|buf| RawDirEntry::read(&buf)))
    }

    pub fn location(&self) -> EntryLocation {
        EntryLocation { cluster: self.cluster, offset_in_cluster: self.offset }
    }

    /// Advances the cursor by one entry. Crosses cluster boundaries by
    /// following the FAT chain; if `grow` is set and the chain ends,
    /// allocates one more cluster and zeroes it (stretching the
    /// directory) rather than reporting end-of-directory. `grow` may only
    /// be `true` when `alloc` is `Some`; every read-only traversal (find,
    /// stat, rename's `..` fixup) passes `None` since it never grows.
    pub fn advance<D: BlockDevice>(
        &mut self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
        alloc: Option<&mut table::AllocCursor>,
        grow: bool,
    ) -> FatResult<bool> {
        self.offset += 32;

        match self.region {
            Region::FixedRoot { sector_count, .. } => {
                Ok(self.offset < sector_count * geometry.bytes_per_sector as u32)
            }
            Region::Chain { .. } => {
                let bytes_per_cluster = geometry.bytes_per_sector as u32 * geometry.sectors_per_cluster as u32;
                if self.offset < bytes_per_cluster {
                    return Ok(true);
                }

                self.offset = 0;
                let next = table::get(geometry, window, device, self.cluster)?;

                if geometry.is_end_of_chain(next) {
                    if !grow {
                        return Ok(false);
                    }
                    let alloc = alloc.ok_or(FatError::IntErr)?;
                    let allocated = table::create_chain(geometry, window, device, alloc, Some(self.cluster), Some(self.cluster), 1)?;
                    let new_cluster = allocated[0];
                    zero_cluster(geometry, window, device, new_cluster)?;
                    self.cluster = new_cluster;
                } else {
                    self.cluster = next;
                }
                Ok(true)
            }
        }
    }

    /// Finds `needed` consecutive free (deleted or end-of-directory)
    /// entry slots, growing the directory via `advance(.., grow=true)` if
    /// the existing allocation doesn't have room. Returns their
    /// locations in order; does not write anything itself.
    pub fn allocate<D: BlockDevice>(
        &mut self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
        alloc: &mut table::AllocCursor,
        needed: usize,
    ) -> FatResult<Vec<EntryLocation>> {
        self.rewind();
        let mut run: Vec<EntryLocation> = Vec::with_capacity(needed);

        loop {
            let entry = self.peek(geometry, window, device)?;
            match entry {
                None => {
                    // FixedRoot ran out of fixed space with nowhere to grow.
                    return Err(FatError::NoSpaceLeft);
                }
                Some(e) if e.state() != EntryState::Live => {
                    run.push(self.location());
                    if run.len() == needed {
                        return Ok(run);
                    }
                }
                Some(_) => run.clear(),
            }

            let can_grow = matches!(self.region, Region::Chain { .. });
            if !self.advance(geometry, window, device, Some(&mut *alloc), can_grow)? {
                return Err(FatError::NoSpaceLeft);
            }
        }
    }

    /// Writes `entry` at the cursor's current location.
    pub fn write_entry<D: BlockDevice>(
        &self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
        entry: &RawDirEntry,
    ) -> FatResult<()> {
        let (lba, offset) = self.entry_lba_and_offset(geometry);
        let sector = window.move_window(device, lba)?;
        let mut buf = [0u8; 32];
        entry.write(&mut buf);
        sector[offset..offset + 32].copy_from_slice(&buf);
        window.mark_dirty()
    }

    pub fn seek_to(&mut self, location: EntryLocation) {
        self.cluster = location.cluster;
        self.offset = location.offset_in_cluster;
    }
}

fn zero_cluster<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    cluster: Cluster,
) -> FatResult<()> {
    let lba = geometry.cluster_to_lba(cluster);
    for s in 0..geometry.sectors_per_cluster as u64 {
        let sector = window.move_window(device, lba + s)?;
        sector.fill(0);
        window.mark_dirty()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::boot_sector::FatType;
    use crate::storage::MemoryBlockDevice;

    fn setup() -> (FatGeometry, SectorWindow, MemoryBlockDevice) {
        let geometry = FatGeometry {
            fat_type: FatType::Fat16,
            fat_start_lba: 1,
            fat_size_sectors: 2,
            num_fats: 1,
            bytes_per_sector: 512,
            data_start_lba: 3,
            sectors_per_cluster: 1,
            total_clusters: 32,
        };
        let mut device = MemoryBlockDevice::new(512, 64);
        device.initialize().unwrap();
        let window = SectorWindow::new(512, geometry.fat_start_lba, geometry.fat_size_sectors, geometry.num_fats);
        (geometry, window, device)
    }

    #[test]
    fn raw_entry_roundtrips() {
        let mut entry = RawDirEntry { name: *b"FOO     TXT", attr: Attr::ARCHIVE, file_size: 42, ..Default::default() };
        entry.set_cluster(5);

        let mut buf = [0u8; 32];
        entry.write(&mut buf);
        let back = RawDirEntry::read(&buf);

        assert_eq!(back.name, *b"FOO     TXT");
        assert_eq!(back.cluster(), 5);
        assert_eq!(back.file_size, 42);
        assert_eq!(back.state(), EntryState::Live);
    }

    #[test]
    fn allocate_finds_first_free_slot_in_a_fresh_cluster() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];
        zero_cluster(&geometry, &mut window, &mut device, root).unwrap();

        let mut cursor = DirCursor::at_cluster(root);
        let slots = cursor.allocate(&geometry, &mut window, &mut device, &mut alloc, 1).unwrap();
        assert_eq!(slots[0], EntryLocation { cluster: root, offset_in_cluster: 0 });
    }

    #[test]
    fn allocate_stretches_directory_when_full() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];

        // Fill the cluster with live entries so no slot is free.
        let entries_per_cluster = (geometry.bytes_per_sector as u32 * geometry.sectors_per_cluster as u32) / 32;
        let lba = geometry.cluster_to_lba(root);
        {
            let sector = window.move_window(&mut device, lba).unwrap();
            for i in 0..entries_per_cluster as usize {
                let mut entry = RawDirEntry { name: *b"X          ", ..Default::default() };
                entry.name[0] = b'X';
                let mut buf = [0u8; 32];
                entry.write(&mut buf);
                sector[i * 32..(i + 1) * 32].copy_from_slice(&buf);
            }
            window.mark_dirty().unwrap();
        }

        let mut cursor = DirCursor::at_cluster(root);
        let slots = cursor.allocate(&geometry, &mut window, &mut device, &mut alloc, 1).unwrap();
        assert_ne!(slots[0].cluster, root);
    }
}
