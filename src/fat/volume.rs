//! The mounted-volume type and the mount pipeline (§4.A, §4.H).
//!
//! Supersedes the teacher's `fat::mod::FatFs`: that type hard-coded
//! FAT32 and 512-byte sectors and skipped partition discovery entirely
//! (`mount` took an already-resolved `PartitionEntry` and asserted the
//! sector size). `Volume::mount` here does the whole pipeline — MBR/GPT
//! discovery, BPB validation, geometry derivation, FSInfo load — and
//! works across FAT12/16/32 and any BPB-declared sector size.

use crate::clock::Timestamp;
use crate::codepage::Codepage;
use crate::error::{FatError, FatResult};
use crate::fat::boot_sector::{BootSector, ExtendedBpb, FatType, FsInfo};
use crate::fat::table::{AllocCursor, Cluster, FatGeometry, FIRST_DATA_CLUSTER};
use crate::fat::window::SectorWindow;
use crate::gpt::Gpt;
use crate::mbr::{self, DiskLayout};
use crate::storage::BlockDevice;

/// A successfully mounted FAT volume: its geometry, its sector window,
/// and the small amount of mutable state (free-cluster hint, mount
/// generation) that lives for as long as the volume stays mounted.
///
/// One `Volume` owns exactly one `SectorWindow`, matching §5's "a single
/// mutex guards a single window per mounted volume" concurrency model —
/// callers are expected to hold `FatFsContext`'s per-volume mutex for the
/// duration of any operation that touches this type.
pub struct Volume<D: BlockDevice> {
    pub device: D,
    pub geometry: FatGeometry,
    pub window: SectorWindow,
    pub fs_info: Option<FsInfo>,
    pub fs_info_lba: Option<u64>,
    pub fixed_root: Option<(u64, u32)>,
    pub root_cluster: Cluster,
    pub volume_label: [u8; 11],
    /// Bumped every time this volume is (re-)mounted; handles returned to
    /// callers embed the generation they were opened under so a stale
    /// handle from before an unmount/remount is rejected as
    /// `InvalidObject` (§4.H Open Question resolution).
    pub mount_generation: u64,
    /// Where `create_chain`'s linear scan resumes from next, seeded from
    /// FSInfo's `next_free` hint at mount time.
    pub last_clst: Cluster,
    /// Live free-cluster count, kept in step by `create_chain`/`remove_chain`.
    /// `None` when no trustworthy starting count exists (FAT12/16, or a
    /// FAT32 volume whose FSInfo sector didn't parse) — `getfree` then
    /// falls back to a full FAT walk.
    pub free_clst: Option<u32>,
    /// Set whenever `last_clst`/`free_clst` have changed since the FSInfo
    /// sector was last written; `sync` only rewrites FSInfo when this is set.
    pub fsi_flag: bool,
}

impl<D: BlockDevice> Volume<D> {
    /// Snapshots the rolling allocation state for a `create_chain`/
    /// `remove_chain` call. Taken by value (all three fields are `Copy`)
    /// so the caller can hold it alongside disjoint `&mut` borrows of
    /// `window`/`device` that a direct `&mut self` borrow would conflict
    /// with.
    pub fn alloc_cursor(&self) -> AllocCursor {
        AllocCursor { last_clst: self.last_clst, free_clst: self.free_clst, fsi_flag: self.fsi_flag }
    }

    /// Writes a snapshot taken by [`Volume::alloc_cursor`] back after the
    /// call that used it returns.
    pub fn apply_alloc_cursor(&mut self, cursor: AllocCursor) {
        self.last_clst = cursor.last_clst;
        self.free_clst = cursor.free_clst;
        self.fsi_flag = self.fsi_flag || cursor.fsi_flag;
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Runs the full mount pipeline on `device`: classify the disk
    /// layout (GPT / MBR / super-floppy), locate the target partition's
    /// first LBA, validate the boot sector found there, and derive the
    /// FAT geometry used by every later layer.
    pub fn mount(mut device: D, partition_index: u32, mount_generation: u64) -> FatResult<Self> {
        device.initialize().map_err(|_| FatError::NotReady)?;

        let partition_first_lba = match mbr::read_disk_layout(&mut device)? {
            DiskLayout::SuperFloppy => 0,
            DiskLayout::GptProtective => {
                let gpt = Gpt::read_gpt(&mut device)?;
                let entry = gpt
                    .get_partition_entry(&mut device, partition_index)
                    .ok()
                    .filter(|e| !e.is_empty())
                    .ok_or(FatError::NoFilesystem)?;
                entry.first_lba
            }
            DiskLayout::Mbr(partitions) => {
                let entry = partitions.get(partition_index as usize).ok_or(FatError::NoFilesystem)?;
                entry.first_lba as u64
            }
        };

        let mut boot_sector_buf = vec![0u8; device.sector_size() as usize];
        device.read_sector(partition_first_lba, &mut boot_sector_buf).map_err(|_| FatError::DiskErr)?;
        let boot_sector = BootSector::read(&boot_sector_buf)?;

        if boot_sector.bpb.bytes_per_sector != device.sector_size() {
            return Err(FatError::NoFilesystem);
        }

        let fat_type = boot_sector.fat_type();
        let fat_start_lba = partition_first_lba + boot_sector.bpb.reserved_sector_count as u64;
        let data_start_lba = partition_first_lba + boot_sector.first_data_sector() as u64;
        let root_dir_sectors = boot_sector.root_dir_sectors();

        let (fixed_root, root_cluster) = match fat_type {
            FatType::Fat32 => (None, boot_sector.root_cluster().ok_or(FatError::NoFilesystem)?),
            FatType::Fat12 | FatType::Fat16 => {
                let fixed_root_lba = fat_start_lba + boot_sector.bpb.num_fats as u64 * boot_sector.sectors_per_fat() as u64;
                (Some((fixed_root_lba, root_dir_sectors)), 0)
            }
        };

        let geometry = FatGeometry {
            fat_type,
            fat_start_lba,
            fat_size_sectors: boot_sector.sectors_per_fat() as u64,
            num_fats: boot_sector.bpb.num_fats,
            bytes_per_sector: boot_sector.bpb.bytes_per_sector,
            data_start_lba,
            sectors_per_cluster: boot_sector.bpb.sectors_per_cluster,
            total_clusters: boot_sector.cluster_count(),
        };

        let (fs_info, fs_info_lba) = match &boot_sector.bpb.extended {
            ExtendedBpb::Fat32 { fs_info_sector, .. } if *fs_info_sector != 0 && *fs_info_sector != 0xFFFF => {
                let lba = partition_first_lba + *fs_info_sector as u64;
                let mut buf = vec![0u8; device.sector_size() as usize];
                match device.read_sector(lba, &mut buf) {
                    Ok(()) => match FsInfo::read(&buf) {
                        Ok(info) => (Some(info), Some(lba)),
                        Err(_) => (None, Some(lba)),
                    },
                    Err(_) => (None, None),
                }
            }
            _ => (None, None),
        };

        let volume_label = match &boot_sector.bpb.extended {
            ExtendedBpb::Fat16 { volume_label, .. } | ExtendedBpb::Fat32 { volume_label, .. } => *volume_label,
        };

        let window = SectorWindow::new(
            geometry.bytes_per_sector,
            geometry.fat_start_lba,
            geometry.fat_size_sectors,
            geometry.num_fats,
        );

        log::info!("mounted {:?} volume, {} clusters", fat_type, geometry.total_clusters);

        // Seed the rolling allocation cursor from FSInfo when it parsed and
        // its values are plausible; otherwise start from scratch so the
        // first allocation falls back to a full linear scan.
        let last_clst = fs_info
            .filter(|info| geometry.is_valid_cluster(info.next_free))
            .map(|info| info.next_free)
            .unwrap_or(FIRST_DATA_CLUSTER - 1);
        let free_clst = fs_info
            .filter(|info| info.free_count <= geometry.total_clusters)
            .map(|info| info.free_count);

        Ok(Self {
            device,
            geometry,
            window,
            fs_info,
            fs_info_lba,
            fixed_root,
            root_cluster,
            volume_label,
            mount_generation,
            last_clst,
            free_clst,
            fsi_flag: false,
        })
    }

    /// Flushes the sector window and, if an allocation since the last sync
    /// has marked FSInfo dirty, persists the current `free_clst`/`last_clst`
    /// values to the FSInfo sector (FAT32 only). Called on explicit
    /// `sync`/`unmount` and after every allocation-mutating operation per
    /// §4.B; never writes a stale snapshot, unlike a naive rewrite of the
    /// mount-time `fs_info`.
    pub fn sync(&mut self) -> FatResult<()> {
        self.window.sync(&mut self.device)?;

        if self.fsi_flag {
            if let (Some(info), Some(lba)) = (self.fs_info.as_mut(), self.fs_info_lba) {
                info.free_count = self.free_clst.unwrap_or(info.free_count);
                info.next_free = self.last_clst;

                let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
                info.write(&mut buf);
                self.device.write_sector(lba, &buf).map_err(|_| FatError::DiskErr)?;
                self.fsi_flag = false;
            }
        }

        Ok(())
    }

    pub fn stamp_timestamp(&self, _codepage: &dyn Codepage, now: Timestamp) -> Timestamp {
        now
    }

    pub fn first_data_cluster(&self) -> Cluster {
        FIRST_DATA_CLUSTER
    }
}
