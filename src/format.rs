//! The `mkfs`/`fdisk` formatter (§4.L).
//!
//! No teacher counterpart (the teacher crate only ever mounted
//! pre-formatted images). Grounded in the same BPB/FSInfo field layout
//! `fat::boot_sector` already encodes, run in reverse: pick a FAT
//! sub-type and cluster size from volume size, lay out the reserved
//! area/FAT(s)/root/data region, and write the structures a fresh mount
//! expects to find.

use crate::clock::Clock;
use crate::error::{FatError, FatResult};
use crate::fat::boot_sector::{BiosParameterBlock, BootSector, ExtendedBpb, FatType, FsInfo};
use crate::fat::table::{self, FatGeometry, FIRST_DATA_CLUSTER};
use crate::fat::window::SectorWindow;
use crate::mbr;
use crate::storage::BlockDevice;

/// Cluster-size calibration table for FAT12/FAT16: `(max volume sectors
/// this row covers, sectors per cluster)`, checked in order. Mirrors the
/// shape (not the exact numbers) of the two-table scheme real FatFs
/// ports use to auto-select cluster size from volume size.
const FAT_CLUSTER_TABLE: &[(u32, u8)] = &[
    (32_680, 2),
    (262_144, 4),
    (524_288, 8),
    (1_048_576, 16),
    (2_097_152, 32),
    (4_194_304, 64),
    (u32::MAX, 128),
];

/// Calibration table for FAT32.
const FAT32_CLUSTER_TABLE: &[(u32, u8)] = &[
    (532_480, 1),
    (16_777_216, 8),
    (33_554_432, 16),
    (67_108_864, 32),
    (u32::MAX, 64),
];

const DEFAULT_ROOT_ENTRY_COUNT: u16 = 512;

/// Caller-tunable knobs for [`format_volume`]. Anything left `None` is
/// auto-selected the way `mkfs`'s default argument does.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub fat_type_hint: Option<FatType>,
    pub sectors_per_cluster_hint: Option<u8>,
    pub volume_label: [u8; 11],
    /// When set, `format_volume` first writes a single-partition MBR
    /// (§4.L "for new single-partition formats") and places the volume
    /// starting at LBA 1 instead of LBA 0.
    pub write_partition_table: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { fat_type_hint: None, sectors_per_cluster_hint: None, volume_label: *b"NO NAME    ", write_partition_table: true }
    }
}

fn choose_fat_type(available_sectors: u32, hint: Option<FatType>) -> FatType {
    if let Some(hint) = hint {
        return hint;
    }
    // "prefer FAT32 for large volumes; otherwise pick the smallest
    // sub-type whose cluster count fits" (§4.L) — approximated directly
    // on sector count, since the cluster-size tables below keep the
    // eventual cluster count within each type's range for volumes in
    // that size class.
    if available_sectors >= 2_097_152 {
        FatType::Fat32
    } else if available_sectors < 8_400 {
        FatType::Fat12
    } else {
        FatType::Fat16
    }
}

fn pick_cluster_size(fat_type: FatType, available_sectors: u32, hint: Option<u8>) -> u8 {
    if let Some(hint) = hint {
        return hint;
    }
    let table = if fat_type == FatType::Fat32 { FAT32_CLUSTER_TABLE } else { FAT_CLUSTER_TABLE };
    table.iter().find(|&&(max, _)| available_sectors <= max).map(|&(_, spc)| spc).unwrap_or(128)
}

struct Layout {
    reserved_sectors: u16,
    sectors_per_fat: u32,
    root_dir_sectors: u32,
    cluster_count: u32,
}

fn compute_layout(
    fat_type: FatType,
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    num_fats: u8,
    root_entry_count: u16,
    available_sectors: u32,
) -> FatResult<Layout> {
    let reserved_sectors: u16 = if fat_type == FatType::Fat32 { 32 } else { 1 };
    let root_dir_sectors = if fat_type == FatType::Fat32 {
        0
    } else {
        ((root_entry_count as u32 * 32) + bytes_per_sector as u32 - 1) / bytes_per_sector as u32
    };

    let fat_bits = fat_type.bits_per_entry();
    let mut sectors_per_fat: u32 = 1;

    for _ in 0..8 {
        let non_data = reserved_sectors as u32 + root_dir_sectors + num_fats as u32 * sectors_per_fat;
        let data_sectors = available_sectors.checked_sub(non_data).ok_or(FatError::MkfsAborted)?;
        let cluster_count = data_sectors / sectors_per_cluster as u32;
        let fat_bytes = (cluster_count as u64 + 2) * fat_bits as u64 / 8;
        let next = ((fat_bytes + bytes_per_sector as u64 - 1) / bytes_per_sector as u64).max(1) as u32;

        if next == sectors_per_fat {
            return Ok(Layout { reserved_sectors, sectors_per_fat, root_dir_sectors, cluster_count });
        }
        sectors_per_fat = next;
    }

    Err(FatError::MkfsAborted)
}

fn partition_type_for(fat_type: FatType, total_sectors: u32) -> u8 {
    match fat_type {
        FatType::Fat12 => 0x01,
        FatType::Fat16 => {
            if total_sectors < 65536 {
                0x04
            } else {
                0x06
            }
        }
        FatType::Fat32 => 0x0C,
    }
}

/// Formats `device` as a single FAT volume, optionally preceded by a
/// single-partition MBR. Picks FAT sub-type and cluster size from volume
/// size unless overridden in `options`.
pub fn format_volume<D: BlockDevice>(device: &mut D, options: &FormatOptions, clock: &dyn Clock) -> FatResult<()> {
    device.initialize().map_err(|_| FatError::NotReady)?;
    let bytes_per_sector = device.sector_size();
    let total_sectors = device.sector_count().min(u32::MAX as u64) as u32;

    let base_lba: u64 = if options.write_partition_table { 1 } else { 0 };
    let available_sectors = total_sectors.checked_sub(base_lba as u32).ok_or(FatError::MkfsAborted)?;

    let fat_type = choose_fat_type(available_sectors, options.fat_type_hint);
    let sectors_per_cluster = pick_cluster_size(fat_type, available_sectors, options.sectors_per_cluster_hint);
    let num_fats = 2u8;

    let layout = compute_layout(fat_type, bytes_per_sector, sectors_per_cluster, num_fats, DEFAULT_ROOT_ENTRY_COUNT, available_sectors)?;
    if layout.cluster_count < 1 {
        return Err(FatError::MkfsAborted);
    }

    let stamp = clock.now();
    let volume_id = ((stamp.date as u32) << 16) | stamp.time as u32;

    let common = BiosParameterBlock {
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sector_count: layout.reserved_sectors,
        num_fats,
        root_entry_count: if fat_type == FatType::Fat32 { 0 } else { DEFAULT_ROOT_ENTRY_COUNT },
        total_sectors_16: if total_sectors < 0x10000 && fat_type != FatType::Fat32 { total_sectors as u16 } else { 0 },
        media: 0xF8,
        sectors_per_fat_16: if fat_type == FatType::Fat32 { 0 } else { layout.sectors_per_fat as u16 },
        sectors_per_track: 63,
        num_heads: 255,
        hidden_sectors: base_lba as u32,
        total_sectors_32: if total_sectors >= 0x10000 || fat_type == FatType::Fat32 { total_sectors } else { 0 },
        extended: if fat_type == FatType::Fat32 {
            ExtendedBpb::Fat32 {
                sectors_per_fat_32: layout.sectors_per_fat,
                ext_flags: 0,
                fs_version: 0,
                root_cluster: FIRST_DATA_CLUSTER,
                fs_info_sector: 1,
                backup_boot_sector: 6,
                drive_number: 0x80,
                boot_signature: 0x29,
                volume_id,
                volume_label: options.volume_label,
                fs_type: *b"FAT32   ",
            }
        } else {
            ExtendedBpb::Fat16 {
                drive_number: 0x80,
                boot_signature: 0x29,
                volume_id,
                volume_label: options.volume_label,
                fs_type: if fat_type == FatType::Fat12 { *b"FAT12   " } else { *b"FAT16   " },
            }
        },
    };

    let boot_sector = BootSector { oem_name: *b"rustfat ", bpb: common };

    let mut sector_buf = vec![0u8; bytes_per_sector as usize];
    boot_sector.write(&mut sector_buf);
    device.write_sector(base_lba, &sector_buf).map_err(|_| FatError::DiskErr)?;

    if fat_type == FatType::Fat32 {
        device.write_sector(base_lba + 6, &sector_buf).map_err(|_| FatError::DiskErr)?;

        let fs_info = FsInfo { free_count: layout.cluster_count - 1, next_free: FIRST_DATA_CLUSTER + 1 };
        let mut info_buf = vec![0u8; bytes_per_sector as usize];
        fs_info.write(&mut info_buf);
        device.write_sector(base_lba + 1, &info_buf).map_err(|_| FatError::DiskErr)?;
        device.write_sector(base_lba + 7, &info_buf).map_err(|_| FatError::DiskErr)?;
    }

    let fat_start_lba = base_lba + layout.reserved_sectors as u64;
    let data_start_lba = fat_start_lba + num_fats as u64 * layout.sectors_per_fat + layout.root_dir_sectors as u64;

    let geometry = FatGeometry {
        fat_type,
        fat_start_lba,
        fat_size_sectors: layout.sectors_per_fat,
        num_fats,
        bytes_per_sector,
        data_start_lba,
        sectors_per_cluster,
        total_clusters: layout.cluster_count,
    };
    let mut window = SectorWindow::new(bytes_per_sector, fat_start_lba, layout.sectors_per_fat, num_fats);

    for sector_index in 0..layout.sectors_per_fat {
        let sector = window.move_window(device, fat_start_lba + sector_index)?;
        sector.fill(0);
        window.mark_dirty()?;
    }

    let entry0 = 0xFFFF_FF00 | boot_sector.bpb.media as u32;
    table::put(&geometry, &mut window, device, 0, entry0)?;
    table::put(&geometry, &mut window, device, 1, geometry.end_of_chain_marker())?;

    if fat_type == FatType::Fat32 {
        table::put(&geometry, &mut window, device, FIRST_DATA_CLUSTER, geometry.end_of_chain_marker())?;
    }

    if fat_type == FatType::Fat32 {
        let lba = geometry.cluster_to_lba(FIRST_DATA_CLUSTER);
        for s in 0..sectors_per_cluster as u64 {
            let sector = window.move_window(device, lba + s)?;
            sector.fill(0);
            window.mark_dirty()?;
        }
    } else {
        let root_start = fat_start_lba + num_fats as u64 * layout.sectors_per_fat;
        for s in 0..layout.root_dir_sectors as u64 {
            let sector = window.move_window(device, root_start + s)?;
            sector.fill(0);
            window.mark_dirty()?;
        }
    }

    window.sync(device)?;

    if options.write_partition_table {
        let partition_type = partition_type_for(fat_type, available_sectors);
        mbr::write_single_partition_mbr(device, partition_type, base_lba as u32, available_sectors)?;
    }

    Ok(())
}
