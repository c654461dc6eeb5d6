//! MBR / EBR partition table parsing (§4.A partition discovery).
//!
//! The mount pipeline tries, in order: a GPT protective MBR (partition
//! type `0xEE`, §4.A) handed off to [`crate::gpt`]; a classic MBR with up
//! to four primary partitions, one of which may be an extended partition
//! whose logical volumes are chained through EBRs; or, if neither looks
//! like a partition table at all, a "super floppy" layout where the BPB
//! sits directly at LBA 0 and the whole device is one volume.

use core::convert::TryInto;

use crate::error::{FatError, FatResult};
use crate::storage::BlockDevice;

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const GPT_PROTECTIVE_TYPE: u8 = 0xEE;
const EXTENDED_TYPE_CHS: u8 = 0x05;
const EXTENDED_TYPE_LBA: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub first_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    fn parse(raw: &[u8]) -> Self {
        PartitionEntry {
            bootable: raw[0] == 0x80,
            partition_type: raw[4],
            first_lba: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
            sector_count: u32::from_le_bytes(raw[12..16].try_into().unwrap()),
        }
    }

    fn is_empty(&self) -> bool {
        self.partition_type == 0 || self.sector_count == 0
    }

    fn is_extended(&self) -> bool {
        self.partition_type == EXTENDED_TYPE_CHS || self.partition_type == EXTENDED_TYPE_LBA
    }
}

/// What a disk's opening sector turned out to describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskLayout {
    /// A GPT protective MBR was found; the real partition table lives in
    /// the GPT header at LBA 1.
    GptProtective,
    /// A classic MBR with zero or more primary/logical partitions.
    Mbr(Vec<PartitionEntry>),
    /// Neither a valid MBR nor GPT signature — the whole device is a
    /// single unpartitioned ("super floppy") volume.
    SuperFloppy,
}

/// Reads LBA 0 and classifies the disk layout, following any extended
/// partition's EBR chain to enumerate logical partitions.
pub fn read_disk_layout<D: BlockDevice>(device: &mut D) -> FatResult<DiskLayout> {
    let mut sector = vec![0u8; device.sector_size() as usize];
    device.read_sector(0, &mut sector).map_err(|_| FatError::DiskErr)?;

    if sector.len() < PARTITION_TABLE_OFFSET + 64 + 2
        || sector[sector.len() - 2..] != MBR_SIGNATURE
    {
        return Ok(DiskLayout::SuperFloppy);
    }

    let raw_entries: Vec<PartitionEntry> = (0..4)
        .map(|i| PartitionEntry::parse(&sector[PARTITION_TABLE_OFFSET + i * 16..PARTITION_TABLE_OFFSET + (i + 1) * 16]))
        .collect();

    if raw_entries[0].partition_type == GPT_PROTECTIVE_TYPE {
        return Ok(DiskLayout::GptProtective);
    }

    let mut partitions = Vec::new();
    for entry in &raw_entries {
        if entry.is_empty() {
            continue;
        }
        if entry.is_extended() {
            partitions.extend(read_ebr_chain(device, entry.first_lba)?);
        } else {
            partitions.push(*entry);
        }
    }

    Ok(DiskLayout::Mbr(partitions))
}

/// Writes a classic MBR with a single primary partition entry, as used by
/// the formatter (§4.L) for new single-partition images. Leaves the other
/// three partition-table slots zeroed.
pub fn write_single_partition_mbr<D: BlockDevice>(
    device: &mut D,
    partition_type: u8,
    first_lba: u32,
    sector_count: u32,
) -> FatResult<()> {
    let mut sector = vec![0u8; device.sector_size() as usize];
    let off = PARTITION_TABLE_OFFSET;
    sector[off] = 0x00;
    sector[off + 4] = partition_type;
    sector[off + 8..off + 12].copy_from_slice(&first_lba.to_le_bytes());
    sector[off + 12..off + 16].copy_from_slice(&sector_count.to_le_bytes());

    let len = sector.len();
    sector[len - 2..].copy_from_slice(&MBR_SIGNATURE);

    device.write_sector(0, &sector).map_err(|_| FatError::DiskErr)
}

/// Walks the linked list of Extended Boot Records rooted at `extended_lba`,
/// each one describing one logical partition plus (optionally) a link to
/// the next EBR, with `first_lba` fields relative to `extended_lba`.
fn read_ebr_chain<D: BlockDevice>(device: &mut D, extended_lba: u32) -> FatResult<Vec<PartitionEntry>> {
    let mut out = Vec::new();
    let mut ebr_lba = extended_lba;

    loop {
        let mut sector = vec![0u8; device.sector_size() as usize];
        device.read_sector(ebr_lba as u64, &mut sector).map_err(|_| FatError::DiskErr)?;

        if sector[sector.len() - 2..] != MBR_SIGNATURE {
            return Err(FatError::IntErr);
        }

        let logical = PartitionEntry::parse(&sector[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16]);
        let next = PartitionEntry::parse(&sector[PARTITION_TABLE_OFFSET + 16..PARTITION_TABLE_OFFSET + 32]);

        if !logical.is_empty() {
            out.push(PartitionEntry {
                bootable: logical.bootable,
                partition_type: logical.partition_type,
                first_lba: ebr_lba + logical.first_lba,
                sector_count: logical.sector_count,
            });
        }

        if next.is_empty() {
            break;
        }
        ebr_lba = extended_lba + next.first_lba;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockDevice;

    fn write_mbr(dev: &mut MemoryBlockDevice, entries: &[(u8, u32, u32)]) {
        let mut sector = vec![0u8; dev.sector_size() as usize];
        for (i, &(ty, first_lba, count)) in entries.iter().enumerate() {
            let off = PARTITION_TABLE_OFFSET + i * 16;
            sector[off] = 0;
            sector[off + 4] = ty;
            sector[off + 8..off + 12].copy_from_slice(&first_lba.to_le_bytes());
            sector[off + 12..off + 16].copy_from_slice(&count.to_le_bytes());
        }
        let len = sector.len();
        sector[len - 2..].copy_from_slice(&MBR_SIGNATURE);
        dev.write_sector(0, &sector).unwrap();
    }

    #[test]
    fn no_signature_is_super_floppy() {
        let mut dev = MemoryBlockDevice::new(512, 16);
        dev.initialize().unwrap();
        assert_eq!(read_disk_layout(&mut dev).unwrap(), DiskLayout::SuperFloppy);
    }

    #[test]
    fn protective_mbr_is_detected() {
        let mut dev = MemoryBlockDevice::new(512, 16);
        dev.initialize().unwrap();
        write_mbr(&mut dev, &[(GPT_PROTECTIVE_TYPE, 1, 15)]);
        assert_eq!(read_disk_layout(&mut dev).unwrap(), DiskLayout::GptProtective);
    }

    #[test]
    fn single_primary_partition_is_parsed() {
        let mut dev = MemoryBlockDevice::new(512, 16);
        dev.initialize().unwrap();
        write_mbr(&mut dev, &[(0x0C, 1, 15)]);
        match read_disk_layout(&mut dev).unwrap() {
            DiskLayout::Mbr(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].first_lba, 1);
                assert_eq!(parts[0].sector_count, 15);
            }
            other => panic!("expected Mbr layout, got {other:?}"),
        }
    }
}
