//! Reading GUID Partition Tables (GPT).
//!
//! As in the teacher crate, this intentionally doesn't expose everything
//! GPT can describe — just enough to find the one FAT partition we were
//! asked to mount (§4.A partition discovery: GPT header at LBA 1, parse
//! the partition entry array, hand the chosen entry's LBA range back to
//! the mount pipeline as a sub-range of the device).

use core::convert::TryInto;
use core::fmt::{self, Debug};

use crate::error::{FatError, FatResult};
use crate::storage::BlockDevice;

pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";

/// A "middle-endian" 128-bit GUID, as used in GPT.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid {
    first: u32,
    second: u16,
    third: u16,
    fourth: u16,
    fifth_p1: u16,
    fifth_p2: u32,
}

impl Guid {
    pub fn from_mixed_u128(u: u128) -> Self {
        Self::from_mixed(u.to_le_bytes())
    }

    pub fn microsoft_basic_data() -> Self {
        Guid::from_mixed_u128(0xEBD0A0A2_B9E5_4433_87C0_68B6B72699C7u128)
    }

    pub fn from_mixed([p, o, n, m, l, k, j, i, g, h, e, f, a, b, c, d]: [u8; 16]) -> Self {
        Self {
            first: u32::from_le_bytes([a, b, c, d]),
            second: u16::from_le_bytes([e, f]),
            third: u16::from_le_bytes([g, h]),
            fourth: u16::from_be_bytes([i, j]),
            fifth_p1: u16::from_be_bytes([k, l]),
            fifth_p2: u32::from_be_bytes([m, n, o, p]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let [a, b, c, d] = self.first.to_le_bytes();
        let [e, f] = self.second.to_le_bytes();
        let [g, h] = self.third.to_le_bytes();
        let [i, j] = self.fourth.to_be_bytes();
        let [k, l] = self.fifth_p1.to_be_bytes();
        let [m, n, o, p] = self.fifth_p2.to_be_bytes();

        [a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p]
    }

    pub fn from_bytes([a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p]: [u8; 16]) -> Self {
        Self {
            first: u32::from_le_bytes([a, b, c, d]),
            second: u16::from_le_bytes([e, f]),
            third: u16::from_le_bytes([g, h]),
            fourth: u16::from_be_bytes([i, j]),
            fifth_p1: u16::from_be_bytes([k, l]),
            fifth_p2: u32::from_be_bytes([m, n, o, p]),
        }
    }
}

impl Debug for Guid {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:04X}{:08X}",
            self.first, self.second, self.third, self.fourth, self.fifth_p1, self.fifth_p2,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpt {
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    pub partition_entries_starting_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_entries_crc32: u32,
}

#[derive(Clone)]
pub struct PartitionEntry {
    pub partition_type: Guid,
    pub unique_guid: Guid,
    pub first_lba: u64,
    /// Inclusive.
    pub last_lba: u64,
    /// Bit 60 denotes read-only.
    pub attribute_flags: u64,
    pub name: [u16; 36],
}

impl Debug for PartitionEntry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PartitionEntry")
            .field("partition_type", &self.partition_type)
            .field("unique_guid", &self.unique_guid)
            .field("first_lba", &self.first_lba)
            .field("last_lba", &self.last_lba)
            .field("attribute_flags", &self.attribute_flags)
            .finish()
    }
}

impl PartitionEntry {
    pub fn is_empty(&self) -> bool {
        self.partition_type == Guid::from_bytes([0; 16])
    }
}

impl Gpt {
    pub fn read_gpt<D: BlockDevice>(device: &mut D) -> FatResult<Gpt> {
        let mut sector = vec![0u8; device.sector_size() as usize];
        device.read_sector(1, &mut sector).map_err(|_| FatError::DiskErr)?;

        if sector[0..8] != GPT_SIGNATURE {
            return Err(FatError::NoFilesystem);
        }

        Ok(Self {
            revision: u32::from_le_bytes(sector[8..12].try_into().unwrap()),
            header_size: u32::from_le_bytes(sector[12..16].try_into().unwrap()),
            header_crc32: u32::from_le_bytes(sector[16..20].try_into().unwrap()),
            current_lba: u64::from_le_bytes(sector[24..32].try_into().unwrap()),
            backup_lba: u64::from_le_bytes(sector[32..40].try_into().unwrap()),
            first_usable_lba: u64::from_le_bytes(sector[40..48].try_into().unwrap()),
            last_usable_lba: u64::from_le_bytes(sector[48..56].try_into().unwrap()),
            disk_guid: Guid::from_bytes(sector[56..72].try_into().unwrap()),
            partition_entries_starting_lba: u64::from_le_bytes(sector[72..80].try_into().unwrap()),
            num_partition_entries: u32::from_le_bytes(sector[80..84].try_into().unwrap()),
            partition_entry_size: u32::from_le_bytes(sector[84..88].try_into().unwrap()),
            partition_entries_crc32: u32::from_le_bytes(sector[88..92].try_into().unwrap()),
        })
    }

    pub fn get_partition_entry<D: BlockDevice>(&self, device: &mut D, idx: u32) -> FatResult<PartitionEntry> {
        if idx >= self.num_partition_entries {
            return Err(FatError::InvalidParameter);
        }

        let sector_size = device.sector_size() as u64;
        let entry_size = self.partition_entry_size as u64;
        let entries_per_sector = sector_size / entry_size;
        let lba = self.partition_entries_starting_lba + idx as u64 / entries_per_sector;
        let offset = ((idx as u64 % entries_per_sector) * entry_size) as usize;

        let mut sector = vec![0u8; device.sector_size() as usize];
        device.read_sector(lba, &mut sector).map_err(|_| FatError::DiskErr)?;

        let entry = &sector[offset..offset + self.partition_entry_size as usize];

        Ok(PartitionEntry {
            partition_type: Guid::from_bytes(entry[0..16].try_into().unwrap()),
            unique_guid: Guid::from_bytes(entry[16..32].try_into().unwrap()),
            first_lba: u64::from_le_bytes(entry[32..40].try_into().unwrap()),
            last_lba: u64::from_le_bytes(entry[40..48].try_into().unwrap()),
            attribute_flags: u64::from_le_bytes(entry[48..56].try_into().unwrap()),
            name: {
                let mut buf = [0u16; 36];
                for (i, slot) in buf.iter_mut().enumerate() {
                    *slot = u16::from_le_bytes([entry[56 + 2 * i], entry[56 + 2 * i + 1]]);
                }
                buf
            },
        })
    }

    /// First non-empty partition entry, if any — used by the mount
    /// pipeline when the caller didn't name a specific partition index.
    pub fn first_partition<D: BlockDevice>(&self, device: &mut D) -> FatResult<Option<PartitionEntry>> {
        for idx in 0..self.num_partition_entries {
            let entry = self.get_partition_entry(device, idx)?;
            if !entry.is_empty() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod gpt_tests {
    use super::*;

    // Test case comes from here: https://developer.apple.com/library/archive/technotes/tn2166/_index.html#//apple_ref/doc/uid/DTS10003927-CH1-SUBSECTION11
    #[test]
    fn guid_mixed_to_disk() {
        assert_eq!(
            Guid::from_mixed(0xC12A7328_F81F_11D2_BA4B_00A0C93EC93Bu128.to_le_bytes()).to_bytes(),
            [0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9, 0x3b],
        )
    }

    #[test]
    fn roundtrip() {
        fn trip(a: u128) {
            let g = Guid::from_mixed_u128(a);
            assert_eq!(g, Guid::from_bytes(g.to_bytes()));
        }

        trip(0xC12A7328_F81F_11D2_BA4B_00A0C93EC93Bu128);
    }
}
