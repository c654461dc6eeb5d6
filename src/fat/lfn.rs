//! The Long File Name (VFAT) engine (§4.F).
//!
//! An LFN is stored as a run of ordinary-looking directory entries
//! immediately preceding the short entry they belong to, each holding 13
//! UTF-16 code units and a checksum of the short name they're attached
//! to. This module has no counterpart in the teacher crate (which never
//! implemented LFN) — it's grounded in the spec's own description of the
//! VFAT scheme plus the well-known on-disk layout (ordinal byte, 5+6+2
//! UTF-16 split, checksum algorithm) that any FAT implementation
//! supporting long names has to reproduce bit for bit to interoperate.

use core::convert::TryInto;

use crate::error::FatResult;
use crate::fat::dir::Attr;

/// One physical LFN directory entry (32 bytes), not yet joined with its
/// siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfnFragment {
    /// 1-based sequence number within the name, OR'd with `0x40` on the
    /// entry closest to the short entry (the "last logical" fragment,
    /// which is physically first on disk).
    pub ordinal: u8,
    pub chars: [u16; 13],
    pub checksum: u8,
}

const LAST_LOGICAL_FLAG: u8 = 0x40;
const DELETED_ORDINAL: u8 = 0xE5;

impl LfnFragment {
    pub fn read(buf: &[u8; 32]) -> Self {
        let mut chars = [0u16; 13];
        for (i, slot) in chars[0..5].iter_mut().enumerate() {
            *slot = u16::from_le_bytes([buf[1 + 2 * i], buf[2 + 2 * i]]);
        }
        for (i, slot) in chars[5..11].iter_mut().enumerate() {
            *slot = u16::from_le_bytes([buf[14 + 2 * i], buf[15 + 2 * i]]);
        }
        for (i, slot) in chars[11..13].iter_mut().enumerate() {
            *slot = u16::from_le_bytes([buf[28 + 2 * i], buf[29 + 2 * i]]);
        }

        Self { ordinal: buf[0], chars, checksum: buf[13] }
    }

    pub fn write(&self, buf: &mut [u8; 32]) {
        buf[0] = self.ordinal;
        buf[11] = Attr::LONG_NAME.bits();
        buf[12] = 0;
        buf[13] = self.checksum;
        buf[26] = 0;
        buf[27] = 0;

        for (i, &c) in self.chars[0..5].iter().enumerate() {
            buf[1 + 2 * i..3 + 2 * i].copy_from_slice(&c.to_le_bytes());
        }
        for (i, &c) in self.chars[5..11].iter().enumerate() {
            buf[14 + 2 * i..16 + 2 * i].copy_from_slice(&c.to_le_bytes());
        }
        for (i, &c) in self.chars[11..13].iter().enumerate() {
            buf[28 + 2 * i..30 + 2 * i].copy_from_slice(&c.to_le_bytes());
        }
    }

    pub fn is_last_logical(&self) -> bool {
        self.ordinal & LAST_LOGICAL_FLAG != 0
    }

    pub fn sequence_number(&self) -> u8 {
        self.ordinal & !LAST_LOGICAL_FLAG
    }
}

/// Computes the VFAT checksum of an 11-byte short name: a rotate-right
/// and add over every byte, so that an LFN fragment can be matched to
/// (and invalidated by edits to) the short entry it names.
pub fn short_name_checksum(short_name: &[u8; 11]) -> u8 {
    short_name.iter().fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

/// Splits a long name into physical fragments in on-disk order: the
/// fragment closest to the short entry (highest sequence number,
/// `LAST_LOGICAL_FLAG` set) comes first in the returned `Vec`, matching
/// how they're laid out immediately above the short entry.
pub fn split_into_fragments(name: &str, checksum: u8) -> Vec<LfnFragment> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let num_fragments = (units.len() + 13 - 1) / 13.max(1);
    let num_fragments = num_fragments.max(1);

    let mut fragments = Vec::with_capacity(num_fragments);
    for seq in 0..num_fragments {
        let start = seq * 13;
        let mut chars = [0xFFFFu16; 13];
        let mut terminated = false;

        for i in 0..13 {
            if let Some(&u) = units.get(start + i) {
                chars[i] = u;
            } else if !terminated {
                chars[i] = 0x0000;
                terminated = true;
            }
        }

        let mut ordinal = (seq + 1) as u8;
        if seq == num_fragments - 1 {
            ordinal |= LAST_LOGICAL_FLAG;
        }

        fragments.push(LfnFragment { ordinal, chars, checksum });
    }

    fragments.reverse();
    fragments
}

/// Reassembles a long name from its physical fragments (in on-disk
/// order, i.e. as returned by [`split_into_fragments`]), validating
/// sequence numbers and checksum consistency. Returns `None` if the
/// fragments don't form a well-formed, contiguous 1..=N sequence or
/// disagree on checksum — the caller should then treat the short entry
/// as having no long name.
pub fn reassemble_fragments(fragments: &[LfnFragment], short_name_checksum: u8) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }

    let expected_count = fragments[0].sequence_number();
    if !fragments[0].is_last_logical() || expected_count == 0 {
        return None;
    }

    for (i, frag) in fragments.iter().enumerate() {
        let expected_seq = expected_count - i as u8;
        if frag.sequence_number() != expected_seq || frag.checksum != short_name_checksum {
            return None;
        }
        if frag.ordinal == DELETED_ORDINAL {
            return None;
        }
    }

    let mut units = Vec::with_capacity(fragments.len() * 13);
    for frag in fragments.iter().rev() {
        for &u in frag.chars.iter() {
            if u == 0x0000 {
                return Some(String::from_utf16_lossy(&units));
            }
            units.push(u);
        }
    }

    Some(String::from_utf16_lossy(&units))
}

/// Generates the 8.3 "numeric tail" used when a long name needs a unique
/// short alias: `NAME~1.EXT` through `NAME~5.EXT`, then (per §4.F) a
/// CRC-16-like hash tail `NAME~XXXX.EXT` from the 6th collision onward.
/// Callers cap `attempt` at 99 and give up with `Denied` past that, per
/// the 99-collision ceiling.
pub fn numeric_tail(base: &[u8], attempt: u32) -> FatResult<[u8; 8]> {
    let mut out = [b' '; 8];

    if attempt < 6 {
        let suffix = format!("~{attempt}");
        let keep = 8 - suffix.len();
        out[..keep.min(base.len())].copy_from_slice(&base[..keep.min(base.len())]);
        out[keep..keep + suffix.len()].copy_from_slice(suffix.as_bytes());
        Ok(out)
    } else {
        let crc = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);
        let hash = crc.checksum(base) ^ (attempt as u16);
        let suffix = format!("~{hash:04X}");
        let keep = 8 - suffix.len();
        out[..keep.min(base.len())].copy_from_slice(&base[..keep.min(base.len())]);
        out[keep..keep + suffix.len()].copy_from_slice(suffix.as_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_known_value() {
        // "README  TXT" is a commonly cited worked example for the VFAT
        // checksum algorithm.
        let name = *b"README  TXT";
        let sum = short_name_checksum(&name);
        // Recompute by hand to sanity check, rather than hardcode a
        // value pulled from elsewhere.
        let expected = name.iter().fold(0u8, |acc, &b| acc.rotate_right(1).wrapping_add(b));
        assert_eq!(sum, expected);
    }

    #[test]
    fn split_and_reassemble_roundtrip_short_name() {
        let checksum = 0xAB;
        let fragments = split_into_fragments("hello.txt", checksum);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_last_logical());

        let name = reassemble_fragments(&fragments, checksum).unwrap();
        assert_eq!(name, "hello.txt");
    }

    #[test]
    fn split_and_reassemble_roundtrip_long_name() {
        let checksum = 0x42;
        let long_name = "this is a very long file name indeed.txt";
        let fragments = split_into_fragments(long_name, checksum);
        assert!(fragments.len() > 1);

        let name = reassemble_fragments(&fragments, checksum).unwrap();
        assert_eq!(name, long_name);
    }

    #[test]
    fn reassemble_rejects_checksum_mismatch() {
        let fragments = split_into_fragments("name.txt", 0x10);
        assert!(reassemble_fragments(&fragments, 0x11).is_none());
    }

    #[test]
    fn numeric_tail_uses_tilde_n_then_crc_fallback() {
        let base = *b"LONGNAME";
        let tail1 = numeric_tail(&base, 1).unwrap();
        assert_eq!(&tail1[..2], b"LO");
        assert!(tail1.ends_with(b"~1"));

        let tail5 = numeric_tail(&base, 5).unwrap();
        assert!(tail5.ends_with(b"~5"));

        // The 6th collision switches to the hashed tail, not `~6`.
        let tail6 = numeric_tail(&base, 6).unwrap();
        assert!(!tail6.ends_with(b"~6"));

        let tail_fallback = numeric_tail(&base, 10).unwrap();
        assert!(tail_fallback.iter().any(|&b| b == b'~'));
    }
}
