//! The open-file registry (§4.K): enforces "one writer xor N readers"
//! across every handle open on a mounted volume, keyed so an entry
//! survives the file being looked up again by a different path.
//!
//! No teacher counterpart (the teacher crate never tracked open files at
//! all — every `FileWrapper` could race another). Modeled on the real
//! FatFs `FIL_LOCK` table the spec describes: a small counter per open
//! object rather than a full reader/writer lock, so a `sync()`-heavy
//! caller pays no blocking cost, only a bookkeeping check.

use std::collections::HashMap;

use crate::error::{FatError, FatResult};
use crate::fat::table::Cluster;
use crate::mutex::{Mutex, MutexInterface};

/// Identifies an open object independent of the path used to find it:
/// which mounted volume, which directory held its entry, and the byte
/// offset of the entry within that directory. Surviving path
/// re-resolution is what makes this usable as a registry key rather than
/// the path string itself (§4.K).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFileKey {
    pub mount_generation: u64,
    pub dir_cluster: Cluster,
    pub dir_offset: u32,
}

/// Exclusive-write marker: distinguishable from any legal reader count
/// because reader counts are capped well below it.
const WRITE_LOCK: u32 = 0x100;
const MAX_READERS: u32 = 0xFF;

/// Tracks open-file counters for every handle on one mounted volume.
/// `FatFsContext` holds one of these per mount.
pub struct OpenFileRegistry {
    entries: Mutex<HashMap<OpenFileKey, u32>>,
}

impl OpenFileRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Registers a read-mode open: fails if the file is already open for
    /// write, or if the reader count has saturated.
    pub fn open_for_read(&self, key: OpenFileKey) -> FatResult<()> {
        self.entries.cs(|map| {
            let count = map.entry(key).or_insert(0);
            if *count == WRITE_LOCK {
                return Err(FatError::Locked);
            }
            if *count >= MAX_READERS {
                return Err(FatError::TooManyOpenFiles);
            }
            *count += 1;
            Ok(())
        })
    }

    /// Registers a write-mode open: fails if the file is open at all,
    /// under either mode.
    pub fn open_for_write(&self, key: OpenFileKey) -> FatResult<()> {
        self.entries.cs(|map| {
            if map.contains_key(&key) {
                return Err(FatError::Locked);
            }
            map.insert(key, WRITE_LOCK);
            Ok(())
        })
    }

    /// Releases one reference. Write-mode closes (and the last reader's
    /// close) free the slot entirely.
    pub fn close(&self, key: OpenFileKey) {
        self.entries.cs(|map| {
            if let Some(count) = map.get_mut(&key) {
                if *count == WRITE_LOCK || *count <= 1 {
                    map.remove(&key);
                } else {
                    *count -= 1;
                }
            }
        });
    }

    /// `unlink`/`rename` precondition: the file must not be open under
    /// any mode.
    pub fn is_open(&self, key: OpenFileKey) -> bool {
        self.entries.cs(|map| map.contains_key(&key))
    }

    /// `unmount`'s precondition: nothing on this volume is open at all.
    pub fn is_empty(&self) -> bool {
        self.entries.cs(|map| map.is_empty())
    }
}

impl Default for OpenFileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(offset: u32) -> OpenFileKey {
        OpenFileKey { mount_generation: 1, dir_cluster: 2, dir_offset: offset }
    }

    #[test]
    fn multiple_readers_allowed() {
        let reg = OpenFileRegistry::new();
        reg.open_for_read(key(0)).unwrap();
        reg.open_for_read(key(0)).unwrap();
        assert!(reg.is_open(key(0)));
    }

    #[test]
    fn writer_excludes_readers_and_other_writers() {
        let reg = OpenFileRegistry::new();
        reg.open_for_write(key(0)).unwrap();
        assert_eq!(reg.open_for_read(key(0)).unwrap_err(), FatError::Locked);
        assert_eq!(reg.open_for_write(key(0)).unwrap_err(), FatError::Locked);
    }

    #[test]
    fn reader_excludes_writer() {
        let reg = OpenFileRegistry::new();
        reg.open_for_read(key(0)).unwrap();
        assert_eq!(reg.open_for_write(key(0)).unwrap_err(), FatError::Locked);
    }

    #[test]
    fn close_frees_slot_after_last_reader() {
        let reg = OpenFileRegistry::new();
        reg.open_for_read(key(0)).unwrap();
        reg.open_for_read(key(0)).unwrap();
        reg.close(key(0));
        assert!(reg.is_open(key(0)));
        reg.close(key(0));
        assert!(!reg.is_open(key(0)));
    }

    #[test]
    fn unrelated_keys_do_not_interfere() {
        let reg = OpenFileRegistry::new();
        reg.open_for_write(key(0)).unwrap();
        reg.open_for_read(key(32)).unwrap();
        assert!(reg.is_open(key(0)));
        assert!(reg.is_open(key(32)));
    }
}
