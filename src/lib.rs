//! A generic FAT12/FAT16/FAT32 filesystem driver over an abstract block
//! device (§1 OVERVIEW).
//!
//! [`FatFsContext`] is the crate's single piece of global state (§9 "Global
//! state"): a drive-indexed mount table, the process-wide open-file
//! registries, and the shared [`Codepage`]/[`Clock`] collaborators, all
//! owned by whatever the host application embeds instead of living behind
//! crate-level `static`s. Every public method locks exactly the one drive
//! slot it touches for its whole duration (§5), following the teacher
//! crate's single-mutex-per-volume discipline even though the teacher
//! itself never grew a multi-drive context.

pub mod clock;
pub mod codepage;
pub mod dirhandle;
pub mod error;
pub mod fat;
pub mod format;
pub mod gpt;
pub mod mbr;
pub mod mutex;
pub mod path;
pub mod registry;
pub mod storage;
pub mod util;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::{Clock, Timestamp};
use crate::codepage::Codepage;
use crate::error::{FatError, FatResult};
use crate::fat::dir::Attr;
use crate::fat::file::{FileHandle, SeekFrom};
use crate::fat::table::Cluster;
use crate::fat::volume::Volume;
use crate::format::FormatOptions;
use crate::mutex::{Mutex, MutexInterface};
use crate::registry::{OpenFileKey, OpenFileRegistry};
use crate::storage::BlockDevice;

/// One mounted volume and the bookkeeping `FatFsContext` keeps alongside it:
/// the mutex §5 requires every operation to hold for its whole duration, the
/// open-file registry that mutex also guards (§4.K), and the mount
/// generation stamped into every handle opened against it (§4.H).
struct DriveSlot<D: BlockDevice> {
    volume: Mutex<Volume<D>>,
    registry: OpenFileRegistry,
    generation: u64,
}

/// A file opened through [`FatFsContext::open`]. Carries the drive index
/// it belongs to (rather than a raw pointer into `FatFsContext`, per §9
/// "Cyclic ownership") so every later call can re-borrow the right mutex;
/// the embedded [`FileHandle`] itself carries the mount generation that
/// invalidates it across an unmount.
pub struct File {
    drive: u8,
    key: OpenFileKey,
    handle: FileHandle,
}

impl File {
    pub fn tell(&self) -> u32 {
        self.handle.tell()
    }

    pub fn size(&self) -> u32 {
        self.handle.size()
    }

    pub fn eof(&self) -> bool {
        self.handle.eof()
    }
}

/// A directory opened through [`FatFsContext::opendir`]/`findfirst`.
pub struct Dir {
    drive: u8,
    stream: dirhandle::DirStream,
}

/// The current-drive/current-directory state `chdir`/`getcwd` track,
/// independent of any one mounted volume (§6.5).
struct CwdState {
    drive: u8,
    path: String,
}

impl Default for CwdState {
    fn default() -> Self {
        Self { drive: 0, path: String::from("/") }
    }
}

/// Owns every mounted volume and the state that spans them: the mount
/// table, a process-wide mount-generation counter, the shared codepage and
/// clock, and the current drive/directory. One `FatFsContext` per host
/// application, per §9's "Global state" resolution — nothing here is a
/// crate-level `static`.
pub struct FatFsContext<D: BlockDevice + Send> {
    drives: Mutex<HashMap<u8, DriveSlot<D>>>,
    next_generation: AtomicU64,
    codepage: Box<dyn Codepage + Send + Sync>,
    clock: Box<dyn Clock + Send + Sync>,
    cwd: Mutex<CwdState>,
}

impl<D: BlockDevice + Send> FatFsContext<D> {
    pub fn new(codepage: Box<dyn Codepage + Send + Sync>, clock: Box<dyn Clock + Send + Sync>) -> Self {
        Self {
            drives: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            codepage,
            clock,
            cwd: Mutex::new(CwdState::default()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// `mount` (§6.5): runs the mount pipeline on `device` and binds it to
    /// `drive`, replacing whatever was mounted there. Fails if `drive` is
    /// already mounted and still has open files.
    pub fn mount(&self, drive: u8, device: D, partition_index: u32) -> FatResult<()> {
        self.drives.cs(|drives| {
            if let Some(existing) = drives.get(&drive) {
                if !existing.registry.is_empty() {
                    return Err(FatError::Locked);
                }
            }

            let generation = self.next_generation();
            let volume = Volume::mount(device, partition_index, generation)?;
            drives.insert(drive, DriveSlot { volume: Mutex::new(volume), registry: OpenFileRegistry::new(), generation });
            Ok(())
        })
    }

    /// `unmount`: drops the drive slot, refusing if any file opened under
    /// it is still tracked by the registry.
    pub fn unmount(&self, drive: u8) -> FatResult<()> {
        self.drives.cs(|drives| match drives.get(&drive) {
            Some(slot) if !slot.registry.is_empty() => Err(FatError::Locked),
            Some(_) => {
                drives.remove(&drive);
                Ok(())
            }
            None => Err(FatError::NotEnabled),
        })
    }

    /// `mkfs`: formats `device` per `options`, without mounting it.
    pub fn mkfs(&self, device: &mut D, options: &FormatOptions) -> FatResult<()> {
        format::format_volume(device, options, self.clock.as_ref())
    }

    /// `fdisk`: reads back the partition layout a prior `mkfs` (or any
    /// other MBR/GPT writer) left on `device`.
    pub fn fdisk(&self, device: &mut D) -> FatResult<mbr::DiskLayout> {
        mbr::read_disk_layout(device)
    }

    fn with_drive<R>(&self, drive: u8, f: impl FnOnce(&mut Volume<D>, &OpenFileRegistry, u64) -> FatResult<R>) -> FatResult<R> {
        self.drives.cs(|drives| {
            let slot = drives.get(&drive).ok_or(FatError::NotEnabled)?;
            slot.volume.cs(|volume| f(volume, &slot.registry, slot.generation))
        })
    }

    /// Resolves `components`' leading path components to the cluster of
    /// the directory that should hold the final one, returning that
    /// cluster plus the final component's name. `fixed_root` only ever
    /// describes the true root: once resolution has descended into any
    /// subdirectory, later hops always walk ordinary cluster chains, never
    /// the FAT12/16 fixed region.
    fn resolve_parent<'n>(&self, volume: &mut Volume<D>, components: &'n [&'n str]) -> FatResult<(Option<(u64, u32)>, Cluster, &'n str)> {
        let (last, leading) = components.split_last().ok_or(FatError::InvalidName)?;

        let mut fixed_root = volume.fixed_root;
        let mut cluster = volume.root_cluster;

        for component in leading {
            let found = path::dir_find(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, cluster, component)?
                .ok_or(FatError::NoPath)?;

            if !path::is_directory(&found.entry) {
                return Err(FatError::NotDirectory);
            }

            cluster = found.entry.cluster();
            fixed_root = None;
        }

        Ok((fixed_root, cluster, last))
    }

    /// Resolves `components` fully (including the last one) to a
    /// directory's own `(fixed_root, cluster)`, for `opendir`/`findfirst`.
    /// An empty component list names the volume's root directory.
    fn resolve_dir(&self, volume: &mut Volume<D>, components: &[&str]) -> FatResult<(Option<(u64, u32)>, Cluster)> {
        if components.is_empty() {
            return Ok((volume.fixed_root, volume.root_cluster));
        }

        let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, components)?;
        let found = path::dir_find(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, parent_cluster, name)?
            .ok_or(FatError::NoPath)?;
        if !path::is_directory(&found.entry) {
            return Err(FatError::NotDirectory);
        }
        Ok((None, found.entry.cluster()))
    }

    /// `open`: resolves `path`, enforces the open-file registry's
    /// reader/writer discipline (§4.K), and returns a handle. `create` asks
    /// for the file to be created if it doesn't already exist; `truncate`
    /// asks for an existing file's contents to be discarded on open;
    /// `append` seeks to end-of-file on open and before every write.
    pub fn open(&self, drive: u8, path: &str, writable: bool, create: bool, truncate: bool, append: bool) -> FatResult<File> {
        self.with_drive(drive, |volume, registry, generation| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;

            let found = path::dir_find(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, parent_cluster, name)?;

            let location = match found {
                Some(found) if path::is_directory(&found.entry) => return Err(FatError::IsDirectory),
                Some(found) => found.location,
                None if create => {
                    let stamp = volume.stamp_timestamp(self.codepage.as_ref(), self.clock.now());
                    let mut alloc = volume.alloc_cursor();
                    let result = dirhandle::touch(&volume.geometry, &mut volume.window, &mut volume.device, &mut alloc, self.codepage.as_ref(), fixed_root, parent_cluster, name, stamp);
                    volume.apply_alloc_cursor(alloc);
                    result?
                }
                None => return Err(FatError::NoFile),
            };

            let key = OpenFileKey { mount_generation: generation, dir_cluster: location.cluster, dir_offset: location.offset_in_cluster };
            if writable {
                registry.open_for_write(key)?;
            } else {
                registry.open_for_read(key)?;
            }

            let entry = match dirhandle::stat_at(&volume.geometry, &mut volume.window, &mut volume.device, location) {
                Ok(e) => e,
                Err(e) => {
                    registry.close(key);
                    return Err(e);
                }
            };

            let mut handle = match FileHandle::open(volume, location, &entry, writable, append) {
                Ok(h) => h,
                Err(e) => {
                    registry.close(key);
                    return Err(e);
                }
            };

            if truncate && writable {
                if let Err(e) = handle.truncate(volume, 0) {
                    registry.close(key);
                    return Err(e);
                }
            }

            Ok(File { drive, key, handle })
        })
    }

    /// `close`: flushes the handle's own directory entry and the volume's
    /// sector window, then releases its open-file registry slot regardless
    /// of whether the flush succeeded.
    pub fn close(&self, mut file: File) -> FatResult<()> {
        self.with_drive(file.drive, |volume, registry, generation| {
            if file.handle.mount_generation != generation {
                registry.close(file.key);
                return Err(FatError::InvalidObject);
            }
            let result = file.handle.sync(volume);
            registry.close(file.key);
            result
        })
    }

    pub fn read(&self, file: &mut File, buf: &mut [u8]) -> FatResult<usize> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.read(volume, buf))
    }

    pub fn write(&self, file: &mut File, buf: &[u8]) -> FatResult<usize> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.write(volume, buf))
    }

    /// `sync`: flushes this file's directory entry and the volume without
    /// closing the handle.
    pub fn sync(&self, file: &mut File) -> FatResult<()> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.sync(volume))
    }

    pub fn lseek(&self, file: &mut File, from: SeekFrom) -> FatResult<u32> {
        file.handle.seek(from)
    }

    pub fn truncate(&self, file: &mut File, new_size: u32) -> FatResult<()> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.truncate(volume, new_size))
    }

    /// `expand`: preallocates and zero-fills clusters so the file covers
    /// `new_size`. Holds the drive mutex for the whole call so there is no
    /// externally observable point at which the chain is partially grown
    /// (§9 "Reentrancy").
    pub fn expand(&self, file: &mut File, new_size: u32) -> FatResult<()> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.expand(volume, new_size))
    }

    pub fn putc(&self, file: &mut File, byte: u8) -> FatResult<()> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.putc(volume, byte))
    }

    pub fn puts(&self, file: &mut File, s: &str) -> FatResult<usize> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.puts(volume, s))
    }

    pub fn gets(&self, file: &mut File, max_len: usize) -> FatResult<String> {
        self.with_drive(file.drive, |volume, _registry, _gen| file.handle.gets(volume, max_len))
    }

    /// `opendir`: resolves `path` to a directory and opens it for
    /// iteration.
    pub fn opendir(&self, drive: u8, path: &str) -> FatResult<Dir> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, cluster) = self.resolve_dir(volume, &parsed.components)?;
            Ok(Dir { drive, stream: dirhandle::DirStream::open(fixed_root, cluster) })
        })
    }

    /// `closedir`: a no-op beyond dropping the handle — directory streams
    /// hold no registry slot, matching `readdir`'s read-only nature.
    pub fn closedir(&self, _dir: Dir) {}

    pub fn readdir(&self, dir: &mut Dir) -> FatResult<Option<dirhandle::DirEntryInfo>> {
        self.with_drive(dir.drive, |volume, _registry, _gen| dir.stream.read_next(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref()))
    }

    /// `findfirst`: resolves `path` to a directory and returns a stream
    /// plus the first entry matching `pattern`, if any.
    pub fn findfirst(&self, drive: u8, path: &str, pattern: &str) -> FatResult<(Dir, Option<dirhandle::DirEntryInfo>)> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, cluster) = self.resolve_dir(volume, &parsed.components)?;
            let (stream, first) = dirhandle::find_first(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, cluster, pattern)?;
            Ok((Dir { drive, stream }, first))
        })
    }

    pub fn findnext(&self, dir: &mut Dir, pattern: &str) -> FatResult<Option<dirhandle::DirEntryInfo>> {
        self.with_drive(dir.drive, |volume, _registry, _gen| dir.stream.find_next(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), pattern))
    }

    /// `stat`: resolves `path` without opening it.
    pub fn stat(&self, drive: u8, path: &str) -> FatResult<dirhandle::DirEntryInfo> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;
            let found = dirhandle::stat(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, parent_cluster, name)?;
            Ok(dirhandle::DirEntryInfo {
                name: found.long_name.unwrap_or_else(|| name.to_string()),
                attr: found.entry.attr,
                size: found.entry.file_size,
                cluster: found.entry.cluster(),
                location: found.location,
                lfn_locations: found.lfn_locations,
            })
        })
    }

    /// `mkdir`: resolves `path`'s parent and creates the final component
    /// as a directory.
    pub fn mkdir(&self, drive: u8, path: &str) -> FatResult<()> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;
            let stamp = volume.stamp_timestamp(self.codepage.as_ref(), self.clock.now());
            let mut alloc = volume.alloc_cursor();
            let result = dirhandle::mkdir(&volume.geometry, &mut volume.window, &mut volume.device, &mut alloc, self.codepage.as_ref(), fixed_root, parent_cluster, name, stamp);
            volume.apply_alloc_cursor(alloc);
            result?;
            volume.sync()
        })
    }

    /// `unlink`: resolves `path` and removes it, refusing if the
    /// open-file registry reports it in use.
    pub fn unlink(&self, drive: u8, path: &str) -> FatResult<()> {
        self.with_drive(drive, |volume, registry, generation| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;
            let mut alloc = volume.alloc_cursor();
            let result = dirhandle::unlink(&volume.geometry, &mut volume.window, &mut volume.device, &mut alloc, self.codepage.as_ref(), fixed_root, parent_cluster, name, |location| {
                registry.is_open(OpenFileKey { mount_generation: generation, dir_cluster: location.cluster, dir_offset: location.offset_in_cluster })
            });
            volume.apply_alloc_cursor(alloc);
            result?;
            volume.sync()
        })
    }

    /// `rename`: both paths must name the same mounted drive — cross-drive
    /// moves are out of scope, since a directory entry can only ever be
    /// rewritten within its own volume's cluster space.
    pub fn rename(&self, drive: u8, old_path: &str, new_path: &str) -> FatResult<()> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let old_parsed = path::parse_path(old_path)?;
            let new_parsed = path::parse_path(new_path)?;
            let (old_fixed_root, old_parent_cluster, old_name) = self.resolve_parent(volume, &old_parsed.components)?;
            let (_, new_parent_cluster, new_name) = self.resolve_parent(volume, &new_parsed.components)?;

            let mut alloc = volume.alloc_cursor();
            let result = dirhandle::rename(
                &volume.geometry,
                &mut volume.window,
                &mut volume.device,
                &mut alloc,
                self.codepage.as_ref(),
                old_fixed_root,
                old_parent_cluster,
                old_name,
                new_parent_cluster,
                new_name,
            );
            volume.apply_alloc_cursor(alloc);
            result?;
            volume.sync()
        })
    }

    /// `chmod`: resolves `path` and replaces its attribute byte.
    pub fn chmod(&self, drive: u8, path: &str, attr: Attr) -> FatResult<()> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;
            let found = dirhandle::stat(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, parent_cluster, name)?;
            dirhandle::chmod(&volume.geometry, &mut volume.window, &mut volume.device, found.location, attr)?;
            volume.sync()
        })
    }

    /// `utime`: resolves `path` and stamps its write date/time.
    pub fn utime(&self, drive: u8, path: &str, stamp: Timestamp) -> FatResult<()> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let parsed = path::parse_path(path)?;
            let (fixed_root, parent_cluster, name) = self.resolve_parent(volume, &parsed.components)?;
            let found = dirhandle::stat(&volume.geometry, &mut volume.window, &mut volume.device, self.codepage.as_ref(), fixed_root, parent_cluster, name)?;
            dirhandle::utime(&volume.geometry, &mut volume.window, &mut volume.device, found.location, stamp)?;
            volume.sync()
        })
    }

    pub fn getlabel(&self, drive: u8) -> FatResult<[u8; 11]> {
        self.with_drive(drive, |volume, _registry, _gen| Ok(volume.volume_label))
    }

    pub fn setlabel(&self, drive: u8, label: [u8; 11]) -> FatResult<()> {
        self.with_drive(drive, |volume, _registry, _gen| {
            volume.volume_label = label;
            volume.sync()
        })
    }

    /// `getfree`: total clusters and free clusters in the volume. Uses the
    /// live, rolling-updated free-cluster count kept by `create_chain`/
    /// `remove_chain` (§4.B) when one exists, otherwise walks the whole FAT.
    pub fn getfree(&self, drive: u8) -> FatResult<(u32, u32)> {
        self.with_drive(drive, |volume, _registry, _gen| {
            let total = volume.geometry.total_clusters;
            if let Some(free_clst) = volume.free_clst {
                if free_clst <= total {
                    return Ok((total, free_clst));
                }
            }

            let mut free = 0u32;
            for cluster in crate::fat::table::FIRST_DATA_CLUSTER..crate::fat::table::FIRST_DATA_CLUSTER + total {
                let value = crate::fat::table::get(&volume.geometry, &mut volume.window, &mut volume.device, cluster)?;
                if volume.geometry.is_free(value) {
                    free += 1;
                }
            }
            Ok((total, free))
        })
    }

    /// `chdrive`/`chdir`/`getcwd` (§6.5): host-side convenience state, not
    /// interpreted by any of the mount/open/etc. calls above — callers that
    /// want relative-path resolution combine `getcwd`'s result with their
    /// own path before calling in.
    pub fn chdrive(&self, drive: u8) {
        self.cwd.cs(|cwd| cwd.drive = drive);
    }

    pub fn chdir(&self, path: &str) {
        self.cwd.cs(|cwd| cwd.path = path.to_string());
    }

    pub fn getcwd(&self) -> (u8, String) {
        self.cwd.cs(|cwd| (cwd.drive, cwd.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DisabledClock;
    use crate::codepage::Cp437;
    use crate::format::FormatOptions;
    use crate::storage::MemoryBlockDevice;

    fn formatted_context() -> FatFsContext<MemoryBlockDevice> {
        let mut device = MemoryBlockDevice::new(512, 65536);
        let ctx = FatFsContext::new(Box::new(Cp437), Box::new(DisabledClock));
        let options = FormatOptions::default();
        ctx.mkfs(&mut device, &options).unwrap();
        ctx.mount(0, device, 0).unwrap();
        ctx
    }

    #[test]
    fn create_write_close_reopen_read_back() {
        let ctx = formatted_context();

        let mut f = ctx.open(0, "HELLO.TXT", true, true, false, false).unwrap();
        ctx.write(&mut f, b"hello, world").unwrap();
        ctx.close(f).unwrap();

        let mut f = ctx.open(0, "HELLO.TXT", false, false, false, false).unwrap();
        let mut buf = [0u8; 12];
        let n = ctx.read(&mut f, &mut buf).unwrap();
        ctx.close(f).unwrap();

        assert_eq!(n, 12);
        assert_eq!(&buf, b"hello, world");
    }

    #[test]
    fn mkdir_then_findfirst_sees_it() {
        let ctx = formatted_context();
        ctx.mkdir(0, "SUBDIR").unwrap();

        let (dir, first) = ctx.findfirst(0, "/", "*").unwrap();
        ctx.closedir(dir);
        assert!(first.is_some());
    }

    #[test]
    fn unlink_refuses_while_open_for_write() {
        let ctx = formatted_context();
        let f = ctx.open(0, "LOCKED.TXT", true, true, false, false).unwrap();

        assert_eq!(ctx.unlink(0, "LOCKED.TXT").unwrap_err(), FatError::Locked);

        ctx.close(f).unwrap();
        ctx.unlink(0, "LOCKED.TXT").unwrap();
    }

    #[test]
    fn unmount_refuses_with_open_files() {
        let ctx = formatted_context();
        let f = ctx.open(0, "OPEN.TXT", true, true, false, false).unwrap();

        assert_eq!(ctx.unmount(0).unwrap_err(), FatError::Locked);
        ctx.close(f).unwrap();
        ctx.unmount(0).unwrap();
    }
}
