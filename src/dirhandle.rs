//! The directory-level operations (§4.J): `mkdir`, `unlink`, `rename`,
//! `readdir`/`findfirst`/`findnext`, and the small attribute/timestamp
//! setters `stat`/`chmod`/`utime` rest on.
//!
//! No direct teacher counterpart — the teacher crate never exposed
//! directory mutation above its raw `DirIter`. Built on [`crate::fat::dir`]
//! and [`crate::path`] the way the teacher builds a higher-level operation
//! (`File`/`FileWrapper`) on its lower-level `FatEntryTracer`: thin
//! functions that walk via `DirCursor` and delegate name handling to
//! `path::create_name`/`fat::lfn`.

use crate::clock::Timestamp;
use crate::codepage::Codepage;
use crate::error::{FatError, FatResult};
use crate::fat::dir::{Attr, DirCursor, EntryLocation, EntryState, RawDirEntry};
use crate::fat::lfn::{self, LfnFragment};
use crate::fat::table::{self, Cluster, FatGeometry};
use crate::fat::window::SectorWindow;
use crate::path::{self, FoundEntry};
use crate::storage::BlockDevice;

/// One entry as surfaced by `readdir`/`findnext`: the reconstructed name
/// (long if present, else the short 8.3 form rendered through the
/// codepage) plus the fields `stat` reports.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub attr: Attr,
    pub size: u32,
    pub cluster: Cluster,
    pub location: EntryLocation,
    pub lfn_locations: Vec<EntryLocation>,
}

fn render_short_name(short: &[u8; 11], nt_reserved: u8, codepage: &dyn Codepage) -> String {
    let base = short[0..8].iter().rposition(|&b| b != b' ').map(|i| &short[0..=i]).unwrap_or(&[]);
    let ext = short[8..11].iter().rposition(|&b| b != b' ').map(|i| &short[8..8 + i + 1]).unwrap_or(&[]);

    let base_str: String = base.iter().map(|&b| codepage.oem_to_unicode(b)).collect();
    let base_str = if nt_reserved & path::NT_LOWERCASE_BASE != 0 { base_str.to_ascii_lowercase() } else { base_str };

    let mut name = base_str;
    if !ext.is_empty() {
        let ext_str: String = ext.iter().map(|&b| codepage.oem_to_unicode(b)).collect();
        let ext_str = if nt_reserved & path::NT_LOWERCASE_EXT != 0 { ext_str.to_ascii_lowercase() } else { ext_str };
        name.push('.');
        name.push_str(&ext_str);
    }
    name
}

/// A single step of the directory iterator shared by `readdir` and
/// `findnext`: advances past LFN fragments, reconstructing the name, and
/// skips deleted and volume-label entries. Returns `None` at end-of-table.
fn next_entry<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    codepage: &dyn Codepage,
    cursor: &mut DirCursor,
) -> FatResult<Option<DirEntryInfo>> {
    let mut pending_lfn: Vec<LfnFragment> = Vec::new();
    let mut pending_locations: Vec<EntryLocation> = Vec::new();

    loop {
        let location = cursor.location();
        let entry = match cursor.peek(geometry, window, device)? {
            Some(e) => e,
            None => return Ok(None),
        };

        match entry.state() {
            EntryState::End => return Ok(None),
            EntryState::Deleted => {
                pending_lfn.clear();
                pending_locations.clear();
            }
            EntryState::Live if entry.is_lfn_fragment() => {
                let buf = cursor.peek_raw(geometry, window, device)?.expect("just peeked");
                pending_lfn.push(LfnFragment::read(&buf));
                pending_locations.push(location);
            }
            EntryState::Live if entry.attr.contains(Attr::VOLUME_ID) => {
                pending_lfn.clear();
                pending_locations.clear();
            }
            EntryState::Live => {
                let checksum = lfn::short_name_checksum(&entry.name);
                let long_name = lfn::reassemble_fragments(&pending_lfn, checksum);
                let name = long_name.unwrap_or_else(|| render_short_name(&entry.name, entry.nt_reserved, codepage));
                let info = DirEntryInfo {
                    name,
                    attr: entry.attr,
                    size: entry.file_size,
                    cluster: entry.cluster(),
                    location,
                    lfn_locations: std::mem::take(&mut pending_locations),
                };

                let _ = cursor.advance(geometry, window, device, None, false)?;
                return Ok(Some(info));
            }
        }

        if !cursor.advance(geometry, window, device, None, false)? {
            return Ok(None);
        }
    }
}

/// A directory open for iteration. Wraps a `DirCursor` rewound to its
/// start; `findfirst` is just `open` followed by `findnext`.
pub struct DirStream {
    cursor: DirCursor,
}

impl DirStream {
    pub fn open(fixed_root: Option<(u64, u32)>, start_cluster: Cluster) -> Self {
        Self { cursor: DirCursor::root(fixed_root, start_cluster) }
    }

    pub fn rewind(&mut self) {
        self.cursor.rewind();
    }

    /// `readdir`: the next live entry, or `None` at end-of-directory.
    pub fn read_next<D: BlockDevice>(
        &mut self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
        codepage: &dyn Codepage,
    ) -> FatResult<Option<DirEntryInfo>> {
        next_entry(geometry, window, device, codepage, &mut self.cursor)
    }

    /// `findnext`: like `read_next`, but skips entries whose name doesn't
    /// match `pattern` (`*` any run, `?` single character).
    pub fn find_next<D: BlockDevice>(
        &mut self,
        geometry: &FatGeometry,
        window: &mut SectorWindow,
        device: &mut D,
        codepage: &dyn Codepage,
        pattern: &str,
    ) -> FatResult<Option<DirEntryInfo>> {
        loop {
            match next_entry(geometry, window, device, codepage, &mut self.cursor)? {
                None => return Ok(None),
                Some(info) if glob_match(pattern, &info.name) => return Ok(Some(info)),
                Some(_) => continue,
            }
        }
    }
}

/// `findfirst`: open the directory and return its first matching entry.
pub fn find_first<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    start_cluster: Cluster,
    pattern: &str,
) -> FatResult<(DirStream, Option<DirEntryInfo>)> {
    let mut stream = DirStream::open(fixed_root, start_cluster);
    let first = stream.find_next(geometry, window, device, codepage, pattern)?;
    Ok((stream, first))
}

/// Minimal shell glob: `*` matches any run of characters, `?` matches
/// exactly one, everything else must match literally (case-insensitively).
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(pat: &[char], name: &[char]) -> bool {
        match (pat.first(), name.first()) {
            (None, None) => true,
            (Some('*'), _) => inner(&pat[1..], name) || (!name.is_empty() && inner(pat, &name[1..])),
            (Some('?'), Some(_)) => inner(&pat[1..], &name[1..]),
            (Some(p), Some(n)) if p.to_ascii_uppercase() == n.to_ascii_uppercase() => inner(&pat[1..], &name[1..]),
            _ => false,
        }
    }

    let pat: Vec<char> = pattern.chars().collect();
    let nm: Vec<char> = name.chars().collect();
    inner(&pat, &nm)
}

/// `stat`: resolves `name` within the directory starting at
/// `start_cluster` and returns its entry, without opening it.
pub fn stat<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    start_cluster: Cluster,
    name: &str,
) -> FatResult<FoundEntry> {
    path::dir_find(geometry, window, device, codepage, fixed_root, start_cluster, name)?.ok_or(FatError::NoFile)
}

/// `chmod`: replaces the attribute byte of an already-located entry,
/// preserving the directory/archive bits the filesystem itself manages
/// isn't attempted here — callers pass the full desired attribute set.
pub fn chmod<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    location: EntryLocation,
    attr: Attr,
) -> FatResult<()> {
    let mut cursor = DirCursor::at_cluster(location.cluster);
    cursor.seek_to(location);
    let mut entry = cursor.peek(geometry, window, device)?.ok_or(FatError::NoFile)?;
    entry.attr = attr;
    cursor.write_entry(geometry, window, device, &entry)
}

/// `utime`: stamps an entry's write date/time.
pub fn utime<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    location: EntryLocation,
    stamp: Timestamp,
) -> FatResult<()> {
    let mut cursor = DirCursor::at_cluster(location.cluster);
    cursor.seek_to(location);
    let mut entry = cursor.peek(geometry, window, device)?.ok_or(FatError::NoFile)?;
    entry.write_date = stamp.date;
    entry.write_time = stamp.time;
    cursor.write_entry(geometry, window, device, &entry)
}

/// Writes the short entry (and any LFN fragments) for a brand-new name
/// into the directory starting at `parent_cluster` (or the fixed root),
/// returning the short entry's own location.
fn emplace_entry<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    alloc: &mut table::AllocCursor,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    name: &str,
    codepage: &dyn Codepage,
    attr: Attr,
    cluster: Cluster,
    size: u32,
    stamp: Timestamp,
) -> FatResult<EntryLocation> {
    let encoded = path::create_name(name, codepage)?;

    // A name that fits bare 8.3 still needs an LFN + numeric tail if its
    // uppercase short bytes are already taken by some other entry (case
    // bits only disambiguate a *query*, not disk-level 8.3 uniqueness).
    let needs_lfn = encoded.long.is_some()
        || short_name_taken(geometry, window, device, fixed_root, parent_cluster, &encoded.short)?;

    let (short, nt_reserved, long): (_, _, Option<String>) = if needs_lfn {
        let tailed = resolve_numeric_tail(geometry, window, device, codepage, fixed_root, parent_cluster, &encoded.short)?;
        (tailed, 0u8, Some(name.to_string()))
    } else {
        (encoded.short, encoded.nt_reserved, None)
    };

    let fragments = long.as_deref().map(|long| {
        let checksum = lfn::short_name_checksum(&short);
        lfn::split_into_fragments(long, checksum)
    });
    let needed = 1 + fragments.as_ref().map_or(0, |f| f.len());

    let mut cursor = DirCursor::root(fixed_root, parent_cluster);
    let slots = cursor.allocate(geometry, window, device, alloc, needed)?;

    if let Some(fragments) = &fragments {
        for (frag, &loc) in fragments.iter().zip(slots.iter()) {
            let mut buf = [0u8; 32];
            frag.write(&mut buf);
            cursor.seek_to(loc);
            let raw = RawDirEntry::read(&buf);
            cursor.write_entry(geometry, window, device, &raw)?;
        }
    }

    let short_location = *slots.last().unwrap();
    let mut entry = RawDirEntry { name: short, attr, nt_reserved, creation_date: stamp.date, creation_time: stamp.time, write_date: stamp.date, write_time: stamp.time, last_access_date: stamp.date, file_size: size, ..Default::default() };
    entry.set_cluster(cluster);
    cursor.seek_to(short_location);
    cursor.write_entry(geometry, window, device, &entry)?;

    Ok(short_location)
}

/// Scans the directory for a live, non-LFN entry whose raw 8.3 bytes
/// already equal `short`, regardless of its `NTRes` case bits — disk-level
/// short-name uniqueness ignores case entirely.
fn short_name_taken<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    short: &[u8; 11],
) -> FatResult<bool> {
    let mut cursor = DirCursor::root(fixed_root, parent_cluster);
    loop {
        match cursor.peek(geometry, window, device)? {
            None => return Ok(false),
            Some(e) if e.state() == EntryState::End => return Ok(false),
            Some(e) if e.state() == EntryState::Live && !e.is_lfn_fragment() && !e.attr.contains(Attr::VOLUME_ID) && e.name == *short => {
                return Ok(true);
            }
            _ => {}
        }
        if !cursor.advance(geometry, window, device, None, false)? {
            return Ok(false);
        }
    }
}

/// Tries plain `~1`..`~5` then, from the 6th collision on, the CRC-16
/// hash fallback (`~XXXX`), giving up after 99 collisions total.
fn resolve_numeric_tail<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    _codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    base_short: &[u8; 11],
) -> FatResult<[u8; 11]> {
    let base = &base_short[0..8];
    let ext = &base_short[8..11];

    for attempt in 1..=99 {
        let tail = lfn::numeric_tail(base, attempt)?;
        let mut candidate = [b' '; 11];
        candidate[0..8].copy_from_slice(&tail);
        candidate[8..11].copy_from_slice(ext);

        let mut cursor = DirCursor::root(fixed_root, parent_cluster);
        let mut found = false;
        loop {
            match cursor.peek(geometry, window, device)? {
                None => break,
                Some(e) if e.state() == EntryState::End => break,
                Some(e) if e.state() == EntryState::Live && e.name == candidate => {
                    found = true;
                    break;
                }
                _ => {}
            }
            if !cursor.advance(geometry, window, device, None, false)? {
                break;
            }
        }

        if !found {
            return Ok(candidate);
        }
    }

    Err(FatError::Denied)
}

/// `open`'s creation path: emplaces a zero-length file entry (attribute
/// `ARCHIVE`, no cluster yet) and returns its location. Shares `mkdir`'s
/// existence and numeric-tail handling via `emplace_entry`.
pub fn touch<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    alloc: &mut table::AllocCursor,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    name: &str,
    stamp: Timestamp,
) -> FatResult<EntryLocation> {
    if path::dir_find(geometry, window, device, codepage, fixed_root, parent_cluster, name)?.is_some() {
        return Err(FatError::Exist);
    }
    emplace_entry(geometry, window, device, alloc, fixed_root, parent_cluster, name, codepage, Attr::ARCHIVE, 0, 0, stamp)
}

/// Reads the raw entry at an already-known location, e.g. one `touch` or
/// `path::dir_find` just returned.
pub fn stat_at<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    location: EntryLocation,
) -> FatResult<RawDirEntry> {
    let mut cursor = DirCursor::at_cluster(location.cluster);
    cursor.seek_to(location);
    cursor.peek(geometry, window, device)?.ok_or(FatError::NoFile)
}

/// `mkdir`: allocates one cluster, zeroes it, emplaces `.`/`..`, then
/// registers the new directory's own entry in the parent.
pub fn mkdir<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    alloc: &mut table::AllocCursor,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    name: &str,
    stamp: Timestamp,
) -> FatResult<EntryLocation> {
    if path::dir_find(geometry, window, device, codepage, fixed_root, parent_cluster, name)?.is_some() {
        return Err(FatError::Exist);
    }

    let new_cluster = table::create_chain(geometry, window, device, alloc, None, None, 1)?[0];

    {
        let lba = geometry.cluster_to_lba(new_cluster);
        for s in 0..geometry.sectors_per_cluster as u64 {
            let sector = window.move_window(device, lba + s)?;
            sector.fill(0);
            window.mark_dirty()?;
        }
    }

    let dot_target = new_cluster;
    // FAT32's root is conventionally addressed as cluster 0 in `..`
    // entries that point at it, even though its real first cluster is
    // whatever the BPB names.
    let dotdot_target = if fixed_root.is_some() && parent_cluster == 0 { 0 } else { parent_cluster };

    let mut dot = RawDirEntry { name: *b".          ", attr: Attr::DIRECTORY, write_date: stamp.date, write_time: stamp.time, ..Default::default() };
    dot.set_cluster(dot_target);
    let mut dotdot = RawDirEntry { name: *b"..         ", attr: Attr::DIRECTORY, write_date: stamp.date, write_time: stamp.time, ..Default::default() };
    dotdot.set_cluster(dotdot_target);

    let mut cursor = DirCursor::at_cluster(new_cluster);
    cursor.seek_to(EntryLocation { cluster: new_cluster, offset_in_cluster: 0 });
    cursor.write_entry(geometry, window, device, &dot)?;
    cursor.seek_to(EntryLocation { cluster: new_cluster, offset_in_cluster: 32 });
    cursor.write_entry(geometry, window, device, &dotdot)?;

    emplace_entry(geometry, window, device, alloc, fixed_root, parent_cluster, name, codepage, Attr::DIRECTORY, new_cluster, 0, stamp)
}

/// Returns `true` if the directory at `cluster` has no entries besides
/// `.`/`..`.
fn is_dir_empty<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    cluster: Cluster,
) -> FatResult<bool> {
    let mut cursor = DirCursor::at_cluster(cluster);
    // Skip `.` and `..`.
    cursor.advance(geometry, window, device, None, false)?;
    cursor.advance(geometry, window, device, None, false)?;

    loop {
        match cursor.peek(geometry, window, device)? {
            None => return Ok(true),
            Some(e) if e.state() == EntryState::End => return Ok(true),
            Some(e) if e.state() == EntryState::Deleted => {}
            Some(_) => return Ok(false),
        }
        if !cursor.advance(geometry, window, device, None, false)? {
            return Ok(true);
        }
    }
}

/// `unlink`: refuses non-empty directories, read-only entries, and
/// entries the open-file registry reports as in use; marks the LFN run
/// and short entry deleted and releases the object's cluster chain.
pub fn unlink<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    alloc: &mut table::AllocCursor,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    parent_cluster: Cluster,
    name: &str,
    is_open: impl FnOnce(EntryLocation) -> bool,
) -> FatResult<()> {
    let found = path::dir_find(geometry, window, device, codepage, fixed_root, parent_cluster, name)?.ok_or(FatError::NoFile)?;

    if found.entry.attr.contains(Attr::READ_ONLY) {
        return Err(FatError::Denied);
    }
    if is_open(found.location) {
        return Err(FatError::Locked);
    }
    if path::is_directory(&found.entry) {
        if !is_dir_empty(geometry, window, device, found.entry.cluster())? {
            return Err(FatError::DirectoryNotEmpty);
        }
    }

    mark_deleted(geometry, window, device, &found)?;

    if found.entry.cluster() != 0 {
        table::remove_chain(geometry, window, device, alloc, found.entry.cluster())?;
    }
    Ok(())
}

fn mark_deleted<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    found: &FoundEntry,
) -> FatResult<()> {
    let mut cursor = DirCursor::at_cluster(found.location.cluster);
    let deleted = RawDirEntry::read(&RawDirEntry::deleted_marker());
    for &loc in found.lfn_locations.iter().chain(std::iter::once(&found.location)) {
        cursor.seek_to(loc);
        cursor.write_entry(geometry, window, device, &deleted)?;
    }
    Ok(())
}

/// `rename`: moves (and/or renames) an entry, rejecting the operation if
/// the destination name already exists. If the moved object is a
/// directory and its parent cluster changes, its `..` entry is updated
/// to point at the new parent.
pub fn rename<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    alloc: &mut table::AllocCursor,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    old_parent_cluster: Cluster,
    old_name: &str,
    new_parent_cluster: Cluster,
    new_name: &str,
) -> FatResult<EntryLocation> {
    let old = path::dir_find(geometry, window, device, codepage, fixed_root, old_parent_cluster, old_name)?
        .ok_or(FatError::NoFile)?;

    if path::dir_find(geometry, window, device, codepage, fixed_root, new_parent_cluster, new_name)?.is_some() {
        return Err(FatError::Exist);
    }

    let new_location = emplace_entry(
        geometry,
        window,
        device,
        alloc,
        fixed_root,
        new_parent_cluster,
        new_name,
        codepage,
        old.entry.attr,
        old.entry.cluster(),
        old.entry.file_size,
        Timestamp { date: old.entry.write_date, time: old.entry.write_time },
    )?;

    if path::is_directory(&old.entry) && old_parent_cluster != new_parent_cluster {
        let mut cursor = DirCursor::at_cluster(old.entry.cluster());
        cursor.advance(geometry, window, device, None, false)?; // past `.`
        let mut dotdot = cursor.peek(geometry, window, device)?.ok_or(FatError::IntErr)?;
        dotdot.set_cluster(new_parent_cluster);
        cursor.write_entry(geometry, window, device, &dotdot)?;
    }

    mark_deleted(geometry, window, device, &old)?;
    Ok(new_location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::Cp437;
    use crate::fat::boot_sector::FatType;
    use crate::storage::MemoryBlockDevice;

    fn setup() -> (FatGeometry, SectorWindow, MemoryBlockDevice) {
        let geometry = FatGeometry {
            fat_type: FatType::Fat16,
            fat_start_lba: 1,
            fat_size_sectors: 4,
            num_fats: 1,
            bytes_per_sector: 512,
            data_start_lba: 5,
            sectors_per_cluster: 1,
            total_clusters: 64,
        };
        let mut device = MemoryBlockDevice::new(512, 128);
        device.initialize().unwrap();
        let window = SectorWindow::new(512, geometry.fat_start_lba, geometry.fat_size_sectors, geometry.num_fats);
        (geometry, window, device)
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("*.TXT", "README.TXT"));
        assert!(glob_match("FOO.???", "FOO.TXT"));
        assert!(!glob_match("FOO.???", "FOO.TEXT"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn mkdir_then_stat_then_unlink() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];
        {
            let lba = geometry.cluster_to_lba(root);
            let sector = window.move_window(&mut device, lba).unwrap();
            sector.fill(0);
            window.mark_dirty().unwrap();
        }

        let stamp = Timestamp::EPOCH;
        mkdir(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "SUBDIR", stamp).unwrap();

        let found = stat(&geometry, &mut window, &mut device, &Cp437, None, root, "SUBDIR").unwrap();
        assert!(path::is_directory(&found.entry));

        unlink(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "SUBDIR", |_| false).unwrap();
        assert!(stat(&geometry, &mut window, &mut device, &Cp437, None, root, "SUBDIR").is_err());
    }

    #[test]
    fn lowercase_name_round_trips_as_bare_sfn() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];
        {
            let lba = geometry.cluster_to_lba(root);
            let sector = window.move_window(&mut device, lba).unwrap();
            sector.fill(0);
            window.mark_dirty().unwrap();
        }

        let stamp = Timestamp::EPOCH;
        touch(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "readme.txt", stamp).unwrap();

        let found = stat(&geometry, &mut window, &mut device, &Cp437, None, root, "readme.txt").unwrap();
        assert!(found.long_name.is_none());
        assert_eq!(&found.entry.name, b"README  TXT");

        let (stream, first) = find_first(&geometry, &mut window, &mut device, &Cp437, None, root, "*").unwrap();
        let _ = stream;
        assert_eq!(first.unwrap().name, "readme.txt");
    }

    #[test]
    fn short_name_collision_across_case_falls_back_to_lfn() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];
        {
            let lba = geometry.cluster_to_lba(root);
            let sector = window.move_window(&mut device, lba).unwrap();
            sector.fill(0);
            window.mark_dirty().unwrap();
        }

        let stamp = Timestamp::EPOCH;
        touch(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "readme.txt", stamp).unwrap();
        touch(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "README.TXT", stamp).unwrap();

        let lower = stat(&geometry, &mut window, &mut device, &Cp437, None, root, "readme.txt").unwrap();
        assert!(lower.long_name.is_none());

        let upper = stat(&geometry, &mut window, &mut device, &Cp437, None, root, "README.TXT").unwrap();
        assert_eq!(upper.long_name.as_deref(), Some("README.TXT"));
        assert!(upper.entry.name.starts_with(b"README~1"));
    }

    #[test]
    fn unlink_refuses_non_empty_directory() {
        let (geometry, mut window, mut device) = setup();
        let mut alloc = table::AllocCursor::default();
        let root = table::create_chain(&geometry, &mut window, &mut device, &mut alloc, None, None, 1).unwrap()[0];
        {
            let lba = geometry.cluster_to_lba(root);
            let sector = window.move_window(&mut device, lba).unwrap();
            sector.fill(0);
            window.mark_dirty().unwrap();
        }

        let stamp = Timestamp::EPOCH;
        mkdir(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "PARENT", stamp).unwrap();
        let parent = stat(&geometry, &mut window, &mut device, &Cp437, None, root, "PARENT").unwrap();
        mkdir(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, parent.entry.cluster(), "CHILD", stamp).unwrap();

        let err = unlink(&geometry, &mut window, &mut device, &mut alloc, &Cp437, None, root, "PARENT", |_| false).unwrap_err();
        assert_eq!(err, FatError::DirectoryNotEmpty);
    }
}
