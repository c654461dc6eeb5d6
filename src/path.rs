//! Path parsing, name validation, and directory lookup (§4.G).
//!
//! No counterpart in the teacher crate (it never implemented path
//! resolution beyond a fixed root-cluster lookup); built in the teacher's
//! idiom — plain functions over the `BlockDevice`/`SectorWindow`/`FatGeometry`
//! trio established in `fat::table` and `fat::dir` — rather than as a
//! trait.

use crate::codepage::Codepage;
use crate::error::{FatError, FatResult};
use crate::fat::dir::{Attr, DirCursor, EntryLocation, EntryState, RawDirEntry};
use crate::fat::lfn::{self, LfnFragment};
use crate::fat::table::{Cluster, FatGeometry};
use crate::fat::window::SectorWindow;
use crate::storage::BlockDevice;

/// Characters the short-name encoder and the LFN encoder both reject
/// outright, regardless of codepage (§4.G "name-syntax rules").
const INVALID_CHARS: &[char] = &['"', '*', '/', ':', '<', '>', '?', '\\', '|'];

/// Additional characters legal in an LFN but never in a bare 8.3 short
/// name (§4.G "for SFN, also + , ; = [ ]").
const SFN_ONLY_INVALID_CHARS: &[char] = &['+', ',', ';', '=', '[', ']'];

/// `NTRes` case bits (§4.G): set when a short name's base or extension is
/// stored lowercase on disk, so an all-lowercase or all-uppercase name can
/// round-trip through the 8.3 form without an LFN.
pub const NT_LOWERCASE_BASE: u8 = 0x08;
pub const NT_LOWERCASE_EXT: u8 = 0x10;

/// A parsed path: which drive it names (if any) and the path components
/// to walk, in order. `.`/`..` are left as literal components for the
/// directory engine to special-case, matching how real FAT directories
/// store them as actual entries rather than resolving them during
/// parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    pub drive: Option<u8>,
    pub is_absolute: bool,
    pub components: Vec<&'a str>,
}

/// Splits `path` into an optional leading drive number (`"1:/foo"` ->
/// drive 1) and the remaining path components.
pub fn parse_path(path: &str) -> FatResult<ParsedPath<'_>> {
    let (drive, rest) = match path.split_once(':') {
        Some((prefix, rest)) => {
            let drive = prefix.parse::<u8>().map_err(|_| FatError::InvalidDrive)?;
            (Some(drive), rest)
        }
        None => (None, path),
    };

    let is_absolute = rest.starts_with('/') || rest.starts_with('\\');

    let components = rest
        .split(|c| c == '/' || c == '\\')
        .filter(|c| !c.is_empty())
        .collect();

    Ok(ParsedPath { drive, is_absolute, components })
}

/// A validated, encodable name: the 11-byte short form plus, if the
/// original name couldn't round-trip through 8.3 untouched, the original
/// long form to store as LFN fragments. `nt_reserved` carries the case
/// bits to stamp onto the short entry's `NTRes` byte when `long` is
/// `None` (an LFN group encodes its own case, so `nt_reserved` is always
/// 0 when `long.is_some()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedName {
    pub short: [u8; 11],
    pub long: Option<String>,
    pub nt_reserved: u8,
}

/// Validates and encodes a user-supplied component name. Rejects names
/// containing control characters or any of [`INVALID_CHARS`], empty
/// names, and `.`/`..` (those are handled structurally, never created as
/// ordinary entries).
pub fn create_name(name: &str, codepage: &dyn Codepage) -> FatResult<EncodedName> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FatError::InvalidName);
    }
    if name.chars().any(|c| c.is_control() || INVALID_CHARS.contains(&c)) {
        return Err(FatError::InvalidName);
    }
    // Trailing dots and spaces are significant to Windows name-mangling
    // rules but never legal in a short name.
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(FatError::InvalidName);
    }

    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) if !b.is_empty() => (b, e),
        _ => (name, ""),
    };

    // A short name may be stored bare (no LFN group) only if every
    // character is ASCII, free of the SFN-only punctuation FAT never
    // allows in an 8.3 entry, and each of the base and extension is
    // uniformly cased — a genuine upper/lower mix still needs an LFN,
    // since the NTRes byte can only record one case bit per field.
    let ascii_and_sfn_safe = name.chars().all(|c| c.is_ascii() && !SFN_ONLY_INVALID_CHARS.contains(&c));
    let base_case = uniform_case(base);
    let ext_case = uniform_case(ext);
    let short_fits = base.len() <= 8 && ext.len() <= 3 && ascii_and_sfn_safe && base_case.is_some() && ext_case.is_some();

    if short_fits {
        // The short-name field is always stored uppercase on disk, same as
        // any other 8.3 name; `nt_reserved` is what signals a lowercase
        // original to a reader that understands the NT extension.
        let mut short = [b' '; 11];
        for (i, b) in base.bytes().enumerate() {
            short[i] = codepage.unicode_to_oem(codepage.to_upper(b as char)).unwrap_or(b'_');
        }
        for (i, b) in ext.bytes().enumerate() {
            short[8 + i] = codepage.unicode_to_oem(codepage.to_upper(b as char)).unwrap_or(b'_');
        }

        let mut nt_reserved = 0u8;
        if base_case == Some(Case::Lower) {
            nt_reserved |= NT_LOWERCASE_BASE;
        }
        if ext_case == Some(Case::Lower) {
            nt_reserved |= NT_LOWERCASE_EXT;
        }

        return Ok(EncodedName { short, long: None, nt_reserved });
    }

    // Needs an LFN: synthesize a base-name short alias; the numeric tail
    // (`~1`, `~2`, ..) is filled in by the caller once it knows which
    // tails are already taken in the target directory.
    let upper_base: String = base.chars().take(8).map(|c| codepage.to_upper(c)).collect();
    let upper_ext: String = ext.chars().take(3).map(|c| codepage.to_upper(c)).collect();

    let mut short = [b' '; 11];
    for (i, c) in upper_base.chars().enumerate().take(8) {
        short[i] = codepage.unicode_to_oem(c).unwrap_or(b'_');
    }
    for (i, c) in upper_ext.chars().enumerate().take(3) {
        short[8 + i] = codepage.unicode_to_oem(c).unwrap_or(b'_');
    }

    Ok(EncodedName { short, long: Some(name.to_string()), nt_reserved: 0 })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    Lower,
    Upper,
}

/// `None` if `s` mixes cases (or is ASCII only trivially, e.g. empty or
/// case-insensitive characters, are treated as uniform — the caller only
/// needs to know whether a genuine upper/lower conflict exists).
fn uniform_case(s: &str) -> Option<Case> {
    let mut seen = None;
    for c in s.chars() {
        if c.is_ascii_lowercase() {
            match seen {
                Some(Case::Upper) => return None,
                _ => seen = Some(Case::Lower),
            }
        } else if c.is_ascii_uppercase() {
            match seen {
                Some(Case::Lower) => return None,
                _ => seen = Some(Case::Upper),
            }
        }
    }
    Some(seen.unwrap_or(Case::Upper))
}

/// The result of finding a name in a directory: the short entry, its
/// location, and the locations of any LFN fragments immediately
/// preceding it (needed so unlink/rename can remove or rewrite the whole
/// group atomically).
#[derive(Debug, Clone)]
pub struct FoundEntry {
    pub entry: RawDirEntry,
    pub location: EntryLocation,
    pub lfn_locations: Vec<EntryLocation>,
    pub long_name: Option<String>,
}

/// Searches a directory (starting at `start_cluster`, or the fixed root
/// region if `fixed_root` is given) for a component matching `name`
/// case-insensitively, reconstructing LFN fragments as it goes.
pub fn dir_find<D: BlockDevice>(
    geometry: &FatGeometry,
    window: &mut SectorWindow,
    device: &mut D,
    codepage: &dyn Codepage,
    fixed_root: Option<(u64, u32)>,
    start_cluster: Cluster,
    name: &str,
) -> FatResult<Option<FoundEntry>> {
    let mut cursor = DirCursor::root(fixed_root, start_cluster);
    let mut pending_lfn: Vec<(LfnFragment, EntryLocation)> = Vec::new();

    loop {
        let location = cursor.location();
        let entry = match cursor.peek(geometry, window, device)? {
            Some(e) => e,
            None => return Ok(None),
        };

        match entry.state() {
            EntryState::End => return Ok(None),
            EntryState::Deleted => pending_lfn.clear(),
            EntryState::Live if entry.is_lfn_fragment() => {
                let buf = cursor.peek_raw(geometry, window, device)?.expect("just peeked this entry");
                pending_lfn.push((LfnFragment::read(&buf), location));
            }
            EntryState::Live => {
                let checksum = lfn::short_name_checksum(&entry.name);
                let ordered: Vec<LfnFragment> = pending_lfn.iter().map(|(f, _)| *f).collect();
                let long_name = lfn::reassemble_fragments(&ordered, checksum);
                let lfn_locations = pending_lfn.iter().map(|(_, loc)| *loc).collect::<Vec<_>>();

                let matches = match &long_name {
                    Some(long) => names_match_ci(long, name, codepage),
                    None => names_match_short(&entry.name, entry.nt_reserved, name, codepage),
                };

                pending_lfn.clear();

                if matches {
                    return Ok(Some(FoundEntry { entry, location, lfn_locations, long_name }));
                }
            }
        }

        if !cursor.advance(geometry, window, device, None, false)? {
            return Ok(None);
        }
    }
}

/// Long names are compared exactly rather than case-folded: an LFN
/// fragment run preserves the name's original case, so two names
/// differing only in case are distinct directory entries here. A bare
/// short entry's case instead rides on its `NTRes` bits, compared
/// separately in [`names_match_short`].
fn names_match_ci(a: &str, b: &str, _codepage: &dyn Codepage) -> bool {
    a == b
}

/// A bare short entry only matches a case-sensitive candidate query if both
/// the raw 8.3 bytes and the NTRes case bits agree — two entries can share
/// the same uppercase bytes (`LONGNAME.TXT` vs `longname.txt`) and only
/// `nt_reserved` tells them apart.
fn names_match_short(short: &[u8; 11], nt_reserved: u8, candidate: &str, codepage: &dyn Codepage) -> bool {
    if candidate.len() > 12 {
        return false;
    }
    match create_name(candidate, codepage) {
        Ok(e) if e.long.is_none() => e.short == *short && e.nt_reserved == nt_reserved,
        _ => false,
    }
}

/// Attribute helper: does an entry name a directory.
pub fn is_directory(entry: &RawDirEntry) -> bool {
    entry.attr.contains(Attr::DIRECTORY)
}
