//! End-to-end properties from the invariants/round-trip/boundary sections:
//! format a `MemoryBlockDevice`, drive it through `FatFsContext`'s public
//! API, and check the outcomes a careful embedder would actually assert on.
//!
//! A few tests reach past `FatFsContext` to `Volume`/`FileHandle`/`fat::table`
//! directly (the same layer `fat/file.rs`'s own unit tests exercise) where a
//! property needs the on-disk cluster chain itself, which `FatFsContext`
//! has no accessor for.

use gfat::clock::{DisabledClock, Timestamp};
use gfat::codepage::Cp437;
use gfat::dirhandle;
use gfat::error::FatError;
use gfat::fat::boot_sector::FatType;
use gfat::fat::file::{FileHandle, SeekFrom};
use gfat::fat::table;
use gfat::fat::volume::Volume;
use gfat::fat::window::SectorWindow;
use gfat::format::{self, FormatOptions};
use gfat::storage::{BlockDevice, MemoryBlockDevice};
use gfat::FatFsContext;

/// 4 KiB clusters (8 * 512-byte sectors), matching the boundary scenarios
/// that talk about cluster-sized extents in those terms.
fn mount_fat32(total_sectors: u64) -> FatFsContext<MemoryBlockDevice> {
    let mut device = MemoryBlockDevice::new(512, total_sectors);
    let options = FormatOptions { fat_type_hint: Some(FatType::Fat32), sectors_per_cluster_hint: Some(8), ..Default::default() };
    let ctx = FatFsContext::new(Box::new(Cp437), Box::new(DisabledClock));
    ctx.mkfs(&mut device, &options).unwrap();
    ctx.mount(0, device, 0).unwrap();
    ctx
}

// --- Scenario 1: FAT32 create/read -----------------------------------

#[test]
fn fat32_create_write_close_reopen_read_back() {
    let ctx = mount_fat32(131_072); // 64 MiB

    let mut f = ctx.open(0, "A.TXT", true, true, false, false).unwrap();
    let payload = vec![0xA5u8; 5000];
    let written = ctx.write(&mut f, &payload).unwrap();
    assert_eq!(written, 5000);
    ctx.close(f).unwrap();

    let mut f = ctx.open(0, "A.TXT", false, false, false, false).unwrap();
    assert_eq!(f.size(), 5000);
    let mut buf = vec![0u8; 5000];
    let n = ctx.read(&mut f, &mut buf).unwrap();
    ctx.close(f).unwrap();

    assert_eq!(n, 5000);
    assert!(buf.iter().all(|&b| b == 0xA5));
}

/// Same scenario, checked at the `Volume`/`FileHandle` layer so the
/// cluster chain itself (not just the reported size) can be inspected:
/// 5000 bytes in 4096-byte clusters must land in exactly two clusters.
#[test]
fn fat32_chain_length_matches_cluster_math() {
    let mut device = MemoryBlockDevice::new(512, 131_072);
    let options = FormatOptions { fat_type_hint: Some(FatType::Fat32), sectors_per_cluster_hint: Some(8), ..Default::default() };
    format::format_volume(&mut device, &options, &DisabledClock).unwrap();

    let mut volume = Volume::mount(device, 0, 1).unwrap();
    let stamp = Timestamp::EPOCH;
    let mut alloc = volume.alloc_cursor();
    let location = dirhandle::touch(&volume.geometry, &mut volume.window, &mut volume.device, &mut alloc, &Cp437, volume.fixed_root, volume.root_cluster, "A.TXT", stamp).unwrap();
    volume.apply_alloc_cursor(alloc);
    let entry = dirhandle::stat_at(&volume.geometry, &mut volume.window, &mut volume.device, location).unwrap();
    let mut file = FileHandle::open(&mut volume, location, &entry, true, false).unwrap();

    file.write(&mut volume, &vec![0xA5u8; 5000]).unwrap();
    file.sync(&mut volume).unwrap();
    assert_eq!(file.size(), 5000);

    let clmt = table::build_clmt(&volume.geometry, &mut volume.window, &mut volume.device, file.first_cluster).unwrap();
    let total_clusters: u32 = clmt.iter().map(|r| r.count).sum();
    assert_eq!(total_clusters, 2);
}

// --- Scenario 2: FAT12 tiny volume, many zero-byte files --------------

#[test]
fn fat12_tiny_volume_many_zero_byte_files() {
    let mut device = MemoryBlockDevice::new(512, 2048); // 1 MiB
    let options = FormatOptions { fat_type_hint: Some(FatType::Fat12), ..Default::default() };
    let ctx = FatFsContext::new(Box::new(Cp437), Box::new(DisabledClock));
    ctx.mkfs(&mut device, &options).unwrap();
    ctx.mount(0, device, 0).unwrap();

    let (_total, free_before) = ctx.getfree(0).unwrap();

    for i in 0..64u32 {
        let name = format!("F{:02}", i);
        let f = ctx.open(0, &name, true, true, false, false).unwrap();
        ctx.close(f).unwrap();
    }

    for i in 0..64u32 {
        let name = format!("F{:02}", i);
        let info = ctx.stat(0, &name).unwrap();
        assert_eq!(info.size, 0);
        assert_eq!(info.cluster, 0);
    }

    // Zero-byte files never allocate a cluster, so the free count (walked
    // fresh off the FAT, since FAT12 carries no FSInfo hint) is unchanged.
    let (_total, free_after) = ctx.getfree(0).unwrap();
    assert_eq!(free_before, free_after);
}

// --- Scenario 3: LFN numeric-tail collision ----------------------------

/// `"LongName.txt"`, `"longname.txt"`, `"LONGNAME.TXT"` all fit an 8.3 base
/// exactly (`LONGNAME` / 8 chars), so two of the three round-trip as bare
/// short entries distinguished only by their `NTRes` case bits — only a
/// genuine upper/lower mix forces an LFN group. `"longname.txt"` claims the
/// bare `LONGNAME.TXT` 8.3 bytes first, so `"LONGNAME.TXT"` itself then
/// collides with it at the raw-byte level and falls back to an LFN with a
/// numeric-tailed alias, same as the mixed-case name. All three are still
/// distinct entries and each round-trips through `stat` to its own name.
#[test]
fn lfn_case_variants_are_distinct_entries() {
    let ctx = mount_fat32(65536);
    let names = ["LongName.txt", "longname.txt", "LONGNAME.TXT"];

    for name in names {
        let f = ctx.open(0, name, true, true, false, false).unwrap();
        ctx.close(f).unwrap();
    }

    for name in names {
        let info = ctx.stat(0, name).unwrap();
        assert_eq!(info.name, name);
    }

    let (mut dir, first) = ctx.findfirst(0, "/", "*").unwrap();
    let mut count = usize::from(first.is_some());
    while ctx.findnext(&mut dir, "*").unwrap().is_some() {
        count += 1;
    }
    ctx.closedir(dir);
    assert_eq!(count, names.len());
}

// --- Scenario 4: truncate mid-cluster -----------------------------------

#[test]
fn truncate_mid_cluster_clips_size_and_reads_zero_past_end() {
    let ctx = mount_fat32(131_072);

    let mut f = ctx.open(0, "BIG.BIN", true, true, false, false).unwrap();
    ctx.write(&mut f, &vec![0xBBu8; 10000]).unwrap();
    ctx.truncate(&mut f, 5000).unwrap();
    ctx.close(f).unwrap();

    let info = ctx.stat(0, "BIG.BIN").unwrap();
    assert_eq!(info.size, 5000);

    let mut f = ctx.open(0, "BIG.BIN", false, false, false, false).unwrap();
    ctx.lseek(&mut f, SeekFrom::Start(5000)).unwrap();
    let mut buf = [0u8; 16];
    let n = ctx.read(&mut f, &mut buf).unwrap();
    ctx.close(f).unwrap();
    assert_eq!(n, 0);
}

/// Same scenario at the chain level: truncating 10000 bytes down to 5000
/// (4096-byte clusters) must release the third cluster and leave exactly
/// two linked.
#[test]
fn truncate_mid_cluster_releases_trailing_cluster() {
    let mut device = MemoryBlockDevice::new(512, 131_072);
    let options = FormatOptions { fat_type_hint: Some(FatType::Fat32), sectors_per_cluster_hint: Some(8), ..Default::default() };
    format::format_volume(&mut device, &options, &DisabledClock).unwrap();
    let mut volume = Volume::mount(device, 0, 1).unwrap();

    let stamp = Timestamp::EPOCH;
    let mut alloc = volume.alloc_cursor();
    let location = dirhandle::touch(&volume.geometry, &mut volume.window, &mut volume.device, &mut alloc, &Cp437, volume.fixed_root, volume.root_cluster, "BIG.BIN", stamp).unwrap();
    volume.apply_alloc_cursor(alloc);
    let entry = dirhandle::stat_at(&volume.geometry, &mut volume.window, &mut volume.device, location).unwrap();
    let mut file = FileHandle::open(&mut volume, location, &entry, true, false).unwrap();

    file.write(&mut volume, &vec![0xBBu8; 10000]).unwrap();
    file.truncate(&mut volume, 5000).unwrap();
    file.sync(&mut volume).unwrap();

    assert_eq!(file.size(), 5000);
    let clmt = table::build_clmt(&volume.geometry, &mut volume.window, &mut volume.device, file.first_cluster).unwrap();
    let total: u32 = clmt.iter().map(|r| r.count).sum();
    assert_eq!(total, 2);
}

// --- Scenario 5: unlink an open file ------------------------------------

#[test]
fn unlink_refuses_open_file_then_succeeds_after_close() {
    let ctx = mount_fat32(65536);

    let f = ctx.open(0, "X.TXT", true, true, false, false).unwrap();
    assert_eq!(ctx.unlink(0, "X.TXT").unwrap_err(), FatError::Locked);

    ctx.close(f).unwrap();
    ctx.unlink(0, "X.TXT").unwrap();
}

// --- Scenario 6: cross-sector FAT12 entry -------------------------------

/// Cluster 341's 12-bit cell starts at byte offset 511 of the FAT, so its
/// high byte lands in the next sector. Exercised here through the public
/// `fat::table` surface rather than only the crate-internal unit test.
#[test]
fn fat12_cluster_341_straddles_sector_boundary_and_roundtrips() {
    let geometry = table::FatGeometry {
        fat_type: FatType::Fat12,
        fat_start_lba: 1,
        fat_size_sectors: 1,
        num_fats: 1,
        bytes_per_sector: 512,
        data_start_lba: 2,
        sectors_per_cluster: 1,
        total_clusters: 4084,
    };
    let mut device = MemoryBlockDevice::new(512, 8);
    device.initialize().unwrap();
    let mut window = SectorWindow::new(512, 1, 1, 1);

    table::put(&geometry, &mut window, &mut device, 341, 0x0ABC).unwrap();
    window.sync(&mut device).unwrap();
    assert_eq!(table::get(&geometry, &mut window, &mut device, 341).unwrap(), 0x0ABC);
}

// --- Round-trip/idempotence properties ----------------------------------

#[test]
fn freshly_formatted_volume_has_empty_root() {
    let ctx = mount_fat32(65536);
    let (dir, first) = ctx.findfirst(0, "/", "*").unwrap();
    ctx.closedir(dir);
    assert!(first.is_none());
}

#[test]
fn rename_then_rename_back_restores_both_names() {
    let ctx = mount_fat32(65536);
    let f = ctx.open(0, "A.TXT", true, true, false, false).unwrap();
    ctx.close(f).unwrap();

    ctx.rename(0, "A.TXT", "B.TXT").unwrap();
    assert!(ctx.stat(0, "A.TXT").is_err());
    assert!(ctx.stat(0, "B.TXT").is_ok());

    ctx.rename(0, "B.TXT", "A.TXT").unwrap();
    assert!(ctx.stat(0, "A.TXT").is_ok());
    assert!(ctx.stat(0, "B.TXT").is_err());
}

#[test]
fn mkdir_unlink_mkdir_succeeds_every_time() {
    let ctx = mount_fat32(65536);
    for _ in 0..2 {
        ctx.mkdir(0, "SUBDIR").unwrap();
        ctx.unlink(0, "SUBDIR").unwrap();
    }
    ctx.mkdir(0, "SUBDIR").unwrap();
}
