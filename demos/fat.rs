// Formats a fresh in-memory block device, mounts it, and prints the
// volume layout the way a caller wiring up a new block device driver
// would sanity-check one.

use gfat::clock::SystemClock;
use gfat::codepage::Cp437;
use gfat::format::FormatOptions;
use gfat::storage::MemoryBlockDevice;
use gfat::FatFsContext;

const VOLUME_SECTORS: u64 = 131_072; // 64 MiB at 512 bytes/sector

fn main() {
    let mut device = MemoryBlockDevice::new(512, VOLUME_SECTORS);
    let ctx = FatFsContext::new(Box::new(Cp437), Box::new(SystemClock));

    let options = FormatOptions::default();
    ctx.mkfs(&mut device, &options).expect("format failed");
    ctx.mount(0, device, 0).expect("mount failed");

    let label = ctx.getlabel(0).expect("getlabel failed");
    let (total, free) = ctx.getfree(0).expect("getfree failed");

    println!("label: {:?}", String::from_utf8_lossy(&label));
    println!("clusters: {} total, {} free", total, free);
}
