// Formats a fresh in-memory block device, creates a directory and a
// couple of files in it, then lists the root the way `ls` would.

use gfat::clock::SystemClock;
use gfat::codepage::Cp437;
use gfat::format::FormatOptions;
use gfat::storage::MemoryBlockDevice;
use gfat::FatFsContext;

const VOLUME_SECTORS: u64 = 131_072;

fn main() {
    let mut device = MemoryBlockDevice::new(512, VOLUME_SECTORS);
    let ctx = FatFsContext::new(Box::new(Cp437), Box::new(SystemClock));

    ctx.mkfs(&mut device, &FormatOptions::default()).expect("format failed");
    ctx.mount(0, device, 0).expect("mount failed");

    ctx.mkdir(0, "DOCS").expect("mkdir failed");

    let mut readme = ctx.open(0, "README.TXT", true, true, false, false).expect("open failed");
    ctx.write(&mut readme, b"hello from the demo\n").expect("write failed");
    ctx.close(readme).expect("close failed");

    let (mut dir, first) = ctx.findfirst(0, "/", "*").expect("findfirst failed");
    let mut entry = first;
    while let Some(info) = entry {
        println!("{:<12} {:>8} bytes  {:?}", info.name, info.size, info.attr);
        entry = ctx.findnext(&mut dir, "*").expect("findnext failed");
    }
    ctx.closedir(dir);
}
