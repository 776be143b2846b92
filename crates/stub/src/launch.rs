use core::mem;

use aarch64_utils::asm;
use handoff::{Handoff, ImageHeader, image::IMAGE_HEADER_SIZE};
use phys::{PhysMemory, PhysRange};

use crate::console;

type Entry = unsafe extern "C" fn(tree: *const u8) -> !;

/// Warns if the entry component does not look like an AArch64 Linux image.
/// Never stops the boot.
fn check_image_header<M>(mem: &M, handoff: &Handoff)
where
    M: PhysMemory + ?Sized,
{
    let range = PhysRange::new(handoff.entry, IMAGE_HEADER_SIZE);
    match mem.bytes(range).ok().and_then(ImageHeader::read) {
        Some(header) if header.is_arm64() => {
            log::debug!("entry image size: {:#x}", header.image_size());
        }
        Some(header) => log::warn!(
            "no AArch64 image magic at {} (found {:#010x}), booting anyway",
            handoff.entry,
            header.magic()
        ),
        None => log::warn!("cannot read the image header at {}", handoff.entry),
    }
}

/// Jumps to the entry component with the target devicetree as its only
/// argument.
pub fn launch<M>(mem: &M, handoff: &Handoff) -> !
where
    M: PhysMemory + ?Sized,
{
    check_image_header(mem, handoff);
    log::info!("jumping to {}", handoff.entry);
    console::flush();

    // The components were just written as data. Drop any stale instruction
    // cache lines before fetching from them.
    asm::dsb_sy();
    asm::ic_iallu();
    asm::dsb_sy();
    asm::isb();

    let tree = handoff.tree.start().as_ptr::<u8>();
    unsafe {
        let entry = mem::transmute::<*const u8, Entry>(handoff.entry.as_ptr::<u8>());
        entry(tree)
    }
}
