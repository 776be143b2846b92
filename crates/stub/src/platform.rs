use aarch64_utils::{cache, registers};
use phys::{DataCache, IdentityMapped, PhysRange};

use crate::config;

/// Data cache maintenance through AArch64 `dc` instructions.
#[derive(Debug, Clone, Copy)]
pub struct Aarch64Cache;

impl DataCache for Aarch64Cache {
    fn line_size(&self) -> usize {
        registers::dcache_line_size()
    }

    fn invalidate(&self, range: PhysRange) {
        cache::invalidate_dcache_range(range.start().as_ptr::<u8>().addr(), range.len());
    }
}

/// Physical memory in [`config::RAM`], reached through identity-mapped
/// addresses.
pub fn memory() -> IdentityMapped<Aarch64Cache> {
    // SAFETY: the MMU is off, so every address is identity-mapped. `RAM`
    // excludes the stub's own image and stack, and nothing else runs.
    unsafe { IdentityMapped::new(config::RAM, Aarch64Cache) }
}
