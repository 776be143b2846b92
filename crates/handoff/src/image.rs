//! The header at the start of an AArch64 Linux kernel image.
//!
//! See `Documentation/arch/arm64/booting.rst` in the Linux tree.

use dataview::{DataView, Pod};
use endian::Le;

/// `"ARM\x64"` read as a little-endian integer.
pub const ARM64_IMAGE_MAGIC: u32 = 0x644d_5241;
pub const IMAGE_HEADER_SIZE: usize = size_of::<ImageHeader>();

#[repr(C)]
#[derive(custom_debug_derive::Debug, Pod, Clone, Copy)]
pub struct ImageHeader {
    #[debug(format = "{:#010x}")]
    pub code0: Le<u32>,
    #[debug(format = "{:#010x}")]
    pub code1: Le<u32>,
    #[debug(format = "{:#x}")]
    pub text_offset: Le<u64>,
    #[debug(format = "{:#x}")]
    pub image_size: Le<u64>,
    #[debug(format = "{:#x}")]
    pub flags: Le<u64>,
    pub res2: Le<u64>,
    pub res3: Le<u64>,
    pub res4: Le<u64>,
    #[debug(format = "{:#010x}")]
    pub magic: Le<u32>,
    pub res5: Le<u32>,
}

impl ImageHeader {
    /// Reads a header from the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than [`IMAGE_HEADER_SIZE`].
    #[must_use]
    pub fn read(bytes: &[u8]) -> Option<Self> {
        DataView::from(bytes).try_read::<Self>(0)
    }

    #[must_use]
    pub fn magic(&self) -> u32 {
        self.magic.read()
    }

    #[must_use]
    pub fn image_size(&self) -> u64 {
        self.image_size.read()
    }

    #[must_use]
    pub fn is_arm64(&self) -> bool {
        self.magic() == ARM64_IMAGE_MAGIC
    }
}
