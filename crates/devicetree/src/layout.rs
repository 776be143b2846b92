//! Flattened Devicetree (FDT) binary layout.
//!
//! An FDT blob consists of several sections:
//!
//! 1. **Header**: magic number, version info and section offsets
//! 2. **Memory Reservation Block**: list of reserved memory regions
//! 3. **Structure Block**: the tree as a sequence of binary tokens
//! 4. **Strings Block**: nul-terminated property names
//!
//! Anything between the end of the strings block and `totalsize` is free
//! space that [`DevicetreeMut`](crate::DevicetreeMut) may grow into.
//!
//! All multi-byte values are big-endian. Every type here is read and written
//! with [`DataView::try_read`]/[`DataView::try_write`], so blobs do not need
//! to be aligned in memory.

use dataview::{DataView, Pod};
use endian::Be;
use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, Snafu, ensure};
use snafu_utils::Location;

pub(crate) const MAGIC: u32 = 0xd00d_feed;
pub(crate) const SPEC_VERSION: u32 = 17;
pub(crate) const LAST_COMP_VERSION: u32 = 16;
const MEM_RSVMAP_ALIGNMENT: usize = 8;
const STRUCTURE_ALIGNMENT: usize = 4;

/// Size of the FDT header in bytes.
pub const HEADER_SIZE: usize = size_of::<Header>();

/// Errors that can occur during validation of a Devicetree header.
#[derive(Debug, Snafu)]
pub enum HeaderValidationError {
    #[snafu(display("invalid magic number: {magic:#x}"))]
    InvalidMagic {
        magic: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "incompatible device tree version: version={version}, \
         last_comp_version={last_comp_version}"
    ))]
    IncompatibleVersion {
        version: u32,
        last_comp_version: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "invalid device tree layout: totalsize={totalsize:#x}, off_dt_struct={off_dt_struct:#x}, \
         off_dt_strings={off_dt_strings:#x}, off_mem_rsvmap={off_mem_rsvmap:#x}, \
         size_dt_strings={size_dt_strings:#x}, size_dt_struct={size_dt_struct:#x}"
    ))]
    InvalidLayout {
        totalsize: u32,
        off_dt_struct: u32,
        off_dt_strings: u32,
        off_mem_rsvmap: u32,
        size_dt_strings: u32,
        size_dt_struct: u32,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Header for the devicetree.
#[repr(C)]
#[derive(custom_debug_derive::Debug, Pod, Clone, Copy)]
pub struct Header {
    /// The value `0xd00dfeed`.
    #[debug(format = "{:#x}")]
    pub magic: Be<u32>,
    /// The total size in bytes of the blob, including free space.
    pub totalsize: Be<u32>,
    /// Offset in bytes of the structure block.
    pub off_dt_struct: Be<u32>,
    /// Offset in bytes of the strings block.
    pub off_dt_strings: Be<u32>,
    /// Offset in bytes of the memory reservation block.
    pub off_mem_rsvmap: Be<u32>,
    /// The version of the devicetree data structure.
    pub version: Be<u32>,
    /// The lowest version with which the used version is backwards compatible.
    pub last_comp_version: Be<u32>,
    /// The physical ID of the system's boot CPU.
    pub boot_cpuid_phys: Be<u32>,
    /// Length in bytes of the strings block.
    pub size_dt_strings: Be<u32>,
    /// Length in bytes of the structure block.
    pub size_dt_struct: Be<u32>,
}

impl Header {
    /// Reads a header from the start of `bytes` without validating it.
    ///
    /// Returns `None` if `bytes` is shorter than [`HEADER_SIZE`].
    #[must_use]
    pub fn read(bytes: &[u8]) -> Option<Self> {
        DataView::from(bytes).try_read::<Self>(0)
    }

    /// Writes the header to the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than [`HEADER_SIZE`].
    pub(crate) fn write(&self, bytes: &mut [u8]) -> Option<()> {
        DataView::from_mut(bytes).try_write(0, self)
    }

    #[must_use]
    pub fn magic(&self) -> u32 {
        self.magic.read()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version.read()
    }

    #[must_use]
    pub fn last_comp_version(&self) -> u32 {
        self.last_comp_version.read()
    }

    #[must_use]
    pub fn boot_cpuid_phys(&self) -> u32 {
        self.boot_cpuid_phys.read()
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        usize::cast_from(self.totalsize.read())
    }

    #[must_use]
    pub fn mem_rsvmap_offset(&self) -> usize {
        usize::cast_from(self.off_mem_rsvmap.read())
    }

    #[must_use]
    pub fn struct_offset(&self) -> usize {
        usize::cast_from(self.off_dt_struct.read())
    }

    #[must_use]
    pub fn struct_size(&self) -> usize {
        usize::cast_from(self.size_dt_struct.read())
    }

    #[must_use]
    pub fn strings_offset(&self) -> usize {
        usize::cast_from(self.off_dt_strings.read())
    }

    #[must_use]
    pub fn strings_size(&self) -> usize {
        usize::cast_from(self.size_dt_strings.read())
    }

    /// End of the strings block, which is also the start of the free space.
    #[must_use]
    pub fn strings_end(&self) -> usize {
        self.strings_offset() + self.strings_size()
    }

    /// Validates the header fields for correctness and layout.
    ///
    /// - Magic number must be `0xd00dfeed`
    /// - The blob must be readable by a version 17 parser and carry the
    ///   version 17 block sizes
    /// - Blocks must appear in the order memory reservation, structure,
    ///   strings, must not overlap and must lie within `totalsize`
    /// - Memory reservation block must be 8-byte aligned, structure block
    ///   4-byte aligned
    pub fn validate(&self) -> Result<(), HeaderValidationError> {
        let magic = self.magic.read();
        ensure!(magic == MAGIC, InvalidMagicSnafu { magic });

        let version = self.version.read();
        let last_comp_version = self.last_comp_version.read();
        ensure!(
            version >= SPEC_VERSION && last_comp_version <= SPEC_VERSION,
            IncompatibleVersionSnafu {
                version,
                last_comp_version,
            }
        );

        let totalsize = self.totalsize.read();
        let off_dt_struct = self.off_dt_struct.read();
        let off_dt_strings = self.off_dt_strings.read();
        let off_mem_rsvmap = self.off_mem_rsvmap.read();
        let size_dt_strings = self.size_dt_strings.read();
        let size_dt_struct = self.size_dt_struct.read();

        let struct_end = off_dt_struct.checked_add(size_dt_struct);
        let strings_end = off_dt_strings.checked_add(size_dt_strings);
        let is_layout_valid = usize::cast_from(off_mem_rsvmap) >= HEADER_SIZE
            && off_mem_rsvmap <= off_dt_struct
            && struct_end.is_some_and(|end| end <= off_dt_strings)
            && strings_end.is_some_and(|end| end <= totalsize)
            && usize::cast_from(off_mem_rsvmap).is_multiple_of(MEM_RSVMAP_ALIGNMENT)
            && usize::cast_from(off_dt_struct).is_multiple_of(STRUCTURE_ALIGNMENT);
        ensure!(
            is_layout_valid,
            InvalidLayoutSnafu {
                totalsize,
                off_dt_struct,
                off_dt_strings,
                off_mem_rsvmap,
                size_dt_strings,
                size_dt_struct,
            }
        );

        Ok(())
    }

    /// Builds the header of a compactly laid out blob: the reservation block
    /// right after the header, followed immediately by the structure and
    /// strings blocks, with all remaining space up to `totalsize` free.
    pub(crate) fn compact(
        boot_cpuid_phys: u32,
        mem_rsvmap_size: usize,
        struct_size: usize,
        strings_size: usize,
        totalsize: usize,
    ) -> Option<Self> {
        let off_mem_rsvmap = HEADER_SIZE.next_multiple_of(MEM_RSVMAP_ALIGNMENT);
        let off_dt_struct = off_mem_rsvmap.checked_add(mem_rsvmap_size)?;
        let off_dt_strings = off_dt_struct.checked_add(struct_size)?;
        let strings_end = off_dt_strings.checked_add(strings_size)?;
        if strings_end > totalsize {
            return None;
        }
        let field = |value: usize| u32::try_from(value).ok().map(Be::new);
        Some(Self {
            magic: Be::new(MAGIC),
            totalsize: field(totalsize)?,
            off_dt_struct: field(off_dt_struct)?,
            off_dt_strings: field(off_dt_strings)?,
            off_mem_rsvmap: field(off_mem_rsvmap)?,
            version: Be::new(SPEC_VERSION),
            last_comp_version: Be::new(LAST_COMP_VERSION),
            boot_cpuid_phys: Be::new(boot_cpuid_phys),
            size_dt_strings: field(strings_size)?,
            size_dt_struct: field(struct_size)?,
        })
    }
}

/// Represents a memory reservation entry in the FDT.
#[repr(C)]
#[derive(custom_debug_derive::Debug, Pod, Clone, Copy, PartialEq, Eq)]
pub struct ReserveEntry {
    /// The start address of the reserved memory region.
    #[debug(format = "{:#x}")]
    pub address: Be<u64>,
    /// The size of the reserved memory region in bytes.
    #[debug(format = "{:#x}")]
    pub size: Be<u64>,
}

impl ReserveEntry {
    #[must_use]
    pub fn new(address: u64, size: u64) -> Self {
        Self {
            address: Be::new(address),
            size: Be::new(size),
        }
    }

    /// Returns `true` if this entry is the terminator (address and size are
    /// zero).
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.address.read() == 0 && self.size.read() == 0
    }
}

/// Byte length of the reservation block starting at `offset`, including its
/// terminator entry, or `None` if no terminator appears before `limit`.
pub(crate) fn mem_rsvmap_len(blob: &[u8], offset: usize, limit: usize) -> Option<usize> {
    let data = DataView::from(blob.get(..limit)?);
    let mut pos = offset;
    loop {
        let entry = data.try_read::<ReserveEntry>(pos)?;
        pos += size_of::<ReserveEntry>();
        if entry.is_terminator() {
            return Some(pos - offset);
        }
    }
}

/// Structure token used in the FDT structure block.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct StructToken(pub Be<u32>);

impl StructToken {
    /// Token value indicating the beginning of a node.
    pub const BEGIN_NODE: u32 = 0x0000_0001;
    /// Token value indicating the end of a node.
    pub const END_NODE: u32 = 0x0000_0002;
    /// Token value indicating a property.
    pub const PROP: u32 = 0x0000_0003;
    /// Token value indicating a no-operation.
    pub const NOP: u32 = 0x0000_0004;
    /// Token value indicating the end of the structure block.
    pub const END: u32 = 0x0000_0009;

    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(Be::new(value))
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.0.read()
    }
}

/// Header for a property in the FDT structure block.
///
/// Contains the length of the property value and the offset of the property
/// name in the strings block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
pub struct PropHeader {
    pub len: Be<u32>,
    pub nameoff: Be<u32>,
}

impl PropHeader {
    #[must_use]
    pub fn new(len: u32, nameoff: u32) -> Self {
        Self {
            len: Be::new(len),
            nameoff: Be::new(nameoff),
        }
    }
}

/// Rounds `len` up to the structure block's token alignment.
pub(crate) fn token_aligned(len: usize) -> usize {
    len.next_multiple_of(STRUCTURE_ALIGNMENT)
}

/// Reads the header at the start of `bytes` and validates it.
pub(crate) fn read_validated(bytes: &[u8]) -> Option<Result<Header, HeaderValidationError>> {
    let header = Header::read(bytes)?;
    Some(header.validate().map(|()| header))
}

/// Reads and validates the header at the start of `bytes`.
pub fn checked_header(bytes: &[u8]) -> Result<Header, crate::DevicetreeError> {
    use snafu::ResultExt as _;

    use crate::error::{InsufficientBytesSnafu, InvalidHeaderSnafu};

    read_validated(bytes)
        .context(InsufficientBytesSnafu {
            needed: HEADER_SIZE,
            actual: bytes.len(),
        })?
        .context(InvalidHeaderSnafu)
}

#[cfg(test)]
mod tests {
    use dataview::PodMethods as _;

    use super::*;

    fn valid_header() -> Header {
        Header {
            magic: MAGIC.into(),
            totalsize: 128.into(),
            off_dt_struct: 64.into(),
            off_dt_strings: 96.into(),
            off_mem_rsvmap: 40.into(),
            version: 17.into(),
            last_comp_version: 16.into(),
            boot_cpuid_phys: 0.into(),
            size_dt_strings: 16.into(),
            size_dt_struct: 16.into(),
        }
    }

    #[test]
    fn test_valid_header() {
        valid_header().validate().unwrap();
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 40);
    }

    #[test]
    fn test_invalid_magic() {
        let header = Header {
            magic: 0xdead_beef.into(),
            ..valid_header()
        };
        let err = header.validate().unwrap_err();
        assert!(matches!(
            err,
            HeaderValidationError::InvalidMagic {
                magic: 0xdead_beef,
                ..
            }
        ));
    }

    #[test]
    fn test_incompatible_version() {
        let header = Header {
            version: 18.into(),
            last_comp_version: 18.into(),
            ..valid_header()
        };
        assert!(matches!(
            header.validate().unwrap_err(),
            HeaderValidationError::IncompatibleVersion { .. }
        ));

        let header = Header {
            version: 16.into(),
            ..valid_header()
        };
        assert!(matches!(
            header.validate().unwrap_err(),
            HeaderValidationError::IncompatibleVersion { .. }
        ));
    }

    #[test]
    fn test_newer_backwards_compatible_version() {
        let header = Header {
            version: 18.into(),
            ..valid_header()
        };
        header.validate().unwrap();
    }

    #[test]
    fn test_invalid_layout() {
        let cases = [
            Header {
                off_mem_rsvmap: 32.into(),
                ..valid_header()
            },
            Header {
                off_mem_rsvmap: 44.into(),
                ..valid_header()
            },
            Header {
                off_dt_struct: 66.into(),
                ..valid_header()
            },
            Header {
                size_dt_struct: 40.into(),
                ..valid_header()
            },
            Header {
                size_dt_strings: 40.into(),
                ..valid_header()
            },
            Header {
                off_dt_strings: u32::MAX.into(),
                ..valid_header()
            },
        ];
        for header in cases {
            assert!(
                matches!(
                    header.validate().unwrap_err(),
                    HeaderValidationError::InvalidLayout { .. }
                ),
                "{header:?}"
            );
        }
    }

    #[test]
    fn test_read_write_round_trip_through_bytes() {
        let header = valid_header();
        let mut bytes = [0_u8; 41];
        header.write(&mut bytes[..]).unwrap();
        assert_eq!(&bytes[..4], &MAGIC.to_be_bytes());
        let read = Header::read(&bytes[1..]);
        assert!(read.is_some_and(|h| h.magic() != MAGIC));
        assert_eq!(Header::read(&bytes).unwrap().total_size(), 128);
        assert!(Header::read(&bytes[..39]).is_none());
    }

    #[test]
    fn test_compact_layout() {
        let header = Header::compact(3, 16, 100, 20, 4096).unwrap();
        header.validate().unwrap();
        assert_eq!(header.mem_rsvmap_offset(), 40);
        assert_eq!(header.struct_offset(), 56);
        assert_eq!(header.strings_offset(), 156);
        assert_eq!(header.strings_end(), 176);
        assert_eq!(header.total_size(), 4096);
        assert_eq!(header.boot_cpuid_phys(), 3);
        assert!(Header::compact(0, 16, 100, 20, 150).is_none());
    }

    #[test]
    fn test_mem_rsvmap_len() {
        let mut bytes = [0_u8; 64];
        bytes[..16].copy_from_slice(ReserveEntry::new(0x1000, 0x2000).as_bytes());
        assert_eq!(mem_rsvmap_len(&bytes, 0, 64), Some(32));
        assert_eq!(mem_rsvmap_len(&bytes, 0, 24), None);

        let unterminated = [0xff_u8; 48];
        assert_eq!(mem_rsvmap_len(&unterminated, 0, 48), None);
    }

    #[test]
    fn test_token_aligned() {
        assert_eq!(token_aligned(0), 0);
        assert_eq!(token_aligned(1), 4);
        assert_eq!(token_aligned(8), 8);
        assert_eq!(token_aligned(9), 12);
    }

    #[test]
    fn test_prop_header_bytes() {
        let header = PropHeader::new(42, 100);
        assert_eq!(header.as_bytes(), &[0, 0, 0, 42, 0, 0, 0, 100]);
        assert_eq!(StructToken::new(StructToken::END).as_bytes(), &[0, 0, 0, 9]);
    }
}
