//! Cache maintenance for memory written by an earlier boot stage.
//!
//! The previous stage may leave the images it loaded in the data cache and
//! then turn the cache off. Lines covering such an image must be invalidated
//! before its contents can be trusted.

use devicetree::{
    DevicetreeError,
    layout::{self, HEADER_SIZE},
};
use phys::{MemoryError, PhysAddr, PhysMemory, PhysRange, line_aligned};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use snafu_utils::Location;

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum CoherenceError {
    #[snafu(display("devicetree at {addr} is not accessible"))]
    Access {
        addr: PhysAddr,
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no valid devicetree at {addr}"))]
    InvalidTree {
        addr: PhysAddr,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("devicetree at {addr} with size {size:#x} wraps around"))]
    SizeOverflow {
        addr: PhysAddr,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Makes the devicetree at `addr` coherent and returns the range it occupies.
///
/// Only the cache lines holding the header are invalidated before the header
/// is validated. The remaining lines up to `totalsize` are invalidated once
/// the header is known to be a devicetree header, so nothing past the first
/// lines is touched for memory that does not hold a tree.
pub fn make_tree_coherent<M>(mem: &mut M, addr: PhysAddr) -> Result<PhysRange, CoherenceError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::coherence_error::*;

    let header_range = PhysRange::new(addr, HEADER_SIZE);
    mem.bytes(header_range).context(AccessSnafu { addr })?;
    let head = line_aligned(header_range, mem.cache_line_size());
    mem.invalidate_dcache(head);

    let header = layout::checked_header(mem.bytes(header_range).context(AccessSnafu { addr })?)
        .context(InvalidTreeSnafu { addr })?;
    let size = header.total_size();
    let tree = PhysRange::new(addr, size);
    let tree_end = tree.end().context(SizeOverflowSnafu { addr, size })?;
    mem.bytes(tree).context(AccessSnafu { addr })?;

    let rest = head
        .end()
        .and_then(|head_end| Some(PhysRange::new(head_end, tree_end.checked_sub(head_end)?)));
    if let Some(rest) = rest {
        mem.invalidate_dcache(rest);
    }
    Ok(tree)
}

/// Invalidates the cache lines covering `range` after checking that the range
/// is accessible.
pub fn make_range_coherent<M>(mem: &mut M, range: PhysRange) -> Result<(), MemoryError>
where
    M: PhysMemory + ?Sized,
{
    mem.bytes(range)?;
    mem.invalidate_dcache(range);
    Ok(())
}

#[cfg(test)]
mod tests {
    use devicetree::{layout::HeaderValidationError, testing::TreeBuilder};
    use phys::testing::MemoryWindow;

    use super::*;

    const BASE: PhysAddr = PhysAddr::new(0x4000_0000);

    fn tree_blob() -> Vec<u8> {
        let mut builder = TreeBuilder::new();
        builder
            .begin_node("")
            .prop_str("model", "test board")
            .begin_node("chosen")
            .end_node()
            .end_node()
            .headroom(200);
        builder.build()
    }

    #[test]
    fn test_tree_is_invalidated_in_two_phases() {
        let blob = tree_blob();
        let mut memory = MemoryWindow::new(BASE, 0x1000);
        memory.write(BASE, &blob);

        let range = make_tree_coherent(&mut memory, BASE).unwrap();
        assert_eq!(range, PhysRange::new(BASE, blob.len()));
        let invalidated = memory.invalidated();
        assert_eq!(invalidated.len(), 2);
        assert_eq!(invalidated[0], PhysRange::new(BASE, 64));
        assert_eq!(invalidated[1].start(), PhysAddr::new(0x4000_0040));
        assert!(memory.is_invalidated(range));
    }

    #[test]
    fn test_header_spanning_two_lines() {
        let blob = tree_blob();
        let addr = PhysAddr::new(0x4000_0030);
        let mut memory = MemoryWindow::new(BASE, 0x1000).with_line_size(32);
        memory.write(addr, &blob);

        let range = make_tree_coherent(&mut memory, addr).unwrap();
        assert_eq!(memory.invalidated()[0], PhysRange::new(PhysAddr::new(0x4000_0020), 0x40));
        assert!(memory.is_invalidated(range));
    }

    #[test]
    fn test_bad_magic_stops_after_first_line() {
        let mut blob = tree_blob();
        blob[..4].copy_from_slice(&0xdead_beef_u32.to_be_bytes());
        let mut memory = MemoryWindow::new(BASE, 0x1000);
        memory.write(BASE, &blob);

        let err = make_tree_coherent(&mut memory, BASE).unwrap_err();
        assert!(matches!(
            err,
            CoherenceError::InvalidTree {
                source: DevicetreeError::InvalidHeader {
                    source: HeaderValidationError::InvalidMagic { .. },
                    ..
                },
                ..
            }
        ));
        assert_eq!(memory.invalidated(), [PhysRange::new(BASE, 64)]);
    }

    #[test]
    fn test_tree_larger_than_memory() {
        let blob = tree_blob();
        let mut memory = MemoryWindow::new(BASE, blob.len() - 1);
        memory.write(BASE, &blob[..blob.len() - 1]);

        let err = make_tree_coherent(&mut memory, BASE).unwrap_err();
        assert!(matches!(err, CoherenceError::Access { .. }));
        assert_eq!(memory.invalidated().len(), 1);
    }

    #[test]
    fn test_header_outside_memory() {
        let mut memory = MemoryWindow::new(BASE, 0x20);
        let err = make_tree_coherent(&mut memory, BASE).unwrap_err();
        assert!(matches!(err, CoherenceError::Access { .. }));
        assert!(memory.invalidated().is_empty());
    }

    #[test]
    fn test_make_range_coherent() {
        let mut memory = MemoryWindow::new(BASE, 0x100);
        let range = PhysRange::new(PhysAddr::new(0x4000_0010), 0x20);
        make_range_coherent(&mut memory, range).unwrap();
        assert_eq!(memory.invalidated(), [range]);

        let outside = PhysRange::new(PhysAddr::new(0x4000_00f0), 0x20);
        assert!(make_range_coherent(&mut memory, outside).is_err());
        assert_eq!(memory.invalidated().len(), 1);
    }
}
