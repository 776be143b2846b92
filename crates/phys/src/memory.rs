use core::{ptr, slice};

use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, Snafu, ensure};
use snafu_utils::Location;

use crate::{PhysAddr, PhysRange};

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum MemoryError {
    #[snafu(display("physical range {range} is outside the accessible window {window}"))]
    OutOfRange {
        range: PhysRange,
        window: PhysRange,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("physical range at {start} with length {len:#x} wraps around"))]
    AddressOverflow {
        start: PhysAddr,
        len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("physical ranges {first} and {second} overlap"))]
    Overlapping {
        first: PhysRange,
        second: PhysRange,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Data cache maintenance for memory written by agents that bypass the CPU
/// caches.
pub trait DataCache {
    /// Size in bytes of the smallest cache line.
    fn line_size(&self) -> usize;

    /// Invalidates every cache line overlapping `range`, so that later reads
    /// observe what is in memory.
    fn invalidate(&self, range: PhysRange);
}

/// Access to physical memory.
///
/// Slices returned by the accessors borrow the memory object, so a region
/// cannot be read while another region is being written through it. Use
/// [`PhysMemory::split_disjoint`] to hold a readable and a writable region at
/// the same time.
pub trait PhysMemory {
    fn bytes(&self, range: PhysRange) -> Result<&[u8], MemoryError>;

    fn bytes_mut(&mut self, range: PhysRange) -> Result<&mut [u8], MemoryError>;

    /// Returns `src` for reading and `dst` for writing. Fails if they
    /// overlap.
    fn split_disjoint(
        &mut self,
        src: PhysRange,
        dst: PhysRange,
    ) -> Result<(&[u8], &mut [u8]), MemoryError>;

    /// Copies `len` bytes from `src` to `dst`. The regions may overlap.
    fn copy(&mut self, dst: PhysAddr, src: PhysAddr, len: usize) -> Result<(), MemoryError>;

    fn cache_line_size(&self) -> usize;

    fn invalidate_dcache(&mut self, range: PhysRange);
}

pub(crate) fn ensure_disjoint(first: PhysRange, second: PhysRange) -> Result<(), MemoryError> {
    #[expect(clippy::wildcard_imports)]
    use self::memory_error::*;

    ensure!(!first.overlaps(&second), OverlappingSnafu { first, second });
    Ok(())
}

/// Offset of `range` within `window`, if the range lies inside it.
pub(crate) fn window_offset(window: PhysRange, range: PhysRange) -> Result<usize, MemoryError> {
    #[expect(clippy::wildcard_imports)]
    use self::memory_error::*;

    range.end().context(AddressOverflowSnafu {
        start: range.start(),
        len: range.len(),
    })?;
    ensure!(window.contains_range(&range), OutOfRangeSnafu { range, window });
    range
        .start()
        .checked_sub(window.start())
        .context(OutOfRangeSnafu { range, window })
}

/// Physical memory accessed directly through identity-mapped addresses.
#[derive(Debug)]
pub struct IdentityMapped<C> {
    window: PhysRange,
    cache: C,
}

impl<C> IdentityMapped<C> {
    /// Creates an accessor for the physical memory in `window`.
    ///
    /// # Safety
    ///
    /// `window` must be identity-mapped, readable and writable memory that
    /// does not start at address zero. No other code may access it while the
    /// accessor exists, except through the accessor.
    pub unsafe fn new(window: PhysRange, cache: C) -> Self {
        Self { window, cache }
    }

    #[must_use]
    pub fn window(&self) -> PhysRange {
        self.window
    }
}

impl<C> PhysMemory for IdentityMapped<C>
where
    C: DataCache,
{
    fn bytes(&self, range: PhysRange) -> Result<&[u8], MemoryError> {
        window_offset(self.window, range)?;
        // SAFETY: the range lies within the window, which the constructor's
        // caller guarantees to be mapped and otherwise unaliased.
        Ok(unsafe { slice::from_raw_parts(range.start().as_ptr(), range.len()) })
    }

    fn bytes_mut(&mut self, range: PhysRange) -> Result<&mut [u8], MemoryError> {
        window_offset(self.window, range)?;
        // SAFETY: as in `bytes`; `&mut self` excludes other borrows.
        Ok(unsafe { slice::from_raw_parts_mut(range.start().as_mut_ptr(), range.len()) })
    }

    fn split_disjoint(
        &mut self,
        src: PhysRange,
        dst: PhysRange,
    ) -> Result<(&[u8], &mut [u8]), MemoryError> {
        window_offset(self.window, src)?;
        window_offset(self.window, dst)?;
        ensure_disjoint(src, dst)?;
        // SAFETY: both ranges lie within the window and do not overlap.
        let src = unsafe { slice::from_raw_parts(src.start().as_ptr(), src.len()) };
        let dst = unsafe { slice::from_raw_parts_mut(dst.start().as_mut_ptr(), dst.len()) };
        Ok((src, dst))
    }

    fn copy(&mut self, dst: PhysAddr, src: PhysAddr, len: usize) -> Result<(), MemoryError> {
        window_offset(self.window, PhysRange::new(src, len))?;
        window_offset(self.window, PhysRange::new(dst, len))?;
        // SAFETY: both ranges lie within the window; `ptr::copy` allows
        // overlap.
        unsafe { ptr::copy(src.as_ptr::<u8>(), dst.as_mut_ptr::<u8>(), len) };
        Ok(())
    }

    fn cache_line_size(&self) -> usize {
        self.cache.line_size()
    }

    fn invalidate_dcache(&mut self, range: PhysRange) {
        if range.is_empty() {
            return;
        }
        self.cache.invalidate(range);
    }
}

/// Rounds `range` out to whole cache lines of `line_size` bytes.
#[must_use]
pub fn line_aligned(range: PhysRange, line_size: usize) -> PhysRange {
    let start = range.start().align_down(line_size);
    let head = usize::cast_from(range.start().value() - start.value());
    PhysRange::new(start, (head + range.len()).next_multiple_of(line_size))
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingCache {
        invalidated: RefCell<Vec<PhysRange>>,
    }

    impl DataCache for RecordingCache {
        fn line_size(&self) -> usize {
            64
        }

        fn invalidate(&self, range: PhysRange) {
            self.invalidated.borrow_mut().push(range);
        }
    }

    fn with_memory<R>(f: impl FnOnce(&mut IdentityMapped<RecordingCache>, PhysAddr) -> R) -> R {
        let mut backing = vec![0_u8; 256];
        let base = PhysAddr::from_ptr(backing.as_mut_ptr());
        let window = PhysRange::new(base, backing.len());
        let mut memory = unsafe { IdentityMapped::new(window, RecordingCache::default()) };
        f(&mut memory, base)
    }

    #[test]
    fn test_read_write_within_window() {
        with_memory(|memory, base| {
            let range = PhysRange::new(base.checked_add(16).unwrap(), 4);
            memory.bytes_mut(range).unwrap().copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(memory.bytes(range).unwrap(), [1, 2, 3, 4]);
        });
    }

    #[test]
    fn test_out_of_window() {
        with_memory(|memory, base| {
            let range = PhysRange::new(base.checked_add(250).unwrap(), 16);
            assert!(matches!(
                memory.bytes(range).unwrap_err(),
                MemoryError::OutOfRange { .. }
            ));
            let wrapping = PhysRange::new(PhysAddr::new(u64::MAX), 16);
            assert!(matches!(
                memory.bytes(wrapping).unwrap_err(),
                MemoryError::AddressOverflow { .. }
            ));
        });
    }

    #[test]
    fn test_overlapping_copy() {
        with_memory(|memory, base| {
            let src = base.checked_add(8).unwrap();
            memory
                .bytes_mut(PhysRange::new(src, 8))
                .unwrap()
                .copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
            let dst = base.checked_add(12).unwrap();
            memory.copy(dst, src, 8).unwrap();
            assert_eq!(
                memory.bytes(PhysRange::new(dst, 8)).unwrap(),
                [1, 2, 3, 4, 5, 6, 7, 8]
            );
        });
    }

    #[test]
    fn test_split_disjoint() {
        with_memory(|memory, base| {
            let src = PhysRange::new(base, 16);
            let dst = PhysRange::new(base.checked_add(16).unwrap(), 16);
            let (src_bytes, dst_bytes) = memory.split_disjoint(src, dst).unwrap();
            dst_bytes.copy_from_slice(src_bytes);

            let overlapping = PhysRange::new(base.checked_add(8).unwrap(), 16);
            assert!(matches!(
                memory.split_disjoint(src, overlapping).unwrap_err(),
                MemoryError::Overlapping { .. }
            ));
        });
    }

    #[test]
    fn test_invalidate_skips_empty_ranges() {
        with_memory(|memory, base| {
            memory.invalidate_dcache(PhysRange::new(base, 0));
            memory.invalidate_dcache(PhysRange::new(base, 1));
            assert_eq!(memory.cache.invalidated.borrow().len(), 1);
            assert_eq!(memory.cache_line_size(), 64);
        });
    }

    #[test]
    fn test_line_aligned() {
        let range = PhysRange::new(PhysAddr::new(0x1010), 0x40);
        let aligned = line_aligned(range, 64);
        assert_eq!(aligned.start(), PhysAddr::new(0x1000));
        assert_eq!(aligned.len(), 0x80);
        let exact = PhysRange::new(PhysAddr::new(0x1000), 0x40);
        assert_eq!(line_aligned(exact, 64), exact);
    }
}
