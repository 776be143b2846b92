//! In-memory physical memory for tests.

use alloc::vec::Vec;

use crate::{
    PhysAddr, PhysRange,
    memory::{MemoryError, PhysMemory, ensure_disjoint, window_offset},
};

/// A window of simulated physical memory starting at a fixed base address.
///
/// Cache invalidations are recorded instead of performed, so tests can check
/// which ranges were made coherent and in which order.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    base: PhysAddr,
    bytes: Vec<u8>,
    line_size: usize,
    invalidated: Vec<PhysRange>,
}

impl MemoryWindow {
    pub const DEFAULT_LINE_SIZE: usize = 64;

    #[must_use]
    pub fn new(base: PhysAddr, size: usize) -> Self {
        Self {
            base,
            bytes: alloc::vec![0; size],
            line_size: Self::DEFAULT_LINE_SIZE,
            invalidated: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_line_size(mut self, line_size: usize) -> Self {
        self.line_size = line_size;
        self
    }

    #[must_use]
    pub fn window(&self) -> PhysRange {
        PhysRange::new(self.base, self.bytes.len())
    }

    /// Copies `data` into memory at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the data does not fit in the window.
    pub fn write(&mut self, addr: PhysAddr, data: &[u8]) {
        let range = PhysRange::new(addr, data.len());
        self.bytes_mut(range).unwrap().copy_from_slice(data);
    }

    /// Reads `len` bytes at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not fit in the window.
    #[must_use]
    pub fn read(&self, addr: PhysAddr, len: usize) -> &[u8] {
        self.bytes(PhysRange::new(addr, len)).unwrap()
    }

    /// Ranges passed to [`PhysMemory::invalidate_dcache`], oldest first.
    #[must_use]
    pub fn invalidated(&self) -> &[PhysRange] {
        &self.invalidated
    }

    pub fn clear_invalidated(&mut self) {
        self.invalidated.clear();
    }

    /// Returns `true` if every byte of `range` was covered by a recorded
    /// invalidation.
    #[must_use]
    pub fn is_invalidated(&self, range: PhysRange) -> bool {
        let Some(end) = range.end() else {
            return false;
        };
        let mut covered = range.start();
        while covered < end {
            let Some(next) = self
                .invalidated
                .iter()
                .filter(|r| r.start() <= covered)
                .filter_map(PhysRange::end)
                .filter(|&e| e > covered)
                .max()
            else {
                return false;
            };
            covered = next;
        }
        true
    }
}

impl PhysMemory for MemoryWindow {
    fn bytes(&self, range: PhysRange) -> Result<&[u8], MemoryError> {
        let offset = window_offset(self.window(), range)?;
        Ok(&self.bytes[offset..][..range.len()])
    }

    fn bytes_mut(&mut self, range: PhysRange) -> Result<&mut [u8], MemoryError> {
        let offset = window_offset(self.window(), range)?;
        Ok(&mut self.bytes[offset..][..range.len()])
    }

    fn split_disjoint(
        &mut self,
        src: PhysRange,
        dst: PhysRange,
    ) -> Result<(&[u8], &mut [u8]), MemoryError> {
        let src_offset = window_offset(self.window(), src)?;
        let dst_offset = window_offset(self.window(), dst)?;
        ensure_disjoint(src, dst)?;
        if src_offset < dst_offset {
            let (head, tail) = self.bytes.split_at_mut(dst_offset);
            Ok((&head[src_offset..][..src.len()], &mut tail[..dst.len()]))
        } else {
            let (head, tail) = self.bytes.split_at_mut(src_offset);
            Ok((&tail[..src.len()], &mut head[dst_offset..][..dst.len()]))
        }
    }

    fn copy(&mut self, dst: PhysAddr, src: PhysAddr, len: usize) -> Result<(), MemoryError> {
        let src_offset = window_offset(self.window(), PhysRange::new(src, len))?;
        let dst_offset = window_offset(self.window(), PhysRange::new(dst, len))?;
        self.bytes
            .copy_within(src_offset..src_offset + len, dst_offset);
        Ok(())
    }

    fn cache_line_size(&self) -> usize {
        self.line_size
    }

    fn invalidate_dcache(&mut self, range: PhysRange) {
        if !range.is_empty() {
            self.invalidated.push(range);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_and_copy() {
        let base = PhysAddr::new(0x4000_0000);
        let mut memory = MemoryWindow::new(base, 0x100);
        let src = base.checked_add(0x10).unwrap();
        memory.write(src, b"fit image");
        let dst = base.checked_add(0x14).unwrap();
        memory.copy(dst, src, 9).unwrap();
        assert_eq!(memory.read(dst, 9), b"fit image");
    }

    #[test]
    fn test_rejects_ranges_outside_window() {
        let base = PhysAddr::new(0x4000_0000);
        let memory = MemoryWindow::new(base, 0x100);
        let below = PhysRange::new(PhysAddr::new(0x3fff_fff0), 0x20);
        assert!(matches!(
            memory.bytes(below).unwrap_err(),
            MemoryError::OutOfRange { .. }
        ));
    }

    #[test]
    fn test_split_disjoint_in_both_orders() {
        let base = PhysAddr::new(0x1000);
        let mut memory = MemoryWindow::new(base, 0x40);
        memory.write(base, &[1; 16]);
        let low = PhysRange::new(base, 16);
        let high = PhysRange::new(base.checked_add(32).unwrap(), 16);

        let (src, dst) = memory.split_disjoint(low, high).unwrap();
        dst.copy_from_slice(src);
        assert_eq!(memory.read(high.start(), 16), [1; 16]);

        memory.write(high.start(), &[2; 16]);
        let (src, dst) = memory.split_disjoint(high, low).unwrap();
        dst.copy_from_slice(src);
        assert_eq!(memory.read(base, 16), [2; 16]);
    }

    #[test]
    fn test_is_invalidated() {
        let base = PhysAddr::new(0x1000);
        let mut memory = MemoryWindow::new(base, 0x200);
        memory.invalidate_dcache(PhysRange::new(base, 0x40));
        memory.invalidate_dcache(PhysRange::new(PhysAddr::new(0x1040), 0x80));
        assert!(memory.is_invalidated(PhysRange::new(base, 0xc0)));
        assert!(!memory.is_invalidated(PhysRange::new(base, 0xc1)));
        memory.clear_invalidated();
        assert!(memory.invalidated().is_empty());
    }
}
