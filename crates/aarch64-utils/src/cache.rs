use crate::{asm, registers};

/// Invalidates every data cache line overlapping `[start, start + len)`,
/// then waits for the maintenance to complete.
pub fn invalidate_dcache_range(start: usize, len: usize) {
    if len == 0 {
        return;
    }
    let line = registers::dcache_line_size();
    let end = start.saturating_add(len);
    let mut addr = start & !(line - 1);
    while addr < end {
        asm::dc_ivac(addr);
        addr = addr.saturating_add(line);
        if addr == usize::MAX {
            break;
        }
    }
    asm::dsb_sy();
}
