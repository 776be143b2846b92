use crate::asm;

/// Smallest data cache line size in bytes, decoded from `CTR_EL0.DminLine`.
#[must_use]
pub fn dcache_line_size_from_ctr(ctr_el0: u64) -> usize {
    // DminLine is log2 of the number of 4-byte words in a line.
    4 << ((ctr_el0 >> 16) & 0xf)
}

/// Exception level encoded in a `CurrentEL` value.
#[must_use]
pub fn exception_level_from_current_el(current_el: u64) -> u8 {
    #[expect(clippy::cast_possible_truncation)]
    let level = ((current_el >> 2) & 0b11) as u8;
    level
}

#[must_use]
pub fn dcache_line_size() -> usize {
    dcache_line_size_from_ctr(asm::read_ctr_el0())
}

#[must_use]
pub fn current_el() -> u8 {
    exception_level_from_current_el(asm::read_current_el())
}
