pub fn dsb_sy() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            unsafe {
                core::arch::asm!("dsb sy", options(nostack, preserves_flags));
            }
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}

pub fn isb() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            unsafe {
                core::arch::asm!("isb", options(nostack, preserves_flags));
            }
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}

pub fn wfe() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            unsafe {
                core::arch::asm!("wfe", options(nomem, nostack, preserves_flags));
            }
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}

/// Invalidates the data cache line containing `vaddr` to the point of
/// coherency.
pub fn dc_ivac(vaddr: usize) {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            unsafe {
                core::arch::asm!("dc ivac, {}", in(reg) vaddr, options(nostack, preserves_flags));
            }
        } else {
            let _ = vaddr;
            unimplemented!("unsupported architecture")
        }
    }
}

/// Invalidates all instruction caches to the point of unification.
pub fn ic_iallu() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            unsafe {
                core::arch::asm!("ic iallu", options(nostack, preserves_flags));
            }
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}

#[must_use]
pub fn read_ctr_el0() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            let value: u64;
            unsafe {
                core::arch::asm!("mrs {}, ctr_el0", out(reg) value, options(nomem, nostack, preserves_flags));
            }
            value
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}

#[must_use]
pub fn read_current_el() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "aarch64")] {
            let value: u64;
            unsafe {
                core::arch::asm!("mrs {}, CurrentEL", out(reg) value, options(nomem, nostack, preserves_flags));
            }
            value
        } else {
            unimplemented!("unsupported architecture")
        }
    }
}
