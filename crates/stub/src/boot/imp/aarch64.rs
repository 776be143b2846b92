use core::arch::naked_asm;

use super::super::BOOT_STACK_TOP;

// The previous stage enters with the MMU and data cache off and passes the
// physical address of the boot devicetree in `x0`, as for a Linux image.
//
// https://docs.kernel.org/arch/arm64/booting.html
#[unsafe(naked)]
#[unsafe(link_section = ".text.entry")]
#[unsafe(export_name = "entry")]
unsafe extern "C" fn entry(dtb: *const u8) -> ! {
    naked_asm!(
        "adrp x9, {boot_stack_top}",
        "add x9, x9, :lo12:{boot_stack_top}",
        "mov sp, x9",
        "b {primary_entry}",
        boot_stack_top = sym BOOT_STACK_TOP,
        primary_entry = sym super::super::primary_entry,
    );
}
