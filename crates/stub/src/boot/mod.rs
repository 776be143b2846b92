use core::ptr;

use phys::PhysAddr;

mod imp;

unsafe extern "C" {
    #[link_name = "__stub_boot_stack_top"]
    static mut BOOT_STACK_TOP: u8;
    #[link_name = "__stub_bss_start"]
    static mut BSS_START: u8;
    #[link_name = "__stub_bss_end"]
    static mut BSS_END: u8;
}

unsafe fn init_bss() {
    unsafe {
        let start = &raw mut BSS_START;
        let end = &raw mut BSS_END;
        ptr::write_bytes(start, 0, end.addr() - start.addr());
    }
}

unsafe extern "C" fn primary_entry(dtb: *const u8) -> ! {
    unsafe {
        init_bss();
    }
    crate::stub_main(PhysAddr::from_ptr(dtb));
}
