#[unsafe(link_section = ".text.entry")]
#[unsafe(export_name = "entry")]
unsafe extern "C" fn entry() {
    // to suppress warnings
    let _ = super::super::primary_entry;
    let _ = unsafe { super::super::BOOT_STACK_TOP };
    let _ = unsafe { super::super::BSS_START };
    let _ = unsafe { super::super::BSS_END };
    unimplemented!("unsupported architecture");
}
