//! Build-time configuration of the stub.

use handoff::{ComponentSpec, Placement};
use log::LevelFilter;
use phys::{PhysAddr, PhysRange};

/// PL011 UART of the QEMU `virt` machine.
pub const UART_BASE: usize = 0x0900_0000;

pub const LOG_LEVEL: LevelFilter = if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

/// Exception level the next stage has to be entered at.
pub const REQUIRED_EL: u8 = 2;

/// Memory the stub may read and overwrite.
///
/// It must hold the boot devicetree, the FIT image and every load address, and
/// must end below the stub image placed by `stub.ld`.
pub const RAM: PhysRange = PhysRange::new(PhysAddr::new(0x4000_0000), 0x3fe0_0000);

const PLACEMENT: Placement = if cfg!(feature = "reg-placement") {
    Placement::RegPair
} else {
    Placement::LoadCell
};

/// Components loaded from the FIT image, in load order.
///
/// The hypervisor comes first and is jumped to. The devicetree is loaded last
/// since its size grows by the `extra-space` it asks for.
pub const BOOT_PLAN: [ComponentSpec; 4] = [
    ComponentSpec::opaque("/images/xen@1").placement(PLACEMENT),
    ComponentSpec::opaque("/images/linux@1")
        .placement(PLACEMENT)
        .module("multiboot,kernel", "module@0"),
    ComponentSpec::opaque("/images/initrd@1")
        .placement(PLACEMENT)
        .module("multiboot,ramdisk", "module@1"),
    ComponentSpec::tree("/images/fdt@1").placement(PLACEMENT),
];
