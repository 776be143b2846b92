#![no_std]
#![no_main]

#[cfg(not(target_os = "none"))]
compile_error!("the stub runs on bare metal only, build it for `aarch64-unknown-none`");

use handoff::BootPlan;
use phys::PhysAddr;

#[macro_use]
mod console;

mod boot;
mod config;
mod error;
mod launch;
mod logger;
mod platform;

fn stub_main(boot_tree: PhysAddr) -> ! {
    logger::init();
    println!();
    println!("FIT handoff stub {}", env!("CARGO_PKG_VERSION"));
    println!();

    let el = aarch64_utils::registers::current_el();
    log::info!("running at EL{el}");
    if el != config::REQUIRED_EL {
        panic!(
            "entered at EL{el}, the next stage expects EL{}",
            config::REQUIRED_EL
        );
    }

    let plan = BootPlan::new(&config::BOOT_PLAN);
    let mut memory = platform::memory();
    let handoff = handoff::prepare(&mut memory, boot_tree, &plan)
        .unwrap_or_else(|err| error::report(err));

    for (spec, loaded) in plan.components().iter().zip(&handoff.loaded) {
        log::info!("{:<24} {}", spec.path, loaded.range());
    }
    log::info!("entry point:        {}", handoff.entry);
    log::info!("target devicetree:  {}", handoff.tree);

    launch::launch(&memory, &handoff)
}
