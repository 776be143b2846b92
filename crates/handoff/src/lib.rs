//! Loading of FIT image components and preparation of the devicetree handed
//! to the next boot stage.
//!
//! The boot devicetree points at a FIT image through
//! `/chosen/linux,initrd-start`. Each component named by a [`BootPlan`] is
//! copied from the FIT image to the address it declares, one component (the
//! target devicetree) is reopened with room to grow, and the target tree is
//! patched with a module description per component and with the memory
//! topology of the boot tree. [`prepare`] runs the whole sequence and returns
//! the [`Handoff`] the boot stub jumps through.
//!
//! Everything here works on physical memory through [`phys::PhysMemory`], so
//! the sequence runs unchanged against simulated memory in tests. Only
//! [`prepare`] logs; the steps it is built from report failures through their
//! error values.

#![cfg_attr(not(test), no_std)]

pub use self::{
    boot::{
        BootError, BootPlan, ComponentKind, ComponentSpec, Handoff, MAX_COMPONENTS, ModuleSpec,
        prepare,
    },
    coherence::{CoherenceError, make_range_coherent, make_tree_coherent},
    extent::{Extent, ExtentError, FitImage, Placement},
    image::{ARM64_IMAGE_MAGIC, ImageHeader},
    loader::{LoadError, LoadedComponent, load_opaque_component, load_tree_component},
    locate::{LocateError, locate_subimage},
    patch::{PatchError, add_module, sync_memory_topology},
};

pub mod boot;
pub mod coherence;
pub mod extent;
pub mod image;
pub mod loader;
pub mod locate;
pub mod patch;
