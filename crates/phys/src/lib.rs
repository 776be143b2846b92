//! Physical addresses and access to physical memory.
//!
//! Boot code reads and writes memory by physical address. [`PhysMemory`] is
//! the seam between that logic and the platform: the boot stub uses
//! [`IdentityMapped`] on the real machine, and tests use the in-memory
//! [`testing::MemoryWindow`].

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub use self::{
    address::{PhysAddr, PhysRange},
    memory::{DataCache, IdentityMapped, MemoryError, PhysMemory, line_aligned},
};

mod address;
mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
