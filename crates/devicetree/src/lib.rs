//! Reading and in-place editing of Flattened Devicetree (FDT) blobs.
//!
//! [`Devicetree`] is a validated, read-only view of a blob: nodes are
//! addressed by [`NodeId`] handles obtained from path lookups, and properties
//! are read as raw bytes or through typed accessors. [`DevicetreeMut`] edits a
//! blob in place inside a buffer whose length is the tree's capacity, adding
//! nodes and setting or appending properties.
//!
//! The crate never allocates. Blobs are read and written with unaligned
//! accesses, so they may live anywhere in memory.
//!
//! See the [Devicetree Specification] for the binary format.
//!
//! [Devicetree Specification]: https://devicetree-specification.readthedocs.io/en/stable/flattened-format.html

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub use self::{
    error::{DevicetreeError, NAME_CAPACITY, Name},
    tree::{Devicetree, MemRsvmapIter, NodeId},
    tree_mut::DevicetreeMut,
};

pub mod error;
pub mod layout;
pub mod property;
pub mod struct_lexer;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod tree;
mod tree_mut;
