//! Thin wrappers around AArch64 system instructions and registers.
//!
//! On other architectures every instruction wrapper panics, so host-side tests
//! only exercise the register decoding helpers.

#![cfg_attr(not(test), no_std)]

pub mod asm;
pub mod cache;
pub mod registers;
