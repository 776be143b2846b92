//! Fixed byte order wire values.
//!
//! Every integer in a flattened devicetree (header fields, structure tokens,
//! property cells) is stored big-endian, and the AArch64 kernel image header
//! is little-endian. [`Be`] and [`Le`] keep a value in its wire representation
//! and convert on access, so structures can be overlaid on raw bytes with
//! [`dataview`].

#![cfg_attr(not(test), no_std)]

use core::fmt;

use dataview::Pod;

/// Integers that can be converted to and from a fixed byte order.
pub trait ByteOrder: Copy {
    /// Size of the value in bytes.
    const SIZE: usize;

    /// Converts a value from big-endian to native endianness.
    #[must_use]
    fn from_be(be: Self) -> Self;

    /// Converts a value from native endianness to big-endian.
    #[must_use]
    fn to_be(self) -> Self;

    /// Converts a value from little-endian to native endianness.
    #[must_use]
    fn from_le(le: Self) -> Self;

    /// Converts a value from native endianness to little-endian.
    #[must_use]
    fn to_le(self) -> Self;
}

macro_rules! impl_byte_order {
    ($($t:ty),+) => {
        $(
            impl ByteOrder for $t {
                const SIZE: usize = size_of::<$t>();

                fn from_be(be: Self) -> Self {
                    <$t>::from_be(be)
                }

                fn to_be(self) -> Self {
                    <$t>::to_be(self)
                }

                fn from_le(le: Self) -> Self {
                    <$t>::from_le(le)
                }

                fn to_le(self) -> Self {
                    <$t>::to_le(self)
                }
            }
        )+
    };
}

impl_byte_order!(u8, u16, u32, u64);

/// A value stored in big-endian byte order.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Be<T>(T);

impl<T> Be<T>
where
    T: ByteOrder,
{
    /// Wraps a native value, converting it to big-endian.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(value.to_be())
    }

    /// Reads the value, converting from big-endian to native endianness.
    #[must_use]
    pub fn read(&self) -> T {
        T::from_be(self.0)
    }

    /// Writes a value, converting from native endianness to big-endian.
    pub fn write(&mut self, value: T) {
        self.0 = value.to_be();
    }
}

impl<T> From<T> for Be<T>
where
    T: ByteOrder,
{
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// A value stored in little-endian byte order.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Le<T>(T);

impl<T> Le<T>
where
    T: ByteOrder,
{
    /// Wraps a native value, converting it to little-endian.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(value.to_le())
    }

    /// Reads the value, converting from little-endian to native endianness.
    #[must_use]
    pub fn read(&self) -> T {
        T::from_le(self.0)
    }

    /// Writes a value, converting from native endianness to little-endian.
    pub fn write(&mut self, value: T) {
        self.0 = value.to_le();
    }
}

impl<T> From<T> for Le<T>
where
    T: ByteOrder,
{
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Combines big-endian 32-bit cells, most significant cell first, into one
/// value.
///
/// Returns `None` if `cells` does not hold a whole number of cells or if the
/// value does not fit in 64 bits.
#[must_use]
pub fn read_cells(cells: &[u8]) -> Option<u64> {
    const CELL_SIZE: usize = <u32 as ByteOrder>::SIZE;

    if !cells.len().is_multiple_of(CELL_SIZE) || cells.len() > 2 * CELL_SIZE {
        return None;
    }
    let value = cells
        .chunks_exact(CELL_SIZE)
        .map(|cell| u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]))
        .fold(0_u64, |acc, cell| (acc << 32) | u64::from(cell));
    Some(value)
}

macro_rules! impl_fmt_traits {
    ($($trait:tt),+ for $ty:tt) => {
        $(
            impl<T> fmt::$trait for $ty<T>
            where
                T: ByteOrder + fmt::$trait
            {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::$trait::fmt(&self.read(), f)
                }
            }
        )+
    };
}

macro_rules! impl_common_traits {
    ($($ty:tt),+) => {
        $(
            unsafe impl<T> Pod for $ty<T> where T: Pod {}
            impl_fmt_traits!(Debug, Display, LowerHex, UpperHex for $ty);
        )+
    };
}

impl_common_traits!(Be, Le);
