use core::{fmt, ptr};

use platform_cast::{CastFrom as _, CastInto as _};

macro_rules! impl_hex {
    ($ty:ty) => {
        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl fmt::UpperHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::UpperHex::fmt(&self.0, f)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

macro_rules! impl_pointer {
    ($ty:ty) => {
        impl fmt::Pointer for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let ptr = &ptr::without_provenance::<u8>(self.0.cast_into());
                fmt::Pointer::fmt(ptr, f)
            }
        }
    };
}

/// A physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);
impl_hex!(PhysAddr);
impl_pointer!(PhysAddr);

impl PhysAddr {
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Creates a physical address from a pointer on an identity-mapped system.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.expose_provenance().cast_into())
    }

    /// Returns the raw address value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Converts this address to a const pointer.
    #[must_use]
    pub fn as_ptr<T>(self) -> *const T {
        ptr::with_exposed_provenance(self.0.cast_into())
    }

    /// Converts this address to a mutable pointer.
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        ptr::with_exposed_provenance_mut(self.0.cast_into())
    }

    /// Rounds this address down to a multiple of `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    pub fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(u64::cast_from(align) - 1))
    }

    /// Safely adds a byte offset to this address.
    ///
    /// Returns `None` if the addition would overflow.
    #[must_use]
    pub fn checked_add(self, offset: usize) -> Option<Self> {
        self.0.checked_add(u64::cast_from(offset)).map(Self)
    }

    /// Safely subtracts another address from this one.
    ///
    /// Returns `None` if the subtraction would underflow or the difference
    /// does not fit in `usize`.
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<usize> {
        usize::try_from(self.0.checked_sub(rhs.0)?).ok()
    }
}

/// A range of physical memory, `len` bytes starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysRange {
    start: PhysAddr,
    len: usize,
}

impl PhysRange {
    #[must_use]
    pub const fn new(start: PhysAddr, len: usize) -> Self {
        Self { start, len }
    }

    #[must_use]
    pub const fn start(&self) -> PhysAddr {
        self.start
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the address one past the end of the range, or `None` if the
    /// range wraps around the address space.
    #[must_use]
    pub fn end(&self) -> Option<PhysAddr> {
        self.start.checked_add(self.len)
    }

    /// Returns `true` if `other` lies entirely within this range.
    #[must_use]
    pub fn contains_range(&self, other: &Self) -> bool {
        match (self.end(), other.end()) {
            (Some(end), Some(other_end)) => self.start <= other.start && other_end <= end,
            _ => false,
        }
    }

    /// Returns `true` if the two ranges share at least one byte.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let end = self.end().map_or(u128::from(u64::MAX) + 1, |end| u128::from(end.value()));
        let other_end = other
            .end()
            .map_or(u128::from(u64::MAX) + 1, |end| u128::from(end.value()));
        u128::from(self.start.value()) < other_end && u128::from(other.start.value()) < end
    }
}

impl fmt::Display for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.start, self.len)
    }
}
