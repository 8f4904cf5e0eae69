//! # Device MMU Address Types
//!
//! Strongly typed wrappers for the three kinds of addresses that meet in the
//! device page-table code.
//!
//! ## Overview
//!
//! The page-table manager deals with addresses that are all plain `u64`
//! values at the bottom, but mean very different things:
//!
//! | Type | Address space | Example |
//! |------|---------------|---------|
//! | [`VirtualAddress`] | Device virtual address, translated by the device MMU. | a host buffer mapped for DMA |
//! | [`PhysicalAddress`] | Device physical address (DRAM, page-table region). | a hop inside the page-table pool |
//! | [`ShadowAddress`] | Host memory holding the shadow copy of a hop. | a `Box`ed hop table on the host heap |
//!
//! All three wrap a principal [`MemoryAddress`] and are zero-cost. Mixing a
//! shadow and a physical address is a compile error; the only place where a
//! shadow address becomes a physical one is the hop record that owns both.
//!
//! ## Page sizes
//!
//! Device page sizes are not fixed by the architecture (the page-size class
//! comes from the device geometry at runtime), so the alignment helpers take
//! the size as an argument. Sizes must be non-zero powers of two.
//!
//! ```rust
//! # use mmu_addresses::*;
//! let va = VirtualAddress::new(0x1000_0000_1234);
//! assert_eq!(va.align_down(0x1000).as_u64(), 0x1000_0000_1000);
//! assert_eq!(va.offset_in(0x1000), 0x234);
//! assert!(!va.is_aligned(0x1000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// Principal raw memory address (virtual, physical or shadow).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u64);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Address of a host pointer.
    #[inline]
    #[must_use]
    pub const fn from_ptr<T>(ptr: *const T) -> Self {
        const _: () = assert!(
            size_of::<*const ()>() <= size_of::<u64>(),
            "pointer does not fit an address"
        );

        // const-time pointer to integer conversion
        union Ptr<T> {
            ptr: *const T,
            raw: usize,
        }

        let ptr = Ptr { ptr };
        Self::new(unsafe { ptr.raw } as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Align down to a multiple of `size` (power of two).
    #[inline(always)]
    #[must_use]
    pub const fn align_down(self, size: u64) -> Self {
        debug_assert!(size.is_power_of_two());
        Self(self.0 & !(size - 1))
    }

    /// Byte offset of this address within its `size`-sized block.
    #[inline(always)]
    #[must_use]
    pub const fn offset_in(self, size: u64) -> u64 {
        debug_assert!(size.is_power_of_two());
        self.0 & (size - 1)
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_aligned(self, size: u64) -> bool {
        self.offset_in(size) == 0
    }

    /// Checked add, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for MemoryAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for MemoryAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Implements the shared surface of an address kind on top of [`MemoryAddress`].
macro_rules! address_kind {
    ($name:ident, $tag:literal) => {
        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(v: u64) -> Self {
                Self(MemoryAddress::new(v))
            }

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self::new(0)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0.as_u64()
            }

            #[inline]
            #[must_use]
            pub const fn as_memory_address(self) -> MemoryAddress {
                self.0
            }

            /// Align down to a multiple of `size` (power of two).
            #[inline]
            #[must_use]
            pub const fn align_down(self, size: u64) -> Self {
                Self(self.0.align_down(size))
            }

            /// Byte offset within the `size`-sized block containing this address.
            #[inline]
            #[must_use]
            pub const fn offset_in(self, size: u64) -> u64 {
                self.0.offset_in(size)
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned(self, size: u64) -> bool {
                self.0.is_aligned(size)
            }

            #[inline]
            #[must_use]
            pub const fn checked_add(self, rhs: u64) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:016X})"), self.as_u64())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}", self.as_u64())
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.as_u64(), f)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;
            #[inline]
            fn add(self, rhs: u64) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u64> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: u64) {
                self.0 += rhs;
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(v: u64) -> Self {
                Self::new(v)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(v: $name) -> Self {
                v.as_u64()
            }
        }
    };
}

/// Device virtual address.
///
/// Carries the *kind* of address only; no range or canonicality checks are
/// performed. Which page-size class governs an address is decided by the
/// device geometry, not by this type.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(MemoryAddress);

address_kind!(VirtualAddress, "VA");

/// Device physical address.
///
/// Used for hops in the page-table region, for the DRAM default page and for
/// the targets of leaf mappings. This is the only kind of address ever handed
/// to the device.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(MemoryAddress);

address_kind!(PhysicalAddress, "PA");

/// Host address of a shadow hop table (or of an entry inside one).
///
/// The shadow copy of every hop lives in host memory so the driver can walk
/// the translation tree without reading the device back. Shadow entries link
/// hops by their shadow address; the device copy links them by physical
/// address.
///
/// ### Examples
/// ```rust
/// # use mmu_addresses::ShadowAddress;
/// let table = [0u64; 4];
/// let sa = ShadowAddress::from_ptr(table.as_ptr());
/// assert_eq!(sa.as_u64(), table.as_ptr() as u64);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ShadowAddress(MemoryAddress);

address_kind!(ShadowAddress, "SA");

impl ShadowAddress {
    /// Shadow address of a host object.
    #[inline]
    #[must_use]
    pub const fn from_ptr<T>(ptr: *const T) -> Self {
        Self(MemoryAddress::from_ptr(ptr))
    }
}
