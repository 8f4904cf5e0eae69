//! # Hop Entry
//!
//! One 64-bit slot of a hop table. The same slot exists twice: the *shadow*
//! value in host memory links to the next hop by its [`ShadowAddress`], while
//! the *device* value carries the next hop's [`PhysicalAddress`]. Leaf values
//! are identical in both views.
//!
//! | Bits   | Field      |
//! |--------|------------|
//! | 0      | `present`  |
//! | 1      | reserved   |
//! | 2      | `swap_out` |
//! | 3..10  | `flags`    |
//! | 11     | `last`     |
//! | 12..63 | address    |

use bitfield_struct::bitfield;
use mmu_addresses::{PhysicalAddress, ShadowAddress};
use mmu_info::pte::{FLAGS_MASK, HOP_PHYS_ADDR_MASK, LAST_MASK, PAGE_PRESENT_MASK, SWAP_OUT_MASK};

#[doc(alias = "PTE")]
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct HopEntry {
    /// Entry is valid (bit 0).
    pub present: bool,
    #[bits(1)]
    __reserved: u8,
    /// Reserved for eviction (bit 2); never set by this crate.
    pub swap_out: bool,
    /// Implementation-defined flags (bits 3..10).
    #[bits(8)]
    pub flags: u8,
    /// Leaf mapping (bit 11).
    pub last: bool,
    /// Address bits 63:12.
    #[bits(52)]
    addr_63_12: u64,
}

const _: () = {
    assert!(HopEntry::new().with_present(true).into_bits() == PAGE_PRESENT_MASK);
    assert!(HopEntry::new().with_swap_out(true).into_bits() == SWAP_OUT_MASK);
    assert!(HopEntry::new().with_last(true).into_bits() == LAST_MASK);
    assert!(HopEntry::new().with_addr_63_12(1).into_bits() == FLAGS_MASK + 1);
};

impl HopEntry {
    /// Non-present entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self::from_bits(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.into_bits()
    }

    /// The address field with the flag bits masked off.
    #[inline]
    #[must_use]
    pub const fn address(self) -> u64 {
        self.into_bits() & HOP_PHYS_ADDR_MASK
    }

    #[inline]
    #[must_use]
    pub const fn with_address(self, addr: u64) -> Self {
        Self::from_bits((self.into_bits() & FLAGS_MASK) | (addr & HOP_PHYS_ADDR_MASK))
    }

    /// Shadow value of a non-leaf entry pointing at `hop`.
    #[inline]
    #[must_use]
    pub const fn table(hop: ShadowAddress) -> Self {
        Self::new().with_present(true).with_address(hop.as_u64())
    }

    /// Leaf entry mapping the page at `pa`.
    #[inline]
    #[must_use]
    pub const fn leaf(pa: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_last(true)
            .with_address(pa.as_u64())
    }

    /// If present, the shadow address of the next hop.
    ///
    /// Only meaningful for shadow values of non-leaf entries.
    #[inline]
    #[must_use]
    pub const fn next_hop(self) -> Option<ShadowAddress> {
        if self.present() {
            Some(ShadowAddress::new(self.address()))
        } else {
            None
        }
    }

    /// If present and a leaf, the mapped page.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<PhysicalAddress> {
        if self.present() && self.last() {
            Some(PhysicalAddress::new(self.address()))
        } else {
            None
        }
    }

    /// Device value of this shadow entry, given the physical address of the
    /// hop its address field refers to. The 12 flag bits are kept.
    #[inline]
    #[must_use]
    pub const fn to_device(self, next_hop: PhysicalAddress) -> u64 {
        (self.into_bits() & FLAGS_MASK) | (next_hop.as_u64() & HOP_PHYS_ADDR_MASK)
    }
}
