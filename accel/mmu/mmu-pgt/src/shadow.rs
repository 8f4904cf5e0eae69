//! # Shadow Hops
//!
//! Host-side copies of the hop tables and the per-context index of the hops
//! a context owns, keyed by their shadow address.

use crate::entry::HopEntry;
use alloc::alloc::{Layout, alloc_zeroed};
use alloc::boxed::Box;
use hashbrown::HashMap;
use mmu_addresses::{PhysicalAddress, ShadowAddress};
use mmu_info::pte::PTE_ENTRIES_IN_HOP;
use utils_accessors_derive::Accessors;

/// Host copy of one hop table: 512 entries, aligned like the device table so
/// its shadow address has clear flag bits.
#[repr(C, align(4096))]
pub struct ShadowHop {
    entries: [HopEntry; PTE_ENTRIES_IN_HOP],
}

const _: () = assert!(size_of::<ShadowHop>() as u64 == mmu_info::pte::HOP_TABLE_SIZE);

impl ShadowHop {
    /// A zero-filled table, or `None` if host memory is exhausted.
    #[must_use]
    pub fn new_zeroed() -> Option<Box<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: the layout is non-zero sized, and an all-zero `ShadowHop` is
        // valid (every entry is a plain `u64`). Ownership of the allocation
        // passes to the returned box, which frees it with the same layout.
        unsafe {
            let ptr = alloc_zeroed(layout).cast::<Self>();
            if ptr.is_null() {
                None
            } else {
                Some(Box::from_raw(ptr))
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn shadow_addr(&self) -> ShadowAddress {
        ShadowAddress::from_ptr(core::ptr::from_ref(self))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<HopEntry> {
        self.entries.get(index).copied()
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut HopEntry> {
        self.entries.get_mut(index)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.fill(HopEntry::zero());
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = HopEntry> + '_ {
        self.entries.iter().copied()
    }
}

/// Book-keeping for one dynamically allocated hop.
#[derive(Accessors)]
pub struct HopInfo {
    #[accessors(get_only)]
    phys_addr: PhysicalAddress,
    #[accessors(get_only)]
    shadow_addr: ShadowAddress,
    #[accessors(get_only)]
    asid: u32,
    /// Present entries in `table`.
    #[accessors(get_only)]
    num_of_ptes: u32,
    #[accessors(skip)]
    table: Box<ShadowHop>,
}

impl HopInfo {
    #[must_use]
    pub fn new(phys_addr: PhysicalAddress, asid: u32, table: Box<ShadowHop>) -> Self {
        Self {
            phys_addr,
            shadow_addr: table.shadow_addr(),
            asid,
            num_of_ptes: 0,
            table,
        }
    }

    #[must_use]
    pub fn table(&self) -> &ShadowHop {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut ShadowHop {
        &mut self.table
    }

    pub(crate) const fn inc(&mut self) -> u32 {
        self.num_of_ptes += 1;
        self.num_of_ptes
    }

    pub(crate) const fn dec(&mut self) -> u32 {
        self.num_of_ptes = self.num_of_ptes.saturating_sub(1);
        self.num_of_ptes
    }
}

impl core::fmt::Debug for HopInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HopInfo")
            .field("phys_addr", &self.phys_addr)
            .field("shadow_addr", &self.shadow_addr)
            .field("asid", &self.asid)
            .field("num_of_ptes", &self.num_of_ptes)
            .finish_non_exhaustive()
    }
}

/// Hops of one context, by shadow address.
#[derive(Default)]
pub struct ShadowIndex {
    hops: HashMap<ShadowAddress, HopInfo>,
}

impl ShadowIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn lookup(&self, shadow: ShadowAddress) -> Option<&HopInfo> {
        self.hops.get(&shadow)
    }

    #[inline]
    pub fn lookup_mut(&mut self, shadow: ShadowAddress) -> Option<&mut HopInfo> {
        self.hops.get_mut(&shadow)
    }

    /// Makes room for one more record without allocating in
    /// [`insert`](Self::insert). Returns `false` if host memory is exhausted.
    pub fn reserve_one(&mut self) -> bool {
        self.hops.try_reserve(1).is_ok()
    }

    pub fn insert(&mut self, info: HopInfo) {
        self.hops.insert(info.shadow_addr, info);
    }

    pub fn remove(&mut self, shadow: ShadowAddress) -> Option<HopInfo> {
        self.hops.remove(&shadow)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HopInfo> {
        self.hops.values()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = HopInfo> + '_ {
        self.hops.drain().map(|(_, info)| info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmu_addresses::PhysicalAddress;

    fn hop(pa: u64) -> HopInfo {
        HopInfo::new(PhysicalAddress::new(pa), 3, ShadowHop::new_zeroed().unwrap())
    }

    #[test]
    fn shadow_tables_are_zeroed_and_aligned() {
        let t = ShadowHop::new_zeroed().unwrap();
        assert!(t.shadow_addr().is_aligned(4096));
        assert_eq!(t.present_count(), 0);
        assert!(t.iter().all(|e| e.raw() == 0));
        assert_eq!(t.get(PTE_ENTRIES_IN_HOP), None);
    }

    #[test]
    fn index_is_keyed_by_shadow_address() {
        let mut idx = ShadowIndex::new();
        let a = hop(0x1000);
        let b = hop(0x2000);
        let (sa, sb) = (a.shadow_addr(), b.shadow_addr());
        idx.insert(a);
        idx.insert(b);

        assert_eq!(idx.len(), 2);
        assert_eq!(idx.lookup(sa).map(HopInfo::phys_addr), Some(PhysicalAddress::new(0x1000)));
        assert_eq!(idx.lookup(sb).map(HopInfo::asid), Some(3));

        let removed = idx.remove(sa).unwrap();
        assert_eq!(removed.shadow_addr(), sa);
        assert!(idx.lookup(sa).is_none());
        assert_eq!(idx.drain().count(), 1);
        assert!(idx.is_empty());
    }

    #[test]
    fn counters_do_not_underflow() {
        let mut h = hop(0x1000);
        assert_eq!(h.inc(), 1);
        assert_eq!(h.dec(), 0);
        assert_eq!(h.dec(), 0);
    }
}
