//! # Map and Unmap
//!
//! Single pages walk `root → hop1 → hop2 → hop3 (→ hop4)`; the leaf sits in
//! hop 4 for regular pages and in hop 3 for huge and DRAM pages. Hops are
//! created on the way down while mapping and released bottom-up as soon as
//! unmapping empties them.
//!
//! Multi-page requests pick one page class for the whole range. A failed map
//! unwinds the pages it already wrote; a failed unmap stops where it failed.

use crate::PteIo;
use crate::config::{MmuProperties, PageClass};
use crate::context::MmuContext;
use crate::entry::HopEntry;
use crate::error::MmuError;
use crate::walk::PteSlot;
use log::{debug, error, warn};
use mmu_addresses::{PhysicalAddress, ShadowAddress, VirtualAddress};
use mmu_info::pte::MMU_HOPS;

/// Hops along the path of one page, and which of them this call allocated.
struct PagePath {
    hops: [ShadowAddress; MMU_HOPS],
    fresh: [bool; MMU_HOPS],
}

impl PagePath {
    const fn new(root: ShadowAddress) -> Self {
        Self {
            hops: [root; MMU_HOPS],
            fresh: [false; MMU_HOPS],
        }
    }

    /// Entry of `va` in the hop at `level`.
    fn slot(&self, props: &MmuProperties, level: usize, va: VirtualAddress) -> PteSlot {
        PteSlot::new(self.hops[level], props.hop_index(level, va))
    }

    fn any_fresh(&self) -> bool {
        self.fresh.iter().any(|&f| f)
    }
}

fn not_mapped(va: VirtualAddress) -> MmuError {
    error!("virt addr {va} is not mapped to phys addr");
    MmuError::NotMapped { va }
}

impl<D: PteIo> MmuContext<'_, D> {
    /// Leaf value of every unmapped page in the default-mapped DRAM range.
    #[inline]
    pub(crate) const fn default_entry(&self) -> HopEntry {
        HopEntry::leaf(self.config().dram_default_page_addr())
    }

    /// Maps `size` bytes at `va` to `pa`.
    ///
    /// The page class follows from the range: DRAM addresses use DRAM pages,
    /// host ranges that are a multiple of the huge page size use huge pages,
    /// everything else regular pages. On failure every page mapped by this
    /// call is unmapped again and the tables are flushed.
    ///
    /// # Errors
    /// * [`MmuError::MisalignedSize`] if `size` is not a multiple of the page size.
    /// * [`MmuError::RangeOverflow`] if either range wraps.
    /// * Any error of the failing page; see [`MmuError`].
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        flush: bool,
    ) -> Result<(), MmuError> {
        let class = self.config().classify(va, size);
        let page_size = self.config().properties(class).page_size();

        if !size.is_multiple_of(page_size) {
            error!("page size of {page_size:#x} is not a divisor of {size:#x}, can't map");
            return Err(MmuError::MisalignedSize { size, page_size });
        }
        if va.checked_add(size).is_none() || pa.checked_add(size).is_none() {
            return Err(MmuError::RangeOverflow { va, size });
        }
        if !pa.is_aligned(page_size) {
            warn!("mapping address {pa} with size {size:#x} is not aligned to {page_size:#x}");
        }

        let pages = size / page_size;
        for i in 0..pages {
            let offset = i * page_size;
            if let Err(e) = self.map_page(va + offset, pa + offset, class) {
                error!("map failed for va {}: {e}", va + offset);
                self.unwind(va, i, page_size, class.is_dram());
                self.flush();
                return Err(e);
            }
        }

        if flush {
            self.flush();
        }
        Ok(())
    }

    /// Unmaps `size` bytes at `va`, stopping at the first page that fails.
    ///
    /// # Errors
    /// * [`MmuError::MisalignedSize`] if `size` is not a multiple of the page size.
    /// * [`MmuError::RangeOverflow`] if the range wraps.
    /// * Any error of the failing page; earlier pages stay unmapped.
    pub fn unmap(&mut self, va: VirtualAddress, size: u64, flush: bool) -> Result<(), MmuError> {
        let class = self.config().classify(va, size);
        let page_size = self.config().properties(class).page_size();

        if !size.is_multiple_of(page_size) {
            error!("page size of {page_size:#x} is not a divisor of {size:#x}, can't unmap");
            return Err(MmuError::MisalignedSize { size, page_size });
        }
        if va.checked_add(size).is_none() {
            return Err(MmuError::RangeOverflow { va, size });
        }

        let mut result = Ok(());
        for i in 0..size / page_size {
            if let Err(e) = self.unmap_page(va + i * page_size, class.is_dram()) {
                result = Err(e);
                break;
            }
        }

        if flush {
            self.flush();
        }
        result
    }

    fn unwind(&mut self, va: VirtualAddress, pages: u64, page_size: u64, is_dram: bool) {
        for i in 0..pages {
            let page = va + i * page_size;
            if let Err(e) = self.unmap_page(page, is_dram) {
                warn!("failed to unmap va {page} during map rollback: {e}");
            }
        }
    }

    /// Maps one page of `class` at `va`.
    pub(crate) fn map_page(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        class: PageClass,
    ) -> Result<(), MmuError> {
        let props = *self.config().properties(class);
        let leaf_level = class.leaf_level();
        let mut path = PagePath::new(self.root_shadow());

        if let Err(e) = self.prepare_map(va, class, &props, &mut path) {
            for level in (1..=leaf_level).rev().filter(|&l| path.fresh[l]) {
                self.discard_hops(&[path.hops[level]]);
            }
            return Err(e);
        }

        self.write_final_pte(path.slot(&props, leaf_level, va), HopEntry::leaf(pa))?;

        for level in 1..=leaf_level {
            if !path.fresh[level] {
                continue;
            }
            self.write_pte(path.slot(&props, level - 1, va), HopEntry::table(path.hops[level]))?;
            if level > 1 {
                self.get_pte(path.hops[level - 1])?;
            }
        }

        self.get_pte(path.hops[leaf_level])?;
        Ok(())
    }

    /// Walks down to the leaf, allocating absent hops, and checks that the
    /// leaf may be written. Nothing is linked yet.
    fn prepare_map(
        &mut self,
        va: VirtualAddress,
        class: PageClass,
        props: &MmuProperties,
        path: &mut PagePath,
    ) -> Result<(), MmuError> {
        let leaf_level = class.leaf_level();

        for level in 1..=leaf_level {
            let parent = self.entry(path.slot(props, level - 1, va))?;
            if parent.present() && parent.last() {
                error!("mapping already exists for virt_addr {va} (hop{} leaf)", level - 1);
                return Err(MmuError::AlreadyMapped { va });
            }
            let (hop, fresh) = self.next_or_alloc_hop(parent)?;
            path.hops[level] = hop;
            path.fresh[level] = fresh;
        }

        let current = self.entry(path.slot(props, leaf_level, va))?;

        if class.is_dram() && self.has_default_mapping() {
            if current != self.default_entry() {
                error!("DRAM: mapping already exists for virt_addr {va}");
                return Err(MmuError::AlreadyMapped { va });
            }
            if path.any_fresh() {
                error!("DRAM mapping should not allocate more hops");
                return Err(MmuError::InconsistentState(
                    "DRAM mapping should not allocate more hops",
                ));
            }
        } else if current.present() {
            error!("mapping already exists for virt_addr {va}");
            for level in 0..=leaf_level {
                let slot = path.slot(props, level, va);
                debug!(
                    "hop{level} pte: {:#x} (slot {})",
                    self.entry(slot).map_or(0, HopEntry::raw),
                    slot.shadow_addr()
                );
            }
            return Err(MmuError::AlreadyMapped { va });
        }
        Ok(())
    }

    /// Unmaps the page at `va`. Whether it is huge is read from the tables.
    pub(crate) fn unmap_page(&mut self, va: VirtualAddress, is_dram: bool) -> Result<(), MmuError> {
        let class = if is_dram {
            PageClass::Dram
        } else {
            PageClass::Regular
        };
        let props = *self.config().properties(class);
        let mut path = PagePath::new(self.root_shadow());

        for level in 1..=3 {
            let parent = self.entry(path.slot(&props, level - 1, va))?;
            path.hops[level] = parent.next_hop().ok_or_else(|| not_mapped(va))?;
        }

        let hop3 = self.entry(path.slot(&props, 3, va))?;
        if !hop3.present() {
            return Err(not_mapped(va));
        }
        let is_huge = hop3.last();
        if is_dram && !is_huge {
            error!("DRAM unmapping should use huge pages only");
            return Err(MmuError::InconsistentState(
                "DRAM unmapping should use huge pages only",
            ));
        }

        let leaf_level = if is_huge {
            3
        } else {
            path.hops[4] = hop3.next_hop().ok_or_else(|| not_mapped(va))?;
            4
        };
        let leaf_slot = path.slot(&props, leaf_level, va);
        let leaf = self.entry(leaf_slot)?;

        if is_dram && self.has_default_mapping() {
            if leaf == self.default_entry() {
                error!("DRAM: hop3 PTE points to the default page, can't unmap {va}");
                return Err(MmuError::NotMapped { va });
            }
            if !leaf.present() {
                error!("DRAM: hop3 PTE is cleared, can't unmap {va}");
                return Err(MmuError::NotMapped { va });
            }
            let default = self.default_entry();
            self.write_final_pte(leaf_slot, default)?;
            self.put_pte(path.hops[3])?;
            return Ok(());
        }

        if !leaf.present() {
            return Err(not_mapped(va));
        }

        self.clear_pte(leaf_slot)?;
        for level in (1..=leaf_level).rev() {
            let parent = path.slot(&props, level - 1, va);
            if self.put_pte_unlink(path.hops[level], parent)? != 0 {
                break;
            }
        }
        Ok(())
    }
}
