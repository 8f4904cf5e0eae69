//! # Address Translation
//!
//! Locating entries, translating shadow links to device links, and writing
//! both copies of an entry.
//!
//! ## Writes
//!
//! | Primitive | Shadow copy | Device copy |
//! |-----------|-------------|-------------|
//! | [`write_pte`](MmuContext::write_pte) | value as given | address replaced by the next hop's physical address |
//! | [`write_final_pte`](MmuContext::write_final_pte) | value as given | value as given |
//! | [`clear_pte`](MmuContext::clear_pte) | zero | zero |

use crate::PteIo;
use crate::config::PageClass;
use crate::context::MmuContext;
use crate::entry::HopEntry;
use crate::error::MmuError;
use core::sync::atomic::{Ordering, fence};
use log::trace;
use mmu_addresses::{PhysicalAddress, ShadowAddress, VirtualAddress};
use mmu_info::pte::{MMU_HOPS, PTE_SIZE};

/// One entry of one hop.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PteSlot {
    pub hop: ShadowAddress,
    pub index: usize,
}

impl PteSlot {
    #[inline]
    #[must_use]
    pub const fn new(hop: ShadowAddress, index: usize) -> Self {
        Self { hop, index }
    }

    /// Byte offset of the entry within its hop.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.index as u64 * PTE_SIZE
    }

    /// Host address of the shadow entry.
    #[inline]
    #[must_use]
    pub const fn shadow_addr(self) -> ShadowAddress {
        ShadowAddress::new(self.hop.as_u64() + self.offset())
    }
}

/// One level visited by [`MmuContext::walk`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HopStep {
    pub level: usize,
    pub slot: PteSlot,
    /// Device address of the hop holding `slot`.
    pub hop_phys_addr: PhysicalAddress,
    /// Shadow value of the entry.
    pub entry: HopEntry,
}

/// The hops present along the path of one virtual address, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HopChain {
    steps: [Option<HopStep>; MMU_HOPS],
    len: usize,
}

impl HopChain {
    fn push(&mut self, step: HopStep) {
        if let Some(s) = self.steps.get_mut(self.len) {
            *s = Some(step);
            self.len += 1;
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, level: usize) -> Option<&HopStep> {
        self.steps.get(level)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HopStep> {
        self.steps.iter().map_while(Option::as_ref)
    }

    /// Shadow addresses of the visited hops.
    pub fn hops(&self) -> impl Iterator<Item = ShadowAddress> + '_ {
        self.iter().map(|s| s.slot.hop)
    }

    /// The final step, if it is a present leaf.
    #[must_use]
    pub fn leaf(&self) -> Option<&HopStep> {
        self.iter()
            .last()
            .filter(|s| s.entry.present() && s.entry.last())
    }
}

impl<D: PteIo> MmuContext<'_, D> {
    /// Shadow value of the entry at `slot`.
    ///
    /// # Errors
    /// [`MmuError::UnknownHop`] if `slot.hop` is not a hop of this context.
    pub fn entry(&self, slot: PteSlot) -> Result<HopEntry, MmuError> {
        self.table(slot.hop)?
            .get(slot.index)
            .ok_or(MmuError::InconsistentState("entry index out of range"))
    }

    /// Next hop behind `entry`, allocating a fresh one if it is absent.
    ///
    /// Returns the hop and whether it was allocated. A fresh hop is not linked;
    /// the caller writes the parent entry.
    pub(crate) fn next_or_alloc_hop(
        &mut self,
        entry: HopEntry,
    ) -> Result<(ShadowAddress, bool), MmuError> {
        match entry.next_hop() {
            Some(hop) => Ok((hop, false)),
            None => Ok((self.alloc_hop()?, true)),
        }
    }

    /// Device address of a hop: computed for the root, recorded otherwise.
    ///
    /// # Errors
    /// [`MmuError::UnknownHop`] if `hop` is not a hop of this context.
    pub fn hop_phys_addr(&self, hop: ShadowAddress) -> Result<PhysicalAddress, MmuError> {
        if hop == self.root_shadow() {
            return Ok(self.root_phys_addr());
        }
        self.index
            .lookup(hop)
            .map(crate::HopInfo::phys_addr)
            .ok_or(MmuError::UnknownHop(hop))
    }

    /// Device address of the entry at `slot`.
    ///
    /// # Errors
    /// [`MmuError::UnknownHop`] if `slot.hop` is not a hop of this context.
    pub fn slot_phys_addr(&self, slot: PteSlot) -> Result<PhysicalAddress, MmuError> {
        Ok(self.hop_phys_addr(slot.hop)? + slot.offset())
    }

    /// Writes a non-leaf entry. `value` links the next hop by shadow
    /// address; the device receives its physical address with the same flags.
    pub(crate) fn write_pte(&mut self, slot: PteSlot, value: HopEntry) -> Result<(), MmuError> {
        let next = self.hop_phys_addr(ShadowAddress::new(value.address()))?;
        self.store(slot, value, value.to_device(next))
    }

    /// Writes a leaf entry; both copies get `value` verbatim.
    pub(crate) fn write_final_pte(&mut self, slot: PteSlot, value: HopEntry) -> Result<(), MmuError> {
        self.store(slot, value, value.raw())
    }

    pub(crate) fn clear_pte(&mut self, slot: PteSlot) -> Result<(), MmuError> {
        self.write_final_pte(slot, HopEntry::zero())
    }

    fn store(&mut self, slot: PteSlot, shadow: HopEntry, device: u64) -> Result<(), MmuError> {
        let mmu = self.mmu;
        let pa = self.slot_phys_addr(slot)?;
        let entry = self
            .table_mut(slot.hop)?
            .get_mut(slot.index)
            .ok_or(MmuError::InconsistentState("entry index out of range"))?;
        mmu.io().write_pte(pa, device);
        *entry = shadow;
        Ok(())
    }

    /// Makes prior device writes visible: a full fence, then one device read
    /// of the root hop.
    pub fn flush(&self) {
        fence(Ordering::SeqCst);
        let root = self.root_phys_addr();
        let _ = self.mmu.io().read_pte(root);
        trace!("ctx {}: flushed page tables (root {root})", self.asid);
    }

    /// Hops present along the path of `va` under the geometry of `class`.
    ///
    /// Stops early at an absent entry or at a leaf above the class's leaf
    /// level (a huge mapping seen through the regular geometry).
    #[must_use]
    pub fn walk(&self, va: VirtualAddress, class: PageClass) -> HopChain {
        let props = self.config().properties(class);
        let mut chain = HopChain::default();
        let mut hop = self.root_shadow();

        for level in 0..=class.leaf_level() {
            let slot = PteSlot::new(hop, props.hop_index(level, va));
            let (Ok(entry), Ok(hop_phys_addr)) = (self.entry(slot), self.hop_phys_addr(hop)) else {
                break;
            };
            chain.push(HopStep {
                level,
                slot,
                hop_phys_addr,
                entry,
            });

            if entry.last() {
                break;
            }
            match entry.next_hop() {
                Some(next) => hop = next,
                None => break,
            }
        }
        chain
    }

    /// Host-side translation of `va` through the shadow tables.
    ///
    /// Honours huge leaves: the in-page offset is taken relative to the
    /// level the leaf was found at.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let class = if self.config().is_dram_va(va) {
            PageClass::Dram
        } else {
            PageClass::Regular
        };
        let chain = self.walk(va, class);
        let leaf = chain.leaf()?;
        let span = self.config().properties(class).entry_span(leaf.level);
        Some(PhysicalAddress::new(leaf.entry.address()) + va.offset_in(span))
    }
}
