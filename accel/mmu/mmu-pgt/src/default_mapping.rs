//! DRAM default mapping of user contexts.
//!
//! Every DRAM page of a user context is backed by the shared default page
//! until it is mapped, so the hops of the DRAM region live as long as the
//! context does.

use crate::PteIo;
use crate::context::MmuContext;
use crate::entry::HopEntry;
use crate::error::MmuError;
use crate::walk::PteSlot;
use alloc::vec::Vec;
use log::{debug, error, warn};
use mmu_addresses::ShadowAddress;
use mmu_info::layout::KERNEL_ASID;
use mmu_info::pte::PTE_ENTRIES_IN_HOP;

/// Hops built for the default mapping.
#[derive(Debug)]
pub(crate) struct DefaultMapping {
    hop1: ShadowAddress,
    hop2: ShadowAddress,
    hop3s: Vec<ShadowAddress>,
}

impl<D: PteIo> MmuContext<'_, D> {
    /// Points the whole DRAM default region at the default page.
    ///
    /// Does nothing for the kernel context or when the configuration does
    /// not ask for it. On any failure every hop allocated here is freed
    /// again and the root entry is left empty.
    pub(crate) fn init_default_mapping(&mut self) -> Result<(), MmuError> {
        let cfg = self.config();
        if !cfg.default_mapping_enabled() || self.asid == KERNEL_ASID || self.has_default_mapping() {
            return Ok(());
        }

        let count = cfg.default_hop3_count();
        let mut allocated = Vec::new();
        if allocated.try_reserve_exact(count + 2).is_err() {
            error!("ctx {}: no memory for the DRAM default mapping", self.asid);
            return Err(MmuError::ShadowOutOfMemory);
        }

        for _ in 0..count + 2 {
            match self.alloc_hop() {
                Ok(hop) => allocated.push(hop),
                Err(e) => {
                    error!("ctx {}: failed to allocate DRAM default mapping hops: {e}", self.asid);
                    allocated.reverse();
                    self.discard_hops(&allocated);
                    return Err(e);
                }
            }
        }

        let hop3s = allocated.split_off(2);
        let mapping = DefaultMapping {
            hop1: allocated[0],
            hop2: allocated[1],
            hop3s,
        };
        if let Err(e) = self.wire_default_mapping(&mapping) {
            error!("ctx {}: failed to wire the DRAM default mapping: {e}", self.asid);
            self.discard_default_mapping(mapping);
            return Err(e);
        }
        self.flush();

        debug!(
            "ctx {}: DRAM default mapping over {} hop3 tables",
            self.asid,
            mapping.hop3s.len()
        );
        self.default_mapping = Some(mapping);
        Ok(())
    }

    fn wire_default_mapping(&mut self, mapping: &DefaultMapping) -> Result<(), MmuError> {
        let (root_slot, hop1_slot, first) = self.default_mapping_slots(mapping);

        self.write_pte(root_slot, HopEntry::table(mapping.hop1))?;
        self.write_pte(hop1_slot, HopEntry::table(mapping.hop2))?;
        self.get_pte(mapping.hop1)?;

        for (i, &hop3) in mapping.hop3s.iter().enumerate() {
            self.write_pte(PteSlot::new(mapping.hop2, first + i), HopEntry::table(hop3))?;
            self.get_pte(mapping.hop2)?;
        }

        let leaf = self.default_entry();
        for &hop3 in &mapping.hop3s {
            for index in 0..PTE_ENTRIES_IN_HOP {
                self.write_final_pte(PteSlot::new(hop3, index), leaf)?;
                self.get_pte(hop3)?;
            }
        }
        Ok(())
    }

    /// Unlinks a mapping that may be only partly wired, clears whatever
    /// entries it holds and frees its hops without looking at their counts.
    fn discard_default_mapping(&mut self, mapping: DefaultMapping) {
        let (root_slot, _, _) = self.default_mapping_slots(&mapping);
        if let Err(e) = self.clear_pte(root_slot) {
            warn!("ctx {}: failed to clear the default mapping root entry: {e}", self.asid);
        }

        let mut hops = mapping.hop3s;
        hops.reverse();
        hops.extend([mapping.hop2, mapping.hop1]);
        for &hop in &hops {
            let Ok(table) = self.table(hop) else {
                continue;
            };
            let present: Vec<usize> = table
                .iter()
                .enumerate()
                .filter(|(_, e)| e.present())
                .map(|(i, _)| i)
                .collect();
            for index in present {
                if let Err(e) = self.clear_pte(PteSlot::new(hop, index)) {
                    warn!("ctx {}: failed to clear hop {hop} entry {index}: {e}", self.asid);
                }
            }
        }

        self.flush();
        self.discard_hops(&hops);
    }

    /// Tears the default mapping down leaf to root and flushes.
    pub(crate) fn fini_default_mapping(&mut self) -> Result<(), MmuError> {
        let Some(mapping) = self.default_mapping.take() else {
            return Ok(());
        };
        let (root_slot, hop1_slot, first) = self.default_mapping_slots(&mapping);

        for (i, &hop3) in mapping.hop3s.iter().enumerate() {
            let parent = PteSlot::new(mapping.hop2, first + i);
            for index in 0..PTE_ENTRIES_IN_HOP {
                self.clear_pte(PteSlot::new(hop3, index))?;
                self.put_pte_unlink(hop3, parent)?;
            }
        }

        for i in 0..mapping.hop3s.len() {
            self.clear_pte(PteSlot::new(mapping.hop2, first + i))?;
            self.put_pte_unlink(mapping.hop2, hop1_slot)?;
        }

        self.clear_pte(hop1_slot)?;
        self.put_pte_unlink(mapping.hop1, root_slot)?;
        self.clear_pte(root_slot)?;

        self.flush();
        Ok(())
    }

    /// Root entry, hop1 entry and the first hop2 index of the region.
    fn default_mapping_slots(&self, mapping: &DefaultMapping) -> (PteSlot, PteSlot, usize) {
        let dmmu = self.config().dmmu();
        let start = dmmu.start_addr();
        (
            PteSlot::new(self.root_shadow(), dmmu.hop_index(0, start)),
            PteSlot::new(mapping.hop1, dmmu.hop_index(1, start)),
            dmmu.hop_index(2, start),
        )
    }
}
