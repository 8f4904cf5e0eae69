//! # Address-Space Contexts
//!
//! A [`Context`] is one device address space: its root hop, the index of
//! every hop it allocated and, for user contexts, the DRAM default mapping.
//! All operations go through the context's FIFO lock; [`MmuContext`] is the
//! locked view whose methods never lock again.

use crate::config::MmuConfig;
use crate::default_mapping::DefaultMapping;
use crate::error::MmuError;
use crate::mmu::Mmu;
use crate::shadow::{HopInfo, ShadowHop, ShadowIndex};
use crate::walk::PteSlot;
use crate::PteIo;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use log::error;
use mmu_addresses::{PhysicalAddress, ShadowAddress, VirtualAddress};
use mmu_sync::{MutexGuard, RawTicket, TicketMutex};

/// One address space, serialised by a FIFO lock.
///
/// Dropping the context tears down its default mapping, reports and frees
/// any hop still in use, clears the device root and hands its ASID back.
pub struct Context<'m, D: PteIo> {
    asid: u32,
    inner: TicketMutex<MmuContext<'m, D>>,
}

impl<'m, D: PteIo> Context<'m, D> {
    pub(crate) const fn new(ctx: MmuContext<'m, D>) -> Self {
        Self {
            asid: ctx.asid,
            inner: TicketMutex::new(ctx),
        }
    }

    #[inline]
    pub const fn asid(&self) -> u32 {
        self.asid
    }

    /// Acquires the context lock for a sequence of operations.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, MmuContext<'m, D>, RawTicket> {
        self.inner.lock()
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, MmuContext<'m, D>, RawTicket>> {
        self.inner.try_lock()
    }

    /// Runs `f` with the context lock held.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut MmuContext<'m, D>) -> R) -> R {
        self.inner.with_lock(f)
    }

    /// Maps `size` bytes under the context lock.
    ///
    /// # Errors
    /// See [`MmuContext::map`].
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        flush: bool,
    ) -> Result<(), MmuError> {
        self.with_lock(|ctx| ctx.map(va, pa, size, flush))
    }

    /// Unmaps `size` bytes under the context lock.
    ///
    /// # Errors
    /// See [`MmuContext::unmap`].
    pub fn unmap(&self, va: VirtualAddress, size: u64, flush: bool) -> Result<(), MmuError> {
        self.with_lock(|ctx| ctx.unmap(va, size, flush))
    }

    /// Reserved for evicting the context's page tables. Does nothing.
    pub const fn swap_out(&self) {}

    /// Reserved for restoring evicted page tables. Does nothing.
    pub const fn swap_in(&self) {}
}

impl<D: PteIo> core::fmt::Debug for Context<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context").field("asid", &self.asid).finish_non_exhaustive()
    }
}

/// Locked view of a [`Context`].
pub struct MmuContext<'m, D: PteIo> {
    pub(crate) mmu: &'m Mmu<D>,
    pub(crate) asid: u32,
    root: ManuallyDrop<Box<ShadowHop>>,
    pub(crate) index: ShadowIndex,
    pub(crate) default_mapping: Option<DefaultMapping>,
}

impl<'m, D: PteIo> MmuContext<'m, D> {
    pub(crate) fn new(mmu: &'m Mmu<D>, asid: u32, root: Box<ShadowHop>) -> Self {
        Self {
            mmu,
            asid,
            root: ManuallyDrop::new(root),
            index: ShadowIndex::new(),
            default_mapping: None,
        }
    }

    #[inline]
    pub const fn asid(&self) -> u32 {
        self.asid
    }

    #[inline]
    pub const fn config(&self) -> &'m MmuConfig {
        self.mmu.config()
    }

    /// Shadow address of the root hop.
    #[inline]
    pub fn root_shadow(&self) -> ShadowAddress {
        self.root.shadow_addr()
    }

    /// Device address of the root hop.
    #[inline]
    pub const fn root_phys_addr(&self) -> PhysicalAddress {
        self.mmu.config().hop0_phys_addr(self.asid)
    }

    /// Whether the DRAM default mapping is installed.
    #[inline]
    pub const fn has_default_mapping(&self) -> bool {
        self.default_mapping.is_some()
    }

    /// Record of a non-root hop.
    #[inline]
    pub fn hop_info(&self, hop: ShadowAddress) -> Option<&HopInfo> {
        self.index.lookup(hop)
    }

    /// Every non-root hop currently owned by this context.
    pub fn hops(&self) -> impl Iterator<Item = &HopInfo> {
        self.index.iter()
    }

    #[inline]
    pub fn hop_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn table(&self, hop: ShadowAddress) -> Result<&ShadowHop, MmuError> {
        if hop == self.root_shadow() {
            return Ok(&**self.root);
        }
        self.index
            .lookup(hop)
            .map(HopInfo::table)
            .ok_or(MmuError::UnknownHop(hop))
    }

    pub(crate) fn table_mut(&mut self, hop: ShadowAddress) -> Result<&mut ShadowHop, MmuError> {
        if hop == self.root_shadow() {
            return Ok(&mut **self.root);
        }
        self.index
            .lookup_mut(hop)
            .map(HopInfo::table_mut)
            .ok_or(MmuError::UnknownHop(hop))
    }
}

impl<D: PteIo> Drop for MmuContext<'_, D> {
    fn drop(&mut self) {
        let asid = self.asid;
        if let Err(e) = self.fini_default_mapping() {
            error!("ctx {asid}: DRAM default mapping teardown failed: {e}");
        }

        if !self.index.is_empty() {
            error!("ctx {asid} is freed while it has pgts in use");
        }

        let mmu = self.mmu;
        let pool = mmu.pool();
        for info in self.index.drain() {
            error!(
                "pgt_info of addr {} of asid {asid} was not destroyed, num_ptes: {}",
                info.phys_addr(),
                info.num_of_ptes()
            );
            if let Err(e) = pool.release(info.phys_addr()) {
                error!("ctx {asid}: failed to release leaked hop: {e}");
            }
        }

        let root_shadow = self.root_shadow();
        let present: Vec<usize> = self
            .root
            .iter()
            .enumerate()
            .filter(|(_, e)| e.present())
            .map(|(i, _)| i)
            .collect();
        for &index in &present {
            if let Err(e) = self.clear_pte(PteSlot::new(root_shadow, index)) {
                error!("ctx {asid}: failed to clear root entry {index}: {e}");
            }
        }
        if !present.is_empty() {
            self.flush();
        }

        // SAFETY: `root` is taken exactly once, here, and never used afterwards.
        let root = unsafe { ManuallyDrop::take(&mut self.root) };
        mmu.hop0().release(asid, root);
    }
}

impl<D: PteIo> core::fmt::Debug for MmuContext<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmuContext")
            .field("asid", &self.asid)
            .field("root", &self.root_shadow())
            .field("hops", &self.index.len())
            .field("default_mapping", &self.default_mapping.is_some())
            .finish()
    }
}
