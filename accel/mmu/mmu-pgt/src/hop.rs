//! Hop allocation and reference counting.
//!
//! A hop's count is the number of present entries in it. [`get_pte`] is
//! called for every entry that becomes present, [`put_pte`] for every entry
//! removed; the hop is freed the moment its count reaches zero.
//!
//! [`get_pte`]: MmuContext::get_pte
//! [`put_pte`]: MmuContext::put_pte

use crate::context::MmuContext;
use crate::error::MmuError;
use crate::shadow::{HopInfo, ShadowHop};
use crate::walk::PteSlot;
use crate::PteIo;
use log::{debug, error, warn};
use mmu_addresses::ShadowAddress;

impl<D: PteIo> MmuContext<'_, D> {
    /// Allocates a zeroed hop: one pool block plus its shadow table.
    ///
    /// The hop starts with a count of zero and is not linked anywhere.
    pub(crate) fn alloc_hop(&mut self) -> Result<ShadowAddress, MmuError> {
        let mmu = self.mmu;
        let pool = mmu.pool();
        let phys = pool.allocate().map_err(|_| {
            error!("ctx {}: failed to allocate a hop from the pool", self.asid);
            MmuError::Exhausted
        })?;

        let Some(table) = ShadowHop::new_zeroed().filter(|_| self.index.reserve_one()) else {
            if let Err(e) = pool.release(phys) {
                warn!("ctx {}: failed to return hop {phys}: {e}", self.asid);
            }
            error!("ctx {}: failed to allocate a shadow hop", self.asid);
            return Err(MmuError::ShadowOutOfMemory);
        };

        let info = HopInfo::new(phys, self.asid, table);
        let shadow = info.shadow_addr();
        self.index.insert(info);

        debug!("ctx {}: allocated hop {phys} (shadow {shadow})", self.asid);
        Ok(shadow)
    }

    /// Releases a hop's pool block and shadow table.
    ///
    /// The caller guarantees the count is zero and no entry links to it.
    pub(crate) fn free_hop(&mut self, hop: ShadowAddress) -> Result<(), MmuError> {
        let info = self.index.remove(hop).ok_or(MmuError::UnknownHop(hop))?;
        debug!("ctx {}: freeing hop {} (shadow {hop})", self.asid, info.phys_addr());
        self.mmu.pool().release(info.phys_addr())?;
        Ok(())
    }

    /// One more present entry in `hop`. Returns the new count.
    pub(crate) fn get_pte(&mut self, hop: ShadowAddress) -> Result<u32, MmuError> {
        self.index
            .lookup_mut(hop)
            .map(HopInfo::inc)
            .ok_or(MmuError::UnknownHop(hop))
    }

    /// One present entry fewer in `hop`; frees the hop when none remain.
    ///
    /// Returns the remaining count (zero means the hop is gone).
    pub(crate) fn put_pte(&mut self, hop: ShadowAddress) -> Result<u32, MmuError> {
        let remaining = self.dec_pte(hop)?;
        if remaining == 0 {
            self.free_hop(hop)?;
        }
        Ok(remaining)
    }

    /// [`put_pte`](Self::put_pte) that clears `parent`, the entry linking to
    /// `hop`, before the hop is freed.
    pub(crate) fn put_pte_unlink(
        &mut self,
        hop: ShadowAddress,
        parent: PteSlot,
    ) -> Result<u32, MmuError> {
        let remaining = self.dec_pte(hop)?;
        if remaining == 0 {
            self.clear_pte(parent)?;
            self.free_hop(hop)?;
        }
        Ok(remaining)
    }

    fn dec_pte(&mut self, hop: ShadowAddress) -> Result<u32, MmuError> {
        self.index
            .lookup_mut(hop)
            .map(HopInfo::dec)
            .ok_or(MmuError::UnknownHop(hop))
    }

    /// Frees hops that were never linked, in the given order.
    pub(crate) fn discard_hops(&mut self, hops: &[ShadowAddress]) {
        for &hop in hops {
            if let Err(e) = self.free_hop(hop) {
                warn!("ctx {}: failed to free hop {hop}: {e}", self.asid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{FakeDevice, small_config};
    use crate::{Mmu, MmuError};

    #[test]
    fn alloc_and_free_roundtrip() {
        let mmu = Mmu::init(small_config(8), FakeDevice::default()).unwrap();
        let ctx = mmu.ctx_init(1).unwrap();
        let mut c = ctx.lock();

        let hop = c.alloc_hop().unwrap();
        let info = c.hop_info(hop).unwrap();
        assert_eq!(info.num_of_ptes(), 0);
        assert_eq!(info.asid(), 1);
        assert!(mmu.pool().contains(info.phys_addr()));
        assert_eq!(mmu.pool().available(), 7);

        c.free_hop(hop).unwrap();
        assert!(c.hop_info(hop).is_none());
        assert_eq!(mmu.pool().available(), 8);
        assert_eq!(c.free_hop(hop), Err(MmuError::UnknownHop(hop)));
    }

    #[test]
    fn put_pte_frees_at_zero() {
        let mmu = Mmu::init(small_config(8), FakeDevice::default()).unwrap();
        let ctx = mmu.ctx_init(1).unwrap();
        let mut c = ctx.lock();

        let hop = c.alloc_hop().unwrap();
        assert_eq!(c.get_pte(hop), Ok(1));
        assert_eq!(c.get_pte(hop), Ok(2));
        assert_eq!(c.put_pte(hop), Ok(1));
        assert!(c.hop_info(hop).is_some());
        assert_eq!(c.put_pte(hop), Ok(0));
        assert!(c.hop_info(hop).is_none());
        assert_eq!(c.put_pte(hop), Err(MmuError::UnknownHop(hop)));
        assert_eq!(mmu.pool().available(), 8);
    }

    #[test]
    fn root_is_not_reference_counted() {
        let mmu = Mmu::init(small_config(8), FakeDevice::default()).unwrap();
        let ctx = mmu.ctx_init(1).unwrap();
        let mut c = ctx.lock();
        let root = c.root_shadow();
        assert_eq!(c.get_pte(root), Err(MmuError::UnknownHop(root)));
    }

    #[test]
    fn exhaustion_is_reported() {
        let mmu = Mmu::init(small_config(2), FakeDevice::default()).unwrap();
        let ctx = mmu.ctx_init(1).unwrap();
        let mut c = ctx.lock();

        let a = c.alloc_hop().unwrap();
        let b = c.alloc_hop().unwrap();
        assert_eq!(c.alloc_hop(), Err(MmuError::Exhausted));
        assert_eq!(c.hop_count(), 2);
        c.discard_hops(&[b, a]);
        assert_eq!(c.hop_count(), 0);
    }
}
