//! Root hop region: one zeroed shadow table per ASID, claimed by a context for
//! its lifetime and handed back zeroed.

use crate::error::MmuError;
use crate::shadow::ShadowHop;
use alloc::boxed::Box;
use alloc::vec::Vec;
use mmu_sync::SpinLock;

pub struct Hop0Region {
    slots: SpinLock<Vec<Option<Box<ShadowHop>>>>,
}

impl Hop0Region {
    /// Allocates `max_asid` zeroed root tables.
    pub fn new(max_asid: u32) -> Result<Self, MmuError> {
        let count = max_asid as usize;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|_| MmuError::ShadowOutOfMemory)?;
        for _ in 0..count {
            slots.push(Some(ShadowHop::new_zeroed().ok_or(MmuError::ShadowOutOfMemory)?));
        }
        Ok(Self {
            slots: SpinLock::new(slots),
        })
    }

    pub fn claim(&self, asid: u32) -> Result<Box<ShadowHop>, MmuError> {
        self.slots.with_lock(|slots| {
            slots
                .get_mut(asid as usize)
                .ok_or(MmuError::AsidOutOfRange(asid))?
                .take()
                .ok_or(MmuError::AsidInUse(asid))
        })
    }

    pub fn release(&self, asid: u32, mut table: Box<ShadowHop>) {
        table.clear();
        self.slots.with_lock(|slots| {
            if let Some(slot) = slots.get_mut(asid as usize) {
                *slot = Some(table);
            }
        });
    }

    /// ASIDs without a live context.
    pub fn free_slots(&self) -> usize {
        self.slots.with_lock(|slots| slots.iter().filter(|s| s.is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::HopEntry;

    #[test]
    fn claim_and_release() {
        let region = Hop0Region::new(2).unwrap();
        let mut root = region.claim(1).unwrap();
        assert_eq!(region.claim(1).err(), Some(MmuError::AsidInUse(1)));
        assert_eq!(region.claim(2).err(), Some(MmuError::AsidOutOfRange(2)));
        assert_eq!(region.free_slots(), 1);

        *root.get_mut(0).unwrap() = HopEntry::from_raw(0x1001);
        region.release(1, root);
        assert_eq!(region.free_slots(), 2);

        let root = region.claim(1).unwrap();
        assert_eq!(root.present_count(), 0);
    }
}
