//! # Physical Hop Pool
//!
//! Hands out hop-sized blocks of the device page-table region. One bit per
//! block; the bitmap sits behind a [`SpinLock`] so the pool can be shared by
//! every context of a device.

use crate::error::PoolError;
use alloc::vec;
use alloc::vec::Vec;
use mmu_addresses::PhysicalAddress;
use mmu_sync::SpinLock;

const WORD_BITS: usize = u64::BITS as usize;

pub struct HopPool {
    base: PhysicalAddress,
    block_size: u64,
    blocks: usize,
    state: SpinLock<PoolState>,
}

struct PoolState {
    /// Set bits are allocated blocks; bits past `blocks` are permanently set.
    used: Vec<u64>,
    free: usize,
    /// Lowest word that may contain a free bit.
    hint: usize,
}

impl HopPool {
    /// Pool over `[base, base + size)` in `block_size` blocks.
    ///
    /// # Errors
    /// [`PoolError::InvalidRegion`] if the region is empty, not a whole number
    /// of blocks, or not aligned to the (power of two) block size.
    pub fn new(base: PhysicalAddress, size: u64, block_size: u64) -> Result<Self, PoolError> {
        if !block_size.is_power_of_two()
            || size == 0
            || !size.is_multiple_of(block_size)
            || !base.is_aligned(block_size)
            || base.checked_add(size).is_none()
        {
            return Err(PoolError::InvalidRegion);
        }

        let blocks = usize::try_from(size / block_size).map_err(|_| PoolError::InvalidRegion)?;
        let words = blocks.div_ceil(WORD_BITS);
        let mut used = vec![0u64; words];
        let tail = blocks % WORD_BITS;
        if tail != 0
            && let Some(last) = used.last_mut()
        {
            *last = !0 << tail;
        }

        Ok(Self {
            base,
            block_size,
            blocks,
            state: SpinLock::new(PoolState {
                used,
                free: blocks,
                hint: 0,
            }),
        })
    }

    /// Takes one block.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when every block is in use.
    pub fn allocate(&self) -> Result<PhysicalAddress, PoolError> {
        let block = self.state.with_lock(|s| {
            if s.free == 0 {
                return None;
            }
            let (word, bits) = s
                .used
                .iter_mut()
                .enumerate()
                .skip(s.hint)
                .find(|(_, w)| **w != u64::MAX)?;
            let bit = bits.trailing_ones() as usize;
            *bits |= 1 << bit;
            s.free -= 1;
            s.hint = word;
            Some(word * WORD_BITS + bit)
        });

        block
            .map(|b| self.base + b as u64 * self.block_size)
            .ok_or(PoolError::Exhausted)
    }

    /// Returns a block taken by [`allocate`](Self::allocate).
    ///
    /// # Errors
    /// [`PoolError::InvalidRelease`] if `pa` is outside the pool, not a block
    /// start, or not currently allocated. The pool is left unchanged.
    pub fn release(&self, pa: PhysicalAddress) -> Result<(), PoolError> {
        let block = self.block_of(pa).ok_or(PoolError::InvalidRelease(pa))?;
        let (word, mask) = (block / WORD_BITS, 1u64 << (block % WORD_BITS));

        self.state.with_lock(|s| {
            let bits = &mut s.used[word];
            if *bits & mask == 0 {
                return Err(PoolError::InvalidRelease(pa));
            }
            *bits &= !mask;
            s.free += 1;
            s.hint = s.hint.min(word);
            Ok(())
        })
    }

    fn block_of(&self, pa: PhysicalAddress) -> Option<usize> {
        let offset = pa.as_u64().checked_sub(self.base.as_u64())?;
        if !offset.is_multiple_of(self.block_size) {
            return None;
        }
        let block = usize::try_from(offset / self.block_size).ok()?;
        (block < self.blocks).then_some(block)
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        self.block_of(pa).is_some()
    }

    /// Free blocks.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.with_lock(|s| s.free)
    }

    /// Total blocks.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.blocks
    }

    #[must_use]
    pub const fn block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }
}

impl core::fmt::Debug for HopPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HopPool")
            .field("base", &self.base)
            .field("block_size", &self.block_size)
            .field("capacity", &self.blocks)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x2040_0000;

    fn pool(blocks: u64) -> HopPool {
        HopPool::new(PhysicalAddress::new(BASE), blocks * 0x1000, 0x1000).unwrap()
    }

    #[test]
    fn allocates_every_block_once() {
        let p = pool(70);
        let mut seen: Vec<u64> = (0..70).map(|_| p.allocate().unwrap().as_u64()).collect();
        assert_eq!(p.allocate(), Err(PoolError::Exhausted));
        assert_eq!(p.available(), 0);

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 70);
        assert_eq!(seen[0], BASE);
        assert_eq!(seen[69], BASE + 69 * 0x1000);
    }

    #[test]
    fn released_block_is_reused() {
        let p = pool(3);
        let a = p.allocate().unwrap();
        let b = p.allocate().unwrap();
        p.release(a).unwrap();
        assert_eq!(p.available(), 2);
        assert_eq!(p.allocate().unwrap(), a);
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_releases_leave_pool_unchanged() {
        let p = pool(4);
        let a = p.allocate().unwrap();

        let outside = PhysicalAddress::new(BASE - 0x1000);
        let past_end = PhysicalAddress::new(BASE + 4 * 0x1000);
        let misaligned = a + 8;
        let never_allocated = PhysicalAddress::new(BASE + 0x3000);

        for pa in [outside, past_end, misaligned, never_allocated] {
            assert_eq!(p.release(pa), Err(PoolError::InvalidRelease(pa)));
        }
        assert_eq!(p.available(), 3);

        p.release(a).unwrap();
        assert_eq!(p.release(a), Err(PoolError::InvalidRelease(a)));
        assert_eq!(p.available(), 4);
    }

    #[test]
    fn rejects_bad_regions() {
        let base = PhysicalAddress::new(BASE);
        assert!(HopPool::new(base, 0, 0x1000).is_err());
        assert!(HopPool::new(base, 0x1800, 0x1000).is_err());
        assert!(HopPool::new(base + 0x800, 0x2000, 0x1000).is_err());
        assert!(HopPool::new(base, 0x3000, 0x3000).is_err());
    }

    #[test]
    fn shared_between_threads() {
        let p = pool(256);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..64 {
                        p.allocate().unwrap();
                    }
                });
            }
        });
        assert_eq!(p.available(), 0);
        assert_eq!(p.capacity(), 256);
    }
}
