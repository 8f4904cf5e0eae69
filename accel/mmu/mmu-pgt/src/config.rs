//! # Device Geometry
//!
//! [`MmuProperties`] describes how one page-size class splits a virtual
//! address into hop indices; [`MmuConfig`] bundles the three classes with the
//! page-table region and the DRAM default page settings. Both are plain
//! `Copy` values, read-only once handed to [`Mmu::init`](crate::Mmu::init).
//!
//! ```rust
//! # use mmu_pgt::{MmuConfig, PageClass, VirtualAddress};
//! let cfg = MmuConfig::reference().with_max_asid(8).with_hop0_tables_total_size(8 * 4096);
//! assert!(cfg.validate().is_ok());
//! assert_eq!(cfg.classify(VirtualAddress::new(0x8_0000_0000), 0x20_0000), PageClass::Dram);
//! ```

use crate::error::ConfigError;
use mmu_addresses::{PhysicalAddress, VirtualAddress};
use mmu_info::layout::{
    DRAM_PAGE_SIZE, DRAM_SIZE_FOR_DEFAULT_PAGE_MAPPING, HOP0_TABLES_TOTAL_SIZE, MAX_ASID,
    MMU_DRAM_DEFAULT_PAGE_ADDR, MMU_PAGE_TABLES_ADDR, MMU_PAGE_TABLES_SIZE, VA_DDR_SPACE_END,
    VA_DDR_SPACE_START, VA_HOST_SPACE_END, VA_HOST_SPACE_START,
};
use mmu_info::pte::{HOP_MASKS, HOP_SHIFTS, HOP_TABLE_SIZE, MMU_HOPS, PAGE_SIZE_2MB, PAGE_SIZE_4KB, PTE_ENTRIES_IN_HOP};
use utils_accessors_derive::Accessors;

/// Page-size class of a mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PageClass {
    /// Regular host page; the leaf lives in hop 4.
    Regular,
    /// Huge host page; the leaf lives in hop 3.
    Huge,
    /// Device DRAM page; the leaf lives in hop 3.
    Dram,
}

impl PageClass {
    pub const ALL: [Self; 3] = [Self::Regular, Self::Huge, Self::Dram];

    /// Hop level holding the leaf entry.
    #[inline]
    #[must_use]
    pub const fn leaf_level(self) -> usize {
        match self {
            Self::Regular => 4,
            Self::Huge | Self::Dram => 3,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_huge(self) -> bool {
        !matches!(self, Self::Regular)
    }

    #[inline]
    #[must_use]
    pub const fn is_dram(self) -> bool {
        matches!(self, Self::Dram)
    }
}

/// Geometry of one page-size class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Accessors)]
pub struct MmuProperties {
    start_addr: VirtualAddress,
    end_addr: VirtualAddress,
    page_size: u64,
    hop_masks: [u64; MMU_HOPS],
    hop_shifts: [u32; MMU_HOPS],
}

impl MmuProperties {
    /// A class over `[start, end)` using the standard hop masks and shifts.
    #[must_use]
    pub const fn new(start_addr: VirtualAddress, end_addr: VirtualAddress, page_size: u64) -> Self {
        Self {
            start_addr,
            end_addr,
            page_size,
            hop_masks: HOP_MASKS,
            hop_shifts: HOP_SHIFTS,
        }
    }

    /// Index of `va` within a hop table of the given level.
    #[inline]
    #[must_use]
    pub const fn hop_index(&self, level: usize, va: VirtualAddress) -> usize {
        ((va.as_u64() & self.hop_masks[level]) >> self.hop_shifts[level]) as usize
    }

    /// Bytes of virtual address space covered by one entry at `level`.
    #[inline]
    #[must_use]
    pub const fn entry_span(&self, level: usize) -> u64 {
        1 << self.hop_shifts[level]
    }

    /// Whether `[va, va + size)` lies inside this class's range.
    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress, size: u64) -> bool {
        match va.checked_add(size) {
            Some(end) => {
                va.as_u64() >= self.start_addr.as_u64()
                    && end.as_u64() <= self.end_addr.as_u64()
                    && end.as_u64() > va.as_u64()
            }
            None => false,
        }
    }

    fn validate(&self, class: PageClass) -> Result<(), ConfigError> {
        let fail = |reason| Err(ConfigError::Geometry { class, reason });

        if !self.page_size.is_power_of_two() {
            return fail("page size is not a power of two");
        }
        if self.start_addr >= self.end_addr {
            return fail("empty address range");
        }

        let mut seen = 0u64;
        for (mask, shift) in self.hop_masks.iter().zip(self.hop_shifts) {
            if *mask == 0 || mask.trailing_zeros() != shift {
                return fail("hop mask does not start at its shift");
            }
            if (mask >> shift) >= PTE_ENTRIES_IN_HOP as u64 {
                return fail("hop mask selects more entries than a hop holds");
            }
            if seen & mask != 0 {
                return fail("hop masks overlap");
            }
            seen |= mask;
        }

        if self.page_size != self.entry_span(class.leaf_level()) {
            return fail("page size does not match the leaf hop");
        }
        Ok(())
    }
}

/// Device-wide page-table configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Accessors)]
pub struct MmuConfig {
    /// Regular host pages.
    pmmu: MmuProperties,
    /// Huge host pages.
    pmmu_huge: MmuProperties,
    /// Device DRAM.
    dmmu: MmuProperties,
    /// Base of the page-table region (root hops, then the hop pool).
    pgt_addr: PhysicalAddress,
    pgt_size: u64,
    hop_table_size: u64,
    /// Bytes reserved for root hops, one table per ASID.
    hop0_tables_total_size: u64,
    max_asid: u32,
    dram_supports_virtual_memory: bool,
    dram_default_page_mapping: bool,
    dram_default_page_addr: PhysicalAddress,
    dram_size_for_default_page_mapping: u64,
    dram_page_size: u64,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self::reference()
    }
}

impl MmuConfig {
    /// The reference device layout from [`mmu_info::layout`].
    #[must_use]
    pub const fn reference() -> Self {
        Self {
            pmmu: MmuProperties::new(VA_HOST_SPACE_START, VA_HOST_SPACE_END, PAGE_SIZE_4KB),
            pmmu_huge: MmuProperties::new(VA_HOST_SPACE_START, VA_HOST_SPACE_END, PAGE_SIZE_2MB),
            dmmu: MmuProperties::new(VA_DDR_SPACE_START, VA_DDR_SPACE_END, DRAM_PAGE_SIZE),
            pgt_addr: MMU_PAGE_TABLES_ADDR,
            pgt_size: MMU_PAGE_TABLES_SIZE,
            hop_table_size: HOP_TABLE_SIZE,
            hop0_tables_total_size: HOP0_TABLES_TOTAL_SIZE,
            max_asid: MAX_ASID,
            dram_supports_virtual_memory: true,
            dram_default_page_mapping: true,
            dram_default_page_addr: MMU_DRAM_DEFAULT_PAGE_ADDR,
            dram_size_for_default_page_mapping: DRAM_SIZE_FOR_DEFAULT_PAGE_MAPPING,
            dram_page_size: DRAM_PAGE_SIZE,
        }
    }

    #[inline]
    #[must_use]
    pub const fn properties(&self, class: PageClass) -> &MmuProperties {
        match class {
            PageClass::Regular => &self.pmmu,
            PageClass::Huge => &self.pmmu_huge,
            PageClass::Dram => &self.dmmu,
        }
    }

    /// Whether one DRAM page at `va` lies in the DRAM virtual range.
    #[inline]
    #[must_use]
    pub const fn is_dram_va(&self, va: VirtualAddress) -> bool {
        self.dmmu.contains(va, self.dmmu.page_size)
    }

    /// Page-size class used to map or unmap `size` bytes at `va`.
    #[must_use]
    pub const fn classify(&self, va: VirtualAddress, size: u64) -> PageClass {
        if self.is_dram_va(va) {
            PageClass::Dram
        } else if size.is_multiple_of(self.pmmu_huge.page_size) {
            PageClass::Huge
        } else {
            PageClass::Regular
        }
    }

    /// User contexts keep the DRAM range pointed at the default page.
    #[inline]
    #[must_use]
    pub const fn default_mapping_enabled(&self) -> bool {
        self.dram_supports_virtual_memory && self.dram_default_page_mapping
    }

    /// Number of hop3 tables the default mapping needs.
    #[inline]
    #[must_use]
    pub const fn default_hop3_count(&self) -> usize {
        (self.dram_size_for_default_page_mapping / self.dram_page_size / PTE_ENTRIES_IN_HOP as u64)
            as usize
    }

    /// Physical base of the hop pool (the region after all root hops).
    #[inline]
    #[must_use]
    pub const fn pool_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.pgt_addr.as_u64() + self.hop0_tables_total_size)
    }

    #[inline]
    #[must_use]
    pub const fn pool_size(&self) -> u64 {
        self.pgt_size - self.hop0_tables_total_size
    }

    /// Physical address of the root hop of `asid`.
    #[inline]
    #[must_use]
    pub const fn hop0_phys_addr(&self, asid: u32) -> PhysicalAddress {
        PhysicalAddress::new(self.pgt_addr.as_u64() + asid as u64 * self.hop_table_size)
    }

    /// Checks the configuration before it is used.
    ///
    /// # Errors
    /// The first inconsistency found, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hop_table_size != HOP_TABLE_SIZE {
            return Err(ConfigError::HopTableSize(self.hop_table_size));
        }
        if self.max_asid == 0 {
            return Err(ConfigError::NoAddressSpaces);
        }

        let expected = u64::from(self.max_asid) * self.hop_table_size;
        if self.hop0_tables_total_size != expected {
            return Err(ConfigError::Hop0TablesSize {
                actual: self.hop0_tables_total_size,
                expected,
            });
        }

        if !self.pgt_addr.is_aligned(self.hop_table_size) {
            return Err(ConfigError::PageTableRegion("base is not hop aligned"));
        }
        if self.pgt_size <= self.hop0_tables_total_size {
            return Err(ConfigError::PageTableRegion("no room for the hop pool"));
        }
        if !self.pool_size().is_multiple_of(self.hop_table_size) {
            return Err(ConfigError::PageTableRegion("pool is not a whole number of hops"));
        }
        if self.pgt_addr.checked_add(self.pgt_size).is_none() {
            return Err(ConfigError::PageTableRegion("region overflows"));
        }

        for class in PageClass::ALL {
            self.properties(class).validate(class)?;
        }

        // regular and huge pages of one context share hops 0 to 3
        let shared = ..=PageClass::Huge.leaf_level();
        if self.pmmu_huge.hop_masks[shared] != self.pmmu.hop_masks[shared]
            || self.pmmu_huge.hop_shifts[shared] != self.pmmu.hop_shifts[shared]
        {
            return Err(ConfigError::Geometry {
                class: PageClass::Huge,
                reason: "huge and regular pages disagree above the huge leaf",
            });
        }

        if self.dram_page_size != self.dmmu.page_size {
            return Err(ConfigError::Geometry {
                class: PageClass::Dram,
                reason: "DRAM page size differs from the DRAM geometry",
            });
        }

        if self.default_mapping_enabled() {
            self.validate_default_mapping()?;
        }
        Ok(())
    }

    fn validate_default_mapping(&self) -> Result<(), ConfigError> {
        let hop3_span = self.dram_page_size * PTE_ENTRIES_IN_HOP as u64;

        if !self.dram_default_page_addr.is_aligned(self.dram_page_size) {
            return Err(ConfigError::DefaultMapping("default page is not page aligned"));
        }
        if self.dram_size_for_default_page_mapping == 0
            || !self.dram_size_for_default_page_mapping.is_multiple_of(hop3_span)
        {
            return Err(ConfigError::DefaultMapping("size is not a whole number of hop3 tables"));
        }
        if !self.dmmu.contains(self.dmmu.start_addr, self.dram_size_for_default_page_mapping) {
            return Err(ConfigError::DefaultMapping("region exceeds the DRAM range"));
        }
        if !self.dmmu.start_addr.is_aligned(self.dmmu.entry_span(2)) {
            return Err(ConfigError::DefaultMapping("start is not aligned to a hop2 entry"));
        }

        let first = self.dmmu.hop_index(2, self.dmmu.start_addr);
        if first + self.default_hop3_count() > PTE_ENTRIES_IN_HOP {
            return Err(ConfigError::DefaultMapping("region does not fit a single hop2 table"));
        }
        Ok(())
    }
}
