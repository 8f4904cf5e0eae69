//! # Device MMU Page Tables
//!
//! Software-maintained page tables for an accelerator's MMU. The tables the
//! device walks live in a reserved region of device memory; the driver keeps
//! a *shadow* copy of every table in host memory so it can walk, validate and
//! tear down mappings without reading the device back.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Mmu<D>         config · hop pool · root hop region · io D  │
//! └──────┬──────────────────────────────┬──────────────────────┘
//!        │ ctx_init(asid)               │ ctx_init(asid')
//! ┌──────▼───────────────┐      ┌───────▼──────────────┐
//! │ Context (asid)       │      │ Context (asid')      │
//! │  TicketMutex<        │      │  TicketMutex<        │
//! │   MmuContext>        │ ...  │   MmuContext>        │
//! │   root · index ·     │      │                      │
//! │   default mapping    │      │                      │
//! └──────────────────────┘      └──────────────────────┘
//! ```
//!
//! * [`Mmu`] owns everything shared by a device: the validated
//!   [`MmuConfig`], the [`HopPool`] of physical hop blocks, the per-ASID root
//!   tables and the [`PteIo`] collaborator that writes device entries.
//! * [`Context`] is one address space. All mutation goes through its FIFO
//!   lock; [`MmuContext`] is the locked view.
//!
//! ## Translation
//!
//! A virtual address is resolved through up to five hops. Regular pages end
//! in hop 4; huge host pages and DRAM pages end in hop 3 (the *last* bit is
//! set one level higher). Hop 0 is the fixed root of the ASID; hops 1 to 4
//! are allocated on demand and freed as soon as their last entry goes away.
//!
//! Every non-root hop has two addresses: a [`PhysicalAddress`] in the device
//! page-table pool and a [`ShadowAddress`] in host memory. Shadow entries
//! link hops by shadow address, device entries by physical address.
//!
//! ## DRAM default mapping
//!
//! With DRAM virtual memory and default page mapping enabled, every user
//! context keeps its whole DRAM default region mapped to one shared default
//! page. Mapping DRAM then *replaces* a default leaf and unmapping restores
//! it, so no hops are allocated or freed on the DRAM path.
//!
//! ## Example
//!
//! ```rust
//! # use mmu_pgt::*;
//! # use std::sync::Mutex;
//! # use std::collections::BTreeMap;
//! #[derive(Default)]
//! struct Device(Mutex<BTreeMap<u64, u64>>);
//!
//! impl PteIo for Device {
//!     fn write_pte(&self, addr: PhysicalAddress, value: u64) {
//!         self.0.lock().unwrap().insert(addr.as_u64(), value);
//!     }
//!     fn read_pte(&self, addr: PhysicalAddress) -> u64 {
//!         self.0.lock().unwrap().get(&addr.as_u64()).copied().unwrap_or(0)
//!     }
//! }
//!
//! let config = MmuConfig::reference()
//!     .with_max_asid(4)
//!     .with_hop0_tables_total_size(4 * 4096)
//!     .with_dram_default_page_mapping(false);
//! let mmu = Mmu::init(config, Device::default()).unwrap();
//! let ctx = mmu.ctx_init(1).unwrap();
//!
//! let va = VirtualAddress::new(0x1_0000_0000_0000);
//! ctx.with_lock(|c| c.map(va, PhysicalAddress::new(0x4000_0000), 0x2000, true))
//!     .unwrap();
//! assert_eq!(
//!     ctx.lock().translate(va + 0x1234),
//!     Some(PhysicalAddress::new(0x4000_1234))
//! );
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod config;
mod context;
mod default_mapping;
mod engine;
mod entry;
mod error;
mod hop;
mod hop0;
mod mmu;
mod pool;
mod shadow;
#[cfg(test)]
mod testing;
mod walk;

pub use config::{MmuConfig, MmuProperties, PageClass};
pub use context::{Context, MmuContext};
pub use entry::HopEntry;
pub use error::{ConfigError, MmuError, PoolError};
pub use mmu::Mmu;
pub use pool::HopPool;
pub use shadow::{HopInfo, ShadowHop, ShadowIndex};
pub use walk::{HopChain, HopStep, PteSlot};

pub use mmu_addresses::{PhysicalAddress, ShadowAddress, VirtualAddress};

/// Access to the device copy of the page tables.
///
/// One call reads or writes one 64-bit entry at a device physical address.
/// Implementations serialise their own register or PCI access.
pub trait PteIo {
    /// Stores `value` as the entry at `addr`.
    fn write_pte(&self, addr: PhysicalAddress, value: u64);

    /// Reads the entry at `addr` back from the device.
    ///
    /// The manager reads only to order earlier writes before a flush.
    fn read_pte(&self, addr: PhysicalAddress) -> u64;
}

impl<T: PteIo + ?Sized> PteIo for &T {
    #[inline]
    fn write_pte(&self, addr: PhysicalAddress, value: u64) {
        (**self).write_pte(addr, value);
    }

    #[inline]
    fn read_pte(&self, addr: PhysicalAddress) -> u64 {
        (**self).read_pte(addr)
    }
}
