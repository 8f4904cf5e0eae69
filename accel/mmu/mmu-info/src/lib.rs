//! # Device MMU Geometry and Defaults
//!
//! Hardware constants shared by every crate of the device page-table manager.
//!
//! ## Overview
//!
//! The device MMU is a five-level radix tree of fixed-size *hops*. Each hop is
//! one [`pte::HOP_TABLE_SIZE`] table of [`pte::PTE_ENTRIES_IN_HOP`] 64-bit
//! entries. A virtual address is split into one index per hop level using the
//! per-level masks and shifts:
//!
//! ```text
//!  63      50 49  48 47      39 38      30 29      21 20      12 11       0
//! ┌──────────┬──────┬──────────┬──────────┬──────────┬──────────┬──────────┐
//! │  unused  │ hop0 │   hop1   │   hop2   │   hop3   │   hop4   │  offset  │
//! └──────────┴──────┴──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Regular (4 KiB) pages terminate in hop 4. Huge host pages and DRAM pages
//! (2 MiB) terminate one level higher, in hop 3, with the *last* bit set.
//!
//! ## Modules
//!
//! * [`pte`]: entry bit masks, hop masks/shifts and table sizes.
//! * [`layout`]: default device address layout (VA ranges, page-table region,
//!   ASID limits, DRAM default page).

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod layout;
pub mod pte;
