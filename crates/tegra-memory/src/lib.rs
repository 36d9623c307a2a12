//! Memory side of the Tegra GPU model.
//!
//! This crate provides the pieces every GPU engine needs to touch guest memory:
//! - guest physical RAM backends ([`DenseMemory`], [`SparseMemory`]) behind the fallible
//!   [`GuestMemory`] trait,
//! - the infallible [`MemoryBus`] view engines write through (see [`GuestBus`]), and
//! - the GPU memory manager ([`GpuMemoryManager`]) which maps GPU virtual pages onto guest
//!   physical pages and answers [`AddressTranslator`] queries.
#![forbid(unsafe_code)]

pub mod bus;
pub mod gmmu;
pub mod phys;

pub use bus::{GuestBus, MemoryBus};
pub use gmmu::{
    AddressTranslator, GpuMemoryManager, MapError, ADDRESS_SPACE_BITS, DEFAULT_PAGE_BITS,
};
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};

#[cfg(test)]
mod tests;
