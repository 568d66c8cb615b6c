//! # Lazy Memory Mapping
//!
//! `mmap`, `munmap` and `msync` for user processes, with physical pages
//! populated on first access.
//!
//! ```text
//!   mmap ──► RegionRegistry::acquire_region   (address space only)
//!
//!   #PF  ──► fault::populate                  (one zeroed frame, hydrated
//!                                              from the file if file-backed)
//!
//!   msync ─► dirty pages ──► FileTable::write
//!
//!   munmap ► zero + unmap + free frames ──► RegionRegistry::release_region
//! ```
//!
//! ## Address Space
//!
//! Regions live above the process image. Freed regions stay in the registry
//! as holes and are merged with free neighbours; later requests reuse the hole
//! closest to their hint before the high-water mark is advanced.
//!
//! ```text
//!  0            size (high-water mark)                 ceiling
//!  ├─ image ────┼─ live ─┼─ free ─┼─ live ─┼───────────────┤
//! ```
//!
//! ## Collaborators
//!
//! The page table, the frame allocator, the physical mapper and the open-file
//! table are traits (see [`kernel_vmem`] and [`file::FileTable`]). A [`Vmm`]
//! borrows all of them together with the process's [`ProcessMemory`] for the
//! duration of one call; the caller serializes calls per process.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod error;
pub mod fault;
pub mod file;
pub mod mapping;
pub mod region;
pub mod syscall;

pub use crate::error::{ErrorClass, FaultError, FileError, MmapError, RegistryError};
pub use crate::fault::PageFaultError;
pub use crate::file::{Fd, FileTable};
pub use crate::mapping::{Backing, MmapRequest, ProcessMemory, Vmm};
pub use crate::region::{
    InvariantViolation, Protection, Region, RegionId, RegionKind, RegionRegistry,
    find_best_fit_address,
};
