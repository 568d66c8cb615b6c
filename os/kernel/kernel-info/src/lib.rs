//! # Kernel Configuration
//!
//! Compile-time memory-layout constants shared by the allocator, the
//! page-table contracts and the memory-mapping subsystem.
//!
//! ## User Address Space
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Process image (text, data)    │
//! process size          ├─────────────────────────────────┤ grows only upwards
//!                       │   mmap regions (live + holes)   │
//!                       │   populated one page per fault  │
//! USER_MMAP_CEILING     ├─────────────────────────────────┤
//!                       │        Guard page               │
//! USERSPACE_END         └─────────────────────────────────┘ 0x0000_8000_0000_0000
//! ```
//!
//! The process size acts as the high-water mark of the mapping area: new
//! regions are appended there, freed regions are recycled in place and the
//! mark itself is never lowered.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::memory::{PAGE_SIZE, USER_MMAP_CEILING};
//!
//! let pages = (0x2345 + PAGE_SIZE - 1) / PAGE_SIZE;
//! assert_eq!(pages, 3);
//! assert!(USER_MMAP_CEILING > PAGE_SIZE);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
