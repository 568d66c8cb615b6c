//! # Kernel Heap
//!
//! A small free-list allocator for kernel-internal objects, in the spirit of
//! the K&R `malloc`. It sits on top of the physical frame allocator:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                KernelHeap (kmalloc / kmfree)        │
//! │    • address-ordered free list                      │
//! │    • first fit, tail carving, merge on release      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ one page at a time
//! ┌─────────────────▼───────────────────────────────────┐
//! │      FrameAlloc + PhysMapper (kernel-vmem)          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every request is rounded up to 16-byte units plus one unit of header, so a
//! single allocation can be at most one page minus the header
//! ([`MAX_ALLOCATION`]). Larger requests are a programmer error and panic.
//!
//! The heap is an ordinary value borrowing its collaborators; whoever owns it
//! decides how access is serialized.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut heap = KernelHeap::new(&HhdmPhysMapper, &mut frames);
//! let p = heap.kmalloc(64)?;
//! unsafe { heap.kmfree(p) };
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod free_list;

pub use free_list::{HeapError, KernelHeap, MAX_ALLOCATION};
