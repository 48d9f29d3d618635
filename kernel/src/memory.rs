//! Memory management for locOS.
//!
//! This module provides:
//! - The kernel heap, a boundary-tag allocator with a size-ordered hole index
//! - Heap growth and contraction through a page mapper
//! - A bump allocator for memory needed before the heap exists
//! - Frame allocation from physical memory
//! - Page table management

pub mod alloc;
pub mod bootstrap;
pub mod freelist;
pub mod heap;
pub mod index;
pub mod mapper;
pub mod paging;
#[cfg(test)]
mod tests;

pub use alloc::{HeapConfig, KERNEL_HEAP, LockedHeap, init_heap};
pub use heap::{Heap, HeapError, HeapStats};
pub use mapper::{KernelMapper, PageMapper};
pub use paging::{FRAME_ALLOCATOR, PAGE_TABLE, PhysFrameAllocator, init, init_frame_allocator};

/// Size of a page, the unit of heap growth and contraction.
pub const PAGE_SIZE: u64 = 4096;
