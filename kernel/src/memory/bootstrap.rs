use core::mem::{align_of, size_of};

use x86_64::VirtAddr;

use super::PAGE_SIZE;

/// A placement allocator for the time before the heap exists.
///
/// Memory is handed out by bumping a cursor through `[next, end)` and is never
/// given back. The heap uses it once, to carve the storage of its hole index.
#[derive(Debug)]
pub struct BumpAllocator {
    next: u64,
    end: u64,
}

impl BumpAllocator {
    pub const fn new(start: VirtAddr, end: VirtAddr) -> Self {
        BumpAllocator {
            next: start.as_u64(),
            end: end.as_u64(),
        }
    }

    /// Reserves `size` bytes, optionally starting on a page boundary.
    pub fn alloc(&mut self, size: usize, align_to_page: bool) -> Option<VirtAddr> {
        let align = if align_to_page { PAGE_SIZE } else { 1 };
        self.alloc_aligned(size as u64, align)
    }

    /// Reserves an array of `len` values of `T`, each set to `fill`.
    ///
    /// # Safety
    /// The allocator's range must be writable memory that nothing else uses.
    pub unsafe fn alloc_slice<T: Copy>(
        &mut self,
        len: usize,
        fill: T,
    ) -> Option<&'static mut [T]> {
        let bytes = size_of::<T>().checked_mul(len)?;
        let start = self.alloc_aligned(bytes as u64, align_of::<T>() as u64)?;
        let ptr = start.as_mut_ptr::<T>();

        unsafe {
            for i in 0..len {
                ptr.add(i).write(fill);
            }
            Some(core::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Bytes left before the end of the range.
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    fn alloc_aligned(&mut self, size: u64, align: u64) -> Option<VirtAddr> {
        let start = self.next.checked_next_multiple_of(align)?;
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }

        self.next = end;
        Some(VirtAddr::new(start))
    }
}
