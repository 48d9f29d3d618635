//! Page mapping seam between the heap and the paging code.

use x86_64::{
    VirtAddr,
    structures::paging::{
        FrameAllocator, FrameDeallocator, Mapper, OffsetPageTable, Page, PageTableFlags,
        Size4KiB,
        mapper::MapToError, page::PageRange,
    },
};

use crate::trace;

use super::{FRAME_ALLOCATOR, PAGE_TABLE, paging::PhysFrameAllocator};

/// Backs a virtual range with frames and exposes the backed bytes.
///
/// The heap only ever touches memory through [`bytes`](Self::bytes) and
/// [`bytes_mut`](Self::bytes_mut), and only for ranges it has mapped.
pub trait PageMapper {
    /// Maps every page of `pages` to a fresh frame with `flags`.
    ///
    /// On failure no page of `pages` is left mapped.
    fn map(
        &mut self,
        pages: PageRange<Size4KiB>,
        flags: PageTableFlags,
    ) -> Result<(), MapToError<Size4KiB>>;

    /// Unmaps `pages` and returns their frames.
    fn unmap(&mut self, pages: PageRange<Size4KiB>);

    /// Returns the mapped bytes `[start, start + len)`.
    fn bytes(&self, start: VirtAddr, len: usize) -> &[u8];

    /// Returns the mapped bytes `[start, start + len)` for writing.
    fn bytes_mut(&mut self, start: VirtAddr, len: usize) -> &mut [u8];
}

/// Returns the pages covering `[start, end)`. Both ends must be page aligned.
pub fn page_range(start: VirtAddr, end: VirtAddr) -> PageRange<Size4KiB> {
    Page::range(Page::containing_address(start), Page::containing_address(end))
}

/// Maps through the kernel's global page table and frame allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelMapper;

impl PageMapper for KernelMapper {
    fn map(
        &mut self,
        pages: PageRange<Size4KiB>,
        flags: PageTableFlags,
    ) -> Result<(), MapToError<Size4KiB>> {
        let mut page_table_guard = PAGE_TABLE.lock();
        let page_table = page_table_guard
            .as_mut()
            .ok_or(MapToError::FrameAllocationFailed)?;
        let mut frame_allocator_guard = FRAME_ALLOCATOR.lock();
        let frame_allocator = frame_allocator_guard
            .as_mut()
            .ok_or(MapToError::FrameAllocationFailed)?;

        for page in pages {
            let Some(frame) = frame_allocator.allocate_frame() else {
                unmap_pages(page_table, frame_allocator, Page::range(pages.start, page));
                return Err(MapToError::FrameAllocationFailed);
            };

            match unsafe { page_table.map_to(page, frame, flags, &mut *frame_allocator) } {
                Ok(flush) => flush.flush(),
                Err(err) => {
                    unsafe { frame_allocator.deallocate_frame(frame) };
                    unmap_pages(page_table, frame_allocator, Page::range(pages.start, page));
                    return Err(err);
                }
            }
        }

        trace!(
            "mapped heap pages {:#x}..{:#x}",
            pages.start.start_address().as_u64(),
            pages.end.start_address().as_u64()
        );
        Ok(())
    }

    fn unmap(&mut self, pages: PageRange<Size4KiB>) {
        let mut page_table_guard = PAGE_TABLE.lock();
        let mut frame_allocator_guard = FRAME_ALLOCATOR.lock();
        let (Some(page_table), Some(frame_allocator)) =
            (page_table_guard.as_mut(), frame_allocator_guard.as_mut())
        else {
            return;
        };

        unmap_pages(page_table, frame_allocator, pages);

        trace!(
            "unmapped heap pages {:#x}..{:#x}",
            pages.start.start_address().as_u64(),
            pages.end.start_address().as_u64()
        );
    }

    fn bytes(&self, start: VirtAddr, len: usize) -> &[u8] {
        // SAFETY: the heap only asks for ranges it mapped through this mapper
        // and owns exclusively.
        unsafe { core::slice::from_raw_parts(start.as_ptr::<u8>(), len) }
    }

    fn bytes_mut(&mut self, start: VirtAddr, len: usize) -> &mut [u8] {
        // SAFETY: as in `bytes`; `&mut self` keeps the view unique.
        unsafe { core::slice::from_raw_parts_mut(start.as_mut_ptr::<u8>(), len) }
    }
}

/// Unmaps `pages`, flushing each one and handing its frame back.
fn unmap_pages(
    page_table: &mut OffsetPageTable<'static>,
    frame_allocator: &mut PhysFrameAllocator,
    pages: PageRange<Size4KiB>,
) {
    for page in pages {
        if let Ok((frame, flush)) = page_table.unmap(page) {
            flush.flush();
            unsafe { frame_allocator.deallocate_frame(frame) };
        }
    }
}
