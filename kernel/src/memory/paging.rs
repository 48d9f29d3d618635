use core::{ops::Range, ptr::NonNull};

use crate::{debug, info};
use spin::Mutex;
use x86_64::{
    PhysAddr, VirtAddr,
    structures::paging::{
        FrameAllocator, FrameDeallocator, OffsetPageTable, PageTable, PhysFrame, Size4KiB,
    },
};

use super::{PAGE_SIZE, freelist::FreeList};

pub static FRAME_ALLOCATOR: Mutex<Option<PhysFrameAllocator>> = Mutex::new(None);
pub static PAGE_TABLE: Mutex<Option<OffsetPageTable<'static>>> = Mutex::new(None);

/// A frame allocator handing out the usable physical frames reported at boot.
///
/// Free frames are kept on a [`FreeList`] threaded through the frames
/// themselves, reached through the physical memory window at `offset`.
pub struct PhysFrameAllocator {
    free: FreeList,
    offset: u64,
}

impl PhysFrameAllocator {
    /// Builds the allocator from the usable physical regions of the memory map.
    ///
    /// Regions are trimmed inward to whole frames.
    ///
    /// # Safety
    ///
    /// Every frame in `usable` must be unused, and mapped writable at
    /// `phys + offset` for as long as the allocator lives.
    pub unsafe fn init(usable: impl IntoIterator<Item = Range<u64>>, offset: u64) -> Self {
        let mut allocator = Self {
            free: FreeList::new(),
            offset,
        };

        let frames = usable
            .into_iter()
            .map(|region| region.start.next_multiple_of(PAGE_SIZE)..region.end & !(PAGE_SIZE - 1))
            .flat_map(|region| region.step_by(PAGE_SIZE as usize))
            .map(|base| base + offset);

        for frame in frames {
            if let Some(ptr) = NonNull::new(frame as *mut ()) {
                unsafe { allocator.free.push(ptr) };
            }
        }

        debug!("frame allocator initialized with {} frames", allocator.free.len());

        allocator
    }

    /// Number of frames still available.
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }
}

unsafe impl FrameAllocator<Size4KiB> for PhysFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let ptr = self.free.pop()?;
        let phys = PhysAddr::new(ptr.as_ptr() as u64 - self.offset);
        Some(PhysFrame::containing_address(phys))
    }
}

impl FrameDeallocator<Size4KiB> for PhysFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        let ptr = frame.start_address().as_u64() + self.offset;
        if let Some(ptr) = NonNull::new(ptr as *mut ()) {
            unsafe { self.free.push(ptr) };
        }
    }
}

/// Initializes the global frame allocator from the usable physical regions.
///
/// # Safety
/// The caller must ensure that the regions are valid and not used elsewhere.
/// This function must only be called once, before any frame allocations occur.
pub unsafe fn init_frame_allocator(usable: impl IntoIterator<Item = Range<u64>>, offset: u64) {
    let mut frame_allocator = FRAME_ALLOCATOR.lock();
    if frame_allocator.is_some() {
        panic!("Frame allocator already initialized");
    }
    frame_allocator.replace(unsafe { PhysFrameAllocator::init(usable, offset) });

    info!("frame allocator initialized");
}

/// Initializes a new OffsetPageTable with the given memory offset.
///
/// # Safety
/// This function is unsafe because the caller must ensure that the memory offset is valid and that the virtual memory is mapped correctly.
pub unsafe fn init(memory_offset: VirtAddr) {
    let mut page_table = PAGE_TABLE.lock();
    if page_table.is_some() {
        panic!("Page table already initialized");
    }
    let level_4_table = unsafe { get_level_4_table(memory_offset) };
    page_table.replace(unsafe { OffsetPageTable::new(level_4_table, memory_offset) });
    info!("page tables initialized");
}

/// Get a reference to the start of the level 4 page table in virtual memory.
///
/// # Safety
/// This function is unsafe because the caller must make sure there is a valid level 4 page table and the virtual memory is mapped correctly.
/// This function may only be called once to avoid multiple &mut references to the same data.
unsafe fn get_level_4_table(memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_table_frame, _) = x86_64::registers::control::Cr3::read();
    let phys = level_4_table_frame.start_address();
    let virt = (phys.as_u64() + memory_offset.as_u64()) as *mut PageTable;
    unsafe { &mut *virt }
}
