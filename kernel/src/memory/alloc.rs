use core::{
    alloc::{GlobalAlloc, Layout},
    mem::size_of,
    ptr,
};

use spin::Mutex;
use x86_64::{VirtAddr, structures::paging::PageTableFlags};

use crate::{info, warn};

use super::{
    PAGE_SIZE,
    bootstrap::BumpAllocator,
    heap::{BLOCK_ALIGN, Heap, HeapError, HeapStats, Hole},
    mapper::{KernelMapper, PageMapper, page_range},
};

/// Start of the virtual range reserved for the kernel heap and its index.
pub const HEAP_START: u64 = 0x_4444_0000_0000;
/// Bytes backed as soon as the heap exists.
pub const HEAP_INIT_SIZE: u64 = 0x10_0000;
/// The heap never contracts below this.
pub const HEAP_MIN_SIZE: u64 = 0x7_0000;
/// The heap never grows beyond this.
pub const HEAP_MAX_SIZE: u64 = 0xFFF_F000;
/// Number of holes the heap can track at once.
pub const HEAP_INDEX_SIZE: usize = 0x4000;

/// Global kernel heap instance.
#[cfg_attr(all(feature = "global-allocator", not(test)), global_allocator)]
pub static KERNEL_HEAP: LockedHeap<KernelMapper> = LockedHeap::empty();

/// Layout of a heap.
///
/// Sizes are relative to `start` and must be page multiples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub start: VirtAddr,
    pub initial_size: u64,
    pub min_size: u64,
    pub max_size: u64,
    pub index_capacity: usize,
    /// Map grown pages kernel-only.
    pub supervisor: bool,
    /// Map grown pages read-only.
    pub readonly: bool,
}

impl HeapConfig {
    pub const KERNEL: HeapConfig = HeapConfig {
        start: VirtAddr::new(HEAP_START),
        initial_size: HEAP_INIT_SIZE,
        min_size: HEAP_MIN_SIZE,
        max_size: HEAP_MAX_SIZE,
        index_capacity: HEAP_INDEX_SIZE,
        supervisor: true,
        readonly: false,
    };

    /// Page table flags for pages backing this heap.
    pub fn page_flags(&self) -> PageTableFlags {
        let mut flags = PageTableFlags::PRESENT;
        if !self.readonly {
            flags |= PageTableFlags::WRITABLE;
        }
        if !self.supervisor {
            flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        flags
    }
}

/// A heap behind a spinlock, empty until [`init`](Self::init).
///
/// The lock serializes every call; on the kernel target interrupts are also
/// masked while it is held, so an interrupt handler that allocates cannot
/// deadlock against the code it interrupted.
pub struct LockedHeap<M: PageMapper + 'static> {
    inner: Mutex<Option<Heap<'static, M>>>,
}

impl<M: PageMapper + 'static> LockedHeap<M> {
    pub const fn empty() -> Self {
        LockedHeap {
            inner: Mutex::new(None),
        }
    }

    /// Installs `heap`.
    ///
    /// # Panics
    /// If a heap is already installed.
    pub fn init(&self, heap: Heap<'static, M>) {
        critical(|| {
            let mut inner = self.inner.lock();
            if inner.is_some() {
                panic!("Heap already initialized");
            }
            inner.replace(heap);
        })
    }

    pub fn is_initialized(&self) -> bool {
        critical(|| self.inner.lock().is_some())
    }

    /// Runs `f` with exclusive access to the heap.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<'static, M>) -> R) -> Result<R, HeapError> {
        critical(|| -> Result<R, HeapError> {
            let mut inner = self.inner.lock();
            let heap = inner.as_mut().ok_or(HeapError::NotInitialized)?;
            Ok(f(heap))
        })
    }

    pub fn allocate(&self, size: usize, align_to_page: bool) -> Result<VirtAddr, HeapError> {
        self.with_heap(|heap| heap.allocate(size, align_to_page))?
    }

    /// Releases the block at `addr`.
    ///
    /// # Panics
    /// If the block's boundary tags are corrupt. Nothing the heap reports can
    /// be trusted after that, so this halts the kernel.
    pub fn release(&self, addr: VirtAddr) -> Result<(), HeapError> {
        match self.with_heap(|heap| heap.release(addr))? {
            Err(err @ HeapError::CorruptHeap { .. }) => {
                panic!("{} (releasing {:#x})", err, addr.as_u64())
            }
            result => result,
        }
    }

    pub fn verify(&self) -> Result<HeapStats, HeapError> {
        self.with_heap(|heap| heap.verify())?
    }
}

unsafe impl<M: PageMapper + Send + 'static> GlobalAlloc for LockedHeap<M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() as u64 > PAGE_SIZE {
            return ptr::null_mut();
        }
        let align_to_page = layout.align() as u64 > BLOCK_ALIGN;

        self.allocate(layout.size(), align_to_page)
            .map_or(ptr::null_mut(), |addr| addr.as_mut_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Err(err) = self.release(VirtAddr::from_ptr(ptr)) {
            warn!("leaking {:#x}: {}", ptr as u64, err);
        }
    }
}

/// Runs `f` with interrupts masked on the kernel target.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn critical<R>(f: impl FnOnce() -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(f)
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn critical<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Sets up the kernel heap described by `config` and installs it into
/// [`KERNEL_HEAP`].
///
/// The hole index is carved from the first pages of the reserved range; the
/// heap itself starts on the page after it.
///
/// # Safety
/// Paging and the frame allocator must be initialized, and the range
/// `config.start..config.start + config.max_size` plus the index pages must be
/// unused virtual memory.
pub unsafe fn init_heap(config: &HeapConfig) -> Result<(), HeapError> {
    let index_bytes = (config.index_capacity as u64)
        .checked_mul(size_of::<Hole>() as u64)
        .and_then(|bytes| bytes.checked_next_multiple_of(PAGE_SIZE))
        .ok_or(HeapError::InvalidArgument)?;
    let index_start = config.start;
    let index_end = index_start + index_bytes;

    let mut mapper = KernelMapper;
    mapper.map(
        page_range(index_start, index_end),
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
    )?;

    let mut bootstrap = BumpAllocator::new(index_start, index_end);
    let slots = unsafe { bootstrap.alloc_slice(config.index_capacity, Hole::EMPTY) }
        .ok_or(HeapError::OutOfMemory)?;

    let heap_config = HeapConfig {
        start: index_end,
        ..*config
    };
    let heap = Heap::new(&heap_config, slots, mapper)?;

    info!(
        "kernel heap initialized at {:#x}..{:#x}",
        heap.start().as_u64(),
        heap.end().as_u64()
    );
    KERNEL_HEAP.init(heap);
    Ok(())
}
