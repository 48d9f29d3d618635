use core::alloc::{GlobalAlloc, Layout};

use x86_64::{
    VirtAddr,
    structures::paging::{Page, PageTableFlags, Size4KiB, mapper::MapToError, page::PageRange},
};

use super::{
    PAGE_SIZE,
    alloc::{HeapConfig, LockedHeap},
    heap::{BLOCK_OVERHEAD, Corruption, HEADER_SIZE, Heap, HeapError, Hole},
    mapper::PageMapper,
};

const BASE: u64 = 0x_4444_0000_0000;
const FILL: u8 = 0xAA;

/// Stands in for the page tables: a byte arena at `base` with per-page
/// mapping state and a frame budget.
struct ArenaMapper {
    base: u64,
    arena: Vec<u8>,
    mapped: Vec<bool>,
    frames: usize,
    flags: Vec<PageTableFlags>,
}

impl ArenaMapper {
    fn new(span: u64, frames: usize) -> Self {
        let pages = (span / PAGE_SIZE) as usize;
        ArenaMapper {
            base: BASE,
            arena: vec![FILL; span as usize],
            mapped: vec![false; pages],
            frames,
            flags: Vec::new(),
        }
    }

    fn mapped_pages(&self) -> usize {
        self.mapped.iter().filter(|mapped| **mapped).count()
    }

    fn page_index(&self, page: Page<Size4KiB>) -> usize {
        ((page.start_address().as_u64() - self.base) / PAGE_SIZE) as usize
    }

    fn offset_of(&self, start: VirtAddr, len: usize) -> usize {
        let offset = (start.as_u64() - self.base) as usize;
        let first = offset / PAGE_SIZE as usize;
        let last = (offset + len).div_ceil(PAGE_SIZE as usize);
        assert!(
            self.mapped[first..last].iter().all(|mapped| *mapped),
            "touched unmapped memory at {:#x}+{:#x}",
            start.as_u64(),
            len
        );
        offset
    }
}

impl PageMapper for ArenaMapper {
    fn map(
        &mut self,
        pages: PageRange<Size4KiB>,
        flags: PageTableFlags,
    ) -> Result<(), MapToError<Size4KiB>> {
        let count = pages.count();
        if count > self.frames {
            return Err(MapToError::FrameAllocationFailed);
        }
        for page in pages {
            let index = self.page_index(page);
            assert!(!self.mapped[index], "page mapped twice");
            self.mapped[index] = true;
        }
        self.frames -= count;
        self.flags.push(flags);
        Ok(())
    }

    fn unmap(&mut self, pages: PageRange<Size4KiB>) {
        for page in pages {
            let index = self.page_index(page);
            assert!(self.mapped[index], "page unmapped twice");
            self.mapped[index] = false;
            let offset = index * PAGE_SIZE as usize;
            self.arena[offset..offset + PAGE_SIZE as usize].fill(FILL);
            self.frames += 1;
        }
    }

    fn bytes(&self, start: VirtAddr, len: usize) -> &[u8] {
        let offset = self.offset_of(start, len);
        &self.arena[offset..offset + len]
    }

    fn bytes_mut(&mut self, start: VirtAddr, len: usize) -> &mut [u8] {
        let offset = self.offset_of(start, len);
        &mut self.arena[offset..offset + len]
    }
}

fn config(initial_size: u64, min_size: u64, max_size: u64) -> HeapConfig {
    HeapConfig {
        start: VirtAddr::new(BASE),
        initial_size,
        min_size,
        max_size,
        index_capacity: 64,
        supervisor: true,
        readonly: false,
    }
}

fn heap_with(config: &HeapConfig, slots: usize, frames: usize) -> Heap<'static, ArenaMapper> {
    let slots = Vec::leak(vec![Hole::EMPTY; slots]);
    Heap::new(config, slots, ArenaMapper::new(config.max_size, frames)).unwrap()
}

fn small_heap() -> Heap<'static, ArenaMapper> {
    heap_with(&config(0x10000, 0x10000, 0x100000), 64, usize::MAX)
}

fn hole_sizes(heap: &Heap<'_, ArenaMapper>) -> Vec<u64> {
    heap.holes().map(|hole| hole.size).collect()
}

fn assert_single_hole(heap: &Heap<'_, ArenaMapper>) {
    let holes: Vec<Hole> = heap.holes().collect();
    assert_eq!(
        holes,
        vec![Hole {
            header: heap.start(),
            size: heap.size()
        }]
    );
    let stats = heap.verify().unwrap();
    assert_eq!(stats.holes, 1);
    assert_eq!(stats.allocations, 0);
}

#[test]
fn test_new_heap_is_one_hole() {
    let heap = small_heap();

    assert_eq!(heap.start(), VirtAddr::new(BASE));
    assert_eq!(heap.end(), VirtAddr::new(BASE + 0x10000));
    assert_eq!(heap.max(), VirtAddr::new(BASE + 0x100000));
    assert_eq!(heap.mapper().mapped_pages(), 16);
    assert_single_hole(&heap);
}

#[test]
fn test_tags_are_laid_out_little_endian() {
    let mut heap = small_heap();
    let a = heap.allocate(8, false).unwrap();
    assert_eq!(a, VirtAddr::new(BASE + HEADER_SIZE));

    let header = heap.mapper().bytes(VirtAddr::new(BASE), 16).to_vec();
    assert_eq!(&header[0..4], &0xBEEF_ACEDu32.to_le_bytes());
    assert_eq!(header[4], 0);
    assert_eq!(&header[5..8], &[0, 0, 0]);
    assert_eq!(&header[8..16], &48u64.to_le_bytes());

    let footer = heap.mapper().bytes(VirtAddr::new(BASE + 32), 16).to_vec();
    assert_eq!(&footer[0..4], &0xBEEF_ACEDu32.to_le_bytes());
    assert_eq!(&footer[4..8], &[0, 0, 0, 0]);
    assert_eq!(&footer[8..16], &BASE.to_le_bytes());

    let hole = heap.mapper().bytes(VirtAddr::new(BASE + 48), 16).to_vec();
    assert_eq!(hole[4], 1);
}

#[test]
fn test_simple_alloc() {
    let mut heap = small_heap();

    let a = heap.allocate(8, false).unwrap();
    let b = heap.allocate(8, false).unwrap();
    let c = heap.allocate(8, false).unwrap();

    assert_eq!(a.as_u64(), BASE + 16);
    assert_eq!(b.as_u64(), BASE + 64);
    assert_eq!(c.as_u64(), BASE + 112);
    assert_eq!(hole_sizes(&heap), vec![0x10000 - 3 * 48]);

    let stats = heap.verify().unwrap();
    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.used, 3 * 48);
}

#[test]
fn test_release_coalesces_in_any_order() {
    let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 0, 2]];

    for order in orders {
        let mut heap = small_heap();
        let blocks = [
            heap.allocate(8, false).unwrap(),
            heap.allocate(8, false).unwrap(),
            heap.allocate(8, false).unwrap(),
        ];

        for i in order {
            heap.release(blocks[i]).unwrap();
            heap.verify().unwrap();
        }

        assert_single_hole(&heap);
        assert_eq!(heap.size(), 0x10000);
    }
}

#[test]
fn test_release_null_is_noop() {
    let mut heap = small_heap();
    heap.allocate(100, false).unwrap();
    let before = heap.verify().unwrap();

    heap.release(VirtAddr::zero()).unwrap();

    assert_eq!(heap.verify().unwrap(), before);
}

#[test]
fn test_allocate_rejects_bad_sizes() {
    let mut heap = small_heap();

    assert_eq!(heap.allocate(0, false), Err(HeapError::InvalidArgument));
    assert_eq!(heap.allocate(usize::MAX, false), Err(HeapError::InvalidArgument));
    assert_single_hole(&heap);
}

#[test]
fn test_payload_alignment() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x100000), 64, usize::MAX);
    let mut live = Vec::new();

    for size in [1, 4095, 4096, 8193] {
        let plain = heap.allocate(size, false).unwrap();
        assert_eq!(plain.as_u64() % 16, 0);
        live.push(plain);

        let paged = heap.allocate(size, true).unwrap();
        assert_eq!(paged.as_u64() % PAGE_SIZE, 0);
        live.push(paged);

        heap.verify().unwrap();
    }

    for addr in live {
        heap.release(addr).unwrap();
    }
    assert_single_hole(&heap);
}

#[test]
fn test_page_padding_is_never_a_sliver() {
    let mut heap = small_heap();

    // leaves the hole header 32 bytes short of a page boundary
    heap.allocate(4064 - BLOCK_OVERHEAD as usize, false).unwrap();
    let paged = heap.allocate(1, true).unwrap();

    assert_eq!(paged.as_u64(), BASE + 0x2000);
    assert!(heap.holes().any(|hole| hole
        == Hole {
            header: VirtAddr::new(BASE + 4064),
            size: 4112
        }));
    heap.verify().unwrap();
}

#[test]
fn test_small_remainder_is_donated() {
    let mut heap = small_heap();

    let all = heap.allocate(0x10000 - 48, false).unwrap();
    assert_eq!(heap.holes().count(), 0);
    let stats = heap.verify().unwrap();
    assert_eq!(stats.used, 0x10000);

    heap.release(all).unwrap();
    assert_single_hole(&heap);
}

#[test]
fn test_best_fit_picks_smallest_hole() {
    let mut heap = small_heap();
    let big = heap.allocate(1000, false).unwrap();
    heap.allocate(16, false).unwrap();
    let small = heap.allocate(100, false).unwrap();
    heap.allocate(16, false).unwrap();

    heap.release(big).unwrap();
    heap.release(small).unwrap();

    assert_eq!(heap.allocate(90, false).unwrap(), small);
    heap.verify().unwrap();
}

#[test]
fn test_left_merge_keeps_index_sorted() {
    let mut heap = small_heap();
    let p = heap.allocate(16, false).unwrap();
    let q = heap.allocate(300, false).unwrap();
    heap.allocate(16, false).unwrap();
    let r = heap.allocate(200, false).unwrap();
    heap.allocate(16, false).unwrap();

    heap.release(p).unwrap();
    heap.release(r).unwrap();
    assert_eq!(hole_sizes(&heap), vec![48, 240, 64816]);

    // q merges with p on its left and outgrows r's hole
    heap.release(q).unwrap();
    assert_eq!(hole_sizes(&heap), vec![240, 384, 64816]);
    heap.verify().unwrap();
}

#[test]
fn test_grow_then_shrink() {
    let mut heap = small_heap();

    let big = heap.allocate(0x20000, false).unwrap();
    assert_eq!(heap.size(), 0x21000);
    assert_eq!(heap.mapper().mapped_pages(), 0x21);
    heap.verify().unwrap();

    heap.release(big).unwrap();
    assert_eq!(heap.size(), 0x10000);
    assert_eq!(heap.mapper().mapped_pages(), 16);
    assert_single_hole(&heap);
}

#[test]
fn test_shrink_stops_at_live_block() {
    let mut heap = small_heap();
    let keep = heap.allocate(0x10000, false).unwrap();
    let big = heap.allocate(0x20000, false).unwrap();

    heap.release(big).unwrap();

    let stats = heap.verify().unwrap();
    assert!(heap.size() < 0x10000 + 0x20000);
    assert_eq!(heap.size() % PAGE_SIZE, 0);
    assert_eq!(stats.allocations, 1);
    assert!(heap.holes().all(|hole| hole.size >= BLOCK_OVERHEAD));

    heap.release(keep).unwrap();
    assert_eq!(heap.size(), 0x10000);
    assert_single_hole(&heap);
}

#[test]
fn test_shrink_swallows_trailing_hole() {
    let mut heap = small_heap();
    let a = heap.allocate(0x10000 - BLOCK_OVERHEAD as usize, false).unwrap();
    assert_eq!(heap.holes().count(), 0);

    // no hole left, so this grows a fresh one at the old end
    let b = heap.allocate(100, false).unwrap();
    assert_eq!(b.as_u64(), BASE + 0x10000 + HEADER_SIZE);
    assert_eq!(heap.size(), 0x11000);

    heap.release(b).unwrap();
    assert_eq!(heap.size(), 0x10000);
    assert_eq!(heap.holes().count(), 0);
    assert_eq!(heap.mapper().mapped_pages(), 16);
    heap.verify().unwrap();

    heap.release(a).unwrap();
    assert_single_hole(&heap);
}

#[test]
fn test_full_index_still_releases_swallowed_block() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x100000), 3, usize::MAX);
    let blocks: Vec<VirtAddr> = (0..6).map(|_| heap.allocate(16, false).unwrap()).collect();
    heap.allocate(0x10000 - 6 * 48 - BLOCK_OVERHEAD as usize, false)
        .unwrap();
    let last = heap.allocate(PAGE_SIZE as usize - BLOCK_OVERHEAD as usize, false)
        .unwrap();
    assert_eq!(heap.size(), 0x11000);

    for i in [0, 2, 4] {
        heap.release(blocks[i]).unwrap();
    }
    assert_eq!(heap.holes().count(), 3);

    // contraction takes the whole block, so no index slot is needed
    heap.release(last).unwrap();
    assert_eq!(heap.size(), 0x10000);
    assert_eq!(heap.holes().count(), 3);
    assert_eq!(heap.verify().unwrap().allocations, 4);
}

#[test]
fn test_grow_respects_max() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x20000), 64, usize::MAX);
    let before = heap.verify().unwrap();

    assert_eq!(heap.allocate(0x20000, false), Err(HeapError::OutOfMemory));
    assert_eq!(heap.verify().unwrap(), before);
    assert_eq!(heap.mapper().mapped_pages(), 16);

    heap.allocate(0x18000, false).unwrap();
    assert!(heap.size() <= 0x20000);
}

#[test]
fn test_out_of_frames_leaves_heap_untouched() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x100000), 64, 16 + 2);
    let before = heap.verify().unwrap();

    assert_eq!(heap.allocate(0x14000, false), Err(HeapError::OutOfMemory));
    assert_eq!(heap.verify().unwrap(), before);
    assert_eq!(heap.mapper().mapped_pages(), 16);
    assert_single_hole(&heap);
}

#[test]
fn test_index_capacity() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x100000), 3, usize::MAX);
    let blocks: Vec<VirtAddr> = (0..6).map(|_| heap.allocate(16, false).unwrap()).collect();

    heap.release(blocks[0]).unwrap();
    heap.release(blocks[2]).unwrap();
    assert_eq!(heap.holes().count(), 3);

    assert_eq!(heap.allocate(16, false), Err(HeapError::OutOfMemory));
    assert_eq!(heap.release(blocks[4]), Err(HeapError::OutOfMemory));
    heap.verify().unwrap();

    // merging frees an entry
    heap.release(blocks[1]).unwrap();
    assert_eq!(heap.holes().count(), 2);
    heap.release(blocks[4]).unwrap();
    heap.verify().unwrap();
}

#[test]
fn test_corrupt_footer_is_reported() {
    let mut heap = small_heap();
    let a = heap.allocate(64, false).unwrap();
    heap.allocate(64, false).unwrap();
    let holes_before: Vec<Hole> = heap.holes().collect();

    // footer of the 96 byte block at BASE
    heap.mapper_mut().bytes_mut(VirtAddr::new(BASE + 80), 1)[0] ^= 0xFF;

    assert_eq!(
        heap.release(a),
        Err(HeapError::CorruptHeap {
            addr: a,
            kind: Corruption::BadFooterMagic
        })
    );
    assert_eq!(heap.holes().collect::<Vec<_>>(), holes_before);
    assert!(matches!(
        heap.verify(),
        Err(HeapError::CorruptHeap {
            kind: Corruption::BadFooterMagic,
            ..
        })
    ));
}

#[test]
fn test_corrupt_header_is_reported() {
    let mut heap = small_heap();
    let a = heap.allocate(64, false).unwrap();

    heap.mapper_mut().bytes_mut(VirtAddr::new(BASE), 1)[0] ^= 0xFF;

    assert_eq!(
        heap.release(a),
        Err(HeapError::CorruptHeap {
            addr: a,
            kind: Corruption::BadHeaderMagic
        })
    );
}

#[test]
fn test_release_outside_heap_is_corruption() {
    let mut heap = small_heap();

    assert!(matches!(
        heap.release(VirtAddr::new(BASE + 0x20000)),
        Err(HeapError::CorruptHeap { .. })
    ));
    assert_single_hole(&heap);
}

#[test]
fn test_double_release() {
    let mut heap = small_heap();
    let a = heap.allocate(64, false).unwrap();
    heap.allocate(64, false).unwrap();

    heap.release(a).unwrap();
    let before = heap.verify().unwrap();

    assert_eq!(
        heap.release(a),
        Err(HeapError::CorruptHeap {
            addr: a,
            kind: Corruption::DoubleRelease
        })
    );
    assert_eq!(heap.verify().unwrap(), before);
}

#[test]
fn test_random_workload_conserves_bytes() {
    let mut heap = heap_with(&config(0x10000, 0x10000, 0x200000), 256, usize::MAX);
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = move || {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed >> 33
    };
    let mut live: Vec<(VirtAddr, usize, u8)> = Vec::new();

    for round in 0..600u32 {
        let roll = next();
        if live.len() < 64 && (live.is_empty() || roll % 3 != 0) {
            let size = (next() % 2000 + 1) as usize;
            let addr = heap.allocate(size, next() % 5 == 0).unwrap();
            let tag = round as u8;
            heap.mapper_mut().bytes_mut(addr, size).fill(tag);
            live.push((addr, size, tag));
        } else {
            let (addr, size, tag) = live.swap_remove(next() as usize % live.len());
            assert!(heap.mapper().bytes(addr, size).iter().all(|byte| *byte == tag));
            heap.release(addr).unwrap();
        }

        let stats = heap.verify().unwrap();
        assert_eq!(stats.free + stats.used, stats.total);
        assert_eq!(stats.allocations, live.len());
    }

    for (addr, size, tag) in live {
        assert!(heap.mapper().bytes(addr, size).iter().all(|byte| *byte == tag));
        heap.release(addr).unwrap();
    }
    assert_eq!(heap.size(), 0x10000);
    assert_single_hole(&heap);
}

#[test]
fn test_page_flags() {
    let user = HeapConfig {
        supervisor: false,
        readonly: true,
        ..config(0x10000, 0x10000, 0x100000)
    };
    let mut heap = heap_with(&user, 64, usize::MAX);
    heap.allocate(0x20000, false).unwrap();

    // the initial range carries the first tags and stays writable
    let grown = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    let initial = grown | PageTableFlags::WRITABLE;
    assert_eq!(heap.mapper().flags, vec![initial, grown]);
    assert_eq!(
        HeapConfig::KERNEL.page_flags(),
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE
    );
}

#[test]
fn test_invalid_config() {
    let bad = [
        HeapConfig {
            start: VirtAddr::new(BASE + 8),
            ..config(0x10000, 0x10000, 0x100000)
        },
        config(0x10000, 0x20000, 0x100000),
        config(0x20000, 0x10000, 0x10000),
        config(0x10800, 0x10000, 0x100000),
        config(0, 0, 0x100000),
        // ends exactly on the canonical boundary
        HeapConfig {
            start: VirtAddr::new(0x7FFF_FFFF_0000),
            ..config(0x10000, 0x10000, 0x10000)
        },
        // reaches across the non-canonical hole
        HeapConfig {
            start: VirtAddr::new(0x7FFF_FFFF_0000),
            ..config(0x10000, 0x10000, 0xFFFF_0000_0001_0000)
        },
    ];

    for config in bad {
        let slots = Vec::leak(vec![Hole::EMPTY; 8]);
        assert!(matches!(
            Heap::new(&config, slots, ArenaMapper::new(0x200000, usize::MAX)),
            Err(HeapError::InvalidArgument)
        ));
    }

    let empty: &mut [Hole] = &mut [];
    assert!(matches!(
        Heap::new(
            &config(0x10000, 0x10000, 0x100000),
            empty,
            ArenaMapper::new(0x100000, usize::MAX)
        ),
        Err(HeapError::InvalidArgument)
    ));
}

fn locked_heap() -> LockedHeap<ArenaMapper> {
    let locked = LockedHeap::empty();
    locked.init(heap_with(&config(0x10000, 0x10000, 0x100000), 64, usize::MAX));
    locked
}

#[test]
fn test_locked_heap_needs_init() {
    let locked = LockedHeap::<ArenaMapper>::empty();

    assert!(!locked.is_initialized());
    assert_eq!(locked.allocate(8, false), Err(HeapError::NotInitialized));
    assert_eq!(locked.release(VirtAddr::new(BASE + 16)), Err(HeapError::NotInitialized));
    assert_eq!(locked.verify(), Err(HeapError::NotInitialized));
}

#[test]
#[should_panic(expected = "Heap already initialized")]
fn test_locked_heap_init_twice() {
    let locked = locked_heap();
    locked.init(heap_with(&config(0x10000, 0x10000, 0x100000), 64, usize::MAX));
}

#[test]
fn test_locked_heap_round_trip() {
    let locked = locked_heap();

    let a = locked.allocate(100, false).unwrap();
    let b = locked.allocate(100, true).unwrap();
    assert_eq!(b.as_u64() % PAGE_SIZE, 0);
    assert_eq!(locked.verify().unwrap().allocations, 2);

    locked.release(a).unwrap();
    locked.release(b).unwrap();
    assert_eq!(locked.verify().unwrap().holes, 1);
}

#[test]
#[should_panic(expected = "heap corruption")]
fn test_locked_heap_panics_on_corruption() {
    let locked = locked_heap();
    let a = locked.allocate(64, false).unwrap();

    locked
        .with_heap(|heap| heap.mapper_mut().bytes_mut(VirtAddr::new(BASE + 80), 1)[0] ^= 0xFF)
        .unwrap();

    let _ = locked.release(a);
}

#[test]
fn test_global_dealloc_survives_full_index() {
    let locked = LockedHeap::empty();
    locked.init(heap_with(&config(0x10000, 0x10000, 0x100000), 3, usize::MAX));
    let layout = Layout::from_size_align(16, 8).unwrap();

    let blocks: Vec<*mut u8> = (0..6).map(|_| unsafe { locked.alloc(layout) }).collect();
    assert!(blocks.iter().all(|block| !block.is_null()));
    unsafe {
        locked.dealloc(blocks[0], layout);
        locked.dealloc(blocks[2], layout);

        // no slot for a new hole, the block is leaked
        locked.dealloc(blocks[4], layout);
    }

    let stats = locked.verify().unwrap();
    assert_eq!(stats.holes, 3);
    assert_eq!(stats.allocations, 4);
}

#[test]
fn test_global_alloc_layouts() {
    let locked = locked_heap();

    unsafe {
        let small = locked.alloc(Layout::from_size_align(24, 8).unwrap());
        assert!(!small.is_null());
        assert_eq!(small as u64 % 16, 0);

        let wide = locked.alloc(Layout::from_size_align(100, 64).unwrap());
        assert!(!wide.is_null());
        assert_eq!(wide as u64 % PAGE_SIZE, 0);

        let huge_align = locked.alloc(Layout::from_size_align(8, 8192).unwrap());
        assert!(huge_align.is_null());

        locked.dealloc(small, Layout::from_size_align(24, 8).unwrap());
        locked.dealloc(wide, Layout::from_size_align(100, 64).unwrap());
    }

    assert_eq!(locked.verify().unwrap().allocations, 0);
}
