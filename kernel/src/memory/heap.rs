//! Boundary-tag kernel heap.
//!
//! Design summary:
//! - The heap owns `[start, end)`, which may grow up to `max` and shrink down
//!   to `start + min_size`, one page at a time, through a [`PageMapper`].
//! - Every byte of `[start, end)` belongs to exactly one block. A block opens
//!   with a 16 byte header (`magic`, `hole`, `size`) and closes with a 16 byte
//!   footer (`magic`, header address).
//! - Free blocks ("holes") are indexed smallest first in an [`OrderedIndex`],
//!   so the first hole that fits is the best fit.
//! - Holes are split on allocation and eagerly coalesced with their neighbours
//!   on release; two holes are never adjacent.
//!
//! Tags are only ever read and written through byte views handed out by the
//! mapper, never through raw pointer casts.

use core::fmt;

use x86_64::{
    VirtAddr,
    structures::paging::{PageTableFlags, Size4KiB, mapper::MapToError},
};

use crate::{debug, error, warn};

use super::{
    PAGE_SIZE,
    alloc::HeapConfig,
    index::{IndexError, OrderedIndex, Precedes},
    mapper::{PageMapper, page_range},
};

/// Validity tag stored in every header and footer.
pub const HEAP_MAGIC: u32 = 0xBEEF_ACED;
/// Size of a block header in bytes.
pub const HEADER_SIZE: u64 = 16;
/// Size of a block footer in bytes.
pub const FOOTER_SIZE: u64 = 16;
/// Bytes of bookkeeping per block, and the smallest possible block.
pub const BLOCK_OVERHEAD: u64 = HEADER_SIZE + FOOTER_SIZE;
/// Every block size is a multiple of this, keeping tags and payloads aligned.
pub const BLOCK_ALIGN: u64 = 16;

/// Errors reported by the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Zero or overflowing size, or an unusable heap configuration.
    InvalidArgument,
    /// No hole fits and the heap cannot grow, or the index is full.
    OutOfMemory,
    /// A boundary tag or the index no longer describes the heap.
    CorruptHeap { addr: VirtAddr, kind: Corruption },
    /// The heap was used before it was set up.
    NotInitialized,
}

/// What [`HeapError::CorruptHeap`] found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    BadHeaderMagic,
    BadFooterMagic,
    /// The footer does not point back at the header of its block.
    DanglingFooter,
    /// The header size is too small or runs past the end of the heap.
    BadSize,
    /// The block being released is already a hole.
    DoubleRelease,
    /// Blocks do not tile the heap exactly.
    Gap,
    AdjacentHoles,
    /// Index entries and hole headers disagree.
    IndexMismatch,
    Unsorted,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::InvalidArgument => write!(f, "invalid heap argument"),
            HeapError::OutOfMemory => write!(f, "heap out of memory"),
            HeapError::CorruptHeap { addr, kind } => {
                write!(f, "heap corruption at {:#x}: {:?}", addr.as_u64(), kind)
            }
            HeapError::NotInitialized => write!(f, "heap not initialized"),
        }
    }
}

impl core::error::Error for HeapError {}

impl From<IndexError> for HeapError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::CapacityExceeded => HeapError::OutOfMemory,
            IndexError::OutOfRange => HeapError::CorruptHeap {
                addr: VirtAddr::zero(),
                kind: Corruption::IndexMismatch,
            },
        }
    }
}

impl From<MapToError<Size4KiB>> for HeapError {
    fn from(_: MapToError<Size4KiB>) -> Self {
        HeapError::OutOfMemory
    }
}

/// An index entry: a hole header and the size it was indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hole {
    pub header: VirtAddr,
    pub size: u64,
}

impl Hole {
    /// Filler for index slots that hold no entry yet.
    pub const EMPTY: Hole = Hole {
        header: VirtAddr::zero(),
        size: 0,
    };
}

/// Orders holes by ascending size, the heap's free-list order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BySize;

impl Precedes<Hole> for BySize {
    fn precedes(&self, a: &Hole, b: &Hole) -> bool {
        a.size < b.size
    }
}

/// Orders holes by ascending header address.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByAddress;

impl Precedes<Hole> for ByAddress {
    fn precedes(&self, a: &Hole, b: &Hole) -> bool {
        a.header < b.header
    }
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    magic: u32,
    hole: bool,
    size: u64,
}

impl Header {
    fn new(size: u64, hole: bool) -> Self {
        Header {
            magic: HEAP_MAGIC,
            hole,
            size,
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        Header {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            hole: bytes[4] != 0,
            size: u64::from_le_bytes(word(&bytes[8..16])),
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4] = self.hole as u8;
        bytes[5..8].fill(0);
        bytes[8..16].copy_from_slice(&self.size.to_le_bytes());
    }

    fn is_valid(&self) -> bool {
        self.magic == HEAP_MAGIC
    }
}

/// Decoded block footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Footer {
    magic: u32,
    header: u64,
}

impl Footer {
    fn new(header: u64) -> Self {
        Footer {
            magic: HEAP_MAGIC,
            header,
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        Footer {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            header: u64::from_le_bytes(word(&bytes[8..16])),
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].fill(0);
        bytes[8..16].copy_from_slice(&self.header.to_le_bytes());
    }

    fn is_valid(&self) -> bool {
        self.magic == HEAP_MAGIC
    }
}

fn word(bytes: &[u8]) -> [u8; 8] {
    let mut word = [0; 8];
    word.copy_from_slice(bytes);
    word
}

#[inline]
fn align_up_checked(value: u64, align: u64) -> Option<u64> {
    value.checked_next_multiple_of(align)
}

/// Bytes to skip after a hole header at `header` so the payload of a block
/// placed there starts on a page boundary.
///
/// The skipped bytes become a hole of their own, so the result is either zero
/// or at least [`BLOCK_OVERHEAD`].
fn page_padding(header: u64) -> u64 {
    let payload = header + HEADER_SIZE;
    let pad = payload.next_multiple_of(PAGE_SIZE) - payload;
    if pad != 0 && pad < BLOCK_OVERHEAD {
        pad + PAGE_SIZE
    } else {
        pad
    }
}

/// Result of a full walk over the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes currently backed, `end - start`.
    pub total: u64,
    /// Bytes in holes, tags included.
    pub free: u64,
    /// Bytes in allocated blocks, tags included.
    pub used: u64,
    pub holes: usize,
    pub allocations: usize,
    pub largest_hole: u64,
}

/// A growable boundary-tag heap over `[start, end)`.
pub struct Heap<'a, M: PageMapper> {
    index: OrderedIndex<'a, Hole, BySize>,
    start: u64,
    end: u64,
    max: u64,
    min_size: u64,
    flags: PageTableFlags,
    mapper: M,
}

impl<'a, M: PageMapper> Heap<'a, M> {
    /// Maps the initial range described by `config` and lays one hole over it.
    ///
    /// `slots` becomes the storage of the hole index; its length caps the
    /// number of holes the heap can track.
    pub fn new(config: &HeapConfig, slots: &'a mut [Hole], mut mapper: M) -> Result<Self, HeapError> {
        let start = config.start.as_u64();
        let page_aligned = |value: u64| value % PAGE_SIZE == 0;
        if !page_aligned(start)
            || !page_aligned(config.initial_size)
            || !page_aligned(config.min_size)
            || !page_aligned(config.max_size)
            || config.initial_size == 0
            || config.min_size > config.initial_size
            || config.initial_size > config.max_size
            || slots.is_empty()
        {
            return Err(HeapError::InvalidArgument);
        }
        let end = start
            .checked_add(config.initial_size)
            .ok_or(HeapError::InvalidArgument)?;
        // the whole reserved range, end included, must be canonical and on
        // the same side of the address space hole as `start`
        let max = start
            .checked_add(config.max_size)
            .filter(|max| VirtAddr::try_new(*max).is_ok() && max >> 47 == start >> 47)
            .ok_or(HeapError::InvalidArgument)?;

        // tags are written into the initial range, so it is always writable
        let flags = config.page_flags();
        mapper.map(
            page_range(VirtAddr::new(start), VirtAddr::new(end)),
            flags | PageTableFlags::WRITABLE,
        )?;

        let mut heap = Heap {
            index: OrderedIndex::new(slots, BySize),
            start,
            end,
            max,
            min_size: config.min_size,
            flags,
            mapper,
        };
        heap.write_block(start, config.initial_size, true);
        heap.index.insert(Hole {
            header: VirtAddr::new(start),
            size: config.initial_size,
        })?;

        debug!(
            "heap created at {:#x}..{:#x} (max {:#x}, {} index slots)",
            start,
            end,
            max,
            heap.index.capacity()
        );
        Ok(heap)
    }

    pub fn start(&self) -> VirtAddr {
        VirtAddr::new(self.start)
    }

    pub fn end(&self) -> VirtAddr {
        VirtAddr::new(self.end)
    }

    pub fn max(&self) -> VirtAddr {
        VirtAddr::new(self.max)
    }

    /// Bytes currently backed.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Indexed holes, smallest first.
    pub fn holes(&self) -> impl Iterator<Item = Hole> + '_ {
        self.index.iter().copied()
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut M {
        &mut self.mapper
    }

    /// Allocates `size` bytes and returns the payload address.
    ///
    /// With `align_to_page` the payload starts on a page boundary.
    pub fn allocate(&mut self, size: usize, align_to_page: bool) -> Result<VirtAddr, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidArgument);
        }
        let block = (size as u64)
            .checked_add(BLOCK_OVERHEAD)
            .and_then(|total| align_up_checked(total, BLOCK_ALIGN))
            .ok_or(HeapError::InvalidArgument)?;

        // an allocation adds at most two entries (a leading and a trailing hole)
        if self.index.len() + 2 > self.index.capacity() {
            warn!("heap index full, refusing allocation of {} bytes", size);
            return Err(HeapError::OutOfMemory);
        }

        let rank = match self.find_hole(block, align_to_page) {
            Some(rank) => rank,
            None => {
                self.grow(block, align_to_page)?;
                self.find_hole(block, align_to_page)
                    .ok_or(HeapError::CorruptHeap {
                        addr: VirtAddr::new(self.end),
                        kind: Corruption::IndexMismatch,
                    })?
            }
        };

        let hole = self.index.remove(rank)?;
        let mut pos = hole.header.as_u64();
        let mut avail = hole.size;

        if align_to_page {
            let pad = page_padding(pos);
            if pad != 0 {
                self.write_block(pos, pad, true);
                self.index.insert(Hole {
                    header: VirtAddr::new(pos),
                    size: pad,
                })?;
                pos += pad;
                avail -= pad;
            }
        }

        let mut block_size = block;
        let rest = avail - block;
        if rest < BLOCK_OVERHEAD {
            block_size = avail;
        } else {
            self.write_block(pos + block, rest, true);
            self.index.insert(Hole {
                header: VirtAddr::new(pos + block),
                size: rest,
            })?;
        }

        self.write_block(pos, block_size, false);
        Ok(VirtAddr::new(pos + HEADER_SIZE))
    }

    /// Returns the block whose payload starts at `addr` to the heap.
    ///
    /// Releasing the null address does nothing. The block's tags are checked
    /// before anything is touched; on [`HeapError::CorruptHeap`] the heap is
    /// left as it was.
    pub fn release(&mut self, addr: VirtAddr) -> Result<(), HeapError> {
        if addr.is_null() {
            return Ok(());
        }

        let (header_at, size) = self.checked_block(addr.as_u64())?;

        let left = self.left_hole(header_at);
        let right = self.right_hole(header_at + size);

        // a block that contraction swallows whole needs no index entry
        let consumed = header_at + size == self.end && self.contracted_end(header_at) == header_at;
        if left.is_none() && right.is_none() && !consumed && self.index.is_full() {
            warn!("heap index full, leaking block at {:#x}", header_at);
            return Err(HeapError::OutOfMemory);
        }

        let mut block_start = header_at;
        let mut block_size = size;

        if let Some(left) = left {
            self.unindex(left)?;
            self.scrub(header_at - FOOTER_SIZE);
            self.scrub(header_at);
            block_start = left.header.as_u64();
            block_size += left.size;
        }

        if let Some(right) = right {
            self.unindex(right)?;
            self.scrub(header_at + size - FOOTER_SIZE);
            self.scrub(header_at + size);
            block_size += right.size;
        }

        if block_start + block_size == self.end {
            block_size = self.contract(block_start);
        }

        if block_size > 0 {
            self.write_block(block_start, block_size, true);
            self.index.insert(Hole {
                header: VirtAddr::new(block_start),
                size: block_size,
            })?;
        }

        Ok(())
    }

    /// Walks the whole heap and checks every structural invariant.
    pub fn verify(&self) -> Result<HeapStats, HeapError> {
        let corrupt = |at: u64, kind| HeapError::CorruptHeap {
            addr: VirtAddr::new(at),
            kind,
        };

        let mut stats = HeapStats {
            total: self.end - self.start,
            ..HeapStats::default()
        };
        let mut previous_was_hole = false;
        let mut at = self.start;

        while at < self.end {
            let header = self
                .header(at)
                .filter(Header::is_valid)
                .ok_or(corrupt(at, Corruption::BadHeaderMagic))?;
            if header.size < BLOCK_OVERHEAD
                || header.size % BLOCK_ALIGN != 0
                || header.size > self.end - at
            {
                return Err(corrupt(at, Corruption::BadSize));
            }

            let footer = self
                .footer(at + header.size - FOOTER_SIZE)
                .filter(Footer::is_valid)
                .ok_or(corrupt(at, Corruption::BadFooterMagic))?;
            if footer.header != at {
                return Err(corrupt(at, Corruption::DanglingFooter));
            }

            if header.hole {
                if previous_was_hole {
                    return Err(corrupt(at, Corruption::AdjacentHoles));
                }
                let indexed = self
                    .index
                    .iter()
                    .filter(|hole| hole.header.as_u64() == at)
                    .count();
                let entry = Hole {
                    header: VirtAddr::new(at),
                    size: header.size,
                };
                if indexed != 1 || !self.index.iter().any(|hole| *hole == entry) {
                    return Err(corrupt(at, Corruption::IndexMismatch));
                }

                stats.holes += 1;
                stats.free += header.size;
                stats.largest_hole = stats.largest_hole.max(header.size);
            } else {
                stats.allocations += 1;
                stats.used += header.size;
            }

            previous_was_hole = header.hole;
            at += header.size;
        }

        if at != self.end {
            return Err(corrupt(at, Corruption::Gap));
        }
        if stats.holes != self.index.len() {
            return Err(corrupt(self.start, Corruption::IndexMismatch));
        }
        if !self.index.is_sorted() {
            return Err(corrupt(self.start, Corruption::Unsorted));
        }

        Ok(stats)
    }

    /// Logs every block, in address order.
    pub fn dump(&self) {
        debug!(
            "heap {:#x}..{:#x} (max {:#x}), {} holes indexed",
            self.start,
            self.end,
            self.max,
            self.index.len()
        );

        let mut at = self.start;
        while at < self.end {
            let Some(header) = self.header(at).filter(Header::is_valid) else {
                debug!("  {:#x}: unreadable header, stopping", at);
                return;
            };
            if header.size < BLOCK_OVERHEAD || header.size > self.end - at {
                debug!("  {:#x}: bad size {:#x}, stopping", at, header.size);
                return;
            }

            let footer_at = at + header.size - FOOTER_SIZE;
            let back = self.footer(footer_at).map_or(0, |footer| footer.header);
            debug!(
                "  {:#x} <= {} => {:#x} <= {:#x} => {:#x} <= {} => {:#x} [{}] footer says header at {:#x}",
                at,
                HEADER_SIZE,
                at + HEADER_SIZE,
                header.size - BLOCK_OVERHEAD,
                footer_at,
                FOOTER_SIZE,
                at + header.size,
                if header.hole { "hole" } else { "used" },
                back
            );
            at += header.size;
        }
    }

    /// Returns the rank of the smallest hole that fits a `block` byte block.
    fn find_hole(&self, block: u64, align_to_page: bool) -> Option<usize> {
        self.index.position(|hole| {
            let pad = if align_to_page {
                page_padding(hole.header.as_u64())
            } else {
                0
            };
            pad.checked_add(block)
                .is_some_and(|needed| hole.size >= needed)
        })
    }

    /// Extends the heap so its trailing hole fits a `block` byte block.
    fn grow(&mut self, block: u64, align_to_page: bool) -> Result<(), HeapError> {
        let trailing = self.trailing_hole();
        let (hole_start, hole_size) = trailing.map_or((self.end, 0), |hole| (hole.header.as_u64(), hole.size));

        let pad = if align_to_page { page_padding(hole_start) } else { 0 };
        let needed = pad
            .checked_add(block)
            .ok_or(HeapError::OutOfMemory)?
            .saturating_sub(hole_size)
            .max(PAGE_SIZE);
        let extra = align_up_checked(needed, PAGE_SIZE).ok_or(HeapError::OutOfMemory)?;
        let new_end = self
            .end
            .checked_add(extra)
            .filter(|new_end| *new_end <= self.max)
            .ok_or_else(|| {
                warn!(
                    "heap cannot grow by {:#x} bytes past {:#x} (max {:#x})",
                    extra, self.end, self.max
                );
                HeapError::OutOfMemory
            })?;

        self.mapper
            .map(page_range(VirtAddr::new(self.end), VirtAddr::new(new_end)), self.flags)
            .inspect_err(|_| {
                warn!("out of frames growing heap to {:#x}", new_end);
            })?;

        if let Some(hole) = trailing {
            self.unindex(hole)?;
            self.scrub(self.end - FOOTER_SIZE);
        }
        let grown = Hole {
            header: VirtAddr::new(hole_start),
            size: hole_size + extra,
        };
        debug!("heap grown {:#x} -> {:#x}", self.end, new_end);
        self.end = new_end;
        self.write_block(hole_start, grown.size, true);
        self.index.insert(grown)?;
        Ok(())
    }

    /// Shrinks the heap toward `block_start`, the start of the hole that ends
    /// it, and returns how many bytes of that hole remain.
    fn contract(&mut self, block_start: u64) -> u64 {
        let new_end = self.contracted_end(block_start);
        if new_end < self.end {
            self.mapper
                .unmap(page_range(VirtAddr::new(new_end), VirtAddr::new(self.end)));
            debug!("heap contracted {:#x} -> {:#x}", self.end, new_end);
            self.end = new_end;
        }

        self.end - block_start
    }

    /// Where the heap would end after contracting toward `block_start`.
    ///
    /// Never leaves a remnant hole smaller than [`BLOCK_OVERHEAD`] and never
    /// goes below `min_size`.
    fn contracted_end(&self, block_start: u64) -> u64 {
        let mut keep = (block_start - self.start).next_multiple_of(PAGE_SIZE);
        let remnant = self.start + keep - block_start;
        if remnant != 0 && remnant < BLOCK_OVERHEAD {
            keep += PAGE_SIZE;
        }
        self.start + keep.max(self.min_size)
    }

    /// The hole ending at `end`, if the last block is one.
    fn trailing_hole(&self) -> Option<Hole> {
        if self.end - self.start < BLOCK_OVERHEAD {
            return None;
        }
        let footer = self.footer(self.end - FOOTER_SIZE).filter(Footer::is_valid)?;
        self.hole_at(footer.header)
            .filter(|hole| hole.header.as_u64() + hole.size == self.end)
    }

    /// The hole whose block ends right before `header_at`, if any.
    fn left_hole(&self, header_at: u64) -> Option<Hole> {
        if header_at < self.start + BLOCK_OVERHEAD {
            return None;
        }
        let footer = self.footer(header_at - FOOTER_SIZE).filter(Footer::is_valid)?;
        self.hole_at(footer.header)
            .filter(|hole| hole.header.as_u64() + hole.size == header_at)
    }

    /// The hole opening at `header_at`, if any.
    fn right_hole(&self, header_at: u64) -> Option<Hole> {
        if header_at >= self.end {
            return None;
        }
        self.hole_at(header_at)
    }

    fn hole_at(&self, at: u64) -> Option<Hole> {
        let header = self.header(at).filter(|header| header.is_valid() && header.hole)?;
        Some(Hole {
            header: VirtAddr::new(at),
            size: header.size,
        })
    }

    /// Checks the tags of the allocated block behind `payload` and returns its
    /// header address and size.
    fn checked_block(&self, payload: u64) -> Result<(u64, u64), HeapError> {
        let corrupt = |kind| {
            error!("heap corruption releasing {:#x}: {:?}", payload, kind);
            HeapError::CorruptHeap {
                addr: VirtAddr::new(payload),
                kind,
            }
        };

        if payload < self.start + HEADER_SIZE || payload >= self.end {
            return Err(corrupt(Corruption::BadHeaderMagic));
        }
        let header_at = payload - HEADER_SIZE;
        let header = self
            .header(header_at)
            .filter(Header::is_valid)
            .ok_or_else(|| corrupt(Corruption::BadHeaderMagic))?;
        if header.size < BLOCK_OVERHEAD || header.size > self.end - header_at {
            return Err(corrupt(Corruption::BadSize));
        }

        let footer = self
            .footer(header_at + header.size - FOOTER_SIZE)
            .filter(Footer::is_valid)
            .ok_or_else(|| corrupt(Corruption::BadFooterMagic))?;
        if footer.header != header_at {
            return Err(corrupt(Corruption::DanglingFooter));
        }
        if header.hole {
            return Err(corrupt(Corruption::DoubleRelease));
        }

        Ok((header_at, header.size))
    }

    /// Drops `hole` from the index.
    fn unindex(&mut self, hole: Hole) -> Result<(), HeapError> {
        let rank = self
            .index
            .position(|entry| *entry == hole)
            .ok_or(HeapError::CorruptHeap {
                addr: hole.header,
                kind: Corruption::IndexMismatch,
            })?;
        self.index.remove(rank)?;
        Ok(())
    }

    fn header(&self, at: u64) -> Option<Header> {
        self.tag(at).map(Header::decode)
    }

    fn footer(&self, at: u64) -> Option<Footer> {
        self.tag(at).map(Footer::decode)
    }

    /// The 16 bytes at `at`, if they lie inside the heap.
    fn tag(&self, at: u64) -> Option<&[u8]> {
        let offset = at.checked_sub(self.start)?;
        if offset.checked_add(HEADER_SIZE)? > self.end - self.start {
            return None;
        }
        let offset = offset as usize;
        let bytes = self.mapper.bytes(VirtAddr::new(self.start), (self.end - self.start) as usize);
        Some(&bytes[offset..offset + HEADER_SIZE as usize])
    }

    fn tag_mut(&mut self, at: u64) -> &mut [u8] {
        let offset = (at - self.start) as usize;
        let bytes = self
            .mapper
            .bytes_mut(VirtAddr::new(self.start), (self.end - self.start) as usize);
        &mut bytes[offset..offset + HEADER_SIZE as usize]
    }

    /// Writes the header and footer of a `size` byte block at `at`.
    fn write_block(&mut self, at: u64, size: u64, hole: bool) {
        Header::new(size, hole).encode(self.tag_mut(at));
        Footer::new(at).encode(self.tag_mut(at + size - FOOTER_SIZE));
    }

    /// Wipes a tag that now sits inside a merged block.
    fn scrub(&mut self, at: u64) {
        self.tag_mut(at).fill(0);
    }
}
