//! # String Heap
//!
//! Side allocator for variable-width payloads. The row arena stays
//! fixed-stride because strings, blobs and serialized complex values live
//! here; rows hold 16-byte views pointing at header-prefixed chunks.
//!
//! ## Chunk Layout
//!
//! ```text
//! +----------------+---------------------------+
//! | ChunkHeader 8B | payload (size bytes)      |
//! | size | flags   | data ... [next ptr 8B]    |
//! +----------------+---------------------------+
//! ```
//!
//! A payload longer than [`MAX_CHUNK_PAYLOAD`] is split into a multipart
//! chain: each non-final chunk sets the CONTINUED flag and stores the
//! address of the next chunk's header in its last 8 payload bytes. Chunks
//! are carved from segments that never move, so a chunk pointer is stable
//! until `clear`.
//!
//! ## Views
//!
//! - [`StringView`]: 16 bytes; strings up to 12 bytes are stored inline
//!   (4 size bytes + 12 data bytes), longer ones carry a 4-byte prefix and
//!   a pointer to the first chunk. The inline predicate is stable across
//!   store and extract.
//! - [`HeapView`]: pointer + length over a serialized complex payload.
//!
//! ## Freeing
//!
//! `free` marks a chain's chunks and returns their bytes to the free-space
//! accounting. Space is reclaimed wholesale on `clear`; the container's
//! row-level free list makes fine-grained reuse unnecessary.

use std::sync::Arc;

use eyre::Result;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{HEAP_SEGMENT_SIZE, MAX_CHUNK_PAYLOAD, STRING_INLINE_CAPACITY};
use crate::memory::{MemoryBudget, Pool};

pub const CHUNK_HEADER_SIZE: usize = 8;
const NEXT_POINTER_SIZE: usize = 8;

const FLAG_CONTINUED: u32 = 1;
const FLAG_FREE: u32 = 2;

/// Metadata immediately before a chunk's payload bytes.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ChunkHeader {
    size: U32,
    flags: U32,
}

impl ChunkHeader {
    #[inline]
    pub fn size(&self) -> usize {
        self.size.get() as usize
    }

    #[inline]
    pub fn is_continued(&self) -> bool {
        self.flags.get() & FLAG_CONTINUED != 0
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.flags.get() & FLAG_FREE != 0
    }

    fn set_free(&mut self) {
        self.flags = U32::new(self.flags.get() | FLAG_FREE);
    }

    /// Payload bytes that hold caller data; a continued chunk gives up its
    /// tail to the next pointer.
    #[inline]
    pub fn data_size(&self) -> usize {
        if self.is_continued() {
            self.size() - NEXT_POINTER_SIZE
        } else {
            self.size()
        }
    }
}

/// 16-byte string view: inline bytes for short strings, prefix + chunk
/// pointer for long ones.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StringView {
    size: u32,
    prefix: [u8; 4],
    rest: [u8; 8],
}

impl StringView {
    pub fn empty() -> Self {
        Self {
            size: 0,
            prefix: [0; 4],
            rest: [0; 8],
        }
    }

    /// Inline view over at most [`STRING_INLINE_CAPACITY`] bytes.
    pub fn inline_from(data: &[u8]) -> Self {
        debug_assert!(data.len() <= STRING_INLINE_CAPACITY);
        let mut view = Self::empty();
        view.size = data.len() as u32;
        let split = data.len().min(4);
        view.prefix[..split].copy_from_slice(&data[..split]);
        view.rest[..data.len() - split].copy_from_slice(&data[split..]);
        view
    }

    /// View over heap-resident bytes; keeps the first 4 bytes inline so
    /// short-circuit comparisons can skip the dereference.
    pub fn out_of_line(data_ptr: *const u8, data: &[u8]) -> Self {
        debug_assert!(data.len() > STRING_INLINE_CAPACITY);
        let mut view = Self::empty();
        view.size = data.len() as u32;
        view.prefix.copy_from_slice(&data[..4]);
        view.rest = (data_ptr as usize as u64).to_le_bytes();
        view
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.len() <= STRING_INLINE_CAPACITY
    }

    /// Inline payload; `prefix` and `rest` are adjacent under `repr(C)`.
    pub fn inline_bytes(&self) -> &[u8] {
        debug_assert!(self.is_inline());
        unsafe { std::slice::from_raw_parts(self.prefix.as_ptr(), self.len()) }
    }

    pub fn data_ptr(&self) -> *const u8 {
        debug_assert!(!self.is_inline());
        u64::from_le_bytes(self.rest) as usize as *const u8
    }
}

/// Pointer + length over a serialized complex payload in the heap.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapView {
    ptr: u64,
    len: u64,
}

impl HeapView {
    pub fn empty() -> Self {
        Self { ptr: 0, len: 0 }
    }

    pub fn new(ptr: *const u8, len: usize) -> Self {
        Self {
            ptr: ptr as usize as u64,
            len: len as u64,
        }
    }

    #[inline]
    pub fn ptr(&self) -> *const u8 {
        self.ptr as usize as *const u8
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr == 0
    }
}

struct Segment {
    data: Box<[u8]>,
    fill: usize,
}

pub struct StringHeap {
    budget: Arc<MemoryBudget>,
    segments: Vec<Segment>,
    cumulative_allocated: u64,
    freed_bytes: usize,
}

impl StringHeap {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self {
            budget,
            segments: Vec::new(),
            cumulative_allocated: 0,
            freed_bytes: 0,
        }
    }

    /// Header of the chunk whose payload starts at `ptr`.
    pub fn header_of(ptr: *const u8) -> *mut ChunkHeader {
        unsafe { ptr.sub(CHUNK_HEADER_SIZE) as *mut ChunkHeader }
    }

    /// Copies `data` into the heap as a (possibly multipart) chain and
    /// returns the first chunk's payload pointer.
    pub fn allocate(&mut self, data: &[u8]) -> Result<*mut u8> {
        debug_assert!(!data.is_empty());
        let mut remaining = data;
        let mut head: *mut u8 = std::ptr::null_mut();
        // Location in the previous chunk where the next-chunk address goes.
        let mut pending_link: *mut u8 = std::ptr::null_mut();

        loop {
            let continued = remaining.len() > MAX_CHUNK_PAYLOAD;
            let data_len = if continued {
                MAX_CHUNK_PAYLOAD - NEXT_POINTER_SIZE
            } else {
                remaining.len()
            };
            let payload = data_len + if continued { NEXT_POINTER_SIZE } else { 0 };
            let chunk = self.allocate_chunk(payload, continued)?;

            unsafe {
                std::ptr::copy_nonoverlapping(remaining.as_ptr(), chunk, data_len);
                if !pending_link.is_null() {
                    let header_addr = Self::header_of(chunk) as usize as u64;
                    std::ptr::copy_nonoverlapping(
                        header_addr.to_le_bytes().as_ptr(),
                        pending_link,
                        NEXT_POINTER_SIZE,
                    );
                }
            }
            if head.is_null() {
                head = chunk;
            }

            if !continued {
                return Ok(head);
            }
            pending_link = unsafe { chunk.add(data_len) };
            remaining = &remaining[data_len..];
        }
    }

    fn allocate_chunk(&mut self, payload: usize, continued: bool) -> Result<*mut u8> {
        let needed = CHUNK_HEADER_SIZE + payload;
        let needs_segment = match self.segments.last() {
            Some(segment) => segment.data.len() - segment.fill < needed,
            None => true,
        };
        if needs_segment {
            self.budget.allocate(Pool::Heap, HEAP_SEGMENT_SIZE)?;
            self.segments.push(Segment {
                data: vec![0u8; HEAP_SEGMENT_SIZE].into_boxed_slice(),
                fill: 0,
            });
        }

        let segment = self.segments.last_mut().expect("segment just ensured");
        let offset = segment.fill;
        segment.fill += needed;
        self.cumulative_allocated += needed as u64;

        let header = ChunkHeader {
            size: U32::new(payload as u32),
            flags: U32::new(if continued { FLAG_CONTINUED } else { 0 }),
        };
        segment.data[offset..offset + CHUNK_HEADER_SIZE].copy_from_slice(header.as_bytes());
        Ok(unsafe { segment.data.as_mut_ptr().add(offset + CHUNK_HEADER_SIZE) })
    }

    /// Stores `data` into the row slot at `offset` as a `StringView`,
    /// inline when short enough.
    pub fn copy_multipart(&mut self, data: &[u8], row: *mut u8, offset: usize) -> Result<()> {
        let view = if data.len() <= STRING_INLINE_CAPACITY {
            StringView::inline_from(data)
        } else {
            let ptr = self.allocate(data)?;
            StringView::out_of_line(ptr, data)
        };
        unsafe { std::ptr::write_unaligned(row.add(offset) as *mut StringView, view) };
        Ok(())
    }

    /// Marks the chain starting at `ptr` free. Bytes return to the
    /// free-space accounting; the memory itself is reclaimed on `clear`.
    pub fn free(&mut self, ptr: *const u8) {
        let mut header = Self::header_of(ptr);
        loop {
            let chunk = unsafe { &mut *header };
            debug_assert!(!chunk.is_free(), "double free of heap chunk");
            chunk.set_free();
            self.freed_bytes += CHUNK_HEADER_SIZE + chunk.size();
            if !chunk.is_continued() {
                break;
            }
            let link_at = unsafe { (header as *const u8).add(CHUNK_HEADER_SIZE + chunk.data_size()) };
            let mut addr = [0u8; NEXT_POINTER_SIZE];
            unsafe { std::ptr::copy_nonoverlapping(link_at, addr.as_mut_ptr(), NEXT_POINTER_SIZE) };
            header = u64::from_le_bytes(addr) as usize as *mut ChunkHeader;
        }
    }

    /// Appends `len` logical bytes of the chain starting at `ptr` to `out`.
    pub fn read_into(&self, ptr: *const u8, len: usize, out: &mut Vec<u8>) {
        let mut header = Self::header_of(ptr);
        let mut need = len;
        while need > 0 {
            let chunk = unsafe { &*header };
            let data_len = chunk.data_size().min(need);
            let data_ptr = unsafe { (header as *const u8).add(CHUNK_HEADER_SIZE) };
            out.extend_from_slice(unsafe { std::slice::from_raw_parts(data_ptr, data_len) });
            need -= data_len;
            if need == 0 {
                break;
            }
            debug_assert!(chunk.is_continued(), "chain shorter than requested length");
            let link_at = unsafe { data_ptr.add(chunk.data_size()) };
            let mut addr = [0u8; NEXT_POINTER_SIZE];
            unsafe { std::ptr::copy_nonoverlapping(link_at, addr.as_mut_ptr(), NEXT_POINTER_SIZE) };
            header = u64::from_le_bytes(addr) as usize as *mut ChunkHeader;
        }
    }

    /// Contiguous bytes for a chain: a direct slice when the first chunk
    /// holds everything, otherwise assembled into `scratch`.
    pub fn contiguous<'a>(
        &'a self,
        ptr: *const u8,
        len: usize,
        scratch: &'a mut Vec<u8>,
    ) -> &'a [u8] {
        let header = unsafe { &*Self::header_of(ptr) };
        if header.data_size() >= len {
            return unsafe { std::slice::from_raw_parts(ptr, len) };
        }
        scratch.clear();
        self.read_into(ptr, len, scratch);
        scratch
    }

    /// Monotonic count of bytes ever allocated, headers included. The
    /// container samples it around a store to charge the delta to the
    /// row's variable-size counter.
    pub fn cumulative_allocated(&self) -> u64 {
        self.cumulative_allocated
    }

    pub fn free_space(&self) -> usize {
        let tail: usize = self
            .segments
            .iter()
            .map(|s| s.data.len() - s.fill)
            .sum();
        tail + self.freed_bytes
    }

    pub fn retained_size(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }

    pub fn clear(&mut self) {
        for segment in self.segments.drain(..) {
            self.budget.release(Pool::Heap, segment.data.len());
        }
        self.freed_bytes = 0;
    }
}

impl Drop for StringHeap {
    fn drop(&mut self) {
        self.clear();
    }
}

// Segments are owned exclusively; chunk pointers are only dereferenced
// under the container's single-writer contract.
unsafe impl Send for StringHeap {}
unsafe impl Sync for StringHeap {}
