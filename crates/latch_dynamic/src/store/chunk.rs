// chunk.rs - Fixed-capacity column block
//
// A chunk owns one aligned buffer holding every column of its archetype
// for up to `capacity` entities, plus the per-column change versions and
// disabled-entity counts that the access layer keeps up to date.

use super::ArchetypeLayout;
use crate::component::{BufferMeta, ComponentId, ComponentKind};
use crate::error::{AccessError, AccessResult};
use crate::guard::BorrowState;
use std::alloc::{self, Layout};
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Header at the start of every buffer-component slot.
///
/// `pointer` is null while the elements live inline, right after the
/// header; otherwise it owns an out-of-line allocation of `capacity`
/// elements.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct BufferHeader {
    pub(crate) pointer: *mut u8,
    pub(crate) length: u32,
    pub(crate) capacity: u32,
}

impl BufferHeader {
    pub(crate) fn empty(meta: &BufferMeta) -> Self {
        Self {
            pointer: ptr::null_mut(),
            length: 0,
            capacity: meta.inline_capacity as u32,
        }
    }

    /// Layout of an out-of-line allocation holding `capacity` elements.
    pub(crate) fn heap_layout(meta: &BufferMeta, capacity: usize) -> AccessResult<Layout> {
        capacity
            .checked_mul(meta.elem_size)
            .and_then(|size| Layout::from_size_align(size, meta.elem_align).ok())
            .ok_or_else(|| {
                AccessError::invalid_argument(format!(
                    "buffer of {capacity} elements of {} bytes is not allocatable",
                    meta.elem_size
                ))
            })
    }

    /// Address of the first element.
    ///
    /// # Safety
    /// `slot` must be the address of the slot this header lives at.
    #[inline]
    pub(crate) unsafe fn data(&self, slot: *mut u8, meta: &BufferMeta) -> *mut u8 {
        if self.pointer.is_null() {
            // SAFETY: inline storage lies inside the slot per `BufferMeta::stride`.
            unsafe { slot.add(meta.data_offset()) }
        } else {
            self.pointer
        }
    }

    /// Free the out-of-line allocation, if any, and return to inline storage.
    ///
    /// # Safety
    /// `pointer`, when non-null, must have been allocated with
    /// `heap_layout(meta, capacity)`.
    pub(crate) unsafe fn release(&mut self, meta: &BufferMeta) {
        if !self.pointer.is_null() {
            let layout = Layout::from_size_align_unchecked(
                self.capacity as usize * meta.elem_size,
                meta.elem_align,
            );
            // SAFETY: guaranteed by the caller.
            unsafe { alloc::dealloc(self.pointer, layout) };
            self.pointer = ptr::null_mut();
            self.capacity = meta.inline_capacity as u32;
        }
    }
}

/// One block of entities sharing an archetype.
///
/// The buffer is addressed only through raw pointers derived from
/// `buffer`; shared references to a chunk may be handed to many worker
/// jobs at once, each touching the columns it was granted.
pub struct Chunk {
    layout: Arc<ArchetypeLayout>,
    buffer: NonNull<u8>,
    buffer_layout: Layout,
    count: usize,
    versions: Box<[AtomicU32]>,
    disabled: Box<[AtomicU32]>,
    borrows: Box<[BorrowState]>,
}

// SAFETY: the buffer is exclusively owned by the chunk; concurrent column
// access through `&Chunk` is coordinated by the job graph and, in checked
// builds, by the per-column borrow states.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Allocate an empty chunk for the given layout.
    pub fn new(layout: Arc<ArchetypeLayout>) -> AccessResult<Self> {
        let buffer_layout =
            Layout::from_size_align(layout.buffer_size().max(1), layout.buffer_align())
                .map_err(|err| AccessError::invalid_argument(format!("chunk buffer: {err}")))?;
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(buffer_layout) };
        let buffer = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(buffer_layout));

        let columns = layout.columns().len();
        Ok(Self {
            buffer,
            buffer_layout,
            count: 0,
            versions: (0..columns).map(|_| AtomicU32::new(0)).collect(),
            disabled: (0..columns).map(|_| AtomicU32::new(0)).collect(),
            borrows: (0..columns).map(|_| BorrowState::default()).collect(),
            layout,
        })
    }

    #[inline]
    pub fn layout(&self) -> &Arc<ArchetypeLayout> {
        &self.layout
    }

    /// Number of live entities.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Append `n` entity slots, returning their indices.
    ///
    /// Fixed columns are zeroed, buffer slots start empty and inline, and
    /// every enableable component starts enabled.
    pub fn push_entities(&mut self, n: usize) -> AccessResult<Range<usize>> {
        let start = self.count;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.capacity())
            .ok_or(AccessError::IndexOutOfRange {
                index: start.saturating_add(n).saturating_sub(1),
                len: self.capacity(),
            })?;

        let enabled_bit = self.layout.enabled_bits().bit_for(true);
        for (index, column) in self.layout.columns().iter().enumerate() {
            let base = self.column_ptr(index);
            match (column.kind, column.buffer.as_ref()) {
                (ComponentKind::Buffer, Some(meta)) => {
                    for slot in start..end {
                        // SAFETY: slot < capacity, headers are 8-byte aligned per the layout.
                        unsafe {
                            let at = base.add(slot * column.stride);
                            ptr::write_bytes(at, 0, column.stride);
                            ptr::write(at.cast::<BufferHeader>(), BufferHeader::empty(meta));
                        }
                    }
                }
                _ => {
                    // SAFETY: the range lies inside the column.
                    unsafe {
                        ptr::write_bytes(base.add(start * column.stride), 0, n * column.stride)
                    };
                }
            }

            if let Some(words) = self.enabled_words(index) {
                for slot in start..end {
                    // SAFETY: slot < capacity and the words cover `capacity` bits.
                    unsafe { write_bit(words, slot, enabled_bit) };
                }
            }
        }

        self.count = end;
        Ok(start..end)
    }

    /// Column index of a component in this chunk, if present.
    pub fn column_of(&self, component: ComponentId) -> Option<usize> {
        self.layout.components().binary_search(&component).ok()
    }

    /// Last version stamped on a component's column.
    pub fn version_of(&self, component: ComponentId) -> Option<u32> {
        self.column_of(component).map(|c| self.column_version(c))
    }

    /// Disabled-entity count of a component's column.
    pub fn disabled_count_of(&self, component: ComponentId) -> Option<u32> {
        self.column_of(component)
            .map(|c| self.disabled_cell(c).load(Ordering::Acquire))
    }

    #[inline]
    pub fn column_version(&self, column: usize) -> u32 {
        self.versions[column].load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn stamp_version(&self, column: usize, version: u32) {
        self.versions[column].store(version, Ordering::Release);
    }

    #[inline]
    pub(crate) fn disabled_cell(&self, column: usize) -> &AtomicU32 {
        &self.disabled[column]
    }

    #[inline]
    pub(crate) fn borrow_state(&self, column: usize) -> &BorrowState {
        &self.borrows[column]
    }

    /// Start of a column inside the buffer.
    #[inline]
    pub(crate) fn column_ptr(&self, column: usize) -> *mut u8 {
        let offset = self.layout.columns()[column].offset;
        // SAFETY: offsets are planned inside `buffer_size`.
        unsafe { self.buffer.as_ptr().add(offset) }
    }

    /// Enabled-bit words of a column, for enableable components.
    #[inline]
    pub(crate) fn enabled_words(&self, column: usize) -> Option<*mut u64> {
        let offset = self.layout.columns()[column].enabled_bits?;
        // SAFETY: bit words are planned inside `buffer_size` and 8-byte aligned.
        Some(unsafe { self.buffer.as_ptr().add(offset).cast::<u64>() })
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for (index, column) in self.layout.columns().iter().enumerate() {
            let Some(meta) = column.buffer.as_ref() else {
                continue;
            };
            let base = self.column_ptr(index);
            for slot in 0..self.count {
                // SAFETY: live slots hold initialized headers whose heap
                // pointers were allocated by the buffer accessor.
                unsafe {
                    let header = &mut *base.add(slot * column.stride).cast::<BufferHeader>();
                    header.release(meta);
                }
            }
        }
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.buffer.as_ptr(), self.buffer_layout) };
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("archetype", &self.layout.id())
            .field("count", &self.count)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// # Safety
/// `words` must cover bit `index`.
#[inline]
pub(crate) unsafe fn read_bit(words: *const u64, index: usize) -> bool {
    // SAFETY: guaranteed by the caller.
    let word = unsafe { *words.add(index / 64) };
    (word >> (index % 64)) & 1 == 1
}

/// Write a bit and return its previous value.
///
/// # Safety
/// `words` must cover bit `index` and no other reference may alias the word.
#[inline]
pub(crate) unsafe fn write_bit(words: *mut u64, index: usize, value: bool) -> bool {
    // SAFETY: guaranteed by the caller.
    let word = unsafe { &mut *words.add(index / 64) };
    let mask = 1u64 << (index % 64);
    let prev = *word & mask != 0;
    if value {
        *word |= mask;
    } else {
        *word &= !mask;
    }
    prev
}
