// buffer.rs - Variable-length component access
//
// Each entity slot of a buffer column starts with a `BufferHeader`. Up to
// `inline_capacity` elements live in the slot itself; larger arrays move
// to an out-of-line allocation owned by the header and come back inline
// once they shrink enough. The chunk frees whatever is still out of line
// when it is dropped.

use super::resolver::open_column;
use super::TypeDescriptor;
use crate::component::{BufferMeta, ComponentId, ComponentKind};
use crate::error::{AccessError, AccessResult};
use crate::guard::ColumnGuard;
use crate::store::{BufferHeader, Chunk};
use std::alloc;
use std::marker::PhantomData;
use std::{ptr, slice};

/// Per-entity byte arrays of one buffer component in a chunk.
#[derive(Debug)]
pub struct BufferColumnAccessor<'a> {
    base: *mut u8,
    stride: usize,
    meta: Option<BufferMeta>,
    count: usize,
    component: ComponentId,
    writable: bool,
    _guard: Option<ColumnGuard<'a>>,
    _chunk: PhantomData<&'a Chunk>,
}

impl<'a> BufferColumnAccessor<'a> {
    /// Resolve the buffer column of `descriptor` in `chunk`.
    ///
    /// An absent component gives an accessor of length zero on which every
    /// index is out of range.
    pub fn resolve(descriptor: &mut TypeDescriptor, chunk: &'a Chunk) -> AccessResult<Self> {
        descriptor.expect_kind(&[ComponentKind::Buffer], "buffer access")?;

        let mut accessor = Self {
            base: ptr::null_mut(),
            stride: 0,
            meta: None,
            count: 0,
            component: descriptor.component(),
            writable: descriptor.mode().is_writable(),
            _guard: None,
            _chunk: PhantomData,
        };
        let Some(open) = open_column(descriptor, chunk)? else {
            return Ok(accessor);
        };

        let column = &chunk.layout().columns()[open.index];
        accessor.base = chunk.column_ptr(open.index);
        accessor.stride = column.stride;
        accessor.meta = column.buffer;
        accessor.count = chunk.count();
        accessor._guard = Some(open.guard);
        Ok(accessor)
    }

    /// Number of entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size in bytes of one buffer element.
    pub fn element_size(&self) -> usize {
        self.meta.map_or(0, |m| m.elem_size)
    }

    pub fn inline_capacity(&self) -> usize {
        self.meta.map_or(0, |m| m.inline_capacity)
    }

    /// Element count of entity `index`'s array.
    pub fn element_len(&self, index: usize) -> AccessResult<usize> {
        let (_, header, _) = self.slot(index)?;
        Ok(header.length as usize)
    }

    /// Elements entity `index`'s array can hold without reallocating.
    pub fn element_capacity(&self, index: usize) -> AccessResult<usize> {
        let (_, header, _) = self.slot(index)?;
        Ok(header.capacity as usize)
    }

    /// Whether entity `index`'s array currently lives inside the chunk.
    pub fn is_inline(&self, index: usize) -> AccessResult<bool> {
        let (_, header, _) = self.slot(index)?;
        Ok(header.pointer.is_null())
    }

    /// Bytes of entity `index`'s array, `length * element_size` long.
    pub fn element(&self, index: usize) -> AccessResult<&[u8]> {
        let (slot, header, meta) = self.slot(index)?;
        // SAFETY: the header describes `length` initialized elements at `data`.
        Ok(unsafe {
            slice::from_raw_parts(
                header.data(slot, &meta),
                header.length as usize * meta.elem_size,
            )
        })
    }

    pub fn element_mut(&mut self, index: usize) -> AccessResult<&mut [u8]> {
        self.check_writable()?;
        let (slot, header, meta) = self.slot(index)?;
        // SAFETY: as in `element`; the write guard excludes every other view.
        Ok(unsafe {
            slice::from_raw_parts_mut(
                header.data(slot, &meta),
                header.length as usize * meta.elem_size,
            )
        })
    }

    /// Set the element count of entity `index`'s array.
    ///
    /// The first `min(old, new_len)` elements are preserved. Storage moves
    /// out of line when `new_len` exceeds the current capacity and back
    /// inline when it fits the inline capacity again.
    ///
    /// # Safety
    /// Elements past the old length are left uninitialized. They must be
    /// written before they are read through `element`.
    pub unsafe fn resize_uninitialized(&mut self, index: usize, new_len: usize) -> AccessResult<()> {
        self.check_writable()?;
        let (slot, _, meta) = self.slot(index)?;
        let new_len_u32 = u32::try_from(new_len).map_err(|_| {
            AccessError::invalid_argument(format!("buffer length {new_len} exceeds u32"))
        })?;

        // SAFETY: `slot` holds an initialized header and the write guard
        // gives this accessor exclusive use of it.
        let header = unsafe { &mut *slot.cast::<BufferHeader>() };
        let keep = (header.length as usize).min(new_len) * meta.elem_size;

        if new_len <= meta.inline_capacity {
            if !header.pointer.is_null() {
                // SAFETY: `keep` bytes are live out of line and the inline
                // area of the slot holds at least `inline_capacity` elements.
                unsafe {
                    ptr::copy_nonoverlapping(header.pointer, slot.add(meta.data_offset()), keep);
                    header.release(&meta);
                }
            }
        } else if new_len > header.capacity as usize {
            let capacity = new_len
                .max(2 * header.capacity as usize)
                .min(u32::MAX as usize);
            let layout = BufferHeader::heap_layout(&meta, capacity)?;
            // SAFETY: `new_len` exceeds the inline capacity, so the layout is
            // non-empty.
            let raw = unsafe { alloc::alloc(layout) };
            if raw.is_null() {
                alloc::handle_alloc_error(layout);
            }
            // SAFETY: the old storage holds `keep` bytes and the new one at
            // least `new_len` elements; the previous allocation, if any, came
            // from `heap_layout` with the old capacity.
            unsafe {
                ptr::copy_nonoverlapping(header.data(slot, &meta), raw, keep);
                header.release(&meta);
            }
            tracing::trace!(
                component = self.component,
                index,
                capacity,
                "buffer moved out of line"
            );
            header.pointer = raw;
            header.capacity = capacity as u32;
        }

        header.length = new_len_u32;
        Ok(())
    }

    /// Like `resize_uninitialized`, but new elements are zero-filled.
    pub fn resize(&mut self, index: usize, new_len: usize) -> AccessResult<()> {
        let old_len = self.element_len(index)?;
        // SAFETY: the grown tail is zeroed below before anything can read it.
        unsafe { self.resize_uninitialized(index, new_len)? };
        if new_len > old_len {
            let elem_size = self.element_size();
            self.element_mut(index)?[old_len * elem_size..].fill(0);
        }
        Ok(())
    }

    fn check_writable(&self) -> AccessResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(AccessError::ReadOnlyAccess {
                component: self.component,
            })
        }
    }

    fn slot(&self, index: usize) -> AccessResult<(*mut u8, &BufferHeader, BufferMeta)> {
        AccessError::check_index(index, self.count)?;
        let meta = self.meta.ok_or(AccessError::InvalidComponent {
            component: self.component,
            operation: "buffer access (no element layout)",
        })?;
        // SAFETY: index < count and every live slot starts with a header.
        let slot = unsafe { self.base.add(index * self.stride) };
        let header = unsafe { &*slot.cast::<BufferHeader>() };
        Ok((slot, header, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{self, POSITION, SHIELDED, WAYPOINTS};

    fn fill(accessor: &mut BufferColumnAccessor<'_>, index: usize, values: &[u32]) {
        accessor.resize(index, values.len()).unwrap();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        accessor.element_mut(index).unwrap().copy_from_slice(&bytes);
    }

    fn values(accessor: &BufferColumnAccessor<'_>, index: usize) -> Vec<u32> {
        accessor
            .element(index)
            .unwrap()
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn slots_start_empty_and_inline() {
        let chunk = fixtures::chunk(&[POSITION, WAYPOINTS], 3);
        let mut descriptor = TypeDescriptor::read_only(WAYPOINTS).unwrap();
        let accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(accessor.len(), 3);
        assert_eq!(accessor.element_size(), 4);
        for index in 0..3 {
            assert_eq!(accessor.element_len(index), Ok(0));
            assert_eq!(accessor.element_capacity(index), Ok(4));
            assert_eq!(accessor.is_inline(index), Ok(true));
            assert!(accessor.element(index).unwrap().is_empty());
        }
    }

    #[test]
    fn grow_and_shrink_preserve_the_prefix() {
        let chunk = fixtures::chunk(&[WAYPOINTS], 2);
        let mut descriptor = TypeDescriptor::read_write(WAYPOINTS, 3).unwrap();
        let mut accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();

        fill(&mut accessor, 1, &[1, 2, 3]);
        accessor.resize(1, 10).unwrap();
        assert_eq!(accessor.element_len(1), Ok(10));
        assert_eq!(accessor.is_inline(1), Ok(false));
        assert!(accessor.element_capacity(1).unwrap() >= 10);
        assert_eq!(values(&accessor, 1), [1, 2, 3, 0, 0, 0, 0, 0, 0, 0]);

        let grown: Vec<u32> = (0..10).map(|v| v * 7).collect();
        fill(&mut accessor, 1, &grown);
        accessor.resize(1, 6).unwrap();
        assert_eq!(values(&accessor, 1), &grown[..6]);
        assert_eq!(accessor.is_inline(1), Ok(false));

        accessor.resize(1, 2).unwrap();
        assert_eq!(accessor.is_inline(1), Ok(true));
        assert_eq!(accessor.element_capacity(1), Ok(4));
        assert_eq!(values(&accessor, 1), &grown[..2]);

        // Neighbouring slot untouched.
        assert_eq!(accessor.element_len(0), Ok(0));
        drop(accessor);
        assert_eq!(chunk.version_of(WAYPOINTS), Some(3));
    }

    #[test]
    fn inline_growth_stays_inline() {
        let chunk = fixtures::chunk(&[WAYPOINTS], 1);
        let mut descriptor = TypeDescriptor::read_write(WAYPOINTS, 1).unwrap();
        let mut accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();
        fill(&mut accessor, 0, &[9, 8]);
        accessor.resize(0, 4).unwrap();
        assert_eq!(accessor.is_inline(0), Ok(true));
        assert_eq!(values(&accessor, 0), [9, 8, 0, 0]);
        accessor.resize(0, 0).unwrap();
        assert!(accessor.element(0).unwrap().is_empty());
    }

    #[test]
    fn out_of_line_storage_survives_reresolution() {
        let chunk = fixtures::chunk(&[WAYPOINTS], 1);
        let mut writer = TypeDescriptor::read_write(WAYPOINTS, 1).unwrap();
        {
            let mut accessor = BufferColumnAccessor::resolve(&mut writer, &chunk).unwrap();
            fill(&mut accessor, 0, &(0..40).collect::<Vec<u32>>());
        }
        let mut reader = TypeDescriptor::read_only(WAYPOINTS).unwrap();
        let accessor = BufferColumnAccessor::resolve(&mut reader, &chunk).unwrap();
        assert_eq!(values(&accessor, 0), (0..40).collect::<Vec<u32>>());
    }

    #[test]
    fn indices_are_checked() {
        let chunk = fixtures::chunk(&[WAYPOINTS], 2);
        let mut descriptor = TypeDescriptor::read_write(WAYPOINTS, 1).unwrap();
        let mut accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();
        let err = AccessError::IndexOutOfRange { index: 2, len: 2 };
        assert_eq!(accessor.element(2).err(), Some(err.clone()));
        assert_eq!(accessor.resize(2, 1), Err(err));
    }

    #[test]
    fn absent_component_has_no_entities() {
        let chunk = fixtures::chunk(&[POSITION], 5);
        let mut descriptor = TypeDescriptor::read_write(WAYPOINTS, 1).unwrap();
        let mut accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();
        assert!(accessor.is_empty());
        assert_eq!(
            accessor.element(0).err(),
            Some(AccessError::IndexOutOfRange { index: 0, len: 0 })
        );
        assert!(accessor.resize(0, 3).is_err());
    }

    #[test]
    fn fixed_components_are_rejected() {
        let chunk = fixtures::chunk(&[POSITION, SHIELDED], 1);
        let mut descriptor = TypeDescriptor::read_write(SHIELDED, 1).unwrap();
        assert!(matches!(
            BufferColumnAccessor::resolve(&mut descriptor, &chunk),
            Err(AccessError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn read_only_accessor_refuses_resize() {
        let chunk = fixtures::chunk(&[WAYPOINTS], 1);
        let mut descriptor = TypeDescriptor::read_only(WAYPOINTS).unwrap();
        let mut accessor = BufferColumnAccessor::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(
            accessor.resize(0, 1),
            Err(AccessError::ReadOnlyAccess { component: WAYPOINTS })
        );
        assert!(accessor.element_mut(0).is_err());
        assert_eq!(accessor.element_len(0), Ok(0));
    }
}
