use super::resolver::open_column;
use super::TypeDescriptor;
use crate::component::{ComponentId, ComponentKind};
use crate::error::{AccessError, AccessResult};
use crate::guard::ColumnGuard;
use crate::store::Chunk;
use std::marker::PhantomData;
use std::{ptr, slice};

/// Raw bytes of one fixed-size column across a whole chunk.
///
/// The view covers exactly `entity_count * stride` bytes. It is empty when
/// the chunk's archetype lacks the component.
#[derive(Debug)]
pub struct ByteColumnView<'a> {
    ptr: *mut u8,
    len: usize,
    stride: usize,
    component: ComponentId,
    writable: bool,
    _guard: Option<ColumnGuard<'a>>,
    _chunk: PhantomData<&'a Chunk>,
}

impl<'a> ByteColumnView<'a> {
    /// Resolve the column of `descriptor` in `chunk`.
    ///
    /// Zero-sized and buffer components have no fixed byte column and fail
    /// with `InvalidComponent`. A read-write descriptor stamps its version
    /// on the column.
    pub fn resolve(descriptor: &mut TypeDescriptor, chunk: &'a Chunk) -> AccessResult<Self> {
        descriptor.expect_kind(&[ComponentKind::Fixed], "fixed byte view")?;

        let mut view = Self {
            ptr: ptr::null_mut(),
            len: 0,
            stride: 0,
            component: descriptor.component(),
            writable: descriptor.mode().is_writable(),
            _guard: None,
            _chunk: PhantomData,
        };
        let Some(open) = open_column(descriptor, chunk)? else {
            return Ok(view);
        };

        let column = &chunk.layout().columns()[open.index];
        view.ptr = chunk.column_ptr(open.index);
        view.stride = column.stride;
        view.len = chunk.count() * column.stride;
        view._guard = Some(open.guard);
        Ok(view)
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per entity; zero for an absent column.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of entities covered by the view.
    #[inline]
    pub fn entity_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.len / self.stride
        }
    }

    #[inline]
    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: the range lies inside the chunk column and the guard
        // excludes concurrent writers.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> AccessResult<&mut [u8]> {
        if !self.writable {
            return Err(AccessError::ReadOnlyAccess {
                component: self.component,
            });
        }
        if self.ptr.is_null() {
            return Ok(&mut []);
        }
        // SAFETY: as above; the guard excludes every other view of the column.
        Ok(unsafe { slice::from_raw_parts_mut(self.ptr, self.len) })
    }

    /// Bytes of one entity's component.
    pub fn element(&self, index: usize) -> AccessResult<&[u8]> {
        AccessError::check_index(index, self.entity_count())?;
        let start = index * self.stride;
        Ok(&self.as_bytes()[start..start + self.stride])
    }

    /// Overwrite the whole column. `src` must match the view length exactly.
    pub fn copy_from(&mut self, src: &[u8]) -> AccessResult<()> {
        let len = self.len;
        if src.len() != len {
            return Err(AccessError::invalid_argument(format!(
                "column of component {} holds {len} bytes, got {}",
                self.component,
                src.len()
            )));
        }
        self.as_bytes_mut()?.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{self, FROZEN, POSITION, VELOCITY, WAYPOINTS};

    #[test]
    fn view_covers_count_times_stride() {
        let chunk = fixtures::chunk(&[POSITION, VELOCITY], 5);
        let mut descriptor = TypeDescriptor::read_only(POSITION).unwrap();
        let view = ByteColumnView::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(view.len(), 5 * 12);
        assert_eq!(view.stride(), 12);
        assert_eq!(view.entity_count(), 5);
        assert!(view.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn written_bytes_read_back() {
        let chunk = fixtures::chunk(&[POSITION, VELOCITY], 3);
        let pattern: Vec<u8> = (0..24).collect();

        let mut writer = TypeDescriptor::read_write(VELOCITY, 5).unwrap();
        {
            let mut view = ByteColumnView::resolve(&mut writer, &chunk).unwrap();
            view.copy_from(&pattern).unwrap();
        }

        let mut reader = TypeDescriptor::read_only(VELOCITY).unwrap();
        let view = ByteColumnView::resolve(&mut reader, &chunk).unwrap();
        assert_eq!(view.as_bytes(), pattern.as_slice());
        assert_eq!(view.element(2).unwrap(), &pattern[16..24]);
        assert_eq!(
            view.element(3),
            Err(AccessError::IndexOutOfRange { index: 3, len: 3 })
        );

        // Neighbouring column untouched.
        let mut position = TypeDescriptor::read_only(POSITION).unwrap();
        let other = ByteColumnView::resolve(&mut position, &chunk).unwrap();
        assert!(other.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn read_write_resolution_stamps_version() {
        let chunk = fixtures::chunk(&[POSITION], 2);
        let mut reader = TypeDescriptor::read_only(POSITION).unwrap();
        drop(ByteColumnView::resolve(&mut reader, &chunk).unwrap());
        assert_eq!(chunk.version_of(POSITION), Some(0));

        let mut writer = TypeDescriptor::read_write(POSITION, 17).unwrap();
        drop(ByteColumnView::resolve(&mut writer, &chunk).unwrap());
        assert_eq!(chunk.version_of(POSITION), Some(17));
    }

    #[test]
    fn absent_component_gives_empty_view() {
        let chunk = fixtures::chunk(&[POSITION], 4);
        let mut descriptor = TypeDescriptor::read_write(VELOCITY, 3).unwrap();
        let mut view = ByteColumnView::resolve(&mut descriptor, &chunk).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.as_bytes(), &[] as &[u8]);
        assert_eq!(view.as_bytes_mut().unwrap().len(), 0);
        assert!(view.copy_from(&[]).is_ok());
        assert_eq!(chunk.version_of(POSITION), Some(0));
    }

    #[test]
    fn zero_sized_and_buffer_components_are_rejected() {
        let chunk = fixtures::chunk(&[POSITION, FROZEN, WAYPOINTS], 1);
        for component in [FROZEN, WAYPOINTS] {
            let mut descriptor = TypeDescriptor::read_only(component).unwrap();
            assert!(matches!(
                ByteColumnView::resolve(&mut descriptor, &chunk),
                Err(AccessError::InvalidComponent { .. })
            ));
        }
    }

    #[test]
    fn read_only_view_refuses_writes() {
        let chunk = fixtures::chunk(&[POSITION], 1);
        let mut descriptor = TypeDescriptor::read_only(POSITION).unwrap();
        let mut view = ByteColumnView::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(
            view.as_bytes_mut().err(),
            Some(AccessError::ReadOnlyAccess { component: POSITION })
        );
        assert!(view.copy_from(&[0; 12]).is_err());
        assert!(view.copy_from(&[0; 11]).is_err());
    }

    #[cfg(feature = "checked")]
    #[test]
    fn overlapping_writer_is_rejected() {
        let chunk = fixtures::chunk(&[POSITION], 2);
        let mut writer = TypeDescriptor::read_write(POSITION, 1).unwrap();
        let mut reader = TypeDescriptor::read_only(POSITION).unwrap();

        let held = ByteColumnView::resolve(&mut writer, &chunk).unwrap();
        assert!(matches!(
            ByteColumnView::resolve(&mut reader, &chunk),
            Err(AccessError::AccessConflict { component: POSITION, held: "writer" })
        ));
        drop(held);

        let first = ByteColumnView::resolve(&mut reader, &chunk).unwrap();
        let second = ByteColumnView::resolve(&mut reader, &chunk).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(ByteColumnView::resolve(&mut writer, &chunk).is_err());
    }
}
