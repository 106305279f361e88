// resolver.rs - Component to column resolution
//
// Chunks of one archetype are usually processed back to back, so every
// descriptor remembers the column it found last time together with the
// archetype it found it in. A hit is a single comparison; a miss is a
// binary search over the sorted component list.

use super::{LookupCache, TypeDescriptor};
use crate::component::ComponentId;
use crate::error::AccessResult;
use crate::guard::ColumnGuard;
use crate::store::{ArchetypeLayout, Chunk};

/// Column index of `component` in `layout`, or `None` if the archetype does
/// not contain it.
///
/// Reuses `cache` when it was filled for this exact layout and refreshes it
/// otherwise. Absence is cached too.
pub fn resolve_column(
    layout: &ArchetypeLayout,
    component: ComponentId,
    cache: &mut LookupCache,
) -> Option<usize> {
    if cache.archetype == Some(layout.id()) {
        return cache.column;
    }

    let column = layout.components().binary_search(&component).ok();
    tracing::trace!(component, archetype = layout.id(), ?column, "column cache miss");
    *cache = LookupCache {
        archetype: Some(layout.id()),
        column,
    };
    column
}

/// A resolved column with its guard held.
pub(crate) struct OpenColumn<'a> {
    pub(crate) index: usize,
    pub(crate) guard: ColumnGuard<'a>,
}

/// Resolve the descriptor against the chunk and take the column guard.
///
/// Read-write descriptors stamp the column version here, when the view is
/// obtained, whether or not anything is written through it later.
pub(crate) fn open_column<'a>(
    descriptor: &mut TypeDescriptor,
    chunk: &'a Chunk,
) -> AccessResult<Option<OpenColumn<'a>>> {
    let Some(index) = descriptor.column_in(chunk.layout()) else {
        return Ok(None);
    };

    let writable = descriptor.mode().is_writable();
    let guard = ColumnGuard::acquire(chunk.borrow_state(index), descriptor.component(), writable)?;
    if writable {
        chunk.stamp_version(index, descriptor.version());
    }
    Ok(Some(OpenColumn { index, guard }))
}
