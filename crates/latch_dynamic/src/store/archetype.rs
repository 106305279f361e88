// archetype.rs - Archetype layout planning
//
// An archetype is a unique set of component types. Its layout fixes where
// every column lives inside a chunk buffer; the layout never changes once
// planned, so every chunk sharing it can be addressed the same way.

use super::align_up;
use crate::component::{meta_of, BufferMeta, ComponentId, ComponentKind, ComponentMeta};
use crate::config::{EnabledBitConvention, StoreConfig};
use crate::error::{AccessError, AccessResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type ArchetypeId = u64;

/// Process-unique layout identity. Zero is never handed out.
static NEXT_ARCHETYPE: AtomicU64 = AtomicU64::new(1);

/// Placement of one component column inside a chunk buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub component: ComponentId,
    pub kind: ComponentKind,
    /// Byte offset of the column from the start of the chunk buffer.
    pub offset: usize,
    /// Bytes per entity slot. Zero for tags.
    pub stride: usize,
    /// Byte offset of the enabled-bit words, for enableable components.
    pub enabled_bits: Option<usize>,
    pub buffer: Option<BufferMeta>,
}

/// Column layout shared by every chunk of one archetype.
///
/// The component IDs are always stored in sorted order, so the column
/// index of a component is the same for any two layouts with the same set.
#[derive(Debug)]
pub struct ArchetypeLayout {
    id: ArchetypeId,
    components: Vec<ComponentId>,
    columns: Vec<ColumnLayout>,
    capacity: usize,
    buffer_size: usize,
    buffer_align: usize,
    enabled_bits: EnabledBitConvention,
}

impl ArchetypeLayout {
    /// Plan a layout for the given components.
    ///
    /// The input is sorted and deduplicated. Every component must already be
    /// registered.
    pub fn plan<I>(components: I, config: &StoreConfig) -> AccessResult<Arc<Self>>
    where
        I: IntoIterator<Item = ComponentId>,
    {
        config.validate()?;

        let mut ids: Vec<ComponentId> = components.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(AccessError::invalid_argument("archetype has no components"));
        }

        let metas = ids
            .iter()
            .map(|&id| {
                meta_of(id).ok_or(AccessError::InvalidComponent {
                    component: id,
                    operation: "archetype planning (unregistered)",
                })
            })
            .collect::<AccessResult<Vec<_>>>()?;

        let row_bytes: usize = metas.iter().map(|m| m.size).sum();
        let mut capacity = config
            .max_entities_per_chunk
            .min(config.chunk_bytes / row_bytes.max(1));
        // Alignment padding and bit words may push the estimate over budget.
        let (columns, buffer_size) = loop {
            if capacity == 0 {
                return Err(AccessError::invalid_argument(format!(
                    "chunk of {} bytes cannot hold one entity of {row_bytes} bytes",
                    config.chunk_bytes
                )));
            }
            let (columns, size) = assign_offsets(&metas, capacity);
            if size <= config.chunk_bytes {
                break (columns, size);
            }
            capacity -= 1;
        };

        let buffer_align = metas
            .iter()
            .map(|m| m.align)
            .fold(std::mem::align_of::<u64>(), usize::max);

        let layout = Self {
            id: NEXT_ARCHETYPE.fetch_add(1, Ordering::Relaxed),
            components: ids,
            columns,
            capacity,
            buffer_size,
            buffer_align,
            enabled_bits: config.enabled_bits,
        };
        tracing::debug!(
            archetype = layout.id,
            components = ?layout.components,
            capacity,
            buffer_size,
            "planned archetype layout"
        );
        Ok(Arc::new(layout))
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted component IDs, one per column.
    #[inline]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    #[inline]
    pub fn column(&self, index: usize) -> Option<&ColumnLayout> {
        self.columns.get(index)
    }

    /// Entities per chunk.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn buffer_align(&self) -> usize {
        self.buffer_align
    }

    #[inline]
    pub fn enabled_bits(&self) -> EnabledBitConvention {
        self.enabled_bits
    }

    /// Check if this archetype contains a specific component.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }
}

/// Number of `u64` words needed for one bit per entity.
#[inline]
pub(crate) fn bit_words(capacity: usize) -> usize {
    capacity.div_ceil(64)
}

/// Lay the columns out back to back, then the enabled-bit words.
fn assign_offsets(metas: &[ComponentMeta], capacity: usize) -> (Vec<ColumnLayout>, usize) {
    let mut offset = 0usize;
    let mut columns = Vec::with_capacity(metas.len());
    for meta in metas {
        offset = align_up(offset, meta.align);
        columns.push(ColumnLayout {
            component: meta.id,
            kind: meta.kind,
            offset,
            stride: meta.size,
            enabled_bits: None,
            buffer: meta.buffer,
        });
        offset += meta.size * capacity;
    }

    for (column, meta) in columns.iter_mut().zip(metas) {
        if meta.enableable {
            offset = align_up(offset, std::mem::align_of::<u64>());
            column.enabled_bits = Some(offset);
            offset += bit_words(capacity) * std::mem::size_of::<u64>();
        }
    }

    (columns, offset)
}
