// component.rs - Runtime component registration
//
// Components are identified by u32 IDs, not Rust TypeIds.
// The access layer never learns a component's concrete type; everything it
// needs to know about a column comes from the metadata registered here.

use crate::error::{AccessError, AccessResult};
use crate::store::{align_up, BufferHeader};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::{PoisonError, RwLock};

pub type ComponentId = u32;

/// Storage shape of a component column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Plain fixed-size value, one per entity.
    Fixed,
    /// Variable-length array per entity, each slot headed by a length header.
    Buffer,
    /// Tag component with no bytes.
    ZeroSized,
}

/// Element layout of a buffer component.
///
/// `inline_capacity` is the number of elements stored inside the chunk
/// before an entity's array moves to an out-of-line allocation. The store
/// decides it; the access layer only reads it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferMeta {
    pub elem_size: usize,
    pub elem_align: usize,
    pub inline_capacity: usize,
}

impl BufferMeta {
    pub fn new(elem_size: usize, elem_align: usize, inline_capacity: usize) -> Self {
        Self {
            elem_size,
            elem_align,
            inline_capacity,
        }
    }

    /// Alignment of one per-entity slot (header plus inline storage).
    #[inline]
    pub fn slot_align(&self) -> usize {
        self.elem_align.max(align_of::<BufferHeader>())
    }

    /// Offset of inline element storage from the start of the slot.
    #[inline]
    pub fn data_offset(&self) -> usize {
        align_up(size_of::<BufferHeader>(), self.elem_align)
    }

    /// Bytes occupied by one entity's slot in the column.
    #[inline]
    pub fn stride(&self) -> usize {
        let inline_bytes = self.inline_capacity.saturating_mul(self.elem_size);
        align_up(
            self.data_offset().saturating_add(inline_bytes),
            self.slot_align(),
        )
    }

    fn validate(&self, id: ComponentId) -> AccessResult<()> {
        if self.elem_size == 0 {
            return Err(AccessError::invalid_argument(format!(
                "buffer component {id} has zero-sized elements"
            )));
        }
        if !self.elem_align.is_power_of_two() || self.elem_size % self.elem_align != 0 {
            return Err(AccessError::invalid_argument(format!(
                "buffer component {id} element layout {}/{} is not valid",
                self.elem_size, self.elem_align
            )));
        }
        if self.inline_capacity > u32::MAX as usize {
            return Err(AccessError::invalid_argument(format!(
                "buffer component {id} inline capacity {} exceeds u32",
                self.inline_capacity
            )));
        }
        Ok(())
    }
}

/// Metadata describing a component's memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: String,
    /// Bytes per entity slot in the column.
    pub size: usize,
    pub align: usize,
    pub kind: ComponentKind,
    /// Whether entities may individually disable this component.
    pub enableable: bool,
    pub buffer: Option<BufferMeta>,
}

impl ComponentMeta {
    /// Fixed-size component. A size of zero registers a tag.
    pub fn fixed(id: ComponentId, name: impl Into<String>, size: usize, align: usize) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            align: align.max(1),
            kind: if size == 0 {
                ComponentKind::ZeroSized
            } else {
                ComponentKind::Fixed
            },
            enableable: false,
            buffer: None,
        }
    }

    /// Zero-sized tag component.
    pub fn tag(id: ComponentId, name: impl Into<String>) -> Self {
        Self::fixed(id, name, 0, 1)
    }

    /// Variable-length component.
    pub fn buffer(id: ComponentId, name: impl Into<String>, buffer: BufferMeta) -> Self {
        Self {
            id,
            name: name.into(),
            size: buffer.stride(),
            align: buffer.slot_align(),
            kind: ComponentKind::Buffer,
            enableable: false,
            buffer: Some(buffer),
        }
    }

    /// Mark the component as individually enableable per entity.
    pub fn enableable(mut self) -> Self {
        self.enableable = true;
        self
    }

    fn validate(&self) -> AccessResult<()> {
        if !self.align.is_power_of_two() {
            return Err(AccessError::invalid_argument(format!(
                "component {} alignment {} is not a power of two",
                self.id, self.align
            )));
        }
        if self.size % self.align != 0 {
            return Err(AccessError::invalid_argument(format!(
                "component {} size {} is not a multiple of its alignment {}",
                self.id, self.size, self.align
            )));
        }
        match (self.kind, &self.buffer) {
            (ComponentKind::Buffer, Some(buffer)) => buffer.validate(self.id),
            (ComponentKind::Buffer, None) => Err(AccessError::invalid_argument(format!(
                "buffer component {} has no element layout",
                self.id
            ))),
            (_, Some(_)) => Err(AccessError::invalid_argument(format!(
                "component {} carries buffer layout but is not a buffer",
                self.id
            ))),
            (_, None) => Ok(()),
        }
    }
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<ComponentId, ComponentMeta>,
    by_name: HashMap<String, ComponentId>,
}

/// Global registry for every component the store may hold.
static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));

/// Register a component's metadata.
///
/// Re-registering an id is allowed as long as the layout is identical.
pub fn register_component(meta: ComponentMeta) -> AccessResult<()> {
    meta.validate()?;

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(prev) = registry.by_id.get(&meta.id) {
        if *prev != meta {
            return Err(AccessError::invalid_argument(format!(
                "component {} re-registered with a different layout ('{}' vs '{}')",
                meta.id, prev.name, meta.name
            )));
        }
        return Ok(());
    }
    if let Some(&other) = registry.by_name.get(&meta.name) {
        return Err(AccessError::invalid_argument(format!(
            "component name '{}' already used by id {other}",
            meta.name
        )));
    }

    tracing::debug!(id = meta.id, name = %meta.name, kind = ?meta.kind, "registered component");
    registry.by_name.insert(meta.name.clone(), meta.id);
    registry.by_id.insert(meta.id, meta);
    Ok(())
}

/// Look up component metadata by ID.
pub fn meta_of(id: ComponentId) -> Option<ComponentMeta> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_id
        .get(&id)
        .cloned()
}

/// Look up component metadata by registered name.
pub fn meta_of_name(name: &str) -> Option<ComponentMeta> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    let id = registry.by_name.get(name)?;
    registry.by_id.get(id).cloned()
}
