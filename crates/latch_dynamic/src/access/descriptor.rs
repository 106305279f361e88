use crate::component::{meta_of, ComponentId, ComponentKind, ComponentMeta};
use crate::error::{AccessError, AccessResult};
use crate::store::{ArchetypeId, ArchetypeLayout};
use serde::{Deserialize, Serialize};

/// How a descriptor intends to touch its column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Result of the last column lookup, valid only for `archetype`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookupCache {
    pub(crate) archetype: Option<ArchetypeId>,
    pub(crate) column: Option<usize>,
}

impl LookupCache {
    /// Archetype the cached result belongs to.
    pub fn archetype(&self) -> Option<ArchetypeId> {
        self.archetype
    }

    /// Cached column index; `None` also when the component was absent.
    pub fn column(&self) -> Option<usize> {
        self.column
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Runtime handle to one component type.
///
/// Carries the component id and kind, the access mode, the version stamped
/// on columns resolved read-write, and a one-slot column cache.
///
/// Resolving a view mutates the descriptor's cache. Reuse the same
/// descriptor across consecutive chunks of one archetype to skip the
/// search; a fresh copy per call pays for a lookup every time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    component: ComponentId,
    kind: ComponentKind,
    enableable: bool,
    mode: AccessMode,
    version: u32,
    pub(crate) cache: LookupCache,
}

impl TypeDescriptor {
    pub fn new(meta: &ComponentMeta, mode: AccessMode) -> Self {
        Self {
            component: meta.id,
            kind: meta.kind,
            enableable: meta.enableable,
            mode,
            version: 0,
            cache: LookupCache::default(),
        }
    }

    /// Build a descriptor from the registry entry of `component`.
    pub fn for_component(component: ComponentId, mode: AccessMode) -> AccessResult<Self> {
        let meta = meta_of(component).ok_or(AccessError::InvalidComponent {
            component,
            operation: "descriptor (unregistered)",
        })?;
        Ok(Self::new(&meta, mode))
    }

    pub fn read_only(component: ComponentId) -> AccessResult<Self> {
        Self::for_component(component, AccessMode::ReadOnly)
    }

    /// Read-write descriptor stamping `version` on every column it resolves.
    pub fn read_write(component: ComponentId, version: u32) -> AccessResult<Self> {
        Ok(Self::for_component(component, AccessMode::ReadWrite)?.with_version(version))
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Update the version stamped by later read-write resolutions.
    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    #[inline]
    pub fn component(&self) -> ComponentId {
        self.component
    }

    #[inline]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    #[inline]
    pub fn is_enableable(&self) -> bool {
        self.enableable
    }

    #[inline]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn cache(&self) -> LookupCache {
        self.cache
    }

    /// Column index of this component in `layout`, refreshing the cache.
    pub fn column_in(&mut self, layout: &ArchetypeLayout) -> Option<usize> {
        super::resolve_column(layout, self.component, &mut self.cache)
    }

    pub(crate) fn expect_kind(
        &self,
        accepted: &[ComponentKind],
        operation: &'static str,
    ) -> AccessResult<()> {
        if accepted.contains(&self.kind) {
            Ok(())
        } else {
            Err(AccessError::InvalidComponent {
                component: self.component,
                operation,
            })
        }
    }
}
