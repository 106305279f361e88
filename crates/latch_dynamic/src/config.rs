//! Store and selection configuration

use crate::component::{meta_of, meta_of_name, ComponentId};
use crate::error::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which bit value marks an optional component as enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnabledBitConvention {
    /// A set bit means enabled.
    #[default]
    SetIsEnabled,
    /// A set bit means disabled.
    SetIsDisabled,
}

impl EnabledBitConvention {
    /// Bit value stored for the given enabled state.
    #[inline]
    pub fn bit_for(self, enabled: bool) -> bool {
        match self {
            Self::SetIsEnabled => enabled,
            Self::SetIsDisabled => !enabled,
        }
    }

    /// Enabled state encoded by the given bit value.
    #[inline]
    pub fn enabled_from(self, bit: bool) -> bool {
        self.bit_for(bit)
    }
}

/// Layout policy supplied by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Target size of one chunk's component buffer in bytes.
    pub chunk_bytes: usize,
    /// Upper bound on entities per chunk regardless of `chunk_bytes`.
    pub max_entities_per_chunk: usize,
    pub enabled_bits: EnabledBitConvention,
}

impl StoreConfig {
    pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;
    pub const DEFAULT_MAX_ENTITIES: usize = 128;

    pub fn from_json_str(text: &str) -> AccessResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| AccessError::invalid_argument(format!("store config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AccessResult<()> {
        if self.chunk_bytes == 0 || self.max_entities_per_chunk == 0 {
            return Err(AccessError::invalid_argument(
                "chunk_bytes and max_entities_per_chunk must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: Self::DEFAULT_CHUNK_BYTES,
            max_entities_per_chunk: Self::DEFAULT_MAX_ENTITIES,
            enabled_bits: EnabledBitConvention::default(),
        }
    }
}

/// Expected lifetime of a descriptor set's allocation.
///
/// Recorded for diagnostics; every intent is released through the same
/// dispose calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationIntent {
    /// Freed within the frame that created it.
    Frame,
    /// Freed once the jobs reading it finish.
    #[default]
    Job,
    /// Lives until explicitly disposed.
    Persistent,
}

/// A component named by a selection file, either by id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectedComponent {
    Id(ComponentId),
    Name(String),
}

/// Ordered set of component types a generic caller wants to touch.
///
/// Produced by an external configuration step; the access layer treats it
/// as opaque data and only checks that every entry is registered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeSelection {
    pub components: Vec<SelectedComponent>,
    pub store: StoreConfig,
}

impl TypeSelection {
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ComponentId>,
    {
        Self {
            components: ids.into_iter().map(SelectedComponent::Id).collect(),
            store: StoreConfig::default(),
        }
    }

    pub fn from_json_str(text: &str) -> AccessResult<Self> {
        let selection: Self = serde_json::from_str(text)
            .map_err(|err| AccessError::invalid_argument(format!("type selection: {err}")))?;
        selection.store.validate()?;
        Ok(selection)
    }

    pub fn load(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            AccessError::invalid_argument(format!("cannot read {}: {err}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loading type selection");
        Self::from_json_str(&text)
    }

    /// Resolve every entry to a registered id, preserving order and
    /// dropping duplicates.
    pub fn resolve(&self) -> AccessResult<Vec<ComponentId>> {
        let mut ids = Vec::with_capacity(self.components.len());
        for entry in &self.components {
            let meta = match entry {
                SelectedComponent::Id(id) => meta_of(*id),
                SelectedComponent::Name(name) => meta_of_name(name),
            };
            let id = match (meta, entry) {
                (Some(meta), _) => meta.id,
                (None, SelectedComponent::Id(id)) => {
                    return Err(AccessError::InvalidComponent {
                        component: *id,
                        operation: "selection (unregistered)",
                    })
                }
                (None, SelectedComponent::Name(name)) => {
                    return Err(AccessError::invalid_argument(format!(
                        "selected component '{name}' is not registered"
                    )))
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
