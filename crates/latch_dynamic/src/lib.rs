//! Latch Dynamic Access
//!
//! Type-erased access to the columns of a chunked, archetype-based store:
//! - Runtime type descriptors with a one-slot column cache
//! - Raw byte views over fixed-size columns
//! - Enabled-bit views over optional components
//! - Accessors over variable-length (buffer) columns
//! - Fixed-length descriptor sets with deferred disposal
//!
//! Callers only know a component's numeric id, never its Rust type.
//!
//! # Feature Flags
//!
//! - `checked` - Validate column borrows and descriptor-set disposal on
//!   every access (default: enabled). Without it the guards compile to
//!   zero-sized no-ops.

pub mod access;
pub mod component;
pub mod config;
pub mod error;
pub mod jobs;
pub mod store;

mod guard;

pub use access::{
    resolve_column, AccessMode, BufferColumnAccessor, ByteColumnView, DescriptorSetReader,
    EnabledBitView, LookupCache, TypeDescriptor, TypeDescriptorSet,
};
pub use component::{
    meta_of, meta_of_name, register_component, BufferMeta, ComponentId, ComponentKind,
    ComponentMeta,
};
pub use config::{AllocationIntent, EnabledBitConvention, StoreConfig, TypeSelection};
pub use error::{AccessError, AccessResult};
pub use jobs::{JobHandle, JobTrigger};
pub use store::{ArchetypeId, ArchetypeLayout, Chunk, ColumnLayout, VersionCounter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
