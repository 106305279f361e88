//! Type-erased column access.
//!
//! Every view in this module is obtained the same way: a [`TypeDescriptor`]
//! is resolved against a chunk's layout (refreshing the descriptor's
//! one-slot cache), the column guard is taken, and for read-write
//! descriptors the column's change version is stamped. A component the
//! chunk does not have yields an empty view, never an error.

mod buffer;
mod bytes;
mod descriptor;
mod enabled;
mod resolver;
mod set;

pub use buffer::BufferColumnAccessor;
pub use bytes::ByteColumnView;
pub use descriptor::{AccessMode, LookupCache, TypeDescriptor};
pub use enabled::EnabledBitView;
pub use resolver::resolve_column;
pub use set::{DescriptorSetReader, TypeDescriptorSet};
