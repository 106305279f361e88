//! Host store: archetype layouts and chunks.
//!
//! This is the minimal store the access layer runs against. It plans where
//! each column lives inside a chunk buffer and owns that buffer, the
//! per-column version cells and the disabled-entity counts. Nothing in
//! `access` allocates or frees chunks; it only reads the layout and writes
//! through the buffer and cells.

mod archetype;
mod chunk;

pub use archetype::{ArchetypeId, ArchetypeLayout, ColumnLayout};
pub use chunk::Chunk;
pub(crate) use chunk::{read_bit, write_bit, BufferHeader};

use std::sync::atomic::{AtomicU32, Ordering};

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// An `align` of zero leaves `value` unchanged and results saturate, so
/// layouts can be computed before they are validated.
#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    let mask = align.saturating_sub(1);
    value.saturating_add(mask) & !mask
}

/// Monotonic global change version.
///
/// Starts at 1 so that a column stamped with 0 was never written through
/// the access layer.
#[derive(Debug)]
pub struct VersionCounter(AtomicU32);

impl VersionCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Bump the version and return the new value.
    pub fn advance(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

impl Default for VersionCounter {
    fn default() -> Self {
        Self::new()
    }
}
