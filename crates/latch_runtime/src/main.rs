//! Latch Runtime
//!
//! Probe binary for the dynamic access layer: loads a type selection, fills
//! a few chunks through read-write views, walks every selected type in
//! parallel jobs through read-only views, and releases the descriptor set
//! once the walk is done.
//!
//! Usage: `latch [selection.json]`

use anyhow::{Context, Result};
use latch_dynamic::jobs::{self, JobHandle};
use latch_dynamic::{
    meta_of, register_component, AccessMode, AccessResult, AllocationIntent, ArchetypeLayout,
    BufferColumnAccessor, BufferMeta, ByteColumnView, Chunk, ComponentId, ComponentKind,
    ComponentMeta, DescriptorSetReader, EnabledBitView, TypeDescriptorSet, TypeSelection,
    VersionCounter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const POSITION: ComponentId = 1;
const VELOCITY: ComponentId = 2;
const HEALTH: ComponentId = 3;
const FROZEN: ComponentId = 4;
const WAYPOINTS: ComponentId = 5;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Latch Dynamic v{}", latch_dynamic::VERSION);
    register_demo_components()?;

    let selection = match std::env::args().nth(1) {
        Some(path) => TypeSelection::load(&path)
            .with_context(|| format!("loading type selection from {path}"))?,
        None => default_selection(),
    };

    let chunks = build_chunks(&selection)?;
    tracing::info!(chunks = chunks.len(), "store populated");

    let versions = VersionCounter::new();
    fill(&chunks, &selection, versions.advance())?;
    let totals = walk(&chunks, &selection)?;

    for (id, bytes) in selection.resolve()?.into_iter().zip(totals) {
        let name = meta_of(id).map(|m| m.name).unwrap_or_default();
        tracing::info!(component = id, %name, bytes, "walked");
    }

    tracing::info!("Probe finished");
    Ok(())
}

fn register_demo_components() -> AccessResult<()> {
    register_component(ComponentMeta::fixed(POSITION, "Position", 12, 4))?;
    register_component(ComponentMeta::fixed(VELOCITY, "Velocity", 8, 4))?;
    register_component(ComponentMeta::fixed(HEALTH, "Health", 4, 4).enableable())?;
    register_component(ComponentMeta::tag(FROZEN, "Frozen").enableable())?;
    register_component(ComponentMeta::buffer(
        WAYPOINTS,
        "Waypoints",
        BufferMeta::new(8, 4, 2),
    ))?;
    Ok(())
}

fn default_selection() -> TypeSelection {
    TypeSelection::from_ids([POSITION, VELOCITY, HEALTH, FROZEN, WAYPOINTS])
}

/// A handful of archetypes, some chunks full and some partly filled.
fn build_chunks(selection: &TypeSelection) -> AccessResult<Vec<Arc<Chunk>>> {
    let archetypes: [&[ComponentId]; 3] = [
        &[POSITION, VELOCITY],
        &[POSITION, HEALTH, FROZEN],
        &[POSITION, VELOCITY, HEALTH, WAYPOINTS],
    ];

    let mut chunks = Vec::new();
    for components in archetypes {
        let layout = ArchetypeLayout::plan(components.iter().copied(), &selection.store)?;
        let full = layout.capacity();
        for entities in [full, full / 3 + 1] {
            let mut chunk = Chunk::new(Arc::clone(&layout))?;
            chunk.push_entities(entities)?;
            chunks.push(Arc::new(chunk));
        }
    }
    Ok(chunks)
}

/// Write every selected column once, single-threaded.
fn fill(chunks: &[Arc<Chunk>], selection: &TypeSelection, version: u32) -> AccessResult<()> {
    let mut set = TypeDescriptorSet::from_selection(
        selection,
        AccessMode::ReadWrite,
        version,
        AllocationIntent::Frame,
    )?;

    for chunk in chunks {
        for index in 0..set.len() {
            let Some(descriptor) = set.get_mut(index)? else {
                continue;
            };
            match descriptor.kind() {
                ComponentKind::Fixed => {
                    let mut view = ByteColumnView::resolve(descriptor, chunk)?;
                    for (i, byte) in view.as_bytes_mut()?.iter_mut().enumerate() {
                        *byte = i as u8;
                    }
                }
                ComponentKind::Buffer => {
                    let mut accessor = BufferColumnAccessor::resolve(descriptor, chunk)?;
                    for entity in 0..accessor.len() {
                        accessor.resize(entity, entity % 5)?;
                    }
                }
                ComponentKind::ZeroSized => {}
            }
            if descriptor.is_enableable() {
                let mut bits = EnabledBitView::resolve(descriptor, chunk)?;
                for entity in (0..bits.len()).step_by(3) {
                    bits.set_enabled(entity, false)?;
                }
            }
        }
    }

    set.dispose_now()
}

/// Walk every chunk in its own job and total the bytes seen per selected
/// type. The descriptor set is released after the last walk.
fn walk(chunks: &[Arc<Chunk>], selection: &TypeSelection) -> Result<Vec<usize>> {
    let mut set = TypeDescriptorSet::from_selection(
        selection,
        AccessMode::ReadOnly,
        0,
        AllocationIntent::Job,
    )?;
    let totals: Arc<Vec<AtomicUsize>> =
        Arc::new((0..set.len()).map(|_| AtomicUsize::new(0)).collect());

    // SAFETY: every job holding the reader is a dependency of the release.
    let reader = unsafe { set.reader()? };
    let walks: Vec<JobHandle> = chunks
        .iter()
        .map(|chunk| {
            let (reader, totals) = (reader.clone(), Arc::clone(&totals));
            let chunk = Arc::clone(chunk);
            jobs::schedule(&[], move || match walk_chunk(&reader, &chunk) {
                Ok(bytes) => {
                    for (total, bytes) in totals.iter().zip(bytes) {
                        total.fetch_add(bytes, Ordering::Relaxed);
                    }
                }
                Err(err) => tracing::error!(?chunk, %err, "chunk walk failed"),
            })
        })
        .collect();

    let release = set.dispose_after(&walks)?;
    release.complete();
    if walks.iter().any(JobHandle::panicked) {
        anyhow::bail!("a chunk walk panicked");
    }

    Ok(totals.iter().map(|t| t.load(Ordering::Relaxed)).collect())
}

fn walk_chunk(reader: &DescriptorSetReader, chunk: &Chunk) -> AccessResult<Vec<usize>> {
    let mut bytes = vec![0; reader.len()];
    for (index, total) in bytes.iter_mut().enumerate() {
        let Some(mut descriptor) = reader.get(index)? else {
            continue;
        };
        *total = match descriptor.kind() {
            ComponentKind::Fixed => ByteColumnView::resolve(&mut descriptor, chunk)?.len(),
            ComponentKind::Buffer => {
                let accessor = BufferColumnAccessor::resolve(&mut descriptor, chunk)?;
                let mut sum = 0;
                for entity in 0..accessor.len() {
                    sum += accessor.element(entity)?.len();
                }
                sum
            }
            ComponentKind::ZeroSized => 0,
        };
        if descriptor.is_enableable() {
            let bits = EnabledBitView::resolve(&mut descriptor, chunk)?;
            tracing::debug!(
                component = descriptor.component(),
                disabled = bits.disabled_count(),
                entities = bits.len(),
                "enabled bits"
            );
        }
    }
    tracing::debug!(?chunk, ?bytes, "walked chunk");
    Ok(bytes)
}
