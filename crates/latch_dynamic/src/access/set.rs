// set.rs - Fixed-length descriptor sets
//
// A set is filled once by a producer, scanned by any number of worker
// jobs, and then released. Its memory has one owner at a time: the set,
// then (after `dispose_after`) the release job, then nobody. Workers see
// the set through `DescriptorSetReader`, which in checked builds notices
// when the memory behind it is gone.

use super::{AccessMode, TypeDescriptor};
use crate::component::ComponentId;
use crate::config::{AllocationIntent, TypeSelection};
use crate::error::{AccessError, AccessResult};
use crate::guard::DisposeSentinel;
use crate::jobs::{self, JobHandle};
use std::alloc::Layout;

type Slots = Box<[Option<TypeDescriptor>]>;

/// Fixed-length array of type descriptors with explicit disposal.
///
/// Slots start empty and never match a lookup until written. Once
/// disposed, every call reports [`AccessError::UseAfterDispose`].
#[derive(Debug)]
pub struct TypeDescriptorSet {
    slots: Option<Slots>,
    len: usize,
    intent: AllocationIntent,
    sentinel: DisposeSentinel,
}

impl TypeDescriptorSet {
    /// Create a set of `length` empty slots.
    pub fn new(length: isize, intent: AllocationIntent) -> AccessResult<Self> {
        let len = usize::try_from(length).map_err(|_| {
            AccessError::invalid_argument(format!("descriptor set length {length} is negative"))
        })?;
        Layout::array::<Option<TypeDescriptor>>(len).map_err(|_| {
            AccessError::invalid_argument(format!("descriptor set length {len} is too large"))
        })?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(len).map_err(|err| {
            AccessError::invalid_argument(format!("descriptor set of {len} slots: {err}"))
        })?;
        slots.resize(len, None);

        tracing::debug!(len, ?intent, "created descriptor set");
        Ok(Self {
            slots: Some(slots.into_boxed_slice()),
            len,
            intent,
            sentinel: DisposeSentinel::default(),
        })
    }

    /// Build a fully populated set from a type selection.
    ///
    /// Every descriptor gets `mode`, and `version` for read-write access.
    pub fn from_selection(
        selection: &TypeSelection,
        mode: AccessMode,
        version: u32,
        intent: AllocationIntent,
    ) -> AccessResult<Self> {
        let ids = selection.resolve()?;
        let length = isize::try_from(ids.len())
            .map_err(|_| AccessError::invalid_argument("type selection is too large"))?;
        let mut set = Self::new(length, intent)?;
        for (index, id) in ids.into_iter().enumerate() {
            let descriptor = TypeDescriptor::for_component(id, mode)?.with_version(version);
            set.set(index, descriptor)?;
        }
        Ok(set)
    }

    /// Number of slots, fixed at creation.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn intent(&self) -> AllocationIntent {
        self.intent
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.slots.is_none()
    }

    pub fn set(&mut self, index: usize, descriptor: TypeDescriptor) -> AccessResult<()> {
        let slots = self.slots_mut()?;
        AccessError::check_index(index, slots.len())?;
        slots[index] = Some(descriptor);
        Ok(())
    }

    /// Descriptor in slot `index`; `None` for a slot never written.
    pub fn get(&self, index: usize) -> AccessResult<Option<&TypeDescriptor>> {
        let slots = self.slots()?;
        AccessError::check_index(index, slots.len())?;
        Ok(slots[index].as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> AccessResult<Option<&mut TypeDescriptor>> {
        let slots = self.slots_mut()?;
        AccessError::check_index(index, slots.len())?;
        Ok(slots[index].as_mut())
    }

    /// Slot index of the first descriptor for `component`.
    pub fn position(&self, component: ComponentId) -> AccessResult<Option<usize>> {
        Ok(find(self.slots()?, component))
    }

    /// First descriptor for `component`, scanning every slot.
    pub fn lookup(&self, component: ComponentId) -> AccessResult<Option<&TypeDescriptor>> {
        let slots = self.slots()?;
        Ok(find(slots, component).and_then(|index| slots[index].as_ref()))
    }

    pub fn lookup_mut(
        &mut self,
        component: ComponentId,
    ) -> AccessResult<Option<&mut TypeDescriptor>> {
        let slots = self.slots_mut()?;
        Ok(find(slots, component).and_then(|index| slots[index].as_mut()))
    }

    /// Written descriptors in slot order.
    pub fn iter(&self) -> AccessResult<impl Iterator<Item = &TypeDescriptor>> {
        Ok(self.slots()?.iter().flatten())
    }

    /// Hand out a read handle for worker jobs.
    ///
    /// # Safety
    /// The reader points into the set's memory without owning it. Every job
    /// using it must finish before the memory is freed: either dispose with
    /// [`dispose_after`](Self::dispose_after) listing those jobs, or make
    /// sure they completed before calling `dispose_now` or dropping the
    /// set. Checked builds report use after disposal instead of reading
    /// freed memory, but only when the access does not race the release.
    pub unsafe fn reader(&self) -> AccessResult<DescriptorSetReader> {
        let slots = self.slots()?;
        Ok(DescriptorSetReader {
            slots: slots.as_ptr(),
            len: slots.len(),
            sentinel: self.sentinel.clone(),
        })
    }

    /// Free the slots now.
    pub fn dispose_now(&mut self) -> AccessResult<()> {
        let slots = self.slots.take().ok_or(AccessError::UseAfterDispose)?;
        drop(slots);
        self.sentinel.mark_disposed();
        tracing::debug!(len = self.len, intent = ?self.intent, "disposed descriptor set");
        Ok(())
    }

    /// Free the slots once every job in `deps` has finished.
    ///
    /// The set is unusable as soon as this returns. Readers handed to the
    /// dependency jobs stay valid until the returned release job runs.
    pub fn dispose_after(&mut self, deps: &[JobHandle]) -> AccessResult<JobHandle> {
        let slots = self.slots.take().ok_or(AccessError::UseAfterDispose)?;
        let sentinel = self.sentinel.clone();
        let (len, intent) = (self.len, self.intent);

        let after = JobHandle::combine(deps);
        tracing::debug!(len, ?intent, deps = deps.len(), "scheduled descriptor set release");
        Ok(jobs::schedule(&[after], move || {
            sentinel.mark_disposed();
            drop(slots);
            tracing::debug!(len, ?intent, "released descriptor set");
        }))
    }

    fn slots(&self) -> AccessResult<&[Option<TypeDescriptor>]> {
        self.slots.as_deref().ok_or(AccessError::UseAfterDispose)
    }

    fn slots_mut(&mut self) -> AccessResult<&mut [Option<TypeDescriptor>]> {
        self.slots.as_deref_mut().ok_or(AccessError::UseAfterDispose)
    }
}

impl Drop for TypeDescriptorSet {
    fn drop(&mut self) {
        if self.slots.take().is_some() {
            self.sentinel.mark_disposed();
            tracing::warn!(len = self.len, intent = ?self.intent, "descriptor set dropped without disposal");
        }
    }
}

fn find(slots: &[Option<TypeDescriptor>], component: ComponentId) -> Option<usize> {
    slots
        .iter()
        .position(|slot| slot.is_some_and(|d| d.component() == component))
}

/// Shared read handle to a [`TypeDescriptorSet`] for worker jobs.
///
/// Descriptors come out by value so each worker keeps its own column
/// cache.
#[derive(Debug, Clone)]
pub struct DescriptorSetReader {
    slots: *const Option<TypeDescriptor>,
    len: usize,
    sentinel: DisposeSentinel,
}

// SAFETY: the reader only reads slots, which nobody writes while readers
// exist; `TypeDescriptorSet::reader` makes the caller keep them alive.
unsafe impl Send for DescriptorSetReader {}
unsafe impl Sync for DescriptorSetReader {}

impl DescriptorSetReader {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> AccessResult<Option<TypeDescriptor>> {
        let slots = self.slots()?;
        AccessError::check_index(index, slots.len())?;
        Ok(slots[index])
    }

    pub fn lookup(&self, component: ComponentId) -> AccessResult<Option<TypeDescriptor>> {
        let slots = self.slots()?;
        Ok(find(slots, component).and_then(|index| slots[index]))
    }

    /// Copies of every written descriptor in slot order.
    pub fn descriptors(&self) -> AccessResult<Vec<TypeDescriptor>> {
        Ok(self.slots()?.iter().flatten().copied().collect())
    }

    fn slots(&self) -> AccessResult<&[Option<TypeDescriptor>]> {
        self.sentinel.check()?;
        // SAFETY: the slots are alive per the contract of `reader`.
        Ok(unsafe { std::slice::from_raw_parts(self.slots, self.len) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{self, FROZEN, POSITION, SHIELDED, VELOCITY, WAYPOINTS};
    use crate::access::ByteColumnView;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn descriptor(component: ComponentId) -> TypeDescriptor {
        TypeDescriptor::read_only(component).unwrap()
    }

    #[test]
    fn lookup_finds_written_slots() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(3, AllocationIntent::Frame).unwrap();
        set.set(0, descriptor(POSITION)).unwrap();
        set.set(1, descriptor(VELOCITY)).unwrap();
        set.set(2, descriptor(SHIELDED)).unwrap();

        let found = set.lookup(VELOCITY).unwrap().unwrap();
        assert_eq!(found.component(), VELOCITY);
        assert_eq!(set.position(VELOCITY), Ok(Some(1)));
        assert!(set.lookup(FROZEN).unwrap().is_none());

        set.dispose_now().unwrap();
        assert!(set.is_disposed());
        assert!(matches!(set.lookup(VELOCITY), Err(AccessError::UseAfterDispose)));
        assert_eq!(set.dispose_now(), Err(AccessError::UseAfterDispose));
    }

    #[test]
    fn empty_slots_never_match() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(4, AllocationIntent::Job).unwrap();
        set.set(2, descriptor(WAYPOINTS)).unwrap();
        assert!(set.get(0).unwrap().is_none());
        assert_eq!(set.position(WAYPOINTS), Ok(Some(2)));
        assert_eq!(set.iter().unwrap().count(), 1);
        set.dispose_now().unwrap();
    }

    #[test]
    fn first_match_wins() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(2, AllocationIntent::Frame).unwrap();
        set.set(0, descriptor(POSITION).with_version(1)).unwrap();
        set.set(1, descriptor(POSITION).with_version(2)).unwrap();
        assert_eq!(set.lookup(POSITION).unwrap().map(|d| d.version()), Some(1));

        set.lookup_mut(POSITION).unwrap().unwrap().set_version(5);
        assert_eq!(set.get(0).unwrap().map(|d| d.version()), Some(5));
        set.dispose_now().unwrap();
    }

    #[test]
    fn bounds_are_enforced() {
        fixtures::register();
        assert!(matches!(
            TypeDescriptorSet::new(-1, AllocationIntent::Frame),
            Err(AccessError::InvalidArgument { .. })
        ));
        assert!(matches!(
            TypeDescriptorSet::new(isize::MAX, AllocationIntent::Frame),
            Err(AccessError::InvalidArgument { .. })
        ));

        let mut set = TypeDescriptorSet::new(2, AllocationIntent::Frame).unwrap();
        assert_eq!(
            set.set(2, descriptor(POSITION)),
            Err(AccessError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert!(set.get(5).is_err());
        set.dispose_now().unwrap();

        let mut empty = TypeDescriptorSet::new(0, AllocationIntent::Persistent).unwrap();
        assert!(empty.is_empty());
        assert!(empty.lookup(POSITION).unwrap().is_none());
        empty.dispose_now().unwrap();
    }

    #[test]
    fn selection_populates_in_order() {
        fixtures::register();
        let selection = TypeSelection::from_ids([SHIELDED, POSITION, SHIELDED]);
        let mut set =
            TypeDescriptorSet::from_selection(&selection, AccessMode::ReadWrite, 8, AllocationIntent::Job)
                .unwrap();
        assert_eq!(set.len(), 2);
        let ids: Vec<_> = set.iter().unwrap().map(|d| d.component()).collect();
        assert_eq!(ids, [SHIELDED, POSITION]);
        assert!(set.iter().unwrap().all(|d| d.mode().is_writable() && d.version() == 8));
        set.dispose_now().unwrap();
    }

    #[test]
    fn release_waits_for_dependencies() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(1, AllocationIntent::Job).unwrap();
        set.set(0, descriptor(POSITION)).unwrap();
        let reader = unsafe { set.reader() }.unwrap();

        let (readers_done, trigger) = JobHandle::external();
        let release = set.dispose_after(&[readers_done]).unwrap();
        assert!(matches!(set.get(0), Err(AccessError::UseAfterDispose)));
        assert!(matches!(
            set.dispose_after(&[]),
            Err(AccessError::UseAfterDispose)
        ));

        // The release cannot run before the trigger fires.
        assert!(!release.is_completed());
        assert_eq!(reader.lookup(POSITION).unwrap().map(|d| d.component()), Some(POSITION));

        trigger.fire();
        release.complete();
        assert!(release.is_completed());
        #[cfg(feature = "checked")]
        assert_eq!(reader.get(0), Err(AccessError::UseAfterDispose));
    }

    #[test]
    fn release_runs_when_a_dependency_is_abandoned() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(1, AllocationIntent::Job).unwrap();
        set.set(0, descriptor(POSITION)).unwrap();
        let reader = unsafe { set.reader() }.unwrap();

        let (outside, trigger) = JobHandle::external();
        let release = set.dispose_after(&[outside]).unwrap();
        drop(trigger);
        release.complete();
        #[cfg(feature = "checked")]
        assert_eq!(reader.get(0), Err(AccessError::UseAfterDispose));
        #[cfg(not(feature = "checked"))]
        let _ = reader;
    }

    #[test]
    fn readers_work_from_jobs() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(2, AllocationIntent::Job).unwrap();
        set.set(1, descriptor(VELOCITY)).unwrap();

        let chunks = [
            Arc::new(fixtures::chunk(&[VELOCITY], 3)),
            Arc::new(fixtures::chunk(&[POSITION], 5)),
            Arc::new(fixtures::chunk(&[POSITION, VELOCITY], 2)),
        ];
        let reader = unsafe { set.reader() }.unwrap();
        let bytes = Arc::new(AtomicUsize::new(0));
        let walks: Vec<JobHandle> = chunks
            .iter()
            .map(|chunk| {
                let (reader, bytes, chunk) = (reader.clone(), bytes.clone(), chunk.clone());
                jobs::schedule(&[], move || {
                    let mut descriptor = reader.lookup(VELOCITY).unwrap().unwrap();
                    let view = ByteColumnView::resolve(&mut descriptor, &chunk).unwrap();
                    bytes.fetch_add(view.len(), Ordering::SeqCst);
                })
            })
            .collect();

        set.dispose_after(&walks).unwrap().complete();
        assert!(walks.iter().all(JobHandle::is_completed));
        assert_eq!(bytes.load(Ordering::SeqCst), (3 + 2) * 8);
    }

    #[cfg(feature = "checked")]
    #[test]
    fn dropping_undisposed_set_invalidates_readers() {
        fixtures::register();
        let mut set = TypeDescriptorSet::new(1, AllocationIntent::Persistent).unwrap();
        set.set(0, descriptor(POSITION)).unwrap();
        let reader = unsafe { set.reader() }.unwrap();
        drop(set);
        assert_eq!(reader.lookup(POSITION), Err(AccessError::UseAfterDispose));
    }
}
