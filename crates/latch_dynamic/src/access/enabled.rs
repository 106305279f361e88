use super::resolver::open_column;
use super::TypeDescriptor;
use crate::component::ComponentId;
use crate::config::EnabledBitConvention;
use crate::error::{AccessError, AccessResult};
use crate::guard::ColumnGuard;
use crate::store::{read_bit, write_bit, Chunk};
use std::sync::atomic::{AtomicU32, Ordering};

/// Per-entity enabled flags of one optional component in a chunk.
///
/// Toggling keeps the chunk's disabled-entity count for the column in
/// step: only an actual enabled/disabled transition changes it.
#[derive(Debug)]
pub struct EnabledBitView<'a> {
    words: Option<*mut u64>,
    count: usize,
    disabled: Option<&'a AtomicU32>,
    convention: EnabledBitConvention,
    component: ComponentId,
    writable: bool,
    _guard: Option<ColumnGuard<'a>>,
}

impl<'a> EnabledBitView<'a> {
    pub fn resolve(descriptor: &mut TypeDescriptor, chunk: &'a Chunk) -> AccessResult<Self> {
        if !descriptor.is_enableable() {
            return Err(AccessError::InvalidComponent {
                component: descriptor.component(),
                operation: "enabled bits (not enableable)",
            });
        }

        let mut view = Self {
            words: None,
            count: 0,
            disabled: None,
            convention: chunk.layout().enabled_bits(),
            component: descriptor.component(),
            writable: descriptor.mode().is_writable(),
            _guard: None,
        };
        let Some(open) = open_column(descriptor, chunk)? else {
            return Ok(view);
        };

        view.words = chunk.enabled_words(open.index);
        view.count = chunk.count();
        view.disabled = Some(chunk.disabled_cell(open.index));
        view._guard = Some(open.guard);
        Ok(view)
    }

    /// True when the chunk's archetype lacks the component.
    #[inline]
    pub fn is_absent(&self) -> bool {
        self.words.is_none()
    }

    /// Number of entities covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_enabled(&self, index: usize) -> AccessResult<bool> {
        let Some(words) = self.words else {
            return Ok(false);
        };
        AccessError::check_index(index, self.count)?;
        // SAFETY: index < count <= capacity, which the words cover.
        let bit = unsafe { read_bit(words, index) };
        Ok(self.convention.enabled_from(bit))
    }

    /// Enable or disable one entity's component.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> AccessResult<()> {
        let Some(words) = self.words else {
            return Ok(());
        };
        if !self.writable {
            return Err(AccessError::ReadOnlyAccess {
                component: self.component,
            });
        }
        AccessError::check_index(index, self.count)?;

        // SAFETY: index is in range and the write guard excludes other views.
        let previous = unsafe { write_bit(words, index, self.convention.bit_for(enabled)) };
        let was_enabled = self.convention.enabled_from(previous);
        if let Some(disabled) = self.disabled {
            match (was_enabled, enabled) {
                (true, false) => {
                    disabled.fetch_add(1, Ordering::AcqRel);
                }
                (false, true) => {
                    disabled.fetch_sub(1, Ordering::AcqRel);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Current disabled-entity count of the column; zero when absent.
    pub fn disabled_count(&self) -> u32 {
        self.disabled.map_or(0, |cell| cell.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{self, FROZEN, MARKER, POSITION, SHIELDED};
    use crate::config::StoreConfig;
    use proptest::prelude::*;

    #[test]
    fn toggles_track_the_disabled_count() {
        let chunk = fixtures::chunk(&[POSITION, SHIELDED, FROZEN], 70);
        let mut descriptor = TypeDescriptor::read_write(SHIELDED, 2).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(view.len(), 70);
        assert!(view.is_enabled(69).unwrap());

        let mut expected = [true; 70];
        for (step, index) in [3, 64, 3, 69, 64, 3, 0, 0, 12].into_iter().enumerate() {
            let enabled = step % 3 == 1;
            view.set_enabled(index, enabled).unwrap();
            expected[index] = enabled;
            let disabled = expected.iter().filter(|&&e| !e).count() as u32;
            assert_eq!(view.disabled_count(), disabled, "after step {step}");
        }
        for (index, &enabled) in expected.iter().enumerate() {
            assert_eq!(view.is_enabled(index).unwrap(), enabled);
        }
        drop(view);

        assert_eq!(chunk.version_of(SHIELDED), Some(2));
        // Other enableable column untouched.
        let mut frozen = TypeDescriptor::read_only(FROZEN).unwrap();
        let other = EnabledBitView::resolve(&mut frozen, &chunk).unwrap();
        assert_eq!(other.disabled_count(), 0);
        assert!((0..70).all(|i| other.is_enabled(i).unwrap()));
    }

    #[test]
    fn same_value_writes_leave_the_count_alone() {
        let chunk = fixtures::chunk(&[FROZEN], 4);
        let mut descriptor = TypeDescriptor::read_write(FROZEN, 1).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        view.set_enabled(1, true).unwrap();
        assert_eq!(view.disabled_count(), 0);
        view.set_enabled(1, false).unwrap();
        view.set_enabled(1, false).unwrap();
        assert_eq!(view.disabled_count(), 1);
        assert_eq!(chunk.disabled_count_of(FROZEN), Some(1));
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let chunk = fixtures::chunk(&[SHIELDED], 3);
        let mut descriptor = TypeDescriptor::read_write(SHIELDED, 1).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        let err = AccessError::IndexOutOfRange { index: 3, len: 3 };
        assert_eq!(view.is_enabled(3), Err(err.clone()));
        assert_eq!(view.set_enabled(3, false), Err(err));
    }

    #[test]
    fn absent_component_reads_disabled_and_ignores_writes() {
        let chunk = fixtures::chunk(&[POSITION], 3);
        let mut descriptor = TypeDescriptor::read_write(SHIELDED, 1).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        assert!(view.is_absent());
        assert_eq!(view.is_enabled(0), Ok(false));
        assert_eq!(view.is_enabled(1_000), Ok(false));
        assert_eq!(view.set_enabled(1_000, false), Ok(()));
        assert_eq!(view.disabled_count(), 0);
    }

    #[test]
    fn non_enableable_component_is_rejected() {
        let chunk = fixtures::chunk(&[POSITION, MARKER], 1);
        for component in [POSITION, MARKER] {
            let mut descriptor = TypeDescriptor::read_only(component).unwrap();
            assert!(matches!(
                EnabledBitView::resolve(&mut descriptor, &chunk),
                Err(AccessError::InvalidComponent { .. })
            ));
        }
    }

    #[test]
    fn read_only_view_refuses_toggles() {
        let chunk = fixtures::chunk(&[SHIELDED], 2);
        let mut descriptor = TypeDescriptor::read_only(SHIELDED).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        assert_eq!(
            view.set_enabled(0, false),
            Err(AccessError::ReadOnlyAccess { component: SHIELDED })
        );
        assert!(view.is_enabled(0).unwrap());
    }

    #[test]
    fn inverted_convention_round_trips() {
        let config = StoreConfig {
            enabled_bits: EnabledBitConvention::SetIsDisabled,
            ..StoreConfig::default()
        };
        let mut chunk = Chunk::new(fixtures::layout_with(&[SHIELDED], &config)).unwrap();
        chunk.push_entities(5).unwrap();

        let mut descriptor = TypeDescriptor::read_write(SHIELDED, 1).unwrap();
        let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();
        assert!(view.is_enabled(4).unwrap());
        view.set_enabled(4, false).unwrap();
        assert!(!view.is_enabled(4).unwrap());
        assert_eq!(view.disabled_count(), 1);

        let words = chunk.enabled_words(0).unwrap();
        assert!(unsafe { read_bit(words, 4) });
    }

    proptest! {
        #[test]
        fn disabled_count_matches_model(
            toggles in prop::collection::vec((0..70usize, any::<bool>()), 0..200),
        ) {
            let chunk = fixtures::chunk(&[SHIELDED], 70);
            let mut descriptor = TypeDescriptor::read_write(SHIELDED, 1).unwrap();
            let mut view = EnabledBitView::resolve(&mut descriptor, &chunk).unwrap();

            let mut model = [true; 70];
            for (index, enabled) in toggles {
                view.set_enabled(index, enabled).unwrap();
                model[index] = enabled;
                let disabled = model.iter().filter(|&&e| !e).count() as u32;
                prop_assert_eq!(view.disabled_count(), disabled);
            }
            for (index, &enabled) in model.iter().enumerate() {
                prop_assert_eq!(view.is_enabled(index).unwrap(), enabled);
            }
        }
    }
}
