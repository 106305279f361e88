// guard.rs - Guard tokens for checked builds
//
// With the `checked` feature every column view holds a borrow on its
// chunk column and every descriptor-set reader holds a disposal sentinel.
// Without it the same types exist as zero-sized no-ops, so the view code
// is identical in both builds.

#[cfg(feature = "checked")]
pub(crate) use checked::{BorrowState, ColumnGuard, DisposeSentinel};
#[cfg(not(feature = "checked"))]
pub(crate) use unchecked::{BorrowState, ColumnGuard, DisposeSentinel};

#[cfg(feature = "checked")]
mod checked {
    use crate::component::ComponentId;
    use crate::error::{AccessError, AccessResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const FREE: usize = 0;
    const WRITER: usize = 1;

    /// Borrow state of one chunk column.
    ///
    /// | State | Meaning |
    /// |------:|--------|
    /// | `0` | Unborrowed |
    /// | `1` | One writer |
    /// | `>= 2` | `state - 1` readers |
    #[derive(Debug, Default)]
    pub(crate) struct BorrowState(AtomicUsize);

    /// Proof that a view's column access does not conflict with any other
    /// live view. Released on drop.
    #[derive(Debug)]
    pub(crate) struct ColumnGuard<'a> {
        state: &'a BorrowState,
        write: bool,
    }

    impl<'a> ColumnGuard<'a> {
        pub(crate) fn acquire(
            state: &'a BorrowState,
            component: ComponentId,
            write: bool,
        ) -> AccessResult<Self> {
            let cell = &state.0;
            if write {
                return match cell.compare_exchange(FREE, WRITER, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => Ok(Self { state, write }),
                    Err(held) => Err(conflict(component, held)),
                };
            }

            let mut current = cell.load(Ordering::Acquire);
            loop {
                if current == WRITER {
                    return Err(conflict(component, current));
                }
                let next = if current == FREE { 2 } else { current + 1 };
                match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return Ok(Self { state, write }),
                    Err(actual) => current = actual,
                }
            }
        }
    }

    impl Drop for ColumnGuard<'_> {
        fn drop(&mut self) {
            let cell = &self.state.0;
            if self.write {
                let prev = cell.swap(FREE, Ordering::AcqRel);
                debug_assert_eq!(prev, WRITER);
            } else {
                let released = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                    debug_assert!(s >= 2);
                    Some(if s == 2 { FREE } else { s - 1 })
                });
                debug_assert!(released.is_ok());
            }
        }
    }

    fn conflict(component: ComponentId, held: usize) -> AccessError {
        let held = if held == WRITER { "writer" } else { "readers" };
        tracing::warn!(component, held, "conflicting column access rejected");
        AccessError::AccessConflict { component, held }
    }

    /// Shared flag flipped when a descriptor set is disposed.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct DisposeSentinel(Arc<AtomicBool>);

    impl DisposeSentinel {
        pub(crate) fn mark_disposed(&self) {
            self.0.store(true, Ordering::Release);
        }

        #[inline]
        pub(crate) fn check(&self) -> AccessResult<()> {
            if self.0.load(Ordering::Acquire) {
                Err(AccessError::UseAfterDispose)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(not(feature = "checked"))]
mod unchecked {
    use crate::component::ComponentId;
    use crate::error::AccessResult;
    use std::marker::PhantomData;

    #[derive(Debug, Default)]
    pub(crate) struct BorrowState;

    #[derive(Debug)]
    pub(crate) struct ColumnGuard<'a>(PhantomData<&'a BorrowState>);

    impl<'a> ColumnGuard<'a> {
        #[inline(always)]
        pub(crate) fn acquire(
            _state: &'a BorrowState,
            _component: ComponentId,
            _write: bool,
        ) -> AccessResult<Self> {
            Ok(Self(PhantomData))
        }
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct DisposeSentinel;

    impl DisposeSentinel {
        #[inline(always)]
        pub(crate) fn mark_disposed(&self) {}

        #[inline(always)]
        pub(crate) fn check(&self) -> AccessResult<()> {
            Ok(())
        }
    }
}
