use crate::component::ComponentId;
use thiserror::Error;

/// Errors raised by type-erased column access.
///
/// All of these are contract violations reported synchronously; none of
/// them are transient. A component missing from a chunk's archetype is
/// not an error and never shows up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("component {component} does not support {operation}")]
    InvalidComponent {
        component: ComponentId,
        operation: &'static str,
    },

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("descriptor set used after disposal")]
    UseAfterDispose,

    #[error("component {component} column is already borrowed ({held})")]
    AccessConflict {
        component: ComponentId,
        held: &'static str,
    },

    #[error("component {component} was resolved read-only")]
    ReadOnlyAccess { component: ComponentId },
}

impl AccessError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    #[inline]
    pub(crate) fn check_index(index: usize, len: usize) -> AccessResult<()> {
        if index < len {
            Ok(())
        } else {
            Err(Self::IndexOutOfRange { index, len })
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
