//! Error taxonomy shared by every chain element and registry.
//!
//! Policy code (heal, refresh, round robin) never matches on variants
//! directly; it asks [`MeshError::kind`], which sees through the
//! [`MeshError::Stage`] wrapper added at component boundaries.

use std::fmt;

/// Convenience alias used across the workspace.
pub type Result<T, E = MeshError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Component that produced an error, surfaced to callers so a failed
/// request says where it failed without exposing retry internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discover,
    Dial,
    Chain,
    Heal,
    Interdomain,
    /// The call pipeline refused the call before it reached the chain.
    Admission,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Dial => "dial",
            Self::Chain => "chain",
            Self::Heal => "heal",
            Self::Interdomain => "interdomain",
            Self::Admission => "admission",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Flat classification of a [`MeshError`], independent of stage wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Expired,
    Unavailable,
    InvalidArgument,
    Canceled,
    DeadlineExceeded,
}

impl ErrorKind {
    /// Label used for metrics and structured logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Unavailable => "unavailable",
            Self::InvalidArgument => "invalid_argument",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

// ---------------------------------------------------------------------------
// MeshError
// ---------------------------------------------------------------------------

/// Error returned by mesh and registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    /// No matching service, endpoint or registry entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry, token or connection outlived its lifetime.
    #[error("expired: {0}")]
    Expired(String),

    /// A downstream call failed in a way that may succeed on retry.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Malformed name, selector or path. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The owning context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// The owning context reached its deadline.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Error attributed to the component that produced it.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<MeshError>,
    },
}

impl MeshError {
    /// Classification that ignores any stage wrapping.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Canceled => ErrorKind::Canceled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// Outermost stage attached to this error, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Attributes the error to `stage` unless a stage is already attached.
    ///
    /// Context errors stay bare so callers can propagate them verbatim.
    #[must_use]
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } | Self::Canceled | Self::DeadlineExceeded => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// True for transient failures that heal and refresh may retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Expired)
    }

    /// True when the error only reflects the caller's context ending.
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Canceled | ErrorKind::DeadlineExceeded
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
