/// Failure of a registry operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The caller's copy is stale; re-read and retry.
    #[error(
        "{kind} {key} was modified concurrently (have resource version {expected}, stored {actual})"
    )]
    Conflict {
        kind: &'static str,
        key: String,
        expected: String,
        actual: String,
    },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("failed to encode or decode {key}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Turn `NotFound` into `Ok(None)`.
pub trait IgnoreNotFound<T> {
    fn ignore_not_found(self) -> StoreResult<Option<T>>;
}

impl<T> IgnoreNotFound<T> for StoreResult<T> {
    fn ignore_not_found(self) -> StoreResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
