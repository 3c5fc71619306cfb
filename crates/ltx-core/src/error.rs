/// Failure taxonomy for the resolution pipeline.
///
/// `TransientIo` may be retried within a compile and never persists a
/// negative cache entry. `NotFound` is a genuine absence and may be cached
/// negatively. `Malformed` skips the offending bundle or package and the
/// pipeline continues. `Fatal` is the only variant that propagates to the
/// user without a retry path.
#[derive(Debug, thiserror::Error)]
pub enum LtxError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("engine exited with code {code} and produced no output")]
    EngineFailure { code: i32 },
    #[error("fatal: {0}")]
    Fatal(String),
}

impl LtxError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, LtxError::TransientIo(_))
    }
}
