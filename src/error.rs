//! Error taxonomy for the coverage pipeline.
//!
//! Each pipeline stage fails with its own variant so the controller can log
//! precisely what went wrong while still returning one generic message to
//! the caller. [`ClaimError::Transport`] is the only non-fatal kind: the
//! controller swallows it.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ClaimError>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Bad input (empty or whitespace-only query).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Index build failure (missing/empty/unparseable document, embed or write failure).
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Query Analyzer failure (model error, timeout, unparseable output).
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Retriever failure (index unreachable or uninitialized, empty input).
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Synthesizer failure (model error, timeout, empty output).
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Push-channel delivery failure. Never aborts a run.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClaimError {
    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimError::Validation(_) => "validation",
            ClaimError::Indexing(_) => "indexing",
            ClaimError::Analysis(_) => "analysis",
            ClaimError::Retrieval(_) => "retrieval",
            ClaimError::Synthesis(_) => "synthesis",
            ClaimError::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let err = ClaimError::Retrieval("index not initialized".into());
        assert_eq!(err.to_string(), "Retrieval error: index not initialized");
        assert_eq!(err.kind(), "retrieval");
    }
}
