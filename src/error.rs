// src/error.rs
//
// Failure kinds the estimator distinguishes. Everything else travels as a
// plain anyhow::Error with context attached at the call site.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimatorError {
    /// Missing or invalid lane file, classifier model, detector name or setting
    #[error("configuration error: {0}")]
    Config(String),

    /// Empty or malformed training / evaluation data
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Detector output does not cover the frames the run needs
    #[error("detection mismatch: {0}")]
    DetectionMismatch(String),
}

impl EstimatorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self::DetectionMismatch(msg.into())
    }
}

/// Recover the estimator error kind from an anyhow chain, if there is one.
pub fn kind_of(err: &anyhow::Error) -> Option<&EstimatorError> {
    err.chain().find_map(|e| e.downcast_ref::<EstimatorError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_survives_context() {
        let result: anyhow::Result<()> = Err(EstimatorError::config("lanes.txt missing").into());
        let err = result.context("loading lanes").unwrap_err();
        assert_eq!(
            kind_of(&err),
            Some(&EstimatorError::Config("lanes.txt missing".to_string()))
        );
    }

    #[test]
    fn test_plain_errors_have_no_kind() {
        let err = anyhow::anyhow!("disk full");
        assert!(kind_of(&err).is_none());
    }
}
