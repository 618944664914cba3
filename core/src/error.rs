//! Engine error taxonomy
//!
//! Every failure the engine can surface is a typed variant so that the
//! calling layer can decide whether to retry, reject the input, or show a
//! degraded result. Numerical trouble (`NumericalNonConvergence`) is raised
//! by the internal solvers and recovered locally by the public scoring paths.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item_bank::ItemId;

/// Engine error types with precise error semantics
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request: empty response set, duplicated item, bad rating
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A response references an item the bank does not contain
    #[error("Unknown item referenced: {0}")]
    UnknownItem(ItemId),

    /// Item parameters outside their admissible domain
    #[error("Invalid parameters for item {item_id}: {reason}")]
    InvalidItemParameters {
        item_id: ItemId,
        reason: String,
    },

    /// Configuration record failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Vectors or matrices whose shapes do not agree
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Iterative estimation did not settle within its budget
    #[error("Estimation failed to converge: {iterations} iterations, last delta {last_delta}")]
    NumericalNonConvergence { iterations: usize, last_delta: f64 },

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by callers to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Reject the request; retrying with the same payload cannot succeed
    Input,
    /// Surface to content curation; the bank itself is wrong
    ItemParameters,
    /// Deployment problem in a configuration record
    Configuration,
    /// Solver trouble; a degraded result may be shown
    Numerical,
    /// Payload could not be (de)serialized
    Serialization,
}

impl EngineError {
    /// Classify the error for the calling layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::UnknownItem(_)
            | EngineError::DimensionMismatch { .. } => ErrorKind::Input,
            EngineError::InvalidItemParameters { .. } => ErrorKind::ItemParameters,
            EngineError::InvalidConfiguration(_) => ErrorKind::Configuration,
            EngineError::NumericalNonConvergence { .. } => ErrorKind::Numerical,
            EngineError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn invalid_item(item_id: &ItemId, reason: impl Into<String>) -> Self {
        EngineError::InvalidItemParameters {
            item_id: item_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Type alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;
