//! Psychometric scoring and adaptive-assessment engine
//!
//! Turns item responses, and optionally per-step confidence ratings, into
//! ability estimates, next-item choices, attribute mastery profiles and
//! metacognitive calibration reports.
//!
//! - [`irt`]: 3PL ability estimation (Newton-Raphson MLE with EAP fallback),
//!   the scaled-score mapping, compensatory multidimensional estimation and
//!   the joint ability / speed model for response times.
//! - [`cat`]: computerized adaptive testing sessions with content balancing
//!   and Sympson–Hetter exposure control.
//! - [`cdm`]: DINA / G-DINA posterior inference, entropy-driven CD-CAT and
//!   EM calibration.
//! - [`calibration`]: confidence quadrants, overconfidence index, gap
//!   findings, cross-attempt reliability, case-history analytics and
//!   clinical case selection.
//! - [`validation`]: offline comparison of estimated and empirical item
//!   parameters, and differential item functioning between groups.
//!
//! The engine performs no I/O. Sessions are single-threaded and fully
//! determined by their recorded responses and seed; the item bank and the
//! exposure counters are the only state shared between sessions.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod calibration;
pub mod cat;
pub mod cdm;
pub mod config;
pub mod error;
pub mod irt;
pub mod item_bank;
pub mod response;
pub mod validation;

pub use calibration::{
    CalibrationAnalyzer, CalibrationHistory, CalibrationInput, CalibrationResult, CaseSelector, ConfidenceRating,
    Quadrant,
};
pub use cat::{CatSession, ExposureControl, SessionState, StoppingReason};
pub use cdm::{AttributeSet, CdmEngine, CdmRequest, CdmResult, LatentClassPosterior};
pub use config::{
    CalibrationConfig, CaseSelectionConfig, CatConfig, CdmConfig, ConfigRecord, DifConfig, EmConfig, MirtConfig,
    ResponseTimeConfig, ScoringConfig, ValidationConfig,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use irt::{
    AbilityEstimate, IrtParameters, IrtScorer, MirtEstimator, ResponseTimeModel, ScoreRequest, ScoreResult,
};
pub use item_bank::{ContentArea, Item, ItemBank, ItemId};
pub use response::{ResponsePattern, ResponseRecord};
pub use validation::{DifAnalyzer, EstimationCoefficients, ValidationHarness, ValidationReport};
