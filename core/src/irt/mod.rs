//! Item Response Theory scoring
//!
//! The 3PL response model, ability estimation and the reporting scale, plus
//! a multidimensional area model and joint accuracy/speed scoring.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod estimator;
pub mod mirt;
pub mod model;
pub mod response_time;
pub mod scale;

pub use estimator::{AbilityEstimate, EstimationMethod, IrtScorer, ScoreRequest, ScoreResult, SectionPerformance};
pub use mirt::{DimensionProfile, MirtEstimate, MirtEstimator, MirtItem, MirtResponse, RawMirtItem};
pub use model::{DifficultyBand, IrtParameters, ParameterError};
pub use response_time::{
    ClassifiedResponse, ResponseBehavior, ResponseTimeEstimate, ResponseTimeItem, ResponseTimeModel, TimedResponse,
    TimingSummary,
};
pub use scale::ScoreScale;
