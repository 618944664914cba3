//! Metacognitive calibration
//!
//! Per-case quadrant analysis of confidence-rated reasoning steps, a
//! cross-attempt reliability model of how well ratings predict accuracy,
//! longitudinal analytics over a learner's case history (error cascades,
//! Dunning-Kruger index, drift) and selection of the next clinical case.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod analyzer;
pub mod case_selection;
pub mod history;
pub mod quadrant;
pub mod reliability;

pub use analyzer::{
    CalibrationAnalyzer, CalibrationInput, CalibrationLevel, CalibrationResult, ConfidenceLevelResult, Lacuna,
    LacunaType, QuadrantCounts,
};
pub use case_selection::{
    CaseRecommendation, CaseScores, CaseSelector, ClinicalCase, SelectionReason, DEFAULT_LEVEL_OFFSETS,
};
pub use history::{
    AreaCalibration, CalibrationDrift, CalibrationHistory, CalibrationTrend, CascadeAnalysis, CaseAttempt,
    DunningKruger, DunningKrugerZone, LevelTransition, ReasoningProfile, TimelinePoint,
};
pub use quadrant::{ConfidenceRating, Quadrant};
pub use reliability::{ConfidenceBin, ReliabilityDiagnostics, ReliabilityModel, ReliabilityPoint};
