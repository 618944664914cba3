//! Offline validation of item parameter estimates
//!
//! Compares metadata-based (or any other) estimates with empirical benchmark
//! parameters to decide whether the estimation coefficients need retuning.
//! Also screens items for differential functioning between examinee groups.
//! Never used on a live scoring path.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod dif;
pub mod harness;
pub mod metadata;
pub mod report;

pub use dif::{
    chi_square_p_value, mantel_haenszel, stratify, DifAnalyzer, DifDirection, DifGroup, DifReport, DifResponse,
    DifSummary, EtsCategory, Fairness, ItemDif, LordChiSquare, MantelHaenszel, StratumTable,
};
pub use harness::{
    pearson_correlation, EmpiricalParameters, EstimatedParameters, ResidualRow, ValidationHarness, ValidationReport,
    ValidationWarning,
};
pub use metadata::{
    discrimination_from_biserial, EstimationCoefficients, ExamType, InstitutionTier, ItemMetadata, MetadataEstimate,
    MetadataEstimator, PositionPolynomial, Provenance, ReportReference,
};
pub use report::{Comparison, TargetCheck};
