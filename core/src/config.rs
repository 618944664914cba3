//! Engine configuration records
//!
//! Every tunable of the engine lives in a plain serde record with a
//! `Default` matching production values. Records are validated on load and
//! handed to the engine by value; nothing here is process-global.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cdm::attributes::MAX_ATTRIBUTES;
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ContentArea;

/// Loadable, self-validating configuration record
pub trait ConfigRecord: DeserializeOwned {
    /// Check the record's invariants
    fn validate(&self) -> EngineResult<()>;

    /// Parse a record from JSON and validate it
    fn from_json_str(json: &str) -> EngineResult<Self> {
        let record: Self = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidConfiguration(message.into())
}

fn require_unit_interval(name: &str, value: f64, open: bool) -> EngineResult<()> {
    let inside = if open {
        value > 0.0 && value < 1.0
    } else {
        (0.0..=1.0).contains(&value)
    };
    if !inside {
        let range = if open { "(0, 1)" } else { "[0, 1]" };
        return Err(invalid(format!("{} must lie in {}, got {}", name, range, value)));
    }
    Ok(())
}

/// IRT scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Lower bound of the ability scale
    pub theta_min: f64,

    /// Upper bound of the ability scale
    pub theta_max: f64,

    /// Quadrature nodes for the EAP fallback
    pub quadrature_points: usize,

    /// Newton-Raphson iteration cap
    pub max_iterations: usize,

    /// Convergence tolerance on |Δθ|
    pub tolerance: f64,

    /// Reporting scale: score = mean + sd·θ
    pub score_mean: f64,
    pub score_sd: f64,
    pub score_min: f64,
    pub score_max: f64,

    /// Scaled score required to pass
    pub pass_threshold: f64,

    /// Coverage of the reported confidence interval
    pub confidence_level: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            theta_min: -4.0,
            theta_max: 4.0,
            quadrature_points: 81,
            max_iterations: 100,
            tolerance: 1e-4,
            score_mean: 500.0,
            score_sd: 100.0,
            score_min: 0.0,
            score_max: 1000.0,
            pass_threshold: 600.0,
            confidence_level: 0.95,
        }
    }
}

impl ConfigRecord for ScoringConfig {
    fn validate(&self) -> EngineResult<()> {
        if !self.theta_min.is_finite() || !self.theta_max.is_finite() {
            return Err(invalid("theta bounds must be finite"));
        }
        if !(self.theta_min < self.theta_max) {
            return Err(invalid("theta_min must be below theta_max"));
        }
        if self.quadrature_points < 2 {
            return Err(invalid("at least two quadrature points are required"));
        }
        if self.max_iterations == 0 || !(self.tolerance > 0.0) {
            return Err(invalid("Newton-Raphson needs a positive iteration cap and tolerance"));
        }
        if !(self.score_sd > 0.0) || !(self.score_min < self.score_max) {
            return Err(invalid("score scale must be increasing"));
        }
        if !(self.score_min..=self.score_max).contains(&self.pass_threshold) {
            return Err(invalid(format!(
                "pass threshold {} outside the reporting scale",
                self.pass_threshold
            )));
        }
        require_unit_interval("confidence_level", self.confidence_level, true)
    }
}

/// Default per-area target proportions for content balancing
fn default_area_targets() -> BTreeMap<ContentArea, f64> {
    [
        "clinica_medica",
        "cirurgia",
        "ginecologia_obstetricia",
        "pediatria",
        "saude_coletiva",
    ]
    .into_iter()
    .map(|area| (ContentArea::from(area), 0.2))
    .collect()
}

/// Adaptive test parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatConfig {
    /// Minimum items before the SE criterion may stop the test
    pub min_items: usize,

    /// Hard cap on administered items
    pub max_items: usize,

    /// Precision target for the standard error
    pub target_se: f64,

    /// Whether selection steers toward under-represented areas
    pub content_balancing: bool,

    /// Target share of the test per content area
    pub area_targets: BTreeMap<ContentArea, f64>,

    /// Upper bound on the rate any single item is administered
    pub max_exposure_rate: f64,

    /// Sessions observed before the exposure throttle engages
    pub exposure_warm_up_sessions: u64,

    /// Starting ability before any response
    pub initial_theta: f64,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            min_items: 30,
            max_items: 80,
            target_se: 0.30,
            content_balancing: true,
            area_targets: default_area_targets(),
            max_exposure_rate: 0.25,
            exposure_warm_up_sessions: 20,
            initial_theta: 0.0,
        }
    }
}

impl CatConfig {
    /// Smallest permitted `min_items`
    pub const MIN_TEST_LENGTH: usize = 10;

    /// Largest permitted `max_items`
    pub const MAX_TEST_LENGTH: usize = 180;
}

impl ConfigRecord for CatConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.min_items < Self::MIN_TEST_LENGTH
            || self.min_items > self.max_items
            || self.max_items > Self::MAX_TEST_LENGTH
        {
            return Err(invalid(format!(
                "item bounds must satisfy {} <= min ({}) <= max ({}) <= {}",
                Self::MIN_TEST_LENGTH,
                self.min_items,
                self.max_items,
                Self::MAX_TEST_LENGTH
            )));
        }
        if !(self.target_se > 0.0) {
            return Err(invalid("target_se must be positive"));
        }
        require_unit_interval("max_exposure_rate", self.max_exposure_rate, false)?;
        if self.max_exposure_rate == 0.0 {
            return Err(invalid("max_exposure_rate must be positive"));
        }
        if self.area_targets.values().any(|&t| !(t >= 0.0) || !t.is_finite()) {
            return Err(invalid("area targets must be non-negative"));
        }
        if self.content_balancing && self.area_targets.values().sum::<f64>() <= 0.0 {
            return Err(invalid("content balancing needs at least one positive area target"));
        }
        if !self.initial_theta.is_finite() {
            return Err(invalid("initial_theta must be finite"));
        }
        Ok(())
    }
}

/// EM-MMLE calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmConfig {
    pub max_iterations: usize,

    /// Stop when |ΔLL| falls below this
    pub convergence_threshold: f64,

    /// Bounds applied to every re-estimated slip and guess
    pub min_slip_guess: f64,
    pub max_slip_guess: f64,

    /// Floor for class priors before renormalization
    pub min_class_prior: f64,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            convergence_threshold: 1e-4,
            min_slip_guess: 0.001,
            max_slip_guess: 0.499,
            min_class_prior: 1e-6,
        }
    }
}

impl ConfigRecord for EmConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.max_iterations == 0 || !(self.convergence_threshold > 0.0) {
            return Err(invalid("EM needs a positive iteration cap and threshold"));
        }
        if !(0.0 < self.min_slip_guess && self.min_slip_guess < self.max_slip_guess && self.max_slip_guess < 0.5) {
            return Err(invalid("slip/guess bounds must satisfy 0 < min < max < 0.5"));
        }
        if !(self.min_class_prior > 0.0 && self.min_class_prior < 1.0) {
            return Err(invalid("min_class_prior must lie in (0, 1)"));
        }
        Ok(())
    }
}

/// Cognitive diagnostic model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdmConfig {
    /// Number of cognitive attributes K
    pub attributes: usize,

    /// DINA starting values
    pub default_slip: f64,
    pub default_guess: f64,

    /// CD-CAT stops once posterior entropy (bits) falls below this
    pub entropy_threshold: f64,

    /// CD-CAT item budget
    pub max_items: usize,

    pub em: EmConfig,
}

impl Default for CdmConfig {
    fn default() -> Self {
        Self {
            attributes: 6,
            default_slip: 0.1,
            default_guess: 0.2,
            entropy_threshold: 0.5,
            max_items: 30,
            em: EmConfig::default(),
        }
    }
}

impl ConfigRecord for CdmConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.attributes == 0 || self.attributes > MAX_ATTRIBUTES {
            return Err(invalid(format!(
                "attribute count must lie in 1..={}, got {}",
                MAX_ATTRIBUTES, self.attributes
            )));
        }
        require_unit_interval("default_slip", self.default_slip, true)?;
        require_unit_interval("default_guess", self.default_guess, true)?;
        if self.default_guess >= 1.0 - self.default_slip {
            return Err(invalid("guess must be below 1 - slip"));
        }
        if !(self.entropy_threshold >= 0.0) || self.max_items == 0 {
            return Err(invalid("CD-CAT needs a non-negative entropy threshold and an item budget"));
        }
        self.em.validate()
    }
}

/// Metacognitive calibration thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Ratings at or above this are high confidence
    pub high_confidence: u8,

    /// Ratings at or below this are low confidence
    pub low_confidence: u8,

    /// |overconfidence index| that triggers an insight
    pub insight_threshold: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            high_confidence: 4,
            low_confidence: 2,
            insight_threshold: 0.2,
        }
    }
}

impl ConfigRecord for CalibrationConfig {
    fn validate(&self) -> EngineResult<()> {
        if !(1 <= self.low_confidence
            && self.low_confidence < self.high_confidence
            && self.high_confidence <= 5)
        {
            return Err(invalid("confidence thresholds must satisfy 1 <= low < high <= 5"));
        }
        require_unit_interval("insight_threshold", self.insight_threshold, true)
    }
}

/// Offline validation harness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Coverage below this emits a warning
    pub min_coverage_rate: f64,

    /// Biserial-to-discrimination scale factor
    pub biserial_factor: f64,
    pub min_discrimination: f64,
    pub max_discrimination: f64,

    /// Target metrics checked in the report
    pub difficulty_mae_target: f64,
    pub difficulty_correlation_target: f64,
    pub discrimination_correlation_target: f64,

    /// Rows listed in the worst-error table
    pub worst_errors: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_coverage_rate: 0.8,
            biserial_factor: 3.0,
            min_discrimination: 0.3,
            max_discrimination: 2.5,
            difficulty_mae_target: 0.3,
            difficulty_correlation_target: 0.7,
            discrimination_correlation_target: 0.6,
            worst_errors: 10,
        }
    }
}

impl ConfigRecord for ValidationConfig {
    fn validate(&self) -> EngineResult<()> {
        require_unit_interval("min_coverage_rate", self.min_coverage_rate, false)?;
        if !(self.biserial_factor > 0.0)
            || !(0.0 < self.min_discrimination && self.min_discrimination < self.max_discrimination)
        {
            return Err(invalid("discrimination mapping must be positive and increasing"));
        }
        if !(self.difficulty_mae_target > 0.0) {
            return Err(invalid("difficulty_mae_target must be positive"));
        }
        Ok(())
    }
}

/// Differential item functioning screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifConfig {
    /// Total-score strata for the Mantel-Haenszel statistic
    pub strata: usize,

    /// Items with fewer responses per group are skipped
    pub min_group_size: usize,

    pub significance_level: f64,

    /// ETS |Δ_MH| cut-offs for categories B and C
    pub moderate_delta: f64,
    pub large_delta: f64,

    /// |Δ_MH| above which the item is said to favor a group
    pub direction_threshold: f64,

    /// Standard errors assumed by Lord's chi-square
    pub lord_difficulty_se: f64,
    pub lord_discrimination_se: f64,
}

impl Default for DifConfig {
    fn default() -> Self {
        Self {
            strata: 5,
            min_group_size: 10,
            significance_level: 0.05,
            moderate_delta: 1.0,
            large_delta: 1.5,
            direction_threshold: 0.5,
            lord_difficulty_se: 0.3,
            lord_discrimination_se: 0.15,
        }
    }
}

impl ConfigRecord for DifConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.strata == 0 || self.min_group_size == 0 {
            return Err(invalid("DIF needs at least one stratum and a positive group size"));
        }
        require_unit_interval("significance_level", self.significance_level, true)?;
        if !(0.0 < self.moderate_delta && self.moderate_delta < self.large_delta) {
            return Err(invalid("ETS cut-offs must satisfy 0 < moderate < large"));
        }
        if !(self.direction_threshold >= 0.0) {
            return Err(invalid("direction_threshold must be non-negative"));
        }
        if !(self.lord_difficulty_se > 0.0 && self.lord_discrimination_se > 0.0) {
            return Err(invalid("Lord standard errors must be positive"));
        }
        Ok(())
    }
}

/// Compensatory multidimensional IRT scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirtConfig {
    /// One latent dimension per content area, in this order
    pub dimensions: Vec<ContentArea>,

    pub max_iterations: usize,

    /// Convergence tolerance on max |Δθ_k|
    pub tolerance: f64,

    /// θ_k is clamped to [-theta_bound, theta_bound]
    pub theta_bound: f64,

    /// Step halvings tried when a Newton step lowers the posterior
    pub max_step_halvings: usize,

    /// Loading on non-primary dimensions when lifting a unidimensional item
    pub cross_loading: f64,

    /// Dimensions with fewer items are flagged as weakly measured
    pub min_items_per_dimension: usize,
}

impl Default for MirtConfig {
    fn default() -> Self {
        Self {
            dimensions: default_area_targets().into_keys().collect(),
            max_iterations: 25,
            tolerance: 1e-3,
            theta_bound: 4.0,
            max_step_halvings: 5,
            cross_loading: 0.3,
            min_items_per_dimension: 5,
        }
    }
}

impl ConfigRecord for MirtConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.dimensions.is_empty() {
            return Err(invalid("MIRT needs at least one dimension"));
        }
        let distinct: BTreeSet<_> = self.dimensions.iter().collect();
        if distinct.len() != self.dimensions.len() {
            return Err(invalid("MIRT dimensions must be distinct"));
        }
        if self.max_iterations == 0 || !(self.tolerance > 0.0) {
            return Err(invalid("MIRT needs a positive iteration cap and tolerance"));
        }
        if !(self.theta_bound > 0.0 && self.theta_bound.is_finite()) {
            return Err(invalid("theta_bound must be positive and finite"));
        }
        if !(self.cross_loading >= 0.0 && self.cross_loading.is_finite()) {
            return Err(invalid("cross_loading must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Joint accuracy and response-time scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTimeConfig {
    /// Nodes per axis of the (θ, τ) quadrature grid
    pub grid_points: usize,

    pub theta_min: f64,
    pub theta_max: f64,
    pub tau_min: f64,
    pub tau_max: f64,

    /// Prior correlation between ability and speed
    pub prior_correlation: f64,

    /// Residual z-scores separating the behavior classes
    pub rapid_guess_z: f64,
    pub fast_z: f64,
    pub slow_z: f64,
    pub aberrant_slow_z: f64,

    /// Time intensity β = intercept + slope·b when lifting an IRT item
    pub intensity_intercept: f64,
    pub intensity_slope: f64,
    pub time_variance: f64,

    /// Floor on response time before the log transform
    pub min_seconds: f64,
}

impl Default for ResponseTimeConfig {
    fn default() -> Self {
        Self {
            grid_points: 21,
            theta_min: -4.0,
            theta_max: 4.0,
            tau_min: -3.0,
            tau_max: 3.0,
            prior_correlation: 0.2,
            rapid_guess_z: -2.0,
            fast_z: -1.0,
            slow_z: 1.0,
            aberrant_slow_z: 2.0,
            intensity_intercept: 3.5,
            intensity_slope: 0.5,
            time_variance: 0.5,
            min_seconds: 0.1,
        }
    }
}

impl ConfigRecord for ResponseTimeConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.grid_points < 2 {
            return Err(invalid("the (θ, τ) grid needs at least two points per axis"));
        }
        let finite = [self.theta_min, self.theta_max, self.tau_min, self.tau_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite || !(self.theta_min < self.theta_max) || !(self.tau_min < self.tau_max) {
            return Err(invalid("grid bounds must be finite and increasing"));
        }
        if !(self.prior_correlation > -1.0 && self.prior_correlation < 1.0) {
            return Err(invalid("prior_correlation must lie in (-1, 1)"));
        }
        if !(self.rapid_guess_z < self.fast_z && self.fast_z < self.slow_z && self.slow_z < self.aberrant_slow_z) {
            return Err(invalid("behavior thresholds must be increasing"));
        }
        if !(self.time_variance > 0.0) || !(self.min_seconds > 0.0) {
            return Err(invalid("time variance and minimum seconds must be positive"));
        }
        Ok(())
    }
}

/// Multi-objective clinical case selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSelectionConfig {
    pub information_weight: f64,
    pub calibration_weight: f64,
    pub cascade_weight: f64,
    pub coverage_weight: f64,
    pub difficulty_weight: f64,

    /// Attempts before calibration and cascade terms are used
    pub warm_up_attempts: usize,

    /// Target difficulty sits this far above the current θ
    pub difficulty_step: f64,

    /// Cases seen in this many latest attempts are skipped
    pub recent_window: usize,

    /// The pick is drawn uniformly from this many best candidates
    pub top_candidates: usize,

    /// Share of attempts each area should receive
    pub target_area_share: f64,
}

impl Default for CaseSelectionConfig {
    fn default() -> Self {
        Self {
            information_weight: 0.30,
            calibration_weight: 0.25,
            cascade_weight: 0.15,
            coverage_weight: 0.15,
            difficulty_weight: 0.15,
            warm_up_attempts: 3,
            difficulty_step: 0.3,
            recent_window: 10,
            top_candidates: 3,
            target_area_share: 0.2,
        }
    }
}

impl ConfigRecord for CaseSelectionConfig {
    fn validate(&self) -> EngineResult<()> {
        let weights = [
            self.information_weight,
            self.calibration_weight,
            self.cascade_weight,
            self.coverage_weight,
            self.difficulty_weight,
        ];
        if weights.iter().any(|w| !(*w >= 0.0)) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(invalid("selection weights must be non-negative and not all zero"));
        }
        if self.top_candidates == 0 {
            return Err(invalid("top_candidates must be positive"));
        }
        if !(self.difficulty_step.is_finite()) {
            return Err(invalid("difficulty_step must be finite"));
        }
        require_unit_interval("target_area_share", self.target_area_share, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ScoringConfig::default().validate().is_ok());
        assert!(CatConfig::default().validate().is_ok());
        assert!(CdmConfig::default().validate().is_ok());
        assert!(CalibrationConfig::default().validate().is_ok());
        assert!(ValidationConfig::default().validate().is_ok());
        assert!(DifConfig::default().validate().is_ok());
        assert!(MirtConfig::default().validate().is_ok());
        assert!(ResponseTimeConfig::default().validate().is_ok());
        assert!(CaseSelectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_scoring_theta_bounds_must_be_finite() {
        let open_ended = ScoringConfig {
            theta_max: f64::INFINITY,
            ..ScoringConfig::default()
        };
        assert!(open_ended.validate().is_err());

        let nan = ScoringConfig {
            theta_min: f64::NAN,
            ..ScoringConfig::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_cat_bounds_enforced() {
        let too_short = CatConfig {
            min_items: 5,
            ..CatConfig::default()
        };
        assert!(too_short.validate().is_err());

        let inverted = CatConfig {
            min_items: 50,
            max_items: 40,
            ..CatConfig::default()
        };
        assert!(inverted.validate().is_err());

        let too_long = CatConfig {
            max_items: 181,
            ..CatConfig::default()
        };
        assert!(too_long.validate().is_err());

        let edge = CatConfig {
            min_items: 10,
            max_items: 180,
            ..CatConfig::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_analysis_records_reject_degenerate_settings() {
        let inverted_ets = DifConfig {
            moderate_delta: 2.0,
            ..DifConfig::default()
        };
        assert!(inverted_ets.validate().is_err());

        let repeated = MirtConfig {
            dimensions: vec![ContentArea::from("cirurgia"), ContentArea::from("cirurgia")],
            ..MirtConfig::default()
        };
        assert!(repeated.validate().is_err());

        let degenerate_prior = ResponseTimeConfig {
            prior_correlation: 1.0,
            ..ResponseTimeConfig::default()
        };
        assert!(degenerate_prior.validate().is_err());

        let silent = CaseSelectionConfig {
            information_weight: 0.0,
            calibration_weight: 0.0,
            cascade_weight: 0.0,
            coverage_weight: 0.0,
            difficulty_weight: 0.0,
            ..CaseSelectionConfig::default()
        };
        assert!(silent.validate().is_err());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = CatConfig::from_json_str(r#"{"min_items": 20, "target_se": 0.25}"#).unwrap();
        assert_eq!(config.min_items, 20);
        assert_eq!(config.max_items, 80);
        assert_eq!(config.area_targets.len(), 5);

        let err = CdmConfig::from_json_str(r#"{"attributes": 13}"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }
}
