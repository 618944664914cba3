//! Cross-attempt confidence reliability
//!
//! For each rating k the probability of being right is modelled as
//! `Beta(1 + correct_k, 1 + wrong_k)`. The posterior mean per rating is
//! compared with the rating's nominal probability to give the expected and
//! maximum calibration errors:
//!
//! ```text
//! ECE = Σ_k (n_k / N) · |acc_k - conf_k|
//! MCE = max_k |acc_k - conf_k|
//! ```
//!
//! Ratings with no observations are left out of both.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use statrs::statistics::Distribution;

use crate::calibration::analyzer::{CalibrationResult, ConfidenceLevelResult};
use crate::calibration::quadrant::ConfidenceRating;
use crate::error::{EngineError, EngineResult};

const PRIOR_ALPHA: f64 = 1.0;
const PRIOR_BETA: f64 = 1.0;

/// Beta posterior for one confidence rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBin {
    pub confidence: ConfidenceRating,
    pub correct: u64,
    pub total: u64,
}

impl ConfidenceBin {
    pub fn alpha(&self) -> f64 {
        PRIOR_ALPHA + self.correct as f64
    }

    pub fn beta(&self) -> f64 {
        PRIOR_BETA + self.total.saturating_sub(self.correct) as f64
    }

    /// Posterior `Beta(α, β)`; `None` only for non-finite counts
    pub fn posterior(&self) -> Option<Beta> {
        Beta::new(self.alpha(), self.beta()).ok()
    }

    /// Posterior mean accuracy
    pub fn expected_accuracy(&self) -> f64 {
        self.posterior().and_then(|d| d.mean()).unwrap_or(0.5)
    }

    pub fn variance(&self) -> f64 {
        self.posterior().and_then(|d| d.variance()).unwrap_or(1.0 / 12.0)
    }

    /// Equal-tailed credible interval for the accuracy at `level`
    pub fn credible_interval(&self, level: f64) -> (f64, f64) {
        let tail = ((1.0 - level) / 2.0).clamp(0.0, 0.5);
        match self.posterior() {
            Some(d) if tail > 0.0 => (d.inverse_cdf(tail), d.inverse_cdf(1.0 - tail)),
            _ => (0.0, 1.0),
        }
    }

    /// Distance between posterior accuracy and nominal confidence
    pub fn gap(&self) -> f64 {
        (self.expected_accuracy() - self.confidence.as_probability()).abs()
    }
}

/// One point of a reliability diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityPoint {
    pub confidence: f64,
    pub observed_accuracy: f64,
    pub count: u64,
    pub standard_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityDiagnostics {
    pub bins: Vec<ConfidenceBin>,
    pub diagram: Vec<ReliabilityPoint>,
    pub expected_calibration_error: f64,
    pub maximum_calibration_error: f64,
}

/// Accumulates (rating, correct) observations across attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReliabilityModel")]
pub struct ReliabilityModel {
    bins: Vec<ConfidenceBin>,
}

#[derive(Deserialize)]
struct RawReliabilityModel {
    bins: Vec<ConfidenceBin>,
}

impl TryFrom<RawReliabilityModel> for ReliabilityModel {
    type Error = EngineError;

    fn try_from(raw: RawReliabilityModel) -> Result<Self, Self::Error> {
        ReliabilityModel::from_bins(raw.bins)
    }
}

impl Default for ReliabilityModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliabilityModel {
    pub fn new() -> Self {
        Self {
            bins: ConfidenceRating::all()
                .map(|confidence| ConfidenceBin {
                    confidence,
                    correct: 0,
                    total: 0,
                })
                .collect(),
        }
    }

    /// Restore stored counts: one bin per rating, in rating order
    pub fn from_bins(bins: Vec<ConfidenceBin>) -> EngineResult<Self> {
        let expected = ConfidenceRating::all().count();
        if bins.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                found: bins.len(),
            });
        }
        for (bin, rating) in bins.iter().zip(ConfidenceRating::all()) {
            if bin.confidence != rating {
                return Err(EngineError::InvalidInput(format!(
                    "reliability bin for {} found where {} was expected",
                    bin.confidence, rating
                )));
            }
            if bin.correct > bin.total {
                return Err(EngineError::InvalidInput(format!(
                    "reliability bin {} has {} correct out of {}",
                    bin.confidence, bin.correct, bin.total
                )));
            }
        }
        Ok(Self { bins })
    }

    pub fn from_attempts<'a>(attempts: impl IntoIterator<Item = &'a CalibrationResult>) -> Self {
        let mut model = Self::new();
        for attempt in attempts {
            model.observe_all(&attempt.level_results);
        }
        model
    }

    pub fn observe(&mut self, confidence: ConfidenceRating, correct: bool) {
        if let Some(bin) = self.bins.iter_mut().find(|b| b.confidence == confidence) {
            bin.total += 1;
            if correct {
                bin.correct += 1;
            }
        }
    }

    pub fn observe_all(&mut self, results: &[ConfidenceLevelResult]) {
        for result in results {
            self.observe(result.confidence, result.correct);
        }
    }

    pub fn bins(&self) -> &[ConfidenceBin] {
        &self.bins
    }

    pub fn observations(&self) -> u64 {
        self.bins.iter().map(|b| b.total).sum()
    }

    pub fn diagnostics(&self) -> ReliabilityDiagnostics {
        let total = self.observations();
        let mut ece = 0.0;
        let mut mce: f64 = 0.0;
        let mut diagram = Vec::new();

        for bin in self.bins.iter().filter(|b| b.total > 0) {
            let gap = bin.gap();
            ece += bin.total as f64 / total as f64 * gap;
            mce = mce.max(gap);

            let p = bin.expected_accuracy();
            let standard_error = if bin.total > 1 {
                (p * (1.0 - p) / bin.total as f64).sqrt()
            } else {
                0.5
            };
            diagram.push(ReliabilityPoint {
                confidence: bin.confidence.as_probability(),
                observed_accuracy: p,
                count: bin.total,
                standard_error,
            });
        }

        ReliabilityDiagnostics {
            bins: self.bins.clone(),
            diagram,
            expected_calibration_error: ece,
            maximum_calibration_error: mce,
        }
    }
}
