//! Reporting scale and normal-distribution helpers

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::ScoringConfig;

/// Monotone map from θ onto the reporting scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub max: f64,
    pub theta_min: f64,
    pub theta_max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl ScoreScale {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            mean: config.score_mean,
            sd: config.score_sd,
            min: config.score_min,
            max: config.score_max,
            theta_min: config.theta_min,
            theta_max: config.theta_max,
        }
    }

    /// `mean + sd·clamp(θ)`, clamped to the reporting range
    pub fn theta_to_score(&self, theta: f64) -> f64 {
        let theta = theta.clamp(self.theta_min, self.theta_max);
        (self.mean + self.sd * theta).clamp(self.min, self.max)
    }

    /// Inverse of [`theta_to_score`](Self::theta_to_score) on the unclamped range
    pub fn score_to_theta(&self, score: f64) -> f64 {
        ((score - self.mean) / self.sd).clamp(self.theta_min, self.theta_max)
    }
}

/// Standard normal CDF
pub fn normal_cdf(z: f64) -> f64 {
    Normal::standard().cdf(z)
}

/// Standard normal quantile, infinite at `p = 0` and `p = 1`
pub fn normal_quantile(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    Normal::standard().inverse_cdf(p)
}
