//! Ability estimation
//!
//! Maximum likelihood by Newton-Raphson, started from the best node of the
//! quadrature grid so that the multimodal 3PL likelihood does not trap the
//! iteration in a local maximum. When the MLE does not exist (all-correct or
//! all-incorrect patterns) or the iteration fails to settle, the scorer
//! falls back to an EAP estimate under a standard-normal prior and flags the
//! result as prior-regularized.
//!
//! Scoring is a pure function of the response pattern and the item bank.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigRecord, ScoringConfig};
use crate::error::{EngineError, EngineResult};
use crate::irt::model::IrtParameters;
use crate::irt::scale::{normal_cdf, normal_quantile, ScoreScale};
use crate::item_bank::{ContentArea, ItemBank};
use crate::response::{ResponsePattern, ResponseRecord};

/// Largest Newton step in θ units
const MAX_STEP: f64 = 1.0;

/// How the reported θ was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    MaximumLikelihood,
    ExpectedAPosteriori,
}

/// Ability estimate with precision and reporting fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    /// Latent ability on the logit scale
    pub theta: f64,

    /// `1 / sqrt(test information at θ̂)`
    pub standard_error: f64,

    /// θ mapped onto the reporting scale
    pub scaled_score: f64,

    /// Whether the scaled score reaches the pass threshold
    pub passed: bool,

    /// θ ± z·SE at the configured confidence level
    pub confidence_interval: (f64, f64),

    pub method: EstimationMethod,

    /// True when the standard-normal prior determined the estimate
    pub prior_regularized: bool,

    /// Newton-Raphson iterations spent (0 for a pure EAP estimate)
    pub iterations: usize,
}

/// Per-area performance in a scored form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPerformance {
    pub correct: usize,
    pub total: usize,

    /// Percent correct in 0..=100
    pub percentage: f64,

    /// Mean `b` of the items answered in this area
    pub average_difficulty: f64,
}

/// Fixed-form scoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub responses: Vec<ResponseRecord>,
}

/// Fixed-form scoring result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(flatten)]
    pub estimate: AbilityEstimate,
    pub correct_count: usize,
    pub total_items: usize,
    pub section_breakdown: BTreeMap<ContentArea, SectionPerformance>,
}

/// 3PL ability scorer
#[derive(Debug, Clone)]
pub struct IrtScorer {
    config: ScoringConfig,
    scale: ScoreScale,
}

impl Default for IrtScorer {
    fn default() -> Self {
        let config = ScoringConfig::default();
        let scale = ScoreScale::from_config(&config);
        Self { config, scale }
    }
}

impl IrtScorer {
    pub fn new(config: ScoringConfig) -> EngineResult<Self> {
        config.validate()?;
        let scale = ScoreScale::from_config(&config);
        Ok(Self { config, scale })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn scale(&self) -> &ScoreScale {
        &self.scale
    }

    /// Estimate ability from a response pattern
    pub fn estimate(&self, pattern: &ResponsePattern, bank: &ItemBank) -> EngineResult<AbilityEstimate> {
        let responses = resolve(pattern.records(), bank)?;
        self.estimate_responses(&responses)
    }

    /// Estimate ability from already-resolved `(parameters, correct)` pairs
    pub fn estimate_responses(&self, responses: &[(IrtParameters, bool)]) -> EngineResult<AbilityEstimate> {
        if responses.is_empty() {
            return Err(EngineError::InvalidInput("empty response pattern".to_string()));
        }

        let correct = responses.iter().filter(|(_, u)| *u).count();
        let degenerate = correct == 0 || correct == responses.len();

        let (theta, method, iterations) = if degenerate {
            debug!("Degenerate pattern ({} of {} correct), using EAP", correct, responses.len());
            (self.eap(responses), EstimationMethod::ExpectedAPosteriori, 0)
        } else {
            match self.newton_raphson(responses) {
                Ok((theta, iterations)) => (theta, EstimationMethod::MaximumLikelihood, iterations),
                Err(err) => {
                    warn!("Falling back to EAP: {}", err);
                    (self.eap(responses), EstimationMethod::ExpectedAPosteriori, 0)
                }
            }
        };

        Ok(self.finish(theta, responses, method, iterations))
    }

    /// Score a fixed-form submission, including the per-area breakdown
    pub fn score(&self, request: &ScoreRequest, bank: &ItemBank) -> EngineResult<ScoreResult> {
        let pattern = ResponsePattern::from_records(request.responses.iter().cloned())?;
        let estimate = self.estimate(&pattern, bank)?;

        let mut sections: BTreeMap<ContentArea, (usize, usize, f64)> = BTreeMap::new();
        for record in pattern.records() {
            let item = bank.require(&record.item_id)?;
            let entry = sections.entry(item.area.clone()).or_insert((0, 0, 0.0));
            entry.0 += usize::from(record.correct);
            entry.1 += 1;
            entry.2 += item.irt.difficulty();
        }

        let section_breakdown = sections
            .into_iter()
            .map(|(area, (correct, total, difficulty_sum))| {
                let performance = SectionPerformance {
                    correct,
                    total,
                    percentage: 100.0 * correct as f64 / total as f64,
                    average_difficulty: difficulty_sum / total as f64,
                };
                (area, performance)
            })
            .collect();

        Ok(ScoreResult {
            estimate,
            correct_count: pattern.correct_count(),
            total_items: pattern.len(),
            section_breakdown,
        })
    }

    /// Probability that the true score clears the pass threshold
    ///
    /// With no items remaining the outcome is already decided and the
    /// result is exactly 0 or 1.
    pub fn pass_probability(&self, estimate: &AbilityEstimate, remaining_items: usize) -> f64 {
        if remaining_items == 0 {
            return if estimate.passed { 1.0 } else { 0.0 };
        }
        let target = self.scale.score_to_theta(self.config.pass_threshold);
        normal_cdf((estimate.theta - target) / estimate.standard_error)
    }

    /// Assemble the reported estimate at a final θ̂
    fn finish(
        &self,
        theta: f64,
        responses: &[(IrtParameters, bool)],
        method: EstimationMethod,
        iterations: usize,
    ) -> AbilityEstimate {
        let information: f64 = responses.iter().map(|(item, _)| item.information(theta)).sum();
        let standard_error = 1.0 / information.max(f64::MIN_POSITIVE).sqrt();

        let z = normal_quantile(0.5 + self.config.confidence_level / 2.0);
        let scaled_score = self.scale.theta_to_score(theta);

        AbilityEstimate {
            theta,
            standard_error,
            scaled_score,
            passed: scaled_score >= self.config.pass_threshold,
            confidence_interval: (theta - z * standard_error, theta + z * standard_error),
            method,
            prior_regularized: method == EstimationMethod::ExpectedAPosteriori,
            iterations,
        }
    }

    fn grid(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.config.quadrature_points;
        let step = (self.config.theta_max - self.config.theta_min) / (n - 1) as f64;
        (0..n).map(move |q| self.config.theta_min + step * q as f64)
    }

    /// Newton-Raphson MLE; Fisher scoring whenever the Hessian is not negative
    fn newton_raphson(&self, responses: &[(IrtParameters, bool)]) -> EngineResult<(f64, usize)> {
        let mut theta = self
            .grid()
            .map(|t| (t, log_likelihood(responses, t)))
            .fold((0.0, f64::NEG_INFINITY), |best, (t, ll)| {
                if ll > best.1 {
                    (t, ll)
                } else {
                    best
                }
            })
            .0;

        let mut last_delta = f64::INFINITY;
        let mut iterations = 0;
        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;
            let (gradient, mut hessian) = responses.iter().fold((0.0, 0.0), |(g, h), (item, u)| {
                let (d1, d2) = item.log_likelihood_derivatives(theta, *u);
                (g + d1, h + d2)
            });

            if hessian >= 0.0 {
                hessian = -responses.iter().map(|(item, _)| item.information(theta)).sum::<f64>();
            }
            if hessian >= 0.0 || !hessian.is_finite() {
                break;
            }

            let step = (-gradient / hessian).clamp(-MAX_STEP, MAX_STEP);
            let next = (theta + step).clamp(self.config.theta_min, self.config.theta_max);
            last_delta = (next - theta).abs();
            theta = next;
            trace!("NR iteration {}: theta = {:.6}, delta = {:.2e}", iteration, theta, last_delta);

            if !theta.is_finite() {
                break;
            }
            if last_delta < self.config.tolerance {
                if theta <= self.config.theta_min || theta >= self.config.theta_max {
                    // Pinned to the boundary: the interior maximum does not exist
                    break;
                }
                debug!("MLE converged to {:.4} after {} iterations", theta, iteration);
                return Ok((theta, iteration));
            }
        }

        Err(EngineError::NumericalNonConvergence { iterations, last_delta })
    }

    /// Posterior mean under N(0, 1) by quadrature over the θ grid
    fn eap(&self, responses: &[(IrtParameters, bool)]) -> f64 {
        let log_weights: Vec<(f64, f64)> = self
            .grid()
            .map(|t| (t, -0.5 * t * t + log_likelihood(responses, t)))
            .collect();
        let max_log = log_weights
            .iter()
            .map(|&(_, w)| w)
            .fold(f64::NEG_INFINITY, f64::max);

        let (numerator, denominator) = log_weights.iter().fold((0.0, 0.0), |(num, den), &(t, lw)| {
            let w = (lw - max_log).exp();
            (num + t * w, den + w)
        });

        numerator / denominator
    }
}

/// Pair each response with its item's parameters
pub(crate) fn resolve(records: &[ResponseRecord], bank: &ItemBank) -> EngineResult<Vec<(IrtParameters, bool)>> {
    records
        .iter()
        .map(|record| Ok((bank.require(&record.item_id)?.irt, record.correct)))
        .collect()
}

fn log_likelihood(responses: &[(IrtParameters, bool)], theta: f64) -> f64 {
    responses.iter().map(|(item, u)| item.log_likelihood(theta, *u)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_bank::Item;
    use approx::assert_relative_eq;

    fn bank() -> ItemBank {
        let items = (0..10).map(|i| {
            let area = if i % 2 == 0 { "cirurgia" } else { "pediatria" };
            Item::new(
                format!("q{}", i),
                IrtParameters::new(1.2, -1.0 + 0.2 * i as f64, 0.2).unwrap(),
                area,
            )
        });
        ItemBank::new(items).unwrap()
    }

    fn pattern(outcomes: &[bool]) -> ResponsePattern {
        ResponsePattern::from_records(
            outcomes
                .iter()
                .enumerate()
                .map(|(i, &u)| ResponseRecord::new(format!("q{}", i), u)),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let scorer = IrtScorer::default();
        let err = scorer.estimate(&ResponsePattern::new(), &bank()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_unknown_item_rejected() {
        let scorer = IrtScorer::default();
        let pattern = ResponsePattern::from_records(vec![ResponseRecord::new("missing", true)]).unwrap();
        assert!(matches!(
            scorer.estimate(&pattern, &bank()),
            Err(EngineError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_mixed_pattern_uses_mle() {
        let scorer = IrtScorer::default();
        let outcomes = [true, true, true, true, false, true, false, true, false, false];
        let estimate = scorer.estimate(&pattern(&outcomes), &bank()).unwrap();

        assert_eq!(estimate.method, EstimationMethod::MaximumLikelihood);
        assert!(!estimate.prior_regularized);
        assert!(estimate.standard_error > 0.0);
        assert!(estimate.confidence_interval.0 < estimate.theta);
        assert!(estimate.confidence_interval.1 > estimate.theta);
    }

    #[test]
    fn test_all_correct_falls_back_to_eap() {
        let scorer = IrtScorer::default();
        let estimate = scorer.estimate(&pattern(&[true; 10]), &bank()).unwrap();

        assert_eq!(estimate.method, EstimationMethod::ExpectedAPosteriori);
        assert!(estimate.prior_regularized);
        assert!(estimate.theta > 0.0);
        assert!(estimate.theta < 4.0);

        let low = scorer.estimate(&pattern(&[false; 10]), &bank()).unwrap();
        assert!(low.prior_regularized);
        assert!(low.theta < 0.0);
    }

    #[test]
    fn test_standard_error_matches_information() {
        let scorer = IrtScorer::default();
        let outcomes = [true, false, true, false, true, false, true, false, true, false];
        let estimate = scorer.estimate(&pattern(&outcomes), &bank()).unwrap();

        let info: f64 = bank().iter().map(|item| item.irt.information(estimate.theta)).sum();
        assert_relative_eq!(estimate.standard_error, 1.0 / info.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_score_builds_section_breakdown() {
        let scorer = IrtScorer::default();
        let request = ScoreRequest {
            responses: pattern(&[true, true, false, true, false, false, true, false, true, true])
                .records()
                .to_vec(),
        };
        let result = scorer.score(&request, &bank()).unwrap();

        assert_eq!(result.total_items, 10);
        assert_eq!(result.correct_count, 6);
        let surgery = &result.section_breakdown[&ContentArea::from("cirurgia")];
        assert_eq!(surgery.total, 5);
        assert_eq!(surgery.correct, 3);
        assert_relative_eq!(surgery.percentage, 60.0);
        assert_relative_eq!(surgery.average_difficulty, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_pass_probability() {
        let scorer = IrtScorer::default();
        let estimate = scorer.estimate(&pattern(&[true; 10]), &bank()).unwrap();

        let decided = scorer.pass_probability(&estimate, 0);
        assert!(decided == 0.0 || decided == 1.0);

        let at_threshold = AbilityEstimate {
            theta: 1.0,
            standard_error: 0.3,
            ..estimate
        };
        assert_relative_eq!(scorer.pass_probability(&at_threshold, 5), 0.5, epsilon = 1e-7);
    }

    #[test]
    fn test_newton_raphson_reports_iterations_spent() {
        let scorer = IrtScorer::default();
        let max = scorer.config().max_iterations;

        let interior: Vec<(IrtParameters, bool)> = (0..10)
            .map(|i| (IrtParameters::new(1.2, -1.0 + 0.2 * i as f64, 0.2).unwrap(), i < 5))
            .collect();
        let (_, iterations) = scorer.newton_raphson(&interior).unwrap();
        assert!(iterations >= 1 && iterations < max);
        assert_eq!(scorer.estimate_responses(&interior).unwrap().iterations, iterations);

        // Hard items right, one flat easy item wrong: the likelihood peaks past theta_max
        let mut pinned: Vec<(IrtParameters, bool)> =
            (0..3).map(|_| (IrtParameters::new(2.0, 3.5, 0.2).unwrap(), true)).collect();
        pinned.push((IrtParameters::new(0.3, -4.0, 0.2).unwrap(), false));
        match scorer.newton_raphson(&pinned) {
            Err(EngineError::NumericalNonConvergence { iterations, .. }) => assert!(iterations < max),
            other => panic!("expected non-convergence, got {:?}", other),
        }
        let fallback = scorer.estimate_responses(&pinned).unwrap();
        assert_eq!(fallback.method, EstimationMethod::ExpectedAPosteriori);
    }
}
