//! EM marginal maximum likelihood calibration of DINA / G-DINA items
//!
//! Each iteration is an E-step followed by an M-step:
//!
//! - E-step (parallel map over examinees): posterior class membership under
//!   the current item parameters and class priors, computed in log space,
//!   folded into per-item sufficient statistics `(n_l, r_l)` for every
//!   reduced attribute pattern `l`, plus expected class counts.
//! - M-step (reduction result): DINA slip/guess or G-DINA pattern
//!   probabilities from the expected counts, class priors from the class
//!   counts.
//!
//! Iteration stops when the log-likelihood changes by less than the
//! threshold or the iteration budget is spent. A run that never settles
//! still returns its best parameters, flagged `converged = false`.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cdm::attributes::{class_count, AttributeSet};
use crate::cdm::model::{CdmItem, CdmItemModel};
use crate::config::{CdmConfig, ConfigRecord, EmConfig};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ItemId;

/// Weight below which a pattern count is treated as empty
const COUNT_EPSILON: f64 = 1e-10;

/// Which response model to calibrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdmModelKind {
    Dina,
    Gdina,
}

/// Information criteria for a fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub log_likelihood: f64,
    pub parameters: usize,
    pub observations: usize,
    pub aic: f64,
    pub bic: f64,
}

impl ModelFit {
    fn new(log_likelihood: f64, parameters: usize, observations: usize) -> Self {
        let k = parameters as f64;
        Self {
            log_likelihood,
            parameters,
            observations,
            aic: -2.0 * log_likelihood + 2.0 * k,
            bic: -2.0 * log_likelihood + k * (observations as f64).ln(),
        }
    }
}

/// Outcome of a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmCalibration {
    pub kind: CdmModelKind,
    pub items: Vec<CdmItem>,
    pub class_priors: Vec<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,

    /// False when the iteration budget ran out; parameters are best-so-far
    pub converged: bool,
    pub fit: ModelFit,
}

/// Expected counts accumulated by the E-step
#[derive(Debug, Clone)]
struct SufficientStats {
    log_likelihood: f64,
    /// `[item][pattern] = (expected examinees n_l, expected correct r_l)`
    patterns: Vec<Vec<(f64, f64)>>,
    class_counts: Vec<f64>,
}

impl SufficientStats {
    fn empty(items: &[CdmItem], classes: usize) -> Self {
        Self {
            log_likelihood: 0.0,
            patterns: items.iter().map(|item| vec![(0.0, 0.0); item.pattern_count()]).collect(),
            class_counts: vec![0.0; classes],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.log_likelihood += other.log_likelihood;
        for (mine, theirs) in self.patterns.iter_mut().zip(other.patterns) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                a.0 += b.0;
                a.1 += b.1;
            }
        }
        for (a, b) in self.class_counts.iter_mut().zip(other.class_counts) {
            *a += b;
        }
        self
    }
}

/// Per-item, per-class log response probabilities
struct LogTables {
    correct: Vec<Vec<f64>>,
    incorrect: Vec<Vec<f64>>,
    /// Reduced pattern index of every class for every item
    pattern_of: Vec<Vec<usize>>,
}

impl LogTables {
    fn build(items: &[CdmItem], classes: usize) -> Self {
        let mut correct = Vec::with_capacity(items.len());
        let mut incorrect = Vec::with_capacity(items.len());
        let mut pattern_of = Vec::with_capacity(items.len());
        for item in items {
            let profiles = (0..classes).map(|c| AttributeSet::from_bits(c as u32));
            let (p1, p0): (Vec<f64>, Vec<f64>) = profiles
                .clone()
                .map(|alpha| {
                    let p = item.probability(alpha);
                    (p.ln(), (1.0 - p).ln())
                })
                .unzip();
            correct.push(p1);
            incorrect.push(p0);
            pattern_of.push(profiles.map(|alpha| item.required.reduced_index(alpha)).collect());
        }
        Self {
            correct,
            incorrect,
            pattern_of,
        }
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// EM-MMLE calibrator for a fixed Q-matrix
#[derive(Debug, Clone)]
pub struct EmCalibrator {
    attributes: usize,
    default_slip: f64,
    default_guess: f64,
    config: EmConfig,
}

impl EmCalibrator {
    pub fn new(config: &CdmConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            attributes: config.attributes,
            default_slip: config.default_slip,
            default_guess: config.default_guess,
            config: config.em.clone(),
        })
    }

    /// Calibrate item parameters from a complete response matrix
    ///
    /// `responses[i][j]` is examinee `i`'s answer to `q_matrix[j]`.
    pub fn calibrate(
        &self,
        responses: &[Vec<bool>],
        q_matrix: &[(ItemId, AttributeSet)],
        kind: CdmModelKind,
    ) -> EngineResult<EmCalibration> {
        let classes = class_count(self.attributes)?;
        self.check_inputs(responses, q_matrix)?;

        let mut items = self.initial_items(q_matrix, kind)?;
        let mut priors = vec![1.0 / classes as f64; classes];

        let mut best: Option<(Vec<CdmItem>, Vec<f64>, f64)> = None;
        let mut previous = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;
            let stats = self.e_step(responses, &items, &priors, classes);
            let log_likelihood = stats.log_likelihood;

            if best.as_ref().map_or(true, |(_, _, ll)| log_likelihood > *ll) {
                best = Some((items.clone(), priors.clone(), log_likelihood));
            }

            let delta = (log_likelihood - previous).abs();
            debug!("EM iteration {}: log-likelihood = {:.6}, delta = {:.3e}", iteration, log_likelihood, delta);
            if delta < self.config.convergence_threshold {
                converged = true;
                best = Some((items.clone(), priors.clone(), log_likelihood));
                break;
            }
            previous = log_likelihood;

            items = self.m_step_items(&items, &stats)?;
            priors = self.m_step_priors(&stats.class_counts, responses.len());
        }

        let (items, class_priors, log_likelihood) = match best {
            Some(best) => best,
            None => {
                return Err(EngineError::NumericalNonConvergence {
                    iterations,
                    last_delta: f64::NAN,
                })
            }
        };

        if converged {
            info!(
                "EM ({:?}) converged after {} iterations, log-likelihood = {:.4}",
                kind, iterations, log_likelihood
            );
        } else {
            let err = EngineError::NumericalNonConvergence {
                iterations,
                last_delta: (log_likelihood - previous).abs(),
            };
            warn!("{}; returning best-so-far parameters", err);
        }

        let parameters = items.iter().map(CdmItem::parameter_count).sum::<usize>() + classes - 1;
        let fit = ModelFit::new(log_likelihood, parameters, responses.len());

        Ok(EmCalibration {
            kind,
            items,
            class_priors,
            log_likelihood,
            iterations,
            converged,
            fit,
        })
    }

    fn check_inputs(&self, responses: &[Vec<bool>], q_matrix: &[(ItemId, AttributeSet)]) -> EngineResult<()> {
        if responses.is_empty() || q_matrix.is_empty() {
            return Err(EngineError::InvalidInput(
                "calibration needs at least one examinee and one item".to_string(),
            ));
        }
        for row in responses {
            if row.len() != q_matrix.len() {
                return Err(EngineError::DimensionMismatch {
                    expected: q_matrix.len(),
                    found: row.len(),
                });
            }
        }
        for (id, required) in q_matrix {
            if required.span() > self.attributes {
                return Err(EngineError::invalid_item(
                    id,
                    format!("Q-matrix row {} exceeds {} attributes", required, self.attributes),
                ));
            }
        }
        Ok(())
    }

    fn initial_items(&self, q_matrix: &[(ItemId, AttributeSet)], kind: CdmModelKind) -> EngineResult<Vec<CdmItem>> {
        q_matrix
            .iter()
            .map(|(id, required)| {
                let dina = CdmItem::dina(id.clone(), *required, self.default_slip, self.default_guess)?;
                Ok(match kind {
                    CdmModelKind::Dina => dina,
                    CdmModelKind::Gdina => dina.to_gdina(),
                })
            })
            .collect()
    }

    fn e_step(&self, responses: &[Vec<bool>], items: &[CdmItem], priors: &[f64], classes: usize) -> SufficientStats {
        let tables = LogTables::build(items, classes);
        let log_priors: Vec<f64> = priors.iter().map(|p| p.ln()).collect();

        responses
            .par_iter()
            .fold(
                || SufficientStats::empty(items, classes),
                |mut stats, row| {
                    let mut log_post = log_priors.clone();
                    for (j, &x) in row.iter().enumerate() {
                        let table = if x { &tables.correct[j] } else { &tables.incorrect[j] };
                        for (lp, t) in log_post.iter_mut().zip(table) {
                            *lp += t;
                        }
                    }

                    let log_marginal = log_sum_exp(&log_post);
                    stats.log_likelihood += log_marginal;

                    for (c, lp) in log_post.iter().enumerate() {
                        let weight = (lp - log_marginal).exp();
                        stats.class_counts[c] += weight;
                        for (j, &x) in row.iter().enumerate() {
                            let cell = &mut stats.patterns[j][tables.pattern_of[j][c]];
                            cell.0 += weight;
                            if x {
                                cell.1 += weight;
                            }
                        }
                    }
                    stats
                },
            )
            .reduce(|| SufficientStats::empty(items, classes), SufficientStats::merge)
    }

    fn m_step_items(&self, items: &[CdmItem], stats: &SufficientStats) -> EngineResult<Vec<CdmItem>> {
        let (lo, hi) = (self.config.min_slip_guess, self.config.max_slip_guess);

        items
            .iter()
            .zip(&stats.patterns)
            .map(|(item, counts)| match &item.model {
                CdmItemModel::Dina { slip, guess } => {
                    let full = counts.len() - 1;
                    let (n_full, r_full) = counts[full];
                    let (n_rest, r_rest) = counts[..full]
                        .iter()
                        .fold((0.0, 0.0), |acc, &(n, r)| (acc.0 + n, acc.1 + r));

                    let slip = if n_full > COUNT_EPSILON { 1.0 - r_full / n_full } else { *slip };
                    let guess = if n_rest > COUNT_EPSILON { r_rest / n_rest } else { *guess };
                    CdmItem::dina(item.id.clone(), item.required, slip.clamp(lo, hi), guess.clamp(lo, hi))
                }
                CdmItemModel::Gdina { probabilities } => {
                    let updated = counts
                        .iter()
                        .zip(probabilities)
                        .map(|(&(n, r), &old)| {
                            let p = if n > COUNT_EPSILON { r / n } else { old };
                            p.clamp(lo, 1.0 - lo)
                        })
                        .collect();
                    CdmItem::gdina(item.id.clone(), item.required, updated)
                }
            })
            .collect()
    }

    fn m_step_priors(&self, class_counts: &[f64], examinees: usize) -> Vec<f64> {
        let floored: Vec<f64> = class_counts
            .iter()
            .map(|&count| (count / examinees as f64).max(self.config.min_class_prior))
            .collect();
        let total: f64 = floored.iter().sum();
        floored.into_iter().map(|p| p / total).collect()
    }
}
