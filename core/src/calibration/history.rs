//! Cross-attempt calibration history
//!
//! Everything here looks across many analyzed cases: how errors at one
//! reasoning step propagate to later steps, whether low-ability attempts
//! carry the most overconfidence, and whether calibration is improving.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::analyzer::CalibrationResult;
use crate::calibration::reliability::ReliabilityModel;
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ContentArea;
use crate::validation::harness::pearson_correlation;

/// Lifts are reported up to this cap
const MAX_LIFT: f64 = 10.0;

/// One analyzed case together with the ability estimate at the time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseAttempt {
    pub case_id: String,
    pub area: ContentArea,
    pub theta: f64,
    pub completed_at: DateTime<Utc>,
    pub result: CalibrationResult,
}

/// Conditional error rates between two reasoning steps, `from < to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTransition {
    pub from_level: usize,
    pub to_level: usize,
    pub p_error_given_error: f64,
    pub p_error_given_correct: f64,

    /// `P(error_to | error_from) / P(error_to | correct_from)`, capped
    pub lift: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningProfile {
    /// Few errors anywhere
    Robust,
    /// Early errors drive later ones
    Sequential,
    /// One step holds most of the errors
    Bottleneck,
    /// Independent gaps at several steps
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeAnalysis {
    pub transitions: Vec<LevelTransition>,

    /// Highest finite lift among transitions with at least three observations
    pub strongest: Option<LevelTransition>,

    /// Error rate per step position
    pub level_error_rates: Vec<f64>,

    /// Mean adjacent-step lift mapped to [0, 1]: 1 → 0, 3 or more → 1
    pub severity: f64,
    pub has_cascade: bool,
    pub independent_error_rate: f64,
    pub profile: ReasoningProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningKrugerZone {
    HighRisk,
    Moderate,
    LowRisk,
    /// Overconfidence grows with ability
    Inverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DunningKruger {
    /// Negated correlation between θ and overconfidence
    pub index: f64,
    pub zone: DunningKrugerZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTrend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDrift {
    /// Late-half minus early-half mean calibration score
    pub drift: f64,
    pub trend: CalibrationTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub case_id: String,
    pub completed_at: DateTime<Utc>,
    pub calibration_score: f64,
    pub overconfidence_index: f64,

    /// Mean |confidence - outcome| over the attempt's steps
    pub mean_absolute_error: f64,
    pub rolling_calibration: f64,
    pub rolling_overconfidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaCalibration {
    pub mean_calibration: f64,
    pub mean_overconfidence: f64,
    pub attempts: usize,
}

/// Attempts in completion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationHistory {
    attempts: Vec<CaseAttempt>,
}

impl CalibrationHistory {
    pub fn new(attempts: impl IntoIterator<Item = CaseAttempt>) -> EngineResult<Self> {
        let mut history = Self::default();
        for attempt in attempts {
            history.push(attempt)?;
        }
        Ok(history)
    }

    /// Insert keeping completion order; equal timestamps keep arrival order
    pub fn push(&mut self, attempt: CaseAttempt) -> EngineResult<()> {
        if !attempt.theta.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "ability for case {} is not finite",
                attempt.case_id
            )));
        }
        let at = self
            .attempts
            .partition_point(|a| a.completed_at <= attempt.completed_at);
        self.attempts.insert(at, attempt);
        Ok(())
    }

    pub fn attempts(&self) -> &[CaseAttempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Per-rating Beta-Binomial model over every recorded step
    pub fn reliability(&self) -> ReliabilityModel {
        ReliabilityModel::from_attempts(self.attempts.iter().map(|a| &a.result))
    }

    /// Needs three attempts; fewer report a neutral low-risk index of 0
    pub fn dunning_kruger(&self) -> DunningKruger {
        let pairs: Vec<(f64, f64)> = self
            .attempts
            .iter()
            .filter(|a| !a.result.level_results.is_empty())
            .map(|a| {
                let steps = &a.result.level_results;
                let confidence =
                    steps.iter().map(|s| s.confidence.as_probability()).sum::<f64>() / steps.len() as f64;
                let predicted = 1.0 / (1.0 + (-1.2 * a.theta).exp());
                (a.theta, confidence - predicted)
            })
            .collect();

        if pairs.len() < 3 {
            return DunningKruger {
                index: 0.0,
                zone: DunningKrugerZone::LowRisk,
            };
        }

        let (thetas, overconfidence): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let index = -pearson_correlation(&thetas, &overconfidence);
        let zone = if index > 0.4 {
            DunningKrugerZone::HighRisk
        } else if index > 0.15 {
            DunningKrugerZone::Moderate
        } else if index > -0.15 {
            DunningKrugerZone::LowRisk
        } else {
            DunningKrugerZone::Inverse
        };
        DunningKruger { index, zone }
    }

    /// Needs four attempts; a change of more than five points is a trend
    pub fn drift(&self) -> CalibrationDrift {
        let n = self.attempts.len();
        if n < 4 {
            return CalibrationDrift {
                drift: 0.0,
                trend: CalibrationTrend::Stable,
            };
        }
        let mean = |attempts: &[CaseAttempt]| {
            attempts.iter().map(|a| a.result.calibration_score).sum::<f64>() / attempts.len() as f64
        };
        let (early, late) = self.attempts.split_at(n / 2);
        let drift = mean(late) - mean(early);
        let trend = if drift > 5.0 {
            CalibrationTrend::Improving
        } else if drift < -5.0 {
            CalibrationTrend::Degrading
        } else {
            CalibrationTrend::Stable
        };
        CalibrationDrift { drift, trend }
    }

    /// Error propagation between step positions; unanswered steps count as correct
    pub fn cascade(&self) -> CascadeAnalysis {
        let levels = self
            .attempts
            .iter()
            .flat_map(|a| a.result.level_results.iter().map(|s| s.level + 1))
            .max()
            .unwrap_or(0);

        let mut answered = vec![0usize; levels];
        let mut wrong = vec![0usize; levels];
        // [from][to] → (error|error, correct|error, error|correct, correct|correct)
        let mut pairs = vec![vec![[0usize; 4]; levels]; levels];

        for attempt in &self.attempts {
            let mut correct = vec![true; levels];
            for step in &attempt.result.level_results {
                correct[step.level] = step.correct;
                answered[step.level] += 1;
                if !step.correct {
                    wrong[step.level] += 1;
                }
            }
            for from in 0..levels {
                for to in from + 1..levels {
                    let cell = match (correct[from], correct[to]) {
                        (false, false) => 0,
                        (false, true) => 1,
                        (true, false) => 2,
                        (true, true) => 3,
                    };
                    pairs[from][to][cell] += 1;
                }
            }
        }

        let mut transitions = Vec::new();
        let mut strongest: Option<(f64, LevelTransition)> = None;
        for from in 0..levels {
            for to in from + 1..levels {
                let [ee, ce, ec, cc] = pairs[from][to];
                let rate = |hits: usize, total: usize| if total > 0 { hits as f64 / total as f64 } else { 0.0 };
                let p_error_given_error = rate(ee, ee + ce);
                let p_error_given_correct = rate(ec, ec + cc);
                let lift = if p_error_given_correct > 0.0 {
                    p_error_given_error / p_error_given_correct
                } else if p_error_given_error > 0.0 {
                    f64::INFINITY
                } else {
                    1.0
                };

                let transition = LevelTransition {
                    from_level: from,
                    to_level: to,
                    p_error_given_error,
                    p_error_given_correct,
                    lift: lift.min(MAX_LIFT),
                    observations: ee + ce + ec + cc,
                };
                let beats = strongest.as_ref().map_or(lift > 0.0, |(best, _)| lift > *best);
                if lift.is_finite() && transition.observations >= 3 && beats {
                    strongest = Some((lift, transition.clone()));
                }
                transitions.push(transition);
            }
        }

        let level_error_rates: Vec<f64> = (0..levels)
            .map(|l| if answered[l] > 0 { wrong[l] as f64 / answered[l] as f64 } else { 0.0 })
            .collect();

        let adjacent: Vec<f64> = transitions
            .iter()
            .filter(|t| t.to_level == t.from_level + 1 && t.observations >= 2)
            .map(|t| t.lift)
            .collect();
        let mean_lift = if adjacent.is_empty() {
            1.0
        } else {
            adjacent.iter().sum::<f64>() / adjacent.len() as f64
        };
        let severity = ((mean_lift - 1.0) / 2.0).clamp(0.0, 1.0);
        let independent_error_rate = level_error_rates.iter().sum::<f64>() * (1.0 - severity);
        let profile = reasoning_profile(&level_error_rates, severity, self.attempts.len());

        debug!(
            "Cascade over {} attempts: severity {:.3}, profile {:?}",
            self.attempts.len(),
            severity,
            profile
        );

        CascadeAnalysis {
            transitions,
            strongest: strongest.map(|(_, t)| t),
            level_error_rates,
            severity,
            has_cascade: severity > 0.3,
            independent_error_rate,
            profile,
        }
    }

    /// Per-attempt series with trailing means over `window` attempts
    pub fn timeline(&self, window: usize) -> Vec<TimelinePoint> {
        let window = window.max(1);
        self.attempts
            .iter()
            .enumerate()
            .map(|(i, attempt)| {
                let recent = &self.attempts[(i + 1).saturating_sub(window)..=i];
                let n = recent.len() as f64;
                let steps = &attempt.result.level_results;
                let mean_absolute_error = if steps.is_empty() {
                    0.0
                } else {
                    steps
                        .iter()
                        .map(|s| (s.confidence.as_probability() - if s.correct { 1.0 } else { 0.0 }).abs())
                        .sum::<f64>()
                        / steps.len() as f64
                };
                TimelinePoint {
                    case_id: attempt.case_id.clone(),
                    completed_at: attempt.completed_at,
                    calibration_score: attempt.result.calibration_score,
                    overconfidence_index: attempt.result.overconfidence_index,
                    mean_absolute_error,
                    rolling_calibration: recent.iter().map(|a| a.result.calibration_score).sum::<f64>() / n,
                    rolling_overconfidence: recent.iter().map(|a| a.result.overconfidence_index).sum::<f64>() / n,
                }
            })
            .collect()
    }

    pub fn by_area(&self) -> BTreeMap<ContentArea, AreaCalibration> {
        let mut areas: BTreeMap<ContentArea, AreaCalibration> = BTreeMap::new();
        for attempt in &self.attempts {
            let entry = areas.entry(attempt.area.clone()).or_insert(AreaCalibration {
                mean_calibration: 0.0,
                mean_overconfidence: 0.0,
                attempts: 0,
            });
            entry.mean_calibration += attempt.result.calibration_score;
            entry.mean_overconfidence += attempt.result.overconfidence_index;
            entry.attempts += 1;
        }
        for entry in areas.values_mut() {
            entry.mean_calibration /= entry.attempts as f64;
            entry.mean_overconfidence /= entry.attempts as f64;
        }
        areas
    }
}

fn reasoning_profile(error_rates: &[f64], severity: f64, attempts: usize) -> ReasoningProfile {
    if attempts < 3 || error_rates.is_empty() {
        return ReasoningProfile::Robust;
    }
    let mean = error_rates.iter().sum::<f64>() / error_rates.len() as f64;
    let max = error_rates.iter().copied().fold(0.0, f64::max);

    if mean < 0.2 {
        ReasoningProfile::Robust
    } else if severity > 0.5 {
        ReasoningProfile::Sequential
    } else if max > 2.0 * mean && max > 0.4 {
        ReasoningProfile::Bottleneck
    } else {
        ReasoningProfile::Parallel
    }
}
