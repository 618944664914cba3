//! Multi-objective selection of the next clinical case
//!
//! Each candidate is scored on information at the current ability, distance
//! from a slightly harder target, content-area coverage, how close it sits to
//! the worst-calibrated confidence rating and how much the learner's errors
//! cascade. The final pick is drawn from the best few candidates with a
//! seeded generator so that a replay reproduces it.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, HashSet};

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::calibration::history::{CalibrationHistory, DunningKrugerZone};
use crate::calibration::quadrant::ConfidenceRating;
use crate::calibration::reliability::ConfidenceBin;
use crate::config::{CaseSelectionConfig, ConfigRecord};
use crate::error::{EngineError, EngineResult};
use crate::irt::IrtParameters;
use crate::item_bank::ContentArea;

/// Difficulty shift of each reasoning step relative to the case
pub const DEFAULT_LEVEL_OFFSETS: [f64; 4] = [-0.3, 0.1, 0.3, 0.2];

fn default_level_offsets() -> Vec<f64> {
    DEFAULT_LEVEL_OFFSETS.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalCase {
    pub id: String,
    pub area: ContentArea,
    pub irt: IrtParameters,
    #[serde(default = "default_level_offsets")]
    pub level_offsets: Vec<f64>,
}

impl ClinicalCase {
    pub fn new(id: impl Into<String>, area: impl Into<ContentArea>, irt: IrtParameters) -> Self {
        Self {
            id: id.into(),
            area: area.into(),
            irt,
            level_offsets: default_level_offsets(),
        }
    }

    fn levels(&self) -> usize {
        self.level_offsets.len().max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    MaxInformation,
    CalibrationTarget,
    CascadeTarget,
    AreaCoverage,
    DifficultyLadder,
    DunningKrugerCheck,
}

/// Component scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseScores {
    pub information: f64,
    pub calibration: f64,
    pub cascade: f64,
    pub coverage: f64,
    pub difficulty: f64,
}

impl CaseScores {
    /// Strongest component; ties go to the earlier one
    fn leading_reason(&self) -> SelectionReason {
        let ranked = [
            (SelectionReason::MaxInformation, self.information),
            (SelectionReason::CalibrationTarget, self.calibration),
            (SelectionReason::CascadeTarget, self.cascade),
            (SelectionReason::AreaCoverage, self.coverage),
            (SelectionReason::DifficultyLadder, self.difficulty),
        ];
        let mut best = ranked[0];
        for candidate in &ranked[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecommendation {
    pub case_id: String,
    pub reason: SelectionReason,
    pub scores: CaseScores,
    pub composite: f64,

    /// Step positions with error rate above 0.3, worst first
    pub target_levels: Vec<usize>,

    /// Ratings whose calibration gap is above average
    pub target_bins: Vec<ConfidenceRating>,

    /// `min(1, composite)`
    pub confidence: f64,
}

/// Learner state shared by every candidate's scoring
struct Profile {
    warm_up: bool,
    recent: HashSet<String>,
    area_counts: BTreeMap<ContentArea, usize>,
    attempts: usize,
    worst_bin: Option<(ConfidenceRating, f64)>,
    cascade_score: f64,
    dunning_kruger: DunningKrugerZone,
    target_levels: Vec<usize>,
    target_bins: Vec<ConfidenceRating>,
}

#[derive(Debug, Clone, Default)]
pub struct CaseSelector {
    config: CaseSelectionConfig,
}

impl CaseSelector {
    pub fn new(config: CaseSelectionConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CaseSelectionConfig {
        &self.config
    }

    /// Pick the next case, or `None` when there are no cases
    ///
    /// Cases attempted within the recent window are skipped unless nothing
    /// else is left. The same seed and history always give the same pick.
    pub fn select(
        &self,
        cases: &[ClinicalCase],
        history: &CalibrationHistory,
        theta: f64,
        seed: u64,
    ) -> EngineResult<Option<CaseRecommendation>> {
        if !theta.is_finite() {
            return Err(EngineError::InvalidInput(format!("ability {} is not finite", theta)));
        }
        if cases.is_empty() {
            return Ok(None);
        }

        let profile = self.profile(history);
        let fresh: Vec<&ClinicalCase> = cases.iter().filter(|c| !profile.recent.contains(&c.id)).collect();
        let candidates = if fresh.is_empty() { cases.iter().collect() } else { fresh };

        let mut scored: Vec<(&ClinicalCase, CaseScores, f64)> = candidates
            .into_iter()
            .map(|case| {
                let scores = self.score(case, theta, &profile);
                (case, scores, self.composite(&scores, profile.warm_up))
            })
            .collect();
        scored.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(history.len() as u64);
        let top = self.config.top_candidates.min(scored.len());
        let (case, scores, composite) = scored[rng.gen_range(0..top)];

        let reason = if profile.dunning_kruger == DunningKrugerZone::HighRisk && scores.calibration > 0.5 {
            SelectionReason::DunningKrugerCheck
        } else {
            scores.leading_reason()
        };
        let target_levels = if history.is_empty() {
            (0..case.levels()).collect()
        } else {
            profile.target_levels.clone()
        };

        debug!(
            "Selected case {} ({:?}, composite {:.3}) from {} candidates",
            case.id,
            reason,
            composite,
            scored.len()
        );

        Ok(Some(CaseRecommendation {
            case_id: case.id.clone(),
            reason,
            scores,
            composite,
            target_levels,
            target_bins: profile.target_bins,
            confidence: composite.min(1.0),
        }))
    }

    fn composite(&self, s: &CaseScores, warm_up: bool) -> f64 {
        if warm_up {
            return 0.5 * s.information + 0.3 * s.coverage + 0.2 * s.difficulty;
        }
        let c = &self.config;
        c.information_weight * s.information
            + c.calibration_weight * s.calibration
            + c.cascade_weight * s.cascade
            + c.coverage_weight * s.coverage
            + c.difficulty_weight * s.difficulty
    }

    fn score(&self, case: &ClinicalCase, theta: f64, profile: &Profile) -> CaseScores {
        let b = case.irt.difficulty();

        let information = if case.level_offsets.is_empty() {
            case.irt.information(theta)
        } else {
            case.level_offsets
                .iter()
                .filter_map(|offset| IrtParameters::new(case.irt.discrimination(), b + offset, case.irt.guessing()).ok())
                .map(|level| level.information(theta))
                .sum::<f64>()
                / case.levels() as f64
        }
        .min(1.0);

        let target = theta + self.config.difficulty_step;
        let difficulty = (-(b - target).powi(2) / 2.0).exp();

        let coverage = if profile.attempts == 0 {
            0.5
        } else {
            let share = profile.area_counts.get(&case.area).copied().unwrap_or(0) as f64 / profile.attempts as f64;
            (0.5 + (self.config.target_area_share - share) * 5.0).clamp(0.0, 1.0)
        };

        let (calibration, cascade) = if profile.warm_up {
            (0.0, 0.0)
        } else {
            let calibration = profile.worst_bin.map_or(0.0, |(rating, gap)| {
                let zone = (rating.value() as f64 - 3.0) * 0.5;
                0.6 * gap + 0.4 * (-(b - zone).powi(2) / 2.0).exp()
            });
            (calibration, profile.cascade_score)
        };

        CaseScores {
            information,
            calibration,
            cascade,
            coverage,
            difficulty,
        }
    }

    fn profile(&self, history: &CalibrationHistory) -> Profile {
        let attempts = history.attempts();
        let recent = attempts
            .iter()
            .rev()
            .take(self.config.recent_window)
            .map(|a| a.case_id.clone())
            .collect();
        let mut area_counts = BTreeMap::new();
        for attempt in attempts {
            *area_counts.entry(attempt.area.clone()).or_insert(0) += 1;
        }

        let bins: Vec<ConfidenceBin> = history
            .reliability()
            .bins()
            .iter()
            .filter(|b| b.total > 0)
            .cloned()
            .collect();
        let worst_bin = bins
            .iter()
            .map(|b| (b.confidence, b.gap()))
            .fold(None, |best: Option<(ConfidenceRating, f64)>, (rating, gap)| match best {
                Some((_, top)) if top >= gap => best,
                _ => Some((rating, gap)),
            });
        let target_bins = if bins.is_empty() {
            Vec::new()
        } else {
            let mean_gap = bins.iter().map(|b| b.gap()).sum::<f64>() / bins.len() as f64;
            bins.iter()
                .filter(|b| b.gap() > mean_gap && b.total >= 2)
                .map(|b| b.confidence)
                .collect()
        };

        let cascade = history.cascade();
        let cascade_score = match cascade.strongest {
            Some(_) => 0.7 * cascade.severity + 0.3,
            None => 0.3,
        };
        let mut target_levels: Vec<(usize, f64)> = cascade
            .level_error_rates
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, rate)| *rate > 0.3)
            .collect();
        target_levels.sort_by(|a, b| b.1.total_cmp(&a.1));

        Profile {
            warm_up: attempts.len() < self.config.warm_up_attempts,
            recent,
            area_counts,
            attempts: attempts.len(),
            worst_bin,
            cascade_score,
            dunning_kruger: history.dunning_kruger().zone,
            target_levels: target_levels.into_iter().map(|(level, _)| level).collect(),
            target_bins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::analyzer::{CalibrationAnalyzer, CalibrationInput, CalibrationLevel};
    use crate::calibration::history::CaseAttempt;
    use chrono::{Duration, TimeZone, Utc};

    fn case(id: &str, area: &str, b: f64) -> ClinicalCase {
        ClinicalCase::new(id, area, IrtParameters::new(1.2, b, 0.25).unwrap())
    }

    fn attempt(day: i64, case_id: &str, area: &str, theta: f64, steps: &[(bool, u8)]) -> CaseAttempt {
        let input = CalibrationInput {
            levels: steps
                .iter()
                .enumerate()
                .map(|(i, (correct, rating))| {
                    CalibrationLevel::new(format!("step{}", i), *correct, ConfidenceRating::new(*rating).unwrap())
                })
                .collect(),
        };
        CaseAttempt {
            case_id: case_id.to_string(),
            area: ContentArea::from(area),
            theta,
            completed_at: Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap() + Duration::days(day),
            result: CalibrationAnalyzer::default().analyze(&input).unwrap(),
        }
    }

    fn greedy() -> CaseSelector {
        CaseSelector::new(CaseSelectionConfig {
            top_candidates: 1,
            ..CaseSelectionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_empty_pool_and_bad_ability() {
        let selector = CaseSelector::default();
        let history = CalibrationHistory::default();
        assert!(selector.select(&[], &history, 0.0, 1).unwrap().is_none());
        assert!(selector.select(&[case("a", "cirurgia", 0.0)], &history, f64::NAN, 1).is_err());
    }

    #[test]
    fn test_warm_up_prefers_cases_just_above_ability() {
        let cases = [case("hard", "cirurgia", 3.0), case("near", "cirurgia", 0.3)];
        let pick = greedy()
            .select(&cases, &CalibrationHistory::default(), 0.0, 7)
            .unwrap()
            .unwrap();
        assert_eq!(pick.case_id, "near");
        assert_eq!(pick.scores.calibration, 0.0);
        assert_eq!(pick.scores.coverage, 0.5);
        assert_eq!(pick.scores.difficulty, 1.0);
        assert_eq!(pick.target_levels, vec![0, 1, 2, 3]);
        assert!(pick.target_bins.is_empty());
    }

    #[test]
    fn test_recent_cases_are_skipped_unless_nothing_else_is_left() {
        let history = CalibrationHistory::new([attempt(0, "near", "cirurgia", 0.0, &[(true, 4)])]).unwrap();
        let cases = [case("near", "cirurgia", 0.3), case("far", "cirurgia", 2.0)];
        let pick = greedy().select(&cases, &history, 0.0, 7).unwrap().unwrap();
        assert_eq!(pick.case_id, "far");

        let only = greedy().select(&cases[..1], &history, 0.0, 7).unwrap().unwrap();
        assert_eq!(only.case_id, "near");
    }

    #[test]
    fn test_underrepresented_areas_gain_coverage() {
        let history = CalibrationHistory::new(
            (0..4).map(|day| attempt(day, &format!("seen{}", day), "cirurgia", 0.0, &[(true, 3)])),
        )
        .unwrap();
        let cases = [case("cir", "cirurgia", 0.3), case("ped", "pediatria", 0.3)];
        let pick = greedy().select(&cases, &history, 0.0, 3).unwrap().unwrap();
        assert_eq!(pick.case_id, "ped");
        assert_eq!(pick.scores.coverage, 1.0);
        assert_eq!(pick.reason, SelectionReason::AreaCoverage);
    }

    #[test]
    fn test_pick_is_reproducible_and_drawn_from_the_best() {
        let selector = CaseSelector::default();
        let history = CalibrationHistory::default();
        let cases: Vec<ClinicalCase> = (0..8)
            .map(|i| case(&format!("c{}", i), "cirurgia", -1.0 + 0.4 * i as f64))
            .collect();

        let mut ranked: Vec<(String, f64)> = cases
            .iter()
            .map(|c| {
                let pick = greedy().select(std::slice::from_ref(c), &history, 0.0, 0).unwrap().unwrap();
                (pick.case_id, pick.composite)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let best: Vec<&str> = ranked[..3].iter().map(|(id, _)| id.as_str()).collect();

        let mut seen = HashSet::new();
        for seed in 0..60 {
            let first = selector.select(&cases, &history, 0.0, seed).unwrap().unwrap();
            let again = selector.select(&cases, &history, 0.0, seed).unwrap().unwrap();
            assert_eq!(first, again);
            assert!(best.contains(&first.case_id.as_str()));
            seen.insert(first.case_id);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_overconfident_low_performers_get_a_dunning_kruger_case() {
        let history = CalibrationHistory::new([
            attempt(0, "h0", "cirurgia", -2.0, &[(false, 5), (false, 5), (false, 5)]),
            attempt(1, "h1", "pediatria", -1.0, &[(false, 5), (false, 5), (false, 5)]),
            attempt(2, "h2", "cirurgia", 1.0, &[(true, 2), (true, 2), (true, 2)]),
            attempt(3, "h3", "pediatria", 2.0, &[(true, 1), (true, 1), (true, 1)]),
        ])
        .unwrap();
        assert_eq!(history.dunning_kruger().zone, DunningKrugerZone::HighRisk);

        let pick = greedy()
            .select(&[case("overconfident-zone", "cirurgia", 1.0)], &history, 0.0, 11)
            .unwrap()
            .unwrap();
        assert_eq!(pick.reason, SelectionReason::DunningKrugerCheck);
        assert!(pick.scores.calibration > 0.9);
        assert!(pick.target_bins.contains(&ConfidenceRating::new(5).unwrap()));
        assert_eq!(pick.target_levels, vec![0, 1, 2]);
    }
}
