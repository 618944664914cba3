//! Per-case metacognitive calibration analysis
//!
//! Turns the ordered (correct, confidence) trace of one multi-step case into
//! quadrant counts, a signed overconfidence index, a Brier-based calibration
//! score, typed gap findings and short feedback strings.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::quadrant::{ConfidenceRating, Quadrant};
use crate::config::{CalibrationConfig, ConfigRecord};
use crate::error::{EngineError, EngineResult};

/// One answered reasoning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLevel {
    pub label: String,
    pub correct: bool,
    pub confidence: ConfidenceRating,
}

impl CalibrationLevel {
    pub fn new(label: impl Into<String>, correct: bool, confidence: ConfidenceRating) -> Self {
        Self {
            label: label.into(),
            correct,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInput {
    pub levels: Vec<CalibrationLevel>,
}

/// Step outcome with its quadrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceLevelResult {
    /// Position of the step in the case, from 0
    pub level: usize,
    pub label: String,
    pub correct: bool,
    pub confidence: ConfidenceRating,
    pub quadrant: Quadrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LacunaType {
    /// Missing knowledge
    Epistemic,

    /// Error made with high confidence
    Metacognitive,

    /// Pieces known but not combined
    Integration,
}

/// A detected gap, tied to the step that revealed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lacuna {
    pub lacuna_type: LacunaType,
    pub level: usize,
    pub label: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadrantCounts {
    pub mastery: usize,
    pub illusion_of_knowing: usize,
    pub unconscious_competence: usize,
    pub known_unknown: usize,
}

impl QuadrantCounts {
    fn add(&mut self, quadrant: Quadrant) {
        match quadrant {
            Quadrant::Mastery => self.mastery += 1,
            Quadrant::IllusionOfKnowing => self.illusion_of_knowing += 1,
            Quadrant::UnconsciousCompetence => self.unconscious_competence += 1,
            Quadrant::KnownUnknown => self.known_unknown += 1,
            Quadrant::Uncertain => {}
        }
    }

    pub fn get(&self, quadrant: Quadrant) -> usize {
        match quadrant {
            Quadrant::Mastery => self.mastery,
            Quadrant::IllusionOfKnowing => self.illusion_of_knowing,
            Quadrant::UnconsciousCompetence => self.unconscious_competence,
            Quadrant::KnownUnknown => self.known_unknown,
            Quadrant::Uncertain => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.mastery + self.illusion_of_knowing + self.unconscious_competence + self.known_unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub level_results: Vec<ConfidenceLevelResult>,
    pub quadrant_counts: QuadrantCounts,

    /// Steps rated between the low and high thresholds
    pub uncertain_count: usize,

    /// Mean rescaled confidence minus mean accuracy, in [-1, 1]
    pub overconfidence_index: f64,

    /// `100 · (1 - Brier)`, rounded, in [0, 100]
    pub calibration_score: f64,

    pub lacunas: Vec<Lacuna>,
    pub insights: Vec<String>,
}

/// Analyzer for confidence-rated multi-step cases
#[derive(Debug, Clone, Default)]
pub struct CalibrationAnalyzer {
    config: CalibrationConfig,
}

impl CalibrationAnalyzer {
    pub fn new(config: CalibrationConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn classify(&self, correct: bool, confidence: ConfidenceRating) -> Quadrant {
        Quadrant::classify(correct, confidence, &self.config)
    }

    pub fn analyze(&self, input: &CalibrationInput) -> EngineResult<CalibrationResult> {
        if input.levels.is_empty() {
            return Err(EngineError::InvalidInput("calibration input has no levels".to_string()));
        }

        let level_results: Vec<ConfidenceLevelResult> = input
            .levels
            .iter()
            .enumerate()
            .map(|(level, step)| ConfidenceLevelResult {
                level,
                label: step.label.clone(),
                correct: step.correct,
                confidence: step.confidence,
                quadrant: self.classify(step.correct, step.confidence),
            })
            .collect();

        let mut quadrant_counts = QuadrantCounts::default();
        let mut uncertain_count = 0;
        for result in &level_results {
            if result.quadrant.is_counted() {
                quadrant_counts.add(result.quadrant);
            } else {
                uncertain_count += 1;
            }
        }

        let overconfidence_index = overconfidence_index(&level_results);
        let calibration_score = calibration_score(&level_results);
        let lacunas = detect_lacunas(&level_results);
        let insights = self.insights(&level_results, overconfidence_index, calibration_score);

        debug!(
            "Calibration: {} levels, overconfidence {:+.3}, score {:.0}, {} lacunas",
            level_results.len(),
            overconfidence_index,
            calibration_score,
            lacunas.len()
        );

        Ok(CalibrationResult {
            level_results,
            quadrant_counts,
            uncertain_count,
            overconfidence_index,
            calibration_score,
            lacunas,
            insights,
        })
    }

    fn insights(&self, results: &[ConfidenceLevelResult], overconfidence: f64, score: f64) -> Vec<String> {
        let mut insights = Vec::new();

        insights.push(if score >= 80.0 {
            format!("Excellent calibration ({:.0}/100): your confidence tracks your accuracy.", score)
        } else if score >= 60.0 {
            format!("Moderate calibration ({:.0}/100): confidence and accuracy partly diverge.", score)
        } else {
            format!("Low calibration ({:.0}/100): confidence is a poor guide to your accuracy here.", score)
        });

        let threshold = self.config.insight_threshold;
        if overconfidence > threshold {
            insights.push(format!(
                "Tendency towards overconfidence (index {:+.2}). Confident errors are the most dangerous in practice.",
                overconfidence
            ));
        } else if overconfidence < -threshold {
            insights.push(format!(
                "Tendency towards underconfidence (index {:+.2}). You know more than you believe.",
                overconfidence
            ));
        }

        let illusions: Vec<&str> = results
            .iter()
            .filter(|r| r.quadrant == Quadrant::IllusionOfKnowing)
            .map(|r| r.label.as_str())
            .collect();
        if !illusions.is_empty() {
            insights.push(format!(
                "Illusion of knowing detected in {}. High-confidence errors call for a deep review of these concepts.",
                illusions.join(", ")
            ));
        }

        insights
    }
}

/// Mean rescaled confidence minus mean accuracy
pub fn overconfidence_index(results: &[ConfidenceLevelResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let n = results.len() as f64;
    let confidence: f64 = results.iter().map(|r| r.confidence.as_probability()).sum::<f64>() / n;
    let accuracy = results.iter().filter(|r| r.correct).count() as f64 / n;
    confidence - accuracy
}

/// `round(100 · (1 - mean((confidence - outcome)²)))`
pub fn calibration_score(results: &[ConfidenceLevelResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let brier = results
        .iter()
        .map(|r| {
            let outcome = if r.correct { 1.0 } else { 0.0 };
            (r.confidence.as_probability() - outcome).powi(2)
        })
        .sum::<f64>()
        / results.len() as f64;
    (100.0 * (1.0 - brier)).round().clamp(0.0, 100.0)
}

/// Rule-based gap detection over the ordered step outcomes
///
/// Only incorrect steps produce findings. A confident error adds a
/// metacognitive finding. Structurally, an error on the first step is
/// epistemic, errors on intermediate steps are integration gaps, and an
/// error on the final step is an integration gap when every earlier step
/// was right and epistemic otherwise.
pub fn detect_lacunas(results: &[ConfidenceLevelResult]) -> Vec<Lacuna> {
    let mut lacunas = Vec::new();
    let last = results.len().saturating_sub(1);

    for (i, result) in results.iter().enumerate() {
        if result.correct {
            continue;
        }

        if result.quadrant == Quadrant::IllusionOfKnowing {
            lacunas.push(Lacuna {
                lacuna_type: LacunaType::Metacognitive,
                level: i,
                label: result.label.clone(),
                evidence: format!(
                    "error with high confidence ({}) at \"{}\"",
                    result.confidence, result.label
                ),
            });
        }

        let earlier_correct = results[..i].iter().all(|r| r.correct);
        let (lacuna_type, evidence) = if i == 0 {
            (
                LacunaType::Epistemic,
                format!("failed the opening step \"{}\"", result.label),
            )
        } else if i < last {
            (
                LacunaType::Integration,
                format!("could not build \"{}\" on the preceding steps", result.label),
            )
        } else if earlier_correct {
            (
                LacunaType::Integration,
                format!("every earlier step correct but the final step \"{}\" failed", result.label),
            )
        } else {
            (
                LacunaType::Epistemic,
                format!("final step \"{}\" failed after earlier errors", result.label),
            )
        };

        lacunas.push(Lacuna {
            lacuna_type,
            level: i,
            label: result.label.clone(),
            evidence,
        });
    }

    lacunas
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn input(steps: &[(bool, u8)]) -> CalibrationInput {
        let labels = ["data", "pattern", "hypothesis", "management"];
        CalibrationInput {
            levels: steps
                .iter()
                .enumerate()
                .map(|(i, &(correct, rating))| {
                    CalibrationLevel::new(labels[i % labels.len()], correct, ConfidenceRating::new(rating).unwrap())
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let analyzer = CalibrationAnalyzer::default();
        let err = analyzer.analyze(&CalibrationInput { levels: vec![] }).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_confident_and_correct_is_well_calibrated() {
        let analyzer = CalibrationAnalyzer::default();
        let result = analyzer.analyze(&input(&[(true, 5), (true, 5), (true, 5), (true, 5)])).unwrap();

        assert_relative_eq!(result.overconfidence_index, 0.0, epsilon = 1e-12);
        assert_relative_eq!(result.calibration_score, 100.0);
        assert_eq!(result.quadrant_counts.mastery, 4);
        assert!(result.lacunas.is_empty());
    }

    #[test]
    fn test_confident_and_wrong_is_overconfident() {
        let analyzer = CalibrationAnalyzer::default();
        let result = analyzer.analyze(&input(&[(false, 5), (false, 5), (false, 5), (false, 5)])).unwrap();

        assert_relative_eq!(result.overconfidence_index, 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.calibration_score, 0.0);
        assert_eq!(result.quadrant_counts.illusion_of_knowing, 4);
        assert!(result.insights.iter().any(|s| s.contains("overconfidence")));
        assert!(result.insights.iter().any(|s| s.contains("Illusion of knowing")));
    }

    #[test]
    fn test_uncertain_ratings_counted_separately() {
        let analyzer = CalibrationAnalyzer::default();
        let result = analyzer.analyze(&input(&[(true, 3), (false, 3), (true, 1)])).unwrap();

        assert_eq!(result.uncertain_count, 2);
        assert_eq!(result.quadrant_counts.total(), 1);
        assert_eq!(result.quadrant_counts.unconscious_competence, 1);
        // (0.5 + 0.5 + 0) / 3 - 2/3
        assert_relative_eq!(result.overconfidence_index, 1.0 / 3.0 - 2.0 / 3.0, epsilon = 1e-12);
        assert!(result.insights.iter().any(|s| s.contains("underconfidence")));
    }

    #[test]
    fn test_final_step_integration_gap() {
        let analyzer = CalibrationAnalyzer::default();
        let result = analyzer.analyze(&input(&[(true, 4), (true, 4), (true, 4), (false, 2)])).unwrap();

        assert_eq!(result.lacunas.len(), 1);
        assert_eq!(result.lacunas[0].lacuna_type, LacunaType::Integration);
        assert_eq!(result.lacunas[0].level, 3);
        assert!(result.lacunas[0].evidence.contains("management"));
    }

    #[test]
    fn test_structural_and_metacognitive_findings() {
        let lacunas = detect_lacunas(
            &CalibrationAnalyzer::default()
                .analyze(&input(&[(false, 5), (false, 1), (true, 4), (false, 2)]))
                .unwrap()
                .level_results,
        );
        let types: Vec<(usize, LacunaType)> = lacunas.iter().map(|l| (l.level, l.lacuna_type)).collect();
        assert_eq!(
            types,
            vec![
                (0, LacunaType::Metacognitive),
                (0, LacunaType::Epistemic),
                (1, LacunaType::Integration),
                (3, LacunaType::Epistemic),
            ]
        );
    }
}
