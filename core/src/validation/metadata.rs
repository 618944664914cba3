//! Metadata-based item parameter estimation
//!
//! Before an item has empirical calibration data its 3PL parameters are
//! guessed from exam metadata:
//!
//! ```text
//! b = clamp(b₀ + tier + (ref_year - year)·drift + exam_type + f(position) + area)
//! a = clamp(a₀ · tier_multiplier · exam_type_multiplier)
//! c = 1 / options (lookup)
//! f(x) = clamp(α·x + β·x² + γ·x³, ±limit),  x = 2·(pos - 1)/(total - 1) - 1
//! ```
//!
//! The coefficient table is a versioned record carrying the validation
//! report that justified its current values.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ConfigRecord;
use crate::error::{EngineError, EngineResult};
use crate::irt::IrtParameters;
use crate::item_bank::ContentArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionTier {
    /// National, highly competitive exams
    Tier1National,
    Tier2RegionalStrong,
    Tier3Regional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    R1,
    R2,
    R3,
    National,
    Concurso,
}

/// Exam metadata of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub institution_tier: InstitutionTier,
    pub exam_type: ExamType,
    pub year: i32,

    /// 1-based position of the item in its exam
    pub position: usize,
    pub exam_length: usize,

    pub area: Option<ContentArea>,
    pub option_count: u8,
}

/// Validation run that justified a coefficient table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReference {
    pub report_id: String,
    pub difficulty_mae: f64,
    pub difficulty_correlation: f64,
    pub discrimination_correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub version: String,
    pub effective_from: NaiveDate,
    pub justified_by: Option<ReportReference>,
}

/// Cubic exam-position adjustment over the centred position `x ∈ [-1, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPolynomial {
    pub linear: f64,
    pub quadratic: f64,
    pub cubic: f64,

    /// Symmetric clamp on the adjustment
    pub limit: f64,
}

impl PositionPolynomial {
    pub fn adjustment(&self, position: usize, exam_length: usize) -> f64 {
        let span = exam_length.saturating_sub(1).max(1) as f64;
        let ratio = (position.saturating_sub(1) as f64 / span).clamp(0.0, 1.0);
        let x = 2.0 * ratio - 1.0;
        let value = self.linear * x + self.quadratic * x * x + self.cubic * x * x * x;
        value.clamp(-self.limit, self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyCoefficients {
    pub base: f64,
    pub min: f64,
    pub max: f64,
    pub institution: BTreeMap<InstitutionTier, f64>,
    pub exam_type: BTreeMap<ExamType, f64>,

    /// Added per year before `reference_year`
    pub year_drift: f64,
    pub reference_year: i32,

    pub position: PositionPolynomial,
    pub area: BTreeMap<ContentArea, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminationCoefficients {
    pub base: f64,
    pub min: f64,
    pub max: f64,
    pub institution: BTreeMap<InstitutionTier, f64>,
    pub exam_type: BTreeMap<ExamType, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessingCoefficients {
    pub by_option_count: BTreeMap<u8, f64>,
    pub fallback: f64,
}

/// Versioned tuning table of the metadata estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationCoefficients {
    pub provenance: Provenance,
    pub difficulty: DifficultyCoefficients,
    pub discrimination: DiscriminationCoefficients,
    pub guessing: GuessingCoefficients,
}

impl Default for EstimationCoefficients {
    fn default() -> Self {
        use ExamType::*;
        use InstitutionTier::*;

        let area = [
            ("clinica_medica", 0.0),
            ("cirurgia", 0.15),
            ("ginecologia_obstetricia", 0.1),
            ("pediatria", 0.05),
            ("saude_coletiva", -0.15),
        ]
        .into_iter()
        .map(|(name, offset)| (ContentArea::from(name), offset))
        .collect();

        Self {
            provenance: Provenance {
                version: "2.0.0".to_string(),
                effective_from: NaiveDate::from_ymd_opt(2025, 1, 24).unwrap_or_default(),
                justified_by: None,
            },
            difficulty: DifficultyCoefficients {
                base: 0.0,
                min: -2.5,
                max: 2.5,
                institution: [(Tier1National, 0.4), (Tier2RegionalStrong, 0.0), (Tier3Regional, -0.25)]
                    .into_iter()
                    .collect(),
                exam_type: [(R1, 0.3), (R2, 0.0), (R3, -0.1), (National, 0.2), (Concurso, 0.05)]
                    .into_iter()
                    .collect(),
                year_drift: 0.1,
                reference_year: 2024,
                position: PositionPolynomial {
                    linear: 0.35,
                    quadratic: 0.0,
                    cubic: 0.15,
                    limit: 1.5,
                },
                area,
            },
            discrimination: DiscriminationCoefficients {
                base: 1.0,
                min: 0.7,
                max: 1.4,
                institution: [(Tier1National, 1.2), (Tier2RegionalStrong, 1.05), (Tier3Regional, 0.9)]
                    .into_iter()
                    .collect(),
                exam_type: [(R1, 1.1), (R2, 1.0), (R3, 1.0), (National, 1.15), (Concurso, 1.05)]
                    .into_iter()
                    .collect(),
            },
            guessing: GuessingCoefficients {
                by_option_count: [(4, 0.25), (5, 0.2)].into_iter().collect(),
                fallback: 0.25,
            },
        }
    }
}

impl ConfigRecord for EstimationCoefficients {
    fn validate(&self) -> EngineResult<()> {
        let invalid = |message: &str| Err(EngineError::InvalidConfiguration(message.to_string()));

        if self.provenance.version.trim().is_empty() {
            return invalid("coefficient table needs a version");
        }
        if !(self.difficulty.min < self.difficulty.max) {
            return invalid("difficulty bounds must be increasing");
        }
        if !(0.0 < self.discrimination.min && self.discrimination.min < self.discrimination.max) {
            return invalid("discrimination bounds must be positive and increasing");
        }
        if !(self.difficulty.position.limit >= 0.0) {
            return invalid("position limit must be non-negative");
        }
        let multipliers = self
            .discrimination
            .institution
            .values()
            .chain(self.discrimination.exam_type.values());
        for m in multipliers {
            if !(*m > 0.0) {
                return invalid("discrimination multipliers must be positive");
            }
        }
        let guessing = self
            .guessing
            .by_option_count
            .values()
            .chain(std::iter::once(&self.guessing.fallback));
        for g in guessing {
            if !(0.0..1.0).contains(g) {
                return invalid("guessing values must lie in [0, 1)");
            }
        }
        Ok(())
    }
}

/// Additive pieces of a difficulty estimate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultyComponents {
    pub institution: f64,
    pub year: f64,
    pub exam_type: f64,
    pub position: f64,
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEstimate {
    pub parameters: IrtParameters,
    pub components: DifficultyComponents,

    /// Product of the discrimination multipliers before clamping
    pub discrimination_multiplier: f64,

    /// Heuristic trust in the estimate, by institution tier
    pub confidence: f64,
}

/// Estimator over a validated coefficient table
#[derive(Debug, Clone)]
pub struct MetadataEstimator {
    coefficients: EstimationCoefficients,
}

impl Default for MetadataEstimator {
    fn default() -> Self {
        Self {
            coefficients: EstimationCoefficients::default(),
        }
    }
}

impl MetadataEstimator {
    pub fn new(coefficients: EstimationCoefficients) -> EngineResult<Self> {
        coefficients.validate()?;
        Ok(Self { coefficients })
    }

    pub fn coefficients(&self) -> &EstimationCoefficients {
        &self.coefficients
    }

    pub fn estimate(&self, metadata: &ItemMetadata) -> EngineResult<MetadataEstimate> {
        if metadata.position == 0 || metadata.position > metadata.exam_length.max(1) {
            return Err(EngineError::InvalidInput(format!(
                "position {} outside exam of length {}",
                metadata.position, metadata.exam_length
            )));
        }

        let d = &self.coefficients.difficulty;
        let components = DifficultyComponents {
            institution: d.institution.get(&metadata.institution_tier).copied().unwrap_or(0.0),
            year: f64::from(d.reference_year - metadata.year) * d.year_drift,
            exam_type: d.exam_type.get(&metadata.exam_type).copied().unwrap_or(0.0),
            position: d.position.adjustment(metadata.position, metadata.exam_length),
            area: metadata
                .area
                .as_ref()
                .and_then(|area| d.area.get(area))
                .copied()
                .unwrap_or(0.0),
        };
        let difficulty = (d.base
            + components.institution
            + components.year
            + components.exam_type
            + components.position
            + components.area)
            .clamp(d.min, d.max);

        let a = &self.coefficients.discrimination;
        let discrimination_multiplier = a.institution.get(&metadata.institution_tier).copied().unwrap_or(1.0)
            * a.exam_type.get(&metadata.exam_type).copied().unwrap_or(1.0);
        let discrimination = (a.base * discrimination_multiplier).clamp(a.min, a.max);

        let guessing = self
            .coefficients
            .guessing
            .by_option_count
            .get(&metadata.option_count)
            .copied()
            .unwrap_or(self.coefficients.guessing.fallback);

        let parameters = IrtParameters::new(discrimination, difficulty, guessing)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;

        let confidence = match metadata.institution_tier {
            InstitutionTier::Tier1National => 0.8,
            InstitutionTier::Tier2RegionalStrong => 0.7,
            InstitutionTier::Tier3Regional => 0.5,
        };

        Ok(MetadataEstimate {
            parameters,
            components,
            discrimination_multiplier,
            confidence,
        })
    }
}

/// Empirical discrimination from a point-biserial correlation
///
/// `|r| · factor`, clamped to `[min, max]`. Correlations below 0.05 carry
/// no usable signal and map to 1.0.
pub fn discrimination_from_biserial(biserial: f64, factor: f64, min: f64, max: f64) -> f64 {
    if !biserial.is_finite() || biserial.abs() < 0.05 {
        return 1.0;
    }
    (biserial.abs() * factor).clamp(min, max)
}
