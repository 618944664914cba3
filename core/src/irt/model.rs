//! Three-Parameter Logistic (3PL) item response model
//!
//! ```text
//! P(correct | θ) = c + (1 - c) / (1 + exp(-a(θ - b)))
//! ```
//!
//! Where: θ = ability, a = discrimination, b = difficulty, c = guessing.
//! The response function is strictly increasing in θ and lives in `[c, 1)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probabilities are kept away from 0 and 1 before taking logarithms
const PROBABILITY_FLOOR: f64 = 1e-10;

/// Domain violations for 3PL parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("discrimination must be > 0, got {0}")]
    DiscriminationNotPositive(f64),

    #[error("guessing must lie in [0, 1), got {0}")]
    GuessingOutOfRange(f64),

    #[error("{0} must be finite")]
    NonFinite(&'static str),
}

/// Item Response Theory parameters (3PL model)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIrtParameters")]
pub struct IrtParameters {
    /// Discrimination parameter (slope), strictly positive
    discrimination: f64,

    /// Difficulty parameter (location)
    difficulty: f64,

    /// Guessing parameter (lower asymptote) in [0, 1)
    guessing: f64,
}

/// Unvalidated wire shape of [`IrtParameters`]
#[derive(Debug, Clone, Copy, Deserialize)]
struct RawIrtParameters {
    #[serde(alias = "a")]
    discrimination: f64,
    #[serde(alias = "b")]
    difficulty: f64,
    #[serde(alias = "c", default)]
    guessing: f64,
}

impl TryFrom<RawIrtParameters> for IrtParameters {
    type Error = ParameterError;

    fn try_from(raw: RawIrtParameters) -> Result<Self, Self::Error> {
        IrtParameters::new(raw.discrimination, raw.difficulty, raw.guessing)
    }
}

impl IrtParameters {
    /// Create new IRT parameters with validation
    pub fn new(discrimination: f64, difficulty: f64, guessing: f64) -> Result<Self, ParameterError> {
        if !discrimination.is_finite() {
            return Err(ParameterError::NonFinite("discrimination"));
        }
        if !difficulty.is_finite() {
            return Err(ParameterError::NonFinite("difficulty"));
        }
        if !guessing.is_finite() {
            return Err(ParameterError::NonFinite("guessing"));
        }
        if discrimination <= 0.0 {
            return Err(ParameterError::DiscriminationNotPositive(discrimination));
        }
        if !(0.0..1.0).contains(&guessing) {
            return Err(ParameterError::GuessingOutOfRange(guessing));
        }

        Ok(Self {
            discrimination,
            difficulty,
            guessing,
        })
    }

    pub fn discrimination(&self) -> f64 {
        self.discrimination
    }

    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    pub fn guessing(&self) -> f64 {
        self.guessing
    }

    /// Calculate the probability of correct response given ability
    pub fn probability(&self, theta: f64) -> f64 {
        let z = self.discrimination * (theta - self.difficulty);
        self.guessing + (1.0 - self.guessing) / (1.0 + (-z).exp())
    }

    /// Fisher information at the given ability
    ///
    /// `I(θ) = a²·(P-c)²·(1-P) / ((1-c)²·P)`
    pub fn information(&self, theta: f64) -> f64 {
        let p = self.probability(theta);
        let q = 1.0 - p;
        let c = self.guessing;

        let denominator = (1.0 - c).powi(2) * p;
        if denominator <= 0.0 || q <= 0.0 {
            return 0.0;
        }

        self.discrimination.powi(2) * (p - c).powi(2) * q / denominator
    }

    /// Log-likelihood of a single scored response
    pub fn log_likelihood(&self, theta: f64, correct: bool) -> f64 {
        let p = self.probability(theta).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
        if correct {
            p.ln()
        } else {
            (1.0 - p).ln()
        }
    }

    /// First and second derivative of the response log-likelihood in θ
    ///
    /// ```text
    /// l'  = a (u - P)(P - c) / (P (1 - c))
    /// l'' = a² (P - c)(1 - P)(u c - P²) / ((1 - c)² P²)
    /// ```
    pub fn log_likelihood_derivatives(&self, theta: f64, correct: bool) -> (f64, f64) {
        let a = self.discrimination;
        let c = self.guessing;
        let u = if correct { 1.0 } else { 0.0 };
        let p = self.probability(theta).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);

        let first = a * (u - p) * (p - c) / (p * (1.0 - c));
        let second = a * a * (p - c) * (1.0 - p) * (u * c - p * p) / ((1.0 - c).powi(2) * p * p);

        (first, second)
    }
}

/// Qualitative difficulty band for a `b` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyBand {
    VeryEasy,
    Easy,
    Medium,
    Hard,
    VeryHard,
}

impl DifficultyBand {
    pub fn from_difficulty(b: f64) -> Self {
        if b < -1.5 {
            DifficultyBand::VeryEasy
        } else if b < -0.5 {
            DifficultyBand::Easy
        } else if b < 0.5 {
            DifficultyBand::Medium
        } else if b < 1.5 {
            DifficultyBand::Hard
        } else {
            DifficultyBand::VeryHard
        }
    }
}

/// Test information: the sum of item informations at `theta`
pub fn test_information<'a>(theta: f64, items: impl IntoIterator<Item = &'a IrtParameters>) -> f64 {
    items.into_iter().map(|item| item.information(theta)).sum()
}
