//! Metacognitive quadrants
//!
//! Each reasoning step pairs a correctness flag with a 1–5 confidence
//! rating. The pair maps to one of four quadrants, or to `Uncertain` for
//! ratings strictly between the low and high thresholds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::error::{EngineError, EngineResult};

/// Confidence rating on a 1 (guess) to 5 (certain) scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ConfidenceRating(u8);

impl ConfidenceRating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> EngineResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::InvalidInput(format!(
                "confidence rating {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Rating mapped onto [0, 1]: 1 → 0, 5 → 1
    pub fn as_probability(self) -> f64 {
        f64::from(self.0 - Self::MIN) / f64::from(Self::MAX - Self::MIN)
    }

    /// All ratings in ascending order
    pub fn all() -> impl Iterator<Item = ConfidenceRating> {
        (Self::MIN..=Self::MAX).map(ConfidenceRating)
    }
}

impl TryFrom<u8> for ConfidenceRating {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ConfidenceRating::new(value)
    }
}

impl From<ConfidenceRating> for u8 {
    fn from(rating: ConfidenceRating) -> Self {
        rating.0
    }
}

impl fmt::Display for ConfidenceRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, Self::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// Correct with high confidence
    Mastery,

    /// Wrong with high confidence
    IllusionOfKnowing,

    /// Correct with low confidence
    UnconsciousCompetence,

    /// Wrong with low confidence
    KnownUnknown,

    /// Neutral rating, outside the four quadrants
    Uncertain,
}

impl Quadrant {
    /// The four counted quadrants
    pub const COUNTED: [Quadrant; 4] = [
        Quadrant::Mastery,
        Quadrant::IllusionOfKnowing,
        Quadrant::UnconsciousCompetence,
        Quadrant::KnownUnknown,
    ];

    /// Classify one (correct, confidence) pair
    pub fn classify(correct: bool, confidence: ConfidenceRating, config: &CalibrationConfig) -> Quadrant {
        let rating = confidence.value();
        if rating >= config.high_confidence {
            if correct {
                Quadrant::Mastery
            } else {
                Quadrant::IllusionOfKnowing
            }
        } else if rating <= config.low_confidence {
            if correct {
                Quadrant::UnconsciousCompetence
            } else {
                Quadrant::KnownUnknown
            }
        } else {
            Quadrant::Uncertain
        }
    }

    pub fn is_counted(self) -> bool {
        self != Quadrant::Uncertain
    }

    pub fn label(self) -> &'static str {
        match self {
            Quadrant::Mastery => "mastery",
            Quadrant::IllusionOfKnowing => "illusion of knowing",
            Quadrant::UnconsciousCompetence => "unconscious competence",
            Quadrant::KnownUnknown => "known unknown",
            Quadrant::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(ConfidenceRating::new(0).is_err());
        assert!(ConfidenceRating::new(6).is_err());
        assert_eq!(ConfidenceRating::all().count(), 5);
        assert_eq!(ConfidenceRating::new(1).unwrap().as_probability(), 0.0);
        assert_eq!(ConfidenceRating::new(5).unwrap().as_probability(), 1.0);
    }

    #[test]
    fn test_rating_deserialization_is_validated() {
        let rating: ConfidenceRating = serde_json::from_str("4").unwrap();
        assert_eq!(rating.value(), 4);
        assert!(serde_json::from_str::<ConfidenceRating>("9").is_err());
        assert_eq!(serde_json::to_string(&rating).unwrap(), "4");
    }

    #[test]
    fn test_classification_table() {
        let config = CalibrationConfig::default();
        let expected = [
            (true, 1, Quadrant::UnconsciousCompetence),
            (true, 2, Quadrant::UnconsciousCompetence),
            (true, 3, Quadrant::Uncertain),
            (true, 4, Quadrant::Mastery),
            (true, 5, Quadrant::Mastery),
            (false, 1, Quadrant::KnownUnknown),
            (false, 2, Quadrant::KnownUnknown),
            (false, 3, Quadrant::Uncertain),
            (false, 4, Quadrant::IllusionOfKnowing),
            (false, 5, Quadrant::IllusionOfKnowing),
        ];
        for (correct, rating, quadrant) in expected {
            let confidence = ConfidenceRating::new(rating).unwrap();
            assert_eq!(Quadrant::classify(correct, confidence, &config), quadrant);
        }
    }
}
