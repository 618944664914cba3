//! DINA and G-DINA item response functions
//!
//! DINA is conjunctive: an examinee whose profile covers every required
//! attribute answers correctly with probability `1 - slip`, everyone else
//! with probability `guess`. G-DINA keeps one probability per reduced
//! attribute pattern (the profile restricted to the item's required set);
//! DINA is the special case where every pattern but the full one shares the
//! same value.

use serde::{Deserialize, Serialize};

use crate::cdm::attributes::AttributeSet;
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ItemId;

/// Response probabilities are clamped to `[FLOOR, 1 - FLOOR]`
pub const PROBABILITY_FLOOR: f64 = 1e-10;

/// Item response function of a diagnostic item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CdmItemModel {
    Dina { slip: f64, guess: f64 },

    /// Saturated table indexed by [`AttributeSet::reduced_index`]
    Gdina { probabilities: Vec<f64> },
}

/// Diagnostic item: Q-matrix row plus response model
///
/// Deserialization goes through [`RawCdmItem`] so a stored item is checked
/// the same way as one built with [`CdmItem::dina`] or [`CdmItem::gdina`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCdmItem", into = "RawCdmItem")]
pub struct CdmItem {
    pub id: ItemId,
    pub required: AttributeSet,
    pub model: CdmItemModel,
}

/// Unchecked serialized form of a [`CdmItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCdmItem {
    pub id: String,
    pub required: AttributeSet,
    pub model: CdmItemModel,
}

impl TryFrom<RawCdmItem> for CdmItem {
    type Error = EngineError;

    fn try_from(raw: RawCdmItem) -> Result<Self, Self::Error> {
        let item = CdmItem {
            id: ItemId::new(raw.id),
            required: raw.required,
            model: raw.model,
        };
        item.validate()?;
        Ok(item)
    }
}

impl From<CdmItem> for RawCdmItem {
    fn from(item: CdmItem) -> Self {
        RawCdmItem {
            id: item.id.as_str().to_string(),
            required: item.required,
            model: item.model,
        }
    }
}

fn check_probability(id: &ItemId, name: &str, value: f64) -> EngineResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::invalid_item(
            id,
            format!("{} must lie in [0, 1], got {}", name, value),
        ));
    }
    Ok(())
}

impl CdmItem {
    pub fn dina(id: impl Into<ItemId>, required: AttributeSet, slip: f64, guess: f64) -> EngineResult<Self> {
        let item = Self {
            id: id.into(),
            required,
            model: CdmItemModel::Dina { slip, guess },
        };
        item.validate()?;
        Ok(item)
    }

    pub fn gdina(id: impl Into<ItemId>, required: AttributeSet, probabilities: Vec<f64>) -> EngineResult<Self> {
        let item = Self {
            id: id.into(),
            required,
            model: CdmItemModel::Gdina { probabilities },
        };
        item.validate()?;
        Ok(item)
    }

    /// Check the Q-row, the probability ranges and the G-DINA table length
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.as_str().is_empty() {
            return Err(EngineError::InvalidInput("item id must not be empty".to_string()));
        }
        if self.required.is_empty() {
            return Err(EngineError::invalid_item(&self.id, "Q-matrix row requires no attribute"));
        }
        match &self.model {
            CdmItemModel::Dina { slip, guess } => {
                check_probability(&self.id, "slip", *slip)?;
                check_probability(&self.id, "guess", *guess)?;
            }
            CdmItemModel::Gdina { probabilities } => {
                let expected = self.pattern_count();
                if probabilities.len() != expected {
                    return Err(EngineError::DimensionMismatch {
                        expected,
                        found: probabilities.len(),
                    });
                }
                for &p in probabilities {
                    check_probability(&self.id, "pattern probability", p)?;
                }
            }
        }
        Ok(())
    }

    /// Number of reduced attribute patterns, `2^|R|`
    pub fn pattern_count(&self) -> usize {
        1 << self.required.len()
    }

    /// `P(correct | α)`, clamped away from 0 and 1
    pub fn probability(&self, profile: AttributeSet) -> f64 {
        let p = match &self.model {
            CdmItemModel::Dina { slip, guess } => {
                if profile.is_superset_of(self.required) {
                    1.0 - slip
                } else {
                    *guess
                }
            }
            CdmItemModel::Gdina { probabilities } => probabilities[self.required.reduced_index(profile)],
        };
        p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
    }

    /// Likelihood of the observed response under profile `α`
    pub fn response_probability(&self, profile: AttributeSet, correct: bool) -> f64 {
        let p = self.probability(profile);
        if correct {
            p
        } else {
            1.0 - p
        }
    }

    /// Probability table over reduced patterns
    pub fn pattern_probabilities(&self) -> Vec<f64> {
        match &self.model {
            CdmItemModel::Gdina { probabilities } => probabilities.clone(),
            CdmItemModel::Dina { slip, guess } => {
                let full = self.pattern_count() - 1;
                (0..=full)
                    .map(|l| if l == full { 1.0 - slip } else { *guess })
                    .collect()
            }
        }
    }

    /// Same item expressed as a saturated G-DINA table
    pub fn to_gdina(&self) -> CdmItem {
        CdmItem {
            id: self.id.clone(),
            required: self.required,
            model: CdmItemModel::Gdina {
                probabilities: self.pattern_probabilities(),
            },
        }
    }

    /// Identity-link G-DINA coefficients
    ///
    /// `P(l) = Σ_{S ⊆ l} δ_S`, so the deltas are the Möbius inverse of the
    /// probability table: `δ_S = Σ_{T ⊆ S} (-1)^{|S|-|T|} P(T)`. Index 0 is
    /// the intercept, single-bit indices are main effects, the rest are
    /// interactions.
    pub fn delta_coefficients(&self) -> Vec<f64> {
        let mut delta = self.pattern_probabilities();
        let bits = self.required.len();
        for bit in 0..bits {
            for s in 0..delta.len() {
                if s & (1 << bit) != 0 {
                    delta[s] -= delta[s ^ (1 << bit)];
                }
            }
        }
        delta
    }

    /// Number of free parameters contributed to a model fit
    pub fn parameter_count(&self) -> usize {
        match self.model {
            CdmItemModel::Dina { .. } => 2,
            CdmItemModel::Gdina { .. } => self.pattern_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set(indices: &[usize]) -> AttributeSet {
        AttributeSet::from_indices(indices.iter().copied()).unwrap()
    }

    #[test]
    fn test_dina_is_conjunctive() {
        let item = CdmItem::dina("q1", set(&[0, 2]), 0.1, 0.2).unwrap();
        assert_relative_eq!(item.probability(set(&[0, 2, 4])), 0.9);
        assert_relative_eq!(item.probability(set(&[0, 4])), 0.2);
        assert_relative_eq!(item.response_probability(set(&[0, 2]), false), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_probabilities_are_clamped() {
        let item = CdmItem::dina("q1", set(&[1]), 0.0, 0.0).unwrap();
        assert_eq!(item.probability(set(&[1])), 1.0 - PROBABILITY_FLOOR);
        assert_eq!(item.probability(AttributeSet::EMPTY), PROBABILITY_FLOOR);
    }

    #[test]
    fn test_gdina_reduces_to_dina() {
        let dina = CdmItem::dina("q1", set(&[1, 3]), 0.15, 0.25).unwrap();
        let gdina = dina.to_gdina();
        for bits in 0..16u32 {
            let profile = AttributeSet::from_bits(bits);
            assert_relative_eq!(dina.probability(profile), gdina.probability(profile));
        }
    }

    #[test]
    fn test_delta_coefficients_invert_table() {
        let item = CdmItem::gdina("q1", set(&[0, 1]), vec![0.2, 0.4, 0.5, 0.9]).unwrap();
        let delta = item.delta_coefficients();

        assert_relative_eq!(delta[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(delta[1], 0.2, epsilon = 1e-12);
        assert_relative_eq!(delta[2], 0.3, epsilon = 1e-12);
        assert_relative_eq!(delta[3], 0.2, epsilon = 1e-12);
        assert_relative_eq!(delta.iter().sum::<f64>(), 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_items_rejected() {
        assert!(CdmItem::dina("q1", AttributeSet::EMPTY, 0.1, 0.2).is_err());
        assert!(CdmItem::dina("q1", set(&[0]), 1.2, 0.2).is_err());
        assert!(matches!(
            CdmItem::gdina("q1", set(&[0, 1]), vec![0.2, 0.8]),
            Err(EngineError::DimensionMismatch { expected: 4, found: 2 })
        ));
    }

    #[test]
    fn test_deserialization_validates_items() {
        let short_table = r#"{"id":"x","required":[0,1],"model":{"model":"gdina","probabilities":[0.2,0.8]}}"#;
        assert!(serde_json::from_str::<CdmItem>(short_table).is_err());

        let bad_slip = r#"{"id":"x","required":[0],"model":{"model":"dina","slip":1.5,"guess":0.2}}"#;
        assert!(serde_json::from_str::<CdmItem>(bad_slip).is_err());

        let item = CdmItem::gdina("x", set(&[0, 1]), vec![0.1, 0.3, 0.4, 0.9]).unwrap();
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(serde_json::from_str::<CdmItem>(&json).unwrap(), item);
    }

    #[test]
    fn test_validate_catches_hand_built_items() {
        let item = CdmItem {
            id: ItemId::from("x"),
            required: set(&[0, 1]),
            model: CdmItemModel::Gdina {
                probabilities: vec![0.2, 0.8],
            },
        };
        assert!(item.validate().is_err());
    }
}
