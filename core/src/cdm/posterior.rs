//! Posterior over latent mastery classes
//!
//! A distribution over all `2^K` profiles, kept normalized after every
//! Bayesian update. Class `c` is the profile whose bit `k` is `α_k`.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::cdm::attributes::{class_count, AttributeSet};
use crate::cdm::model::CdmItem;
use crate::error::{EngineError, EngineResult};

/// Summary statistics of a posterior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    /// Marginal mastery probability per attribute
    pub eap: Vec<f64>,

    /// `eap[k] ≥ 0.5`
    pub mastery: Vec<bool>,

    /// Shannon entropy in bits
    pub entropy: f64,

    /// Single most probable profile
    pub map_class: AttributeSet,
    pub map_probability: f64,
}

/// Normalized distribution over latent classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosterior")]
pub struct LatentClassPosterior {
    attributes: usize,
    probabilities: Vec<f64>,
}

#[derive(Deserialize)]
struct RawPosterior {
    attributes: usize,
    probabilities: Vec<f64>,
}

impl TryFrom<RawPosterior> for LatentClassPosterior {
    type Error = EngineError;

    fn try_from(raw: RawPosterior) -> Result<Self, Self::Error> {
        LatentClassPosterior::from_weights(raw.attributes, raw.probabilities)
    }
}

impl LatentClassPosterior {
    /// Uniform prior over `2^K` classes
    pub fn uniform(attributes: usize) -> EngineResult<Self> {
        let classes = class_count(attributes)?;
        Ok(Self {
            attributes,
            probabilities: vec![1.0 / classes as f64; classes],
        })
    }

    /// Build from unnormalized non-negative weights
    pub fn from_weights(attributes: usize, weights: Vec<f64>) -> EngineResult<Self> {
        let classes = class_count(attributes)?;
        if weights.len() != classes {
            return Err(EngineError::DimensionMismatch {
                expected: classes,
                found: weights.len(),
            });
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::InvalidInput(
                "class weights must be finite and non-negative".to_string(),
            ));
        }
        let mut posterior = Self {
            attributes,
            probabilities: weights,
        };
        posterior.normalize()?;
        Ok(posterior)
    }

    pub fn attributes(&self) -> usize {
        self.attributes
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn classes(&self) -> impl Iterator<Item = (AttributeSet, f64)> + '_ {
        self.probabilities
            .iter()
            .enumerate()
            .map(|(c, &p)| (AttributeSet::from_bits(c as u32), p))
    }

    fn normalize(&mut self) -> EngineResult<()> {
        let total: f64 = self.probabilities.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(EngineError::NumericalNonConvergence {
                iterations: 0,
                last_delta: total,
            });
        }
        for p in &mut self.probabilities {
            *p /= total;
        }
        Ok(())
    }

    /// Bayes update with one scored response, returning the new posterior
    pub fn update(&self, item: &CdmItem, correct: bool) -> EngineResult<Self> {
        let mut next = self.clone();
        next.observe(item, correct)?;
        Ok(next)
    }

    /// In-place Bayes update
    pub fn observe(&mut self, item: &CdmItem, correct: bool) -> EngineResult<()> {
        item.validate()?;
        if item.required.span() > self.attributes {
            return Err(EngineError::DimensionMismatch {
                expected: self.attributes,
                found: item.required.span(),
            });
        }
        for (c, p) in self.probabilities.iter_mut().enumerate() {
            *p *= item.response_probability(AttributeSet::from_bits(c as u32), correct);
        }
        self.normalize()?;
        trace!("Posterior after {}: entropy = {:.4} bits", item.id, self.entropy());
        Ok(())
    }

    /// `-Σ p log2 p`
    pub fn entropy(&self) -> f64 {
        entropy(&self.probabilities)
    }

    /// Marginal mastery probability per attribute
    pub fn eap(&self) -> Vec<f64> {
        let mut eap = vec![0.0; self.attributes];
        for (class, p) in self.classes() {
            for k in class.iter() {
                eap[k] += p;
            }
        }
        eap
    }

    /// Most probable class; ties go to the lowest class index
    pub fn map_class(&self) -> (AttributeSet, f64) {
        self.classes()
            .fold((AttributeSet::EMPTY, f64::NEG_INFINITY), |best, (class, p)| {
                if p > best.1 {
                    (class, p)
                } else {
                    best
                }
            })
    }

    pub fn summarize(&self) -> PosteriorSummary {
        let eap = self.eap();
        let mastery = eap.iter().map(|&p| p >= 0.5).collect();
        let (map_class, map_probability) = self.map_class();
        PosteriorSummary {
            eap,
            mastery,
            entropy: self.entropy(),
            map_class,
            map_probability,
        }
    }
}

/// Shannon entropy in bits of a probability vector
pub fn entropy(probabilities: &[f64]) -> f64 {
    -probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.log2())
        .sum::<f64>()
}

/// Functional form of [`LatentClassPosterior::update`]
pub fn update_posterior(prior: &LatentClassPosterior, item: &CdmItem, correct: bool) -> EngineResult<LatentClassPosterior> {
    prior.update(item, correct)
}
