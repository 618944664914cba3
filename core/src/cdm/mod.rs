//! Cognitive diagnostic modelling
//!
//! Posterior inference over discrete mastery profiles under DINA / G-DINA,
//! entropy-driven adaptive diagnosis, Q-matrix checks, and offline EM
//! calibration.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod attributes;
pub mod cat;
pub mod em;
pub mod model;
pub mod posterior;
pub mod qmatrix;

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{CdmConfig, ConfigRecord};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::{ItemBank, ItemId};
use crate::response::{ResponsePattern, ResponseRecord};

pub use attributes::{AttributeSet, MAX_ATTRIBUTES};
pub use cat::{CdCatCandidate, CdCatSession, CdCatStoppingReason};
pub use em::{CdmModelKind, EmCalibration, EmCalibrator, ModelFit};
pub use model::{CdmItem, CdmItemModel};
pub use posterior::{update_posterior, LatentClassPosterior, PosteriorSummary};
pub use qmatrix::QMatrixDiagnostics;

/// Batch classification request for one examinee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdmRequest {
    pub responses: Vec<ResponseRecord>,
    pub q_matrix: BTreeMap<ItemId, AttributeSet>,
}

/// Attribute profile of one examinee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdmResult {
    /// Marginal mastery probability per attribute
    pub eap: Vec<f64>,

    /// Binary mastery classification per attribute
    pub map: Vec<bool>,

    pub posterior_entropy: f64,

    /// Most probable profile and its posterior probability
    pub latent_class: AttributeSet,
    pub latent_class_probability: f64,

    pub mastered_attributes: Vec<usize>,
    pub unmastered_attributes: Vec<usize>,
}

impl From<&LatentClassPosterior> for CdmResult {
    fn from(posterior: &LatentClassPosterior) -> Self {
        let summary = posterior.summarize();
        let (mastered_attributes, unmastered_attributes) =
            (0..summary.mastery.len()).partition(|&k| summary.mastery[k]);
        CdmResult {
            eap: summary.eap,
            map: summary.mastery,
            posterior_entropy: summary.entropy,
            latent_class: summary.map_class,
            latent_class_probability: summary.map_probability,
            mastered_attributes,
            unmastered_attributes,
        }
    }
}

/// Diagnostic engine over a set of calibrated items
#[derive(Debug, Clone)]
pub struct CdmEngine {
    config: CdmConfig,
    items: HashMap<ItemId, CdmItem>,
}

impl CdmEngine {
    pub fn new(config: CdmConfig, items: impl IntoIterator<Item = CdmItem>) -> EngineResult<Self> {
        config.validate()?;
        let mut map = HashMap::new();
        for item in items {
            item.validate()?;
            if item.required.span() > config.attributes {
                return Err(EngineError::invalid_item(
                    &item.id,
                    format!("Q-matrix row {} exceeds {} attributes", item.required, config.attributes),
                ));
            }
            if map.contains_key(&item.id) {
                return Err(EngineError::InvalidInput(format!("duplicate diagnostic item {}", item.id)));
            }
            map.insert(item.id.clone(), item);
        }
        Ok(Self { config, items: map })
    }

    /// DINA items with default slip/guess for every Q-matrix row in the bank
    pub fn from_bank(config: CdmConfig, bank: &ItemBank) -> EngineResult<Self> {
        let items = bank
            .q_matrix()
            .into_iter()
            .map(|(id, required)| CdmItem::dina(id, required, config.default_slip, config.default_guess))
            .collect::<EngineResult<Vec<_>>>()?;
        Self::new(config, items)
    }

    pub fn config(&self) -> &CdmConfig {
        &self.config
    }

    pub fn item(&self, id: &ItemId) -> Option<&CdmItem> {
        self.items.get(id)
    }

    /// Calibrated items sorted by id
    pub fn items(&self) -> Vec<&CdmItem> {
        let mut items: Vec<_> = self.items.values().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub fn uniform_prior(&self) -> EngineResult<LatentClassPosterior> {
        LatentClassPosterior::uniform(self.config.attributes)
    }

    /// Bayes update of `prior` with one response to a known item
    pub fn update_posterior(
        &self,
        prior: &LatentClassPosterior,
        item_id: &ItemId,
        correct: bool,
    ) -> EngineResult<LatentClassPosterior> {
        let item = self
            .items
            .get(item_id)
            .ok_or_else(|| EngineError::UnknownItem(item_id.clone()))?;
        prior.update(item, correct)
    }

    /// Posterior after a whole response pattern, starting from uniform
    pub fn posterior_for(&self, pattern: &ResponsePattern) -> EngineResult<LatentClassPosterior> {
        let mut posterior = self.uniform_prior()?;
        for record in pattern.records() {
            posterior = self.update_posterior(&posterior, &record.item_id, record.correct)?;
        }
        Ok(posterior)
    }

    /// Classify one examinee from a request carrying its own Q-matrix
    ///
    /// Calibrated parameters are used when the engine knows the item under
    /// the same Q-matrix row; otherwise the item is scored as DINA with the
    /// default slip and guess.
    pub fn classify(&self, request: &CdmRequest) -> EngineResult<CdmResult> {
        if request.responses.is_empty() {
            return Err(EngineError::InvalidInput("empty response set".to_string()));
        }
        let pattern = ResponsePattern::from_records(request.responses.iter().cloned())?;

        let mut posterior = self.uniform_prior()?;
        for record in pattern.records() {
            let required = *request
                .q_matrix
                .get(&record.item_id)
                .ok_or_else(|| EngineError::UnknownItem(record.item_id.clone()))?;

            let calibrated = self.items.get(&record.item_id).filter(|item| item.required == required);
            let item = match calibrated {
                Some(item) => item.clone(),
                None => CdmItem::dina(
                    record.item_id.clone(),
                    required,
                    self.config.default_slip,
                    self.config.default_guess,
                )?,
            };
            posterior.observe(&item, record.correct)?;
        }

        debug!(
            "Classified {} responses, entropy = {:.4} bits",
            pattern.len(),
            posterior.entropy()
        );
        Ok(CdmResult::from(&posterior))
    }

    /// Identifiability diagnostics of the engine's Q-matrix
    pub fn diagnose_q_matrix(&self) -> QMatrixDiagnostics {
        qmatrix::diagnose(self.items.values().map(|item| &item.required), self.config.attributes)
    }

    /// Start a CD-CAT session over the engine's items
    pub fn start_adaptive(&self) -> EngineResult<CdCatSession> {
        let items = self.items().into_iter().cloned().collect();
        CdCatSession::new(self.config.clone(), items)
    }

    /// Run EM calibration with this engine's configuration
    pub fn calibrate(
        &self,
        responses: &[Vec<bool>],
        q_matrix: &[(ItemId, AttributeSet)],
        kind: CdmModelKind,
    ) -> EngineResult<EmCalibration> {
        EmCalibrator::new(&self.config)?.calibrate(responses, q_matrix, kind)
    }

    /// Replace the engine's items with a calibration result
    pub fn with_calibration(&self, calibration: EmCalibration) -> EngineResult<Self> {
        Self::new(self.config.clone(), calibration.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set(indices: &[usize]) -> AttributeSet {
        AttributeSet::from_indices(indices.iter().copied()).unwrap()
    }

    fn engine() -> CdmEngine {
        let items = vec![
            CdmItem::dina("a", set(&[0]), 0.1, 0.2).unwrap(),
            CdmItem::dina("b", set(&[1]), 0.1, 0.2).unwrap(),
            CdmItem::dina("c", set(&[0, 1]), 0.1, 0.2).unwrap(),
        ];
        let config = CdmConfig {
            attributes: 2,
            ..CdmConfig::default()
        };
        CdmEngine::new(config, items).unwrap()
    }

    #[test]
    fn test_classify_uses_request_q_matrix() {
        let engine = engine();
        let request = CdmRequest {
            responses: vec![
                ResponseRecord::new("a", true),
                ResponseRecord::new("b", false),
                ResponseRecord::new("x", true),
            ],
            q_matrix: [("a", set(&[0])), ("b", set(&[1])), ("x", set(&[0]))]
                .into_iter()
                .map(|(id, q)| (ItemId::from(id), q))
                .collect(),
        };

        let result = engine.classify(&request).unwrap();
        assert_eq!(result.map, vec![true, false]);
        assert_eq!(result.mastered_attributes, vec![0]);
        assert_eq!(result.unmastered_attributes, vec![1]);
        assert_eq!(result.latent_class, set(&[0]));
        assert_relative_eq!(result.eap.len() as f64, 2.0);
    }

    #[test]
    fn test_classify_rejects_missing_q_row() {
        let engine = engine();
        let request = CdmRequest {
            responses: vec![ResponseRecord::new("a", true)],
            q_matrix: BTreeMap::new(),
        };
        assert!(matches!(engine.classify(&request), Err(EngineError::UnknownItem(_))));
    }

    #[test]
    fn test_rejects_rows_beyond_attribute_count() {
        let config = CdmConfig {
            attributes: 2,
            ..CdmConfig::default()
        };
        let items = vec![CdmItem::dina("z", set(&[3]), 0.1, 0.2).unwrap()];
        assert!(CdmEngine::new(config, items).is_err());
    }

    #[test]
    fn test_rejects_malformed_gdina_table() {
        let config = CdmConfig {
            attributes: 2,
            ..CdmConfig::default()
        };
        let short = CdmItem {
            id: ItemId::from("g"),
            required: set(&[0, 1]),
            model: CdmItemModel::Gdina {
                probabilities: vec![0.2, 0.8],
            },
        };
        assert!(matches!(
            CdmEngine::new(config, vec![short.clone()]),
            Err(EngineError::DimensionMismatch { expected: 4, found: 2 })
        ));
        let prior = LatentClassPosterior::uniform(2).unwrap();
        assert!(prior.update(&short, true).is_err());
    }

    #[test]
    fn test_posterior_for_pattern_matches_stepwise_updates() {
        let engine = engine();
        let pattern = ResponsePattern::from_records(vec![
            ResponseRecord::new("a", true),
            ResponseRecord::new("c", false),
        ])
        .unwrap();

        let batch = engine.posterior_for(&pattern).unwrap();
        let prior = engine.uniform_prior().unwrap();
        let step = engine.update_posterior(&prior, &ItemId::from("a"), true).unwrap();
        let step = engine.update_posterior(&step, &ItemId::from("c"), false).unwrap();
        assert_eq!(batch, step);
        assert!(engine.diagnose_q_matrix().is_complete);
    }
}
