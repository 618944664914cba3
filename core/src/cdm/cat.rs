//! Cognitive-diagnostic adaptive testing
//!
//! Items are chosen to maximize the expected reduction in posterior entropy:
//!
//! ```text
//! ΔH_j = H(π) - [P(X_j=1)·H(π | X_j=1) + P(X_j=0)·H(π | X_j=0)]
//! ```
//!
//! The session stops once the entropy falls below the configured threshold
//! or the item budget is spent.

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cdm::attributes::AttributeSet;
use crate::cdm::model::CdmItem;
use crate::cdm::posterior::{entropy, LatentClassPosterior, PosteriorSummary};
use crate::config::{CdmConfig, ConfigRecord};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ItemId;

/// Candidate chosen by the entropy criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdCatCandidate {
    pub item_id: ItemId,
    pub expected_entropy_reduction: f64,
    pub target_attributes: AttributeSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdCatStoppingReason {
    EntropyThreshold,
    MaxItems,
    ItemsExhausted,
}

/// Entropy before and after one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyStep {
    pub item_id: ItemId,
    pub correct: bool,
    pub entropy_before: f64,
    pub entropy_after: f64,
}

/// Expected entropy reduction from administering `item`
pub fn expected_entropy_reduction(posterior: &LatentClassPosterior, item: &CdmItem) -> f64 {
    let current = posterior.entropy();

    let mut given_correct = Vec::with_capacity(posterior.probabilities().len());
    let mut given_incorrect = Vec::with_capacity(posterior.probabilities().len());
    for (class, p) in posterior.classes() {
        let p_correct = item.probability(class);
        given_correct.push(p * p_correct);
        given_incorrect.push(p * (1.0 - p_correct));
    }

    let p1: f64 = given_correct.iter().sum();
    let p0: f64 = given_incorrect.iter().sum();
    let conditional = |weights: &mut Vec<f64>, total: f64| {
        if total <= 0.0 {
            return 0.0;
        }
        weights.iter_mut().for_each(|w| *w /= total);
        entropy(weights)
    };

    let expected = p1 * conditional(&mut given_correct, p1) + p0 * conditional(&mut given_incorrect, p0);
    current - expected
}

/// Pick the unadministered item with the largest expected entropy reduction
///
/// Ties keep the earliest item in iteration order.
pub fn select_next_item<'a>(
    posterior: &LatentClassPosterior,
    items: impl IntoIterator<Item = &'a CdmItem>,
    administered: &HashSet<ItemId>,
) -> Option<CdCatCandidate> {
    let mut best: Option<CdCatCandidate> = None;
    for item in items {
        if administered.contains(&item.id) || item.required.span() > posterior.attributes() {
            continue;
        }
        let reduction = expected_entropy_reduction(posterior, item);
        if best
            .as_ref()
            .map_or(true, |b| reduction > b.expected_entropy_reduction)
        {
            best = Some(CdCatCandidate {
                item_id: item.id.clone(),
                expected_entropy_reduction: reduction,
                target_attributes: item.required,
            });
        }
    }
    best
}

/// Adaptive diagnostic session over a fixed pool of calibrated items
#[derive(Debug, Clone)]
pub struct CdCatSession {
    config: CdmConfig,
    items: Vec<CdmItem>,
    posterior: LatentClassPosterior,
    administered: HashSet<ItemId>,
    history: Vec<EntropyStep>,
    stopping_reason: Option<CdCatStoppingReason>,
}

impl CdCatSession {
    pub fn new(config: CdmConfig, items: Vec<CdmItem>) -> EngineResult<Self> {
        config.validate()?;
        let posterior = LatentClassPosterior::uniform(config.attributes)?;
        Ok(Self {
            config,
            items,
            posterior,
            administered: HashSet::new(),
            history: Vec::new(),
            stopping_reason: None,
        })
    }

    pub fn posterior(&self) -> &LatentClassPosterior {
        &self.posterior
    }

    pub fn history(&self) -> &[EntropyStep] {
        &self.history
    }

    pub fn stopping_reason(&self) -> Option<CdCatStoppingReason> {
        self.stopping_reason
    }

    pub fn is_complete(&self) -> bool {
        self.stopping_reason.is_some()
    }

    pub fn summary(&self) -> PosteriorSummary {
        self.posterior.summarize()
    }

    /// Next item to administer, or `None` once the session is complete
    pub fn next_item(&mut self) -> Option<CdCatCandidate> {
        if self.is_complete() {
            return None;
        }
        let candidate = select_next_item(&self.posterior, &self.items, &self.administered);
        if candidate.is_none() {
            self.stop(CdCatStoppingReason::ItemsExhausted);
        }
        candidate
    }

    /// Apply a response and evaluate the stopping rule
    pub fn record_response(&mut self, item_id: &ItemId, correct: bool) -> EngineResult<Option<CdCatStoppingReason>> {
        if self.is_complete() {
            return Err(EngineError::InvalidInput("diagnostic session already complete".to_string()));
        }
        if self.administered.contains(item_id) {
            return Err(EngineError::InvalidInput(format!("item {} already administered", item_id)));
        }
        let item = self
            .items
            .iter()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| EngineError::UnknownItem(item_id.clone()))?;

        let entropy_before = self.posterior.entropy();
        self.posterior.observe(item, correct)?;
        let entropy_after = self.posterior.entropy();
        debug!("CD-CAT {}: entropy {:.4} -> {:.4}", item_id, entropy_before, entropy_after);

        self.administered.insert(item_id.clone());
        self.history.push(EntropyStep {
            item_id: item_id.clone(),
            correct,
            entropy_before,
            entropy_after,
        });

        if entropy_after < self.config.entropy_threshold {
            self.stop(CdCatStoppingReason::EntropyThreshold);
        } else if self.administered.len() >= self.config.max_items {
            self.stop(CdCatStoppingReason::MaxItems);
        } else if self.administered.len() >= self.items.len() {
            self.stop(CdCatStoppingReason::ItemsExhausted);
        }
        Ok(self.stopping_reason)
    }

    fn stop(&mut self, reason: CdCatStoppingReason) {
        self.stopping_reason = Some(reason);
        info!(
            "CD-CAT stopped after {} items ({:?}), entropy = {:.4} bits",
            self.administered.len(),
            reason,
            self.posterior.entropy()
        );
    }
}
