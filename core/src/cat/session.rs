//! Adaptive test session
//!
//! One `CatSession` is owned by one session controller. The session moves
//! `NotStarted → Administering → Terminated`; every derived quantity (θ̂,
//! SE, history, area counts) is recomputed from the recorded response
//! pattern, so an abandoned session can be rebuilt with [`CatSession::replay`].
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cat::exposure::ExposureControl;
use crate::cat::selector::{select_next, Selection};
use crate::config::{CatConfig, ConfigRecord};
use crate::error::{EngineError, EngineResult};
use crate::irt::estimator::{AbilityEstimate, IrtScorer};
use crate::item_bank::{ContentArea, ItemBank, ItemId};
use crate::response::{ResponsePattern, ResponseRecord};

/// Lifecycle state of an adaptive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Administering,
    Terminated,
}

/// Why the session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingReason {
    StandardErrorReached,
    MaxItemsReached,
    ItemBankExhausted,
}

/// θ̂ and SE after a given number of responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThetaSnapshot {
    pub item_number: usize,
    pub item_id: ItemId,
    pub theta: f64,
    pub standard_error: f64,
}

/// Map a standard error onto a 0..=100 precision percentage
pub fn precision_percentage(standard_error: f64) -> f64 {
    if !standard_error.is_finite() {
        return 0.0;
    }
    (100.0 - standard_error * 300.0).clamp(0.0, 100.0)
}

/// Adaptive testing session
#[derive(Debug)]
pub struct CatSession {
    id: Uuid,
    seed: u64,
    config: CatConfig,
    scorer: IrtScorer,
    bank: Arc<ItemBank>,
    exposure: Arc<ExposureControl>,
    state: SessionState,
    pattern: ResponsePattern,
    area_counts: BTreeMap<ContentArea, usize>,
    estimate: Option<AbilityEstimate>,
    history: Vec<ThetaSnapshot>,
    pending: Option<Selection>,
    stopping_reason: Option<StoppingReason>,
}

impl CatSession {
    /// Create a session; `seed` keys the exposure throttle draws
    pub fn new(
        config: CatConfig,
        scorer: IrtScorer,
        bank: Arc<ItemBank>,
        exposure: Arc<ExposureControl>,
        seed: u64,
    ) -> EngineResult<Self> {
        config.validate()?;
        if bank.is_empty() {
            return Err(EngineError::InvalidInput("item bank is empty".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            seed,
            config,
            scorer,
            bank,
            exposure,
            state: SessionState::NotStarted,
            pattern: ResponsePattern::new(),
            area_counts: BTreeMap::new(),
            estimate: None,
            history: Vec::new(),
            pending: None,
            stopping_reason: None,
        })
    }

    /// Rebuild a session from its recorded responses
    ///
    /// Exposure counters are left untouched: they were updated when the
    /// items were first administered.
    pub fn replay(
        config: CatConfig,
        scorer: IrtScorer,
        bank: Arc<ItemBank>,
        exposure: Arc<ExposureControl>,
        seed: u64,
        pattern: &ResponsePattern,
    ) -> EngineResult<Self> {
        let mut session = Self::new(config, scorer, bank, exposure, seed)?;
        session.state = SessionState::Administering;

        for record in pattern.records() {
            if session.state == SessionState::Terminated {
                return Err(EngineError::InvalidInput(format!(
                    "response to {} recorded after the session terminated",
                    record.item_id
                )));
            }
            session.apply(record.clone())?;
        }

        debug!("Replayed session {} with {} responses", session.id, pattern.len());
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &CatConfig {
        &self.config
    }

    pub fn pattern(&self) -> &ResponsePattern {
        &self.pattern
    }

    pub fn estimate(&self) -> Option<&AbilityEstimate> {
        self.estimate.as_ref()
    }

    /// Current θ̂, or the configured starting value
    pub fn theta(&self) -> f64 {
        self.estimate
            .as_ref()
            .map_or(self.config.initial_theta, |e| e.theta)
    }

    /// Current SE; infinite before the first response
    pub fn standard_error(&self) -> f64 {
        self.estimate
            .as_ref()
            .map_or(f64::INFINITY, |e| e.standard_error)
    }

    pub fn history(&self) -> &[ThetaSnapshot] {
        &self.history
    }

    pub fn stopping_reason(&self) -> Option<StoppingReason> {
        self.stopping_reason
    }

    pub fn items_administered(&self) -> usize {
        self.pattern.len()
    }

    /// Item currently awaiting a response
    pub fn pending_item(&self) -> Option<&ItemId> {
        self.pending.as_ref().map(|s| &s.item_id)
    }

    /// Items administered per content area
    pub fn area_coverage(&self) -> &BTreeMap<ContentArea, usize> {
        &self.area_counts
    }

    /// Whether every targeted area is within `tolerance` of its share
    pub fn is_content_balanced(&self, tolerance: f64) -> bool {
        let n = self.pattern.len();
        if n == 0 {
            return false;
        }
        self.config.area_targets.iter().all(|(area, &target)| {
            let share = self.area_counts.get(area).copied().unwrap_or(0) as f64 / n as f64;
            (share - target).abs() <= tolerance
        })
    }

    /// Choose the next item, starting the session if necessary
    ///
    /// Returns `None` once the session has terminated. Asking again before
    /// answering returns the same pending item.
    pub fn next_item(&mut self) -> EngineResult<Option<ItemId>> {
        match self.state {
            SessionState::Terminated => return Ok(None),
            SessionState::NotStarted => {
                self.exposure.begin_session();
                self.state = SessionState::Administering;
                debug!("Session {} started", self.id);
            }
            SessionState::Administering => {}
        }

        if let Some(pending) = &self.pending {
            return Ok(Some(pending.item_id.clone()));
        }

        let mut rng = self.selection_rng();
        let administered = self.pattern.item_ids();
        let selection = select_next(
            &self.bank,
            self.theta(),
            &administered,
            &self.area_counts,
            &self.config,
            &self.exposure,
            &mut rng,
        );

        match selection {
            Some(selection) => {
                self.exposure.record_administration(&selection.item_id);
                let item_id = selection.item_id.clone();
                self.pending = Some(selection);
                Ok(Some(item_id))
            }
            None => {
                self.terminate(StoppingReason::ItemBankExhausted);
                Ok(None)
            }
        }
    }

    /// Throttle draws for the next selection
    ///
    /// One ChaCha stream per selection step, keyed by the number of recorded
    /// responses, so a replayed session continues with the same draws.
    fn selection_rng(&self) -> ChaCha20Rng {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(self.pattern.len() as u64);
        rng
    }

    /// Record the answer to the pending item
    ///
    /// Returns the stopping reason when this response ends the session.
    pub fn record_response(&mut self, item_id: &ItemId, correct: bool) -> EngineResult<Option<StoppingReason>> {
        if self.state != SessionState::Administering {
            return Err(EngineError::InvalidInput(format!(
                "session {} is not administering items",
                self.id
            )));
        }
        match &self.pending {
            Some(pending) if &pending.item_id == item_id => {}
            _ => {
                return Err(EngineError::InvalidInput(format!(
                    "item {} was not the item presented",
                    item_id
                )))
            }
        }

        self.pending = None;
        self.apply(ResponseRecord::new(item_id.clone(), correct))?;
        Ok(self.stopping_reason)
    }

    /// Append a response, re-estimate, and evaluate the stopping rule
    fn apply(&mut self, record: ResponseRecord) -> EngineResult<()> {
        let item = self.bank.require(&record.item_id)?;
        let area = item.area.clone();

        self.pattern.push(record.clone())?;
        *self.area_counts.entry(area).or_insert(0) += 1;

        let estimate = self.scorer.estimate(&self.pattern, &self.bank)?;
        self.history.push(ThetaSnapshot {
            item_number: self.pattern.len(),
            item_id: record.item_id,
            theta: estimate.theta,
            standard_error: estimate.standard_error,
        });
        debug!(
            "Session {} item {}: theta = {:.3}, se = {:.3}",
            self.id,
            self.pattern.len(),
            estimate.theta,
            estimate.standard_error
        );
        self.estimate = Some(estimate);

        if let Some(reason) = self.check_stopping_rule() {
            self.terminate(reason);
        }
        Ok(())
    }

    fn check_stopping_rule(&self) -> Option<StoppingReason> {
        let n = self.pattern.len();
        if n >= self.config.min_items && self.standard_error() <= self.config.target_se {
            return Some(StoppingReason::StandardErrorReached);
        }
        if n >= self.config.max_items {
            return Some(StoppingReason::MaxItemsReached);
        }
        if n >= self.bank.len() {
            return Some(StoppingReason::ItemBankExhausted);
        }
        None
    }

    fn terminate(&mut self, reason: StoppingReason) {
        self.state = SessionState::Terminated;
        self.stopping_reason = Some(reason);
        self.pending = None;
        self.pattern.freeze();
        info!(
            "Session {} terminated after {} items ({:?}), theta = {:.3}, se = {:.3}",
            self.id,
            self.pattern.len(),
            reason,
            self.theta(),
            self.standard_error()
        );
    }

    /// Plain-text session summary
    pub fn report(&self) -> String {
        let total = self.pattern.len();
        let correct = self.pattern.correct_count();
        let percent = |count: usize| {
            if total == 0 {
                0.0
            } else {
                100.0 * count as f64 / total as f64
            }
        };

        let mut out = String::new();
        let _ = writeln!(out, "CAT Session Report");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Items Administered: {}", total);
        let _ = writeln!(out, "Correct Answers: {} / {} ({:.0}%)", correct, total, percent(correct));
        let _ = writeln!(out);
        let _ = writeln!(out, "Final Theta: {:.3}", self.theta());
        let _ = writeln!(out, "Standard Error: {:.3}", self.standard_error());
        let _ = writeln!(out, "Precision: {:.1}%", precision_percentage(self.standard_error()));
        let _ = writeln!(out);
        let reason = self
            .stopping_reason
            .map_or_else(|| "n/a".to_string(), |r| format!("{:?}", r));
        let _ = writeln!(out, "Stopping Reason: {}", reason);
        let _ = writeln!(out);
        let _ = writeln!(out, "Area Coverage:");

        let areas: HashSet<&ContentArea> = self
            .config
            .area_targets
            .keys()
            .chain(self.area_counts.keys())
            .collect();
        let mut areas: Vec<_> = areas.into_iter().collect();
        areas.sort();
        for area in areas {
            let count = self.area_counts.get(area).copied().unwrap_or(0);
            let _ = writeln!(out, "- {}: {} ({:.1}%)", area, count, percent(count));
        }

        out.trim_end().to_string()
    }
}
