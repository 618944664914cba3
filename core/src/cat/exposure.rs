//! Sympson-Hetter exposure control
//!
//! Counters are shared by every concurrent session. Each item keeps two
//! atomic counters (times chosen by the information criterion, times
//! actually shown), and a session counter gives the denominator for rates.
//! Once the warm-up period has passed, an item chosen by maximum information
//! is admitted with probability
//!
//! ```text
//! K_i = min(1, r_max / P(S_i)),   P(S_i) = selections_i / sessions
//! ```
//!
//! which bounds the long-run administration rate near `r_max`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::CatConfig;
use crate::item_bank::ItemId;

#[derive(Debug, Default)]
struct ItemCounters {
    selections: AtomicU64,
    administrations: AtomicU64,
}

/// Point-in-time counters for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemExposureStats {
    pub selections: u64,
    pub administrations: u64,

    /// administrations / sessions
    pub exposure_rate: f64,
}

/// Point-in-time view of the shared counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub sessions: u64,
    pub items: BTreeMap<ItemId, ItemExposureStats>,
}

impl ExposureSnapshot {
    /// Highest observed administration rate
    pub fn max_exposure_rate(&self) -> f64 {
        self.items
            .values()
            .map(|s| s.exposure_rate)
            .fold(0.0, f64::max)
    }
}

/// Shared exposure counters
#[derive(Debug)]
pub struct ExposureControl {
    max_rate: f64,
    warm_up_sessions: u64,
    sessions: AtomicU64,
    items: DashMap<ItemId, ItemCounters>,
}

impl ExposureControl {
    pub fn new(max_rate: f64, warm_up_sessions: u64) -> Self {
        Self {
            max_rate,
            warm_up_sessions,
            sessions: AtomicU64::new(0),
            items: DashMap::new(),
        }
    }

    pub fn from_config(config: &CatConfig) -> Self {
        Self::new(config.max_exposure_rate, config.exposure_warm_up_sessions)
    }

    /// Register a newly started session
    pub fn begin_session(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Count an item being chosen by the information criterion
    pub fn record_selection(&self, item_id: &ItemId) {
        self.items
            .entry(item_id.clone())
            .or_default()
            .selections
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count an item being shown to an examinee
    pub fn record_administration(&self, item_id: &ItemId) {
        self.items
            .entry(item_id.clone())
            .or_default()
            .administrations
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Probability `K_i` of showing the item once it has been selected
    pub fn admission_probability(&self, item_id: &ItemId) -> f64 {
        let sessions = self.sessions();
        if sessions <= self.warm_up_sessions {
            return 1.0;
        }

        let selections = self
            .items
            .get(item_id)
            .map(|c| c.selections.load(Ordering::Relaxed))
            .unwrap_or(0);
        if selections == 0 {
            return 1.0;
        }

        let selection_rate = selections as f64 / sessions as f64;
        let k = (self.max_rate / selection_rate).min(1.0);
        trace!("Admission probability for {}: {:.3}", item_id, k);
        k
    }

    /// Observed administration rate
    pub fn exposure_rate(&self, item_id: &ItemId) -> f64 {
        let sessions = self.sessions();
        if sessions == 0 {
            return 0.0;
        }
        self.items
            .get(item_id)
            .map(|c| c.administrations.load(Ordering::Relaxed) as f64 / sessions as f64)
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> ExposureSnapshot {
        let sessions = self.sessions();
        let items = self
            .items
            .iter()
            .map(|entry| {
                let administrations = entry.administrations.load(Ordering::Relaxed);
                let stats = ItemExposureStats {
                    selections: entry.selections.load(Ordering::Relaxed),
                    administrations,
                    exposure_rate: if sessions == 0 {
                        0.0
                    } else {
                        administrations as f64 / sessions as f64
                    },
                };
                (entry.key().clone(), stats)
            })
            .collect();

        ExposureSnapshot { sessions, items }
    }
}
