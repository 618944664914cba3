//! Next-item selection
//!
//! Maximum Fisher information among unused items, restricted to the most
//! under-represented content area when balancing is on, then passed through
//! the exposure throttle in information order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cat::exposure::ExposureControl;
use crate::config::CatConfig;
use crate::item_bank::{ContentArea, Item, ItemBank, ItemId};

/// Item chosen for administration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub item_id: ItemId,
    pub area: ContentArea,

    /// Fisher information at the θ used for selection
    pub information: f64,

    /// Rank of the item in the information ordering (0 = most informative)
    pub rank: usize,
}

/// Area whose share of the test lags its target the most
///
/// Only areas that still have eligible items compete. Ties go to the first
/// area in name order.
pub fn target_area<'a>(
    targets: &'a BTreeMap<ContentArea, f64>,
    counts: &BTreeMap<ContentArea, usize>,
    administered: usize,
    available: &HashSet<&ContentArea>,
) -> Option<&'a ContentArea> {
    let mut best: Option<(&'a ContentArea, f64)> = None;
    for (area, &target) in targets {
        if target <= 0.0 || !available.contains(area) {
            continue;
        }
        let current = if administered == 0 {
            0.0
        } else {
            counts.get(area).copied().unwrap_or(0) as f64 / administered as f64
        };
        let deficit = target - current;
        if best.map_or(true, |(_, best_deficit)| deficit > best_deficit) {
            best = Some((area, deficit));
        }
    }
    best.map(|(area, _)| area)
}

/// Select the next item, or `None` when the bank is exhausted
pub fn select_next<R: Rng>(
    bank: &ItemBank,
    theta: f64,
    administered: &HashSet<&ItemId>,
    area_counts: &BTreeMap<ContentArea, usize>,
    config: &CatConfig,
    exposure: &ExposureControl,
    rng: &mut R,
) -> Option<Selection> {
    let eligible: Vec<&Item> = bank
        .iter()
        .filter(|item| !administered.contains(&item.id))
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let mut candidates = eligible.clone();
    if config.content_balancing && !administered.is_empty() {
        let available: HashSet<&ContentArea> = eligible.iter().map(|item| &item.area).collect();
        if let Some(area) = target_area(&config.area_targets, area_counts, administered.len(), &available) {
            debug!("Content balancing targets area {}", area);
            candidates.retain(|item| &item.area == area);
        }
    }

    let mut ranked: Vec<(&Item, f64)> = candidates
        .into_iter()
        .map(|item| (item, item.irt.information(theta)))
        .collect();
    // Stable sort keeps bank order among equally informative items
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    for (rank, &(item, information)) in ranked.iter().enumerate() {
        exposure.record_selection(&item.id);
        let admit = exposure.admission_probability(&item.id);
        if admit >= 1.0 || rng.gen::<f64>() < admit {
            return Some(Selection {
                item_id: item.id.clone(),
                area: item.area.clone(),
                information,
                rank,
            });
        }
    }

    // Every candidate was throttled; fall back to the most informative one
    let (item, information) = ranked[0];
    warn!("Exposure throttle rejected all {} candidates, administering {}", ranked.len(), item.id);
    Some(Selection {
        item_id: item.id.clone(),
        area: item.area.clone(),
        information,
        rank: 0,
    })
}
