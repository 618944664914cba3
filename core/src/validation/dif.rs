//! Differential item functioning screen
//!
//! Flags items whose odds of success differ between a reference and a focal
//! group of examinees matched on total score. The Mantel-Haenszel common
//! odds ratio drives the ETS A/B/C classification; when the bank holds the
//! item, Lord's chi-square on group-adjusted parameters is reported too.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::config::{ConfigRecord, DifConfig};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::{ItemBank, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifGroup {
    Reference,
    Focal,
}

/// One scored response with its examinee's matching variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifResponse {
    pub item_id: ItemId,
    pub correct: bool,
    pub total_score: f64,
    pub group: DifGroup,
}

/// 2×2 table of one score stratum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumTable {
    pub stratum: usize,
    pub focal_correct: u32,
    pub focal_incorrect: u32,
    pub reference_correct: u32,
    pub reference_incorrect: u32,
}

impl StratumTable {
    pub fn total(&self) -> u32 {
        self.focal_correct + self.focal_incorrect + self.reference_correct + self.reference_incorrect
    }

    fn add(&mut self, group: DifGroup, correct: bool) {
        match (group, correct) {
            (DifGroup::Focal, true) => self.focal_correct += 1,
            (DifGroup::Focal, false) => self.focal_incorrect += 1,
            (DifGroup::Reference, true) => self.reference_correct += 1,
            (DifGroup::Reference, false) => self.reference_incorrect += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MantelHaenszel {
    /// Common odds ratio, focal over reference
    pub common_odds_ratio: f64,

    /// ETS delta, `-2.35 · ln α`; positive when the focal group is disadvantaged
    pub delta: f64,

    /// Continuity-corrected statistic with one degree of freedom
    pub chi_square: f64,
    pub p_value: f64,
    pub tables: Vec<StratumTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LordChiSquare {
    pub focal_difficulty: f64,
    pub reference_difficulty: f64,

    /// Focal minus reference
    pub difficulty_difference: f64,
    pub discrimination_difference: f64,
    pub chi_square: f64,
    pub degrees_of_freedom: u32,
    pub p_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EtsCategory {
    /// Negligible
    A,
    /// Moderate
    B,
    /// Large; the item goes to content review
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifDirection {
    FavorsReference,
    FavorsFocal,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDif {
    pub item_id: ItemId,
    pub mantel_haenszel: MantelHaenszel,
    pub lord: Option<LordChiSquare>,
    pub category: EtsCategory,
    pub direction: DifDirection,
    pub flagged: bool,
    pub focal_count: usize,
    pub reference_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fairness {
    Fair,
    ModerateConcern,
    SeriousConcern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifSummary {
    pub items_analyzed: usize,
    pub category_counts: BTreeMap<EtsCategory, usize>,

    /// Share of analyzed items in category B or C
    pub dif_rate: f64,
    pub mean_abs_delta: f64,
    pub responses: usize,
    pub fairness: Fairness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifReport {
    /// Analyzed items, largest |Δ_MH| first
    pub items: Vec<ItemDif>,

    /// Items with too few responses in either group
    pub skipped: Vec<ItemId>,
    pub summary: DifSummary,
}

impl DifReport {
    pub fn flagged(&self) -> impl Iterator<Item = &ItemDif> {
        self.items.iter().filter(|item| item.flagged)
    }
}

/// Upper-tail probability of a chi-square statistic
pub fn chi_square_p_value(statistic: f64, degrees_of_freedom: u32) -> f64 {
    if !(statistic > 0.0) {
        return 1.0;
    }
    match ChiSquared::new(degrees_of_freedom as f64) {
        Ok(distribution) => distribution.sf(statistic),
        Err(_) => 1.0,
    }
}

/// Equal-width total-score strata over the observed range
pub fn stratify(scores: &[f64], strata: usize) -> Vec<usize> {
    let (min, max) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    let range = max - min;
    if !(range > 0.0) || strata <= 1 {
        return vec![0; scores.len()];
    }
    let width = range / strata as f64;
    scores
        .iter()
        .map(|s| (((s - min) / width).floor() as usize).min(strata - 1))
        .collect()
}

/// Mantel-Haenszel statistic over pre-built stratum tables
pub fn mantel_haenszel(tables: Vec<StratumTable>) -> MantelHaenszel {
    let mut tables = tables;
    tables.retain(|table| table.total() > 0);

    let (mut sum_ad, mut sum_bc) = (0.0, 0.0);
    let (mut deviation, mut variance) = (0.0, 0.0);
    for table in &tables {
        let a = table.focal_correct as f64;
        let b = table.focal_incorrect as f64;
        let c = table.reference_correct as f64;
        let d = table.reference_incorrect as f64;
        let t = table.total() as f64;

        sum_ad += a * d / t;
        sum_bc += b * c / t;

        let (focal, reference) = (a + b, c + d);
        let (right, wrong) = (a + c, b + d);
        deviation += a - focal * right / t;
        let correction = if t > 1.0 { t - 1.0 } else { 1.0 };
        variance += focal * reference * right * wrong / (t * t * correction);
    }

    let common_odds_ratio = if sum_bc > 0.0 { sum_ad / sum_bc } else { 1.0 };
    let delta = -2.35 * common_odds_ratio.max(0.001).ln();
    let corrected = (deviation.abs() - 0.5).max(0.0);
    let chi_square = if variance > 0.0 {
        corrected * corrected / variance
    } else {
        0.0
    };

    MantelHaenszel {
        common_odds_ratio,
        delta,
        chi_square,
        p_value: chi_square_p_value(chi_square, 1),
        tables,
    }
}

#[derive(Debug, Clone, Default)]
pub struct DifAnalyzer {
    config: DifConfig,
}

impl DifAnalyzer {
    pub fn new(config: DifConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DifConfig {
        &self.config
    }

    /// ETS category from the MH delta and its significance
    pub fn classify(&self, delta: f64, p_value: f64) -> EtsCategory {
        let significant = p_value < self.config.significance_level;
        let magnitude = delta.abs();
        if significant && magnitude >= self.config.large_delta {
            EtsCategory::C
        } else if significant && magnitude >= self.config.moderate_delta {
            EtsCategory::B
        } else {
            EtsCategory::A
        }
    }

    pub fn direction(&self, delta: f64) -> DifDirection {
        if delta > self.config.direction_threshold {
            DifDirection::FavorsReference
        } else if delta < -self.config.direction_threshold {
            DifDirection::FavorsFocal
        } else {
            DifDirection::None
        }
    }

    /// Lord's chi-square on two sets of group parameters
    pub fn lord(&self, focal: (f64, f64), reference: (f64, f64)) -> LordChiSquare {
        let (focal_discrimination, focal_difficulty) = focal;
        let (reference_discrimination, reference_difficulty) = reference;
        let difficulty_difference = focal_difficulty - reference_difficulty;
        let discrimination_difference = focal_discrimination - reference_discrimination;

        let chi_square = (difficulty_difference / self.config.lord_difficulty_se).powi(2)
            + (discrimination_difference / self.config.lord_discrimination_se).powi(2);
        LordChiSquare {
            focal_difficulty,
            reference_difficulty,
            difficulty_difference,
            discrimination_difference,
            chi_square,
            degrees_of_freedom: 2,
            p_value: chi_square_p_value(chi_square, 2),
        }
    }

    /// Screen every item that has enough responses in both groups
    ///
    /// `bank` is optional; items it holds also get Lord's statistic.
    pub fn analyze(&self, responses: &[DifResponse], bank: Option<&ItemBank>) -> EngineResult<DifReport> {
        if let Some(bad) = responses.iter().find(|r| !r.total_score.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "total score for item {} is not finite",
                bad.item_id
            )));
        }

        let mut by_item: BTreeMap<&ItemId, Vec<&DifResponse>> = BTreeMap::new();
        for response in responses {
            by_item.entry(&response.item_id).or_default().push(response);
        }

        let mut items = Vec::new();
        let mut skipped = Vec::new();
        for (item_id, rows) in by_item {
            let focal_count = rows.iter().filter(|r| r.group == DifGroup::Focal).count();
            let reference_count = rows.len() - focal_count;
            if focal_count < self.config.min_group_size || reference_count < self.config.min_group_size {
                debug!(
                    "Skipping DIF for {}: {} focal, {} reference responses",
                    item_id, focal_count, reference_count
                );
                skipped.push(item_id.clone());
                continue;
            }

            let scores: Vec<f64> = rows.iter().map(|r| r.total_score).collect();
            let strata = stratify(&scores, self.config.strata);
            let mut tables: Vec<StratumTable> = (0..self.config.strata)
                .map(|stratum| StratumTable {
                    stratum,
                    ..StratumTable::default()
                })
                .collect();
            for (row, stratum) in rows.iter().zip(strata) {
                tables[stratum].add(row.group, row.correct);
            }
            let mantel_haenszel = mantel_haenszel(tables);

            // Groups share the bank discrimination; difficulty moves with each group's logit
            let lord = bank.and_then(|bank| bank.get(item_id)).map(|item| {
                let (a, b) = (item.irt.discrimination(), item.irt.difficulty());
                let group_difficulty = |group: DifGroup, count: usize| {
                    let right = rows.iter().filter(|r| r.group == group && r.correct).count();
                    let p = (right as f64 / count as f64).max(0.01);
                    b - (p / (1.0 - p).max(0.01)).ln()
                };
                self.lord(
                    (a, group_difficulty(DifGroup::Focal, focal_count)),
                    (a, group_difficulty(DifGroup::Reference, reference_count)),
                )
            });

            let category = self.classify(mantel_haenszel.delta, mantel_haenszel.p_value);
            items.push(ItemDif {
                item_id: item_id.clone(),
                direction: self.direction(mantel_haenszel.delta),
                flagged: category == EtsCategory::C,
                category,
                mantel_haenszel,
                lord,
                focal_count,
                reference_count,
            });
        }

        items.sort_by(|a, b| {
            b.mantel_haenszel
                .delta
                .abs()
                .total_cmp(&a.mantel_haenszel.delta.abs())
        });
        let summary = summarize(&items, responses.len());
        info!(
            "DIF screen: {} items analyzed, {} skipped, {} flagged, fairness {:?}",
            summary.items_analyzed,
            skipped.len(),
            summary.category_counts[&EtsCategory::C],
            summary.fairness
        );

        Ok(DifReport { items, skipped, summary })
    }
}

fn summarize(items: &[ItemDif], responses: usize) -> DifSummary {
    let mut category_counts: BTreeMap<EtsCategory, usize> =
        [EtsCategory::A, EtsCategory::B, EtsCategory::C].into_iter().map(|c| (c, 0)).collect();
    for item in items {
        *category_counts.entry(item.category).or_default() += 1;
    }

    let n = items.len();
    let large = category_counts[&EtsCategory::C];
    let (dif_rate, mean_abs_delta) = if n > 0 {
        (
            (category_counts[&EtsCategory::B] + large) as f64 / n as f64,
            items.iter().map(|i| i.mantel_haenszel.delta.abs()).sum::<f64>() / n as f64,
        )
    } else {
        (0.0, 0.0)
    };

    let fairness = if dif_rate > 0.2 || large > 3 {
        Fairness::SeriousConcern
    } else if dif_rate > 0.1 || large > 0 {
        Fairness::ModerateConcern
    } else {
        Fairness::Fair
    };

    DifSummary {
        items_analyzed: n,
        category_counts,
        dif_rate,
        mean_abs_delta,
        responses,
        fairness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irt::IrtParameters;
    use crate::item_bank::Item;
    use approx::assert_relative_eq;

    /// Ten examinees per group in each of five score levels, with the given
    /// number answering the item correctly
    fn responses(item: &str, focal_correct: usize, reference_correct: usize) -> Vec<DifResponse> {
        let mut rows = Vec::new();
        for score in [2.0, 4.0, 6.0, 8.0, 10.0] {
            for (group, correct) in [(DifGroup::Focal, focal_correct), (DifGroup::Reference, reference_correct)] {
                for k in 0..10 {
                    rows.push(DifResponse {
                        item_id: ItemId::from(item),
                        correct: k < correct,
                        total_score: score,
                        group,
                    });
                }
            }
        }
        rows
    }

    #[test]
    fn test_single_table_statistics() {
        let table = StratumTable {
            stratum: 0,
            focal_correct: 2,
            focal_incorrect: 8,
            reference_correct: 8,
            reference_incorrect: 2,
        };
        let mh = mantel_haenszel(vec![table]);
        assert_relative_eq!(mh.common_odds_ratio, 0.0625, epsilon = 1e-12);
        assert_relative_eq!(mh.delta, -2.35 * 0.0625f64.ln(), epsilon = 1e-12);

        // (|2 - 5| - 0.5)² / (10·10·10·10 / (400·19))
        assert_relative_eq!(mh.chi_square, 6.25 / (10_000.0 / 7_600.0), epsilon = 1e-9);
        assert!(mh.p_value < 0.05);
    }

    #[test]
    fn test_empty_strata_are_dropped() {
        let mh = mantel_haenszel(vec![StratumTable::default(); 3]);
        assert!(mh.tables.is_empty());
        assert_eq!(mh.common_odds_ratio, 1.0);
        assert_eq!(mh.chi_square, 0.0);
        assert_eq!(mh.p_value, 1.0);
    }

    #[test]
    fn test_stratify_uses_equal_widths() {
        assert_eq!(stratify(&[0.0, 1.9, 2.0, 9.9, 10.0], 5), vec![0, 0, 1, 4, 4]);
        assert_eq!(stratify(&[3.0, 3.0, 3.0], 5), vec![0, 0, 0]);
    }

    #[test]
    fn test_biased_item_is_flagged_against_the_focal_group() {
        let mut rows = responses("biased", 2, 8);
        rows.extend(responses("fair", 5, 5));
        let report = DifAnalyzer::default().analyze(&rows, None).unwrap();

        assert_eq!(report.items.len(), 2);
        let biased = &report.items[0];
        assert_eq!(biased.item_id, ItemId::from("biased"));
        assert_eq!(biased.category, EtsCategory::C);
        assert_eq!(biased.direction, DifDirection::FavorsReference);
        assert!(biased.flagged);
        assert_eq!((biased.focal_count, biased.reference_count), (50, 50));

        let fair = &report.items[1];
        assert_eq!(fair.category, EtsCategory::A);
        assert_eq!(fair.direction, DifDirection::None);
        assert_relative_eq!(fair.mantel_haenszel.delta, 0.0, epsilon = 1e-12);

        assert_eq!(report.flagged().count(), 1);
        assert_relative_eq!(report.summary.dif_rate, 0.5);
        assert_eq!(report.summary.fairness, Fairness::SeriousConcern);
        assert_eq!(report.summary.responses, 200);
    }

    #[test]
    fn test_items_below_group_minimum_are_skipped() {
        let rows: Vec<DifResponse> = responses("thin", 5, 5)
            .into_iter()
            .filter(|r| r.group == DifGroup::Reference || (r.total_score < 3.0 && r.correct))
            .collect();
        let report = DifAnalyzer::default().analyze(&rows, None).unwrap();
        assert!(report.items.is_empty());
        assert_eq!(report.skipped, vec![ItemId::from("thin")]);
        assert_eq!(report.summary.fairness, Fairness::Fair);
    }

    #[test]
    fn test_lord_statistic_uses_bank_parameters() {
        let bank = ItemBank::new([Item::new("biased", IrtParameters::new(1.0, 0.0, 0.2).unwrap(), "cirurgia")]).unwrap();
        let report = DifAnalyzer::default()
            .analyze(&responses("biased", 2, 8), Some(&bank))
            .unwrap();
        let lord = report.items[0].lord.as_ref().unwrap();

        assert_relative_eq!(lord.focal_difficulty, 4.0f64.ln(), epsilon = 1e-9);
        assert_relative_eq!(lord.reference_difficulty, -(4.0f64.ln()), epsilon = 1e-9);
        assert_relative_eq!(lord.chi_square, (2.0 * 4.0f64.ln() / 0.3).powi(2), epsilon = 1e-9);
        assert!(lord.p_value < 1e-6);
    }

    #[test]
    fn test_non_finite_scores_are_rejected() {
        let mut rows = responses("x", 5, 5);
        rows[0].total_score = f64::NAN;
        assert!(matches!(
            DifAnalyzer::default().analyze(&rows, None),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_chi_square_tail() {
        assert_relative_eq!(chi_square_p_value(3.841_458_820_694_124, 1), 0.05, epsilon = 1e-7);
        assert_relative_eq!(chi_square_p_value(5.991_464_547_107_979, 2), 0.05, epsilon = 1e-7);
        assert_eq!(chi_square_p_value(0.0, 1), 1.0);
    }
}
