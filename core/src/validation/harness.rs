//! Offline comparison of estimated against empirical item parameters
//!
//! Pairs are matched by item id. Empirical discrimination is taken as given
//! when present and otherwise derived from the point-biserial correlation.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigRecord, ValidationConfig};
use crate::error::{EngineError, EngineResult};
use crate::item_bank::ItemId;
use crate::validation::metadata::discrimination_from_biserial;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedParameters {
    pub item_id: ItemId,
    pub difficulty: f64,
    pub discrimination: f64,
}

/// Benchmark parameters from a calibrated administration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalParameters {
    pub item_id: ItemId,
    pub difficulty: f64,
    #[serde(default)]
    pub discrimination: Option<f64>,
    #[serde(default)]
    pub biserial: Option<f64>,
}

/// One matched item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualRow {
    pub item_id: ItemId,
    pub estimated_difficulty: f64,
    pub empirical_difficulty: f64,
    pub difficulty_error: f64,
    pub estimated_discrimination: f64,
    pub empirical_discrimination: f64,
    pub discrimination_error: f64,
}

/// Non-fatal findings reported alongside the statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    Coverage { coverage_rate: f64, minimum: f64 },
    UnmatchedEmpirical { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub difficulty_mae: f64,
    pub difficulty_rmse: f64,
    pub difficulty_correlation: f64,
    pub discrimination_mae: f64,
    pub discrimination_rmse: f64,
    pub discrimination_correlation: f64,

    /// Matched items over estimated items
    pub coverage_rate: f64,
    pub estimated_items: usize,

    /// Matched rows, in estimated-input order
    pub residuals: Vec<ResidualRow>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn validated_items(&self) -> usize {
        self.residuals.len()
    }

    /// The `n` rows with the largest difficulty error, largest first
    pub fn worst_difficulty_errors(&self, n: usize) -> Vec<&ResidualRow> {
        let mut rows: Vec<&ResidualRow> = self.residuals.iter().collect();
        rows.sort_by(|a, b| b.difficulty_error.total_cmp(&a.difficulty_error));
        rows.truncate(n);
        rows
    }
}

/// Pearson correlation; 0 for fewer than two pairs or a constant series
pub fn pearson_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x * var_y).sqrt()
}

fn mae(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().sum::<f64>() / errors.len() as f64
}

fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

#[derive(Debug, Clone, Default)]
pub struct ValidationHarness {
    config: ValidationConfig,
}

impl ValidationHarness {
    pub fn new(config: ValidationConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Discrimination of a benchmark row, derived from the biserial if needed
    pub fn empirical_discrimination(&self, empirical: &EmpiricalParameters) -> f64 {
        match (empirical.discrimination, empirical.biserial) {
            (Some(a), _) => a,
            (None, Some(r)) => discrimination_from_biserial(
                r,
                self.config.biserial_factor,
                self.config.min_discrimination,
                self.config.max_discrimination,
            ),
            (None, None) => 1.0,
        }
    }

    pub fn validate(
        &self,
        estimated: &[EstimatedParameters],
        empirical: &[EmpiricalParameters],
    ) -> EngineResult<ValidationReport> {
        if estimated.is_empty() {
            return Err(EngineError::InvalidInput("no estimated parameters to validate".to_string()));
        }
        let benchmark: HashMap<&ItemId, &EmpiricalParameters> =
            empirical.iter().map(|row| (&row.item_id, row)).collect();

        let residuals: Vec<ResidualRow> = estimated
            .iter()
            .filter_map(|est| {
                let emp = benchmark.get(&est.item_id)?;
                let empirical_discrimination = self.empirical_discrimination(emp);
                Some(ResidualRow {
                    item_id: est.item_id.clone(),
                    estimated_difficulty: est.difficulty,
                    empirical_difficulty: emp.difficulty,
                    difficulty_error: (est.difficulty - emp.difficulty).abs(),
                    estimated_discrimination: est.discrimination,
                    empirical_discrimination,
                    discrimination_error: (est.discrimination - empirical_discrimination).abs(),
                })
            })
            .collect();

        let column = |f: fn(&ResidualRow) -> f64| residuals.iter().map(f).collect::<Vec<f64>>();
        let difficulty_errors = column(|r| r.difficulty_error);
        let discrimination_errors = column(|r| r.discrimination_error);

        let coverage_rate = residuals.len() as f64 / estimated.len() as f64;
        let mut warnings = Vec::new();
        if coverage_rate < self.config.min_coverage_rate {
            warn!(
                "Validation coverage {:.1}% below the {:.1}% minimum",
                coverage_rate * 100.0,
                self.config.min_coverage_rate * 100.0
            );
            warnings.push(ValidationWarning::Coverage {
                coverage_rate,
                minimum: self.config.min_coverage_rate,
            });
        }
        let unmatched = empirical.len().saturating_sub(residuals.len());
        if unmatched > 0 {
            warnings.push(ValidationWarning::UnmatchedEmpirical { count: unmatched });
        }

        let report = ValidationReport {
            difficulty_mae: mae(&difficulty_errors),
            difficulty_rmse: rmse(&difficulty_errors),
            difficulty_correlation: pearson_correlation(
                &column(|r| r.estimated_difficulty),
                &column(|r| r.empirical_difficulty),
            ),
            discrimination_mae: mae(&discrimination_errors),
            discrimination_rmse: rmse(&discrimination_errors),
            discrimination_correlation: pearson_correlation(
                &column(|r| r.estimated_discrimination),
                &column(|r| r.empirical_discrimination),
            ),
            coverage_rate,
            estimated_items: estimated.len(),
            residuals,
            warnings,
        };

        info!(
            "Validated {}/{} items: difficulty MAE {:.3}, r = {:.3}",
            report.validated_items(),
            report.estimated_items,
            report.difficulty_mae,
            report.difficulty_correlation
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimated(id: &str, b: f64, a: f64) -> EstimatedParameters {
        EstimatedParameters {
            item_id: ItemId::from(id),
            difficulty: b,
            discrimination: a,
        }
    }

    fn empirical(id: &str, b: f64, biserial: f64) -> EmpiricalParameters {
        EmpiricalParameters {
            item_id: ItemId::from(id),
            difficulty: b,
            discrimination: None,
            biserial: Some(biserial),
        }
    }

    #[test]
    fn test_correlation_edge_cases() {
        assert_eq!(pearson_correlation(&[1.0], &[2.0]), 0.0);
        assert_eq!(pearson_correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_relative_eq!(pearson_correlation(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson_correlation(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_error_statistics() {
        let harness = ValidationHarness::default();
        let est = vec![estimated("q1", 0.0, 1.0), estimated("q2", 1.0, 1.2), estimated("q3", -1.0, 0.9)];
        let emp = vec![empirical("q1", 0.5, 0.4), empirical("q2", 1.0, 0.4), empirical("q3", -2.0, 0.3)];

        let report = harness.validate(&est, &emp).unwrap();
        assert_eq!(report.validated_items(), 3);
        assert_relative_eq!(report.coverage_rate, 1.0);
        assert_relative_eq!(report.difficulty_mae, 0.5, epsilon = 1e-12);
        assert_relative_eq!(report.difficulty_rmse, (1.25_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(report.residuals[0].empirical_discrimination, 1.2, epsilon = 1e-12);
        assert!(report.warnings.is_empty());

        let worst = report.worst_difficulty_errors(2);
        assert_eq!(worst[0].item_id, ItemId::from("q3"));
        assert_eq!(worst[1].item_id, ItemId::from("q1"));
    }

    #[test]
    fn test_low_coverage_is_a_warning() {
        let harness = ValidationHarness::default();
        let est = vec![estimated("q1", 0.0, 1.0), estimated("q2", 1.0, 1.0)];
        let emp = vec![empirical("q1", 0.2, 0.3), empirical("zz", 0.0, 0.3)];

        let report = harness.validate(&est, &emp).unwrap();
        assert_relative_eq!(report.coverage_rate, 0.5);
        assert_eq!(report.difficulty_correlation, 0.0);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::Coverage { .. })));
        assert!(report
            .warnings
            .contains(&ValidationWarning::UnmatchedEmpirical { count: 1 }));
    }

    #[test]
    fn test_empty_estimates_rejected() {
        assert!(ValidationHarness::default().validate(&[], &[]).is_err());
    }
}
