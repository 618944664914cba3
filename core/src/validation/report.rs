//! Human-readable rendering of validation reports

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::validation::harness::{ValidationReport, ValidationWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    Above,
}

/// One acceptance criterion and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCheck {
    pub metric: String,
    pub value: f64,
    pub target: f64,
    pub comparison: Comparison,
    pub passed: bool,
}

impl TargetCheck {
    fn new(metric: &str, value: f64, target: f64, comparison: Comparison) -> Self {
        let passed = match comparison {
            Comparison::Below => value < target,
            Comparison::Above => value > target,
        };
        Self {
            metric: metric.to_string(),
            value,
            target,
            comparison,
            passed,
        }
    }
}

const RULE: &str = "------------------------------------------------------------";

impl ValidationReport {
    pub fn target_checks(&self, config: &ValidationConfig) -> Vec<TargetCheck> {
        vec![
            TargetCheck::new(
                "difficulty MAE",
                self.difficulty_mae,
                config.difficulty_mae_target,
                Comparison::Below,
            ),
            TargetCheck::new(
                "difficulty correlation",
                self.difficulty_correlation,
                config.difficulty_correlation_target,
                Comparison::Above,
            ),
            TargetCheck::new(
                "discrimination correlation",
                self.discrimination_correlation,
                config.discrimination_correlation_target,
                Comparison::Above,
            ),
        ]
    }

    pub fn meets_targets(&self, config: &ValidationConfig) -> bool {
        self.target_checks(config).iter().all(|check| check.passed)
    }

    /// Plain-text summary for reviewers
    pub fn to_text(&self, config: &ValidationConfig) -> String {
        let mut out = String::new();
        // writeln! into a String cannot fail
        let _ = self.write_text(&mut out, config);
        out
    }

    fn write_text(&self, out: &mut String, config: &ValidationConfig) -> std::fmt::Result {
        writeln!(out, "IRT Estimation Validation Report")?;
        writeln!(out, "{}", RULE)?;
        writeln!(out, "Items validated: {}/{}", self.validated_items(), self.estimated_items)?;
        writeln!(out, "Coverage rate: {:.1}%", self.coverage_rate * 100.0)?;
        writeln!(out)?;

        writeln!(out, "DIFFICULTY")?;
        writeln!(out, "  MAE:         {:.3}", self.difficulty_mae)?;
        writeln!(out, "  RMSE:        {:.3}", self.difficulty_rmse)?;
        writeln!(out, "  Correlation: {:.3}", self.difficulty_correlation)?;
        writeln!(out)?;

        writeln!(out, "DISCRIMINATION")?;
        writeln!(out, "  MAE:         {:.3}", self.discrimination_mae)?;
        writeln!(out, "  RMSE:        {:.3}", self.discrimination_rmse)?;
        writeln!(out, "  Correlation: {:.3}", self.discrimination_correlation)?;
        writeln!(out)?;

        writeln!(out, "TARGETS")?;
        let checks = self.target_checks(config);
        for check in &checks {
            let symbol = match check.comparison {
                Comparison::Below => '<',
                Comparison::Above => '>',
            };
            writeln!(
                out,
                "  [{}] {} {} {}: {:.3}",
                if check.passed { "ok" } else { "FAIL" },
                check.metric,
                symbol,
                check.target,
                check.value
            )?;
        }
        writeln!(out)?;

        writeln!(out, "LARGEST DIFFICULTY ERRORS")?;
        for row in self.worst_difficulty_errors(config.worst_errors) {
            writeln!(
                out,
                "  {}: estimated {:.3}, empirical {:.3}, error {:.3}",
                row.item_id, row.estimated_difficulty, row.empirical_difficulty, row.difficulty_error
            )?;
        }

        if !self.warnings.is_empty() {
            writeln!(out)?;
            writeln!(out, "WARNINGS")?;
            for warning in &self.warnings {
                match warning {
                    ValidationWarning::Coverage { coverage_rate, minimum } => writeln!(
                        out,
                        "  coverage {:.1}% below minimum {:.1}%",
                        coverage_rate * 100.0,
                        minimum * 100.0
                    )?,
                    ValidationWarning::UnmatchedEmpirical { count } => {
                        writeln!(out, "  {} benchmark item(s) without an estimate", count)?
                    }
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "RECOMMENDATIONS")?;
        if checks[0].passed && checks[1].passed {
            writeln!(out, "  Difficulty estimation is well calibrated")?;
        } else {
            writeln!(
                out,
                "  Retune difficulty coefficients: institution offsets, year drift, exam type, position polynomial"
            )?;
        }
        if checks[2].passed {
            writeln!(out, "  Discrimination estimation tracks the benchmark")?;
        } else {
            writeln!(out, "  Retune discrimination multipliers for institution tier and exam type")?;
        }
        Ok(())
    }

    /// One CSV row per matched item, with header
    pub fn to_csv(&self) -> String {
        let mut out = String::from(
            "item_id,estimated_difficulty,empirical_difficulty,difficulty_error,\
             estimated_discrimination,empirical_discrimination,discrimination_error\n",
        );
        for row in &self.residuals {
            let _ = writeln!(
                out,
                "{},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
                csv_field(row.item_id.as_str()),
                row.estimated_difficulty,
                row.empirical_difficulty,
                row.difficulty_error,
                row.estimated_discrimination,
                row.empirical_discrimination,
                row.discrimination_error
            );
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
