//! Q-matrix identifiability checks
//!
//! Completeness: every attribute is required by at least two items.
//! Discernibility: no two attributes share an identical Q-matrix column.

use serde::{Deserialize, Serialize};

use crate::cdm::attributes::AttributeSet;

/// Minimum number of items that must load on each attribute
pub const MIN_ITEMS_PER_ATTRIBUTE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QMatrixDiagnostics {
    pub is_complete: bool,
    pub is_discernible: bool,

    /// Items loading on each attribute
    pub attribute_coverage: Vec<usize>,

    /// Attribute pairs with identical columns
    pub indiscernible_pairs: Vec<(usize, usize)>,

    pub warnings: Vec<String>,
}

impl QMatrixDiagnostics {
    pub fn is_identifiable(&self) -> bool {
        self.is_complete && self.is_discernible
    }
}

/// Diagnose a Q-matrix given as its rows
pub fn diagnose<'a>(rows: impl IntoIterator<Item = &'a AttributeSet>, attributes: usize) -> QMatrixDiagnostics {
    let rows: Vec<AttributeSet> = rows.into_iter().copied().collect();

    let attribute_coverage: Vec<usize> = (0..attributes)
        .map(|k| rows.iter().filter(|row| row.contains(k)).count())
        .collect();

    let mut warnings = Vec::new();
    for (k, &count) in attribute_coverage.iter().enumerate() {
        if count < MIN_ITEMS_PER_ATTRIBUTE {
            warnings.push(format!(
                "attribute {} covered by only {} item(s), at least {} required",
                k, count, MIN_ITEMS_PER_ATTRIBUTE
            ));
        }
    }

    let mut indiscernible_pairs = Vec::new();
    for k1 in 0..attributes {
        for k2 in (k1 + 1)..attributes {
            if rows.iter().all(|row| row.contains(k1) == row.contains(k2)) {
                indiscernible_pairs.push((k1, k2));
                warnings.push(format!("attributes {} and {} have identical Q-matrix columns", k1, k2));
            }
        }
    }

    QMatrixDiagnostics {
        is_complete: attribute_coverage.iter().all(|&c| c >= MIN_ITEMS_PER_ATTRIBUTE),
        is_discernible: indiscernible_pairs.is_empty(),
        attribute_coverage,
        indiscernible_pairs,
        warnings,
    }
}
