//! Attribute sets and latent-class enumeration
//!
//! A mastery profile over `K` attributes is a bitmask: bit `k` set means
//! attribute `k` is mastered. The same representation doubles as an item's
//! Q-matrix row (the attributes it requires), so `α ⊇ R` is a mask test.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Largest attribute count supported; 2^12 = 4096 latent classes
pub const MAX_ATTRIBUTES: usize = 12;

/// Set of attribute indices in `0..MAX_ATTRIBUTES`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct AttributeSet(u32);

impl AttributeSet {
    pub const EMPTY: AttributeSet = AttributeSet(0);

    /// Build a set from attribute indices
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> EngineResult<Self> {
        let mut mask = 0u32;
        for index in indices {
            if index >= MAX_ATTRIBUTES {
                return Err(EngineError::InvalidInput(format!(
                    "attribute index {} exceeds supported maximum {}",
                    index,
                    MAX_ATTRIBUTES - 1
                )));
            }
            mask |= 1 << index;
        }
        Ok(Self(mask))
    }

    /// Wrap a raw class index / bitmask
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, attribute: usize) -> bool {
        attribute < 32 && self.0 & (1 << attribute) != 0
    }

    /// `self ⊇ other`
    pub fn is_superset_of(self, other: AttributeSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Highest attribute index + 1, or 0 for the empty set
    pub fn span(self) -> usize {
        32 - self.0.leading_zeros() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..32).filter(move |k| self.0 & (1 << k) != 0)
    }

    /// Index of `profile` restricted to this set, in `0..2^len`
    ///
    /// Bit `r` of the result is the mastery of the `r`-th required attribute
    /// in ascending index order. Used by the G-DINA reduced pattern tables.
    pub fn reduced_index(self, profile: AttributeSet) -> usize {
        self.iter()
            .enumerate()
            .fold(0usize, |acc, (r, k)| {
                if profile.contains(k) {
                    acc | (1 << r)
                } else {
                    acc
                }
            })
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, k) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", k)?;
        }
        write!(f, "}}")
    }
}

impl TryFrom<Vec<usize>> for AttributeSet {
    type Error = EngineError;

    fn try_from(indices: Vec<usize>) -> Result<Self, Self::Error> {
        AttributeSet::from_indices(indices)
    }
}

impl From<AttributeSet> for Vec<usize> {
    fn from(set: AttributeSet) -> Self {
        set.iter().collect()
    }
}

/// Validate an attribute count and return the number of latent classes
pub fn class_count(attributes: usize) -> EngineResult<usize> {
    if attributes == 0 || attributes > MAX_ATTRIBUTES {
        return Err(EngineError::InvalidConfiguration(format!(
            "attribute count must lie in 1..={}, got {}",
            MAX_ATTRIBUTES, attributes
        )));
    }
    Ok(1 << attributes)
}

/// Enumerate all `2^K` mastery profiles; class `c` has bit `k` = α_k
pub fn latent_classes(attributes: usize) -> impl Iterator<Item = AttributeSet> {
    (0..(1u32 << attributes)).map(AttributeSet::from_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superset_semantics() {
        let profile = AttributeSet::from_indices([0, 2, 4]).unwrap();
        let partial = AttributeSet::from_indices([0, 2]).unwrap();
        let beyond = AttributeSet::from_indices([0, 2, 4, 5]).unwrap();

        assert!(profile.is_superset_of(partial));
        assert!(!profile.is_superset_of(beyond));
        assert!(profile.is_superset_of(AttributeSet::EMPTY));
        assert_eq!(profile.to_string(), "{0,2,4}");
    }

    #[test]
    fn test_reduced_index_follows_required_order() {
        let required = AttributeSet::from_indices([1, 3]).unwrap();
        let only_first = AttributeSet::from_indices([1, 5]).unwrap();
        let only_second = AttributeSet::from_indices([3]).unwrap();
        let both = AttributeSet::from_indices([0, 1, 3]).unwrap();

        assert_eq!(required.reduced_index(AttributeSet::EMPTY), 0);
        assert_eq!(required.reduced_index(only_first), 1);
        assert_eq!(required.reduced_index(only_second), 2);
        assert_eq!(required.reduced_index(both), 3);
    }

    #[test]
    fn test_class_enumeration() {
        assert_eq!(class_count(6).unwrap(), 64);
        assert!(class_count(0).is_err());
        assert!(class_count(MAX_ATTRIBUTES + 1).is_err());

        let classes: Vec<_> = latent_classes(3).collect();
        assert_eq!(classes.len(), 8);
        assert_eq!(classes[5], AttributeSet::from_indices([0, 2]).unwrap());
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        assert!(AttributeSet::from_indices([MAX_ATTRIBUTES]).is_err());
        let parsed: Result<AttributeSet, _> = serde_json::from_str("[1, 3]");
        assert_eq!(parsed.unwrap().bits(), 0b1010);
    }
}
