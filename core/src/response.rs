//! Response patterns
//!
//! A session's ordered record of scored answers. It is the single source of
//! truth for every derived estimate: replaying it reconstructs the engine
//! state of an abandoned session without loss.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::item_bank::ItemId;

/// Represents a learner's scored response to one item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Item identifier
    pub item_id: ItemId,

    /// Whether the response was correct
    pub correct: bool,
}

impl ResponseRecord {
    pub fn new(item_id: impl Into<ItemId>, correct: bool) -> Self {
        Self {
            item_id: item_id.into(),
            correct,
        }
    }
}

/// Ordered, append-only sequence of responses for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponsePattern")]
pub struct ResponsePattern {
    records: Vec<ResponseRecord>,
    #[serde(default)]
    frozen: bool,
}

#[derive(Deserialize)]
struct RawResponsePattern {
    records: Vec<ResponseRecord>,
    #[serde(default)]
    frozen: bool,
}

impl TryFrom<RawResponsePattern> for ResponsePattern {
    type Error = EngineError;

    fn try_from(raw: RawResponsePattern) -> Result<Self, Self::Error> {
        let mut pattern = ResponsePattern::from_records(raw.records)?;
        if raw.frozen {
            pattern.freeze();
        }
        Ok(pattern)
    }
}

impl ResponsePattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pattern from recorded responses, rejecting repeated items
    pub fn from_records(records: impl IntoIterator<Item = ResponseRecord>) -> EngineResult<Self> {
        let mut pattern = Self::new();
        for record in records {
            pattern.push(record)?;
        }
        Ok(pattern)
    }

    /// Append one response
    pub fn push(&mut self, record: ResponseRecord) -> EngineResult<()> {
        if self.frozen {
            return Err(EngineError::InvalidInput(
                "response pattern is frozen after submission".to_string(),
            ));
        }
        if self.contains(&record.item_id) {
            return Err(EngineError::InvalidInput(format!(
                "item {} answered twice in one pattern",
                record.item_id
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Freeze the pattern at submission
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn contains(&self, item_id: &ItemId) -> bool {
        self.records.iter().any(|r| &r.item_id == item_id)
    }

    pub fn records(&self) -> &[ResponseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn correct_count(&self) -> usize {
        self.records.iter().filter(|r| r.correct).count()
    }

    pub fn item_ids(&self) -> HashSet<&ItemId> {
        self.records.iter().map(|r| &r.item_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_rejects_repeats_and_frozen_pushes() {
        let mut pattern = ResponsePattern::new();
        pattern.push(ResponseRecord::new("q1", true)).unwrap();
        pattern.push(ResponseRecord::new("q2", false)).unwrap();

        assert!(pattern.push(ResponseRecord::new("q1", false)).is_err());
        assert_eq!(pattern.len(), 2);
        assert_eq!(pattern.correct_count(), 1);

        pattern.freeze();
        assert!(pattern.push(ResponseRecord::new("q3", true)).is_err());
    }

    #[test]
    fn test_deserialization_keeps_pattern_invariants() {
        let repeated = r#"{"records":[{"item_id":"q1","correct":true},{"item_id":"q1","correct":false}]}"#;
        assert!(serde_json::from_str::<ResponsePattern>(repeated).is_err());

        let mut pattern = ResponsePattern::from_records(vec![ResponseRecord::new("q1", true)]).unwrap();
        pattern.freeze();
        let json = serde_json::to_string(&pattern).unwrap();
        let mut restored: ResponsePattern = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, pattern);
        assert!(restored.push(ResponseRecord::new("q2", true)).is_err());
    }
}
