//! Calibrated item store
//!
//! The bank is immutable at scoring time and safe to share across sessions
//! behind an `Arc`. Loosely typed ingestion rows are validated here, once,
//! so every `Item` the engine sees satisfies `a > 0` and `c ∈ [0, 1)`.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cdm::attributes::AttributeSet;
use crate::error::{EngineError, EngineResult};
use crate::irt::model::IrtParameters;

/// Opaque item identifier assigned by the content-management system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Content area tag used for section breakdowns and content balancing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentArea(String);

impl ContentArea {
    pub fn new(area: impl Into<String>) -> Self {
        Self(area.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentArea {
    fn from(area: &str) -> Self {
        Self(area.to_string())
    }
}

impl From<String> for ContentArea {
    fn from(area: String) -> Self {
        Self(area)
    }
}

/// Calibrated assessment item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawItemRecord", into = "RawItemRecord")]
pub struct Item {
    /// Unique item identifier
    pub id: ItemId,

    /// 3PL parameters
    pub irt: IrtParameters,

    /// Content area tag
    pub area: ContentArea,

    /// Attributes the item loads on (Q-matrix row), for diagnostic items
    pub q_row: Option<AttributeSet>,

    /// Calibration version; bumped by every recalibration
    pub version: u32,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, irt: IrtParameters, area: impl Into<ContentArea>) -> Self {
        Self {
            id: id.into(),
            irt,
            area: area.into(),
            q_row: None,
            version: 1,
        }
    }

    pub fn with_q_row(mut self, q_row: AttributeSet) -> Self {
        self.q_row = Some(q_row);
        self
    }

    /// Produce the next version of this item with new parameters
    pub fn recalibrated(&self, irt: IrtParameters) -> Self {
        Self {
            irt,
            version: self.version + 1,
            ..self.clone()
        }
    }
}

/// Loosely typed item row as delivered by the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItemRecord {
    pub id: String,
    #[serde(alias = "discrimination")]
    pub a: f64,
    #[serde(alias = "difficulty")]
    pub b: f64,
    #[serde(alias = "guessing", default)]
    pub c: f64,
    pub area: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_row: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl TryFrom<RawItemRecord> for Item {
    type Error = EngineError;

    fn try_from(raw: RawItemRecord) -> Result<Self, Self::Error> {
        let id = ItemId::new(raw.id);
        if id.as_str().is_empty() {
            return Err(EngineError::InvalidInput("item id must not be empty".to_string()));
        }

        let irt = IrtParameters::new(raw.a, raw.b, raw.c)
            .map_err(|e| EngineError::invalid_item(&id, e.to_string()))?;

        let q_row = raw
            .q_row
            .map(AttributeSet::from_indices)
            .transpose()
            .map_err(|e| EngineError::invalid_item(&id, e.to_string()))?;

        Ok(Item {
            id,
            irt,
            area: ContentArea::new(raw.area),
            q_row,
            version: raw.version.unwrap_or(1),
        })
    }
}

impl From<Item> for RawItemRecord {
    fn from(item: Item) -> Self {
        RawItemRecord {
            id: item.id.0,
            a: item.irt.discrimination(),
            b: item.irt.difficulty(),
            c: item.irt.guessing(),
            area: item.area.0,
            q_row: item.q_row.map(Vec::from),
            version: Some(item.version),
        }
    }
}

/// Immutable store of calibrated items with stable iteration order
#[derive(Debug, Clone, Default)]
pub struct ItemBank {
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
}

impl ItemBank {
    /// Build a bank, rejecting duplicate identifiers
    pub fn new(items: impl IntoIterator<Item = Item>) -> EngineResult<Self> {
        let mut bank = ItemBank::default();
        for item in items {
            if bank.index.contains_key(&item.id) {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate item id in bank: {}",
                    item.id
                )));
            }
            bank.index.insert(item.id.clone(), bank.items.len());
            bank.items.push(item);
        }
        debug!("Item bank built with {} items", bank.items.len());
        Ok(bank)
    }

    /// Validate and ingest raw rows
    pub fn from_records(records: impl IntoIterator<Item = RawItemRecord>) -> EngineResult<Self> {
        let items = records
            .into_iter()
            .map(Item::try_from)
            .collect::<EngineResult<Vec<_>>>()?;
        Self::new(items)
    }

    /// Ingest a JSON array of item rows
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let records: Vec<RawItemRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    /// Look up an item, failing with `UnknownItem`
    pub fn require(&self, id: &ItemId) -> EngineResult<&Item> {
        self.get(id).ok_or_else(|| EngineError::UnknownItem(id.clone()))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct content areas present in the bank
    pub fn areas(&self) -> BTreeSet<ContentArea> {
        self.items.iter().map(|item| item.area.clone()).collect()
    }

    /// Q-matrix of every diagnostic item, keyed by item id
    pub fn q_matrix(&self) -> BTreeMap<ItemId, AttributeSet> {
        self.items
            .iter()
            .filter_map(|item| item.q_row.map(|q| (item.id.clone(), q)))
            .collect()
    }

    /// Return a new bank with one item replaced by its recalibrated version
    pub fn with_recalibrated(&self, id: &ItemId, irt: IrtParameters) -> EngineResult<Self> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| EngineError::UnknownItem(id.clone()))?;
        let mut next = self.clone();
        next.items[position] = self.items[position].recalibrated(irt);
        Ok(next)
    }
}
