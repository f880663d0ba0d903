use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// A name with an optional reference link (artist, album, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedLabel {
    pub name: String,
    pub url: Option<String>,
    pub id: Option<String>,
}

impl LinkedLabel {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFlags {
    pub explicit: bool,
}

/// One ranked row as scraped from the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// 1-based position as rendered by the page.
    pub rank: u32,
    pub primary_label: String,
    pub secondary_labels: Vec<LinkedLabel>,
    pub collection: Option<LinkedLabel>,
    pub canonical_id: Option<String>,
    pub flags: EntryFlags,
    pub source_url: Option<String>,
}

/// Identity used to recognise the same logical entry across frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    Id(String),
    Labels(String),
}

impl Entry {
    pub fn dedup_key(&self) -> DedupKey {
        match &self.canonical_id {
            Some(id) => DedupKey::Id(id.clone()),
            None => {
                let names: Vec<&str> = self
                    .secondary_labels
                    .iter()
                    .map(|l| l.name.as_str())
                    .collect();
                DedupKey::Labels(format!("{}|{}", self.primary_label, names.join(", ")))
            }
        }
    }
}

/// Header information read from the list page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Entry count advertised in the page header ("50 songs").
    pub advertised_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    /// The scroll ceiling was reached before the run was contiguous.
    ScrollCeiling,
    /// Several scroll+extract cycles in a row accepted nothing new.
    NoProgress,
    /// Frames kept going stale faster than they could be read.
    StaleFrames,
    /// The container reached its true bottom with ranks still missing.
    EndOfList,
}

/// Why a harvest ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HarvestOutcome {
    Complete,
    Partial(PartialReason),
    Failed(HarvestError),
}

impl HarvestOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, HarvestOutcome::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HarvestOutcome::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: Option<&str>) -> Entry {
        Entry {
            rank: 3,
            primary_label: "Espresso".into(),
            secondary_labels: vec![LinkedLabel::plain("Sabrina Carpenter"), LinkedLabel::plain("Guest")],
            collection: None,
            canonical_id: id.map(String::from),
            flags: EntryFlags::default(),
            source_url: None,
        }
    }

    #[test]
    fn dedup_key_prefers_canonical_id() {
        assert_eq!(entry(Some("abc")).dedup_key(), DedupKey::Id("abc".into()));
    }

    #[test]
    fn dedup_key_falls_back_to_labels() {
        assert_eq!(
            entry(None).dedup_key(),
            DedupKey::Labels("Espresso|Sabrina Carpenter, Guest".into())
        );
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_value(HarvestOutcome::Partial(PartialReason::NoProgress)).unwrap();
        assert_eq!(json["status"], "partial");
        assert_eq!(json["reason"], "no_progress");

        let json = serde_json::to_value(HarvestOutcome::Partial(PartialReason::EndOfList)).unwrap();
        assert_eq!(json["reason"], "end_of_list");
    }
}
