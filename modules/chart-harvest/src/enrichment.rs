// Hand-off to the record enrichment stage.
//
// Only the seam is modelled here: the harvester passes finished entries to a
// RecordLookup keyed by canonical id. Lookup failures never fail the list.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::Entry;

/// Extra attributes a catalogue lookup can attach to an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub popularity: Option<u32>,
    pub duration_ms: Option<u64>,
    pub album_image: Option<String>,
    pub release_date: Option<String>,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub record: Option<EntryRecord>,
}

#[async_trait]
pub trait RecordLookup: Send + Sync {
    /// `Ok(None)` when the catalogue does not know the id.
    async fn lookup(&self, canonical_id: &str) -> Result<Option<EntryRecord>>;
}

/// Attach a record to every entry that has an id. Order is preserved.
pub async fn enrich(entries: Vec<Entry>, lookup: &dyn RecordLookup) -> Vec<EnrichedEntry> {
    let mut enriched = Vec::with_capacity(entries.len());
    let mut failures = 0;
    let mut missing = 0;

    for entry in entries {
        let record = match entry.canonical_id.as_deref() {
            None => {
                missing += 1;
                None
            }
            Some(id) => match lookup.lookup(id).await {
                Ok(record) => record,
                Err(e) => {
                    failures += 1;
                    warn!(rank = entry.rank, id, error = %e, "Record lookup failed");
                    None
                }
            },
        };
        enriched.push(EnrichedEntry { entry, record });
    }

    let found = enriched.iter().filter(|e| e.record.is_some()).count();
    info!(
        total = enriched.len(),
        found,
        without_id = missing,
        failures,
        "Enrichment complete"
    );
    enriched
}
