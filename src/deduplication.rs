// 🔍 Deduplication Engine - one row per natural key
//
// Registry exports contain every historical version of an object. Only the
// highest version per natural key is kept; the rest never reach the store.

use crate::normalizer::CandidateRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// VERSION ORDERING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionOrdering {
    /// 10 > 9
    #[default]
    Numeric,

    /// Compares the textual form, so "9" > "10". Kept only to reproduce
    /// historical loads; never the right choice for new data.
    Lexicographic,
}

impl VersionOrdering {
    pub fn compare(&self, a: i64, b: i64) -> Ordering {
        match self {
            VersionOrdering::Numeric => a.cmp(&b),
            VersionOrdering::Lexicographic => a.to_string().cmp(&b.to_string()),
        }
    }
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub input: usize,
    pub output: usize,
    /// Records that lost to a higher version of the same key
    pub superseded: usize,
}

pub struct DeduplicationEngine {
    pub ordering: VersionOrdering,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            ordering: VersionOrdering::Numeric,
        }
    }

    pub fn with_ordering(ordering: VersionOrdering) -> Self {
        DeduplicationEngine { ordering }
    }

    /// Single pass; memory is bounded by the number of distinct keys.
    /// Output keeps the order in which keys were first seen.
    pub fn deduplicate<I>(&self, records: I) -> (Vec<CandidateRecord>, DedupStats)
    where
        I: IntoIterator<Item = CandidateRecord>,
    {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<CandidateRecord> = Vec::new();
        let mut stats = DedupStats::default();

        for record in records {
            stats.input += 1;
            match index.get(&record.natural_key) {
                None => {
                    index.insert(record.natural_key.clone(), kept.len());
                    kept.push(record);
                }
                Some(&slot) => {
                    stats.superseded += 1;
                    if self.is_newer(&record, &kept[slot]) {
                        kept[slot] = record;
                    }
                }
            }
        }

        stats.output = kept.len();
        debug!(
            input = stats.input,
            output = stats.output,
            superseded = stats.superseded,
            "deduplicated by version"
        );
        (kept, stats)
    }

    /// Equal versions keep the record seen first. Versionless records
    /// (junction rows) never replace each other.
    fn is_newer(&self, candidate: &CandidateRecord, current: &CandidateRecord) -> bool {
        match (candidate.version, current.version) {
            (Some(a), Some(b)) => self.ordering.compare(a, b) == Ordering::Greater,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn deduplicate_by_version<I>(records: I, ordering: VersionOrdering) -> Vec<CandidateRecord>
where
    I: IntoIterator<Item = CandidateRecord>,
{
    DeduplicationEngine::with_ordering(ordering).deduplicate(records).0
}
