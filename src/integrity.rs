// Reference Integrity Filter - guards the unit <-> building junction
//
// The junction export is produced separately from the unit and building
// exports and can point at objects that do not exist. Links with a missing
// endpoint are dropped. When too many stored units end up without any link
// the whole batch is rejected: that pattern means the exports are out of
// step, not that a handful of rows is bad.

use crate::db;
use crate::entities::EntityType;
use crate::error::{Result, SyncError};
use crate::normalizer::CandidateRecord;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Max number of example ids carried in a violation
pub const SAMPLE_SIZE: usize = 10;

/// Keys a link may point at
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub units: HashSet<String>,
    pub buildings: HashSet<String>,
}

impl Endpoints {
    pub fn from_store(conn: &Connection) -> Result<Self> {
        Ok(Endpoints {
            units: db::natural_keys(conn, EntityType::Unit)?,
            buildings: db::natural_keys(conn, EntityType::Building)?,
        })
    }

    /// Drop stored keys that the current run did not touch; they are about
    /// to be pruned and must not count as valid endpoints.
    pub fn restricted_to(self, units: &HashSet<String>, buildings: &HashSet<String>) -> Self {
        Endpoints {
            units: self.units.intersection(units).cloned().collect(),
            buildings: self.buildings.intersection(buildings).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub input: usize,
    pub kept: usize,
    pub dropped: usize,
    /// Units without any valid link after filtering
    pub orphaned_units: usize,
}

impl IntegrityReport {
    pub fn summary(&self) -> String {
        format!(
            "Links: {} in, {} kept, {} dropped; {} units without a building",
            self.input, self.kept, self.dropped, self.orphaned_units
        )
    }
}

fn link_endpoints(record: &CandidateRecord) -> Option<(&str, &str)> {
    Some((record.text("verblijfsobject_id")?, record.text("pand_id")?))
}

/// Keep only links whose unit and building both exist. Fails when more
/// than `threshold` units are left without a valid link; the error lists at
/// most SAMPLE_SIZE of them, in key order.
pub fn filter_valid(
    candidates: Vec<CandidateRecord>,
    endpoints: &Endpoints,
    threshold: usize,
) -> Result<(Vec<CandidateRecord>, IntegrityReport)> {
    let input = candidates.len();

    let valid: Vec<CandidateRecord> = candidates
        .into_iter()
        .filter(|record| match link_endpoints(record) {
            Some((unit, building)) => {
                endpoints.units.contains(unit) && endpoints.buildings.contains(building)
            }
            None => false,
        })
        .collect();

    let linked_units: HashSet<&str> = valid
        .iter()
        .filter_map(|r| r.text("verblijfsobject_id"))
        .collect();

    let mut orphaned: Vec<&String> = endpoints
        .units
        .iter()
        .filter(|unit| !linked_units.contains(unit.as_str()))
        .collect();
    orphaned.sort();

    let report = IntegrityReport {
        input,
        kept: valid.len(),
        dropped: input - valid.len(),
        orphaned_units: orphaned.len(),
    };

    if orphaned.len() > threshold {
        let sample: Vec<String> = orphaned.iter().take(SAMPLE_SIZE).map(|k| k.to_string()).collect();
        warn!(orphaned = orphaned.len(), threshold, "junction batch rejected");
        return Err(SyncError::ReferentialIntegrityViolation {
            orphaned: orphaned.len(),
            threshold,
            sample,
        });
    }

    if report.dropped > 0 || report.orphaned_units > 0 {
        warn!("{}", report.summary());
    } else {
        info!("{}", report.summary());
    }

    Ok((valid, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(n: u32) -> String {
        format!("03630100{:08}", n)
    }

    fn building(n: u32) -> String {
        format!("03631000{:08}", n)
    }

    fn link(u: &str, b: &str) -> CandidateRecord {
        use crate::normalizer::FieldValue;
        CandidateRecord::new(EntityType::UnitBuildingLink, &format!("{}:{}", u, b), None)
            .with("verblijfsobject_id", FieldValue::Text(u.to_string()))
            .with("pand_id", FieldValue::Text(b.to_string()))
    }

    fn endpoints(units: u32, buildings: u32) -> Endpoints {
        Endpoints {
            units: (1..=units).map(unit).collect(),
            buildings: (1..=buildings).map(building).collect(),
        }
    }

    #[test]
    fn test_drops_links_with_missing_endpoint() {
        let links = vec![
            link(&unit(1), &building(1)),
            link(&unit(2), &building(1)),
            link(&unit(99), &building(1)),
            link(&unit(1), &building(99)),
        ];

        let (valid, report) = filter_valid(links, &endpoints(2, 1), 5).unwrap();

        assert_eq!(valid.len(), 2);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.orphaned_units, 0);
    }

    #[test]
    fn test_orphans_within_threshold_pass() {
        // 5 of 6 units never get a link: exactly at the threshold
        let links = vec![link(&unit(1), &building(1))];

        let (valid, report) = filter_valid(links, &endpoints(6, 1), 5).unwrap();

        assert_eq!(valid.len(), 1);
        assert_eq!(report.orphaned_units, 5);
    }

    #[test]
    fn test_orphans_over_threshold_fail_with_sample() {
        let links = vec![link(&unit(1), &building(1))];

        let err = filter_valid(links, &endpoints(20, 1), 5).unwrap_err();

        match err {
            SyncError::ReferentialIntegrityViolation {
                orphaned,
                threshold,
                sample,
            } => {
                assert_eq!(orphaned, 19);
                assert_eq!(threshold, 5);
                assert_eq!(sample.len(), SAMPLE_SIZE);
                assert_eq!(sample[0], unit(2));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_restricted_endpoints() {
        let touched_units: HashSet<String> = [unit(1)].into_iter().collect();
        let touched_buildings: HashSet<String> = [building(1), building(7)].into_iter().collect();

        let restricted = endpoints(3, 3).restricted_to(&touched_units, &touched_buildings);

        assert_eq!(restricted.units.len(), 1);
        assert_eq!(restricted.buildings.len(), 1);
    }
}
