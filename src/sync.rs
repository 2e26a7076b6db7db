// 🔄 Bulk Sync Engine - full-refresh replica of the registry
//
// Per entity type: filter, upsert in chunks (one savepoint each), collect
// the touched keys. After every type is upserted, rows whose key was not
// touched are pruned, referencing types first.

use crate::config::RegistryConfig;
use crate::db::{self, Event};
use crate::entities::EntityType;
use crate::error::{Result, SyncError};
use crate::integrity::{self, Endpoints, IntegrityReport};
use crate::normalizer::CandidateRecord;
use crate::schema::schema_for;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

const ACTOR: &str = "bulk_sync";

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySyncStats {
    pub candidates: usize,
    /// Rejected by the validity predicate
    pub filtered: usize,
    pub touched: usize,
    pub chunks: usize,
    pub pruned: usize,
    /// SHA-256 over the sorted touched keys
    pub digest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySyncReport {
    pub entities: BTreeMap<String, EntitySyncStats>,
    pub integrity: Option<IntegrityReport>,
}

impl RegistrySyncReport {
    pub fn summary(&self) -> String {
        let touched: usize = self.entities.values().map(|s| s.touched).sum();
        let pruned: usize = self.entities.values().map(|s| s.pruned).sum();
        format!(
            "Registry sync: {} entity types, {} rows upserted, {} rows pruned",
            self.entities.len(),
            touched,
            pruned
        )
    }
}

/// Order-independent fingerprint of a key set
pub fn digest_keys(keys: &HashSet<String>) -> String {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for key in sorted {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct BulkSyncEngine {
    pub chunk_size: usize,
    /// Address points addressing one of these units are never stored
    pub excluded_unit_refs: HashSet<String>,
    pub link_orphan_threshold: usize,
}

impl BulkSyncEngine {
    pub fn new() -> Self {
        Self::from_config(&RegistryConfig::default())
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        BulkSyncEngine {
            chunk_size: config.chunk_size.max(1),
            excluded_unit_refs: config.excluded_unit_refs.iter().cloned().collect(),
            link_orphan_threshold: config.link_orphan_threshold,
        }
    }

    /// Per-type validity predicate
    pub fn is_valid(&self, record: &CandidateRecord) -> bool {
        match record.entity_type {
            EntityType::AddressPoint => record
                .text("verblijfsobject_id")
                .map_or(true, |unit| !self.excluded_unit_refs.contains(unit)),
            _ => true,
        }
    }

    /// Upsert `candidates` in chunks and return every key written.
    ///
    /// Each chunk runs in its own savepoint. A failing chunk is rolled back
    /// on its own and reported as ChunkFailed with the keys of the chunks
    /// before it, which stay written unless the caller rolls back further.
    pub fn sync(
        &self,
        conn: &Connection,
        entity_type: EntityType,
        candidates: Vec<CandidateRecord>,
    ) -> Result<HashSet<String>> {
        Ok(self.sync_with_stats(conn, entity_type, candidates)?.0)
    }

    fn sync_with_stats(
        &self,
        conn: &Connection,
        entity_type: EntityType,
        candidates: Vec<CandidateRecord>,
    ) -> Result<(HashSet<String>, EntitySyncStats)> {
        let schema = schema_for(entity_type);
        let mut stats = EntitySyncStats {
            candidates: candidates.len(),
            ..Default::default()
        };

        let valid: Vec<CandidateRecord> = candidates
            .into_iter()
            .filter(|r| r.entity_type == entity_type && self.is_valid(r))
            .collect();
        stats.filtered = stats.candidates - valid.len();

        let mut touched: HashSet<String> = HashSet::with_capacity(valid.len());
        for (chunk_index, chunk) in valid.chunks(self.chunk_size).enumerate() {
            conn.execute_batch("SAVEPOINT sync_chunk")?;
            match db::upsert_records(conn, schema, chunk) {
                Ok(_) => {
                    conn.execute_batch("RELEASE sync_chunk")?;
                    touched.extend(chunk.iter().map(|r| r.natural_key.clone()));
                    stats.chunks += 1;
                }
                Err(source) => {
                    conn.execute_batch("ROLLBACK TO sync_chunk; RELEASE sync_chunk")?;
                    let mut committed: Vec<String> = touched.into_iter().collect();
                    committed.sort();
                    return Err(SyncError::ChunkFailed {
                        entity: entity_type.name().to_string(),
                        chunk_index,
                        committed,
                        source,
                    });
                }
            }
        }

        stats.touched = touched.len();
        stats.digest = digest_keys(&touched);
        info!(
            entity = %entity_type,
            touched = stats.touched,
            filtered = stats.filtered,
            chunks = stats.chunks,
            "upserted"
        );

        db::insert_event(
            conn,
            &Event::new(
                "registry_synced",
                entity_type.name(),
                &stats.digest,
                serde_json::json!({
                    "candidates": stats.candidates,
                    "filtered": stats.filtered,
                    "touched": stats.touched,
                    "chunks": stats.chunks,
                    "digest": stats.digest,
                }),
                ACTOR,
            ),
        )?;

        Ok((touched, stats))
    }

    /// Delete every stored row of `entity_type` whose key is not in `touched`
    pub fn prune(&self, conn: &Connection, entity_type: EntityType, touched: &HashSet<String>) -> Result<usize> {
        let deleted = db::delete_except(conn, entity_type, touched)?;
        if deleted > 0 {
            info!(entity = %entity_type, deleted, "pruned rows absent from the export");
        }

        db::insert_event(
            conn,
            &Event::new(
                "registry_pruned",
                entity_type.name(),
                &digest_keys(touched),
                serde_json::json!({ "deleted": deleted, "kept": touched.len() }),
                ACTOR,
            ),
        )?;
        Ok(deleted)
    }

    /// Full registry refresh in one transaction.
    ///
    /// `load` yields the deduplicated candidates of one type. Types are
    /// upserted in dependency order; the junction batch goes through the
    /// integrity filter against the units and buildings touched in this run.
    /// Pruning runs last, in reverse order. Any error rolls back everything.
    pub fn sync_all<F>(&self, conn: &Connection, mut load: F) -> Result<RegistrySyncReport>
    where
        F: FnMut(EntityType) -> Result<Vec<CandidateRecord>>,
    {
        let tx = conn.unchecked_transaction()?;
        let mut report = RegistrySyncReport::default();
        let mut touched: BTreeMap<EntityType, HashSet<String>> = BTreeMap::new();

        for &entity_type in EntityType::sync_order() {
            let mut candidates = load(entity_type)?;

            if entity_type == EntityType::UnitBuildingLink {
                let empty = HashSet::new();
                let endpoints = Endpoints::from_store(&tx)?.restricted_to(
                    touched.get(&EntityType::Unit).unwrap_or(&empty),
                    touched.get(&EntityType::Building).unwrap_or(&empty),
                );
                let (valid, integrity_report) =
                    integrity::filter_valid(candidates, &endpoints, self.link_orphan_threshold)?;
                candidates = valid;
                report.integrity = Some(integrity_report);
            }

            let (keys, stats) = self.sync_with_stats(&tx, entity_type, candidates)?;
            touched.insert(entity_type, keys);
            report.entities.insert(entity_type.name().to_string(), stats);
        }

        for &entity_type in EntityType::sync_order().iter().rev() {
            let keys = touched.get(&entity_type).cloned().unwrap_or_default();
            if keys.is_empty() {
                warn!(entity = %entity_type, "empty export, every stored row will be pruned");
            }
            let deleted = self.prune(&tx, entity_type, &keys)?;
            if let Some(stats) = report.entities.get_mut(entity_type.name()) {
                stats.pruned = deleted;
            }
        }

        tx.commit()?;
        info!("{}", report.summary());
        Ok(report)
    }
}

impl Default for BulkSyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::FieldValue;
    use chrono::NaiveDate;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    fn begin() -> FieldValue {
        FieldValue::Date(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap())
    }

    fn building(n: u32, block: &str) -> CandidateRecord {
        CandidateRecord::new(EntityType::Building, &format!("03631000{:08}", n), Some(1))
            .with("begin_geldigheid", begin())
            .with("bouwblok", FieldValue::Text(block.to_string()))
    }

    fn unit(n: u32) -> CandidateRecord {
        CandidateRecord::new(EntityType::Unit, &format!("03630100{:08}", n), Some(1))
            .with("begin_geldigheid", begin())
    }

    fn link(u: u32, b: u32) -> CandidateRecord {
        let unit = format!("03630100{:08}", u);
        let building = format!("03631000{:08}", b);
        CandidateRecord::new(EntityType::UnitBuildingLink, &format!("{}:{}", unit, building), None)
            .with("verblijfsobject_id", FieldValue::Text(unit))
            .with("pand_id", FieldValue::Text(building))
    }

    fn address_point(n: u32, unit: &str) -> CandidateRecord {
        CandidateRecord::new(EntityType::AddressPoint, &format!("03632000{:08}", n), Some(1))
            .with(
                "begin_geldigheid",
                FieldValue::DateTime(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()),
            )
            .with("huisnummer", FieldValue::Integer(n as i64))
            .with("verblijfsobject_id", FieldValue::Text(unit.to_string()))
    }

    #[test]
    fn test_sync_twice_is_idempotent() {
        let conn = setup();
        let engine = BulkSyncEngine {
            chunk_size: 2,
            ..BulkSyncEngine::new()
        };
        let batch: Vec<CandidateRecord> = (1..=5).map(|n| building(n, "AA01")).collect();

        let first = engine.sync(&conn, EntityType::Building, batch.clone()).unwrap();
        let rows_first = db::load_buildings(&conn).unwrap();
        let second = engine.sync(&conn, EntityType::Building, batch).unwrap();
        let rows_second = db::load_buildings(&conn).unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        assert_eq!(rows_first, rows_second);
        assert_eq!(digest_keys(&first), digest_keys(&second));
    }

    #[test]
    fn test_prune_removes_untouched_keys() {
        let conn = setup();
        let engine = BulkSyncEngine::new();
        engine
            .sync(&conn, EntityType::Building, (1..=4).map(|n| building(n, "AA01")).collect())
            .unwrap();

        let touched = engine
            .sync(&conn, EntityType::Building, vec![building(2, "AA01"), building(3, "AA02")])
            .unwrap();
        let deleted = engine.prune(&conn, EntityType::Building, &touched).unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(db::natural_keys(&conn, EntityType::Building).unwrap(), touched);
    }

    #[test]
    fn test_excluded_unit_refs_are_filtered() {
        let conn = setup();
        let engine = BulkSyncEngine::new();
        let batch = vec![
            address_point(1, "0363010012582763"),
            address_point(2, "0363010000000002"),
            address_point(3, "0363010011290888"),
        ];

        let touched = engine.sync(&conn, EntityType::AddressPoint, batch).unwrap();

        assert_eq!(touched.len(), 1);
        assert!(touched.contains("0363200000000002"));
    }

    #[test]
    fn test_failed_chunk_keeps_earlier_chunks() {
        let conn = setup();
        let engine = BulkSyncEngine {
            chunk_size: 2,
            ..BulkSyncEngine::new()
        };
        // third record violates NOT NULL on begin_geldigheid
        let mut broken = building(3, "AA01");
        broken.values.insert("begin_geldigheid".to_string(), FieldValue::Null);
        let batch = vec![building(1, "AA01"), building(2, "AA01"), broken, building(4, "AA01")];

        let err = engine.sync(&conn, EntityType::Building, batch).unwrap_err();

        match err {
            SyncError::ChunkFailed {
                chunk_index,
                committed,
                ..
            } => {
                assert_eq!(chunk_index, 1);
                assert_eq!(committed.len(), 2);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(db::count_rows(&conn, EntityType::Building).unwrap(), 2);
    }

    #[test]
    fn test_sync_all_prunes_and_filters_links() {
        let conn = setup();
        let engine = BulkSyncEngine::new();

        // stale rows from an earlier export
        engine.sync(&conn, EntityType::Building, vec![building(9, "ZZ09")]).unwrap();
        engine.sync(&conn, EntityType::Unit, vec![unit(9)]).unwrap();

        let report = engine
            .sync_all(&conn, |t| {
                Ok(match t {
                    EntityType::Building => vec![building(1, "AA01"), building(2, "AA02")],
                    EntityType::Unit => vec![unit(1), unit(2)],
                    // link to the stale unit 9 must not survive
                    EntityType::UnitBuildingLink => vec![link(1, 1), link(2, 2), link(9, 9)],
                    _ => Vec::new(),
                })
            })
            .unwrap();

        assert_eq!(db::count_rows(&conn, EntityType::Building).unwrap(), 2);
        assert_eq!(db::count_rows(&conn, EntityType::Unit).unwrap(), 2);
        assert_eq!(db::count_rows(&conn, EntityType::UnitBuildingLink).unwrap(), 2);
        assert_eq!(report.integrity.unwrap().dropped, 1);
        assert_eq!(report.entities["pand"].pruned, 1);
    }

    #[test]
    fn test_sync_all_rolls_back_on_integrity_violation() {
        let conn = setup();
        let engine = BulkSyncEngine {
            link_orphan_threshold: 1,
            ..BulkSyncEngine::new()
        };
        engine.sync(&conn, EntityType::Building, vec![building(9, "ZZ09")]).unwrap();

        let result = engine.sync_all(&conn, |t| {
            Ok(match t {
                EntityType::Building => vec![building(1, "AA01")],
                EntityType::Unit => (1..=4).map(unit).collect(),
                EntityType::UnitBuildingLink => vec![link(1, 1)],
                _ => Vec::new(),
            })
        });

        assert!(matches!(result, Err(SyncError::ReferentialIntegrityViolation { .. })));
        // nothing of the run persisted; the old row is still there
        assert_eq!(db::count_rows(&conn, EntityType::Unit).unwrap(), 0);
        assert_eq!(
            db::natural_keys(&conn, EntityType::Building).unwrap(),
            ["0363100000000009".to_string()].into_iter().collect()
        );
    }
}
