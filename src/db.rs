use crate::entities::{
    Access, Address, AddressPointRow, BuildingRow, Copyright, DirectPointer, DocumentRecord,
    DossierCase, DossierSource, EntityType, ImportFileStatus, ImportStatus, PlaceNameRow,
    ResolutionStatus, UnitBuildingLinkRow,
};
use crate::error::Result;
use crate::normalizer::CandidateRecord;
use crate::schema::{schema_for, EntitySchema};
use crate::temporal::{parse_date, ValidityInterval};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Event for audit trail: every sync, prune, import and promotion leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Dossier tables exist twice: the import writes `staging_*`, readers use
/// `serving_*`, and a validated import swaps the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Staging,
    Serving,
}

impl Stage {
    fn prefix(&self) -> &'static str {
        match self {
            Stage::Staging => "staging",
            Stage::Serving => "serving",
        }
    }

    pub fn dossiers(&self) -> String {
        format!("{}_dossiers", self.prefix())
    }

    pub fn addresses(&self) -> String {
        format!("{}_addresses", self.prefix())
    }

    pub fn documents(&self) -> String {
        format!("{}_documents", self.prefix())
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Registry replica, one table per entity type
    // ==========================================================================
    for entity_type in EntityType::sync_order() {
        let schema = schema_for(*entity_type);
        conn.execute(&schema.create_table_sql(), [])?;
        for index in schema.create_index_sql() {
            conn.execute(&index, [])?;
        }
    }

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_files (
            name TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            last_processed TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Dossier tables, staging + serving
    // ==========================================================================
    for stage in [Stage::Staging, Stage::Serving] {
        create_dossier_tables(conn, stage)?;
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn create_dossier_tables(conn: &Connection, stage: Stage) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                import_file TEXT,
                case_number TEXT NOT NULL,
                district TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT,
                dossier_type TEXT,
                access TEXT NOT NULL,
                access_restricted_until TEXT,
                source TEXT NOT NULL,
                usage TEXT,
                permit_number TEXT,
                activities TEXT NOT NULL DEFAULT '[]',
                olo_number INTEGER,
                wabo_origin TEXT,
                UNIQUE(district, case_number)
            )",
            stage.dossiers()
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dossier_id INTEGER NOT NULL,
                street TEXT,
                number_from INTEGER,
                number_to INTEGER,
                letter TEXT,
                suffix TEXT,
                locator TEXT,
                district TEXT NOT NULL,
                direct_pointer TEXT NOT NULL DEFAULT '{{}}',
                buildings TEXT NOT NULL DEFAULT '[]',
                units TEXT NOT NULL DEFAULT '[]',
                unit_labels TEXT NOT NULL DEFAULT '[]',
                address_points TEXT NOT NULL DEFAULT '[]',
                address_point_labels TEXT NOT NULL DEFAULT '[]',
                place_name TEXT,
                status TEXT NOT NULL DEFAULT 'unresolved'
            )",
            stage.addresses()
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dossier_id INTEGER NOT NULL,
                barcode TEXT,
                subdossier_title TEXT,
                description TEXT,
                files TEXT NOT NULL DEFAULT '[]',
                original_paths TEXT NOT NULL DEFAULT '[]',
                access TEXT NOT NULL,
                access_restricted_until TEXT,
                copyright TEXT,
                copyright_until TEXT,
                copyright_holders TEXT,
                copyright_manufacturers TEXT
            )",
            stage.documents()
        ),
        [],
    )?;

    Ok(())
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events of one type, oldest first
pub fn get_events(conn: &Connection, event_type: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![event_type], |row| {
            let timestamp_str: String = row.get(1)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: json_column(row, 5)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// REGISTRY REPLICA
// ============================================================================

fn upsert_sql(schema: &EntitySchema) -> String {
    let columns = schema.columns();
    let placeholders: Vec<String> = (1..=columns.len() + 2).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = std::iter::once("version".to_string())
        .chain(columns.iter().cloned())
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {} (natural_key, version, {}) VALUES ({})
         ON CONFLICT(natural_key) DO UPDATE SET {}",
        schema.table(),
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// Insert new keys, overwrite every non-key column of existing ones.
/// Runs in whatever transaction or savepoint the caller holds.
pub fn upsert_records(conn: &Connection, schema: &EntitySchema, records: &[CandidateRecord]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(&upsert_sql(schema))?;
    let columns = schema.columns();
    let null = crate::normalizer::FieldValue::Null;

    for record in records {
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(columns.len() + 2);
        values.push(&record.natural_key);
        values.push(&record.version);
        for column in &columns {
            values.push(record.values.get(column).unwrap_or(&null));
        }
        stmt.execute(values.as_slice())?;
    }

    Ok(records.len())
}

/// Delete every row of `entity_type` whose key is not in `keep`
pub fn delete_except(conn: &Connection, entity_type: EntityType, keep: &HashSet<String>) -> Result<usize> {
    conn.execute(
        "CREATE TEMP TABLE IF NOT EXISTS keep_keys (natural_key TEXT PRIMARY KEY)",
        [],
    )?;
    conn.execute("DELETE FROM temp.keep_keys", [])?;

    {
        let mut insert = conn.prepare_cached("INSERT OR IGNORE INTO temp.keep_keys (natural_key) VALUES (?1)")?;
        for key in keep {
            insert.execute(params![key])?;
        }
    }

    let deleted = conn.execute(
        &format!(
            "DELETE FROM {} WHERE natural_key NOT IN (SELECT natural_key FROM temp.keep_keys)",
            entity_type.table()
        ),
        [],
    )?;
    conn.execute("DELETE FROM temp.keep_keys", [])?;

    Ok(deleted)
}

pub fn natural_keys(conn: &Connection, entity_type: EntityType) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("SELECT natural_key FROM {}", entity_type.table()))?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(keys)
}

pub fn count_rows(conn: &Connection, entity_type: EntityType) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", entity_type.table()), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn like_prefix(prefix: &str) -> String {
    format!("{}%", prefix)
}

fn date_column(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.as_deref().and_then(parse_date))
}

pub fn load_place_names(conn: &Connection, prefix: &str) -> Result<Vec<PlaceNameRow>> {
    let mut stmt = conn.prepare(
        "SELECT natural_key, naam, typecode, begin_geldigheid, einde_geldigheid
         FROM bag_openbareruimte
         WHERE natural_key LIKE ?1
         ORDER BY natural_key",
    )?;
    let rows = stmt
        .query_map(params![like_prefix(prefix)], |row| {
            Ok(PlaceNameRow {
                id: row.get(0)?,
                name: row.get(1)?,
                type_code: row.get(2)?,
                validity: ValidityInterval::new(date_column(row, 3)?, date_column(row, 4)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_address_points(conn: &Connection, prefix: &str) -> Result<Vec<AddressPointRow>> {
    let mut stmt = conn.prepare(
        "SELECT natural_key, huisnummer, huisletter, huisnummer_toevoeging,
                openbare_ruimte_id, verblijfsobject_id
         FROM bag_nummeraanduiding
         WHERE natural_key LIKE ?1
         ORDER BY natural_key",
    )?;
    let rows = stmt
        .query_map(params![like_prefix(prefix)], |row| {
            Ok(AddressPointRow {
                id: row.get(0)?,
                number: row.get(1)?,
                letter: row.get(2)?,
                suffix: row.get(3)?,
                place_name_id: row.get(4)?,
                unit_id: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_buildings(conn: &Connection) -> Result<Vec<BuildingRow>> {
    let mut stmt = conn.prepare("SELECT natural_key, bouwblok FROM bag_pand ORDER BY natural_key")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(BuildingRow {
                id: row.get(0)?,
                block: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_links(conn: &Connection) -> Result<Vec<UnitBuildingLinkRow>> {
    let mut stmt = conn.prepare(
        "SELECT verblijfsobject_id, pand_id FROM bag_verblijfsobjectpandrelatie ORDER BY natural_key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(UnitBuildingLinkRow {
                unit_id: row.get(0)?,
                building_id: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// DOSSIERS
// ============================================================================

fn to_json<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Insert the case row only. A (district, case number) collision comes back
/// as a constraint violation with nothing written.
pub fn insert_case_row(conn: &Connection, stage: Stage, case: &DossierCase, import_file: &str) -> rusqlite::Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} (
                import_file, case_number, district, title, date, dossier_type, access,
                access_restricted_until, source, usage, permit_number, activities,
                olo_number, wabo_origin
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            stage.dossiers()
        ),
        params![
            import_file,
            case.case_number,
            case.district,
            case.title,
            case.date,
            case.dossier_type,
            case.access.as_str(),
            case.access_restricted_until,
            case.source.as_str(),
            case.usage,
            case.permit_number,
            to_json(&case.activities)?,
            case.olo_number,
            case.wabo_origin,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Addresses and documents of a case that was just inserted
pub fn insert_case_children(conn: &Connection, stage: Stage, dossier_id: i64, case: &DossierCase) -> rusqlite::Result<()> {
    let mut address_stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (
            dossier_id, street, number_from, number_to, letter, suffix, locator, district,
            direct_pointer, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        stage.addresses()
    ))?;
    for address in &case.addresses {
        address_stmt.execute(params![
            dossier_id,
            address.street,
            address.number_from,
            address.number_to,
            address.letter,
            address.suffix,
            address.locator,
            address.district,
            to_json(&address.direct)?,
            ResolutionStatus::Unresolved.as_str(),
        ])?;
    }

    let mut document_stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (
            dossier_id, barcode, subdossier_title, description, files, original_paths, access,
            access_restricted_until, copyright, copyright_until, copyright_holders,
            copyright_manufacturers
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        stage.documents()
    ))?;
    for document in &case.documents {
        document_stmt.execute(params![
            dossier_id,
            document.barcode,
            document.subdossier_title,
            document.description,
            to_json(&document.files)?,
            to_json(&document.original_paths)?,
            document.access.as_str(),
            document.access_restricted_until,
            document.copyright.map(|c| c.as_str()),
            document.copyright_until,
            document.copyright_holders,
            document.copyright_manufacturers,
        ])?;
    }

    Ok(())
}

pub fn count_cases(conn: &Connection, stage: Stage) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", stage.dossiers()), [], |row| row.get(0))?;
    Ok(count)
}

fn address_from_row(row: &Row) -> rusqlite::Result<Address> {
    let status: String = row.get(15)?;
    Ok(Address {
        id: row.get(0)?,
        street: row.get(1)?,
        number_from: row.get(2)?,
        number_to: row.get(3)?,
        letter: row.get(4)?,
        suffix: row.get(5)?,
        locator: row.get(6)?,
        district: row.get(7)?,
        direct: json_column::<DirectPointer>(row, 8)?,
        buildings: json_column(row, 9)?,
        units: json_column(row, 10)?,
        unit_labels: json_column(row, 11)?,
        address_points: json_column(row, 12)?,
        address_point_labels: json_column(row, 13)?,
        place_name: row.get(14)?,
        status: ResolutionStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(15, Type::Text, format!("unknown status {}", status).into())
        })?,
    })
}

/// Addresses in id order. With `only_pending`, resolved ones are skipped.
pub fn load_addresses(conn: &Connection, stage: Stage, only_pending: bool) -> Result<Vec<Address>> {
    let filter = if only_pending { "WHERE status != 'resolved'" } else { "" };
    let mut stmt = conn.prepare(&format!(
        "SELECT id, street, number_from, number_to, letter, suffix, locator, district,
                direct_pointer, buildings, units, unit_labels, address_points,
                address_point_labels, place_name, status
         FROM {} {} ORDER BY id",
        stage.addresses(),
        filter
    ))?;
    let rows = stmt
        .query_map([], address_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_address_status(conn: &Connection, stage: Stage, id: i64, status: ResolutionStatus) -> Result<()> {
    conn.execute(
        &format!("UPDATE {} SET status = ?1 WHERE id = ?2", stage.addresses()),
        params![status.as_str(), id],
    )?;
    Ok(())
}

/// Write back everything reconciliation owns on an address row
pub fn update_address_resolution(conn: &Connection, stage: Stage, address: &Address) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET
                buildings = ?1, units = ?2, unit_labels = ?3, address_points = ?4,
                address_point_labels = ?5, place_name = ?6, status = ?7
             WHERE id = ?8",
            stage.addresses()
        ),
        params![
            to_json(&address.buildings)?,
            to_json(&address.units)?,
            to_json(&address.unit_labels)?,
            to_json(&address.address_points)?,
            to_json(&address.address_point_labels)?,
            address.place_name,
            address.status.as_str(),
            address.id,
        ],
    )?;
    Ok(())
}

/// Coverage counters per source tag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageCounts {
    pub total: u64,
    pub with_buildings: u64,
    pub with_address_points: u64,
    pub with_place_name: u64,
}

pub fn coverage_by_source(conn: &Connection, stage: Stage) -> Result<Vec<(DossierSource, CoverageCounts)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT d.source,
                COUNT(a.id),
                SUM(CASE WHEN a.buildings != '[]' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.address_points != '[]' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.place_name IS NOT NULL AND a.place_name != '' THEN 1 ELSE 0 END)
         FROM {} a JOIN {} d ON d.id = a.dossier_id
         GROUP BY d.source
         ORDER BY d.source",
        stage.addresses(),
        stage.dossiers()
    ))?;

    let rows = stmt
        .query_map([], |row| {
            let source: String = row.get(0)?;
            let source = DossierSource::parse(&source).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("unknown source {}", source).into())
            })?;
            Ok((
                source,
                CoverageCounts {
                    total: row.get::<_, i64>(1)? as u64,
                    with_buildings: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    with_address_points: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                    with_place_name: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_documents(conn: &Connection, stage: Stage, dossier_id: i64) -> Result<Vec<DocumentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT barcode, subdossier_title, description, files, original_paths, access,
                access_restricted_until, copyright, copyright_until, copyright_holders,
                copyright_manufacturers
         FROM {} WHERE dossier_id = ?1 ORDER BY id",
        stage.documents()
    ))?;
    let rows = stmt
        .query_map(params![dossier_id], |row| {
            let access: String = row.get(5)?;
            let copyright: Option<String> = row.get(7)?;
            Ok(DocumentRecord {
                barcode: row.get(0)?,
                subdossier_title: row.get(1)?,
                description: row.get(2)?,
                files: json_column(row, 3)?,
                original_paths: json_column(row, 4)?,
                access: Access::parse(&access).unwrap_or(Access::Restricted),
                access_restricted_until: row.get(6)?,
                copyright: copyright.map(|c| if c == "Y" { Copyright::Yes } else { Copyright::No }),
                copyright_until: row.get(8)?,
                copyright_holders: row.get(9)?,
                copyright_manufacturers: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Case id by natural key
pub fn find_case_id(conn: &Connection, stage: Stage, district: &str, case_number: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE district = ?1 AND case_number = ?2", stage.dossiers()),
            params![district, case_number],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn truncate_staging(conn: &Connection) -> Result<()> {
    let stage = Stage::Staging;
    conn.execute_batch(&format!(
        "DELETE FROM {}; DELETE FROM {}; DELETE FROM {};",
        stage.documents(),
        stage.addresses(),
        stage.dossiers()
    ))?;
    Ok(())
}

/// Swap staging and serving dossier tables in one transaction. The old
/// serving data ends up in staging and is truncated by the next import.
pub fn promote(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for (staging, serving) in [
        (Stage::Staging.dossiers(), Stage::Serving.dossiers()),
        (Stage::Staging.addresses(), Stage::Serving.addresses()),
        (Stage::Staging.documents(), Stage::Serving.documents()),
    ] {
        let temp = format!("swap_{}", serving);
        tx.execute_batch(&format!(
            "ALTER TABLE {serving} RENAME TO {temp};
             ALTER TABLE {staging} RENAME TO {serving};
             ALTER TABLE {temp} RENAME TO {staging};"
        ))?;
    }
    tx.commit()?;
    Ok(())
}

// ============================================================================
// IMPORT FILES
// ============================================================================

pub fn get_import_file(conn: &Connection, name: &str) -> Result<Option<ImportFileStatus>> {
    let row = conn
        .query_row(
            "SELECT name, status, last_processed FROM import_files WHERE name = ?1",
            params![name],
            |row| {
                let status: String = row.get(1)?;
                Ok(ImportFileStatus {
                    name: row.get(0)?,
                    status: ImportStatus::parse(&status).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            Type::Text,
                            format!("unknown import status {}", status).into(),
                        )
                    })?,
                    last_processed: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn set_import_file_status(conn: &Connection, name: &str, status: ImportStatus) -> Result<()> {
    conn.execute(
        "INSERT INTO import_files (name, status, last_processed) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET status = excluded.status, last_processed = excluded.last_processed",
        params![name, status.as_str(), Utc::now()],
    )?;
    Ok(())
}

pub fn list_import_files(conn: &Connection) -> Result<Vec<ImportFileStatus>> {
    let mut stmt = conn.prepare("SELECT name FROM import_files ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        if let Some(file) = get_import_file(conn, &name)? {
            files.push(file);
        }
    }
    Ok(files)
}

/// Forget all file bookkeeping; a fresh (non-resume) import starts from scratch
pub fn clear_import_files(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM import_files", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::FieldValue;

    fn create_test_building(key: &str, version: i64, block: &str) -> CandidateRecord {
        CandidateRecord::new(EntityType::Building, key, Some(version))
            .with(
                "begin_geldigheid",
                FieldValue::Date(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap()),
            )
            .with("bouwblok", FieldValue::Text(block.to_string()))
    }

    fn create_test_case(number: &str) -> DossierCase {
        let mut case = DossierCase::new(number, "SA", "Hoogte Kadijk 40", DossierSource::Edepot);
        case.addresses
            .push(Address::new(Some("Hoogte Kadijk"), Some(40), Some(40), "SA"));
        let mut document = DocumentRecord::new(Access::Public);
        document.barcode = Some("SA00000123_00001".to_string());
        document.files = vec!["SA/00123/SA00000123_00001.jpg".to_string()];
        case.documents.push(document);
        case
    }

    #[test]
    fn test_upsert_overwrites_existing_keys() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let schema = schema_for(EntityType::Building);

        upsert_records(&conn, schema, &[create_test_building("0363100000000001", 1, "AA01")]).unwrap();
        upsert_records(&conn, schema, &[create_test_building("0363100000000001", 2, "AB02")]).unwrap();

        let rows = load_buildings(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].block.as_deref(), Some("AB02"));
        assert_eq!(count_rows(&conn, EntityType::Building).unwrap(), 1);
    }

    #[test]
    fn test_delete_except() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let schema = schema_for(EntityType::Building);
        upsert_records(
            &conn,
            schema,
            &[
                create_test_building("0363100000000001", 1, "AA01"),
                create_test_building("0363100000000002", 1, "AA01"),
                create_test_building("0363100000000003", 1, "AA01"),
            ],
        )
        .unwrap();

        let keep: HashSet<String> = ["0363100000000002".to_string()].into_iter().collect();
        let deleted = delete_except(&conn, EntityType::Building, &keep).unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(natural_keys(&conn, EntityType::Building).unwrap(), keep);
    }

    #[test]
    fn test_duplicate_case_is_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let case = create_test_case("00123");

        insert_case_row(&conn, Stage::Staging, &case, "SAA_BWT_01.xml").unwrap();
        let err = insert_case_row(&conn, Stage::Staging, &case, "SAA_BWT_01.xml").unwrap_err();

        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        ));
        assert_eq!(count_cases(&conn, Stage::Staging).unwrap(), 1);
    }

    #[test]
    fn test_address_roundtrip_and_resolution() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let case = create_test_case("00123");
        let id = insert_case_row(&conn, Stage::Staging, &case, "f.xml").unwrap();
        insert_case_children(&conn, Stage::Staging, id, &case).unwrap();

        let mut addresses = load_addresses(&conn, Stage::Staging, true).unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].status, ResolutionStatus::Unresolved);
        assert!(addresses[0].direct.is_empty());

        let mut address = addresses.remove(0);
        address.buildings = vec!["0363100000000001".to_string()];
        address.place_name = Some("0363300000000001".to_string());
        address.status = ResolutionStatus::Resolved;
        update_address_resolution(&conn, Stage::Staging, &address).unwrap();

        assert!(load_addresses(&conn, Stage::Staging, true).unwrap().is_empty());
        let all = load_addresses(&conn, Stage::Staging, false).unwrap();
        assert_eq!(all[0].buildings, vec!["0363100000000001".to_string()]);

        let documents = load_documents(&conn, Stage::Staging, id).unwrap();
        assert_eq!(documents[0].barcode.as_deref(), Some("SA00000123_00001"));
        assert_eq!(documents[0].access, Access::Public);
    }

    #[test]
    fn test_promote_swaps_tables() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let case = create_test_case("00123");
        insert_case_row(&conn, Stage::Staging, &case, "f.xml").unwrap();

        promote(&conn).unwrap();

        assert_eq!(count_cases(&conn, Stage::Serving).unwrap(), 1);
        assert_eq!(count_cases(&conn, Stage::Staging).unwrap(), 0);
        assert!(find_case_id(&conn, Stage::Serving, "SA", "00123").unwrap().is_some());

        // setup is idempotent after a swap
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_import_file_status() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(get_import_file(&conn, "a.xml").unwrap().is_none());
        set_import_file_status(&conn, "a.xml", ImportStatus::Busy).unwrap();
        set_import_file_status(&conn, "a.xml", ImportStatus::Finished).unwrap();

        let file = get_import_file(&conn, "a.xml").unwrap().unwrap();
        assert_eq!(file.status, ImportStatus::Finished);
        assert_eq!(list_import_files(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "registry_synced",
            "pand",
            "run-1",
            serde_json::json!({"touched": 3}),
            "bulk_sync",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events(&conn, "registry_synced").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_type, "pand");
        assert_eq!(events[0].data["touched"], 3);
    }
}
