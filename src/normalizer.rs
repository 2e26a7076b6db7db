// Ingestion Normalizer - raw export rows -> typed candidate records
//
// Field renaming, coercion and nullability all come from the static
// descriptors in schema.rs. A row that cannot be normalized is reported as
// MalformedRecord; callers skip it and keep going.

use crate::entities::EntityType;
use crate::error::{Result, SyncError};
use crate::identifiers::validate_natural_key;
use crate::schema::{EntitySchema, FieldDescriptor, FieldKind, KeySpec};
use crate::temporal::{parse_date, parse_datetime};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

// ============================================================================
// RAW RECORD
// ============================================================================

/// One row as delivered: header -> value. Headers are lowercased on
/// construction so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    values: HashMap<String, String>,
    /// Position in the source file, for log lines
    pub line: u64,
}

impl RawRecord {
    pub fn from_pairs<I, K, V>(pairs: I, line: u64) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        RawRecord {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v.into()))
                .collect(),
            line,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(&column.to_lowercase()).map(|s| s.as_str())
    }

    /// Trimmed value, `None` when absent or blank
    fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }
}

// ============================================================================
// CANDIDATE RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Boolean(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::Date(d) => ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string())),
            FieldValue::DateTime(dt) => {
                ToSqlOutput::Owned(Value::Text(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
            }
        })
    }
}

/// A normalized row, ready for dedup and upsert. `values` is keyed by the
/// stored column name.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub entity_type: EntityType,
    pub natural_key: String,
    pub version: Option<i64>,
    pub values: BTreeMap<String, FieldValue>,
}

impl CandidateRecord {
    pub fn new(entity_type: EntityType, natural_key: &str, version: Option<i64>) -> Self {
        CandidateRecord {
            entity_type,
            natural_key: natural_key.to_string(),
            version,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: FieldValue) -> Self {
        self.values.insert(column.to_string(), value);
        self
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(FieldValue::as_text)
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Time of day for date-only datetime values; `None` = wall clock
    pub date_only_time: Option<NaiveTime>,
}

pub fn normalize(raw: &RawRecord, schema: &EntitySchema, options: NormalizeOptions) -> Result<CandidateRecord> {
    let entity = schema.entity_type.name();
    let natural_key = natural_key(raw, schema)?;

    let version = match schema.version_column {
        Some(column) => {
            let text = raw
                .non_empty(column)
                .ok_or_else(|| SyncError::malformed(entity, &natural_key, format!("{} is empty", column)))?;
            Some(text.parse::<i64>().map_err(|_| {
                SyncError::malformed(entity, &natural_key, format!("{} is not a number: {}", column, text))
            })?)
        }
        None => None,
    };

    let mut record = CandidateRecord::new(schema.entity_type, &natural_key, version);
    for field in schema.fields {
        let value = match raw.non_empty(field.source_column) {
            None if field.nullable => FieldValue::Null,
            None => {
                return Err(SyncError::malformed(
                    entity,
                    &natural_key,
                    format!("{} is required", field.source_column),
                ))
            }
            Some(text) => coerce(text, field, options).ok_or_else(|| {
                SyncError::malformed(
                    entity,
                    &natural_key,
                    format!("{} has unparseable value {:?}", field.source_column, text),
                )
            })?,
        };
        record.values.insert(field.column(), value);
    }

    Ok(record)
}

fn natural_key(raw: &RawRecord, schema: &EntitySchema) -> Result<String> {
    let entity = schema.entity_type.name();
    match schema.key {
        KeySpec::Column(column) => {
            let key = raw.non_empty(column).ok_or_else(|| {
                SyncError::malformed(entity, &format!("line {}", raw.line), format!("{} is empty", column))
            })?;
            validate_natural_key(key, schema.entity_type, None)?;
            Ok(key.to_string())
        }
        KeySpec::Composite(columns) => {
            let mut parts = Vec::with_capacity(columns.len());
            for column in columns {
                let part = raw.non_empty(column).ok_or_else(|| {
                    SyncError::malformed(entity, &format!("line {}", raw.line), format!("{} is empty", column))
                })?;
                parts.push(part);
            }
            Ok(parts.join(":"))
        }
    }
}

fn coerce(text: &str, field: &FieldDescriptor, options: NormalizeOptions) -> Option<FieldValue> {
    match field.kind {
        FieldKind::Text => Some(FieldValue::Text(text.to_string())),
        FieldKind::Integer => text.parse().ok().map(FieldValue::Integer),
        FieldKind::Boolean => parse_bool(text).map(FieldValue::Boolean),
        FieldKind::Date => parse_date(text).map(FieldValue::Date),
        FieldKind::DateTime => parse_datetime(text, options.date_only_time).map(FieldValue::DateTime),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_lowercase().as_str() {
        "true" | "t" | "1" | "j" | "ja" | "y" | "yes" => Some(true),
        "false" | "f" | "0" | "n" | "nee" | "no" => Some(false),
        _ => None,
    }
}

/// Batch counters for one normalization run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub skipped: usize,
}

/// Normalize a whole stream. Malformed rows are logged and dropped.
pub fn normalize_all<I>(
    rows: I,
    schema: &EntitySchema,
    options: NormalizeOptions,
) -> (Vec<CandidateRecord>, NormalizeStats)
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut stats = NormalizeStats::default();
    let mut out = Vec::new();

    for raw in rows {
        match normalize(&raw, schema, options) {
            Ok(record) => {
                stats.accepted += 1;
                out.push(record);
            }
            Err(e) => {
                stats.skipped += 1;
                warn!(entity = %schema.entity_type, line = raw.line, error = %e, "skipping record");
            }
        }
    }

    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema_for;

    fn address_point_row(pairs: &[(&str, &str)]) -> RawRecord {
        let mut base: Vec<(&str, &str)> = vec![
            ("Identificatie", "0363200000123456"),
            ("Volgnummer", "3"),
            ("BeginGeldigheid", "2018-10-22"),
            ("EindGeldigheid", ""),
            ("Huisnummer", "40"),
            ("Huisletter", ""),
            ("LigtAanOpenbareruimteId", "0363300000004321"),
            ("AdresseertVerblijfsobjectId", "0363010000654321"),
        ];
        for &(k, v) in pairs {
            base.retain(|(bk, _)| !bk.eq_ignore_ascii_case(k));
            base.push((k, v));
        }
        RawRecord::from_pairs(base, 2)
    }

    fn pinned() -> NormalizeOptions {
        NormalizeOptions {
            date_only_time: NaiveTime::from_hms_opt(0, 0, 0),
        }
    }

    #[test]
    fn test_renames_and_coerces() {
        let schema = schema_for(EntityType::AddressPoint);
        let record = normalize(&address_point_row(&[]), schema, pinned()).unwrap();

        assert_eq!(record.natural_key, "0363200000123456");
        assert_eq!(record.version, Some(3));
        assert_eq!(record.values["huisnummer"], FieldValue::Integer(40));
        assert_eq!(record.text("openbare_ruimte_id"), Some("0363300000004321"));
        assert_eq!(record.text("verblijfsobject_id"), Some("0363010000654321"));
        assert_eq!(record.values["huisletter"], FieldValue::Null);
        assert_eq!(record.values["eind_geldigheid"], FieldValue::Null);
        // column absent from the row entirely
        assert_eq!(record.values["postcode"], FieldValue::Null);
        assert_eq!(
            record.values["begin_geldigheid"],
            FieldValue::DateTime(NaiveDate::from_ymd_opt(2018, 10, 22).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_empty_required_field_is_malformed() {
        let schema = schema_for(EntityType::AddressPoint);
        let err = normalize(&address_point_row(&[("huisnummer", "")]), schema, pinned()).unwrap_err();

        assert!(err.is_record_level());
        assert!(err.to_string().contains("huisnummer is required"));
    }

    #[test]
    fn test_unparseable_values_are_malformed() {
        let schema = schema_for(EntityType::AddressPoint);

        let bad_number = normalize(&address_point_row(&[("huisnummer", "40a")]), schema, pinned());
        assert!(matches!(bad_number, Err(SyncError::MalformedRecord { .. })));

        let bad_version = normalize(&address_point_row(&[("volgnummer", "v3")]), schema, pinned());
        assert!(bad_version.is_err());

        let bad_key = normalize(&address_point_row(&[("identificatie", "0363100000123456")]), schema, pinned());
        assert!(bad_key.is_err());
    }

    #[test]
    fn test_link_composite_key() {
        let schema = schema_for(EntityType::UnitBuildingLink);
        let raw = RawRecord::from_pairs(
            vec![
                ("verblijfsobjectenIdentificatie", "0363010000000001"),
                ("ligtInPandenIdentificatie", "0363100000000001"),
            ],
            2,
        );

        let record = normalize(&raw, schema, pinned()).unwrap();

        assert_eq!(record.natural_key, "0363010000000001:0363100000000001");
        assert_eq!(record.version, None);
        assert_eq!(record.text("pand_id"), Some("0363100000000001"));
    }

    #[test]
    fn test_normalize_all_skips_bad_rows() {
        let schema = schema_for(EntityType::AddressPoint);
        let rows = vec![
            address_point_row(&[]),
            address_point_row(&[("huisnummer", "")]),
            address_point_row(&[("identificatie", "0363200000999999")]),
        ];

        let (records, stats) = normalize_all(rows, schema, pinned());

        assert_eq!(records.len(), 2);
        assert_eq!(stats, NormalizeStats { accepted: 2, skipped: 1 });
    }

    #[test]
    fn test_boolean_values() {
        assert_eq!(parse_bool("J"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("misschien"), None);
    }
}
