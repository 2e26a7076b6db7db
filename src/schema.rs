// 📐 Shape Layer - static schema descriptors
//
// One descriptor per registry entity type: which source column feeds which
// stored field, what it is coerced to, whether it may be empty, and whether
// it references another entity type. Everything the normalizer and the
// upsert SQL need is derived from these tables; nothing is discovered at
// runtime.

use crate::entities::EntityType;

// ============================================================================
// FIELD DESCRIPTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    Date,
    DateTime,
}

impl FieldKind {
    fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Text | FieldKind::Date | FieldKind::DateTime => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Header in the export; matched case-insensitively
    pub source_column: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Referenced entity type; the stored column becomes `{name}_id`
    pub foreign_key: Option<EntityType>,
}

impl FieldDescriptor {
    const fn new(name: &'static str, source_column: &'static str, kind: FieldKind, nullable: bool) -> Self {
        FieldDescriptor {
            name,
            source_column,
            kind,
            nullable,
            foreign_key: None,
        }
    }

    const fn reference(name: &'static str, source_column: &'static str, target: EntityType, nullable: bool) -> Self {
        FieldDescriptor {
            name,
            source_column,
            kind: FieldKind::Text,
            nullable,
            foreign_key: Some(target),
        }
    }

    /// Stored column name
    pub fn column(&self) -> String {
        match self.foreign_key {
            Some(_) => format!("{}_id", self.name),
            None => self.name.to_string(),
        }
    }
}

/// Where the natural key comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Column(&'static str),
    /// Joined with `:` in the given order
    Composite(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub key: KeySpec,
    /// Source column with the version number; junction rows have none
    pub version_column: Option<&'static str>,
    pub fields: &'static [FieldDescriptor],
}

impl EntitySchema {
    pub fn table(&self) -> &'static str {
        self.entity_type.table()
    }

    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column()).collect()
    }

    pub fn field(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.column() == column)
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    natural_key TEXT PRIMARY KEY,\n    version INTEGER",
            self.table()
        );
        for field in self.fields {
            sql.push_str(&format!(",\n    {} {}", field.column(), field.kind.sql_type()));
            if !field.nullable {
                sql.push_str(" NOT NULL");
            }
        }
        sql.push_str("\n)");
        sql
    }

    /// Indexes on every reference column, used by reconciliation lookups
    pub fn create_index_sql(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.foreign_key.is_some() || f.name == "bouwblok" || f.name == "naam")
            .map(|f| {
                let column = f.column();
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
                    table = self.table(),
                    column = column
                )
            })
            .collect()
    }
}

// ============================================================================
// REGISTRY SCHEMAS
// ============================================================================

use FieldKind::{Boolean, Date, DateTime, Integer, Text};

const IDENTIFICATION: KeySpec = KeySpec::Column("identificatie");
const VERSION: Option<&str> = Some("volgnummer");

/// Ligplaats and standplaats share their shape
const PLOT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("begin_geldigheid", "begingeldigheid", Date, false),
    FieldDescriptor::new("einde_geldigheid", "eindgeldigheid", Date, true),
    FieldDescriptor::new("status", "statusomschrijving", Text, true),
    FieldDescriptor::new("geconstateerd", "geconstateerd", Boolean, true),
    FieldDescriptor::new("buurt", "ligtinbuurtid", Text, true),
    FieldDescriptor::new("hoofdadres", "heefthoofdadresid", Text, true),
    FieldDescriptor::new("geometrie", "geometrie", Text, true),
];

const PLACE_NAME_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("begin_geldigheid", "begingeldigheid", Date, false),
    FieldDescriptor::new("einde_geldigheid", "eindgeldigheid", Date, true),
    FieldDescriptor::new("naam", "naam", Text, false),
    FieldDescriptor::new("naam_nen", "naamnen", Text, true),
    FieldDescriptor::new("type", "typeomschrijving", Text, true),
    FieldDescriptor::new("typecode", "typecode", Text, true),
    FieldDescriptor::new("woonplaats", "ligtinwoonplaatsid", Text, true),
    FieldDescriptor::new("status", "statusomschrijving", Text, true),
    FieldDescriptor::new("geometrie", "geometrie", Text, true),
];

const BUILDING_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("begin_geldigheid", "begingeldigheid", Date, false),
    FieldDescriptor::new("einde_geldigheid", "eindgeldigheid", Date, true),
    FieldDescriptor::new("bouwjaar", "oorspronkelijkbouwjaar", Integer, true),
    FieldDescriptor::new("bouwblok", "ligtinbouwblokid", Text, true),
    FieldDescriptor::new("ligging", "liggingomschrijving", Text, true),
    FieldDescriptor::new("status", "statusomschrijving", Text, true),
    FieldDescriptor::new("geometrie", "geometrie", Text, true),
];

const UNIT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("begin_geldigheid", "begingeldigheid", Date, false),
    FieldDescriptor::new("einde_geldigheid", "eindgeldigheid", Date, true),
    FieldDescriptor::new("oppervlakte", "oppervlakte", Integer, true),
    FieldDescriptor::new("gebruiksdoel", "feitelijkgebruikomschrijving", Text, true),
    FieldDescriptor::new("hoofdadres", "heefthoofdadresid", Text, true),
    FieldDescriptor::new("status", "statusomschrijving", Text, true),
    FieldDescriptor::new("geometrie", "geometrie", Text, true),
];

const ADDRESS_POINT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("begin_geldigheid", "begingeldigheid", DateTime, false),
    FieldDescriptor::new("eind_geldigheid", "eindgeldigheid", DateTime, true),
    FieldDescriptor::new("huisnummer", "huisnummer", Integer, false),
    FieldDescriptor::new("huisletter", "huisletter", Text, true),
    FieldDescriptor::new("huisnummer_toevoeging", "huisnummertoevoeging", Text, true),
    FieldDescriptor::new("postcode", "postcode", Text, true),
    FieldDescriptor::new("type_adres", "typeadres", Text, true),
    FieldDescriptor::new("status", "statusomschrijving", Text, true),
    FieldDescriptor::reference("openbare_ruimte", "ligtaanopenbareruimteid", EntityType::PlaceName, true),
    FieldDescriptor::reference("verblijfsobject", "adresseertverblijfsobjectid", EntityType::Unit, true),
    FieldDescriptor::reference("ligplaats", "adresseertligplaatsid", EntityType::Mooring, true),
    FieldDescriptor::reference("standplaats", "adresseertstandplaatsid", EntityType::Pitch, true),
];

const LINK_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::reference("verblijfsobject", "verblijfsobjectenidentificatie", EntityType::Unit, false),
    FieldDescriptor::reference("pand", "ligtinpandenidentificatie", EntityType::Building, false),
];

static MOORING: EntitySchema = EntitySchema {
    entity_type: EntityType::Mooring,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: PLOT_FIELDS,
};

static PITCH: EntitySchema = EntitySchema {
    entity_type: EntityType::Pitch,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: PLOT_FIELDS,
};

static PLACE_NAME: EntitySchema = EntitySchema {
    entity_type: EntityType::PlaceName,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: PLACE_NAME_FIELDS,
};

static BUILDING: EntitySchema = EntitySchema {
    entity_type: EntityType::Building,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: BUILDING_FIELDS,
};

static UNIT: EntitySchema = EntitySchema {
    entity_type: EntityType::Unit,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: UNIT_FIELDS,
};

static ADDRESS_POINT: EntitySchema = EntitySchema {
    entity_type: EntityType::AddressPoint,
    key: IDENTIFICATION,
    version_column: VERSION,
    fields: ADDRESS_POINT_FIELDS,
};

static UNIT_BUILDING_LINK: EntitySchema = EntitySchema {
    entity_type: EntityType::UnitBuildingLink,
    key: KeySpec::Composite(&["verblijfsobjectenidentificatie", "ligtinpandenidentificatie"]),
    version_column: None,
    fields: LINK_FIELDS,
};

pub fn schema_for(entity_type: EntityType) -> &'static EntitySchema {
    match entity_type {
        EntityType::Mooring => &MOORING,
        EntityType::Pitch => &PITCH,
        EntityType::PlaceName => &PLACE_NAME,
        EntityType::Building => &BUILDING,
        EntityType::Unit => &UNIT,
        EntityType::AddressPoint => &ADDRESS_POINT,
        EntityType::UnitBuildingLink => &UNIT_BUILDING_LINK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_keys_get_id_suffix() {
        let schema = schema_for(EntityType::AddressPoint);
        let columns = schema.columns();

        assert!(columns.contains(&"openbare_ruimte_id".to_string()));
        assert!(columns.contains(&"verblijfsobject_id".to_string()));
        assert!(columns.contains(&"huisnummer".to_string()));
        assert!(!columns.contains(&"openbare_ruimte".to_string()));
    }

    #[test]
    fn test_every_type_has_a_schema() {
        for t in EntityType::sync_order() {
            let schema = schema_for(*t);
            assert_eq!(schema.entity_type, *t);
            assert!(!schema.fields.is_empty());
        }
        assert!(schema_for(EntityType::UnitBuildingLink).version_column.is_none());
    }

    #[test]
    fn test_create_table_sql() {
        let sql = schema_for(EntityType::Building).create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS bag_pand"));
        assert!(sql.contains("natural_key TEXT PRIMARY KEY"));
        assert!(sql.contains("begin_geldigheid TEXT NOT NULL"));
        assert!(sql.contains("bouwblok TEXT,"));

        let index = schema_for(EntityType::Building).create_index_sql();
        assert_eq!(index.len(), 1);
        assert!(index[0].contains("bag_pand(bouwblok)"));
    }
}
