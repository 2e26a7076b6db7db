// Dossier Entities - building-permit archive
//
// A case is unique on (district, case number). Addresses and documents
// belong to exactly one case and are written together with it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CODES
// ============================================================================

/// Which archive schema a case was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DossierSource {
    /// Legacy e-depot export (`bwtDossiers`)
    Edepot,
    /// WABO-era export (`dossiers`)
    Wabo,
}

impl DossierSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DossierSource::Edepot => "EDEPOT",
            DossierSource::Wabo => "WABO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EDEPOT" => Some(DossierSource::Edepot),
            "WABO" => Some(DossierSource::Wabo),
            _ => None,
        }
    }

    pub fn all() -> [DossierSource; 2] {
        [DossierSource::Edepot, DossierSource::Wabo]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Public,
    Restricted,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Public => "PUBLIC",
            Access::Restricted => "RESTRICTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUBLIC" => Some(Access::Public),
            "RESTRICTED" => Some(Access::Restricted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Copyright {
    Yes,
    No,
}

impl Copyright {
    pub fn as_str(&self) -> &'static str {
        match self {
            Copyright::Yes => "Y",
            Copyright::No => "N",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    Pending,
    Busy,
    Finished,
    Error,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Busy => "busy",
            ImportStatus::Finished => "finished",
            ImportStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ImportStatus::Pending),
            "busy" => Some(ImportStatus::Busy),
            "finished" => Some(ImportStatus::Finished),
            "error" => Some(ImportStatus::Error),
            _ => None,
        }
    }
}

/// Reconciliation state of one address. An address that matched nothing
/// still ends up `Resolved` with empty sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Unresolved,
    Resolving,
    Resolved,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Unresolved => "unresolved",
            ResolutionStatus::Resolving => "resolving",
            ResolutionStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(ResolutionStatus::Unresolved),
            "resolving" => Some(ResolutionStatus::Resolving),
            "resolved" => Some(ResolutionStatus::Resolved),
            _ => None,
        }
    }
}

// ============================================================================
// DOSSIER CASE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DossierCase {
    pub case_number: String,
    pub district: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub dossier_type: Option<String>,
    pub access: Access,
    pub access_restricted_until: Option<NaiveDate>,
    pub source: DossierSource,

    // Supplemental, schema dependent
    pub usage: Option<String>,
    pub permit_number: Option<String>,
    pub activities: Vec<String>,
    pub olo_number: Option<i64>,
    /// `bron` of a WABO case (e.g. `BWT`)
    pub wabo_origin: Option<String>,

    pub addresses: Vec<Address>,
    pub documents: Vec<DocumentRecord>,
}

impl DossierCase {
    pub fn new(case_number: &str, district: &str, title: &str, source: DossierSource) -> Self {
        DossierCase {
            case_number: case_number.to_string(),
            district: district.to_string(),
            title: title.to_string(),
            date: None,
            dossier_type: None,
            access: Access::Restricted,
            access_restricted_until: None,
            source,
            usage: None,
            permit_number: None,
            activities: Vec::new(),
            olo_number: None,
            wabo_origin: None,
            addresses: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Natural key used in logs and in the enrichment file
    pub fn key(&self) -> String {
        format!("{}_{}", self.district, self.case_number)
    }
}

// ============================================================================
// ADDRESS
// ============================================================================

/// Registry identifiers the archive supplied itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectPointer {
    pub buildings: Vec<String>,
    pub units: Vec<String>,
    pub address_points: Vec<String>,
    pub place_name: Option<String>,
}

impl DirectPointer {
    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
            && self.units.is_empty()
            && self.address_points.is_empty()
            && self.place_name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Row id once stored
    pub id: Option<i64>,
    pub street: Option<String>,
    pub number_from: Option<i64>,
    pub number_to: Option<i64>,
    pub letter: Option<String>,
    pub suffix: Option<String>,
    pub locator: Option<String>,
    pub district: String,
    pub direct: DirectPointer,

    // Written by reconciliation only
    pub buildings: Vec<String>,
    pub units: Vec<String>,
    pub unit_labels: Vec<String>,
    pub address_points: Vec<String>,
    pub address_point_labels: Vec<String>,
    pub place_name: Option<String>,
    pub status: ResolutionStatus,
}

impl Address {
    pub fn new(street: Option<&str>, number_from: Option<i64>, number_to: Option<i64>, district: &str) -> Self {
        Address {
            id: None,
            street: street.map(str::to_string),
            number_from,
            number_to,
            letter: None,
            suffix: None,
            locator: None,
            district: district.to_string(),
            direct: DirectPointer::default(),
            buildings: Vec::new(),
            units: Vec::new(),
            unit_labels: Vec::new(),
            address_points: Vec::new(),
            address_point_labels: Vec::new(),
            place_name: None,
            status: ResolutionStatus::Unresolved,
        }
    }

    /// House-number range as (low, high); an open end means a single
    /// number. Archive ranges entered high-to-low are flipped.
    pub fn range(&self) -> Option<(i64, i64)> {
        match (self.number_from, self.number_to) {
            (Some(from), Some(to)) => Some((from.min(to), from.max(to))),
            (Some(from), None) => Some((from, from)),
            (None, Some(to)) => Some((to, to)),
            (None, None) => None,
        }
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub barcode: Option<String>,
    pub subdossier_title: Option<String>,
    pub description: Option<String>,
    pub files: Vec<String>,
    pub original_paths: Vec<String>,
    pub access: Access,
    pub access_restricted_until: Option<NaiveDate>,
    pub copyright: Option<Copyright>,
    pub copyright_until: Option<NaiveDate>,
    pub copyright_holders: Option<String>,
    pub copyright_manufacturers: Option<String>,
}

impl DocumentRecord {
    pub fn new(access: Access) -> Self {
        DocumentRecord {
            barcode: None,
            subdossier_title: None,
            description: None,
            files: Vec::new(),
            original_paths: Vec::new(),
            access,
            access_restricted_until: None,
            copyright: None,
            copyright_until: None,
            copyright_holders: None,
            copyright_manufacturers: None,
        }
    }
}

// ============================================================================
// IMPORT FILE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFileStatus {
    pub name: String,
    pub status: ImportStatus,
    pub last_processed: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_range_is_single_number() {
        let addr = Address::new(Some("Hoogte Kadijk"), Some(40), None, "SA");
        assert_eq!(addr.range(), Some((40, 40)));
        assert_eq!(addr.status, ResolutionStatus::Unresolved);

        let none = Address::new(Some("Hoogte Kadijk"), None, None, "SA");
        assert_eq!(none.range(), None);
    }

    #[test]
    fn test_reversed_range_is_flipped() {
        let addr = Address::new(Some("Hoogte Kadijk"), Some(44), Some(38), "SA");
        assert_eq!(addr.range(), Some((38, 44)));
    }

    #[test]
    fn test_codes_roundtrip() {
        for s in [
            ImportStatus::Pending,
            ImportStatus::Busy,
            ImportStatus::Finished,
            ImportStatus::Error,
        ] {
            assert_eq!(ImportStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DossierSource::parse("WABO"), Some(DossierSource::Wabo));
        assert_eq!(Access::parse("PUBLIC"), Some(Access::Public));
        assert_eq!(ResolutionStatus::parse("resolving"), Some(ResolutionStatus::Resolving));
    }

    #[test]
    fn test_case_key() {
        let case = DossierCase::new("00123", "SA", "Pand", DossierSource::Edepot);
        assert_eq!(case.key(), "SA_00123");
        assert_eq!(case.access, Access::Restricted);
    }
}
