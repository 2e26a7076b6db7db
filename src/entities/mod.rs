// Entity Models
//
// Registry side: six object types from the national buildings-and-addresses
// registry plus the unit <-> building junction. Each is identified by a
// 16-character natural key that never changes; versions of the same key
// replace each other.
//
// Archive side: dossier cases, their addresses and documents, and the
// per-file import bookkeeping.

pub mod dossier;
pub mod registry;

pub use dossier::{
    Access, Address, Copyright, DirectPointer, DocumentRecord, DossierCase, DossierSource, ImportFileStatus,
    ImportStatus, ResolutionStatus,
};
pub use registry::{AddressPointRow, BuildingRow, PlaceNameRow, UnitBuildingLinkRow};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ENTITY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    /// Ligplaats - mooring for a houseboat
    Mooring,
    /// Standplaats - pitch for a caravan or trailer
    Pitch,
    /// Openbare ruimte - street, square, quay, ...
    PlaceName,
    /// Pand
    Building,
    /// Verblijfsobject - dwelling or other addressable unit inside a building
    Unit,
    /// Nummeraanduiding - house number on a place name
    AddressPoint,
    /// Verblijfsobject <-> Pand junction
    UnitBuildingLink,
}

const SYNC_ORDER: [EntityType; 7] = [
    EntityType::PlaceName,
    EntityType::Mooring,
    EntityType::Pitch,
    EntityType::Building,
    EntityType::Unit,
    EntityType::AddressPoint,
    EntityType::UnitBuildingLink,
];

impl EntityType {
    /// Stable short name, used for config keys, audit events and logging
    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Mooring => "ligplaats",
            EntityType::Pitch => "standplaats",
            EntityType::PlaceName => "openbareruimte",
            EntityType::Building => "pand",
            EntityType::Unit => "verblijfsobject",
            EntityType::AddressPoint => "nummeraanduiding",
            EntityType::UnitBuildingLink => "verblijfsobjectpandrelatie",
        }
    }

    /// Replica table holding rows of this type
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Mooring => "bag_ligplaats",
            EntityType::Pitch => "bag_standplaats",
            EntityType::PlaceName => "bag_openbareruimte",
            EntityType::Building => "bag_pand",
            EntityType::Unit => "bag_verblijfsobject",
            EntityType::AddressPoint => "bag_nummeraanduiding",
            EntityType::UnitBuildingLink => "bag_verblijfsobjectpandrelatie",
        }
    }

    /// File name of the export this type is delivered in
    pub fn default_source(&self) -> &'static str {
        match self {
            EntityType::Mooring => "bag_ligplaatsen.csv.zip",
            EntityType::Pitch => "bag_standplaatsen.csv.zip",
            EntityType::PlaceName => "bag_openbareruimtes.csv.zip",
            EntityType::Building => "bag_panden.csv.zip",
            EntityType::Unit => "bag_verblijfsobjecten.csv.zip",
            EntityType::AddressPoint => "bag_nummeraanduidingen.csv.zip",
            EntityType::UnitBuildingLink => "benkagg_bagpandbevatverblijfsobjecten.csv.zip",
        }
    }

    /// Object type code embedded at positions 4..6 of a natural key.
    /// The junction has a composite key and no code.
    pub fn type_code(&self) -> Option<&'static str> {
        match self {
            EntityType::Building => Some("10"),
            EntityType::AddressPoint => Some("20"),
            EntityType::PlaceName => Some("30"),
            EntityType::Unit => Some("01"),
            EntityType::Mooring => Some("02"),
            EntityType::Pitch => Some("03"),
            EntityType::UnitBuildingLink => None,
        }
    }

    /// Upsert order: referenced types before the types referencing them.
    /// Prune walks this in reverse.
    pub fn sync_order() -> &'static [EntityType] {
        &SYNC_ORDER
    }

    pub fn from_name(name: &str) -> Option<EntityType> {
        SYNC_ORDER.iter().copied().find(|t| t.name() == name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
