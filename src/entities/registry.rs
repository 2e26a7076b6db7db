// Registry read views
//
// Narrow typed projections of the replica tables, carrying only what
// address reconciliation needs. The full rows stay dynamic (see schema.rs).

use crate::temporal::ValidityInterval;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceNameRow {
    pub id: String,
    pub name: String,
    /// `1` = street (the primary kind), others are water, square, ...
    pub type_code: Option<String>,
    pub validity: ValidityInterval,
}

impl PlaceNameRow {
    pub fn is_primary(&self) -> bool {
        self.type_code.as_deref() == Some("1")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPointRow {
    pub id: String,
    pub number: i64,
    pub letter: Option<String>,
    pub suffix: Option<String>,
    pub place_name_id: Option<String>,
    pub unit_id: Option<String>,
}

impl AddressPointRow {
    /// Display label, e.g. `Hoogte Kadijk 40A-2`
    pub fn label(&self, street: &str) -> String {
        let mut label = format!("{} {}", street, self.number);
        if let Some(letter) = self.letter.as_deref().filter(|l| !l.is_empty()) {
            label.push_str(letter);
        }
        if let Some(suffix) = self.suffix.as_deref().filter(|s| !s.is_empty()) {
            label.push('-');
            label.push_str(suffix);
        }
        label
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRow {
    pub id: String,
    pub block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitBuildingLinkRow {
    pub unit_id: String,
    pub building_id: String,
}

impl UnitBuildingLinkRow {
    /// Composite natural key of the junction row
    pub fn natural_key(&self) -> String {
        format!("{}:{}", self.unit_id, self.building_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(letter: Option<&str>, suffix: Option<&str>) -> AddressPointRow {
        AddressPointRow {
            id: "0363200000000001".to_string(),
            number: 40,
            letter: letter.map(str::to_string),
            suffix: suffix.map(str::to_string),
            place_name_id: None,
            unit_id: None,
        }
    }

    #[test]
    fn test_label_formats() {
        assert_eq!(point(None, None).label("Hoogte Kadijk"), "Hoogte Kadijk 40");
        assert_eq!(point(Some("A"), None).label("Hoogte Kadijk"), "Hoogte Kadijk 40A");
        assert_eq!(point(Some("A"), Some("2")).label("Hoogte Kadijk"), "Hoogte Kadijk 40A-2");
        assert_eq!(point(Some(""), Some("H")).label("Hoogte Kadijk"), "Hoogte Kadijk 40-H");
    }

    #[test]
    fn test_link_key() {
        let link = UnitBuildingLinkRow {
            unit_id: "0363010000000001".to_string(),
            building_id: "0363100000000001".to_string(),
        };
        assert_eq!(link.natural_key(), "0363010000000001:0363100000000001");
    }
}
