// 🧭 Address Reconciliation Engine - archive addresses -> registry identifiers
//
// A legacy archive address is a street plus a house-number range. Opposite
// sides of a street usually carry odd and even numbers, so the plain range
// over-matches. The range is narrowed through building blocks:
//
//   anchor pass:    points numbered exactly `from` or `to` -> their blocks
//   expansion pass: points in [from, to] whose building is in an anchor block
//
// Addresses that came with registry ids from the archive (direct pointers)
// skip ranging. Place names are matched on the exact street name.

use crate::db::{self, Stage};
use crate::entities::{
    Address, AddressPointRow, BuildingRow, EntityType, PlaceNameRow, ResolutionStatus,
    UnitBuildingLinkRow,
};
use crate::error::Result;
use crate::identifiers::in_municipality;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

pub const CATEGORY_UNITS: &str = "link units";
pub const CATEGORY_ADDRESS_POINTS: &str = "link address points";
pub const CATEGORY_PLACE_NAMES: &str = "link place names";

// ============================================================================
// REGISTRY LOOKUP
// ============================================================================

/// Read access to the registry replica, scoped to one municipality
pub trait RegistryLookup {
    /// Place names with exactly this name
    fn place_names_named(&self, name: &str) -> Result<Vec<&PlaceNameRow>>;

    fn place_name(&self, id: &str) -> Result<Option<&PlaceNameRow>>;

    /// Address points on the named street with from <= number <= to
    fn points_on_street(&self, street: &str, from: i64, to: i64) -> Result<Vec<&AddressPointRow>>;

    /// Address points addressing a unit
    fn points_for_unit(&self, unit_id: &str) -> Result<Vec<&AddressPointRow>>;

    fn unit_exists(&self, unit_id: &str) -> Result<bool>;

    /// Buildings linked to a unit through the junction table
    fn buildings_for_unit(&self, unit_id: &str) -> Result<Vec<&BuildingRow>>;
}

/// In-memory lookup, loaded once per reconciliation run
#[derive(Debug, Default)]
pub struct RegistryIndex {
    prefix: String,
    place_names: HashMap<String, PlaceNameRow>,
    place_names_by_name: HashMap<String, Vec<String>>,
    points: HashMap<String, AddressPointRow>,
    points_by_place_name: HashMap<String, Vec<String>>,
    points_by_unit: HashMap<String, Vec<String>>,
    units: HashSet<String>,
    buildings: HashMap<String, BuildingRow>,
    buildings_by_unit: HashMap<String, Vec<String>>,
}

impl RegistryIndex {
    /// Build the index. Place names and address points outside the
    /// municipality `prefix` are left out.
    pub fn new(
        prefix: &str,
        place_names: Vec<PlaceNameRow>,
        points: Vec<AddressPointRow>,
        units: HashSet<String>,
        buildings: Vec<BuildingRow>,
        links: Vec<UnitBuildingLinkRow>,
    ) -> Self {
        let mut index = RegistryIndex {
            prefix: prefix.to_string(),
            units,
            ..Default::default()
        };

        for place in place_names.into_iter().filter(|p| in_municipality(&p.id, prefix)) {
            index
                .place_names_by_name
                .entry(place.name.clone())
                .or_default()
                .push(place.id.clone());
            index.place_names.insert(place.id.clone(), place);
        }

        for point in points.into_iter().filter(|p| in_municipality(&p.id, prefix)) {
            if let Some(place) = &point.place_name_id {
                index
                    .points_by_place_name
                    .entry(place.clone())
                    .or_default()
                    .push(point.id.clone());
            }
            if let Some(unit) = &point.unit_id {
                index.points_by_unit.entry(unit.clone()).or_default().push(point.id.clone());
            }
            index.points.insert(point.id.clone(), point);
        }

        for building in buildings {
            index.buildings.insert(building.id.clone(), building);
        }
        for link in links {
            index
                .buildings_by_unit
                .entry(link.unit_id)
                .or_default()
                .push(link.building_id);
        }

        // stable lookup order
        for ids in index.place_names_by_name.values_mut() {
            ids.sort();
        }
        for ids in index.points_by_unit.values_mut() {
            ids.sort();
        }

        index
    }

    pub fn load(conn: &Connection, prefix: &str) -> Result<Self> {
        let index = RegistryIndex::new(
            prefix,
            db::load_place_names(conn, prefix)?,
            db::load_address_points(conn, prefix)?,
            db::natural_keys(conn, EntityType::Unit)?,
            db::load_buildings(conn)?,
            db::load_links(conn)?,
        );
        info!(
            prefix,
            place_names = index.place_names.len(),
            address_points = index.points.len(),
            units = index.units.len(),
            buildings = index.buildings.len(),
            "registry index loaded"
        );
        Ok(index)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl RegistryLookup for RegistryIndex {
    fn place_names_named(&self, name: &str) -> Result<Vec<&PlaceNameRow>> {
        Ok(self
            .place_names_by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| self.place_names.get(id)).collect())
            .unwrap_or_default())
    }

    fn place_name(&self, id: &str) -> Result<Option<&PlaceNameRow>> {
        Ok(self.place_names.get(id))
    }

    fn points_on_street(&self, street: &str, from: i64, to: i64) -> Result<Vec<&AddressPointRow>> {
        let mut points = Vec::new();
        for place in self.place_names_named(street)? {
            let Some(ids) = self.points_by_place_name.get(&place.id) else {
                continue;
            };
            points.extend(
                ids.iter()
                    .filter_map(|id| self.points.get(id))
                    .filter(|p| p.number >= from && p.number <= to),
            );
        }
        Ok(points)
    }

    fn points_for_unit(&self, unit_id: &str) -> Result<Vec<&AddressPointRow>> {
        Ok(self
            .points_by_unit
            .get(unit_id)
            .map(|ids| ids.iter().filter_map(|id| self.points.get(id)).collect())
            .unwrap_or_default())
    }

    fn unit_exists(&self, unit_id: &str) -> Result<bool> {
        Ok(self.units.contains(unit_id))
    }

    fn buildings_for_unit(&self, unit_id: &str) -> Result<Vec<&BuildingRow>> {
        Ok(self
            .buildings_by_unit
            .get(unit_id)
            .map(|ids| ids.iter().filter_map(|id| self.buildings.get(id)).collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// MATCH RESULTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct UnitMatch {
    buildings: BTreeSet<String>,
    units: BTreeSet<String>,
    unit_labels: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PointMatch {
    ids: BTreeSet<String>,
    labels: BTreeSet<String>,
}

fn street_of<'a>(lookup: &'a dyn RegistryLookup, point: &AddressPointRow) -> Result<Option<&'a str>> {
    match point.place_name_id.as_deref() {
        Some(id) => Ok(lookup.place_name(id)?.map(|p| p.name.as_str())),
        None => Ok(None),
    }
}

/// Address points in the range that share a building block with the points
/// at either end of the range, each paired with its in-block buildings
fn ranged_points<'a>(
    lookup: &'a dyn RegistryLookup,
    street: &str,
    from: i64,
    to: i64,
) -> Result<Vec<(&'a AddressPointRow, Vec<&'a BuildingRow>)>> {
    let mut anchor_blocks: HashSet<&str> = HashSet::new();
    let mut anchors = lookup.points_on_street(street, from, from)?;
    if to != from {
        anchors.extend(lookup.points_on_street(street, to, to)?);
    }
    for point in anchors {
        let Some(unit) = point.unit_id.as_deref() else {
            continue;
        };
        if !lookup.unit_exists(unit)? {
            continue;
        }
        for building in lookup.buildings_for_unit(unit)? {
            if let Some(block) = building.block.as_deref() {
                anchor_blocks.insert(block);
            }
        }
    }

    if anchor_blocks.is_empty() {
        debug!(street, from, to, "no anchor block");
        return Ok(Vec::new());
    }

    let mut matched = Vec::new();
    for point in lookup.points_on_street(street, from, to)? {
        let Some(unit) = point.unit_id.as_deref() else {
            continue;
        };
        if !lookup.unit_exists(unit)? {
            continue;
        }
        let in_block: Vec<&BuildingRow> = lookup
            .buildings_for_unit(unit)?
            .into_iter()
            .filter(|b| b.block.as_deref().is_some_and(|block| anchor_blocks.contains(block)))
            .collect();
        if !in_block.is_empty() {
            matched.push((point, in_block));
        }
    }
    Ok(matched)
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileScope {
    /// Addresses not yet resolved
    Pending,
    /// Every address, including already resolved ones
    All,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub addresses: usize,
    pub resolved: usize,
    pub with_buildings: usize,
    pub with_address_points: usize,
    pub with_place_name: usize,
    /// Category name -> number of addresses where it failed
    pub failures: BTreeMap<String, usize>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} addresses ({} resolved): {} with buildings, {} with address points, {} with a place name, {} category failures",
            self.addresses,
            self.resolved,
            self.with_buildings,
            self.with_address_points,
            self.with_place_name,
            self.failures.values().sum::<usize>()
        )
    }
}

pub struct AddressReconciler {
    pub stage: Stage,
    /// Reference date for place-name validity
    pub as_of: NaiveDate,
}

impl AddressReconciler {
    pub fn new() -> Self {
        AddressReconciler {
            stage: Stage::Staging,
            as_of: chrono::Local::now().date_naive(),
        }
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    fn link_units(&self, lookup: &dyn RegistryLookup, address: &Address) -> Result<UnitMatch> {
        let mut found = UnitMatch::default();

        if !address.direct.units.is_empty() {
            found.units.extend(address.direct.units.iter().cloned());
            if address.direct.buildings.is_empty() {
                for unit in &address.direct.units {
                    found
                        .buildings
                        .extend(lookup.buildings_for_unit(unit)?.into_iter().map(|b| b.id.clone()));
                }
            } else {
                found.buildings.extend(address.direct.buildings.iter().cloned());
            }
            for unit in &address.direct.units {
                for point in lookup.points_for_unit(unit)? {
                    if let Some(street) = street_of(lookup, point)? {
                        found.unit_labels.insert(point.label(street));
                    }
                }
            }
            return Ok(found);
        }

        if !address.direct.buildings.is_empty() {
            found.buildings.extend(address.direct.buildings.iter().cloned());
            return Ok(found);
        }

        let (Some(street), Some((from, to))) = (address.street.as_deref(), address.range()) else {
            return Ok(found);
        };
        for (point, buildings) in ranged_points(lookup, street, from, to)? {
            if let Some(unit) = &point.unit_id {
                found.units.insert(unit.clone());
            }
            found.buildings.extend(buildings.into_iter().map(|b| b.id.clone()));
            found.unit_labels.insert(point.label(street));
        }
        Ok(found)
    }

    fn link_address_points(&self, lookup: &dyn RegistryLookup, address: &Address) -> Result<PointMatch> {
        let mut found = PointMatch::default();

        if !address.direct.units.is_empty() {
            for unit in &address.direct.units {
                for point in lookup.points_for_unit(unit)? {
                    found.ids.insert(point.id.clone());
                    if let Some(street) = street_of(lookup, point)? {
                        found.labels.insert(point.label(street));
                    }
                }
            }
            if found.ids.is_empty() {
                found.ids.extend(address.direct.address_points.iter().cloned());
            }
            return Ok(found);
        }

        if !address.direct.address_points.is_empty() || !address.direct.buildings.is_empty() {
            found.ids.extend(address.direct.address_points.iter().cloned());
            return Ok(found);
        }

        let (Some(street), Some((from, to))) = (address.street.as_deref(), address.range()) else {
            return Ok(found);
        };
        for (point, _) in ranged_points(lookup, street, from, to)? {
            found.ids.insert(point.id.clone());
            found.labels.insert(point.label(street));
        }
        Ok(found)
    }

    fn link_place_name(&self, lookup: &dyn RegistryLookup, address: &Address) -> Result<Option<String>> {
        let candidates = match address.street.as_deref() {
            Some(street) => lookup.place_names_named(street)?,
            None => Vec::new(),
        };

        // current streets win over whatever the archive supplied
        let primary = candidates
            .iter()
            .filter(|p| p.is_primary() && p.validity.is_valid_at(self.as_of))
            .map(|p| p.id.clone())
            .min();

        Ok(primary
            .or_else(|| address.direct.place_name.clone())
            .or_else(|| candidates.iter().map(|p| p.id.clone()).min()))
    }

    /// Resolve one address in memory. Returns the categories that failed;
    /// their fields keep the values they had.
    pub fn resolve(&self, lookup: &dyn RegistryLookup, address: &mut Address) -> Vec<&'static str> {
        let mut failed = Vec::new();

        match self.link_units(lookup, address) {
            Ok(found) => {
                address.buildings = found.buildings.into_iter().collect();
                address.units = found.units.into_iter().collect();
                address.unit_labels = found.unit_labels.into_iter().collect();
            }
            Err(e) => {
                warn!(address = ?address.id, error = %e, "{} failed", CATEGORY_UNITS);
                failed.push(CATEGORY_UNITS);
            }
        }

        match self.link_address_points(lookup, address) {
            Ok(found) => {
                address.address_points = found.ids.into_iter().collect();
                address.address_point_labels = found.labels.into_iter().collect();
            }
            Err(e) => {
                warn!(address = ?address.id, error = %e, "{} failed", CATEGORY_ADDRESS_POINTS);
                failed.push(CATEGORY_ADDRESS_POINTS);
            }
        }

        match self.link_place_name(lookup, address) {
            Ok(place_name) => address.place_name = place_name,
            Err(e) => {
                warn!(address = ?address.id, error = %e, "{} failed", CATEGORY_PLACE_NAMES);
                failed.push(CATEGORY_PLACE_NAMES);
            }
        }

        address.status = if failed.is_empty() {
            ResolutionStatus::Resolved
        } else {
            // picked up again by the next pending run
            ResolutionStatus::Resolving
        };
        failed
    }

    /// Resolve stored addresses and write the results back in place
    pub fn reconcile(
        &self,
        conn: &Connection,
        lookup: &dyn RegistryLookup,
        scope: ReconcileScope,
    ) -> Result<ReconciliationReport> {
        let addresses = db::load_addresses(conn, self.stage, scope == ReconcileScope::Pending)?;
        let mut report = ReconciliationReport::default();

        let tx = conn.unchecked_transaction()?;
        for mut address in addresses {
            let Some(id) = address.id else { continue };
            db::set_address_status(&tx, self.stage, id, ResolutionStatus::Resolving)?;

            for category in self.resolve(lookup, &mut address) {
                *report.failures.entry(category.to_string()).or_default() += 1;
            }
            db::update_address_resolution(&tx, self.stage, &address)?;

            report.addresses += 1;
            if address.status == ResolutionStatus::Resolved {
                report.resolved += 1;
            }
            if !address.buildings.is_empty() {
                report.with_buildings += 1;
            }
            if !address.address_points.is_empty() {
                report.with_address_points += 1;
            }
            if address.place_name.as_deref().is_some_and(|p| !p.is_empty()) {
                report.with_place_name += 1;
            }
        }
        tx.commit()?;

        info!("{}", report.summary());
        Ok(report)
    }
}

impl Default for AddressReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DossierCase, DossierSource};
    use crate::error::SyncError;
    use crate::temporal::ValidityInterval;

    const HOOGTE_KADIJK: &str = "0363300000003171";

    fn place(id: &str, name: &str, type_code: &str, end: Option<NaiveDate>) -> PlaceNameRow {
        PlaceNameRow {
            id: id.to_string(),
            name: name.to_string(),
            type_code: Some(type_code.to_string()),
            validity: ValidityInterval::new(NaiveDate::from_ymd_opt(1900, 1, 1), end),
        }
    }

    fn point(n: u32, number: i64, place: &str, unit: u32) -> AddressPointRow {
        AddressPointRow {
            id: format!("03632000{:08}", n),
            number,
            letter: None,
            suffix: None,
            place_name_id: Some(place.to_string()),
            unit_id: Some(unit_key(unit)),
        }
    }

    fn unit_key(n: u32) -> String {
        format!("03630100{:08}", n)
    }

    fn building_key(n: u32) -> String {
        format!("03631000{:08}", n)
    }

    fn building(n: u32, block: &str) -> BuildingRow {
        BuildingRow {
            id: building_key(n),
            block: Some(block.to_string()),
        }
    }

    fn link(unit: u32, building: u32) -> UnitBuildingLinkRow {
        UnitBuildingLinkRow {
            unit_id: unit_key(unit),
            building_id: building_key(building),
        }
    }

    /// Hoogte Kadijk: even numbers 38-44 in block B, odd numbers 39-43 in block A
    fn create_test_index() -> RegistryIndex {
        let places = vec![
            place(HOOGTE_KADIJK, "Hoogte Kadijk", "1", None),
            // same name in Weesp, out of scope
            place("0457300000000001", "Hoogte Kadijk", "1", None),
        ];
        let points = vec![
            point(38, 38, HOOGTE_KADIJK, 38),
            point(39, 39, HOOGTE_KADIJK, 39),
            point(40, 40, HOOGTE_KADIJK, 40),
            point(41, 41, HOOGTE_KADIJK, 41),
            point(42, 42, HOOGTE_KADIJK, 42),
            point(43, 43, HOOGTE_KADIJK, 43),
            point(44, 44, HOOGTE_KADIJK, 44),
        ];
        let units = [38, 39, 40, 41, 42, 43, 44].into_iter().map(unit_key).collect();
        let buildings = vec![building(1, "B"), building(2, "B"), building(3, "A")];
        let links = vec![
            link(38, 1),
            link(40, 1),
            link(42, 2),
            link(44, 2),
            link(39, 3),
            link(41, 3),
            link(43, 3),
        ];
        RegistryIndex::new("0363", places, points, units, buildings, links)
    }

    fn reconciler() -> AddressReconciler {
        AddressReconciler::new().with_as_of(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn test_single_number_in_block_b() {
        let index = create_test_index();
        let mut address = Address::new(Some("Hoogte Kadijk"), Some(40), Some(40), "SA");

        let failed = reconciler().resolve(&index, &mut address);

        assert!(failed.is_empty());
        assert_eq!(address.status, ResolutionStatus::Resolved);
        assert_eq!(address.buildings, vec![building_key(1)]);
        assert_eq!(address.units, vec![unit_key(40)]);
        assert_eq!(address.address_point_labels, vec!["Hoogte Kadijk 40".to_string()]);
        assert_eq!(address.place_name.as_deref(), Some(HOOGTE_KADIJK));
    }

    #[test]
    fn test_range_stays_on_its_side_of_the_street() {
        let index = create_test_index();
        let mut even = Address::new(Some("Hoogte Kadijk"), Some(38), Some(44), "SA");
        let mut odd = Address::new(Some("Hoogte Kadijk"), Some(39), Some(43), "SA");

        reconciler().resolve(&index, &mut even);
        reconciler().resolve(&index, &mut odd);

        assert_eq!(even.buildings, vec![building_key(1), building_key(2)]);
        assert_eq!(even.units.len(), 4);
        assert_eq!(odd.buildings, vec![building_key(3)]);
        assert_eq!(odd.units.len(), 3);

        let even_points: HashSet<&String> = even.address_points.iter().collect();
        assert!(odd.address_points.iter().all(|p| !even_points.contains(p)));
    }

    #[test]
    fn test_missing_to_is_single_number() {
        let index = create_test_index();
        let mut address = Address::new(Some("Hoogte Kadijk"), Some(41), None, "SA");

        reconciler().resolve(&index, &mut address);

        assert_eq!(address.units, vec![unit_key(41)]);
        assert_eq!(address.buildings, vec![building_key(3)]);
    }

    #[test]
    fn test_reversed_range_matches_forward_range() {
        let index = create_test_index();
        let mut forward = Address::new(Some("Hoogte Kadijk"), Some(38), Some(40), "SA");
        let mut reversed = Address::new(Some("Hoogte Kadijk"), Some(40), Some(38), "SA");

        reconciler().resolve(&index, &mut forward);
        reconciler().resolve(&index, &mut reversed);

        assert_eq!(reversed.address_points, vec![format!("03632000{:08}", 38), format!("03632000{:08}", 40)]);
        assert_eq!(reversed.address_points, forward.address_points);
        assert_eq!(reversed.buildings, vec![building_key(1)]);
    }

    #[test]
    fn test_unknown_street_resolves_empty() {
        let index = create_test_index();
        let mut address = Address::new(Some("Nergensstraat"), Some(1), Some(9), "SA");

        let failed = reconciler().resolve(&index, &mut address);

        assert!(failed.is_empty());
        assert_eq!(address.status, ResolutionStatus::Resolved);
        assert!(address.buildings.is_empty());
        assert!(address.address_points.is_empty());
        assert!(address.place_name.is_none());
    }

    #[test]
    fn test_direct_pointer_skips_ranging() {
        let index = create_test_index();
        let mut address = Address::new(Some("Hoogte Kadijk"), Some(1), Some(99), "SA");
        address.direct.units = vec![unit_key(42)];

        reconciler().resolve(&index, &mut address);

        assert_eq!(address.units, vec![unit_key(42)]);
        assert_eq!(address.buildings, vec![building_key(2)]);
        assert_eq!(address.address_points, vec!["0363200000000042".to_string()]);
        assert_eq!(address.address_point_labels, vec!["Hoogte Kadijk 42".to_string()]);
    }

    #[test]
    fn test_direct_buildings_are_kept() {
        let index = create_test_index();
        let mut address = Address::new(Some("Hoogte Kadijk"), None, None, "SA");
        address.direct.units = vec![unit_key(42)];
        address.direct.buildings = vec![building_key(9)];

        reconciler().resolve(&index, &mut address);

        assert_eq!(address.buildings, vec![building_key(9)]);
    }

    #[test]
    fn test_place_name_passes() {
        let expired = NaiveDate::from_ymd_opt(2000, 1, 1);
        let places = vec![
            place("0363300000000001", "Singel", "2", None),
            place("0363300000000002", "Amstel", "1", expired),
            place("0363300000000003", "Amstel", "6", None),
            place("0363300000000004", "Damrak", "1", None),
        ];
        let index = RegistryIndex::new("0363", places, vec![], HashSet::new(), vec![], vec![]);

        // only a water body carries the name: found in pass 2
        let mut singel = Address::new(Some("Singel"), None, None, "SA");
        reconciler().resolve(&index, &mut singel);
        assert_eq!(singel.place_name.as_deref(), Some("0363300000000001"));

        // the street record has expired, archive pointer wins over pass 2
        let mut amstel = Address::new(Some("Amstel"), None, None, "SA");
        amstel.direct.place_name = Some("0363300000000099".to_string());
        reconciler().resolve(&index, &mut amstel);
        assert_eq!(amstel.place_name.as_deref(), Some("0363300000000099"));

        // a current street overrides the archive pointer
        let mut damrak = Address::new(Some("Damrak"), None, None, "SA");
        damrak.direct.place_name = Some("0363300000000099".to_string());
        reconciler().resolve(&index, &mut damrak);
        assert_eq!(damrak.place_name.as_deref(), Some("0363300000000004"));
    }

    struct BrokenLookup(RegistryIndex);

    impl RegistryLookup for BrokenLookup {
        fn place_names_named(&self, name: &str) -> Result<Vec<&PlaceNameRow>> {
            self.0.place_names_named(name)
        }
        fn place_name(&self, id: &str) -> Result<Option<&PlaceNameRow>> {
            self.0.place_name(id)
        }
        fn points_on_street(&self, _: &str, _: i64, _: i64) -> Result<Vec<&AddressPointRow>> {
            Err(SyncError::Io(std::io::Error::other("index unavailable")))
        }
        fn points_for_unit(&self, unit_id: &str) -> Result<Vec<&AddressPointRow>> {
            self.0.points_for_unit(unit_id)
        }
        fn unit_exists(&self, unit_id: &str) -> Result<bool> {
            self.0.unit_exists(unit_id)
        }
        fn buildings_for_unit(&self, unit_id: &str) -> Result<Vec<&BuildingRow>> {
            self.0.buildings_for_unit(unit_id)
        }
    }

    #[test]
    fn test_category_failure_does_not_abort() {
        let lookup = BrokenLookup(create_test_index());
        let mut address = Address::new(Some("Hoogte Kadijk"), Some(40), Some(40), "SA");

        let failed = reconciler().resolve(&lookup, &mut address);

        assert_eq!(failed, vec![CATEGORY_UNITS, CATEGORY_ADDRESS_POINTS]);
        assert_eq!(address.status, ResolutionStatus::Resolving);
        assert_eq!(address.place_name.as_deref(), Some(HOOGTE_KADIJK));
    }

    #[test]
    fn test_reconcile_store_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let mut case = DossierCase::new("00001", "SA", "Hoogte Kadijk 38-44", DossierSource::Edepot);
        case.addresses
            .push(Address::new(Some("Hoogte Kadijk"), Some(38), Some(44), "SA"));
        case.addresses
            .push(Address::new(Some("Hoogte Kadijk"), Some(40), None, "SA"));
        let id = db::insert_case_row(&conn, Stage::Staging, &case, "f.xml").unwrap();
        db::insert_case_children(&conn, Stage::Staging, id, &case).unwrap();
        let index = create_test_index();

        let report = reconciler().reconcile(&conn, &index, ReconcileScope::Pending).unwrap();
        let first = db::load_addresses(&conn, Stage::Staging, false).unwrap();

        assert_eq!(report.addresses, 2);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.with_buildings, 2);

        // nothing pending any more
        let again = reconciler().reconcile(&conn, &index, ReconcileScope::Pending).unwrap();
        assert_eq!(again.addresses, 0);

        reconciler().reconcile(&conn, &index, ReconcileScope::All).unwrap();
        let second = db::load_addresses(&conn, Stage::Staging, false).unwrap();
        assert_eq!(first, second);
    }
}
