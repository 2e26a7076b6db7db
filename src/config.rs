// ⚙️ Configuration - one value built at process start
//
// Handed to every component. Resolution order: TOML file (if given), then
// environment overrides, then the compiled defaults for anything left unset.

use crate::deduplication::VersionOrdering;
use crate::entities::EntityType;
use crate::error::{Result, SyncError};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "DOSSIER_SYNC_DATABASE";
pub const ENV_DATA_DIR: &str = "DOSSIER_SYNC_DATA_DIR";
pub const ENV_MIN_CASE_COUNT: &str = "DOSSIER_SYNC_MIN_CASE_COUNT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub registry: RegistryConfig,
    pub archive: ArchiveConfig,
    pub import: ImportConfig,
    pub validation: ValidationConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database holding the replica
    pub database: PathBuf,
    /// Working directory; registry files land in `registry/`, dossiers in `dossiers/`
    pub data_dir: PathBuf,
    /// Where the fetcher copies feeds from when fetching is not skipped
    pub source_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            database: PathBuf::from("/tmp/bouwdossiers/replica.db"),
            data_dir: PathBuf::from("/tmp/bouwdossiers"),
            source_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("registry")
    }

    pub fn dossier_dir(&self) -> PathBuf {
        self.data_dir.join("dossiers")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Identifier namespace of the municipality (first 4 chars of a natural key)
    pub municipality_prefix: String,
    pub chunk_size: usize,
    /// Max units allowed to lose every building link in one sync
    pub link_orphan_threshold: usize,
    /// Address points referencing these units are dropped before upsert
    pub excluded_unit_refs: Vec<String>,
    /// Entity type name -> source file name
    pub sources: BTreeMap<String, String>,
    pub version_ordering: VersionOrdering,
    /// Time of day used for date-only datetime values. `None` keeps the
    /// legacy wall-clock behaviour, so syncing the same export twice stores
    /// different datetimes for those values. Pin a time for identical rows.
    pub date_only_time: Option<NaiveTime>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            municipality_prefix: "0363".to_string(),
            chunk_size: 1000,
            link_orphan_threshold: 5,
            excluded_unit_refs: vec![
                "0363010012582763".to_string(),
                "0363010011290888".to_string(),
            ],
            sources: default_sources(),
            version_ordering: VersionOrdering::Numeric,
            date_only_time: None,
        }
    }
}

impl RegistryConfig {
    pub fn source_for(&self, entity_type: EntityType) -> Result<&str> {
        self.sources
            .get(entity_type.name())
            .map(|s| s.as_str())
            .ok_or_else(|| {
                SyncError::Config(format!("no source file configured for {}", entity_type))
            })
    }
}

fn default_sources() -> BTreeMap<String, String> {
    EntityType::sync_order()
        .iter()
        .map(|t| (t.name().to_string(), t.default_source().to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Prefixes stripped from WABO document URLs
    pub wabo_base_urls: Vec<String>,
    /// Relative to the dossier directory
    pub enrichment_file: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            wabo_base_urls: vec![
                "https://conversiestraatwabo.amsterdam.nl/webDAV/".to_string(),
                "https://bwt.uitplaatsing.shcp04.archivingondemand.nl/rest/".to_string(),
            ],
            enrichment_file: PathBuf::from("WABO/BWT_TMLO.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub skip_fetch: bool,
    pub max_files: Option<usize>,
    pub min_case_count: usize,
    /// A `busy` import file older than this is considered crashed and retried
    pub busy_timeout_minutes: i64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            skip_fetch: false,
            max_files: None,
            min_case_count: 10_000,
            busy_timeout_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub building_coverage_pct: f64,
    pub address_point_coverage_pct: f64,
    pub place_name_coverage_pct: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            building_coverage_pct: 80.0,
            address_point_coverage_pct: 80.0,
            place_name_coverage_pct: 95.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub tries: u32,
    pub delay_ms: u64,
    pub backoff: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            tries: 5,
            delay_ms: 1000,
            backoff: 2,
        }
    }
}

impl Config {
    /// Load from an optional TOML file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Config::from_toml(&content)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        config.check()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        // a partial [registry.sources] table only overrides the named types
        for (name, source) in default_sources() {
            config.registry.sources.entry(name).or_insert(source);
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db) = std::env::var(ENV_DATABASE) {
            self.paths.database = PathBuf::from(db);
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(count) = std::env::var(ENV_MIN_CASE_COUNT) {
            self.import.min_case_count = count.parse().map_err(|_| {
                SyncError::Config(format!("{} is not a number: {}", ENV_MIN_CASE_COUNT, count))
            })?;
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.registry.chunk_size == 0 {
            return Err(SyncError::Config("registry.chunk_size must be > 0".into()));
        }
        if self.registry.municipality_prefix.len() != 4 {
            return Err(SyncError::Config(format!(
                "municipality prefix must have 4 characters, got {:?}",
                self.registry.municipality_prefix
            )));
        }
        for t in EntityType::sync_order() {
            self.registry.source_for(*t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_entity_type() {
        let config = Config::default();
        assert!(config.check().is_ok());
        assert_eq!(
            config.registry.source_for(EntityType::Building).unwrap(),
            "bag_panden.csv.zip"
        );
        assert_eq!(config.registry.chunk_size, 1000);
        assert_eq!(config.registry.link_orphan_threshold, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [import]
            min_case_count = 38
            max_files = 2

            [registry]
            municipality_prefix = "0457"
            date_only_time = "00:00:00"
            "#,
        )
        .unwrap();

        assert_eq!(config.import.min_case_count, 38);
        assert_eq!(config.import.max_files, Some(2));
        assert_eq!(config.registry.municipality_prefix, "0457");
        assert_eq!(config.registry.date_only_time, NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(config.registry.chunk_size, 1000);
        assert_eq!(config.validation.place_name_coverage_pct, 95.0);
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let mut config = Config::default();
        config.registry.municipality_prefix = "03".into();
        assert!(matches!(config.check(), Err(SyncError::Config(_))));
    }
}
