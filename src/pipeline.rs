// 🔄 Pipeline - one full refresh, start to finish
//
// fetch -> registry sync -> staging import -> reconcile -> validate -> promote
//
// Each step is also callable on its own (the binary exposes them as
// subcommands). Library errors are wrapped with context here; this is the
// top of the stack.

use crate::config::Config;
use crate::db::{self, Event, Stage};
use crate::deduplication::deduplicate_by_version;
use crate::enrichment::Enrichment;
use crate::entities::{DossierCase, EntityType, ImportStatus};
use crate::error::SyncError;
use crate::fetch::SourceFetcher;
use crate::normalizer::{normalize_all, CandidateRecord, NormalizeOptions};
use crate::parser::{detect_source, get_parser, read_registry_file, DossierParser};
use crate::reconciliation::{AddressReconciler, ReconcileScope, ReconciliationReport, RegistryIndex};
use crate::schema::schema_for;
use crate::sync::{BulkSyncEngine, RegistrySyncReport};
use crate::validation::{CoverageReport, ImportValidator};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{Connection, ErrorCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

const ACTOR: &str = "pipeline";

/// Suffix attempts for a colliding (district, case number)
const MAX_KEY_ATTEMPTS: u32 = 3;

/// Open (creating if needed) the replica database
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    db::setup_database(&conn).context("setting up schema")?;
    Ok(conn)
}

// ============================================================================
// FETCH
// ============================================================================

pub fn fetch_sources(config: &Config, fetcher: &dyn SourceFetcher) -> Result<()> {
    let registry_dir = config.paths.registry_dir();
    for &entity_type in EntityType::sync_order() {
        let file_name = config.registry.source_for(entity_type)?;
        fetcher
            .fetch_registry(entity_type, file_name, &registry_dir)
            .with_context(|| format!("fetching {} export", entity_type))?;
    }
    fetcher
        .fetch_dossiers(&config.paths.dossier_dir())
        .context("fetching dossier archive")?;
    Ok(())
}

// ============================================================================
// REGISTRY SYNC
// ============================================================================

/// The export of one type: `{name}` as configured, or its unzipped `.csv`
fn registry_file(config: &Config, entity_type: EntityType) -> crate::error::Result<PathBuf> {
    let dir = config.paths.registry_dir();
    let configured = dir.join(config.registry.source_for(entity_type)?);
    if configured.exists() {
        return Ok(configured);
    }
    if let Some(unzipped) = configured.to_str().and_then(|p| p.strip_suffix(".zip")) {
        let unzipped = PathBuf::from(unzipped);
        if unzipped.exists() {
            return Ok(unzipped);
        }
    }
    Err(SyncError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("registry export {} not found", configured.display()),
    )))
}

/// Read, normalize and deduplicate the export of one type
pub fn load_registry_candidates(config: &Config, entity_type: EntityType) -> crate::error::Result<Vec<CandidateRecord>> {
    let path = registry_file(config, entity_type)?;
    let rows = read_registry_file(&path)?;
    let options = NormalizeOptions {
        date_only_time: config.registry.date_only_time,
    };
    let (candidates, stats) = normalize_all(rows, schema_for(entity_type), options);
    let deduplicated = deduplicate_by_version(candidates, config.registry.version_ordering);

    info!(
        entity = %entity_type,
        file = %path.display(),
        accepted = stats.accepted,
        skipped = stats.skipped,
        distinct = deduplicated.len(),
        "export loaded"
    );
    Ok(deduplicated)
}

pub fn sync_registry(conn: &Connection, config: &Config) -> Result<RegistrySyncReport> {
    let engine = BulkSyncEngine::from_config(&config.registry);
    let report = engine
        .sync_all(conn, |entity_type| load_registry_candidates(config, entity_type))
        .context("registry sync failed, replica left unchanged")?;
    Ok(report)
}

// ============================================================================
// DOSSIER IMPORT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub files_seen: usize,
    pub imported: usize,
    pub skipped_finished: usize,
    /// Files another run is working on
    pub skipped_busy: Vec<String>,
    pub failed: Vec<String>,
    pub cases: usize,
    /// Cases stored under a suffixed case number
    pub renamed: usize,
    /// Cases dropped after every suffix collided
    pub duplicates: usize,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "📥 {} files: {} imported, {} already finished, {} busy, {} failed | {} cases ({} renamed, {} duplicates dropped)",
            self.files_seen,
            self.imported,
            self.skipped_finished,
            self.skipped_busy.len(),
            self.failed.len(),
            self.cases,
            self.renamed,
            self.duplicates
        )
    }
}

enum CaseOutcome {
    Stored,
    Renamed,
    Duplicate,
}

/// Insert one case, retrying a key collision with `X`, `XX`, `XXX` appended
/// to the case number
fn store_case(conn: &Connection, case: &DossierCase, file: &str) -> crate::error::Result<CaseOutcome> {
    let mut candidate = case.clone();
    for attempt in 0..=MAX_KEY_ATTEMPTS {
        candidate.case_number = format!("{}{}", case.case_number, "X".repeat(attempt as usize));
        match db::insert_case_row(conn, Stage::Staging, &candidate, file) {
            Ok(id) => {
                db::insert_case_children(conn, Stage::Staging, id, &candidate)?;
                if attempt == 0 {
                    return Ok(CaseOutcome::Stored);
                }
                warn!(case = %case.key(), stored_as = %candidate.case_number, "duplicate case number, suffixed");
                return Ok(CaseOutcome::Renamed);
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let err = SyncError::DuplicateKey {
        district: case.district.clone(),
        case_number: case.case_number.clone(),
        attempts: MAX_KEY_ATTEMPTS + 1,
    };
    error!(file, error = %err, "case skipped");
    Ok(CaseOutcome::Duplicate)
}

/// All cases of one file in one transaction
fn import_file(conn: &Connection, parser: &dyn DossierParser, path: &Path, name: &str, report: &mut ImportReport) -> crate::error::Result<()> {
    let cases = parser.parse(path)?;

    let tx = conn.unchecked_transaction()?;
    let (mut stored, mut renamed, mut duplicates) = (0, 0, 0);
    for case in &cases {
        match store_case(&tx, case, name)? {
            CaseOutcome::Stored => stored += 1,
            CaseOutcome::Renamed => {
                stored += 1;
                renamed += 1;
            }
            CaseOutcome::Duplicate => duplicates += 1,
        }
    }
    tx.commit()?;

    report.cases += stored;
    report.renamed += renamed;
    report.duplicates += duplicates;
    info!(file = name, source = parser.source().as_str(), cases = stored, "file imported");
    Ok(())
}

/// Archive files under `root`, in a stable order
fn archive_files(root: &Path) -> Vec<(PathBuf, String)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "unreadable archive entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| detect_source(e.path()).is_some())
        .map(|e| {
            let name = e
                .path()
                .strip_prefix(root)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/");
            (e.path().to_path_buf(), name)
        })
        .collect()
}

/// Import the archive into staging. Without `resume` staging and the file
/// bookkeeping are wiped first; with it, finished files are skipped and
/// failed ones retried.
pub fn import_dossiers(conn: &Connection, config: &Config, resume: bool) -> Result<ImportReport> {
    if !resume {
        db::truncate_staging(conn)?;
        db::clear_import_files(conn)?;
    }

    let dossier_dir = config.paths.dossier_dir();
    let enrichment = Arc::new(
        Enrichment::load(&dossier_dir.join(&config.archive.enrichment_file))
            .context("loading BWT enrichment")?,
    );
    let mut parsers: HashMap<&'static str, Box<dyn DossierParser>> = HashMap::new();

    let busy_timeout = Duration::minutes(config.import.busy_timeout_minutes);
    let mut report = ImportReport::default();
    let mut attempted = 0;

    for (path, name) in archive_files(&dossier_dir) {
        report.files_seen += 1;

        match db::get_import_file(conn, &name)? {
            Some(file) if file.status == ImportStatus::Finished => {
                report.skipped_finished += 1;
                continue;
            }
            Some(file) if file.status == ImportStatus::Busy => {
                if Utc::now() - file.last_processed < busy_timeout {
                    warn!(file = %name, since = %file.last_processed, "file is busy, skipping");
                    report.skipped_busy.push(name);
                    continue;
                }
                warn!(file = %name, since = %file.last_processed, "stale busy file, retrying");
            }
            Some(file) if file.status == ImportStatus::Error => {
                info!(file = %name, "retrying file that failed before");
            }
            _ => {}
        }

        if config.import.max_files.is_some_and(|max| attempted >= max) {
            info!(max_files = attempted, "file limit reached");
            break;
        }
        attempted += 1;

        let Some(source) = detect_source(&path) else { continue };
        let parser = parsers
            .entry(source.as_str())
            .or_insert_with(|| get_parser(source, &config.archive.wabo_base_urls, enrichment.clone()));

        db::set_import_file_status(conn, &name, ImportStatus::Busy)?;
        match import_file(conn, &**parser, &path, &name, &mut report) {
            Ok(()) => {
                db::set_import_file_status(conn, &name, ImportStatus::Finished)?;
                report.imported += 1;
            }
            Err(e) => {
                error!(file = %name, error = %e, "file import failed");
                db::set_import_file_status(conn, &name, ImportStatus::Error)?;
                report.failed.push(name);
            }
        }
    }

    db::insert_event(
        conn,
        &Event::new(
            "dossiers_imported",
            "dossier",
            "staging",
            serde_json::json!({
                "files": report.files_seen,
                "imported": report.imported,
                "failed": report.failed,
                "busy": report.skipped_busy,
                "cases": report.cases,
                "duplicates": report.duplicates,
            }),
            ACTOR,
        ),
    )?;

    info!("{}", report.summary());
    Ok(report)
}

// ============================================================================
// RECONCILE / VALIDATE / PROMOTE
// ============================================================================

pub fn reconcile(conn: &Connection, config: &Config, stage: Stage, scope: ReconcileScope) -> Result<ReconciliationReport> {
    let index = RegistryIndex::load(conn, &config.registry.municipality_prefix)
        .context("loading registry index")?;
    let report = AddressReconciler::new()
        .with_stage(stage)
        .reconcile(conn, &index, scope)
        .context("reconciling addresses")?;
    Ok(report)
}

pub fn validate(conn: &Connection, config: &Config, stage: Stage) -> Result<CoverageReport> {
    let report = ImportValidator::from_config(config)
        .validate(conn, stage)
        .context("import not promoted")?;
    Ok(report)
}

pub fn promote(conn: &Connection) -> Result<()> {
    db::promote(conn).context("swapping staging and serving tables")?;
    let cases = db::count_cases(conn, Stage::Serving)?;
    db::insert_event(
        conn,
        &Event::new("dossiers_promoted", "dossier", "serving", serde_json::json!({ "cases": cases }), ACTOR),
    )?;
    info!(cases, "✅ staging promoted to serving");
    Ok(())
}

// ============================================================================
// FULL RUN
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Keep staging and finished files from an interrupted run
    pub resume: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub registry: RegistrySyncReport,
    pub import: ImportReport,
    pub reconciliation: ReconciliationReport,
    pub coverage: CoverageReport,
}

impl RunReport {
    pub fn summary(&self) -> String {
        [
            self.registry.summary(),
            self.import.summary(),
            self.reconciliation.summary(),
            self.coverage.summary(),
        ]
        .join("\n")
    }
}

/// The whole refresh. Nothing reaches the serving tables unless every step
/// before promotion succeeded.
pub fn run(
    conn: &Connection,
    config: &Config,
    options: &RunOptions,
    fetcher: Option<&dyn SourceFetcher>,
) -> Result<RunReport> {
    if config.import.skip_fetch {
        info!("skipping fetch");
    } else {
        match fetcher {
            Some(fetcher) => fetch_sources(config, fetcher)?,
            None => warn!("no source configured, using files already in the data directory"),
        }
    }

    let registry = sync_registry(conn, config)?;
    let import = import_dossiers(conn, config, options.resume)?;
    // the registry was just re-synced: addresses kept from a resumed run
    // were resolved against the old replica
    let reconciliation = reconcile(conn, config, Stage::Staging, ReconcileScope::All)?;
    let coverage = validate(conn, config, Stage::Staging)?;
    promote(conn)?;

    Ok(RunReport {
        registry,
        import,
        reconciliation,
        coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Address, DossierSource};

    fn create_test_case(number: &str) -> DossierCase {
        let mut case = DossierCase::new(number, "SA", "Pand", DossierSource::Edepot);
        case.addresses.push(Address::new(Some("Hoogte Kadijk"), Some(40), None, "SA"));
        case
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_duplicate_case_numbers_get_suffixes() {
        let conn = setup();
        let case = create_test_case("00007");

        let outcomes: Vec<_> = (0..5)
            .map(|_| store_case(&conn, &case, "SAA_BWT_01.xml").unwrap())
            .collect();

        assert!(matches!(outcomes[0], CaseOutcome::Stored));
        assert!(matches!(outcomes[1], CaseOutcome::Renamed));
        assert!(matches!(outcomes[3], CaseOutcome::Renamed));
        assert!(matches!(outcomes[4], CaseOutcome::Duplicate));

        assert_eq!(db::count_cases(&conn, Stage::Staging).unwrap(), 4);
        assert!(db::find_case_id(&conn, Stage::Staging, "SA", "00007XXX").unwrap().is_some());
        // children follow the stored row
        assert_eq!(db::load_addresses(&conn, Stage::Staging, false).unwrap().len(), 4);
    }

    #[test]
    fn test_missing_registry_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.data_dir = dir.path().to_path_buf();

        let err = load_registry_candidates(&config, EntityType::Building).unwrap_err();
        assert!(err.to_string().contains("bag_panden.csv.zip"));
    }

    #[test]
    fn test_unzipped_export_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.data_dir = dir.path().to_path_buf();
        std::fs::create_dir_all(config.paths.registry_dir()).unwrap();
        std::fs::write(
            config.paths.registry_dir().join("bag_panden.csv"),
            "Identificatie,Volgnummer,BeginGeldigheid,LigtInBouwblokId\n\
             0363100000000001,1,2010-01-01,AA01\n\
             0363100000000001,2,2011-01-01,AA02\n",
        )
        .unwrap();

        let candidates = load_registry_candidates(&config, EntityType::Building).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].version, Some(2));
    }

    #[test]
    fn test_busy_file_is_skipped_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.data_dir = dir.path().to_path_buf();
        std::fs::create_dir_all(config.paths.dossier_dir()).unwrap();
        std::fs::write(
            config.paths.dossier_dir().join("SAA_BWT_01.xml"),
            "<bwtDossiers><dossier><dossierNr>1</dossierNr><titel>t</titel><stadsdeelcode>SA</stadsdeelcode></dossier></bwtDossiers>",
        )
        .unwrap();
        std::fs::write(config.paths.dossier_dir().join("SAA_BWT_02.xml"), "<bwtDossiers><dossier>").unwrap();

        let conn = setup();
        db::set_import_file_status(&conn, "SAA_BWT_01.xml", ImportStatus::Busy).unwrap();

        let report = import_dossiers(&conn, &config, true).unwrap();
        assert_eq!(report.skipped_busy, vec!["SAA_BWT_01.xml".to_string()]);
        assert_eq!(report.failed, vec!["SAA_BWT_02.xml".to_string()]);
        assert_eq!(
            db::get_import_file(&conn, "SAA_BWT_02.xml").unwrap().unwrap().status,
            ImportStatus::Error
        );

        // a fresh import forgets the busy marker
        let report = import_dossiers(&conn, &config, false).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.cases, 1);
        assert_eq!(db::count_cases(&conn, Stage::Staging).unwrap(), 1);
    }
}
