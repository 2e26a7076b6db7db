// Source retrieval
//
// Feeds are delivered into the working directory before a run. Remote
// storage is someone else's concern; the fetcher only copies from a
// configured source, retrying transient failures with exponential backoff.

use crate::config::{Config, FetchConfig};
use crate::entities::EntityType;
use crate::error::{Result, SyncError};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Call `f` up to `policy.tries` times, sleeping `delay`, `delay * backoff`,
/// ... between attempts. The last error becomes `TransientIo`.
pub fn retry<T, E, F>(policy: &FetchConfig, what: &str, mut f: F) -> Result<T>
where
    E: Display,
    F: FnMut() -> std::result::Result<T, E>,
{
    let tries = policy.tries.max(1);
    let mut delay = Duration::from_millis(policy.delay_ms);

    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= tries => {
                return Err(SyncError::TransientIo {
                    attempts: tries,
                    message: format!("{}: {}", what, e),
                })
            }
            Err(e) => {
                warn!(what, attempt, error = %e, retry_in_ms = delay.as_millis() as u64, "retrying");
                thread::sleep(delay);
                delay *= policy.backoff.max(1);
                attempt += 1;
            }
        }
    }
}

/// Puts the feeds of a run in place
pub trait SourceFetcher {
    /// Registry export for one entity type into `dest_dir`
    fn fetch_registry(&self, entity_type: EntityType, file_name: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// The archive tree into `dest_dir`; returns the number of files copied
    fn fetch_dossiers(&self, dest_dir: &Path) -> Result<usize>;
}

/// Copies from a local (or mounted) directory laid out as
/// `{source}/registry/*.csv[.zip]` and `{source}/dossiers/**`
pub struct DirectoryFetcher {
    source: PathBuf,
    policy: FetchConfig,
}

impl DirectoryFetcher {
    pub fn new(source: impl Into<PathBuf>, policy: FetchConfig) -> Self {
        DirectoryFetcher {
            source: source.into(),
            policy,
        }
    }

    /// `None` when no source directory is configured
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .paths
            .source_dir
            .as_ref()
            .map(|dir| DirectoryFetcher::new(dir, config.fetch.clone()))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        retry(&self.policy, &from.display().to_string(), || std::fs::copy(from, to))?;
        Ok(())
    }
}

impl SourceFetcher for DirectoryFetcher {
    fn fetch_registry(&self, entity_type: EntityType, file_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let from = self.source.join("registry").join(file_name);
        let to = dest_dir.join(file_name);
        self.copy(&from, &to)?;
        info!(entity = %entity_type, file = file_name, "registry export fetched");
        Ok(to)
    }

    fn fetch_dossiers(&self, dest_dir: &Path) -> Result<usize> {
        let root = self.source.join("dossiers");
        let mut copied = 0;
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| SyncError::TransientIo {
                attempts: 1,
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else { continue };
            self.copy(entry.path(), &dest_dir.join(relative))?;
            copied += 1;
        }
        info!(files = copied, "archive fetched");
        Ok(copied)
    }
}
