// Dossier Sync - Core Library
// Registry replica, dossier archive import and address reconciliation.
// Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod db;
pub mod deduplication;  // Version dedup of registry exports
pub mod enrichment;     // BWT side-channel for WABO cases
pub mod entities;
pub mod error;
pub mod fetch;
pub mod identifiers;
pub mod integrity;      // Unit <-> building link guard
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod reconciliation; // Address -> registry identifiers
pub mod schema;
pub mod sync;           // Chunked upsert + prune
pub mod temporal;
pub mod validation;     // Coverage gate before promotion

// Re-export commonly used types
pub use config::Config;
pub use db::{setup_database, insert_event, get_events, Event, Stage, CoverageCounts};
pub use deduplication::{deduplicate_by_version, DeduplicationEngine, VersionOrdering};
pub use entities::{
    Access, Address, DirectPointer, DocumentRecord, DossierCase, DossierSource,
    EntityType, ImportStatus, ResolutionStatus,
};
pub use error::{Result, SyncError};
pub use fetch::{DirectoryFetcher, SourceFetcher};
pub use integrity::{filter_valid, Endpoints, IntegrityReport};
pub use normalizer::{normalize, normalize_all, CandidateRecord, FieldValue, RawRecord};
pub use parser::{detect_source, get_parser, DossierParser, PreWaboParser, WaboParser};
pub use reconciliation::{
    AddressReconciler, ReconcileScope, ReconciliationReport, RegistryIndex, RegistryLookup,
};
pub use schema::{schema_for, EntitySchema};
pub use sync::{BulkSyncEngine, RegistrySyncReport};
pub use validation::{CoverageReport, ImportValidator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
