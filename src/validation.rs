// ✅ Import Validator - completeness gate before promotion
//
// Checks over every staged address: enough of them, and enough of them
// linked to a building, an address point and a place name. All coverage
// bounds are strict and compared in basis points, so 80.00% fails an 80%
// bound and 80.01% passes.

use crate::config::{Config, ValidationConfig};
use crate::db::{self, CoverageCounts, Stage};
use crate::error::{Result, SyncError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

const BASIS_POINTS: u64 = 10_000;

// ============================================================================
// CHECK RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub rule_name: String,
    pub message: String,
}

impl CheckResult {
    fn pass(rule_name: &str, message: String) -> Self {
        CheckResult {
            passed: true,
            rule_name: rule_name.to_string(),
            message,
        }
    }

    fn fail(rule_name: &str, message: String) -> Self {
        CheckResult {
            passed: false,
            rule_name: rule_name.to_string(),
            message,
        }
    }
}

// ============================================================================
// COVERAGE REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageReport {
    pub totals: CoverageCounts,
    /// Source tag -> counts
    pub by_source: BTreeMap<String, CoverageCounts>,
    pub checks: Vec<CheckResult>,
}

impl CoverageReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Addresses: {}, buildings {}, address points {}, place names {}",
            self.totals.total,
            percentage(self.totals.with_buildings, self.totals.total),
            percentage(self.totals.with_address_points, self.totals.total),
            percentage(self.totals.with_place_name, self.totals.total),
        )];
        for (source, counts) in &self.by_source {
            lines.push(format!(
                "  {}: {} addresses, buildings {}, address points {}, place names {}",
                source,
                counts.total,
                percentage(counts.with_buildings, counts.total),
                percentage(counts.with_address_points, counts.total),
                percentage(counts.with_place_name, counts.total),
            ));
        }
        lines.join("\n")
    }
}

fn percentage(part: u64, total: u64) -> String {
    if total == 0 {
        return "n/a".to_string();
    }
    format!("{:.2}%", part as f64 * 100.0 / total as f64)
}

/// 80.0 -> 8000
fn to_basis_points(pct: f64) -> u64 {
    (pct * 100.0).round().max(0.0) as u64
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct ImportValidator {
    pub min_case_count: u64,
    pub building_bp: u64,
    pub address_point_bp: u64,
    pub place_name_bp: u64,
}

impl ImportValidator {
    pub fn new(min_case_count: u64) -> Self {
        Self::with_thresholds(min_case_count, &ValidationConfig::default())
    }

    pub fn with_thresholds(min_case_count: u64, thresholds: &ValidationConfig) -> Self {
        ImportValidator {
            min_case_count,
            building_bp: to_basis_points(thresholds.building_coverage_pct),
            address_point_bp: to_basis_points(thresholds.address_point_coverage_pct),
            place_name_bp: to_basis_points(thresholds.place_name_coverage_pct),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_thresholds(config.import.min_case_count as u64, &config.validation)
    }

    fn check_coverage(rule_name: &str, part: u64, total: u64, bound_bp: u64) -> CheckResult {
        let message = format!(
            "{} of {} ({}), must be above {}.{:02}%",
            part,
            total,
            percentage(part, total),
            bound_bp / 100,
            bound_bp % 100
        );
        if part * BASIS_POINTS > total * bound_bp {
            CheckResult::pass(rule_name, message)
        } else {
            CheckResult::fail(rule_name, message)
        }
    }

    /// Run every check against the given counts
    pub fn check(&self, counts: &CoverageCounts) -> Vec<CheckResult> {
        let count_message = format!("{} addresses, at least {} required", counts.total, self.min_case_count);
        let count = if counts.total >= self.min_case_count {
            CheckResult::pass("min_case_count", count_message)
        } else {
            CheckResult::fail("min_case_count", count_message)
        };

        vec![
            count,
            Self::check_coverage("building_coverage", counts.with_buildings, counts.total, self.building_bp),
            Self::check_coverage(
                "address_point_coverage",
                counts.with_address_points,
                counts.total,
                self.address_point_bp,
            ),
            Self::check_coverage("place_name_coverage", counts.with_place_name, counts.total, self.place_name_bp),
        ]
    }

    /// Coverage report over `stage`; fails with ValidationThreshold when any
    /// check does not pass
    pub fn validate(&self, conn: &Connection, stage: Stage) -> Result<CoverageReport> {
        let mut report = CoverageReport::default();
        for (source, counts) in db::coverage_by_source(conn, stage)? {
            report.totals.total += counts.total;
            report.totals.with_buildings += counts.with_buildings;
            report.totals.with_address_points += counts.with_address_points;
            report.totals.with_place_name += counts.with_place_name;
            report.by_source.insert(source.as_str().to_string(), counts);
        }
        report.checks = self.check(&report.totals);

        info!("{}", report.summary());

        if !report.passed() {
            let reasons: Vec<String> = report
                .failures()
                .iter()
                .map(|c| format!("{}: {}", c.rule_name, c.message))
                .collect();
            error!(failures = reasons.len(), "import rejected");
            return Err(SyncError::ValidationThreshold(reasons.join("; ")));
        }

        Ok(report)
    }
}
