//! Persisted round summaries and the cross-run scalability table.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::harness::MeasurementRound;
use crate::stats::{LatencyDistribution, Summary};

const FILE_PREFIX: &str = "api_to_ws_latency_";
const FILE_INFIX: &str = "_clients_";

/// Session settings recorded with each report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub server_url: String,
    pub api_endpoint: String,
    pub client_count: usize,
}

/// Statistic fields are `null` when no client reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    pub connected_clients: usize,
    pub clients_received_update: usize,
    pub avg_latency_ms: Option<f64>,
    pub median_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub std_dev_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    /// Arrival order.
    pub propagation_times_ms: Vec<f64>,
}

/// JSON snapshot of one measurement round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub timestamp: DateTime<Utc>,
    pub config: ReportConfig,
    pub stats: ReportStats,
    pub raw_data: RawData,
}

impl SummaryReport {
    #[must_use]
    pub fn from_round(config: &HarnessConfig, round: &MeasurementRound) -> Self {
        let stats: Summary = round.stats;
        Self {
            timestamp: round.triggered_at.unwrap_or_else(Utc::now),
            config: ReportConfig {
                server_url: config.server_url.clone(),
                api_endpoint: config.api_endpoint.clone(),
                client_count: config.client_count,
            },
            stats: ReportStats {
                connected_clients: round.connected,
                clients_received_update: round.received(),
                avg_latency_ms: stats.mean,
                median_latency_ms: stats.median,
                min_latency_ms: stats.min,
                max_latency_ms: stats.max,
                p95_latency_ms: stats.p95,
                p99_latency_ms: stats.p99,
                std_dev_ms: stats.std_dev,
            },
            raw_data: RawData {
                propagation_times_ms: round.elapsed_ms(),
            },
        }
    }

    /// `api_to_ws_latency_<connected>_clients_<YYYYmmdd_HHMMSS>.json`, local time.
    #[must_use]
    pub fn file_name(&self) -> String {
        let local = self.timestamp.with_timezone(&Local);
        format!(
            "{FILE_PREFIX}{}{FILE_INFIX}{}.json",
            self.stats.connected_clients,
            local.format("%Y%m%d_%H%M%S")
        )
    }

    /// Serialize into `dir` (created if missing) and return the file path.
    ///
    /// # Errors
    ///
    /// `Error::Report` if the directory or file cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| Error::Report(format!("{}: {e}", dir.display())))?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| Error::Report(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }

    /// # Errors
    ///
    /// `Error::Report` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| Error::Report(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| Error::Report(format!("{}: {e}", path.display())))
    }

    /// Fraction of connected clients that received the update.
    #[must_use]
    pub fn delivery_ratio(&self) -> f64 {
        if self.stats.connected_clients == 0 {
            0.0
        } else {
            self.stats.clients_received_update as f64 / self.stats.connected_clients as f64
        }
    }
}

/// Log the statistics and latency distribution of a round.
pub fn log_summary(round: &MeasurementRound) {
    let s = round.stats;
    info!(
        round = round.id,
        connected = round.connected,
        received = round.received(),
        avg_ms = s.mean,
        median_ms = s.median,
        min_ms = s.min,
        max_ms = s.max,
        p95_ms = s.p95,
        p99_ms = s.p99,
        std_dev_ms = s.std_dev,
        "latency summary"
    );

    let values = round.elapsed_ms();
    let distribution = LatencyDistribution::from_values(&values);
    let total = distribution.total();
    if total == 0 {
        return;
    }
    for (bucket, count) in distribution.buckets() {
        let percent = (count as f64 * 1000.0 / total as f64).round() / 10.0;
        info!(bucket, count, percent, "latency distribution");
    }
}

/// One line of the scalability comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalabilityRow {
    pub connected_clients: usize,
    pub timestamp: DateTime<Utc>,
    pub avg_latency_ms: Option<f64>,
    pub median_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub delivery_ratio: f64,
}

fn is_report_file(name: &str) -> bool {
    name.strip_prefix(FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|rest| rest.contains(FILE_INFIX))
}

/// Load every report file in `dir`. Unreadable files are skipped with a
/// warning.
///
/// # Errors
///
/// `Error::Report` if the directory cannot be listed.
pub fn load_reports(dir: &Path) -> Result<Vec<SummaryReport>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::Report(format!("{}: {e}", dir.display())))?;

    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Report(e.to_string()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_report_file);
        if !matches {
            continue;
        }
        match SummaryReport::load(&path) {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "skipping report"),
        }
    }
    Ok(reports)
}

/// Newest report per connected-client count, ordered by client count.
#[must_use]
pub fn scalability_table(reports: &[SummaryReport]) -> Vec<ScalabilityRow> {
    let mut newest: BTreeMap<usize, &SummaryReport> = BTreeMap::new();
    for report in reports {
        let key = report.stats.connected_clients;
        match newest.get(&key) {
            Some(existing) if existing.timestamp >= report.timestamp => {}
            _ => {
                newest.insert(key, report);
            }
        }
    }

    newest
        .into_values()
        .map(|r| ScalabilityRow {
            connected_clients: r.stats.connected_clients,
            timestamp: r.timestamp,
            avg_latency_ms: r.stats.avg_latency_ms,
            median_latency_ms: r.stats.median_latency_ms,
            p95_latency_ms: r.stats.p95_latency_ms,
            p99_latency_ms: r.stats.p99_latency_ms,
            max_latency_ms: r.stats.max_latency_ms,
            delivery_ratio: r.delivery_ratio(),
        })
        .collect()
}
