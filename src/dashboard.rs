//! Aggregates shown on the dashboard overview.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDate};
use serde::Serialize;
use sysinfo::Disks;

use crate::config::AppConfig;
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use crate::reports::{ReportEntry, ReportStore};

const RECENT_DAYS: i64 = 7;
const TREND_DAYS: usize = 7;
const TOP_COMPANIES: usize = 5;
const MIN_VALID_REPORT_BYTES: u64 = 100;
const DEFAULT_PREP_MINUTES: u32 = 45;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyCount {
    pub company: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub total_reports: usize,
    pub recent_reports: usize,
    pub unique_companies: usize,
    pub avg_prep_minutes: u32,
    pub success_rate: u32,
    pub trends: Vec<DayCount>,
    pub top_companies: Vec<CompanyCount>,
}

impl DashboardMetrics {
    pub async fn collect(store: &ReportStore, tracker: &PipelineMetrics) -> Result<Self> {
        let entries = store.list().await?;
        Ok(Self::from_entries(&entries, tracker, Local::now()))
    }

    pub fn from_entries(entries: &[ReportEntry], tracker: &PipelineMetrics, now: DateTime<Local>) -> Self {
        let cutoff = now - Duration::days(RECENT_DAYS);
        let recent_reports = entries.iter().filter(|e| e.modified >= cutoff).count();

        let mut per_company: HashMap<&str, usize> = HashMap::new();
        for entry in entries {
            *per_company.entry(entry.company.as_str()).or_default() += 1;
        }
        let mut top_companies: Vec<CompanyCount> = per_company
            .iter()
            .map(|(company, count)| CompanyCount {
                company: company.to_string(),
                count: *count,
            })
            .collect();
        top_companies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.company.cmp(&b.company)));
        top_companies.truncate(TOP_COMPANIES);

        let avg_prep_minutes = tracker
            .average_minutes()
            .map(|minutes| minutes.round().max(1.0) as u32)
            .unwrap_or_else(|| estimate_prep_minutes(entries));

        Self {
            total_reports: entries.len(),
            recent_reports,
            unique_companies: per_company.len(),
            avg_prep_minutes,
            success_rate: success_rate(entries),
            trends: daily_trend(entries),
            top_companies,
        }
    }
}

/// Larger reports are assumed to have taken longer: 30 minutes plus five per
/// kilobyte, capped at ten kilobytes.
pub fn estimate_prep_minutes(entries: &[ReportEntry]) -> u32 {
    if entries.is_empty() {
        return DEFAULT_PREP_MINUTES;
    }
    let total: u64 = entries.iter().map(|e| (e.size / 1000).min(10)).sum();
    let avg = total as f64 / entries.len() as f64;
    (30.0 + avg * 5.0) as u32
}

/// Percentage of reports larger than 100 bytes; 100 when there are none.
pub fn success_rate(entries: &[ReportEntry]) -> u32 {
    if entries.is_empty() {
        return 100;
    }
    let valid = entries
        .iter()
        .filter(|e| e.size > MIN_VALID_REPORT_BYTES)
        .count();
    (valid * 100 / entries.len()) as u32
}

/// Report counts for the most recent seven days that have any reports,
/// oldest first.
pub fn daily_trend(entries: &[ReportEntry]) -> Vec<DayCount> {
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for entry in entries {
        *per_day.entry(entry.modified.date_naive()).or_default() += 1;
    }
    let skip = per_day.len().saturating_sub(TREND_DAYS);
    per_day
        .into_iter()
        .skip(skip)
        .map(|(date, count)| DayCount { date, count })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub reports_dir_ok: bool,
    pub api_keys_ok: bool,
    pub missing_keys: Vec<String>,
    pub free_disk_gb: Option<u64>,
}

impl SystemHealth {
    pub fn check(cfg: &AppConfig) -> Self {
        let missing_keys: Vec<String> = cfg
            .missing_api_keys()
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            reports_dir_ok: cfg.reports.dir.is_dir(),
            api_keys_ok: missing_keys.is_empty(),
            missing_keys,
            free_disk_gb: free_disk_gb(&cfg.reports.dir),
        }
    }
}

/// Free space on the disk holding `path`, in whole gigabytes.
pub fn free_disk_gb(path: &Path) -> Option<u64> {
    let target = absolute(path)?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space() / (1024 * 1024 * 1024))
}

fn absolute(path: &Path) -> Option<PathBuf> {
    let existing = if path.exists() { path } else { Path::new(".") };
    existing.canonicalize().ok()
}
