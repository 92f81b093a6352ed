use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use tokio::fs;

use crate::config::ReportsConfig;
use crate::error::{MeetprepError, Result};
use crate::security::{sanitize_filename, validate_file_path};

const PREFIX: &str = "meeting_prep_";
const EXTENSION: &str = ".md";
const FILE_TIMESTAMP: &str = "%d%m%Y_%H%M%S";
const HEADER_TIMESTAMP: &str = "%d/%m/%Y %H:%M:%S";

/// A stored report, described from its file name and metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub name: String,
    pub company: String,
    pub created: Option<NaiveDateTime>,
    pub modified: DateTime<Local>,
    pub size: u64,
}

/// Split `meeting_prep_<company>_<ddmmYYYY>_<HHMMSS>.md` into company and
/// timestamp. Names without a parseable timestamp keep the whole middle part
/// as the company.
pub fn parse_report_name(name: &str) -> Option<(String, Option<NaiveDateTime>)> {
    let stem = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    let mut parts = stem.rsplitn(3, '_');
    let (time, date, company) = (parts.next(), parts.next(), parts.next());
    if let (Some(time), Some(date), Some(company)) = (time, date, company) {
        if let Ok(created) = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), FILE_TIMESTAMP) {
            return Some((company.to_string(), Some(created)));
        }
    }
    Some((stem.to_string(), None))
}

pub fn report_file_name(company: &str, at: DateTime<Local>) -> String {
    format!(
        "{PREFIX}{}_{}{EXTENSION}",
        sanitize_filename(company.trim()),
        at.format(FILE_TIMESTAMP)
    )
}

pub fn render_report(result: &str, company: &str, at: DateTime<Local>) -> String {
    format!(
        "# Meeting preparation - {}\n**Created:** {}\n\n{}",
        company.trim(),
        at.format(HEADER_TIMESTAMP),
        result
    )
}

/// Markdown reports kept in one directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
    max_bytes: Option<u64>,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: None,
        }
    }

    pub fn from_config(cfg: &ReportsConfig) -> Self {
        Self::new(cfg.dir.clone()).with_max_bytes(cfg.max_file_size_mb.saturating_mul(1024 * 1024))
    }

    /// Refuse to save reports larger than `max_bytes` once rendered.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, result: &str, company: &str) -> Result<ReportEntry> {
        let now = Local::now();
        let content = render_report(result, company, now);
        if let Some(max) = self.max_bytes {
            if content.len() as u64 > max {
                return Err(MeetprepError::Validation(vec![format!(
                    "report is {} bytes, over the {max} byte limit",
                    content.len()
                )]));
            }
        }

        fs::create_dir_all(&self.dir).await.map_err(|err| {
            MeetprepError::Storage(format!(
                "cannot create reports directory `{}`: {err}",
                self.dir.display()
            ))
        })?;

        let name = report_file_name(company, now);
        let path = self.dir.join(&name);
        fs::write(&path, content)
            .await
            .map_err(|err| {
                MeetprepError::Storage(format!("failed to write `{}`: {err}", path.display()))
            })?;
        tracing::info!(report = %name, "report saved");

        self.entry_for(&name).await
    }

    /// Reports newest first by modification time.
    pub async fn list(&self) -> Result<Vec<ReportEntry>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let Ok(name) = item.file_name().into_string() else {
                continue;
            };
            if !(name.starts_with(PREFIX) && name.ends_with(EXTENSION)) {
                continue;
            }
            match self.entry_for(&name).await {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::debug!(report = %name, error = %err, "skipping report"),
            }
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<ReportEntry>> {
        let mut entries = self.list().await?;
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn read(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?;
        fs::read_to_string(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                MeetprepError::NotFound(format!("report `{name}`"))
            } else {
                MeetprepError::Storage(format!("failed to read `{name}`: {err}"))
            }
        })
    }

    /// Delete everything past the newest `max_files` reports. Returns the
    /// number of files removed.
    pub async fn clean_old(&self, max_files: usize) -> Result<usize> {
        let entries = self.list().await?;
        let mut removed = 0;
        for entry in entries.iter().skip(max_files) {
            match fs::remove_file(self.dir.join(&entry.name)).await {
                Ok(()) => removed += 1,
                Err(err) => tracing::warn!(report = %entry.name, error = %err, "cannot remove old report"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleaned old reports");
        }
        Ok(removed)
    }

    /// Resolve a bare report file name inside the store.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let is_bare = !name.contains(['/', '\\']);
        if !is_bare
            || !validate_file_path(name)
            || !name.starts_with(PREFIX)
            || !name.ends_with(EXTENSION)
        {
            crate::security::log_security_event("invalid_report_name", "rejected report name", Some(name));
            return Err(MeetprepError::Validation(vec![format!(
                "invalid report name `{name}`"
            )]));
        }
        Ok(self.dir.join(name))
    }

    async fn entry_for(&self, name: &str) -> Result<ReportEntry> {
        let meta = fs::metadata(self.dir.join(name)).await?;
        let (company, created) = parse_report_name(name).unwrap_or_default();
        Ok(ReportEntry {
            name: name.to_string(),
            company,
            created,
            modified: meta.modified().map(DateTime::<Local>::from)?,
            size: meta.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, age_secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn parses_names_with_multi_word_companies() {
        let (company, created) =
            parse_report_name("meeting_prep_Acme Corp_05032024_142501.md").unwrap();
        assert_eq!(company, "Acme Corp");
        assert_eq!(
            created.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-05 14:25:01"
        );

        let (company, created) = parse_report_name("meeting_prep_odd.md").unwrap();
        assert_eq!(company, "odd");
        assert!(created.is_none());
        assert!(parse_report_name("notes.md").is_none());
    }

    #[tokio::test]
    async fn save_writes_header_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("reports"));

        let entry = store.save("## Brief\nbody", "Acme / Corp").await.unwrap();

        assert!(entry.name.starts_with("meeting_prep_Acme Corp_"));
        assert_eq!(entry.company, "Acme Corp");
        assert!(entry.created.is_some());
        let text = store.read(&entry.name).await.unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# Meeting preparation - Acme / Corp"));
        assert!(lines.next().unwrap().starts_with("**Created:** "));
        assert!(text.ends_with("## Brief\nbody"));
    }

    #[tokio::test]
    async fn oversized_reports_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path()).with_max_bytes(200);

        assert!(store.save("short", "Acme").await.is_ok());
        let err = store.save(&"x".repeat(500), "Acme").await.unwrap_err();
        assert!(matches!(err, MeetprepError::Validation(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);

        let cfg = ReportsConfig {
            dir: dir.path().to_path_buf(),
            max_file_size_mb: 1,
            ..ReportsConfig::default()
        };
        let err = ReportStore::from_config(&cfg)
            .save(&"y".repeat(2 * 1024 * 1024), "Acme")
            .await
            .unwrap_err();
        assert!(matches!(err, MeetprepError::Validation(_)));
    }

    #[tokio::test]
    async fn lists_newest_first_and_cleans_old() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let path = dir.path().join(format!("meeting_prep_{name}_0101202{i}_100000.md"));
            std::fs::write(&path, "x").unwrap();
            touch(&path, 100 * (3 - i as u64));
        }
        std::fs::write(dir.path().join("other.txt"), "ignored").unwrap();

        let recent = store.recent(2).await.unwrap();
        assert_eq!(
            recent.iter().map(|e| e.company.as_str()).collect::<Vec<_>>(),
            vec!["c", "b"]
        );

        assert_eq!(store.clean_old(1).await.unwrap(), 2);
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].company, "c");
        assert!(dir.path().join("other.txt").exists());
    }

    #[tokio::test]
    async fn read_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        for name in ["../secret.md", "meeting_prep_../x.md", "/etc/passwd", "notes.md"] {
            assert!(matches!(
                store.read(name).await,
                Err(MeetprepError::Validation(_))
            ));
        }
        assert!(matches!(
            store.read("meeting_prep_missing_01012024_000000.md").await,
            Err(MeetprepError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
