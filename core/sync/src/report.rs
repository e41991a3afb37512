//! Import reports, persisted as JSON plus a readable text version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use settingsync_common::{Category, Result};
use settingsync_host::NoticeLevel;

use crate::reconcile::{ApplyAction, ApplyResult};

const REPORT_PREFIX: &str = "import-report-";
const MAX_REPORT_BYTES: u64 = 10 * 1024 * 1024;
const MAX_REPORT_FILES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Single,
    All,
}

/// Outcome of importing one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: Category,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CategoryResult {
    pub fn ok(category: Category, message: impl Into<String>) -> Self {
        Self {
            category,
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(category: Category, message: impl Into<String>, error: impl ToString) -> Self {
        Self {
            category,
            success: false,
            message: message.into(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl ReportSummary {
    /// Success percentage. An empty run counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.success as f64 * 100.0 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub timestamp: DateTime<Utc>,
    pub kind: ReportKind,
    pub categories: Vec<Category>,
    pub results: Vec<CategoryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_results: Option<Vec<ApplyResult>>,
    pub summary: ReportSummary,
}

impl ImportReport {
    pub fn new(
        kind: ReportKind,
        categories: Vec<Category>,
        results: Vec<CategoryResult>,
        extension_results: Option<Vec<ApplyResult>>,
        started: Instant,
    ) -> Self {
        let success = results.iter().filter(|r| r.success).count();
        let summary = ReportSummary {
            total: results.len(),
            success,
            failed: results.len() - success,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        Self {
            timestamp: Utc::now(),
            kind,
            categories,
            results,
            extension_results,
            summary,
        }
    }

    /// The single notification that closes an import.
    pub fn notice(&self) -> (NoticeLevel, String) {
        let message = format!(
            "Import complete: {}/{} succeeded ({:.1}%)",
            self.summary.success,
            self.summary.total,
            self.summary.success_rate()
        );
        let level = if self.summary.failed > 0 {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Info
        };
        (level, message)
    }

    /// Human-readable rendering.
    pub fn to_text(&self) -> String {
        let mut out = String::from("=== Settings import report ===\n\n");
        let _ = writeln!(out, "Time: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(
            out,
            "Kind: {}",
            match self.kind {
                ReportKind::All => "import all categories",
                ReportKind::Single => "single category",
            }
        );
        let _ = writeln!(
            out,
            "Duration: {:.2} s\n",
            self.summary.duration_ms as f64 / 1000.0
        );

        let _ = writeln!(out, "Summary:");
        let _ = writeln!(out, "  Total: {}", self.summary.total);
        let _ = writeln!(out, "  Succeeded: {}", self.summary.success);
        let _ = writeln!(out, "  Failed: {}", self.summary.failed);
        let _ = writeln!(out, "  Success rate: {:.1}%\n", self.summary.success_rate());

        let _ = writeln!(out, "Results:");
        for result in &self.results {
            let mark = if result.success { "OK  " } else { "FAIL" };
            let _ = writeln!(out, "  {} {}: {}", mark, result.category, result.message);
            if let Some(error) = result.error.as_deref().filter(|_| !result.success) {
                let _ = writeln!(out, "       error: {}", error);
            }
        }

        if let Some(ext) = self.extension_results.as_deref().filter(|r| !r.is_empty()) {
            out.push('\n');
            out.push_str(&render_extension_results(ext));
        }

        out
    }
}

/// Per-add-on section of the text report.
pub fn render_extension_results(results: &[ApplyResult]) -> String {
    let mut out = String::from("=== Add-on results ===\n\n");
    let failed: Vec<&ApplyResult> = results.iter().filter(|r| !r.success).collect();
    let _ = writeln!(out, "Total: {}", results.len());
    let _ = writeln!(out, "Succeeded: {}", results.len() - failed.len());
    let _ = writeln!(out, "Failed: {}\n", failed.len());

    let groups = [
        (ApplyAction::Install, "Installed"),
        (ApplyAction::Update, "Updated"),
        (ApplyAction::Enable, "Enabled"),
        (ApplyAction::Disable, "Disabled"),
        (ApplyAction::Skip, "Skipped"),
    ];
    for (action, heading) in groups {
        let items: Vec<&ApplyResult> = results.iter().filter(|r| r.action == action).collect();
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} ({}):", heading, items.len());
        for item in items {
            let mark = if item.success { '✓' } else { '✗' };
            match &item.version {
                Some(v) => {
                    let _ = writeln!(out, "  {} {} v{}", mark, item.display_name, v);
                }
                None => {
                    let _ = writeln!(out, "  {} {}", mark, item.display_name);
                }
            }
        }
        out.push('\n');
    }

    if !failed.is_empty() {
        let _ = writeln!(out, "Failures:");
        for item in failed {
            let _ = writeln!(out, "  • {} ({})", item.display_name, item.action);
            let _ = writeln!(
                out,
                "    error: {}",
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    out
}

/// Writes reports into a directory and prunes old ones.
pub struct ReportBuilder {
    dir: PathBuf,
}

impl ReportBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_local_dir>/settingsync/reports`, or the temp dir.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("settingsync").join("reports"))
            .unwrap_or_else(|| std::env::temp_dir().join("settingsync-reports"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `report` as JSON and text. Returns the JSON path.
    pub async fn save(&self, report: &ImportReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let stamp = report.timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let json_path = self.dir.join(format!("{}{}.json", REPORT_PREFIX, stamp));
        let text_path = json_path.with_extension("txt");

        fs::write(&json_path, serde_json::to_string_pretty(report)?).await?;
        fs::write(&text_path, report.to_text()).await?;
        info!("Import report saved to {}", json_path.display());

        if let Err(e) = self.prune().await {
            warn!("Failed to prune old reports: {}", e);
        }
        Ok(json_path)
    }

    /// Keep the newest reports once the directory grows past its limits.
    async fn prune(&self) -> Result<()> {
        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(REPORT_PREFIX)
                || !(name.ends_with(".json") || name.ends_with(".txt"))
            {
                continue;
            }
            let meta = entry.metadata().await?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), modified, meta.len()));
        }

        let total: u64 = files.iter().map(|(_, _, len)| len).sum();
        if total <= MAX_REPORT_BYTES && files.len() <= MAX_REPORT_FILES {
            return Ok(());
        }

        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        for (path, _, _) in files.into_iter().skip(MAX_REPORT_FILES) {
            debug!("Removing old report {}", path.display());
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settingsync_common::AddOnId;
    use tempfile::TempDir;

    fn sample(results: Vec<CategoryResult>) -> ImportReport {
        let ext = vec![
            ApplyResult {
                id: AddOnId::new("a.b").unwrap(),
                display_name: "A B".to_string(),
                action: ApplyAction::Install,
                success: true,
                error: None,
                version: Some("1.0.0".to_string()),
            },
            ApplyResult {
                id: AddOnId::new("c.d").unwrap(),
                display_name: "C D".to_string(),
                action: ApplyAction::Disable,
                success: false,
                error: Some("needs a manual change".to_string()),
                version: None,
            },
        ];
        ImportReport::new(
            ReportKind::All,
            Category::ALL.to_vec(),
            results,
            Some(ext),
            Instant::now(),
        )
    }

    #[test]
    fn test_summary_and_notice() {
        let report = sample(vec![
            CategoryResult::ok(Category::Extensions, "2 changes applied"),
            CategoryResult::ok(Category::Settings, "settings replaced"),
            CategoryResult::failed(Category::Themes, "themes failed", "Network error: down"),
        ]);

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.success, 2);
        assert_eq!(report.summary.failed, 1);

        let (level, message) = report.notice();
        assert_eq!(level, NoticeLevel::Warning);
        assert_eq!(message, "Import complete: 2/3 succeeded (66.7%)");
    }

    #[test]
    fn test_all_successful_notice_is_info() {
        let report = sample(vec![CategoryResult::ok(Category::Snippets, "done")]);
        let (level, message) = report.notice();
        assert_eq!(level, NoticeLevel::Info);
        assert!(message.ends_with("(100.0%)"));
    }

    #[test]
    fn test_text_rendering() {
        let report = sample(vec![CategoryResult::failed(
            Category::Themes,
            "themes failed",
            "Network error: down",
        )]);
        let text = report.to_text();
        assert!(text.contains("FAIL themes: themes failed"));
        assert!(text.contains("error: Network error: down"));
        assert!(text.contains("Installed (1):"));
        assert!(text.contains("✓ A B v1.0.0"));
        assert!(text.contains("• C D (disable)"));
    }

    #[test]
    fn test_json_shape() {
        let report = sample(vec![CategoryResult::ok(Category::Settings, "ok")]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "all");
        assert_eq!(value["categories"][0], "extensions");
        assert!(value["summary"]["durationMs"].is_u64());
        assert_eq!(value["extensionResults"][0]["action"], "install");
        assert!(value["results"][0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_save_writes_json_and_text() {
        let temp = TempDir::new().unwrap();
        let builder = ReportBuilder::new(temp.path().join("reports"));
        let report = sample(vec![CategoryResult::ok(Category::Settings, "ok")]);

        let json_path = builder.save(&report).await.unwrap();
        assert!(json_path.exists());
        assert!(json_path.with_extension("txt").exists());

        let parsed: ImportReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.summary, report.summary);
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("reports");
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..12u64 {
            let path = dir.join(format!("{}old-{:02}.txt", REPORT_PREFIX, i));
            std::fs::write(&path, "x").unwrap();
            let age = std::time::Duration::from_secs(3600 + i);
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(SystemTime::now() - age)
                .unwrap();
        }
        std::fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        let builder = ReportBuilder::new(&dir);
        let json_path = builder
            .save(&sample(vec![CategoryResult::ok(Category::Settings, "ok")]))
            .await
            .unwrap();

        let reports: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(REPORT_PREFIX))
            .collect();
        assert_eq!(reports.len(), MAX_REPORT_FILES);
        assert!(dir.join("unrelated.txt").exists());
        assert!(json_path.exists());
    }
}
