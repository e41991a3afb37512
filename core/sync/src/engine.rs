//! Core sync engine that orchestrates export and import operations.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

use settingsync_common::{
    is_plain_file_name, AddOnSnapshot, Category, Error, Result, SettingsSnapshot,
    SnippetSnapshot, Snapshot, ThemeSnapshot, WORKSPACE_SNIPPET_PREFIX,
};
use settingsync_host::{
    host_keys, ConfigStore, Host, Interaction, NoticeLevel, SyncConfiguration,
};
use settingsync_package::{MarketplaceFetcher, PackageSource};
use settingsync_storage::{create_default_registry, BackendContext, BackendRegistry, SyncBackend};

use crate::collector::{Collector, WORKSPACE_DIR};
use crate::compare::{compare, ChangeSet, ComparisonOutcome};
use crate::ignore::IgnoreSet;
use crate::reconcile::{ApplyResult, Reconciler};
use crate::report::{CategoryResult, ImportReport, ReportBuilder, ReportKind};
use crate::retry::{RetryConfig, RetryExecutor};

const CONTINUE_ACTION: &str = "Continue";
const DETAILS_ACTION: &str = "Details";
const OVERWRITE_ACTION: &str = "Overwrite";
const RELOAD_ACTION: &str = "Reload now";
const OPEN_VIEW_ACTION: &str = "Open add-on view";

/// Outcome of importing one category, before it is turned into a report entry.
struct CategoryOutcome {
    message: String,
    addon_results: Option<Vec<ApplyResult>>,
}

/// Main engine for exporting and importing editor configuration.
///
/// Configuration is read from the store at the start of every operation
/// and validated before any backend or filesystem access.
pub struct SyncEngine {
    host: Arc<dyn Host>,
    interaction: Arc<dyn Interaction>,
    config_store: Arc<dyn ConfigStore>,
    registry: Arc<BackendRegistry>,
    packages: Arc<dyn PackageSource>,
    reports: ReportBuilder,
    retry: RetryExecutor,
    collector: Collector,
}

impl SyncEngine {
    /// Create an engine with the default backends, marketplace fetcher and
    /// report directory.
    pub fn new(
        host: Arc<dyn Host>,
        interaction: Arc<dyn Interaction>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        Ok(Self {
            collector: Collector::new(host.clone()),
            host,
            interaction,
            config_store,
            registry: Arc::new(create_default_registry()),
            packages: Arc::new(MarketplaceFetcher::new()?),
            reports: ReportBuilder::default(),
            retry: RetryExecutor::default(),
        })
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_packages(mut self, packages: Arc<dyn PackageSource>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_reports(mut self, reports: ReportBuilder) -> Self {
        self.reports = reports;
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    /// Load and validate configuration, then build the selected backend.
    async fn prepare(&self) -> Result<(SyncConfiguration, Arc<dyn SyncBackend>)> {
        let config = SyncConfiguration::load(self.config_store.as_ref()).await?;
        config.validate().into_result()?;

        let ctx = BackendContext::new(config.clone(), self.config_store.clone())
            .with_protected_dir(self.host.user_dir());
        let backend = self.registry.resolve(&ctx)?;
        debug!("Using {} backend", backend.name());
        Ok((config, backend))
    }

    fn notify_error(&self, what: &str, err: &Error) {
        let level = if err.kind().is_warning() {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Error
        };
        error!("{} failed: {}", what, err);
        self.interaction
            .notify(level, &format!("{} failed: {}", what, err));
    }

    /// Verify the configured backend is reachable and accepts the credential.
    ///
    /// Returns the backend name.
    pub async fn check_backend(&self) -> Result<String> {
        let (_, backend) = self.prepare().await?;
        let name = backend.name().to_string();
        let label = format!("Checking {} backend", name);
        self.retry
            .execute(&label, move || {
                let backend = backend.clone();
                async move { backend.check().await }
            })
            .await?;
        info!("{} backend is ready", name);
        Ok(name)
    }

    /// Collect one category and write it to the configured backend.
    ///
    /// Returns the backend's locator for the written document.
    pub async fn export_category(&self, category: Category) -> Result<String> {
        let result = async {
            let (config, backend) = self.prepare().await?;
            self.export_with(category, &config, backend.as_ref()).await
        }
        .await;

        match &result {
            Ok(locator) => self.interaction.notify(
                NoticeLevel::Info,
                &format!("Exported {} to {}", category, locator),
            ),
            Err(e) => self.notify_error(&format!("Export of {}", category), e),
        }
        result
    }

    async fn export_with(
        &self,
        category: Category,
        config: &SyncConfiguration,
        backend: &dyn SyncBackend,
    ) -> Result<String> {
        let snapshot = self.collector.collect(category, config).await?;
        let locator = backend.export(&snapshot).await?;
        info!("Exported {} to {}", category, locator);
        Ok(locator)
    }

    /// Export every category in order. One category failing does not stop
    /// the rest; only invalid configuration fails the whole call.
    pub async fn export_all(&self) -> Result<Vec<CategoryResult>> {
        let (config, backend) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.notify_error("Export", &e);
                return Err(e);
            }
        };

        let step = 100.0 / Category::ALL.len() as f64;
        let mut results = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            match self.export_with(category, &config, backend.as_ref()).await {
                Ok(locator) => results.push(CategoryResult::ok(category, locator)),
                Err(e) => {
                    error!("Export of {} failed: {}", category, e);
                    results.push(CategoryResult::failed(
                        category,
                        format!("Export of {} failed", category),
                        &e,
                    ));
                }
            }
            self.interaction
                .progress(step, &format!("Exported {}", category));
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed == 0 {
            self.interaction
                .notify(NoticeLevel::Info, "All categories exported");
        } else {
            self.interaction.notify(
                NoticeLevel::Warning,
                &format!("Export finished with {} failed categories", failed),
            );
        }
        Ok(results)
    }

    async fn confirm_overwrite(&self, what: &str) -> Result<()> {
        let question = format!(
            "Importing will overwrite your local {}. Continue?",
            what
        );
        match self
            .interaction
            .prompt(&question, &[OVERWRITE_ACTION])
            .await
            .as_deref()
        {
            Some(OVERWRITE_ACTION) => Ok(()),
            _ => {
                info!("Import of {} cancelled by user", what);
                Err(Error::Cancelled(format!("Import of {} cancelled", what)))
            }
        }
    }

    /// Import one category, replacing local state.
    ///
    /// Add-ons go through compare, confirm and apply; other categories are
    /// overwritten outright.
    pub async fn import_category(&self, category: Category) -> Result<ImportReport> {
        let started = Instant::now();
        let (config, backend) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.notify_error(&format!("Import of {}", category), &e);
                return Err(e);
            }
        };
        self.confirm_overwrite(category.as_str()).await?;

        let (result, addon_results) = match self.import_with(category, &config, backend.clone()).await {
            Ok(outcome) => (
                CategoryResult::ok(category, outcome.message),
                outcome.addon_results,
            ),
            Err(Error::Cancelled(reason)) => return Err(Error::Cancelled(reason)),
            Err(e) => {
                self.notify_error(&format!("Import of {}", category), &e);
                (
                    CategoryResult::failed(category, format!("Import of {} failed", category), &e),
                    None,
                )
            }
        };

        let report = ImportReport::new(
            ReportKind::Single,
            vec![category],
            vec![result],
            addon_results,
            started,
        );
        self.publish(&report).await;
        Ok(report)
    }

    /// Import every category in order, asking for confirmation once.
    pub async fn import_all(&self) -> Result<ImportReport> {
        let started = Instant::now();
        let (config, backend) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.notify_error("Import", &e);
                return Err(e);
            }
        };
        self.confirm_overwrite("configuration").await?;

        let step = 100.0 / Category::ALL.len() as f64;
        let mut results = Vec::with_capacity(Category::ALL.len());
        let mut addon_results = None;

        for category in Category::ALL {
            match self.import_with(category, &config, backend.clone()).await {
                Ok(outcome) => {
                    if outcome.addon_results.is_some() {
                        addon_results = outcome.addon_results;
                    }
                    results.push(CategoryResult::ok(category, outcome.message));
                }
                Err(e) => {
                    error!("Import of {} failed: {}", category, e);
                    results.push(CategoryResult::failed(
                        category,
                        format!("Import of {} failed", category),
                        &e,
                    ));
                }
            }
            self.interaction
                .progress(step, &format!("Imported {}", category));
        }

        let report = ImportReport::new(
            ReportKind::All,
            Category::ALL.to_vec(),
            results,
            addon_results,
            started,
        );
        self.publish(&report).await;
        Ok(report)
    }

    /// Save, show and announce a report. Saving failures are logged only.
    async fn publish(&self, report: &ImportReport) {
        if let Err(e) = self.reports.save(report).await {
            warn!("Failed to save import report: {}", e);
        }
        self.interaction
            .show_document("Import report", &report.to_text());
        let (level, message) = report.notice();
        self.interaction.notify(level, &message);
    }

    async fn fetch_remote(&self, category: Category, backend: Arc<dyn SyncBackend>) -> Result<Snapshot> {
        let label = format!("Reading {} from {}", category, backend.name());
        self.retry
            .execute(&label, move || {
                let backend = backend.clone();
                async move { backend.import(category).await }
            })
            .await
    }

    async fn import_with(
        &self,
        category: Category,
        config: &SyncConfiguration,
        backend: Arc<dyn SyncBackend>,
    ) -> Result<CategoryOutcome> {
        let snapshot = self.fetch_remote(category, backend).await?;
        let outcome = match snapshot {
            Snapshot::Extensions(remote) => self.apply_addons(remote, config).await?,
            Snapshot::Settings(settings) => self.apply_settings(settings).await?,
            Snapshot::Themes(themes) => self.apply_themes(themes).await?,
            Snapshot::Snippets(snippets) => self.apply_snippets(snippets).await?,
        };
        info!("Imported {}: {}", category, outcome.message);
        Ok(outcome)
    }

    /// Compare the remote add-on list with the local one.
    pub async fn compare_addons(&self) -> Result<Vec<ComparisonOutcome>> {
        let (config, backend) = self.prepare().await?;
        let remote = self
            .fetch_remote(Category::Extensions, backend)
            .await?
            .into_addons()?;
        let ignore = IgnoreSet::new(&config.ignored_extensions);
        let local = self
            .collector
            .addons(&ignore, config.sync_disabled_extensions)
            .await?;
        Ok(compare(&local.list, &remote.list, &ignore))
    }

    async fn apply_addons(
        &self,
        remote: AddOnSnapshot,
        config: &SyncConfiguration,
    ) -> Result<CategoryOutcome> {
        let ignore = IgnoreSet::new(&config.ignored_extensions);
        let local = self
            .collector
            .addons(&ignore, config.sync_disabled_extensions)
            .await?;
        let outcomes = compare(&local.list, &remote.list, &ignore);
        let changes = ChangeSet::from_outcomes(&outcomes);

        if changes.is_empty() {
            self.interaction
                .notify(NoticeLevel::Info, "All add-ons are up to date");
            return Ok(CategoryOutcome {
                message: "All add-ons are up to date".to_string(),
                addon_results: Some(Vec::new()),
            });
        }

        let question = format!("Add-on changes: {}. Continue?", changes.summary());
        loop {
            let answer = self
                .interaction
                .prompt(&question, &[CONTINUE_ACTION, DETAILS_ACTION])
                .await;
            match answer.as_deref() {
                Some(CONTINUE_ACTION) => break,
                Some(DETAILS_ACTION) => self
                    .interaction
                    .show_document("Add-on sync details", &changes.details()),
                _ => return Err(Error::Cancelled("Add-on changes declined".to_string())),
            }
        }

        let reconciler = Reconciler::new(
            self.host.clone(),
            self.packages.clone(),
            self.interaction.clone(),
        );
        let report = reconciler.apply(&outcomes).await;
        self.follow_up(&report).await;

        Ok(CategoryOutcome {
            message: format!(
                "{} of {} add-on changes applied",
                report.succeeded(),
                report.results.len()
            ),
            addon_results: Some(report.results),
        })
    }

    /// Manual toggle list and the reload offer.
    async fn follow_up(&self, report: &crate::reconcile::ApplyReport) {
        let capabilities = self.host.capabilities();

        let manual = report.manual_toggles();
        if !manual.is_empty() {
            let names: Vec<String> = manual
                .iter()
                .map(|r| format!("{} ({})", r.display_name, r.action))
                .collect();
            let message = format!(
                "These add-ons need a manual change: {}",
                names.join(", ")
            );
            if capabilities.addon_view {
                let answer = self
                    .interaction
                    .prompt(&message, &[OPEN_VIEW_ACTION])
                    .await;
                if answer.as_deref() == Some(OPEN_VIEW_ACTION) {
                    if let Err(e) = self.host.open_addon_view().await {
                        warn!("Failed to open add-on view: {}", e);
                    }
                }
            } else {
                self.interaction.notify(NoticeLevel::Warning, &message);
            }
        }

        if report.reload_required {
            if capabilities.reload {
                let answer = self
                    .interaction
                    .prompt("Add-ons changed. Reload the window now?", &[RELOAD_ACTION])
                    .await;
                if answer.as_deref() == Some(RELOAD_ACTION) {
                    if let Err(e) = self.host.reload().await {
                        warn!("Failed to reload: {}", e);
                    }
                }
            } else {
                self.interaction.notify(
                    NoticeLevel::Info,
                    "Restart the editor to finish applying add-on changes",
                );
            }
        }
    }

    async fn apply_settings(&self, settings: SettingsSnapshot) -> Result<CategoryOutcome> {
        let mut written = Vec::new();

        if let Some(raw) = &settings.user_raw {
            write_text(&self.host.user_settings_path(), raw).await?;
            written.push("user");
        }
        if let Some(raw) = &settings.workspace_raw {
            match self.host.workspace_folders().first() {
                Some(folder) => {
                    let path = folder.join(WORKSPACE_DIR).join("settings.json");
                    write_text(&path, raw).await?;
                    written.push("workspace");
                }
                None => warn!("No workspace folder open, workspace settings not restored"),
            }
        }

        Ok(CategoryOutcome {
            message: if written.is_empty() {
                "No settings to restore".to_string()
            } else {
                format!("Restored {} settings", written.join(" and "))
            },
            addon_results: None,
        })
    }

    async fn apply_themes(&self, themes: ThemeSnapshot) -> Result<CategoryOutcome> {
        let settings = self.host.settings();
        let current = &themes.current;
        let keys = [
            (host_keys::COLOR_THEME, &current.color_theme),
            (host_keys::ICON_THEME, &current.icon_theme),
            (host_keys::PRODUCT_ICON_THEME, &current.product_icon_theme),
        ];

        let mut applied = 0;
        for (key, value) in keys {
            if let Some(value) = value {
                settings.update(key, Value::String(value.clone())).await?;
                applied += 1;
            }
        }

        Ok(CategoryOutcome {
            message: format!("Applied {} theme settings", applied),
            addon_results: None,
        })
    }

    async fn apply_snippets(&self, snippets: SnippetSnapshot) -> Result<CategoryOutcome> {
        let dir = self.host.snippets_dir();
        fs::create_dir_all(&dir).await?;

        let mut restored = 0;
        for (name, file) in &snippets.snippets {
            if name.starts_with(WORKSPACE_SNIPPET_PREFIX) {
                debug!("Skipping workspace snippet file {}", name);
                continue;
            }
            if !is_plain_file_name(name) || !file.has_known_extension() {
                warn!(
                    "Skipping snippet with unsafe name '{}{}'",
                    name, file.extension
                );
                continue;
            }
            fs::write(dir.join(format!("{}{}", name, file.extension)), &file.content).await?;
            restored += 1;
        }

        Ok(CategoryOutcome {
            message: format!("Restored {} snippet files", restored),
            addon_results: None,
        })
    }
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, text)
        .await
        .map_err(|e| Error::FileSystem(format!("Failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use settingsync_common::{ActiveThemes, AddOnId, SnippetFile};
    use settingsync_host::{
        keys, EditorEnvironment, Edition, HostCapabilities, HostCommand, InstalledAddOn,
        MemoryConfigStore, MemoryHost, ScriptedInteraction, VscodeHost,
    };
    use settingsync_storage::MemoryBackend;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::testing::{record, FakePackages};

    struct Fixture {
        temp: TempDir,
        host: Arc<MemoryHost>,
        interaction: Arc<ScriptedInteraction>,
        backend: Arc<MemoryBackend>,
        engine: SyncEngine,
    }

    fn fixture_with(
        host: MemoryHost,
        interaction: ScriptedInteraction,
        backend: MemoryBackend,
        temp: TempDir,
    ) -> Fixture {
        let host = Arc::new(host);
        let interaction = Arc::new(interaction);
        let backend = Arc::new(backend);

        let mut registry = BackendRegistry::new();
        let shared = backend.clone();
        registry
            .register(
                "local",
                Box::new(move |_: &BackendContext| Ok(shared.clone() as Arc<dyn SyncBackend>)),
            )
            .unwrap();

        let store = MemoryConfigStore::new()
            .with(keys::LOCAL_PATH, json!(temp.path().join("export").to_string_lossy()));

        let engine = SyncEngine::new(host.clone(), interaction.clone(), Arc::new(store))
            .unwrap()
            .with_registry(registry)
            .with_packages(Arc::new(FakePackages::default()))
            .with_reports(ReportBuilder::new(temp.path().join("reports")))
            .with_retry(
                RetryConfig::new(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            );

        Fixture {
            temp,
            host,
            interaction,
            backend,
            engine,
        }
    }

    fn fixture(interaction: ScriptedInteraction) -> Fixture {
        let temp = TempDir::new().unwrap();
        let host = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"));
        fixture_with(host, interaction, MemoryBackend::new(), temp)
    }

    fn installed(id: &str, version: &str) -> InstalledAddOn {
        InstalledAddOn::new(AddOnId::new(id).unwrap(), version)
    }

    async fn put_addons(backend: &MemoryBackend, records: Vec<settingsync_common::AddOnRecord>) {
        let doc = Snapshot::Extensions(AddOnSnapshot::new(records))
            .to_document()
            .unwrap();
        backend.put_document(Category::Extensions, doc).await;
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_before_io() {
        let temp = TempDir::new().unwrap();
        let host = Arc::new(MemoryHost::new(temp.path().join("User"), temp.path().join("ext")));
        let interaction = Arc::new(ScriptedInteraction::accepting());
        let store = MemoryConfigStore::new().with(keys::EXPORT_METHOD, json!("repository"));
        let engine = SyncEngine::new(host, interaction.clone(), Arc::new(store))
            .unwrap()
            .with_reports(ReportBuilder::new(temp.path().join("reports")));

        let result = engine.export_category(Category::Settings).await;
        assert!(matches!(result, Err(Error::Configuration(_))));

        let notices = interaction.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, NoticeLevel::Warning);

        let result = engine.import_all().await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(interaction.prompts().is_empty());
        assert!(!temp.path().join("reports").exists());
    }

    #[tokio::test]
    async fn test_self_clobber_guard_through_engine() {
        let temp = TempDir::new().unwrap();
        let user_dir = temp.path().join("User");
        std::fs::create_dir_all(&user_dir).unwrap();
        let host = Arc::new(MemoryHost::new(&user_dir, temp.path().join("ext")));
        let interaction = Arc::new(ScriptedInteraction::accepting());
        let store =
            MemoryConfigStore::new().with(keys::LOCAL_PATH, json!(user_dir.to_string_lossy()));
        let engine = SyncEngine::new(host, interaction, Arc::new(store)).unwrap();

        let result = engine.export_category(Category::Settings).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(std::fs::read_dir(&user_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_export_category_returns_locator() {
        let f = fixture(ScriptedInteraction::accepting());
        f.host
            .put_addon(installed("a.b", "1.0.0"))
            .await;

        let locator = f.engine.export_category(Category::Extensions).await.unwrap();
        assert_eq!(locator, "memory://vscode-extensions.json");

        let doc = f.backend.document(Category::Extensions).await.unwrap();
        assert!(doc.contains("a.b"));
        assert_eq!(f.interaction.notices()[0].0, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn test_export_all_reports_progress() {
        let f = fixture(ScriptedInteraction::accepting());
        let results = f.engine.export_all().await.unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(f.backend.export_count(), 4);
        assert_eq!(f.interaction.progress_steps(), vec![25.0; 4]);
    }

    #[tokio::test]
    async fn test_import_declined_has_no_side_effects() {
        let f = fixture(ScriptedInteraction::declining());
        let raw = "{\"editor.fontSize\": 14}";
        f.backend.put_document(Category::Settings, raw).await;

        let result = f.engine.import_category(Category::Settings).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(!f.host.user_settings_path().exists());
        assert_eq!(f.backend.import_count(), 0);
    }

    #[tokio::test]
    async fn test_import_settings_keeps_raw_text() {
        let f = fixture(ScriptedInteraction::accepting());
        let raw = "{\n  // comment\n  \"editor.fontSize\": 14,\n}";
        f.backend.put_document(Category::Settings, raw).await;

        let report = f.engine.import_category(Category::Settings).await.unwrap();
        assert_eq!(report.summary.success, 1);
        assert_eq!(
            std::fs::read_to_string(f.host.user_settings_path()).unwrap(),
            raw
        );
        assert_eq!(f.interaction.documents().len(), 1);
    }

    #[tokio::test]
    async fn test_import_themes_updates_host_keys() {
        let f = fixture(ScriptedInteraction::accepting());
        let themes = ThemeSnapshot::new(
            ActiveThemes {
                color_theme: Some("Monokai".to_string()),
                icon_theme: Some("vs-seti".to_string()),
                product_icon_theme: None,
            },
            Vec::new(),
        );
        let doc = Snapshot::Themes(themes).to_document().unwrap();
        f.backend.put_document(Category::Themes, doc).await;

        f.engine.import_category(Category::Themes).await.unwrap();

        let settings = f.host.settings();
        assert_eq!(
            settings.get_string(host_keys::COLOR_THEME).await.unwrap(),
            Some("Monokai".to_string())
        );
        assert_eq!(
            settings.get_string(host_keys::PRODUCT_ICON_THEME).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_import_snippets_skips_workspace_entries() {
        let f = fixture(ScriptedInteraction::accepting());
        let mut files = BTreeMap::new();
        files.insert(
            "rust".to_string(),
            SnippetFile {
                content: "{\"fn\":{}}".to_string(),
                extension: ".json".to_string(),
            },
        );
        files.insert(
            "workspace-team".to_string(),
            SnippetFile {
                content: "{}".to_string(),
                extension: ".code-snippets".to_string(),
            },
        );
        let doc = Snapshot::Snippets(SnippetSnapshot::new(files))
            .to_document()
            .unwrap();
        f.backend.put_document(Category::Snippets, doc).await;

        f.engine.import_category(Category::Snippets).await.unwrap();

        let dir = f.host.snippets_dir();
        assert_eq!(
            std::fs::read_to_string(dir.join("rust.json")).unwrap(),
            "{\"fn\":{}}"
        );
        assert!(!dir.join("workspace-team.code-snippets").exists());
    }

    #[tokio::test]
    async fn test_import_snippets_rejects_unsafe_document() {
        let f = fixture(ScriptedInteraction::accepting());
        let doc = r#"{"snippets":{
            "evil":{"content":"echo","extension":".sh"},
            "sub":{"content":"x","extension":"/../../escaped.txt"}}}"#;
        std::fs::create_dir_all(f.host.snippets_dir().join("sub")).unwrap();
        f.backend.put_document(Category::Snippets, doc).await;

        let report = f.engine.import_category(Category::Snippets).await.unwrap();

        assert_eq!(report.summary.failed, 1);
        assert!(!f.host.snippets_dir().join("evil.sh").exists());
        assert!(!f.host.user_dir().join("escaped.txt").exists());
        assert!(!f.temp.path().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_apply_snippets_skips_unknown_extensions() {
        let f = fixture(ScriptedInteraction::accepting());
        let mut files = BTreeMap::new();
        for (name, extension) in [
            ("evil", ".sh"),
            ("sub", "/../../escaped.txt"),
            ("..", ".json"),
            ("keep", ".code-snippets"),
        ] {
            files.insert(
                name.to_string(),
                SnippetFile {
                    content: "{}".to_string(),
                    extension: extension.to_string(),
                },
            );
        }

        let outcome = f
            .engine
            .apply_snippets(SnippetSnapshot::new(files))
            .await
            .unwrap();

        assert_eq!(outcome.message, "Restored 1 snippet files");
        let written: Vec<String> = std::fs::read_dir(f.host.snippets_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(written, vec!["keep.code-snippets".to_string()]);
        assert!(!f.host.user_dir().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_import_addons_up_to_date() {
        let f = fixture(ScriptedInteraction::accepting());
        f.host.put_addon(installed("a.b", "1.0.0")).await;
        put_addons(&f.backend, vec![record("a.b", "1.0.0", true)]).await;

        let report = f.engine.import_category(Category::Extensions).await.unwrap();

        assert_eq!(report.extension_results, Some(Vec::new()));
        assert!(f
            .interaction
            .notices()
            .iter()
            .any(|(_, m)| m == "All add-ons are up to date"));
    }

    #[tokio::test]
    async fn test_import_addons_details_then_continue() {
        let interaction = ScriptedInteraction::accepting()
            .then_answer(Some(OVERWRITE_ACTION))
            .then_answer(Some(DETAILS_ACTION))
            .then_answer(Some(CONTINUE_ACTION));
        let f = fixture(interaction);
        put_addons(
            &f.backend,
            vec![record("new.one", "1.0.0", true), record("new.two", "2.0.0", true)],
        )
        .await;

        let report = f.engine.import_category(Category::Extensions).await.unwrap();

        let ext = report.extension_results.unwrap();
        assert_eq!(ext.len(), 2);
        assert!(ext.iter().all(|r| r.success));

        let documents = f.interaction.documents();
        assert_eq!(documents[0].0, "Add-on sync details");
        assert!(documents[0].1.contains("Install 2 add-ons"));

        assert!(f
            .interaction
            .notices()
            .iter()
            .any(|(_, m)| m.contains("Restart the editor")));
        assert!(f.host.extensions_dir().join("new.one-1.0.0").exists());
    }

    #[tokio::test]
    async fn test_import_addons_declined_is_recorded_as_failure() {
        let interaction = ScriptedInteraction::accepting()
            .then_answer(Some(OVERWRITE_ACTION))
            .then_answer(None);
        let f = fixture(interaction);
        put_addons(&f.backend, vec![record("new.one", "1.0.0", true)]).await;

        let result = f.engine.import_category(Category::Extensions).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(f.host.commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_and_manual_toggles_with_capable_host() {
        let temp = TempDir::new().unwrap();
        let host = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"))
            .with_capabilities(HostCapabilities {
                toggle_addons: false,
                reload: true,
                addon_view: true,
            })
            .with_addon(installed("old.one", "1.0.0"));
        let f = fixture_with(host, ScriptedInteraction::accepting(), MemoryBackend::new(), temp);
        put_addons(
            &f.backend,
            vec![record("old.one", "1.0.0", false), record("new.one", "1.0.0", true)],
        )
        .await;

        f.engine.import_category(Category::Extensions).await.unwrap();

        let commands = f.host.commands().await;
        assert!(commands.contains(&HostCommand::OpenAddonView));
        assert!(commands.contains(&HostCommand::Reload));
    }

    #[tokio::test]
    async fn test_import_all_isolates_category_failures() {
        let f = fixture(ScriptedInteraction::accepting());
        f.backend
            .put_document(Category::Settings, "{\"a\": 1}")
            .await;
        f.backend
            .put_document(Category::Themes, "not json")
            .await;

        let report = f.engine.import_all().await.unwrap();

        assert_eq!(report.kind, ReportKind::All);
        assert_eq!(report.summary.total, 4);
        let status: Vec<(Category, bool)> = report
            .results
            .iter()
            .map(|r| (r.category, r.success))
            .collect();
        assert_eq!(
            status,
            vec![
                (Category::Extensions, false),
                (Category::Settings, true),
                (Category::Themes, false),
                (Category::Snippets, false),
            ]
        );
        // One overwrite confirmation for the whole run.
        assert_eq!(f.interaction.prompts().len(), 1);
        assert_eq!(f.interaction.progress_steps(), vec![25.0; 4]);

        let (level, message) = f.interaction.notices().last().cloned().unwrap();
        assert_eq!(level, NoticeLevel::Warning);
        assert_eq!(message, "Import complete: 1/4 succeeded (25.0%)");

        let saved = std::fs::read_dir(f.temp.path().join("reports")).unwrap().count();
        assert_eq!(saved, 2);
    }

    #[tokio::test]
    async fn test_import_all_keeps_comments_in_restored_settings() {
        let temp = TempDir::new().unwrap();
        let env = EditorEnvironment::resolve(
            Edition::Standard,
            None,
            temp.path(),
            &temp.path().join("config"),
        );
        let host = Arc::new(VscodeHost::new(env));
        let backend = Arc::new(MemoryBackend::new());
        let raw = "{\n    // keep this note\n    \"zeta.option\": 1,\n    \"alpha.option\": 2\n}\n";
        backend.put_document(Category::Settings, raw).await;
        let themes = ThemeSnapshot::new(
            ActiveThemes {
                color_theme: Some("Monokai".to_string()),
                ..Default::default()
            },
            Vec::new(),
        );
        backend
            .put_document(
                Category::Themes,
                Snapshot::Themes(themes).to_document().unwrap(),
            )
            .await;

        let mut registry = BackendRegistry::new();
        let shared = backend.clone();
        registry
            .register(
                "local",
                Box::new(move |_: &BackendContext| Ok(shared.clone() as Arc<dyn SyncBackend>)),
            )
            .unwrap();
        let store = MemoryConfigStore::new()
            .with(keys::LOCAL_PATH, json!(temp.path().join("export").to_string_lossy()));
        let engine = SyncEngine::new(
            host.clone(),
            Arc::new(ScriptedInteraction::accepting()),
            Arc::new(store),
        )
        .unwrap()
        .with_registry(registry)
        .with_reports(ReportBuilder::new(temp.path().join("reports")));

        let report = engine.import_all().await.unwrap();
        assert!(report.results[1].success && report.results[2].success);

        assert_eq!(
            std::fs::read_to_string(host.user_settings_path()).unwrap(),
            "{\n    // keep this note\n    \"zeta.option\": 1,\n    \"alpha.option\": 2,\n    \"workbench.colorTheme\": \"Monokai\"\n}\n"
        );
    }

    #[tokio::test]
    async fn test_remote_reads_are_retried() {
        let temp = TempDir::new().unwrap();
        let host = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"));
        let f = fixture_with(
            host,
            ScriptedInteraction::accepting(),
            MemoryBackend::new().with_transient_failures(2),
            temp,
        );
        f.backend.put_document(Category::Settings, "{}").await;

        let report = f.engine.import_category(Category::Settings).await.unwrap();
        assert_eq!(report.summary.success, 1);
        assert_eq!(f.backend.import_count(), 3);
    }

    #[tokio::test]
    async fn test_check_backend_retries_transient_failures() {
        let temp = TempDir::new().unwrap();
        let host = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"));
        let f = fixture_with(
            host,
            ScriptedInteraction::accepting(),
            MemoryBackend::new().with_transient_failures(1),
            temp,
        );
        assert_eq!(f.engine.check_backend().await.unwrap(), "memory");

        let temp = TempDir::new().unwrap();
        let host = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"));
        let f = fixture_with(
            host,
            ScriptedInteraction::accepting(),
            MemoryBackend::new().with_transient_failures(5),
            temp,
        );
        assert!(matches!(f.engine.check_backend().await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_compare_addons() {
        let f = fixture(ScriptedInteraction::accepting());
        f.host.put_addon(installed("a.b", "1.0.0")).await;
        put_addons(
            &f.backend,
            vec![record("A.B", "1.1.0", true), record("c.d", "1.0.0", true)],
        )
        .await;

        let outcomes = f.engine.compare_addons().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].needs_version_update);
        assert!(outcomes[1].needs_install);
        assert!(f.interaction.prompts().is_empty());
    }

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_logs_never_contain_the_token() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let temp = TempDir::new().unwrap();
        let host = Arc::new(MemoryHost::new(temp.path().join("User"), temp.path().join("ext")));
        let store = MemoryConfigStore::new()
            .with(keys::LOCAL_PATH, json!(temp.path().join("out").to_string_lossy()))
            .with(keys::REMOTE_TOKEN, json!("ghp_supersecret"));
        let engine = SyncEngine::new(
            host,
            Arc::new(ScriptedInteraction::accepting()),
            Arc::new(store),
        )
        .unwrap();

        engine.export_category(Category::Settings).await.unwrap();

        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Exported settings to"));
        assert!(!logs.contains("ghp_supersecret"));
    }
}
