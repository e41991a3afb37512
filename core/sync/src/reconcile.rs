//! Applying a comparison: installs, then updates, then enable/disable changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use settingsync_common::{AddOnId, Error, Result};
use settingsync_host::{host_keys, Host, Interaction};
use settingsync_package::{install_dir_name, PackageSource};

use crate::compare::{ChangeSet, ComparisonOutcome};

/// What was done to one add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Install,
    Update,
    Enable,
    Disable,
    Skip,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Install => "install",
            ApplyAction::Update => "update",
            ApplyAction::Enable => "enable",
            ApplyAction::Disable => "disable",
            ApplyAction::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// Outcome of one applied action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub id: AddOnId,
    pub display_name: String,
    pub action: ApplyAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ApplyResult {
    fn ok(outcome: &ComparisonOutcome, action: ApplyAction, version: Option<String>) -> Self {
        Self {
            id: outcome.id.clone(),
            display_name: outcome.display_name.clone(),
            action,
            success: true,
            error: None,
            version,
        }
    }

    fn failed(outcome: &ComparisonOutcome, action: ApplyAction, error: impl fmt::Display) -> Self {
        Self {
            id: outcome.id.clone(),
            display_name: outcome.display_name.clone(),
            action,
            success: false,
            error: Some(error.to_string()),
            version: None,
        }
    }
}

/// Everything [`Reconciler::apply`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub results: Vec<ApplyResult>,
    /// True when an install or update succeeded and the editor must reload.
    pub reload_required: bool,
}

impl ApplyReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Toggles the host could not perform, for the user to do by hand.
    pub fn manual_toggles(&self) -> Vec<&ApplyResult> {
        self.results
            .iter()
            .filter(|r| {
                !r.success && matches!(r.action, ApplyAction::Enable | ApplyAction::Disable)
            })
            .collect()
    }
}

const UPDATE_ACTION: &str = "Update";
const SKIP_ACTION: &str = "Skip";

fn toggle_action(outcome: &ComparisonOutcome) -> ApplyAction {
    if outcome.remote_enabled {
        ApplyAction::Enable
    } else {
        ApplyAction::Disable
    }
}

/// How an install finished.
enum InstallPath {
    Direct,
    Host,
}

/// Drives add-on changes through the host and the package source.
pub struct Reconciler {
    host: Arc<dyn Host>,
    packages: Arc<dyn PackageSource>,
    interaction: Arc<dyn Interaction>,
}

impl Reconciler {
    pub fn new(
        host: Arc<dyn Host>,
        packages: Arc<dyn PackageSource>,
        interaction: Arc<dyn Interaction>,
    ) -> Self {
        Self {
            host,
            packages,
            interaction,
        }
    }

    /// Apply every needed change.
    ///
    /// Per-item failures are recorded in the report; this never fails as a
    /// whole. Order is fixed: installs, updates, then toggles.
    pub async fn apply(&self, outcomes: &[ComparisonOutcome]) -> ApplyReport {
        let changes = ChangeSet::from_outcomes(outcomes);
        let total = changes.total();
        let mut report = ApplyReport::default();
        if total == 0 {
            return report;
        }

        let step = 100.0 / total as f64;
        let mut pinned = Vec::new();
        let mut direct_installs = 0usize;

        let can_toggle = self.host.capabilities().toggle_addons;
        for outcome in &changes.to_install {
            self.interaction
                .progress(step, &format!("Installing {}", outcome.display_name));

            match self.install(&outcome.id, &outcome.remote_version).await {
                Ok(path) => {
                    if matches!(path, InstallPath::Direct) {
                        direct_installs += 1;
                    }
                    pinned.push(outcome.id.clone());
                    report.reload_required = true;
                    report.results.push(ApplyResult::ok(
                        outcome,
                        ApplyAction::Install,
                        Some(outcome.remote_version.clone()),
                    ));
                    // Fresh installs come up enabled.
                    if !outcome.remote_enabled {
                        report.results.push(self.set_enabled(outcome, can_toggle).await);
                    }
                }
                Err(e) => {
                    warn!("Failed to install {}: {}", outcome.id, e);
                    report
                        .results
                        .push(ApplyResult::failed(outcome, ApplyAction::Install, e));
                }
            }
        }

        for outcome in &changes.to_update {
            self.interaction
                .progress(step, &format!("Updating {}", outcome.display_name));

            let local = outcome.local_version.as_deref().unwrap_or("?");
            let question = format!(
                "Update {} from {} to {}?",
                outcome.display_name, local, outcome.remote_version
            );
            let answer = self
                .interaction
                .prompt(&question, &[UPDATE_ACTION, SKIP_ACTION])
                .await;

            if answer.as_deref() != Some(UPDATE_ACTION) {
                debug!("Update of {} skipped", outcome.id);
                report.results.push(ApplyResult::ok(
                    outcome,
                    ApplyAction::Skip,
                    outcome.local_version.clone(),
                ));
                continue;
            }

            let result = match self.host.uninstall_addon(&outcome.id).await {
                Ok(()) => self.install(&outcome.id, &outcome.remote_version).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(path) => {
                    if matches!(path, InstallPath::Direct) {
                        direct_installs += 1;
                    }
                    pinned.push(outcome.id.clone());
                    report.reload_required = true;
                    report.results.push(ApplyResult::ok(
                        outcome,
                        ApplyAction::Update,
                        Some(outcome.remote_version.clone()),
                    ));
                }
                Err(e) => {
                    warn!("Failed to update {}: {}", outcome.id, e);
                    report
                        .results
                        .push(ApplyResult::failed(outcome, ApplyAction::Update, e));
                }
            }
        }

        for outcome in &changes.to_toggle {
            self.interaction.progress(
                step,
                &format!("{} {}", toggle_action(outcome), outcome.display_name),
            );
            report.results.push(self.set_enabled(outcome, can_toggle).await);
        }

        if !pinned.is_empty() {
            if let Err(e) = self.pin_versions(&pinned).await {
                warn!("Could not disable auto-update for synced add-ons: {}", e);
            }
        }
        if direct_installs > 0 {
            if let Err(e) = self.host.refresh_addon_index().await {
                warn!("Failed to refresh add-on index: {}", e);
            }
        }

        info!(
            "Applied add-on changes: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// Bring one add-on to its remote enablement, or record that the user
    /// has to do it by hand.
    async fn set_enabled(&self, outcome: &ComparisonOutcome, can_toggle: bool) -> ApplyResult {
        let action = toggle_action(outcome);
        if !can_toggle {
            return ApplyResult::failed(
                outcome,
                action,
                format!(
                    "{} needs a manual change: {} it in the add-on view",
                    outcome.display_name, action
                ),
            );
        }

        match self
            .host
            .set_addon_enabled(&outcome.id, outcome.remote_enabled)
            .await
        {
            Ok(()) => ApplyResult::ok(outcome, action, None),
            Err(e) => {
                warn!("Failed to {} {}: {}", action, outcome.id, e);
                ApplyResult::failed(outcome, action, e)
            }
        }
    }

    /// Download and unpack a package, falling back to the host's own install.
    ///
    /// When both fail, the direct error is returned.
    async fn install(&self, id: &AddOnId, version: &str) -> Result<InstallPath> {
        let direct = match self.install_direct(id, version).await {
            Ok(()) => return Ok(InstallPath::Direct),
            Err(e) => e,
        };
        debug!(
            "Direct install of {} failed ({}), asking the host instead",
            id, direct
        );

        match self.host.install_addon(id).await {
            Ok(()) => {
                // The host picks its own version; the record keeps the requested one.
                info!("Installed {} through the host, requested version {}", id, version);
                Ok(InstallPath::Host)
            }
            Err(fallback) => {
                debug!("Host install of {} failed too: {}", id, fallback);
                Err(direct)
            }
        }
    }

    async fn install_direct(&self, id: &AddOnId, version: &str) -> Result<()> {
        let install_dir = self
            .host
            .extensions_dir()
            .join(install_dir_name(id, version)?);
        let artifact = self.packages.fetch(id, version).await?;
        self.packages.unpack(&artifact, &install_dir).await?;
        Ok(())
    }

    /// Add ids to the host's auto-update ignore list.
    async fn pin_versions(&self, ids: &[AddOnId]) -> Result<()> {
        let settings = self.host.settings();
        let mut list = settings
            .get_string_list(host_keys::AUTO_UPDATE_IGNORE_LIST)
            .await?;

        let mut seen: HashSet<String> = list.iter().map(|s| s.to_ascii_lowercase()).collect();
        for id in ids {
            if seen.insert(id.key()) {
                list.push(id.as_str().to_string());
            }
        }

        let value = Value::Array(list.into_iter().map(Value::String).collect());
        settings
            .update(host_keys::AUTO_UPDATE_IGNORE_LIST, value)
            .await
            .map_err(|e| Error::Configuration(format!("Failed to update ignore list: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use settingsync_host::{HostCapabilities, HostCommand, MemoryHost, ScriptedInteraction};
    use tempfile::TempDir;

    use crate::compare::compare;
    use crate::ignore::IgnoreSet;
    use crate::testing::{record, FakePackages};

    struct Fixture {
        _temp: TempDir,
        host: Arc<MemoryHost>,
        interaction: Arc<ScriptedInteraction>,
    }

    fn fixture(host: impl FnOnce(MemoryHost) -> MemoryHost, interaction: ScriptedInteraction) -> Fixture {
        let temp = TempDir::new().unwrap();
        let base = MemoryHost::new(temp.path().join("User"), temp.path().join("extensions"));
        Fixture {
            host: Arc::new(host(base)),
            interaction: Arc::new(interaction),
            _temp: temp,
        }
    }

    fn reconciler(f: &Fixture, packages: FakePackages) -> Reconciler {
        Reconciler::new(f.host.clone(), Arc::new(packages), f.interaction.clone())
    }

    #[tokio::test]
    async fn test_install_direct_pins_and_refreshes() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(&[], &[record("Pub.Tool", "1.2.0", true)], &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].success);
        assert_eq!(report.results[0].action, ApplyAction::Install);
        assert_eq!(report.results[0].version.as_deref(), Some("1.2.0"));
        assert!(report.reload_required);
        assert!(f
            .host
            .extensions_dir()
            .join("pub.tool-1.2.0")
            .join("package.json")
            .exists());

        let pinned = f
            .host
            .settings()
            .get_string_list(host_keys::AUTO_UPDATE_IGNORE_LIST)
            .await
            .unwrap();
        assert_eq!(pinned, vec!["Pub.Tool".to_string()]);
        assert!(f.host.commands().await.contains(&HostCommand::RefreshIndex));
    }

    #[tokio::test]
    async fn test_install_falls_back_to_host() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(&[], &[record("a.b", "1.0.0", true)], &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::without(&["a.b"]))
            .apply(&outcomes)
            .await;

        assert!(report.results[0].success);
        let commands = f.host.commands().await;
        assert!(commands.contains(&HostCommand::Install(AddOnId::new("a.b").unwrap())));
        assert!(!commands.contains(&HostCommand::RefreshIndex));
    }

    #[tokio::test]
    async fn test_install_reports_direct_error_when_both_fail() {
        let id = AddOnId::new("a.b").unwrap();
        let f = fixture(
            |h| h.with_failing_install(id.clone()),
            ScriptedInteraction::accepting(),
        );
        let outcomes = compare(
            &[],
            &[record("a.b", "1.0.0", true), record("c.d", "2.0.0", true)],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::without(&["a.b"]))
            .apply(&outcomes)
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("404"));

        let pinned = f
            .host
            .settings()
            .get_string_list(host_keys::AUTO_UPDATE_IGNORE_LIST)
            .await
            .unwrap();
        assert_eq!(pinned, vec!["c.d".to_string()]);
    }

    #[tokio::test]
    async fn test_one_failure_in_batch_of_five() {
        let bad = AddOnId::new("p.three").unwrap();
        let f = fixture(
            |h| h.with_failing_install(bad.clone()),
            ScriptedInteraction::accepting(),
        );
        let remote: Vec<_> = ["p.one", "p.two", "p.three", "p.four", "p.five"]
            .iter()
            .map(|id| record(id, "1.0.0", true))
            .collect();
        let outcomes = compare(&[], &remote, &IgnoreSet::default());
        let packages = Arc::new(FakePackages::without(&["p.three"]));

        let report = Reconciler::new(f.host.clone(), packages.clone(), f.interaction.clone())
            .apply(&outcomes)
            .await;

        assert_eq!(report.results.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert!(!report.results[2].success);
        assert_eq!(packages.fetched().len(), 5);
    }

    #[tokio::test]
    async fn test_declined_update_is_recorded_as_skip() {
        let f = fixture(
            |h| h,
            ScriptedInteraction::accepting().then_answer(Some(SKIP_ACTION)),
        );
        let outcomes = compare(
            &[record("a.b", "1.0.0", true)],
            &[record("a.b", "1.1.0", true)],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        let result = &report.results[0];
        assert_eq!(result.action, ApplyAction::Skip);
        assert!(result.success);
        assert_eq!(result.version.as_deref(), Some("1.0.0"));
        assert!(!report.reload_required);
        assert!(f.host.commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_update_uninstalls_then_installs() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(
            &[record("a.b", "1.0.0", true)],
            &[record("a.b", "1.1.0", true)],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        assert_eq!(report.results[0].action, ApplyAction::Update);
        assert!(report.results[0].success);
        assert!(report.reload_required);
        let commands = f.host.commands().await;
        assert_eq!(commands[0], HostCommand::Uninstall(AddOnId::new("a.b").unwrap()));
        assert!(f.host.extensions_dir().join("a.b-1.1.0").exists());
        assert_eq!(f.interaction.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_toggles_without_host_support_need_manual_change() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(
            &[record("a.b", "1.0.0", true)],
            &[record("a.b", "1.0.0", false)],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        let manual = report.manual_toggles();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].action, ApplyAction::Disable);
        assert!(manual[0].error.as_deref().unwrap().contains("manual change"));
        assert!(!report.reload_required);
    }

    #[tokio::test]
    async fn test_toggles_through_host() {
        let f = fixture(
            |h| {
                h.with_capabilities(HostCapabilities {
                    toggle_addons: true,
                    ..Default::default()
                })
            },
            ScriptedInteraction::accepting(),
        );
        let outcomes = compare(
            &[record("a.b", "1.0.0", false)],
            &[record("a.b", "1.0.0", true)],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        assert_eq!(report.results[0].action, ApplyAction::Enable);
        assert!(report.results[0].success);
        assert_eq!(
            f.host.commands().await,
            vec![HostCommand::SetEnabled(AddOnId::new("a.b").unwrap(), true)]
        );
    }

    #[tokio::test]
    async fn test_install_of_disabled_addon_disables_it() {
        let f = fixture(
            |h| {
                h.with_capabilities(HostCapabilities {
                    toggle_addons: true,
                    ..Default::default()
                })
            },
            ScriptedInteraction::accepting(),
        );
        let outcomes = compare(&[], &[record("d.d", "1.0.0", false)], &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        let actions: Vec<ApplyAction> = report.results.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![ApplyAction::Install, ApplyAction::Disable]);
        assert!(report.results.iter().all(|r| r.success));
        assert!(f
            .host
            .commands()
            .await
            .contains(&HostCommand::SetEnabled(AddOnId::new("d.d").unwrap(), false)));
        assert_eq!(f.interaction.progress_steps(), vec![100.0]);
    }

    #[tokio::test]
    async fn test_install_of_disabled_addon_without_toggle_is_manual() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(&[], &[record("d.d", "1.0.0", false)], &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        let manual = report.manual_toggles();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].action, ApplyAction::Disable);
        assert!(report.reload_required);
    }

    #[tokio::test]
    async fn test_failed_install_of_disabled_addon_has_no_toggle() {
        let f = fixture(
            |h| h.with_failing_install(AddOnId::new("d.d").unwrap()),
            ScriptedInteraction::accepting(),
        );
        let outcomes = compare(&[], &[record("d.d", "1.0.0", false)], &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::without(&["d.d"]))
            .apply(&outcomes)
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].action, ApplyAction::Install);
        assert!(!report.results[0].success);
        assert!(report.manual_toggles().is_empty());
    }

    #[tokio::test]
    async fn test_order_and_progress() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let outcomes = compare(
            &[record("u.u", "1.0", true), record("t.t", "1.0", true)],
            &[
                record("t.t", "1.0", false),
                record("u.u", "2.0", true),
                record("i.i", "1.0", true),
            ],
            &IgnoreSet::default(),
        );

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        let actions: Vec<ApplyAction> = report.results.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![ApplyAction::Install, ApplyAction::Update, ApplyAction::Disable]
        );
        let steps = f.interaction.progress_steps();
        assert_eq!(steps.len(), 3);
        assert!((steps.iter().sum::<f64>() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pin_list_is_deduplicated() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        f.host
            .settings()
            .update(host_keys::AUTO_UPDATE_IGNORE_LIST, json!(["A.B", "x.y"]))
            .await
            .unwrap();
        let outcomes = compare(&[], &[record("a.b", "1.0", true)], &IgnoreSet::default());

        reconciler(&f, FakePackages::default()).apply(&outcomes).await;

        let pinned = f
            .host
            .settings()
            .get_string_list(host_keys::AUTO_UPDATE_IGNORE_LIST)
            .await
            .unwrap();
        assert_eq!(pinned, vec!["A.B".to_string(), "x.y".to_string()]);
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let f = fixture(|h| h, ScriptedInteraction::accepting());
        let set = vec![record("a.b", "1.0", true)];
        let outcomes = compare(&set, &set, &IgnoreSet::default());

        let report = reconciler(&f, FakePackages::default()).apply(&outcomes).await;
        assert!(report.results.is_empty());
        assert!(f.interaction.progress_steps().is_empty());
    }
}
