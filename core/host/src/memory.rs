//! In-memory host and scripted user interaction, for testing.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

use settingsync_common::{AddOnId, Error, Result};

use crate::config::{ConfigStore, MemoryConfigStore};
use crate::host::{
    Host, HostCapabilities, InstalledAddOn, Interaction, ManifestEntry, NoticeLevel,
};

/// A host command recorded by [`MemoryHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Install(AddOnId),
    Uninstall(AddOnId),
    SetEnabled(AddOnId, bool),
    RefreshIndex,
    Reload,
    OpenAddonView,
}

#[derive(Default)]
struct HostState {
    addons: Vec<InstalledAddOn>,
    disabled: Vec<String>,
    manifest: Vec<ManifestEntry>,
    failing_installs: HashSet<AddOnId>,
    commands: Vec<HostCommand>,
}

/// In-memory host.
///
/// Add-on state and commands live in memory; settings and snippet files
/// live under a caller-provided user directory so collectors can read them.
pub struct MemoryHost {
    user_dir: PathBuf,
    extensions_dir: PathBuf,
    workspace_folders: Vec<PathBuf>,
    capabilities: HostCapabilities,
    settings: Arc<MemoryConfigStore>,
    state: RwLock<HostState>,
}

impl MemoryHost {
    pub fn new(user_dir: impl Into<PathBuf>, extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            extensions_dir: extensions_dir.into(),
            workspace_folders: Vec::new(),
            capabilities: HostCapabilities::default(),
            settings: Arc::new(MemoryConfigStore::new()),
            state: RwLock::new(HostState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_workspace_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.workspace_folders.push(folder.into());
        self
    }

    pub fn with_addon(mut self, addon: InstalledAddOn) -> Self {
        self.state.get_mut().addons.push(addon);
        self
    }

    /// Mark ids as disabled in the on-disk state.
    pub fn with_disabled(mut self, ids: &[&str]) -> Self {
        self.state
            .get_mut()
            .disabled
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_manifest_entry(mut self, entry: ManifestEntry) -> Self {
        self.state.get_mut().manifest.push(entry);
        self
    }

    /// Make the host installer fail for `id`.
    pub fn with_failing_install(mut self, id: AddOnId) -> Self {
        self.state.get_mut().failing_installs.insert(id);
        self
    }

    /// The concrete settings store, for seeding and inspection.
    pub fn settings_store(&self) -> Arc<MemoryConfigStore> {
        self.settings.clone()
    }

    /// Commands received so far.
    pub async fn commands(&self) -> Vec<HostCommand> {
        self.state.read().await.commands.clone()
    }

    /// Currently installed add-ons.
    pub async fn addons(&self) -> Vec<InstalledAddOn> {
        self.state.read().await.addons.clone()
    }

    /// Register an add-on as installed, replacing any previous version.
    pub async fn put_addon(&self, addon: InstalledAddOn) {
        let mut state = self.state.write().await;
        state.addons.retain(|a| a.id != addon.id);
        state.addons.push(addon);
    }

    async fn record(&self, command: HostCommand) {
        self.state.write().await.commands.push(command);
    }

    fn require(&self, supported: bool, what: &str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(Error::NotSupported(format!("{} is not available", what)))
        }
    }
}

#[async_trait]
impl Host for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    fn user_dir(&self) -> PathBuf {
        self.user_dir.clone()
    }

    fn extensions_dir(&self) -> PathBuf {
        self.extensions_dir.clone()
    }

    fn workspace_folders(&self) -> Vec<PathBuf> {
        self.workspace_folders.clone()
    }

    fn settings(&self) -> Arc<dyn ConfigStore> {
        self.settings.clone()
    }

    async fn installed_addons(&self) -> Result<Vec<InstalledAddOn>> {
        Ok(self.state.read().await.addons.clone())
    }

    async fn disabled_addons(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.disabled.clone())
    }

    async fn manifest_entries(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.state.read().await.manifest.clone())
    }

    async fn install_addon(&self, id: &AddOnId) -> Result<()> {
        self.record(HostCommand::Install(id.clone())).await;
        if self.state.read().await.failing_installs.contains(id) {
            return Err(Error::Extension(format!("Host could not install {}", id)));
        }
        self.put_addon(InstalledAddOn::new(id.clone(), "latest")).await;
        Ok(())
    }

    async fn uninstall_addon(&self, id: &AddOnId) -> Result<()> {
        self.record(HostCommand::Uninstall(id.clone())).await;
        self.state.write().await.addons.retain(|a| &a.id != id);
        Ok(())
    }

    async fn set_addon_enabled(&self, id: &AddOnId, enabled: bool) -> Result<()> {
        self.require(self.capabilities.toggle_addons, "Enabling or disabling add-ons")?;
        self.record(HostCommand::SetEnabled(id.clone(), enabled)).await;
        Ok(())
    }

    async fn refresh_addon_index(&self) -> Result<()> {
        self.record(HostCommand::RefreshIndex).await;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.require(self.capabilities.reload, "Window reload")?;
        self.record(HostCommand::Reload).await;
        Ok(())
    }

    async fn open_addon_view(&self) -> Result<()> {
        self.require(self.capabilities.addon_view, "The add-on view")?;
        self.record(HostCommand::OpenAddonView).await;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Interaction that answers prompts from a script and records everything.
pub struct ScriptedInteraction {
    answers: Mutex<VecDeque<Option<String>>>,
    accept_by_default: bool,
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    prompts: Mutex<Vec<String>>,
    progress: Mutex<Vec<f64>>,
    documents: Mutex<Vec<(String, String)>>,
}

impl ScriptedInteraction {
    /// Unscripted prompts pick their first action.
    pub fn accepting() -> Self {
        Self::with_default(true)
    }

    /// Unscripted prompts are dismissed.
    pub fn declining() -> Self {
        Self::with_default(false)
    }

    fn with_default(accept_by_default: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            accept_by_default,
            notices: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
        }
    }

    /// Queue the answer for the next prompt. `None` dismisses it.
    pub fn then_answer(self, answer: Option<&str>) -> Self {
        lock(&self.answers).push_back(answer.map(str::to_string));
        self
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        lock(&self.notices).clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn progress_steps(&self) -> Vec<f64> {
        lock(&self.progress).clone()
    }

    pub fn documents(&self) -> Vec<(String, String)> {
        lock(&self.documents).clone()
    }
}

#[async_trait]
impl Interaction for ScriptedInteraction {
    fn notify(&self, level: NoticeLevel, message: &str) {
        lock(&self.notices).push((level, message.to_string()));
    }

    async fn prompt(&self, message: &str, actions: &[&str]) -> Option<String> {
        lock(&self.prompts).push(message.to_string());
        if let Some(answer) = lock(&self.answers).pop_front() {
            return answer;
        }
        if self.accept_by_default {
            actions.first().map(|a| a.to_string())
        } else {
            None
        }
    }

    fn progress(&self, increment: f64, _message: &str) {
        lock(&self.progress).push(increment);
    }

    fn show_document(&self, title: &str, body: &str) {
        lock(&self.documents).push((title.to_string(), body.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AddOnId {
        AddOnId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let host = MemoryHost::new("/u", "/e");
        host.install_addon(&id("a.b")).await.unwrap();
        assert_eq!(host.addons().await.len(), 1);

        host.uninstall_addon(&id("A.B")).await.unwrap();
        assert!(host.addons().await.is_empty());
        assert_eq!(
            host.commands().await,
            vec![
                HostCommand::Install(id("a.b")),
                HostCommand::Uninstall(id("a.b"))
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_install() {
        let host = MemoryHost::new("/u", "/e").with_failing_install(id("x.y"));
        assert!(host.install_addon(&id("X.Y")).await.is_err());
        assert!(host.addons().await.is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_gate_commands() {
        let host = MemoryHost::new("/u", "/e");
        assert!(matches!(
            host.set_addon_enabled(&id("a.b"), true).await,
            Err(Error::NotSupported(_))
        ));

        let host = host.with_capabilities(HostCapabilities {
            toggle_addons: true,
            reload: true,
            addon_view: false,
        });
        host.set_addon_enabled(&id("a.b"), false).await.unwrap();
        host.reload().await.unwrap();
        assert!(host.open_addon_view().await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_answers() {
        let ui = ScriptedInteraction::declining().then_answer(Some("Skip"));
        assert_eq!(ui.prompt("q1", &["Update", "Skip"]).await.as_deref(), Some("Skip"));
        assert_eq!(ui.prompt("q2", &["Update", "Skip"]).await, None);
        assert_eq!(ui.prompts(), vec!["q1".to_string(), "q2".to_string()]);

        let ui = ScriptedInteraction::accepting();
        assert_eq!(ui.prompt("q", &["Yes", "No"]).await.as_deref(), Some("Yes"));
    }
}
