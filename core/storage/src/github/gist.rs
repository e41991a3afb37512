//! Gist sync backend.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use settingsync_common::{Category, Error, Result, Snapshot};
use settingsync_host::{keys, ConfigStore};

use super::client::{Gist, GistFileContent, GitHubClient};
use crate::provider::SyncBackend;

/// Stores every category as a file of one private gist.
///
/// The gist is created on the first export when no document id is
/// configured, and its id is written back to the configuration store.
pub struct GistBackend {
    client: GitHubClient,
    doc_id: RwLock<Option<String>>,
    store: Arc<dyn ConfigStore>,
}

impl GistBackend {
    pub fn new(client: GitHubClient, doc_id: Option<String>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            client,
            doc_id: RwLock::new(doc_id.filter(|id| !id.trim().is_empty())),
            store,
        }
    }

    /// Currently known gist id.
    pub async fn doc_id(&self) -> Option<String> {
        self.doc_id.read().await.clone()
    }

    fn locator(gist: &Gist) -> String {
        gist.html_url
            .clone()
            .unwrap_or_else(|| format!("https://gist.github.com/{}", gist.id))
    }

    async fn create(&self, files: &BTreeMap<String, GistFileContent>) -> Result<Gist> {
        let description = format!(
            "VSCode Settings Sync - {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        let gist = self.client.create_gist(&description, files).await?;
        info!("Created gist {}", gist.id);

        *self.doc_id.write().await = Some(gist.id.clone());
        self.store
            .update(keys::REMOTE_DOC_ID, Value::String(gist.id.clone()))
            .await?;
        Ok(gist)
    }
}

#[async_trait]
impl SyncBackend for GistBackend {
    fn name(&self) -> &str {
        "gist"
    }

    async fn export(&self, snapshot: &Snapshot) -> Result<String> {
        let file_name = snapshot.category().remote_file_name();
        let mut files = BTreeMap::new();
        files.insert(
            file_name.clone(),
            GistFileContent {
                content: snapshot.to_document()?,
            },
        );

        let gist = match self.doc_id().await {
            Some(id) => match self.client.update_gist(&id, &files).await {
                Ok(gist) => gist,
                Err(Error::NotFound(_)) => {
                    warn!("Gist {} no longer exists, creating a new one", id);
                    self.create(&files).await?
                }
                Err(e) => return Err(e),
            },
            None => self.create(&files).await?,
        };

        debug!("Wrote {} to gist {}", file_name, gist.id);
        Ok(Self::locator(&gist))
    }

    async fn import(&self, category: Category) -> Result<Snapshot> {
        let id = self.doc_id().await.ok_or_else(|| {
            Error::Configuration("No gist id configured; export first".to_string())
        })?;

        let gist = self.client.get_gist(&id).await?;
        let file_name = category.remote_file_name();
        let file = gist.files.get(&file_name).ok_or_else(|| {
            Error::NotFound(format!("Gist {} has no file {}", id, file_name))
        })?;

        let text = match (&file.content, file.truncated, &file.raw_url) {
            (Some(content), false, _) => content.clone(),
            (_, _, Some(raw_url)) => self.client.get_raw(raw_url).await?,
            _ => {
                return Err(Error::Network(format!(
                    "Gist file {} has no content",
                    file_name
                )))
            }
        };

        Snapshot::from_document(category, &text)
    }

    async fn check(&self) -> Result<()> {
        let user = self.client.current_user().await?;
        debug!("Authenticated to GitHub as {}", user.login);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::test_server::spawn;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use settingsync_common::{
        ActiveThemes, AddOnSnapshot, Credential, SettingsSnapshot, ThemeSnapshot,
    };
    use settingsync_host::MemoryConfigStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct GistState {
        base: String,
        gists: BTreeMap<String, BTreeMap<String, String>>,
        created: usize,
    }

    type Shared = Arc<Mutex<GistState>>;

    fn render(state: &GistState, id: &str, files: &BTreeMap<String, String>) -> Value {
        let files: serde_json::Map<String, Value> = files
            .iter()
            .map(|(name, content)| {
                // Theme documents come back truncated so imports go through raw_url.
                let truncated = content.len() > 16 && name.contains("themes");
                let body = if truncated { &content[..16] } else { content.as_str() };
                (
                    name.clone(),
                    json!({
                        "filename": name,
                        "content": body,
                        "truncated": truncated,
                        "raw_url": format!("{}/raw/{}/{}", state.base, id, name),
                    }),
                )
            })
            .collect();
        json!({
            "id": id,
            "html_url": format!("https://gist.github.com/{}", id),
            "files": files,
        })
    }

    fn merge(target: &mut BTreeMap<String, String>, body: &Value) {
        if let Some(files) = body["files"].as_object() {
            for (name, file) in files {
                if let Some(content) = file["content"].as_str() {
                    target.insert(name.clone(), content.to_string());
                }
            }
        }
    }

    async fn mock_github() -> (String, Shared) {
        let shared: Shared = Arc::new(Mutex::new(GistState::default()));
        let app = Router::new()
            .route("/user", get(|| async { Json(json!({"login": "octo"})) }))
            .route(
                "/gists",
                post(|State(s): State<Shared>, Json(body): Json<Value>| async move {
                    let mut state = s.lock().unwrap();
                    state.created += 1;
                    let id = format!("g{}", state.created);
                    let mut files = BTreeMap::new();
                    merge(&mut files, &body);
                    let rendered = render(&state, &id, &files);
                    state.gists.insert(id, files);
                    (StatusCode::CREATED, Json(rendered))
                }),
            )
            .route(
                "/gists/{id}",
                get(|State(s): State<Shared>, Path(id): Path<String>| async move {
                    let state = s.lock().unwrap();
                    match state.gists.get(&id) {
                        Some(files) => Ok(Json(render(&state, &id, files))),
                        None => Err(StatusCode::NOT_FOUND),
                    }
                })
                .patch(
                    |State(s): State<Shared>,
                     Path(id): Path<String>,
                     Json(body): Json<Value>| async move {
                        let mut state = s.lock().unwrap();
                        let Some(mut files) = state.gists.remove(&id) else {
                            return Err(StatusCode::NOT_FOUND);
                        };
                        merge(&mut files, &body);
                        let rendered = render(&state, &id, &files);
                        state.gists.insert(id, files);
                        Ok(Json(rendered))
                    },
                ),
            )
            .route(
                "/raw/{id}/{name}",
                get(
                    |State(s): State<Shared>, Path((id, name)): Path<(String, String)>| async move {
                        let state = s.lock().unwrap();
                        state
                            .gists
                            .get(&id)
                            .and_then(|files| files.get(&name).cloned())
                            .ok_or(StatusCode::NOT_FOUND)
                    },
                ),
            )
            .with_state(shared.clone());

        let base = spawn(app).await;
        shared.lock().unwrap().base = base.clone();
        (base, shared)
    }

    fn backend(base: &str, doc_id: Option<&str>, store: Arc<MemoryConfigStore>) -> GistBackend {
        let client = GitHubClient::new(Credential::new("ghp_test"))
            .unwrap()
            .with_base_url(base);
        GistBackend::new(client, doc_id.map(str::to_string), store)
    }

    #[tokio::test]
    async fn test_first_export_creates_and_persists_id() {
        let (base, shared) = mock_github().await;
        let store = Arc::new(MemoryConfigStore::new());
        let gist = backend(&base, None, store.clone());

        let raw = "{\n  // comment\n  \"a\": 1,\n}";
        let locator = gist
            .export(&Snapshot::Settings(SettingsSnapshot::new(
                Some(raw.to_string()),
                None,
            )))
            .await
            .unwrap();

        assert_eq!(locator, "https://gist.github.com/g1");
        assert_eq!(
            store.get_string(keys::REMOTE_DOC_ID).await.unwrap().as_deref(),
            Some("g1")
        );
        assert_eq!(
            shared.lock().unwrap().gists["g1"]["vscode-settings.json"],
            raw
        );

        let back = gist
            .import(Category::Settings)
            .await
            .unwrap()
            .into_settings()
            .unwrap();
        assert_eq!(back.user_raw.as_deref(), Some(raw));
    }

    #[tokio::test]
    async fn test_second_export_updates_same_gist() {
        let (base, shared) = mock_github().await;
        let store = Arc::new(MemoryConfigStore::new());
        let gist = backend(&base, None, store);

        let settings = Snapshot::Settings(SettingsSnapshot::new(Some("{}".to_string()), None));
        gist.export(&settings).await.unwrap();
        gist.export(&Snapshot::Extensions(AddOnSnapshot::new(Vec::new())))
            .await
            .unwrap();

        let state = shared.lock().unwrap();
        assert_eq!(state.created, 1);
        assert_eq!(state.gists["g1"].len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_gist_is_recreated() {
        let (base, shared) = mock_github().await;
        let store = Arc::new(MemoryConfigStore::new());
        let gist = backend(&base, Some("gone"), store.clone());

        gist.export(&Snapshot::Extensions(AddOnSnapshot::new(Vec::new())))
            .await
            .unwrap();
        assert_eq!(shared.lock().unwrap().created, 1);
        assert_eq!(gist.doc_id().await.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn test_truncated_file_read_through_raw_url() {
        let (base, _) = mock_github().await;
        let store = Arc::new(MemoryConfigStore::new());
        let gist = backend(&base, None, store);

        let snapshot = Snapshot::Themes(ThemeSnapshot::new(
            ActiveThemes {
                color_theme: Some("Default Dark Modern".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ));
        gist.export(&snapshot).await.unwrap();
        let back = gist
            .import(Category::Themes)
            .await
            .unwrap()
            .into_themes()
            .unwrap();
        assert_eq!(
            back.current.color_theme.as_deref(),
            Some("Default Dark Modern")
        );
    }

    #[tokio::test]
    async fn test_import_without_id_is_configuration_error() {
        let (base, _) = mock_github().await;
        let gist = backend(&base, None, Arc::new(MemoryConfigStore::new()));
        assert!(matches!(
            gist.import(Category::Settings).await,
            Err(Error::Configuration(_))
        ));
        assert!(gist.test().await);
    }
}
