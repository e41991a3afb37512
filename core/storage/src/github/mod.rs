//! GitHub-hosted backends.
//!
//! Both backends store one document per category named `vscode-<category>.json`:
//! - [`GistBackend`] keeps every category as a file of one private gist
//! - [`RepositoryBackend`] commits every category as a file on a repository branch

pub mod client;
pub mod gist;
pub mod repository;

pub use client::{Gist, GistFile, GitHubClient, GitHubUser, RepoContent};
pub use gist::GistBackend;
pub use repository::RepositoryBackend;

#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `app` on a loopback port and return its base URL.
    pub async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
