//! Repository host boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::models::{FileSet, RepositoryName};
use crate::errors::ProviderError;
use crate::secret::Secret;

/// A freshly created repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    /// Paths written, in commit order.
    pub files: Vec<String>,
}

/// Static-hosting configuration as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSiteInfo {
    pub url: String,
    pub status: String,
    pub already_enabled: bool,
}

/// One CI workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub workflow_id: u64,
    pub created_at: String,
    pub html_url: String,
}

/// Source-hosting operations used by the pipeline.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Login of the account that owns created repositories.
    async fn owner(&self) -> Result<String, ProviderError>;

    async fn create_repository(
        &self,
        name: &RepositoryName,
        description: &str,
        private: bool,
    ) -> Result<RepositoryInfo, ProviderError>;

    /// Push `files` to the default branch.
    ///
    /// An empty repository has no base commit, so files are created one at a
    /// time; otherwise they land atomically as one tree and commit.
    async fn commit_files(
        &self,
        name: &RepositoryName,
        files: &FileSet,
        message: &str,
    ) -> Result<CommitInfo, ProviderError>;

    async fn enable_static_hosting(
        &self,
        name: &RepositoryName,
        branch: &str,
        path: &str,
    ) -> Result<StaticSiteInfo, ProviderError>;

    /// Current static-hosting configuration, if enabled.
    async fn static_site(&self, name: &RepositoryName) -> Result<StaticSiteInfo, ProviderError>;

    /// Most recent runs first, at most five.
    async fn list_recent_runs(&self, name: &RepositoryName) -> Result<Vec<WorkflowRun>, ProviderError>;
}

/// Builds a [`RepositoryHost`] bound to one credential.
pub trait HostConnector: Send + Sync {
    fn connect(&self, token: &Secret) -> Result<Arc<dyn RepositoryHost>, ProviderError>;
}

/// URL a static site is served from when the host does not report one.
pub fn fallback_pages_url(owner: &str, name: &RepositoryName) -> String {
    format!("https://{}.github.io/{}", owner, name)
}
