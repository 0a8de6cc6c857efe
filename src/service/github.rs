//! GitHub REST implementation of [`RepositoryHost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::host::{
    CommitInfo, HostConnector, RepositoryHost, RepositoryInfo, StaticSiteInfo, WorkflowRun,
};
use super::models::{FileSet, RepositoryName};
use crate::errors::ProviderError;
use crate::secret::Secret;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("pageforge/", env!("CARGO_PKG_VERSION"));
const DEFAULT_BRANCH: &str = "main";
const RECENT_RUNS: usize = 5;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    full_name: String,
    html_url: String,
    clone_url: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    commit: ShaRef,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    html_url: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a non-success response onto the provider error taxonomy.
fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(message),
        404 => ProviderError::NotFound(message),
        422 => ProviderError::Conflict(message),
        429 => ProviderError::RateLimited(message),
        code => ProviderError::Api { status: code, message },
    }
}

async fn check(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let response = check(response).await?;
    let bytes = response.bytes().await.map_err(ProviderError::Network)?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

// ── Client ───────────────────────────────────────────────────────────

/// GitHub client bound to a single token.
pub struct GitHubHost {
    client: Client,
    base_url: Url,
    token: Secret,
    login: OnceCell<String>,
}

impl GitHubHost {
    pub fn new(api_url: &str, token: Secret, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = Url::parse(api_url).map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", api_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::InvalidUrl(api_url.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ProviderError::Network)?;
        Ok(Self {
            client,
            base_url,
            token,
            login: OnceCell::new(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        builder.send().await.map_err(ProviderError::Network)
    }

    fn repo_url(&self, owner: &str, name: &RepositoryName, rest: &[&str]) -> Url {
        let mut segments = vec!["repos", owner, name.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    /// Head commit of the default branch, or `None` for an empty repository.
    async fn head_commit(&self, owner: &str, name: &RepositoryName) -> Result<Option<String>, ProviderError> {
        let url = self.repo_url(owner, name, &["git", "ref", "heads", DEFAULT_BRANCH]);
        let response = self.send(self.request(Method::GET, url)).await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            return Ok(None);
        }
        let head: RefResponse = decode(response).await?;
        Ok(Some(head.object.sha))
    }

    async fn create_files_individually(
        &self,
        owner: &str,
        name: &RepositoryName,
        files: &FileSet,
    ) -> Result<CommitInfo, ProviderError> {
        let mut last_sha = None;
        let mut written = Vec::with_capacity(files.len());
        for (path, content) in files.iter() {
            let mut rest = vec!["contents"];
            rest.extend(path.split('/'));
            let url = self.repo_url(owner, name, &rest);
            let body = json!({
                "message": format!("Add {}", path),
                "content": BASE64.encode(content.as_bytes()),
                "branch": DEFAULT_BRANCH,
            });
            let created: ContentsResponse = decode(self.send(self.request(Method::PUT, url).json(&body)).await?).await?;
            debug!(repo = %name, path, sha = %created.commit.sha, "created file");
            last_sha = Some(created.commit.sha);
            written.push(path.to_string());
        }
        let sha = last_sha.ok_or_else(|| ProviderError::InvalidResponse("no files to commit".into()))?;
        Ok(CommitInfo { sha, files: written })
    }

    async fn commit_tree(
        &self,
        owner: &str,
        name: &RepositoryName,
        base_sha: String,
        files: &FileSet,
        message: &str,
    ) -> Result<CommitInfo, ProviderError> {
        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files.iter() {
            let url = self.repo_url(owner, name, &["git", "blobs"]);
            let body = json!({ "content": content, "encoding": "utf-8" });
            let blob: ShaRef = decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;
            entries.push(TreeEntry {
                path,
                mode: "100644",
                kind: "blob",
                sha: blob.sha,
            });
        }

        let url = self.repo_url(owner, name, &["git", "trees"]);
        let body = json!({ "base_tree": base_sha, "tree": entries });
        let tree: ShaRef = decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;

        let url = self.repo_url(owner, name, &["git", "commits"]);
        let body = json!({ "message": message, "tree": tree.sha, "parents": [base_sha] });
        let commit: ShaRef = decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;

        let url = self.repo_url(owner, name, &["git", "refs", "heads", DEFAULT_BRANCH]);
        let body = json!({ "sha": commit.sha });
        check(self.send(self.request(Method::PATCH, url).json(&body)).await?).await?;

        Ok(CommitInfo {
            sha: commit.sha,
            files: files.paths(),
        })
    }
}

#[async_trait]
impl RepositoryHost for GitHubHost {
    async fn owner(&self) -> Result<String, ProviderError> {
        self.login
            .get_or_try_init(|| async {
                let response = self.send(self.request(Method::GET, self.url(&["user"]))).await?;
                let user: UserResponse = decode(response).await?;
                info!(login = %user.login, "authenticated with GitHub");
                Ok::<_, ProviderError>(user.login)
            })
            .await
            .cloned()
    }

    async fn create_repository(
        &self,
        name: &RepositoryName,
        description: &str,
        private: bool,
    ) -> Result<RepositoryInfo, ProviderError> {
        let body = json!({
            "name": name.as_str(),
            "description": description,
            "private": private,
            "auto_init": false,
            "has_issues": true,
            "has_wiki": false,
        });
        let url = self.url(&["user", "repos"]);
        let repo: RepoResponse = decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;
        info!(repo = %repo.full_name, url = %repo.html_url, "repository created");
        Ok(RepositoryInfo {
            name: repo.name,
            full_name: repo.full_name,
            html_url: repo.html_url,
            clone_url: repo.clone_url,
            default_branch: repo.default_branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        })
    }

    async fn commit_files(
        &self,
        name: &RepositoryName,
        files: &FileSet,
        message: &str,
    ) -> Result<CommitInfo, ProviderError> {
        let owner = self.owner().await?;
        match self.head_commit(&owner, name).await? {
            None => {
                debug!(repo = %name, files = files.len(), "empty repository, creating files individually");
                self.create_files_individually(&owner, name, files).await
            }
            Some(base_sha) => {
                debug!(repo = %name, base = %base_sha, files = files.len(), "committing tree");
                self.commit_tree(&owner, name, base_sha, files, message).await
            }
        }
    }

    async fn enable_static_hosting(
        &self,
        name: &RepositoryName,
        branch: &str,
        path: &str,
    ) -> Result<StaticSiteInfo, ProviderError> {
        let owner = self.owner().await?;
        let url = self.repo_url(&owner, name, &["pages"]);
        let body = json!({
            "source": { "branch": branch, "path": path },
            "build_type": "legacy",
        });
        let response = self.send(self.request(Method::POST, url).json(&body)).await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(repo = %name, "static hosting already enabled, reading current configuration");
            return self.static_site(name).await;
        }

        let pages: PagesResponse = decode(response).await?;
        Ok(StaticSiteInfo {
            url: pages.html_url.unwrap_or_default(),
            status: pages.status.unwrap_or_else(|| "building".to_string()),
            already_enabled: false,
        })
    }

    async fn static_site(&self, name: &RepositoryName) -> Result<StaticSiteInfo, ProviderError> {
        let owner = self.owner().await?;
        let url = self.repo_url(&owner, name, &["pages"]);
        let current: PagesResponse = decode(self.send(self.request(Method::GET, url)).await?).await?;
        Ok(StaticSiteInfo {
            url: current.html_url.unwrap_or_default(),
            status: current.status.unwrap_or_else(|| "built".to_string()),
            already_enabled: true,
        })
    }

    async fn list_recent_runs(&self, name: &RepositoryName) -> Result<Vec<WorkflowRun>, ProviderError> {
        let owner = self.owner().await?;
        let url = self.repo_url(&owner, name, &["actions", "runs"]);
        let response = self
            .send(
                self.request(Method::GET, url)
                    .query(&[("per_page", RECENT_RUNS.to_string())]),
            )
            .await?;
        let runs: RunsResponse = decode(response).await?;
        if runs.workflow_runs.len() > RECENT_RUNS {
            warn!(repo = %name, count = runs.workflow_runs.len(), "host ignored per_page, truncating");
        }
        Ok(runs.workflow_runs.into_iter().take(RECENT_RUNS).collect())
    }
}

/// Creates [`GitHubHost`] clients for a configured API base.
pub struct GitHubConnector {
    api_url: String,
    timeout: Duration,
}

impl GitHubConnector {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            timeout,
        }
    }
}

impl HostConnector for GitHubConnector {
    fn connect(&self, token: &Secret) -> Result<Arc<dyn RepositoryHost>, ProviderError> {
        if token.is_blank() {
            return Err(ProviderError::MissingCredential);
        }
        let host = GitHubHost::new(&self.api_url, token.clone(), self.timeout)?;
        Ok(Arc::new(host))
    }
}
