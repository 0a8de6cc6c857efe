//! In-memory collaborators for pipeline, runner and router tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::callback::CallbackNotifier;
use super::host::{CommitInfo, HostConnector, RepositoryHost, RepositoryInfo, StaticSiteInfo, WorkflowRun};
use super::models::{Attachment, CallbackPayload, FileSet, RepositoryName, Task};
use super::synthesizer::{CodeSynthesizer, SynthesisRequest};
use crate::errors::{CallbackError, HostOperation, ProviderError, SynthesisError};
use crate::secret::Secret;

pub const OWNER: &str = "octo";
pub const COMMIT_SHA: &str = "c0ffee1234";

pub fn sample_task(task_id: &str, round: u32) -> Task {
    Task {
        task_id: task_id.to_string(),
        round,
        nonce: "nonce-1".to_string(),
        email: "student@example.com".to_string(),
        brief: "Build a page that shows a captcha and solves it".to_string(),
        checks: vec!["Page has a title".to_string(), "Solver shows result".to_string()],
        attachments: vec![Attachment {
            name: "sample.png".to_string(),
            url: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        }],
        evaluation_url: "https://eval.example.com/notify".to_string(),
        secret: Secret::new("s3cret"),
    }
}

pub fn app_files() -> FileSet {
    FileSet::from_iter([
        ("index.html", "<!DOCTYPE html><html><body>app</body></html>"),
        ("script.js", "console.log('app');"),
    ])
}

// ── Synthesizer ──────────────────────────────────────────────────────

pub struct MockSynthesizer {
    files: FileSet,
    failure: Option<fn() -> SynthesisError>,
    delay: Option<Duration>,
    panics: bool,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl MockSynthesizer {
    pub fn returning(files: FileSet) -> Self {
        Self {
            files,
            failure: None,
            delay: None,
            panics: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: fn() -> SynthesisError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::returning(FileSet::new())
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::returning(FileSet::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeSynthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<FileSet, SynthesisError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("synthesizer crashed");
        }
        match self.failure {
            Some(make) => Err(make()),
            None => Ok(self.files.clone()),
        }
    }
}

// ── Repository host ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockHost {
    fail_on: Vec<HostOperation>,
    fail_owner: bool,
    calls: Mutex<Vec<String>>,
    committed: Mutex<Option<FileSet>>,
    descriptions: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(operation: HostOperation) -> Self {
        Self {
            fail_on: vec![operation],
            ..Self::default()
        }
    }

    pub fn failing_everything() -> Self {
        Self {
            fail_on: vec![
                HostOperation::CreateRepository,
                HostOperation::CommitFiles,
                HostOperation::EnableStaticHosting,
                HostOperation::ListRuns,
            ],
            fail_owner: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn committed(&self) -> Option<FileSet> {
        self.committed.lock().unwrap().clone()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.descriptions.lock().unwrap().clone()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn record(&self, operation: HostOperation, name: &RepositoryName) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("{}:{}", operation, name));
        if self.fail_on.contains(&operation) {
            return Err(ProviderError::Api {
                status: 500,
                message: format!("mock {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryHost for MockHost {
    async fn owner(&self) -> Result<String, ProviderError> {
        if self.fail_owner {
            return Err(ProviderError::Unauthorized("bad credentials".into()));
        }
        Ok(OWNER.to_string())
    }

    async fn create_repository(
        &self,
        name: &RepositoryName,
        description: &str,
        _private: bool,
    ) -> Result<RepositoryInfo, ProviderError> {
        self.record(HostOperation::CreateRepository, name)?;
        self.descriptions.lock().unwrap().push(description.to_string());
        Ok(RepositoryInfo {
            name: name.to_string(),
            full_name: format!("{}/{}", OWNER, name),
            html_url: format!("https://github.com/{}/{}", OWNER, name),
            clone_url: format!("https://github.com/{}/{}.git", OWNER, name),
            default_branch: "main".to_string(),
        })
    }

    async fn commit_files(
        &self,
        name: &RepositoryName,
        files: &FileSet,
        message: &str,
    ) -> Result<CommitInfo, ProviderError> {
        self.record(HostOperation::CommitFiles, name)?;
        *self.committed.lock().unwrap() = Some(files.clone());
        self.messages.lock().unwrap().push(message.to_string());
        Ok(CommitInfo {
            sha: COMMIT_SHA.to_string(),
            files: files.paths(),
        })
    }

    async fn enable_static_hosting(
        &self,
        name: &RepositoryName,
        _branch: &str,
        _path: &str,
    ) -> Result<StaticSiteInfo, ProviderError> {
        self.record(HostOperation::EnableStaticHosting, name)?;
        Ok(StaticSiteInfo {
            url: format!("https://{}.github.io/{}/", OWNER, name),
            status: "building".to_string(),
            already_enabled: false,
        })
    }

    async fn static_site(&self, name: &RepositoryName) -> Result<StaticSiteInfo, ProviderError> {
        self.record(HostOperation::EnableStaticHosting, name)?;
        Ok(StaticSiteInfo {
            url: format!("https://{}.github.io/{}/", OWNER, name),
            status: "built".to_string(),
            already_enabled: true,
        })
    }

    async fn list_recent_runs(&self, name: &RepositoryName) -> Result<Vec<WorkflowRun>, ProviderError> {
        self.record(HostOperation::ListRuns, name)?;
        Ok(vec![WorkflowRun {
            id: 1,
            status: Some("completed".to_string()),
            conclusion: Some("success".to_string()),
            workflow_id: 7,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            html_url: format!("https://github.com/{}/{}/actions/runs/1", OWNER, name),
        }])
    }
}

pub struct MockConnector {
    host: Arc<MockHost>,
    tokens: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(host: Arc<MockHost>) -> Self {
        Self {
            host,
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

impl HostConnector for MockConnector {
    fn connect(&self, token: &Secret) -> Result<Arc<dyn RepositoryHost>, ProviderError> {
        if token.is_blank() {
            return Err(ProviderError::MissingCredential);
        }
        self.tokens.lock().unwrap().push(token.expose().to_string());
        Ok(self.host.clone())
    }
}

// ── Callback notifier ────────────────────────────────────────────────

#[derive(Default)]
pub struct MockNotifier {
    reject: bool,
    deliveries: Mutex<Vec<(String, CallbackPayload)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<(String, CallbackPayload)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackNotifier for MockNotifier {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.reject {
            return Err(CallbackError::Rejected { status: 503 });
        }
        Ok(())
    }
}
