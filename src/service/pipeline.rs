//! Task pipeline: the per-task state machine.
//!
//! ```text
//! ACCEPTED → NAMING → SYNTHESIZING → ASSEMBLING → COMMITTING → PUBLISHING → NOTIFYING → DONE
//!                         └──────────────┴─────────────┘
//!                                       ↓
//!                                    FAILED → failure callback
//! ```
//!
//! PUBLISHING never fails a run: a host error there yields a degraded
//! [`StageOutcome`] carrying the fallback pages URL. Every run that starts
//! ends with exactly one callback attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use super::assembler::{License, ProjectFileAssembler, ProjectMetadata};
use super::cache::ResultCache;
use super::callback::CallbackNotifier;
use super::events::{EventSender, PipelineEvent, publish};
use super::host::{
    CommitInfo, HostConnector, RepositoryHost, RepositoryInfo, StaticSiteInfo, WorkflowRun,
    fallback_pages_url,
};
use super::models::{
    CallbackPayload, FileSet, Framework, Language, PipelineResult, PipelineStage, RepositoryName,
    RunStatus, StageOutcome, Task, TestCase,
};
use super::synthesizer::{CodeSynthesizer, SynthesisRequest};
use crate::errors::{HostOperation, PipelineError, ProviderError, SynthesisError};
use crate::secret::Secret;

pub const PUBLISH_BRANCH: &str = "main";
pub const PUBLISH_PATH: &str = "/";
pub const MANUAL_SETUP_STATUS: &str = "manual_setup_required";

const DESCRIPTION_PREFIX_CHARS: usize = 100;

fn prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// A synchronous instruction-based request.
#[derive(Debug, Clone)]
pub struct LegacyJob {
    pub instructions: String,
    pub tests: Vec<TestCase>,
    pub repo_name: RepositoryName,
    pub license: License,
    pub token: Secret,
    pub language: Language,
    pub framework: Framework,
}

/// What a legacy run returns to its HTTP caller.
#[derive(Debug, Clone)]
pub struct LegacyOutcome {
    pub repository: RepositoryInfo,
    pub commit: CommitInfo,
    pub site: StageOutcome<StaticSiteInfo>,
    pub workflow_runs: Vec<WorkflowRun>,
    pub files: Vec<String>,
    pub language: Language,
    pub framework: Framework,
    pub tests_count: usize,
    pub elapsed: Duration,
}

/// Everything a run needs to build and publish one repository.
struct PublishPlan {
    repo: RepositoryName,
    request: SynthesisRequest,
    metadata: ProjectMetadata,
    description: String,
    commit_message: String,
    cache_key: Option<String>,
}

impl PublishPlan {
    fn for_task(task: &Task, repo: RepositoryName) -> Self {
        let tests: Vec<TestCase> = task.checks.iter().map(|c| TestCase::from_check(c)).collect();
        Self {
            metadata: ProjectMetadata {
                repo_name: repo.to_string(),
                description: format!("Task: {} - {}", task.task_id, task.brief),
                language: Language::JavaScript,
                license: License::Mit,
                author: format!("AI Generated Project for {}", task.email),
                tests,
            },
            request: SynthesisRequest::Task {
                task_id: task.task_id.clone(),
                brief: task.brief.clone(),
                checks: task.checks.clone(),
                attachments: task.attachments.clone(),
            },
            description: format!(
                "AI-generated solution for task {} (Round {}): {}...",
                task.task_id,
                task.round,
                prefix(&task.brief, DESCRIPTION_PREFIX_CHARS)
            ),
            commit_message: format!(
                "Initial commit - AI generated solution for task {} round {}",
                task.task_id, task.round
            ),
            cache_key: Some(repo.to_string()),
            repo,
        }
    }

    fn for_legacy(job: &LegacyJob) -> Self {
        Self {
            repo: job.repo_name.clone(),
            metadata: ProjectMetadata {
                repo_name: job.repo_name.to_string(),
                description: job.instructions.clone(),
                language: job.language,
                license: job.license,
                author: "AI Generated Project".to_string(),
                tests: job.tests.clone(),
            },
            request: SynthesisRequest::Legacy {
                instructions: job.instructions.clone(),
                language: job.language,
                framework: job.framework,
                tests: job.tests.clone(),
            },
            description: format!(
                "AI-generated {} application: {}...",
                job.language.as_str(),
                prefix(&job.instructions, DESCRIPTION_PREFIX_CHARS)
            ),
            commit_message: "Initial commit - AI generated code with tests and CI/CD".to_string(),
            cache_key: None,
        }
    }
}

struct Published {
    host: Arc<dyn RepositoryHost>,
    repository: RepositoryInfo,
    commit: CommitInfo,
    site: StageOutcome<StaticSiteInfo>,
    files: FileSet,
}

/// Current stage of one run. Rejects out-of-order transitions and
/// publishes each accepted one.
pub struct StageTracker {
    repo: RepositoryName,
    current: PipelineStage,
    events: EventSender,
}

impl StageTracker {
    pub fn new(repo: RepositoryName, events: EventSender) -> Self {
        Self {
            repo,
            current: PipelineStage::Accepted,
            events,
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.current
    }

    /// Move to `next`. Returns false (and stays put) if the move is not allowed.
    pub fn enter(&mut self, next: PipelineStage) -> bool {
        if !self.current.can_transition_to(next) {
            warn!(
                repo = %self.repo,
                from = self.current.as_str(),
                to = next.as_str(),
                "rejected stage transition"
            );
            return false;
        }
        self.current = next;
        info!(repo = %self.repo, stage = next.as_str(), "stage entered");
        publish(
            &self.events,
            PipelineEvent::StageEntered {
                repo_name: self.repo.to_string(),
                stage: next,
            },
        );
        true
    }

    pub fn degraded(&self, reason: &str) {
        warn!(repo = %self.repo, stage = self.current.as_str(), reason, "stage degraded");
        publish(
            &self.events,
            PipelineEvent::StageDegraded {
                repo_name: self.repo.to_string(),
                stage: self.current,
                reason: reason.to_string(),
            },
        );
    }
}

pub struct TaskPipeline {
    synthesizer: Arc<dyn CodeSynthesizer>,
    connector: Arc<dyn HostConnector>,
    notifier: Arc<dyn CallbackNotifier>,
    host_token: Option<Secret>,
    cache: Option<Arc<ResultCache>>,
    events: EventSender,
}

impl TaskPipeline {
    pub fn new(
        synthesizer: Arc<dyn CodeSynthesizer>,
        connector: Arc<dyn HostConnector>,
        notifier: Arc<dyn CallbackNotifier>,
        events: EventSender,
    ) -> Self {
        Self {
            synthesizer,
            connector,
            notifier,
            host_token: None,
            cache: None,
            events,
        }
    }

    /// Credential used for background task runs.
    pub fn with_host_token(mut self, token: Option<Secret>) -> Self {
        self.host_token = token;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn connector(&self) -> &Arc<dyn HostConnector> {
        &self.connector
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Run one task to its terminal state and send its single callback.
    pub async fn run(&self, task: Task) -> PipelineResult {
        let repo = task.repository_name();
        publish(
            &self.events,
            PipelineEvent::TaskAccepted {
                task_id: task.task_id.clone(),
                round: task.round,
                repo_name: repo.to_string(),
            },
        );
        info!(task_id = %task.task_id, round = task.round, "pipeline started");

        let mut tracker = StageTracker::new(repo.clone(), self.events.clone());
        tracker.enter(PipelineStage::Naming);
        info!(task_id = %task.task_id, repo = %repo, "repository name assigned");

        let plan = PublishPlan::for_task(&task, repo.clone());
        let result = match self
            .build_and_publish(&plan, self.host_token.as_ref(), &mut tracker)
            .await
        {
            Ok(published) => {
                tracker.enter(PipelineStage::Notifying);
                PipelineResult::completed(
                    published.repository.html_url,
                    published.commit.sha,
                    published.site.into_value().url,
                )
            }
            Err(e) => {
                error!(task_id = %task.task_id, repo = %repo, stage = tracker.current().as_str(), error = %e, "pipeline failed");
                tracker.enter(PipelineStage::Failed);
                PipelineResult::failed(e.to_string())
            }
        };

        self.notify(&task, &repo, &result).await;
        if result.is_completed() {
            tracker.enter(PipelineStage::Done);
        }

        info!(task_id = %task.task_id, repo = %repo, status = result.status.as_str(), "pipeline finished");
        publish(
            &self.events,
            PipelineEvent::RunFinished {
                repo_name: repo.to_string(),
                status: result.status,
                error: result.error.clone(),
            },
        );
        result
    }

    /// Terminal step for a run that died before reaching its own callback.
    pub async fn report_crash(&self, task: &Task, reason: &str) -> PipelineResult {
        let repo = task.repository_name();
        let result = PipelineResult::failed(format!("Pipeline crashed: {}", reason));
        self.notify(task, &repo, &result).await;
        self.finished(&repo, RunStatus::Failed, result.error.clone());
        result
    }

    /// Run an instruction-based request synchronously. No callback is sent;
    /// the outcome goes back to the caller.
    pub async fn run_legacy(&self, job: LegacyJob) -> Result<LegacyOutcome, PipelineError> {
        let started = Instant::now();
        let plan = PublishPlan::for_legacy(&job);
        let mut tracker = StageTracker::new(plan.repo.clone(), self.events.clone());
        tracker.enter(PipelineStage::Naming);

        let published = match self.build_and_publish(&plan, Some(&job.token), &mut tracker).await {
            Ok(published) => published,
            Err(e) => {
                error!(repo = %plan.repo, stage = tracker.current().as_str(), error = %e, "legacy run failed");
                tracker.enter(PipelineStage::Failed);
                self.finished(&plan.repo, RunStatus::Failed, Some(e.to_string()));
                return Err(e);
            }
        };

        let workflow_runs = match published.host.list_recent_runs(&plan.repo).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(repo = %plan.repo, error = %e, "could not list workflow runs");
                Vec::new()
            }
        };

        tracker.enter(PipelineStage::Notifying);
        tracker.enter(PipelineStage::Done);
        self.finished(&plan.repo, RunStatus::Completed, None);

        Ok(LegacyOutcome {
            repository: published.repository,
            commit: published.commit,
            site: published.site,
            workflow_runs,
            files: published.files.paths(),
            language: job.language,
            framework: job.framework,
            tests_count: job.tests.len(),
            elapsed: started.elapsed(),
        })
    }

    fn finished(&self, repo: &RepositoryName, status: RunStatus, error: Option<String>) {
        publish(
            &self.events,
            PipelineEvent::RunFinished {
                repo_name: repo.to_string(),
                status,
                error,
            },
        );
    }

    async fn build_and_publish(
        &self,
        plan: &PublishPlan,
        token: Option<&Secret>,
        tracker: &mut StageTracker,
    ) -> Result<Published, PipelineError> {
        tracker.enter(PipelineStage::Synthesizing);
        let (synthesized, from_cache) = self.synthesize(plan).await?;

        tracker.enter(PipelineStage::Assembling);
        let assembled = ProjectFileAssembler::new(Utc::now()).assemble(&plan.metadata, synthesized.clone());
        let files = match assembled {
            Ok(files) => files,
            Err(e) => {
                if from_cache {
                    self.forget_synthesis(plan).await;
                }
                return Err(e.into());
            }
        };
        info!(repo = %plan.repo, files = files.len(), "files assembled");
        if !from_cache {
            self.remember_synthesis(plan, &synthesized).await;
        }

        tracker.enter(PipelineStage::Committing);
        let host = self
            .connect(token)
            .map_err(|e| PipelineError::provider(HostOperation::CreateRepository, e))?;
        let repository = host
            .create_repository(&plan.repo, &plan.description, false)
            .await
            .map_err(|e| PipelineError::provider(HostOperation::CreateRepository, e))?;
        info!(repo = %plan.repo, url = %repository.html_url, "repository created");

        let commit = host
            .commit_files(&plan.repo, &files, &plan.commit_message)
            .await
            .map_err(|e| PipelineError::provider(HostOperation::CommitFiles, e))?;
        info!(repo = %plan.repo, sha = %commit.sha, files = commit.files.len(), "files committed");

        tracker.enter(PipelineStage::Publishing);
        let site = self.publish_site(host.as_ref(), &plan.repo, &repository).await;
        if let StageOutcome::Degraded { reason, .. } = &site {
            tracker.degraded(reason);
        }

        Ok(Published {
            host,
            repository,
            commit,
            site,
            files,
        })
    }

    fn connect(&self, token: Option<&Secret>) -> Result<Arc<dyn RepositoryHost>, ProviderError> {
        match token {
            Some(token) if !token.is_blank() => self.connector.connect(token),
            _ => Err(ProviderError::MissingCredential),
        }
    }

    /// Cached files for this plan if present, otherwise one synthesizer call.
    /// The flag is true when the files came from the cache.
    async fn synthesize(&self, plan: &PublishPlan) -> Result<(FileSet, bool), PipelineError> {
        if let Some((key, cache)) = self.cache_slot(plan) {
            match cache.get::<FileSet>(key).await {
                Ok(Some(files)) if !files.is_empty() => {
                    info!(repo = %plan.repo, files = files.len(), "reusing cached synthesis");
                    return Ok((files, true));
                }
                Ok(_) => {}
                Err(e) => warn!(repo = %plan.repo, error = %e, "cache read failed"),
            }
        }

        let files = self.synthesizer.synthesize(&plan.request).await?;
        if files.is_empty() {
            return Err(SynthesisError::NoFiles.into());
        }
        info!(repo = %plan.repo, files = files.len(), "code synthesized");
        Ok((files, false))
    }

    fn cache_slot<'a>(&'a self, plan: &'a PublishPlan) -> Option<(&'a str, &'a ResultCache)> {
        plan.cache_key.as_deref().zip(self.cache.as_deref())
    }

    /// Store files that assembled cleanly. Cache problems never fail the run.
    async fn remember_synthesis(&self, plan: &PublishPlan, files: &FileSet) {
        if let Some((key, cache)) = self.cache_slot(plan)
            && let Err(e) = cache.set(key, files).await
        {
            warn!(repo = %plan.repo, error = %e, "cache write failed");
        }
    }

    /// Drop a cached synthesis that no longer assembles.
    async fn forget_synthesis(&self, plan: &PublishPlan) {
        if let Some((key, cache)) = self.cache_slot(plan) {
            match cache.delete(key).await {
                Ok(_) => warn!(repo = %plan.repo, "discarded cached synthesis that failed assembly"),
                Err(e) => warn!(repo = %plan.repo, error = %e, "cache delete failed"),
            }
        }
    }

    async fn publish_site(
        &self,
        host: &dyn RepositoryHost,
        repo: &RepositoryName,
        repository: &RepositoryInfo,
    ) -> StageOutcome<StaticSiteInfo> {
        match host.enable_static_hosting(repo, PUBLISH_BRANCH, PUBLISH_PATH).await {
            Ok(site) => {
                info!(repo = %repo, url = %site.url, status = %site.status, "static hosting enabled");
                StageOutcome::Complete(site)
            }
            Err(e) => {
                let owner = repository.full_name.split('/').next().unwrap_or_default();
                StageOutcome::Degraded {
                    value: StaticSiteInfo {
                        url: fallback_pages_url(owner, repo),
                        status: MANUAL_SETUP_STATUS.to_string(),
                        already_enabled: false,
                    },
                    reason: PipelineError::provider(HostOperation::EnableStaticHosting, e).to_string(),
                }
            }
        }
    }

    /// One delivery attempt. Failures are logged and swallowed.
    async fn notify(&self, task: &Task, repo: &RepositoryName, result: &PipelineResult) {
        let payload = CallbackPayload::new(task, result);
        let outcome = self.notifier.deliver(&task.evaluation_url, &payload).await;
        let error = match outcome {
            Ok(()) => {
                info!(task_id = %task.task_id, repo = %repo, status = result.status.as_str(), "callback delivered");
                None
            }
            Err(e) => {
                warn!(task_id = %task.task_id, repo = %repo, error = %e, "callback delivery failed");
                Some(e.to_string())
            }
        };
        publish(
            &self.events,
            PipelineEvent::CallbackAttempted {
                repo_name: repo.to_string(),
                delivered: error.is_none(),
                error,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::events;
    use crate::service::models::RunStatus;
    use crate::service::test_support::*;
    use tempfile::TempDir;

    struct Harness {
        pipeline: TaskPipeline,
        synthesizer: Arc<MockSynthesizer>,
        host: Arc<MockHost>,
        notifier: Arc<MockNotifier>,
        events: tokio::sync::broadcast::Receiver<PipelineEvent>,
    }

    fn harness_with(synthesizer: MockSynthesizer, host: MockHost, notifier: MockNotifier) -> Harness {
        let synthesizer = Arc::new(synthesizer);
        let host = Arc::new(host);
        let notifier = Arc::new(notifier);
        let tx = events::channel();
        let events = tx.subscribe();
        let pipeline = TaskPipeline::new(
            synthesizer.clone(),
            Arc::new(MockConnector::new(host.clone())),
            notifier.clone(),
            tx,
        )
        .with_host_token(Some(Secret::new("ghp_test")));
        Harness {
            pipeline,
            synthesizer,
            host,
            notifier,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(MockSynthesizer::returning(app_files()), MockHost::new(), MockNotifier::new())
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn stages(events: &[PipelineEvent]) -> Vec<PipelineStage> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageEntered { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn successful_run_sends_one_completed_callback() {
        let mut h = harness();
        let result = h.pipeline.run(sample_task("Captcha Solver", 2)).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.repo_url, "https://github.com/octo/captcha-solver-r2");
        assert_eq!(result.commit_id, COMMIT_SHA);
        assert_eq!(result.pages_url, "https://octo.github.io/captcha-solver-r2/");

        let deliveries = h.notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        let (url, payload) = &deliveries[0];
        assert_eq!(url, "https://eval.example.com/notify");
        assert_eq!(payload.status, RunStatus::Completed);
        assert_eq!(payload.task, "Captcha Solver");
        assert_eq!(payload.round, 2);
        assert_eq!(payload.nonce, "nonce-1");
        assert!(!payload.repo_url.is_empty());
        assert!(!payload.commit_sha.is_empty());
        assert!(payload.error.is_none());

        let events = drain(&mut h.events);
        assert_eq!(
            stages(&events),
            vec![
                PipelineStage::Naming,
                PipelineStage::Synthesizing,
                PipelineStage::Assembling,
                PipelineStage::Committing,
                PipelineStage::Publishing,
                PipelineStage::Notifying,
                PipelineStage::Done,
            ]
        );
        assert!(matches!(events.first(), Some(PipelineEvent::TaskAccepted { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::RunFinished { status: RunStatus::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn committed_files_layer_project_app_and_tests() {
        let h = harness();
        h.pipeline.run(sample_task("demo", 1)).await;

        let committed = h.host.committed().unwrap();
        for path in [
            "README.md",
            "LICENSE",
            ".github/workflows/ci.yml",
            "index.html",
            "script.js",
            "test.html",
            "package.json",
        ] {
            assert!(committed.contains(path), "missing {}", path);
        }
        assert_eq!(committed.len(), 7);
        assert!(committed.get("README.md").unwrap().contains("Task: demo - Build a page"));
        assert!(committed.get("LICENSE").unwrap().contains("AI Generated Project for student@example.com"));
    }

    #[tokio::test]
    async fn repository_description_and_commit_message_name_the_task() {
        let h = harness();
        h.pipeline.run(sample_task("demo", 3)).await;
        assert_eq!(
            h.host.descriptions(),
            vec!["AI-generated solution for task demo (Round 3): Build a page that shows a captcha and solves it...".to_string()]
        );
        assert_eq!(
            h.host.commit_messages(),
            vec!["Initial commit - AI generated solution for task demo round 3".to_string()]
        );
    }

    #[tokio::test]
    async fn synthesizer_receives_task_request() {
        let h = harness();
        h.pipeline.run(sample_task("demo", 1)).await;
        let requests = h.synthesizer.requests();
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            SynthesisRequest::Task { task_id, checks, attachments, .. } => {
                assert_eq!(task_id, "demo");
                assert_eq!(checks.len(), 2);
                assert_eq!(attachments.len(), 1);
            }
            other => panic!("Expected Task request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn commit_failure_sends_one_failed_callback() {
        let mut h = harness_with(
            MockSynthesizer::returning(app_files()),
            MockHost::failing_on(HostOperation::CommitFiles),
            MockNotifier::new(),
        );
        let result = h.pipeline.run(sample_task("demo", 1)).await;

        assert_eq!(result.status, RunStatus::Failed);
        let deliveries = h.notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        let payload = &deliveries[0].1;
        assert_eq!(payload.status, RunStatus::Failed);
        assert_eq!(payload.repo_url, "");
        assert_eq!(payload.commit_sha, "");
        assert_eq!(payload.pages_url, "");
        let error = payload.error.as_deref().unwrap();
        assert!(error.starts_with("Failed to add files to repository"), "{}", error);

        // Static hosting is never attempted after a failed commit.
        assert!(!h.host.calls().iter().any(|c| c.starts_with("enable static hosting")));

        let events = drain(&mut h.events);
        let seen = stages(&events);
        assert_eq!(seen.last(), Some(&PipelineStage::Failed));
        assert!(!seen.contains(&PipelineStage::Publishing));
        assert!(!seen.contains(&PipelineStage::Done));
    }

    #[tokio::test]
    async fn static_hosting_failure_still_completes() {
        let mut h = harness_with(
            MockSynthesizer::returning(app_files()),
            MockHost::failing_on(HostOperation::EnableStaticHosting),
            MockNotifier::new(),
        );
        let result = h.pipeline.run(sample_task("demo", 1)).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.pages_url, "https://octo.github.io/demo-r1");
        let deliveries = h.notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1.status, RunStatus::Completed);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::StageDegraded { stage: PipelineStage::Publishing, .. }
        )));
    }

    #[tokio::test]
    async fn synthesis_failure_skips_the_host() {
        let h = harness_with(
            MockSynthesizer::failing(|| SynthesisError::EmptyResponse),
            MockHost::new(),
            MockNotifier::new(),
        );
        let result = h.pipeline.run(sample_task("demo", 1)).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().starts_with("Code generation failed"));
        assert!(h.host.calls().is_empty());
        assert_eq!(h.notifier.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn output_without_entry_point_fails_assembly() {
        let h = harness_with(
            MockSynthesizer::returning(FileSet::from_iter([("notes.txt", "hello")])),
            MockHost::new(),
            MockNotifier::new(),
        );
        let result = h.pipeline.run(sample_task("demo", 1)).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().starts_with("File assembly failed"));
        assert!(h.host.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_host_token_fails_at_committing() {
        let h = harness();
        let pipeline = TaskPipeline::new(
            h.synthesizer.clone(),
            Arc::new(MockConnector::new(h.host.clone())),
            h.notifier.clone(),
            events::channel(),
        );
        let result = pipeline.run(sample_task("demo", 1)).await;

        assert_eq!(result.status, RunStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("credential"), "{}", error);
        assert!(h.host.calls().is_empty());
        assert_eq!(h.notifier.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn rejected_callback_does_not_change_the_result() {
        let mut h = harness_with(
            MockSynthesizer::returning(app_files()),
            MockHost::new(),
            MockNotifier::rejecting(),
        );
        let result = h.pipeline.run(sample_task("demo", 1)).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(h.notifier.deliveries().len(), 1);
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::CallbackAttempted { delivered: false, error: Some(_), .. }
        )));
    }

    #[tokio::test]
    async fn cached_synthesis_is_reused_within_ttl() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(
            ResultCache::open(tmp.path(), Duration::from_secs(3600)).await.unwrap(),
        );
        let h = harness();
        let pipeline = TaskPipeline::new(
            h.synthesizer.clone(),
            Arc::new(MockConnector::new(h.host.clone())),
            h.notifier.clone(),
            events::channel(),
        )
        .with_host_token(Some(Secret::new("ghp_test")))
        .with_cache(cache.clone());

        pipeline.run(sample_task("demo", 1)).await;
        pipeline.run(sample_task("demo", 1)).await;
        assert_eq!(h.synthesizer.call_count(), 1);

        let cached: Option<FileSet> = cache.get("demo-r1").await.unwrap();
        assert_eq!(cached, Some(app_files()));

        pipeline.run(sample_task("demo", 2)).await;
        assert_eq!(h.synthesizer.call_count(), 2);
    }

    fn cached_pipeline(synthesizer: Arc<MockSynthesizer>, cache: Arc<ResultCache>) -> TaskPipeline {
        TaskPipeline::new(
            synthesizer,
            Arc::new(MockConnector::new(Arc::new(MockHost::new()))),
            Arc::new(MockNotifier::new()),
            events::channel(),
        )
        .with_host_token(Some(Secret::new("ghp_test")))
        .with_cache(cache)
    }

    #[tokio::test]
    async fn synthesis_that_fails_assembly_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(
            ResultCache::open(tmp.path(), Duration::from_secs(3600)).await.unwrap(),
        );
        let notes: FileSet = [("notes.txt", "hello")].into_iter().collect();

        let bad = Arc::new(MockSynthesizer::returning(notes));
        let first = cached_pipeline(bad.clone(), cache.clone())
            .run(sample_task("demo", 1))
            .await;
        assert_eq!(first.status, RunStatus::Failed);
        assert!(first.error.unwrap().starts_with("File assembly failed"));
        let cached: Option<FileSet> = cache.get("demo-r1").await.unwrap();
        assert_eq!(cached, None);

        let good = Arc::new(MockSynthesizer::returning(app_files()));
        let second = cached_pipeline(good.clone(), cache.clone())
            .run(sample_task("demo", 1))
            .await;
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(good.call_count(), 1);
    }

    #[tokio::test]
    async fn stale_cached_synthesis_is_discarded_when_it_fails_assembly() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(
            ResultCache::open(tmp.path(), Duration::from_secs(3600)).await.unwrap(),
        );
        let notes: FileSet = [("notes.txt", "hello")].into_iter().collect();
        cache.set("demo-r1", &notes).await.unwrap();

        let good = Arc::new(MockSynthesizer::returning(app_files()));
        let pipeline = cached_pipeline(good.clone(), cache.clone());

        let first = pipeline.run(sample_task("demo", 1)).await;
        assert_eq!(first.status, RunStatus::Failed);
        assert_eq!(good.call_count(), 0);
        assert!(!cache.path_for("demo-r1").exists());

        let second = pipeline.run(sample_task("demo", 1)).await;
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(good.call_count(), 1);
        let cached: Option<FileSet> = cache.get("demo-r1").await.unwrap();
        assert_eq!(cached, Some(app_files()));
    }

    fn legacy_job() -> LegacyJob {
        LegacyJob {
            instructions: "Build a calculator".to_string(),
            tests: vec![TestCase {
                description: "adds".to_string(),
                input: "1+1".to_string(),
                expected_output: "2".to_string(),
            }],
            repo_name: RepositoryName::new("calc-app"),
            license: License::Apache,
            token: Secret::new("ghp_caller"),
            language: Language::Html,
            framework: Framework::Vanilla,
        }
    }

    #[tokio::test]
    async fn legacy_run_returns_outcome_without_callback() {
        let h = harness();
        let outcome = h.pipeline.run_legacy(legacy_job()).await.unwrap();

        assert_eq!(outcome.repository.name, "calc-app");
        assert_eq!(outcome.commit.sha, COMMIT_SHA);
        assert!(!outcome.site.is_degraded());
        assert_eq!(outcome.workflow_runs.len(), 1);
        assert_eq!(outcome.tests_count, 1);
        assert!(outcome.files.contains(&"LICENSE".to_string()));
        assert!(h.notifier.deliveries().is_empty());
        assert_eq!(
            h.host.commit_messages(),
            vec!["Initial commit - AI generated code with tests and CI/CD".to_string()]
        );
        assert!(h.host.descriptions()[0].starts_with("AI-generated html application: Build a calculator"));
        assert!(h.host.committed().unwrap().get("LICENSE").unwrap().contains("Apache License"));
    }

    #[tokio::test]
    async fn legacy_run_propagates_stage_errors() {
        let h = harness_with(
            MockSynthesizer::returning(app_files()),
            MockHost::failing_on(HostOperation::CreateRepository),
            MockNotifier::new(),
        );
        let err = h.pipeline.run_legacy(legacy_job()).await.unwrap_err();
        match err {
            PipelineError::Provider { operation, .. } => {
                assert_eq!(operation, HostOperation::CreateRepository)
            }
            other => panic!("Expected Provider error, got {:?}", other),
        }
        assert!(h.notifier.deliveries().is_empty());
    }

    #[tokio::test]
    async fn legacy_run_tolerates_missing_workflow_runs() {
        let h = harness_with(
            MockSynthesizer::returning(app_files()),
            MockHost::failing_on(HostOperation::ListRuns),
            MockNotifier::new(),
        );
        let outcome = h.pipeline.run_legacy(legacy_job()).await.unwrap();
        assert!(outcome.workflow_runs.is_empty());
    }

    #[test]
    fn tracker_rejects_skipping_stages() {
        let mut tracker = StageTracker::new(RepositoryName::new("x"), events::channel());
        assert!(!tracker.enter(PipelineStage::Committing));
        assert_eq!(tracker.current(), PipelineStage::Accepted);
        assert!(tracker.enter(PipelineStage::Naming));
        assert!(tracker.enter(PipelineStage::Failed));
        assert!(!tracker.enter(PipelineStage::Synthesizing));
        assert_eq!(tracker.current(), PipelineStage::Failed);
    }

    #[test]
    fn description_prefix_counts_characters() {
        assert_eq!(prefix("héllo wörld", 5), "héllo");
        assert_eq!(prefix("ab", 100), "ab");
    }
}
