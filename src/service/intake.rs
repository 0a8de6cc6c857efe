//! Request intake: parse, authenticate, validate, then hand off.
//!
//! Order matters. A body that is not JSON is a validation error. A body
//! whose `secret` is a string that does not match is unauthorized even if
//! other fields are missing. Only a fully valid, authenticated task reaches
//! the runner.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::assembler::License;
use super::models::{Attachment, Framework, Language, PipelineResult, RepositoryName, Task, TestCase};
use super::pipeline::LegacyJob;
use super::runner::PipelineRunner;
use crate::errors::IntakeError;
use crate::secret::Secret;

pub const ACCEPTED_MESSAGE: &str = "Task accepted and is being processed in the background";
pub const CALLBACK_NOTE: &str = "A callback will be sent to the evaluation_url when processing completes";

#[derive(Debug, Deserialize)]
struct TaskRequest {
    email: String,
    secret: String,
    task: String,
    round: i64,
    nonce: String,
    brief: String,
    checks: Vec<String>,
    evaluation_url: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct LegacyRequest {
    instructions: String,
    tests: Vec<TestCase>,
    repository_name: String,
    #[serde(default)]
    license: Option<String>,
    github_token: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    framework: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEcho {
    pub id: String,
    pub round: u32,
    pub nonce: String,
    pub email: String,
    pub status: String,
}

/// Immediate response to an accepted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    pub message: String,
    pub task: TaskEcho,
    pub evaluation_url: String,
    pub note: String,
}

impl Acknowledgement {
    fn for_task(task: &Task) -> Self {
        Self {
            success: true,
            message: ACCEPTED_MESSAGE.to_string(),
            task: TaskEcho {
                id: task.task_id.clone(),
                round: task.round,
                nonce: task.nonce.clone(),
                email: task.email.clone(),
                status: "processing".to_string(),
            },
            evaluation_url: task.evaluation_url.clone(),
            note: CALLBACK_NOTE.to_string(),
        }
    }
}

/// An accepted task: the acknowledgement plus the handle of its detached run.
pub struct Submission {
    pub acknowledgement: Acknowledgement,
    pub handle: JoinHandle<PipelineResult>,
}

pub struct TaskIntake {
    api_secret: Option<Secret>,
    runner: PipelineRunner,
}

impl TaskIntake {
    pub fn new(api_secret: Option<Secret>, runner: PipelineRunner) -> Self {
        let api_secret = api_secret.filter(|s| !s.is_blank());
        if api_secret.is_none() {
            warn!("no shared secret configured; every task will be rejected");
        }
        Self { api_secret, runner }
    }

    pub fn runner(&self) -> &PipelineRunner {
        &self.runner
    }

    fn authenticate(&self, candidate: &str) -> Result<(), IntakeError> {
        match &self.api_secret {
            Some(secret) if secret.matches(candidate) => Ok(()),
            _ => Err(IntakeError::Unauthorized),
        }
    }

    pub fn accept(&self, body: &[u8]) -> Result<Submission, IntakeError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| IntakeError::Validation(format!("Request body is not valid JSON: {}", e)))?;

        if let Some(candidate) = value.get("secret").and_then(Value::as_str)
            && let Err(e) = self.authenticate(candidate)
        {
            let task_id = value.get("task").and_then(Value::as_str).unwrap_or_default();
            warn!(task_id, "invalid secret");
            return Err(e);
        }

        let task = parse_task(value)?;
        self.authenticate(task.secret.expose())?;

        let acknowledgement = Acknowledgement::for_task(&task);
        info!(task_id = %task.task_id, round = task.round, email = %task.email, "task accepted");
        let handle = self.runner.submit(task)?;
        Ok(Submission {
            acknowledgement,
            handle,
        })
    }
}

fn invalid(message: impl Into<String>) -> IntakeError {
    IntakeError::Validation(message.into())
}

fn require(field: &str, value: &str) -> Result<(), IntakeError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn validate_url(field: &str, raw: &str) -> Result<(), IntakeError> {
    let url = Url::parse(raw).map_err(|e| invalid(format!("{} is not a valid URL: {}", field, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid(format!("{} must be an absolute http(s) URL", field)));
    }
    Ok(())
}

fn parse_task(value: Value) -> Result<Task, IntakeError> {
    let req: TaskRequest =
        serde_json::from_value(value).map_err(|e| invalid(format!("Invalid task request: {}", e)))?;

    if !looks_like_email(&req.email) {
        return Err(invalid("email must be a valid email address"));
    }
    require("secret", &req.secret)?;
    require("task", &req.task)?;
    require("nonce", &req.nonce)?;
    require("brief", &req.brief)?;

    let round = u32::try_from(req.round)
        .ok()
        .filter(|r| *r > 0)
        .ok_or_else(|| invalid("round must be a positive integer"))?;

    if req.checks.is_empty() {
        return Err(invalid("checks must contain at least one entry"));
    }
    if req.checks.iter().any(|c| c.trim().is_empty()) {
        return Err(invalid("checks must not contain empty entries"));
    }

    validate_url("evaluation_url", &req.evaluation_url)?;

    for attachment in &req.attachments {
        require("attachment name", &attachment.name)?;
        if !attachment.url.starts_with("data:") {
            return Err(invalid(format!(
                "attachment '{}' must use a data: URI",
                attachment.name
            )));
        }
    }

    Ok(Task {
        task_id: req.task,
        round,
        nonce: req.nonce,
        email: req.email,
        brief: req.brief,
        checks: req.checks,
        attachments: req.attachments,
        evaluation_url: req.evaluation_url,
        secret: Secret::new(req.secret),
    })
}

/// Parse and validate an instruction-based request body.
pub fn parse_legacy_request(body: &[u8]) -> Result<LegacyJob, IntakeError> {
    let req: LegacyRequest =
        serde_json::from_slice(body).map_err(|e| invalid(format!("Invalid request: {}", e)))?;

    require("instructions", &req.instructions)?;
    require("repository_name", &req.repository_name)?;
    require("github_token", &req.github_token)?;

    let name = req.repository_name.trim();
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "repository_name may only contain letters, digits, '-', '_' and '.'",
        ));
    }

    if req.tests.is_empty() {
        return Err(invalid("tests must contain at least one test case"));
    }
    for test in &req.tests {
        require("test description", &test.description)?;
    }

    let license = match req.license.as_deref() {
        Some(raw) => raw.parse::<License>().map_err(invalid)?,
        None => License::default(),
    };
    let language = match req.language.as_deref() {
        Some(raw) => raw.parse::<Language>().map_err(invalid)?,
        None => Language::JavaScript,
    };
    let framework = match req.framework.as_deref() {
        Some(raw) => raw.parse::<Framework>().map_err(invalid)?,
        None => Framework::Vanilla,
    };

    Ok(LegacyJob {
        instructions: req.instructions,
        tests: req.tests,
        repo_name: RepositoryName::new(name),
        license,
        token: Secret::new(req.github_token),
        language,
        framework,
    })
}
