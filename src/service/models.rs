use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AssemblyError;
use crate::secret::Secret;

/// A named attachment carried inline as a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// One accepted unit of work. Immutable once handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub round: u32,
    pub nonce: String,
    pub email: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub evaluation_url: String,
    pub secret: Secret,
}

impl Task {
    pub fn repository_name(&self) -> RepositoryName {
        RepositoryName::derive(&self.task_id, self.round)
    }
}

/// Repository name derived from `(task_id, round)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Lowercase the task id, map `_` and spaces to `-`, and append `-r{round}`.
    pub fn derive(task_id: &str, round: u32) -> Self {
        let cleaned: String = task_id
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();
        Self(format!("{}-r{}", cleaned, round))
    }

    /// Use a caller-chosen name verbatim.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A test case rendered into the README and the HTML test harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub description: String,
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    /// Turn a natural-language acceptance check into a manual test case.
    pub fn from_check(check: &str) -> Self {
        Self {
            description: check.to_string(),
            input: "manual_verification".to_string(),
            expected_output: "passes_check".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[serde(rename = "javascript")]
    JavaScript,
    Html,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Html => "html",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::JavaScript => "js",
            Self::Html => "html",
        }
    }

    /// File that receives unstructured model output.
    pub fn main_filename(&self) -> &'static str {
        match self {
            Self::JavaScript => "app.js",
            Self::Html => "index.html",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "javascript" => Ok(Self::JavaScript),
            "html" => Ok(Self::Html),
            _ => Err(format!("Invalid language: {} (expected javascript or html)", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Vanilla,
    React,
    Vue,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::React => "react",
            Self::Vue => "vue",
        }
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vanilla" => Ok(Self::Vanilla),
            "react" => Ok(Self::React),
            "vue" => Ok(Self::Vue),
            _ => Err(format!("Invalid framework: {} (expected vanilla, react or vue)", s)),
        }
    }
}

/// Files that count as a runnable application entry point.
const ENTRY_POINTS: &[&str] = &["index.html", "app.js", "main.js", "script.js", "main.py"];

/// Repository-relative path → file content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet(BTreeMap<String, String>);

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.0.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` onto `self`; entries from `other` win on collision.
    pub fn extend(&mut self, other: FileSet) {
        self.0.extend(other.0);
    }

    pub fn has_entry_point(&self) -> bool {
        self.0.keys().any(|path| {
            let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
            ENTRY_POINTS.contains(&name.as_str()) || name.ends_with(".html") || name.ends_with(".htm")
        })
    }

    /// Reject empty, absolute or parent-escaping paths.
    pub fn validate_paths(&self) -> Result<(), AssemblyError> {
        for path in self.0.keys() {
            let trimmed = path.trim();
            if trimmed.is_empty()
                || trimmed.starts_with('/')
                || trimmed.starts_with('\\')
                || trimmed.split(['/', '\\']).any(|segment| segment == "..")
            {
                return Err(AssemblyError::InvalidPath(path.clone()));
            }
        }
        Ok(())
    }

    /// Merge three layers, later layers winning: generated project files,
    /// then synthesized application files, then test-harness files.
    ///
    /// The synthesized layer must have safe paths and an application entry point.
    pub fn layered(
        generated: FileSet,
        synthesized: FileSet,
        tests: FileSet,
    ) -> Result<FileSet, AssemblyError> {
        synthesized.validate_paths()?;
        if !synthesized.has_entry_point() {
            return Err(AssemblyError::NoEntryPoint {
                found: synthesized.paths().join(", "),
            });
        }
        let mut merged = generated;
        merged.extend(synthesized);
        merged.extend(tests);
        Ok(merged)
    }
}

impl From<BTreeMap<String, String>> for FileSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lifecycle stage of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Accepted,
    Naming,
    Synthesizing,
    Assembling,
    Committing,
    Publishing,
    Notifying,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Naming => "naming",
            Self::Synthesizing => "synthesizing",
            Self::Assembling => "assembling",
            Self::Committing => "committing",
            Self::Publishing => "publishing",
            Self::Notifying => "notifying",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// The single forward successor of a non-terminal stage.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            Self::Accepted => Some(Self::Naming),
            Self::Naming => Some(Self::Synthesizing),
            Self::Synthesizing => Some(Self::Assembling),
            Self::Assembling => Some(Self::Committing),
            Self::Committing => Some(Self::Publishing),
            Self::Publishing => Some(Self::Notifying),
            Self::Notifying => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Forward by exactly one step, or to `Failed` from any non-terminal stage.
    pub fn can_transition_to(&self, target: PipelineStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == PipelineStage::Failed || self.next() == Some(target)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a stage that may finish in a reduced form instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Complete(T),
    Degraded { value: T, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Terminal outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: RunStatus,
    pub repo_url: String,
    pub commit_id: String,
    pub pages_url: String,
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn completed(repo_url: String, commit_id: String, pages_url: String) -> Self {
        Self {
            status: RunStatus::Completed,
            repo_url,
            commit_id,
            pages_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            repo_url: String::new(),
            commit_id: String::new(),
            pages_url: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// JSON body posted to the caller's evaluation URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn new(task: &Task, result: &PipelineResult) -> Self {
        Self {
            email: task.email.clone(),
            task: task.task_id.clone(),
            round: task.round,
            nonce: task.nonce.clone(),
            repo_url: result.repo_url.clone(),
            commit_sha: result.commit_id.clone(),
            pages_url: result.pages_url.clone(),
            status: result.status,
            error: result.error.clone(),
        }
    }
}
