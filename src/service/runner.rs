//! Background execution of accepted tasks.
//!
//! Each accepted task gets its own spawned tokio task. A repository name
//! stays reserved while its run is in flight, so a concurrent resubmission of
//! the same `(task, round)` is refused instead of racing on the host.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::models::{PipelineResult, Task};
use super::pipeline::TaskPipeline;
use crate::errors::IntakeError;

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Releases a repository name when its run ends, including by panic.
struct InFlightGuard {
    in_flight: InFlight,
    repo_name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.repo_name);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<TaskPipeline>,
    in_flight: InFlight,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<TaskPipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn pipeline(&self) -> &Arc<TaskPipeline> {
        &self.pipeline
    }

    pub fn is_running(&self, repo_name: &str) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(repo_name)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Start a detached run. Returns before the run does any external work.
    pub fn submit(&self, task: Task) -> Result<JoinHandle<PipelineResult>, IntakeError> {
        let repo_name = task.repository_name().to_string();
        {
            let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !set.insert(repo_name.clone()) {
                warn!(repo = %repo_name, "duplicate submission while run in flight");
                return Err(IntakeError::AlreadyRunning { repo_name });
            }
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            repo_name: repo_name.clone(),
        };
        let pipeline = Arc::clone(&self.pipeline);
        info!(repo = %repo_name, task_id = %task.task_id, round = task.round, "run scheduled");

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let crashed = task.clone();
            match AssertUnwindSafe(pipeline.run(task)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(repo = %repo_name, reason = %reason, "run panicked");
                    pipeline.report_crash(&crashed, &reason).await
                }
            }
        }))
    }
}
