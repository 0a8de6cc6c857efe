//! Task-to-repository HTTP service.
//!
//! ## Overview
//!
//! A caller submits a task (brief, checks, attachments). The service
//! acknowledges immediately, then in the background asks a code model for a
//! static web app, adds project files, publishes everything to a new GitHub
//! repository with Pages enabled, and POSTs exactly one result to the
//! caller's evaluation URL.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP   ┌───────────────────────────────────────────────────┐
//! │  Caller  │ ──────> │  server.rs  (router, state wiring, shutdown)      │
//! │          │ <────── │    └─ api.rs  (handlers, AppState, ApiError)      │
//! └──────────┘  ack    │         │                                         │
//!      ^               │         │ TaskIntake::accept()                    │
//!      │               │         v                                         │
//!      │               │  intake.rs  (parse → authenticate → validate)     │
//!      │               │         │                                         │
//!      │               │         │ PipelineRunner::submit()                │
//!      │               │         v                                         │
//!      │               │  runner.rs  (one spawned task per run)            │
//!      │               │         │                                         │
//!      │               │         │ TaskPipeline::run()                     │
//!      │               │         v                                         │
//!      │  callback     │  pipeline.rs  (stage machine)                     │
//!      └───────────────│    ├─ synthesizer.rs / gemini.rs                  │
//!                      │    ├─ assembler.rs                                │
//!                      │    ├─ host.rs / github.rs                         │
//!                      │    └─ callback.rs                                 │
//!                      └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `models`  | `Task`, `RepositoryName`, `FileSet`, `PipelineStage`, results |
//! | `cache`   | `ResultCache`, file-backed synthesis cache with a TTL       |
//! | `events`  | `PipelineEvent` broadcast + `/ws` streaming                 |

pub mod api;
pub mod assembler;
pub mod cache;
pub mod callback;
pub mod events;
pub mod gemini;
pub mod github;
pub mod host;
pub mod intake;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod test_support;
