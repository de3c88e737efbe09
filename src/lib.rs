//! # aint-queue
//!
//! A persistent, at-least-once job queue with supervised worker strategies.
//!
//! Producers push jobs into a **channel**. A listener process pops them,
//! routes each one by its declared capability to one of three worker
//! strategies, and every outcome ends in exactly one of remove, release
//! (retry with backoff) or fail (dead-letter).
//!
//! ## 🚀 **Features**
//!
//! - **Atomic Redis driver**: every operation that moves an id between sets is one Lua script
//! - **Three worker strategies**: one process per job, a supervised process pool, and a
//!   single process running many jobs as tasks
//! - **Elastic sizing**: pool size follows the ready backlog
//! - **Graceful reload**: drain-and-restart, drain-and-stop and hard stop, driven by signals
//! - **Dead-letter inspection**: failed jobs keep a diagnostic and can be reloaded at any time
//!
//! ## 🎯 **Queue Backends**
//!
//! ### Memory (Tests and Single Process)
//! ```rust
//! use aint_queue::{JobPayload, MemoryQueue, Queue};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let queue = MemoryQueue::new("thumbnails");
//! let payload = JobPayload::callable("resize", &serde_json::json!({"width": 128})).unwrap();
//!
//! queue.push(&payload, Duration::from_secs(5)).await.unwrap();
//! assert_eq!(queue.status().await.unwrap().delayed, 1);
//! # });
//! ```
//!
//! ### Redis (Shared Between Hosts)
//! ```rust,ignore
//! #[cfg(feature = "redis")]
//! async fn example() -> aint_queue::Result<()> {
//!     use aint_queue::storage::{RedisConfig, RedisQueue};
//!
//!     let config = RedisConfig::new().with_url("redis://localhost:6379");
//!     let queue = RedisQueue::connect(&config, "thumbnails").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## ⚡ **Defining Jobs**
//!
//! Typed jobs implement [`Job`] and [`serializer::NamedJob`] and are
//! registered by name. Plain async functions can be registered as callables.
//!
//! ```rust
//! use aint_queue::serializer::{JobRegistry, NamedJob};
//! use aint_queue::processing::JobExecutor;
//! use aint_queue::{Job, JobCapability, JobContext, JobError, JobPayload, MemoryQueue, Queue};
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendWelcome {
//!     email: String,
//! }
//!
//! #[async_trait]
//! impl Job for SendWelcome {
//!     async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
//!         println!("welcome, {}", self.email);
//!         Ok(())
//!     }
//!
//!     fn capability(&self) -> JobCapability {
//!         JobCapability::CoroutineSafe
//!     }
//! }
//!
//! impl NamedJob for SendWelcome {
//!     const NAME: &'static str = "send_welcome";
//! }
//!
//! # tokio_test::block_on(async {
//! let mut registry = JobRegistry::new();
//! registry.register::<SendWelcome>();
//!
//! let queue = Arc::new(MemoryQueue::new("mail"));
//! let payload = JobPayload::object(&SendWelcome { email: "a@b.c".into() }).unwrap();
//! queue.push(&payload, Duration::ZERO).await.unwrap();
//! let id = queue.pop(Duration::from_secs(60)).await.unwrap().unwrap();
//!
//! let executor = JobExecutor::new(queue.clone(), Arc::new(registry));
//! assert!(executor.execute(id).await.unwrap().is_completed());
//! # });
//! ```
//!
//! ## 🛠️ **Running a Listener**
//!
//! The `aint-queue` binary wires everything from environment variables
//! (see [`storage::Settings`]):
//!
//! ```bash
//! aint-queue queue:listen --channel thumbnails
//! aint-queue queue:status --channel thumbnails
//! aint-queue worker:reload --channel thumbnails
//! ```
//!
//! Embedding applications register their jobs on a
//! [`console::Application`] and hand it the command line.

pub mod connection;
#[cfg(feature = "redis")]
pub mod console;
pub mod core;
pub mod error;
pub mod processing;
pub mod serializer;
pub mod storage;

// Re-export main types for convenience
pub use core::{
    FailedJob, FailureDiagnostic, Job, JobCapability, JobContext, JobError, JobMessage, JobStatus,
    QueueStatus,
};
pub use error::{QueueError, Result};
pub use processing::{
    JobExecutor, Manager, ManagerConfig, RetryPolicy, RetryStrategy, WorkerDirector, WorkerKind,
    WorkersConfig,
};
pub use serializer::{JobPayload, JobRegistry, PayloadKind};
pub use storage::{MemoryQueue, Queue, RedisConfig, Settings, StorageError};

#[cfg(feature = "redis")]
pub use storage::RedisQueue;
