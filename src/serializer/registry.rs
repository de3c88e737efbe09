//! Job registry
//!
//! Maps payload type tags to decoders. Typed jobs register through
//! [`JobRegistry::register`]; plain async functions register through
//! [`JobRegistry::register_callable`]. Both are resolved when a job is
//! fetched, so an unregistered tag becomes an invalid job instead of a
//! crash in the worker.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{NamedJob, PayloadKind};
use crate::core::{Job, JobCapability, JobContext, JobError, JobMessage};
use crate::error::{QueueError, Result};

type Decoder = Box<dyn Fn(&[u8]) -> serde_json::Result<Box<dyn Job>> + Send + Sync>;
type CallableFn = dyn Fn(Value) -> BoxFuture<'static, std::result::Result<(), JobError>> + Send + Sync;

#[derive(Clone)]
struct CallableEntry {
    function: Arc<CallableFn>,
    capability: JobCapability,
    ttr: Option<Duration>,
}

/// Registry of everything a worker knows how to run.
#[derive(Default)]
pub struct JobRegistry {
    decoders: HashMap<String, Decoder>,
    callables: HashMap<String, CallableEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed job under its [`NamedJob::NAME`].
    pub fn register<J: NamedJob>(&mut self) -> &mut Self {
        self.decoders.insert(
            J::NAME.to_string(),
            Box::new(|body| {
                let job: J = serde_json::from_slice(body)?;
                Ok(Box::new(job) as Box<dyn Job>)
            }),
        );
        self
    }

    /// Register an async function callable by name.
    pub fn register_callable<F, Fut>(
        &mut self,
        name: impl Into<String>,
        capability: JobCapability,
        function: F,
    ) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), JobError>> + Send + 'static,
    {
        self.register_callable_with_ttr(name, capability, None, function)
    }

    /// Register an async function with a time-to-run budget.
    pub fn register_callable_with_ttr<F, Fut>(
        &mut self,
        name: impl Into<String>,
        capability: JobCapability,
        ttr: Option<Duration>,
        function: F,
    ) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), JobError>> + Send + 'static,
    {
        let function: Arc<CallableFn> =
            Arc::new(move |args| -> BoxFuture<'static, std::result::Result<(), JobError>> {
                Box::pin(function(args))
            });
        self.callables.insert(
            name.into(),
            CallableEntry {
                function,
                capability,
                ttr,
            },
        );
        self
    }

    /// Turn a fetched message into something runnable.
    pub fn resolve(&self, message: &JobMessage) -> Result<Box<dyn Job>> {
        let payload = &message.payload;
        let body = payload.json_body().map_err(|e| {
            QueueError::invalid_job(message.id, format!("unreadable body: {}", e))
        })?;

        match payload.kind {
            PayloadKind::Callable => {
                let entry = self.callables.get(&payload.type_tag).ok_or_else(|| {
                    QueueError::invalid_job(
                        message.id,
                        format!("no callable registered as '{}'", payload.type_tag),
                    )
                })?;
                let args: Value = serde_json::from_slice(&body).map_err(|e| {
                    QueueError::invalid_job(message.id, format!("bad callable arguments: {}", e))
                })?;
                Ok(Box::new(CallableJob {
                    args,
                    entry: entry.clone(),
                }))
            }
            PayloadKind::Object | PayloadKind::CompressedObject => {
                let decoder = self.decoders.get(&payload.type_tag).ok_or_else(|| {
                    QueueError::invalid_job(
                        message.id,
                        format!("no job type registered as '{}'", payload.type_tag),
                    )
                })?;
                decoder(&body).map_err(|e| {
                    QueueError::invalid_job(
                        message.id,
                        format!("cannot decode '{}': {}", payload.type_tag, e),
                    )
                })
            }
        }
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.decoders.contains_key(type_tag) || self.callables.contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.decoders.len() + self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CallableJob {
    args: Value,
    entry: CallableEntry,
}

#[async_trait]
impl Job for CallableJob {
    async fn handle(&self, _ctx: &JobContext) -> std::result::Result<(), JobError> {
        (self.entry.function)(self.args.clone()).await
    }

    fn ttr(&self) -> Option<Duration> {
        self.entry.ttr
    }

    fn capability(&self) -> JobCapability {
        self.entry.capability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JobPayload;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Thumbnail {
        path: String,
    }

    #[async_trait]
    impl Job for Thumbnail {
        async fn handle(&self, _ctx: &JobContext) -> std::result::Result<(), JobError> {
            Ok(())
        }

        fn capability(&self) -> JobCapability {
            JobCapability::CoroutineSafe
        }
    }

    impl NamedJob for Thumbnail {
        const NAME: &'static str = "thumbnail";
    }

    fn message(payload: JobPayload) -> JobMessage {
        JobMessage {
            id: 1,
            attempts: 1,
            payload,
        }
    }

    #[test]
    fn test_resolve_typed_and_compressed_jobs() {
        let mut registry = JobRegistry::new();
        registry.register::<Thumbnail>();

        let job = Thumbnail {
            path: "a.png".repeat(500),
        };
        for payload in [
            JobPayload::object(&job).unwrap(),
            JobPayload::compressed(&job, 64).unwrap(),
        ] {
            let resolved = registry.resolve(&message(payload)).unwrap();
            assert_eq!(resolved.capability(), JobCapability::CoroutineSafe);
        }
    }

    #[test]
    fn test_resolve_callable_keeps_registration_options() {
        let mut registry = JobRegistry::new();
        registry.register_callable_with_ttr(
            "ping",
            JobCapability::AsyncProcess,
            Some(Duration::from_secs(5)),
            |_args| async { Ok(()) },
        );

        let payload = JobPayload::callable("ping", &serde_json::json!([])).unwrap();
        let resolved = registry.resolve(&message(payload)).unwrap();
        assert_eq!(resolved.capability(), JobCapability::AsyncProcess);
        assert_eq!(resolved.ttr(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unregistered_tag_is_invalid_job() {
        let registry = JobRegistry::new();
        let payload = JobPayload::callable("missing", &serde_json::json!(null)).unwrap();

        assert!(matches!(
            registry.resolve(&message(payload)),
            Err(QueueError::InvalidJob { id: 1, .. })
        ));
        assert!(registry.is_empty());
    }
}
