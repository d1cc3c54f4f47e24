//! Worker Pool
//!
//! Spawns one worker per task against a resolved template and bounds how many
//! workers are active at once. The active count is an atomic shared by every
//! clone of the pool and by every outstanding [`WorkerHandle`]; a spawn that
//! would push it past `max_parallel` is rejected, never queued.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::types::{TaskResult, WorkerId, WorkerStatus};
use crate::invoke::Invoker;
use crate::templates::{BehaviorTemplate, TemplateRegistry};
use crate::{Error, Result};

/// Default per-task timeout when neither the call nor the template sets one
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// One in-flight task execution
///
/// Holds one slot of the pool's capacity until released. Dropping an
/// unreleased handle releases it.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    template: Arc<BehaviorTemplate>,
    status: WorkerStatus,
    task: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    output: Option<String>,
    error: Option<String>,
    slot: Option<Arc<AtomicUsize>>,
}

impl WorkerHandle {
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn template(&self) -> &BehaviorTemplate {
        &self.template
    }

    pub fn template_id(&self) -> &str {
        &self.template.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.slot.is_none()
    }

    fn begin(&mut self, task: &str) {
        self.status = WorkerStatus::Running;
        self.task = Some(task.to_string());
        self.started_at = Some(Utc::now());
    }

    fn finish(&mut self, status: WorkerStatus, result: &TaskResult) {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.output = result.output.clone();
        self.error = result.error_message.clone();
    }

    /// Give the slot back; true only the first time
    fn release_slot(&mut self) -> bool {
        match self.slot.take() {
            Some(active) => {
                active.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.release_slot() {
            debug!(worker_id = %self.id, "Worker released on drop");
        }
    }
}

/// Pool of workers with a hard concurrency cap
#[derive(Clone)]
pub struct WorkerPool {
    registry: Arc<TemplateRegistry>,
    invoker: Arc<dyn Invoker>,
    max_parallel: usize,
    default_timeout_ms: u64,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        invoker: Arc<dyn Invoker>,
        max_parallel: usize,
    ) -> Self {
        Self {
            registry,
            invoker,
            max_parallel,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn invoker_name(&self) -> &str {
        self.invoker.name()
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn can_spawn(&self) -> bool {
        self.active_count() < self.max_parallel
    }

    /// Claim a slot and bind it to a resolved template
    pub fn spawn(&self, template_id: &str) -> Result<WorkerHandle> {
        let template = self.registry.resolve(template_id)?;

        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_parallel).then_some(n + 1)
            })
            .map_err(|n| Error::CapacityExceeded {
                requested: n + 1,
                max: self.max_parallel,
            })?;

        let handle = WorkerHandle {
            id: WorkerId::default(),
            template,
            status: WorkerStatus::Spawned,
            task: None,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            slot: Some(self.active.clone()),
        };

        debug!(
            worker_id = %handle.id,
            template_id = template_id,
            active = self.active_count(),
            "Worker spawned"
        );

        Ok(handle)
    }

    /// Run `task` on the worker. Always yields a [`TaskResult`]: backend
    /// errors, panics, and timeouts become `success = false`.
    pub async fn execute(
        &self,
        handle: &mut WorkerHandle,
        task: &str,
        input: Option<&str>,
        context: Option<&JsonValue>,
        timeout_ms: Option<u64>,
    ) -> TaskResult {
        let template = handle.template.clone();
        let timeout_ms = timeout_ms
            .or(template.timeout_ms)
            .unwrap_or(self.default_timeout_ms);

        handle.begin(task);
        let started = Instant::now();

        let invocation = AssertUnwindSafe(self.invoker.invoke(&template, task, input, context))
            .catch_unwind();
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, result) = match outcome {
            Ok(Ok(Ok(output))) => (
                WorkerStatus::Completed,
                TaskResult::success(&template.id, task, output, duration_ms),
            ),
            Ok(Ok(Err(e))) => {
                warn!(
                    worker_id = %handle.id,
                    template_id = %template.id,
                    error = %e,
                    "Task failed"
                );
                (
                    WorkerStatus::Failed,
                    TaskResult::failure(&template.id, task, e.to_string(), duration_ms),
                )
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(
                    worker_id = %handle.id,
                    template_id = %template.id,
                    "Task panicked: {}",
                    message
                );
                (
                    WorkerStatus::Failed,
                    TaskResult::failure(
                        &template.id,
                        task,
                        format!("Worker panicked: {}", message),
                        duration_ms,
                    ),
                )
            }
            Err(_) => {
                warn!(
                    worker_id = %handle.id,
                    template_id = %template.id,
                    timeout_ms,
                    "Task timed out"
                );
                (
                    WorkerStatus::TimedOut,
                    TaskResult::failure(
                        &template.id,
                        task,
                        format!("Task timed out after {}ms", timeout_ms),
                        duration_ms,
                    ),
                )
            }
        };

        handle.finish(status, &result);
        result.with_worker(handle.id.clone())
    }

    /// Return the handle's slot; a second release of the same handle is a no-op
    pub fn release(&self, handle: &mut WorkerHandle) -> bool {
        let released = handle.release_slot();
        if released {
            debug!(worker_id = %handle.id, active = self.active_count(), "Worker released");
        }
        released
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::OfflineInvoker;
    use async_trait::async_trait;

    /// Backend whose behavior is chosen by the task text
    struct ScriptedInvoker;

    #[async_trait]
    impl Invoker for ScriptedInvoker {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            _template: &BehaviorTemplate,
            task: &str,
            _input: Option<&str>,
            _context: Option<&JsonValue>,
        ) -> Result<String> {
            match task {
                "fail" => Err(Error::Invocation("backend exploded".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("too late".to_string())
                }
                "panic" => panic!("scripted panic"),
                other => Ok(format!("did {}", other)),
            }
        }
    }

    fn pool(max_parallel: usize) -> WorkerPool {
        WorkerPool::new(
            Arc::new(TemplateRegistry::builtin()),
            Arc::new(ScriptedInvoker),
            max_parallel,
        )
    }

    #[test]
    fn test_spawn_unknown_template() {
        let pool = pool(2);
        let err = pool.spawn("ghost").unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(_)));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_spawn_and_release() {
        let pool = pool(2);
        let mut handle = pool.spawn("coder").unwrap();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(handle.status(), WorkerStatus::Spawned);

        assert!(pool.release(&mut handle));
        assert_eq!(pool.active_count(), 0);

        // Double release is a no-op
        assert!(!pool.release(&mut handle));
        assert_eq!(pool.active_count(), 0);

        drop(handle);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_drop_releases_slot() {
        let pool = pool(1);
        {
            let _handle = pool.spawn("coder").unwrap();
            assert!(!pool.can_spawn());
        }
        assert!(pool.can_spawn());
    }

    #[test]
    fn test_capacity_exceeded() {
        let pool = pool(2);
        let _a = pool.spawn("coder").unwrap();
        let _b = pool.spawn("writer").unwrap();
        assert!(!pool.can_spawn());

        let err = pool.spawn("coder").unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { requested: 3, max: 2 }));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_concurrent_spawns_never_exceed_max() {
        let max = 4;
        let pool = pool(max);

        let results: Vec<_> = std::thread::scope(|scope| {
            let threads: Vec<_> = (0..=max)
                .map(|_| {
                    let pool = pool.clone();
                    scope.spawn(move || {
                        let handle = pool.spawn("coder");
                        assert!(pool.active_count() <= max);
                        handle
                    })
                })
                .collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Error::CapacityExceeded { .. })))
            .count();
        assert_eq!(ok, max);
        assert_eq!(rejected, 1);
        assert_eq!(pool.active_count(), max);

        drop(results);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let pool = pool(1);
        let mut handle = pool.spawn("coder").unwrap();

        let result = pool.execute(&mut handle, "build", None, None, None).await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("did build"));
        assert_eq!(result.template_id, "coder");
        assert_eq!(result.worker_id.as_ref(), Some(handle.id()));
        assert_eq!(handle.status(), WorkerStatus::Completed);
        assert_eq!(handle.task(), Some("build"));
        assert!(handle.started_at().is_some());
        assert!(handle.ended_at().is_some());
    }

    #[tokio::test]
    async fn test_execute_failure_is_data() {
        let pool = pool(1);
        let mut handle = pool.spawn("coder").unwrap();

        let result = pool.execute(&mut handle, "fail", None, None, None).await;
        assert!(!result.success);
        assert!(result.output.is_none());
        assert!(result.error_message.unwrap().contains("backend exploded"));
        assert_eq!(handle.status(), WorkerStatus::Failed);
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let pool = pool(1);
        let mut handle = pool.spawn("coder").unwrap();

        let result = pool.execute(&mut handle, "slow", None, None, Some(20)).await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Task timed out after 20ms")
        );
        assert_eq!(handle.status(), WorkerStatus::TimedOut);
        assert!(handle.error().is_some());
    }

    #[tokio::test]
    async fn test_execute_panic_is_contained() {
        let pool = pool(1);
        let mut handle = pool.spawn("coder").unwrap();

        let result = pool.execute(&mut handle, "panic", None, None, None).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("scripted panic"));
    }

    #[tokio::test]
    async fn test_template_timeout_applies() {
        let registry = TemplateRegistry::with_overrides(vec![
            BehaviorTemplate::new("hasty", "Short fuse", "Be quick.").with_timeout_ms(10),
        ]);
        let pool = WorkerPool::new(Arc::new(registry), Arc::new(ScriptedInvoker), 1);
        let mut handle = pool.spawn("hasty").unwrap();

        let result = pool.execute(&mut handle, "slow", None, None, None).await;
        assert_eq!(
            result.error_message.as_deref(),
            Some("Task timed out after 10ms")
        );
    }

    #[tokio::test]
    async fn test_offline_invoker_pool() {
        let pool = WorkerPool::new(
            Arc::new(TemplateRegistry::builtin()),
            Arc::new(OfflineInvoker::new()),
            1,
        );
        assert_eq!(pool.invoker_name(), "offline");

        let mut handle = pool.spawn("researcher").unwrap();
        let result = pool.execute(&mut handle, "look up", None, None, None).await;
        assert_eq!(result.output.as_deref(), Some("[researcher] look up"));
        pool.release(&mut handle);
        assert!(handle.is_released());
    }
}
