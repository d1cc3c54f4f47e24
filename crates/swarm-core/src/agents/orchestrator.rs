//! Orchestrator
//!
//! Public entry point for delegation. Each call records one [`Session`],
//! runs its workers on the [`WorkerPool`], and for parallel runs folds the
//! results through the [`ResultAggregator`].
//!
//! Configuration problems (unknown template, capacity, empty batch) are
//! rejected before a session exists. Task failures are data in the returned
//! results. Anything that breaks the run itself marks the session `failed`
//! and is returned as an error.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::aggregate::{AggregateMode, AggregateResult, ResultAggregator};
use super::pool::{WorkerHandle, WorkerPool};
use super::types::{TaskResult, TaskSpec};
use crate::config::Config;
use crate::invoke::build_invoker;
use crate::session::{Session, SessionBackend, SessionStore, SessionUpdate};
use crate::templates::{
    BehaviorTemplate, SYNTHESIZER_TEMPLATE_ID, TemplateRegistry, load_templates,
};
use crate::{Error, Result};

/// Outcome of [`Orchestrator::delegate_single`]
#[derive(Debug, Clone, Serialize)]
pub struct SingleDelegation {
    pub session_id: String,
    pub result: TaskResult,
}

/// Outcome of [`Orchestrator::delegate_parallel`]
#[derive(Debug, Clone, Serialize)]
pub struct ParallelDelegation {
    pub session_id: String,
    /// Index-aligned with the submitted tasks
    pub results: Vec<TaskResult>,
    /// Absent for a single-task batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateResult>,
}

pub struct Orchestrator {
    pool: WorkerPool,
    store: Arc<dyn SessionBackend>,
    aggregator: ResultAggregator,
    default_mode: AggregateMode,
}

impl Orchestrator {
    pub fn new(
        pool: WorkerPool,
        store: Arc<dyn SessionBackend>,
        aggregator: ResultAggregator,
    ) -> Self {
        Self {
            pool,
            store,
            aggregator,
            default_mode: AggregateMode::default(),
        }
    }

    pub fn with_default_mode(mut self, mode: AggregateMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Wire up registry, backends, store, pool and aggregator from `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let extra = match &config.templates.path {
            Some(path) => load_templates(Path::new(path)).await?,
            None => Vec::new(),
        };
        let registry = Arc::new(TemplateRegistry::with_overrides(extra));

        let invoker = build_invoker(config.invoker.kind, config)?;
        let synthesizer = build_invoker(config.invoker.synthesizer, config)?;

        let store = Arc::new(open_store(&config.store.db_path).await?);

        let pool = WorkerPool::new(
            registry.clone(),
            invoker,
            config.orchestrator.max_parallel,
        )
        .with_default_timeout_ms(config.orchestrator.default_timeout_ms);

        let synthesis_template = registry.resolve(SYNTHESIZER_TEMPLATE_ID)?;
        let synthesis_timeout = synthesis_template
            .timeout_ms
            .unwrap_or(config.orchestrator.default_timeout_ms);
        let aggregator = ResultAggregator::new(synthesizer, synthesis_template)
            .with_preview_len(config.orchestrator.preview_len)
            .with_synthesis_timeout(Duration::from_millis(synthesis_timeout));

        info!(
            invoker = pool.invoker_name(),
            synthesizer = aggregator.synthesizer_name(),
            max_parallel = pool.max_parallel(),
            templates = registry.len(),
            "Orchestrator ready"
        );

        Ok(Self::new(pool, store, aggregator).with_default_mode(config.orchestrator.default_mode))
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn store(&self) -> &dyn SessionBackend {
        self.store.as_ref()
    }

    pub fn default_mode(&self) -> AggregateMode {
        self.default_mode
    }

    /// Run one task in its own session
    pub async fn delegate_single(&self, spec: TaskSpec) -> Result<SingleDelegation> {
        check_confidence(&spec)?;
        let mut handle = self.pool.spawn(&spec.template_id)?;

        let session = self
            .store
            .create(format!("delegate {}", spec.template_id), vec![spec.clone()])?;
        info!(
            session_id = %session.id,
            template_id = %spec.template_id,
            "Single delegation started"
        );

        if let Err(e) = self.store.update(&session.id, SessionUpdate::running()) {
            return Err(self.fail_session(&session.id, e, None));
        }

        let result = run_task(&self.pool, &mut handle, &spec).await;
        self.pool.release(&mut handle);

        if let Err(e) = self.store.update(
            &session.id,
            SessionUpdate::completed(vec![result.clone()], None),
        ) {
            return Err(self.fail_session(&session.id, e, Some(vec![result])));
        }

        info!(
            session_id = %session.id,
            success = result.success,
            duration_ms = result.duration_ms,
            "Single delegation completed"
        );

        Ok(SingleDelegation {
            session_id: session.id,
            result,
        })
    }

    /// Run every task concurrently and aggregate the results
    ///
    /// `input` applies to each task that has none of its own; `mode` falls back
    /// to the configured default.
    pub async fn delegate_parallel(
        &self,
        tasks: Vec<TaskSpec>,
        input: Option<String>,
        mode: Option<AggregateMode>,
    ) -> Result<ParallelDelegation> {
        if tasks.is_empty() {
            return Err(Error::InvalidRequest(
                "parallel delegation needs at least one task".to_string(),
            ));
        }
        if tasks.len() > self.pool.max_parallel() {
            return Err(Error::CapacityExceeded {
                requested: tasks.len(),
                max: self.pool.max_parallel(),
            });
        }
        for spec in &tasks {
            self.pool.registry().resolve(&spec.template_id)?;
            check_confidence(spec)?;
        }

        let mode = mode.unwrap_or(self.default_mode);
        let tasks: Vec<TaskSpec> = tasks
            .into_iter()
            .map(|mut spec| {
                if spec.input.is_none() {
                    spec.input = input.clone();
                }
                spec
            })
            .collect();

        // Claim every slot up front; a partial claim is dropped, which frees it
        let mut handles = Vec::with_capacity(tasks.len());
        for spec in &tasks {
            if !self.pool.can_spawn() {
                return Err(Error::CapacityExceeded {
                    requested: self.pool.active_count() + tasks.len() - handles.len(),
                    max: self.pool.max_parallel(),
                });
            }
            handles.push(self.pool.spawn(&spec.template_id)?);
        }

        let session = self
            .store
            .create(format!("parallel x{} ({})", tasks.len(), mode), tasks.clone())?;
        info!(
            session_id = %session.id,
            tasks = tasks.len(),
            mode = %mode,
            "Parallel delegation started"
        );

        if let Err(e) = self.store.update(&session.id, SessionUpdate::running()) {
            return Err(self.fail_session(&session.id, e, None));
        }

        let results = self.run_all(&session, tasks, handles).await;

        let aggregate = if results.len() > 1 {
            match self.aggregator.combine(results.clone(), mode).await {
                Ok(aggregate) => Some(aggregate),
                Err(e) => return Err(self.fail_session(&session.id, e, Some(results))),
            }
        } else {
            None
        };

        if let Err(e) = self.store.update(
            &session.id,
            SessionUpdate::completed(results.clone(), aggregate.clone()),
        ) {
            return Err(self.fail_session(&session.id, e, Some(results)));
        }

        info!(
            session_id = %session.id,
            succeeded = results.iter().filter(|r| r.success).count(),
            failed = results.iter().filter(|r| !r.success).count(),
            "Parallel delegation completed"
        );

        Ok(ParallelDelegation {
            session_id: session.id,
            results,
            aggregate,
        })
    }

    /// Execute each task on its own handle and return results in task order
    async fn run_all(
        &self,
        session: &Session,
        tasks: Vec<TaskSpec>,
        handles: Vec<WorkerHandle>,
    ) -> Vec<TaskResult> {
        let mut slots: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut join_set = JoinSet::new();

        for (index, (spec, mut handle)) in tasks.iter().cloned().zip(handles).enumerate() {
            let pool = self.pool.clone();
            join_set.spawn(async move {
                let result = run_task(&pool, &mut handle, &spec).await;
                pool.release(&mut handle);
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    debug!(
                        session_id = %session.id,
                        index,
                        success = result.success,
                        "Task settled"
                    );
                    slots[index] = Some(result);
                }
                Err(e) => error!(session_id = %session.id, "Worker task aborted: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(tasks)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    TaskResult::failure(&spec.template_id, &spec.task, "Worker task aborted", 0)
                })
            })
            .collect()
    }

    /// Best-effort mark the session failed, then hand the error back
    fn fail_session(
        &self,
        session_id: &str,
        err: Error,
        results: Option<Vec<TaskResult>>,
    ) -> Error {
        error!(session_id = %session_id, error = %err, "Delegation failed");

        let mut update = SessionUpdate::failed(err.to_string());
        if let Some(results) = results {
            update = update.with_results(results);
        }
        if let Err(store_err) = self.store.update(session_id, update) {
            error!(
                session_id = %session_id,
                error = %store_err,
                "Could not record session failure"
            );
        }

        err
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.store.list()
    }

    pub fn templates(&self) -> Vec<Arc<BehaviorTemplate>> {
        self.pool.registry().all()
    }
}

async fn run_task(pool: &WorkerPool, handle: &mut WorkerHandle, spec: &TaskSpec) -> TaskResult {
    pool.execute(
        handle,
        &spec.task,
        spec.input.as_deref(),
        spec.context.as_ref(),
        spec.timeout_ms,
    )
    .await
    .with_confidence(spec.confidence)
}

/// Confidence, when given, must be a finite value in `[0.0, 1.0]`
fn check_confidence(spec: &TaskSpec) -> Result<()> {
    match spec.confidence {
        Some(c) if !(0.0..=1.0).contains(&c) => Err(Error::InvalidRequest(format!(
            "confidence for {} must be within 0.0..=1.0, got {}",
            spec.template_id, c
        ))),
        _ => Ok(()),
    }
}

async fn open_store(db_path: &str) -> Result<SessionStore> {
    if db_path == ":memory:" {
        return SessionStore::in_memory();
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    SessionStore::open(db_path)
}
