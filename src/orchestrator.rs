//! Task orchestrator - drives a task through its phases.
//!
//! One run per task at a time, guarded by a [`RunGuard`]. Phases run in
//! strict sequence:
//! - Clarifying: may pause the task awaiting user input
//! - Extracting: resolves factor definitions, then discovers items
//! - Processing: refines every (item, attribute) value concurrently
//! - Enriching: fetches and merges one source per item concurrently
//! - Formatting: renders the report
//!
//! Each phase commits its results and the next state in a single store
//! update, so a status read never sees a half-applied phase. Per-unit
//! failures inside the fan-out phases degrade to the pre-call value.

use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;

use crate::agents::{Agents, FactorSpec};
use crate::factors::{normalize_factors, FactorDefinition, FactorValue};
use crate::task::{
    Attribute, Item, RunGuard, SharedTaskStore, Task, TaskError, TaskId, TaskState,
    TaskStatusResponse, TransitionError,
};

/// Error message stored when discovery finds nothing.
pub const DISCOVERY_FAILED: &str = "Phase 1 (Discovery) failed.";

/// A failure that aborts the run and moves the task to `Error`.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase 1 (Discovery) failed.")]
    DiscoveryEmpty,

    #[error("{message}")]
    Collaborator { phase: TaskState, message: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Task {0} disappeared from the store")]
    TaskVanished(TaskId),
}

impl PhaseError {
    fn collaborator(phase: TaskState, err: anyhow::Error) -> Self {
        PhaseError::Collaborator {
            phase,
            message: format!("{:#}", err),
        }
    }
}

/// Result of one unit of fan-out work.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome<T> {
    Refined(T),
    /// The unit kept its pre-call value.
    Fallback { value: T, reason: String },
}

impl<T> UnitOutcome<T> {
    pub fn into_value(self) -> T {
        match self {
            UnitOutcome::Refined(value) | UnitOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, UnitOutcome::Fallback { .. })
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    AwaitingClarification,
    Failed(String),
}

#[derive(Clone)]
pub struct Orchestrator {
    store: SharedTaskStore,
    agents: Arc<Agents>,
}

impl Orchestrator {
    pub fn new(store: SharedTaskStore, agents: Arc<Agents>) -> Self {
        Self { store, agents }
    }

    pub fn store(&self) -> &SharedTaskStore {
        &self.store
    }

    /// Create a task and launch its run in the background.
    pub async fn start(
        &self,
        initial_query: impl Into<String>,
        comparison_factors: Vec<String>,
    ) -> Result<TaskId, TaskError> {
        let id = self
            .store
            .insert(Task::new(initial_query, comparison_factors))
            .await;
        let guard = self.store.claim_run(id).await?;
        tracing::info!("Created task {}", id);
        self.spawn(guard);
        Ok(id)
    }

    /// Feed a clarification to a paused task and relaunch it from `Clarifying`.
    pub async fn resume(&self, id: TaskId, clarification: impl Into<String>) -> Result<(), TaskError> {
        let guard = self.store.begin_resume(id, clarification).await?;
        tracing::info!("Resuming task {} with clarification", id);
        self.spawn(guard);
        Ok(())
    }

    pub async fn get_status(&self, id: TaskId) -> Result<TaskStatusResponse, TaskError> {
        self.store.status(id).await
    }

    fn spawn(&self, guard: RunGuard) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run(guard).await;
        });
    }

    /// Drive a task until it completes, fails or pauses.
    pub async fn run(&self, guard: RunGuard) -> RunOutcome {
        let id = guard.task_id();
        match self.drive(guard).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                tracing::error!("Task {} failed: {}", id, message);
                match self.store.update(id, |task| task.fail(message.clone())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Could not record failure for task {}: {}", id, e),
                    Err(e) => tracing::warn!("Could not record failure: {}", e),
                }
                RunOutcome::Failed(message)
            }
        }
    }

    async fn drive(&self, guard: RunGuard) -> Result<RunOutcome, PhaseError> {
        let id = guard.task_id();
        let Some(_guard) = self.clarify(guard).await? else {
            return Ok(RunOutcome::AwaitingClarification);
        };
        self.extract(id).await?;
        self.process(id).await?;
        self.enrich(id).await?;
        self.format(id).await?;
        tracing::info!("Task {} completed", id);
        Ok(RunOutcome::Completed)
    }

    async fn snapshot(&self, id: TaskId) -> Result<Task, PhaseError> {
        self.store.get(id).await.ok_or(PhaseError::TaskVanished(id))
    }

    async fn commit<F, R>(&self, id: TaskId, f: F) -> Result<R, PhaseError>
    where
        F: FnOnce(&mut Task) -> Result<R, TransitionError>,
    {
        self.store
            .update(id, f)
            .await
            .map_err(|_| PhaseError::TaskVanished(id))?
            .map_err(PhaseError::from)
    }

    /// Returns the guard back when the run should continue, or `None` once the
    /// task is parked awaiting clarification.
    async fn clarify(&self, guard: RunGuard) -> Result<Option<RunGuard>, PhaseError> {
        let id = guard.task_id();
        let query = self
            .commit(id, |task| {
                if task.state() != TaskState::Clarifying {
                    task.transition(TaskState::Clarifying)?;
                }
                Ok(task.working_query().to_string())
            })
            .await?;
        tracing::info!("Task {} clarifying '{}'", id, query);

        let clarification = self
            .agents
            .clarifier
            .clarify(&query)
            .await
            .map_err(|e| PhaseError::collaborator(TaskState::Clarifying, e))?;

        if clarification.needs_clarification {
            let question = clarification.question().to_string();
            tracing::info!("Task {} needs clarification: {}", id, question);
            // The guard is released under the store lock so a resume that
            // observes the paused state can always claim the run.
            self.commit(id, move |task| {
                task.transition(TaskState::AwaitingClarification)?;
                task.clarified_query = question;
                drop(guard);
                Ok(())
            })
            .await?;
            return Ok(None);
        }

        let factors = self
            .commit(id, move |task| {
                task.transition(TaskState::Extracting)?;
                if !clarification.clarified_query.trim().is_empty() {
                    task.clarified_query = clarification.clarified_query;
                } else if task.clarified_query.is_empty() {
                    task.clarified_query = task.initial_query.clone();
                }
                let factors = if task.comparison_factors.is_empty() {
                    clarification.comparison_factors
                } else {
                    std::mem::take(&mut task.comparison_factors)
                };
                task.comparison_factors = normalize_factors(factors);
                Ok(task.comparison_factors.clone())
            })
            .await?;
        tracing::info!("Task {} extracting with factors {:?}", id, factors);
        Ok(Some(guard))
    }

    async fn extract(&self, id: TaskId) -> Result<(), PhaseError> {
        let task = self.snapshot(id).await?;

        let specs = join_all(task.comparison_factors.iter().map(|name| async move {
            match self.agents.resolver.resolve(name).await {
                Ok(definition) => FactorSpec::new(name.clone(), definition),
                Err(e) => {
                    tracing::warn!("Factor definition for '{}' failed, using plain text: {:#}", name, e);
                    FactorSpec::new(name.clone(), FactorDefinition::plain())
                }
            }
        }))
        .await;

        let items = self
            .agents
            .discovery
            .discover(&task.clarified_query, &specs)
            .await
            .map_err(|e| PhaseError::collaborator(TaskState::Extracting, e))?;
        if items.is_empty() {
            return Err(PhaseError::DiscoveryEmpty);
        }

        let count = items.len();
        self.commit(id, move |task| {
            task.transition(TaskState::Processing)?;
            task.items = items;
            Ok(())
        })
        .await?;
        tracing::info!("Task {} discovered {} items", id, count);
        Ok(())
    }

    async fn process(&self, id: TaskId) -> Result<(), PhaseError> {
        let mut items = self.snapshot(id).await?.items;

        let outcomes = join_all(
            items
                .iter()
                .flat_map(|item| item.attributes.iter())
                .map(|attribute| self.refine_unit(attribute)),
        )
        .await;

        let fallbacks = outcomes.iter().filter(|o| o.is_fallback()).count();
        let mut outcomes = outcomes.into_iter();
        for attribute in items.iter_mut().flat_map(|item| item.attributes.iter_mut()) {
            if let Some(outcome) = outcomes.next() {
                attribute.value = outcome.into_value();
            }
            attribute.definition = None;
        }

        self.commit(id, move |task| {
            task.transition(TaskState::Enriching)?;
            task.items = items;
            Ok(())
        })
        .await?;
        tracing::info!("Task {} processed values ({} kept raw)", id, fallbacks);
        Ok(())
    }

    async fn refine_unit(&self, attribute: &Attribute) -> UnitOutcome<FactorValue> {
        let Some(definition) = &attribute.definition else {
            return UnitOutcome::Refined(attribute.value.clone());
        };
        match self.agents.refiner.refine(definition, &attribute.value).await {
            Ok(value) => UnitOutcome::Refined(value),
            Err(e) => {
                tracing::warn!("Refining '{}' failed, keeping raw value: {:#}", attribute.name, e);
                UnitOutcome::Fallback {
                    value: attribute.value.clone(),
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    async fn enrich(&self, id: TaskId) -> Result<(), PhaseError> {
        let items = self.snapshot(id).await?.items;

        let outcomes = join_all(items.iter().map(|item| self.enrich_unit(item))).await;
        let enriched_count = outcomes.iter().filter(|o| !o.is_fallback()).count();
        let items: Vec<Item> = outcomes.into_iter().map(UnitOutcome::into_value).collect();

        self.commit(id, move |task| {
            task.transition(TaskState::Formatting)?;
            task.items = items;
            Ok(())
        })
        .await?;
        tracing::info!("Task {} enriched {} items", id, enriched_count);
        Ok(())
    }

    async fn enrich_unit(&self, item: &Item) -> UnitOutcome<Item> {
        let fallback = |reason: String| UnitOutcome::Fallback {
            value: item.clone(),
            reason,
        };

        let Some(name) = item.display_name() else {
            return fallback("item has no name".to_string());
        };

        let queries = match self
            .agents
            .queries
            .generate(item, self.agents.max_followup_queries)
            .await
        {
            Ok(queries) => queries,
            Err(e) => {
                tracing::warn!("Follow-up queries for {} failed: {:#}", name, e);
                Vec::new()
            }
        };
        let Some(query) = queries.first() else {
            return fallback("no follow-up queries".to_string());
        };

        let source = match self.agents.fetcher.fetch_top_source(query).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                tracing::debug!("No source found for {} ('{}')", name, query);
                return fallback("no source content".to_string());
            }
            Err(e) => {
                tracing::warn!("Fetching source for {} failed: {:#}", name, e);
                return fallback(format!("{:#}", e));
            }
        };

        match self.agents.merger.merge(item, &source).await {
            Ok(merged) => UnitOutcome::Refined(merged),
            Err(e) => {
                tracing::warn!("Merging source into {} failed: {:#}", name, e);
                fallback(format!("{:#}", e))
            }
        }
    }

    async fn format(&self, id: TaskId) -> Result<(), PhaseError> {
        let task = self.snapshot(id).await?;
        let output = self
            .agents
            .formatter
            .render(&task.items, &task.comparison_factors)
            .map_err(|e| PhaseError::collaborator(TaskState::Formatting, e))?;
        self.commit(id, move |task| task.complete(output)).await
    }
}
