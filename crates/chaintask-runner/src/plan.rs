//! Wiring: events, their task flows and their crosscheck engines.
//!
//! [`PlanBuilder`] keeps event and task entries in two arenas; each task
//! records the [`EventId`] of the event it hangs off. [`PlanBuilder::assemble`]
//! turns that tree into an immutable [`ExecutionPlan`] in one step, so no
//! runtime object ever points back at a builder.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::Store;
use chaintask_crosscheck::{ChainProvider, CrosscheckConfig, CrosscheckEngine, LogCache};

use crate::flow::TaskFlow;
use crate::runner::TaskRunner;
use crate::signal::{EventFilterFn, EventVerse, LogDecoder};

/// Root of the cache prefix given to crosscheck configs that leave it empty.
pub const CACHE_PREFIX_ROOT: &str = "CrossCheck:";

/// Handle to an event in a [`PlanBuilder`] / [`ExecutionPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

/// Handle to a task flow in a [`PlanBuilder`] / [`ExecutionPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

struct EventSpec {
    name: String,
    filter: Option<EventFilterFn>,
    decoder: Option<Arc<dyn LogDecoder>>,
    crosscheck: Option<CrosscheckConfig>,
}

struct TaskSpec {
    parent: EventId,
    flow: TaskFlow,
}

#[derive(Default)]
pub struct PlanBuilder {
    events: Vec<EventSpec>,
    tasks: Vec<TaskSpec>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&mut self, name: impl Into<String>) -> EventId {
        self.events.push(EventSpec {
            name: name.into(),
            filter: None,
            decoder: None,
            crosscheck: None,
        });
        EventId(self.events.len() - 1)
    }

    pub fn filter(&mut self, event: EventId, filter: EventFilterFn) -> &mut Self {
        self.events[event.0].filter = Some(filter);
        self
    }

    pub fn decoder(&mut self, event: EventId, decoder: Arc<dyn LogDecoder>) -> &mut Self {
        self.events[event.0].decoder = Some(decoder);
        self
    }

    /// Enable crosscheck for `event`. Requires a provider at assembly.
    ///
    /// The cache shares the store with the task queues, so an empty
    /// `store_key_prefix` is replaced with `CrossCheck:<event>:`.
    pub fn crosscheck(&mut self, event: EventId, mut config: CrosscheckConfig) -> &mut Self {
        let entry = &mut self.events[event.0];
        if config.store_key_prefix.is_empty() {
            config.store_key_prefix = format!("{CACHE_PREFIX_ROOT}{}:", entry.name);
        }
        entry.crosscheck = Some(config);
        self
    }

    pub fn task(&mut self, parent: EventId, flow: TaskFlow) -> TaskId {
        self.tasks.push(TaskSpec { parent, flow });
        TaskId(self.tasks.len() - 1)
    }

    pub fn parent_of(&self, task: TaskId) -> EventId {
        self.tasks[task.0].parent
    }

    /// Every static key prefix in the plan, with the owner it belongs to.
    fn static_prefixes(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        for entry in &self.tasks {
            let flow = &entry.flow;
            if let Some(prefix) = flow.prefix.as_static() {
                out.push((format!("task flow '{}'", flow.name), prefix));
            }
            if let Some(prefix) = flow.done_prefix.as_static() {
                out.push((format!("done records of '{}'", flow.name), prefix));
            }
        }
        for entry in &self.events {
            if let Some(config) = &entry.crosscheck {
                out.push((
                    format!("crosscheck cache of '{}'", entry.name),
                    config.store_key_prefix.as_str(),
                ));
            }
        }
        out
    }

    /// Key sets are listed with `prefix*`, so a prefix that starts with
    /// another one would be drained or decoded by the wrong owner.
    fn check_prefixes(&self) -> Result<(), ChainTaskError> {
        let prefixes = self.static_prefixes();
        for (i, (owner, prefix)) in prefixes.iter().enumerate() {
            for (other_owner, other) in &prefixes[i + 1..] {
                if prefix.starts_with(other) || other.starts_with(prefix) {
                    return Err(ChainTaskError::Config(format!(
                        "key prefix '{prefix}' of {owner} overlaps '{other}' of {other_owner}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the runtime objects. Fails on invalid crosscheck windows,
    /// overlapping key prefixes, or crosscheck without a provider.
    pub fn assemble(
        self,
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn ChainProvider>>,
    ) -> Result<ExecutionPlan, ChainTaskError> {
        self.check_prefixes()?;
        let cancel = CancellationToken::new();

        let runners: Vec<Arc<TaskRunner>> = self
            .tasks
            .iter()
            .map(|entry| {
                Arc::new(
                    TaskRunner::new(entry.flow.clone(), store.clone())
                        .with_cancellation(cancel.child_token()),
                )
            })
            .collect();

        let mut events = Vec::with_capacity(self.events.len());
        let mut engines = Vec::new();
        for (index, entry) in self.events.into_iter().enumerate() {
            let id = EventId(index);
            let mut verse = EventVerse::new(entry.name);
            if let Some(filter) = entry.filter {
                verse = verse.with_filter(filter);
            }
            if let Some(decoder) = entry.decoder {
                verse = verse.with_decoder(decoder);
            }
            for (task, runner) in self.tasks.iter().zip(&runners) {
                if task.parent == id {
                    verse = verse.with_runner(runner.clone());
                }
            }

            let Some(config) = entry.crosscheck else {
                events.push(Arc::new(verse));
                continue;
            };
            let provider = provider.clone().ok_or_else(|| {
                ChainTaskError::Config(format!(
                    "event '{}' enables crosscheck but no provider was given",
                    verse.name()
                ))
            })?;
            let cache = LogCache::from_config(store.clone(), &config);
            let verse = Arc::new(verse.with_cache(cache.clone()));
            let engine = CrosscheckEngine::new(provider, cache, config, verse.clone())?
                .with_cancellation(cancel.child_token());
            engines.push((id, Arc::new(engine)));
            events.push(verse);
        }

        Ok(ExecutionPlan {
            events,
            runners,
            engines,
            cancel,
            handles: Mutex::new(Vec::new()),
        })
    }
}

/// Immutable runtime graph produced by [`PlanBuilder::assemble`].
pub struct ExecutionPlan {
    events: Vec<Arc<EventVerse>>,
    runners: Vec<Arc<TaskRunner>>,
    engines: Vec<(EventId, Arc<CrosscheckEngine>)>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPlan {
    pub fn event(&self, id: EventId) -> &Arc<EventVerse> {
        &self.events[id.0]
    }

    pub fn runner(&self, id: TaskId) -> &Arc<TaskRunner> {
        &self.runners[id.0]
    }

    pub fn engine(&self, id: EventId) -> Option<&Arc<CrosscheckEngine>> {
        self.engines
            .iter()
            .find(|(event, _)| *event == id)
            .map(|(_, engine)| engine)
    }

    /// Spawn every runner's preload drain and every crosscheck loop.
    pub fn play(&self) {
        let mut handles = self.handles.lock().unwrap();
        for runner in &self.runners {
            let runner = runner.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = runner.start().await {
                    error!(flow = %runner.flow().name, error = %e, "Task preload failed");
                }
            }));
        }
        for (_, engine) in &self.engines {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = engine.start().await {
                    error!(error = %e, "Crosscheck exited");
                }
            }));
        }
        info!(
            events = self.events.len(),
            runners = self.runners.len(),
            engines = self.engines.len(),
            "Plan started"
        );
    }

    /// Cancel everything and wait for spawned loops to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for (_, engine) in &self.engines {
            engine.stop();
        }
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Plan stopped");
    }
}
