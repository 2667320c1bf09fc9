//! Agent composition root.
//!
//! Builds handlers, then collectors, and owns the start/stop lifecycle. While
//! stopped the agent holds the [`Registry`] and allows changes to it; while
//! running the registry belongs to the [`Scheduler`] and is read-only.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::collector::Collector;
use crate::config::AppConfig;
use crate::handler::Handler;
use crate::registry::{PluginRegistry, Registry, RegistryError};
use crate::scheduler::{Scheduler, SchedulerState, StopReport};
use crate::stats::AgentStats;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The registry can only change while the agent is stopped.
    #[error("agent is running; stop it before changing collectors or handlers")]
    Running,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// `start()` was called outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

enum Lifecycle {
    Stopped(Registry),
    Running(Scheduler),
}

/// Process-wide owner of collectors, handlers and the scheduler.
pub struct Agent {
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.lifecycle {
            Lifecycle::Stopped(registry) => f
                .debug_struct("Agent")
                .field("running", &false)
                .field("registry", registry)
                .finish(),
            Lifecycle::Running(scheduler) => f
                .debug_struct("Agent")
                .field("running", &true)
                .field("scheduler", scheduler)
                .finish(),
        }
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent {
    /// An empty, stopped agent.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Stopped(Registry::default()),
        }
    }

    /// Build an agent from configuration.
    ///
    /// Handlers are built first, then collectors. A plugin whose settings are
    /// invalid, whose kind is unknown, or whose name is taken is logged and
    /// left out; the rest still load. Disabled plugins are skipped.
    pub fn from_config(config: &AppConfig, plugins: &PluginRegistry) -> Self {
        let mut registry = Registry::default();

        for settings in &config.handlers {
            if !settings.enabled {
                tracing::info!(handler = %settings.name, "Handler disabled, skipping");
                continue;
            }
            let built = settings
                .validate()
                .and_then(|()| plugins.build_handler(settings));
            match built {
                Ok(handler) => {
                    if let Err(e) =
                        registry.add_handler(&settings.name, settings.queue_capacity, handler)
                    {
                        tracing::error!(handler = %settings.name, error = %e, "Handler excluded");
                    } else {
                        tracing::info!(handler = %settings.name, kind = %settings.kind, "Handler registered");
                    }
                }
                Err(e) => {
                    tracing::error!(handler = %settings.name, error = %e, "Handler excluded");
                }
            }
        }

        let hostname = config.agent.resolved_hostname();
        for entry in &config.collectors {
            let settings = match entry.resolve(
                &config.collector_defaults,
                &config.collector_overrides,
                &config.agent.path_prefix,
                &hostname,
            ) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(collector = %entry.name, error = %e, "Collector excluded");
                    continue;
                }
            };
            if !settings.enabled {
                tracing::info!(collector = %entry.name, "Collector disabled, skipping");
                continue;
            }
            let result = plugins
                .build_collector(settings)
                .map_err(|e| e.to_string())
                .and_then(|c| registry.add_collector(c).map_err(|e| e.to_string()));
            match result {
                Ok(()) => {
                    tracing::info!(collector = %entry.name, kind = %entry.kind, "Collector registered");
                }
                Err(e) => {
                    tracing::error!(collector = %entry.name, error = %e, "Collector excluded");
                }
            }
        }

        Self {
            lifecycle: Lifecycle::Stopped(registry),
        }
    }

    fn registry_mut(&mut self) -> Result<&mut Registry, AgentError> {
        match &mut self.lifecycle {
            Lifecycle::Stopped(registry) => Ok(registry),
            Lifecycle::Running(_) => Err(AgentError::Running),
        }
    }

    /// Register a collector. Only allowed while stopped.
    pub fn add_collector(&mut self, collector: Arc<dyn Collector>) -> Result<(), AgentError> {
        Ok(self.registry_mut()?.add_collector(collector)?)
    }

    /// Register a handler with its queue capacity (`0` selects the default).
    /// Only allowed while stopped.
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
        handler: Box<dyn Handler>,
    ) -> Result<(), AgentError> {
        Ok(self.registry_mut()?.add_handler(name, capacity, handler)?)
    }

    pub fn remove_collector(&mut self, name: &str) -> Result<Arc<dyn Collector>, AgentError> {
        Ok(self.registry_mut()?.remove_collector(name)?)
    }

    /// Remove a handler, returning it unless it was abandoned by a stop.
    pub fn remove_handler(&mut self, name: &str) -> Result<Option<Box<dyn Handler>>, AgentError> {
        Ok(self.registry_mut()?.remove_handler(name)?)
    }

    /// Start the handler workers and collector timers.
    ///
    /// A no-op if already running.
    ///
    /// # Errors
    /// `AgentError::NoRuntime` when called outside a tokio runtime.
    pub fn start(&mut self) -> Result<(), AgentError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AgentError::NoRuntime);
        }

        let registry = match &mut self.lifecycle {
            Lifecycle::Running(_) => {
                tracing::debug!("Agent already running");
                return Ok(());
            }
            Lifecycle::Stopped(registry) => std::mem::take(registry),
        };

        let mut scheduler = Scheduler::new(registry);
        scheduler.start();
        self.lifecycle = Lifecycle::Running(scheduler);
        tracing::info!("Agent started");
        Ok(())
    }

    /// Stop collectors and drain handlers, returning within `grace` (plus
    /// scheduling slack). A no-op if already stopped.
    ///
    /// The scheduler stays in place until the stop completes. If this future
    /// is dropped part way, the agent still reports itself as running in the
    /// [`SchedulerState::Stopping`] state and a further `stop` finishes the
    /// shutdown; handlers whose drain was interrupted are lost.
    pub async fn stop(&mut self, grace: Duration) -> StopReport {
        let Lifecycle::Running(scheduler) = &mut self.lifecycle else {
            return StopReport::default();
        };
        let report = scheduler.stop(grace).await;

        let lifecycle = std::mem::replace(
            &mut self.lifecycle,
            Lifecycle::Stopped(Registry::default()),
        );
        if let Lifecycle::Running(scheduler) = lifecycle {
            self.lifecycle = Lifecycle::Stopped(scheduler.into_registry());
        }

        if report.is_clean() {
            tracing::info!("Agent stopped");
        } else {
            tracing::warn!(
                abandoned = ?report.abandoned,
                aborted_collectors = ?report.aborted_collectors,
                "Agent stopped with work abandoned at the grace deadline"
            );
        }
        report
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Running(_))
    }

    pub fn state(&self) -> SchedulerState {
        match &self.lifecycle {
            Lifecycle::Running(scheduler) => scheduler.state(),
            Lifecycle::Stopped(_) => SchedulerState::Stopped,
        }
    }

    /// Counter snapshot for every registered collector and handler.
    pub fn stats(&self) -> AgentStats {
        match &self.lifecycle {
            Lifecycle::Stopped(registry) => registry.stats(),
            Lifecycle::Running(scheduler) => scheduler.stats(),
        }
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.stats().collectors.into_keys().collect()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.stats().handlers.into_keys().collect()
    }
}
