//! Plugin registries.
//!
//! Two pieces live here:
//!
//! - [`PluginRegistry`]: maps a configured `kind` string to a factory for
//!   each capability (collector, handler). Built-ins are registered by
//!   [`PluginRegistry::with_builtins`]; embedders add their own.
//! - [`Registry`]: the ordered set of active collectors and handlers. It is
//!   only mutated while the agent is stopped.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::collector::{Collector, JsonCollector, LoadAvgCollector, TcpCollector};
use crate::config::{CollectorSettings, ConfigError, DEFAULT_QUEUE_CAPACITY, HandlerSettings};
use crate::handler::{FileHandler, Handler, JsonPushHandler};
use crate::stats::{AgentStats, CollectorStats, HandlerStats};

/// Builds a collector from resolved settings.
pub type CollectorFactory =
    Box<dyn Fn(CollectorSettings) -> Result<Arc<dyn Collector>, ConfigError> + Send + Sync>;

/// Builds a handler from its settings.
pub type HandlerFactory =
    Box<dyn Fn(&HandlerSettings) -> Result<Box<dyn Handler>, ConfigError> + Send + Sync>;

// =============================================================================
// Factories
// =============================================================================

/// String identifier → factory, per capability.
#[derive(Default)]
pub struct PluginRegistry {
    collectors: HashMap<String, CollectorFactory>,
    handlers: HashMap<String, HandlerFactory>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut collectors: Vec<_> = self.collectors.keys().collect();
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        collectors.sort();
        handlers.sort();
        f.debug_struct("PluginRegistry")
            .field("collectors", &collectors)
            .field("handlers", &handlers)
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `tcp`, `json`, `loadavg`, `json_push` and `file`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_collector("tcp", |s| Ok(Arc::new(TcpCollector::new(s)?)));
        registry.register_collector("json", |s| Ok(Arc::new(JsonCollector::new(s)?)));
        registry.register_collector("loadavg", |s| Ok(Arc::new(LoadAvgCollector::new(s)?)));
        registry.register_handler("json_push", |s| {
            Ok(Box::new(JsonPushHandler::from_settings(s)?))
        });
        registry.register_handler("file", |s| Ok(Box::new(FileHandler::from_settings(s)?)));
        registry
    }

    /// Register (or replace) the factory for a collector kind.
    pub fn register_collector<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(CollectorSettings) -> Result<Arc<dyn Collector>, ConfigError> + Send + Sync + 'static,
    {
        self.collectors.insert(kind.into(), Box::new(factory));
    }

    /// Register (or replace) the factory for a handler kind.
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&HandlerSettings) -> Result<Box<dyn Handler>, ConfigError> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(factory));
    }

    /// # Errors
    /// `ConfigError::UnknownKind` if no factory is registered for
    /// `settings.kind`, otherwise whatever the factory reports.
    pub fn build_collector(
        &self,
        settings: CollectorSettings,
    ) -> Result<Arc<dyn Collector>, ConfigError> {
        let factory = self
            .collectors
            .get(&settings.kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                capability: "collector",
                kind: settings.kind.clone(),
            })?;
        factory(settings)
    }

    /// # Errors
    /// `ConfigError::UnknownKind` if no factory is registered for
    /// `settings.kind`, otherwise whatever the factory reports.
    pub fn build_handler(&self, settings: &HandlerSettings) -> Result<Box<dyn Handler>, ConfigError> {
        let factory = self
            .handlers
            .get(&settings.kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                capability: "handler",
                kind: settings.kind.clone(),
            })?;
        factory(settings)
    }
}

// =============================================================================
// Active set
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{capability} '{name}' is already registered")]
    Duplicate { capability: &'static str, name: String },

    #[error("{capability} '{name}' is not registered")]
    NotFound { capability: &'static str, name: String },
}

/// A collector with its counters.
#[derive(Clone)]
pub struct RegisteredCollector {
    pub collector: Arc<dyn Collector>,
    pub stats: Arc<CollectorStats>,
}

/// A handler waiting to be wrapped in a queue.
///
/// `handler` is `None` while its queue is running and after a drain deadline
/// abandoned it.
pub struct HandlerSlot {
    pub name: String,
    pub capacity: usize,
    pub handler: Option<Box<dyn Handler>>,
    pub stats: Arc<HandlerStats>,
}

/// Ordered set of active collectors and handlers.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<RegisteredCollector>,
    handlers: Vec<HandlerSlot>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.collector_names())
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl Registry {
    pub fn add_collector(&mut self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let name = collector.name();
        if self.collectors.iter().any(|c| c.collector.name() == name) {
            return Err(RegistryError::Duplicate {
                capability: "collector",
                name: name.to_string(),
            });
        }
        self.collectors.push(RegisteredCollector {
            collector,
            stats: Arc::default(),
        });
        Ok(())
    }

    /// Register a handler. A capacity of `0` selects the default.
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
        handler: Box<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.handlers.iter().any(|h| h.name == name) {
            return Err(RegistryError::Duplicate {
                capability: "handler",
                name,
            });
        }
        let capacity = if capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            capacity
        };
        self.handlers.push(HandlerSlot {
            name,
            capacity,
            handler: Some(handler),
            stats: Arc::default(),
        });
        Ok(())
    }

    pub fn remove_collector(&mut self, name: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let pos = self
            .collectors
            .iter()
            .position(|c| c.collector.name() == name)
            .ok_or_else(|| RegistryError::NotFound {
                capability: "collector",
                name: name.to_string(),
            })?;
        Ok(self.collectors.remove(pos).collector)
    }

    /// Remove a handler, returning it if it is still held.
    pub fn remove_handler(&mut self, name: &str) -> Result<Option<Box<dyn Handler>>, RegistryError> {
        let pos = self
            .handlers
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| RegistryError::NotFound {
                capability: "handler",
                name: name.to_string(),
            })?;
        Ok(self.handlers.remove(pos).handler)
    }

    pub fn collectors(&self) -> &[RegisteredCollector] {
        &self.collectors
    }

    pub fn handlers(&self) -> &[HandlerSlot] {
        &self.handlers
    }

    pub(crate) fn handlers_mut(&mut self) -> &mut [HandlerSlot] {
        &mut self.handlers
    }

    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.collector.name()).collect()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            collectors: self
                .collectors
                .iter()
                .map(|c| (c.collector.name().to_string(), c.stats.snapshot()))
                .collect(),
            handlers: self
                .handlers
                .iter()
                .map(|h| (h.name.clone(), h.stats.snapshot()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorError;
    use crate::handler::HandlerError;
    use crate::metric::Metric;

    struct Noop(CollectorSettings);

    #[async_trait::async_trait]
    impl Collector for Noop {
        fn settings(&self) -> &CollectorSettings {
            &self.0
        }

        async fn collect(&self) -> Result<Vec<Metric>, CollectorError> {
            Ok(Vec::new())
        }
    }

    struct Sink;

    impl Handler for Sink {
        fn process(&mut self, _metric: &Metric) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_builtins_resolve_by_kind() {
        let plugins = PluginRegistry::with_builtins();

        let settings = CollectorSettings::new("load", "loadavg");
        let collector = plugins.build_collector(settings).unwrap();
        assert_eq!(collector.name(), "load");

        let settings = HandlerSettings::new("archive", "file")
            .with_options(serde_json::json!({ "path": "/tmp/lumen-test.log" }));
        assert!(plugins.build_handler(&settings).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let plugins = PluginRegistry::with_builtins();
        let err = plugins
            .build_collector(CollectorSettings::new("x", "snmp"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::UnknownKind { capability: "collector", ref kind } if kind == "snmp"
        ));
        assert!(
            plugins
                .build_handler(&HandlerSettings::new("x", "graphite"))
                .is_err()
        );
    }

    #[test]
    fn test_custom_factory() {
        let mut plugins = PluginRegistry::new();
        plugins.register_collector("noop", |s| Ok(Arc::new(Noop(s))));
        plugins.register_handler("sink", |_| Ok(Box::new(Sink)));

        assert!(plugins.build_collector(CollectorSettings::new("a", "noop")).is_ok());
        assert!(plugins.build_handler(&HandlerSettings::new("b", "sink")).is_ok());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_keeps_order() {
        let mut registry = Registry::default();
        for name in ["c1", "c2"] {
            registry
                .add_collector(Arc::new(Noop(CollectorSettings::new(name, "noop"))))
                .unwrap();
        }
        let err = registry
            .add_collector(Arc::new(Noop(CollectorSettings::new("c1", "noop"))))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                capability: "collector",
                name: "c1".to_string()
            }
        );

        registry.add_handler("h2", 5, Box::new(Sink)).unwrap();
        registry.add_handler("h1", 0, Box::new(Sink)).unwrap();
        assert!(registry.add_handler("h1", 5, Box::new(Sink)).is_err());

        assert_eq!(registry.collector_names(), vec!["c1", "c2"]);
        assert_eq!(registry.handler_names(), vec!["h2", "h1"]);
        assert_eq!(registry.handlers()[1].capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_registry_remove() {
        let mut registry = Registry::default();
        registry
            .add_collector(Arc::new(Noop(CollectorSettings::new("c1", "noop"))))
            .unwrap();
        registry.add_handler("h1", 1, Box::new(Sink)).unwrap();

        assert!(registry.remove_collector("c1").is_ok());
        assert!(registry.remove_handler("h1").unwrap().is_some());
        assert!(matches!(
            registry.remove_collector("c1"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.stats().collectors.is_empty());
    }
}
