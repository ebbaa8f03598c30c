//! Builder to assemble an [`AdaptiveResourceManager`] from configuration,
//! event sinks and a runtime.

use crate::config::ManagerConfig;
use crate::core::{AdaptiveResourceManager, EventBus, EventSink, SchedulerError};
use crate::runtime::TokioSpawner;

/// Step-by-step construction of a manager.
///
/// ```rust,ignore
/// let sink = InMemoryEventSink::new(256);
/// let manager: AdaptiveResourceManager<String> = ManagerBuilder::new()
///     .config(ManagerConfig::from_env()?)
///     .event_sink(sink.clone())
///     .build()?;
/// ```
#[derive(Default)]
pub struct ManagerBuilder {
    config: ManagerConfig,
    sinks: Vec<Box<dyn EventSink>>,
    spawner: Option<TokioSpawner>,
}

impl std::fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("sinks", &self.sinks.len())
            .field("spawner", &self.spawner)
            .finish()
    }
}

impl ManagerBuilder {
    /// Builder with the default configuration and no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an event sink. May be called more than once.
    #[must_use]
    pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Run loops and task bodies on a specific runtime instead of the
    /// current one.
    #[must_use]
    pub fn spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// The configuration that `build` will use.
    #[must_use]
    pub const fn config_ref(&self) -> &ManagerConfig {
        &self.config
    }

    /// Validate the configuration and start the manager.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] for an invalid configuration
    /// and [`SchedulerError::Runtime`] when no spawner was given and the
    /// caller is outside a tokio runtime.
    pub fn build<R: Send + 'static>(self) -> Result<AdaptiveResourceManager<R>, SchedulerError> {
        self.config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => TokioSpawner::current()?,
        };
        let mut events = EventBus::new(self.config.event_capacity);
        for sink in self.sinks {
            events.add_sink(sink);
        }
        AdaptiveResourceManager::from_parts(self.config, events, spawner)
    }
}
