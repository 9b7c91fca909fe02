//! # Crew Registry
//!
//! Explicit name → factory map built at startup. Workflows refer to crews by
//! name; the engine checks every referenced name against this registry when
//! it is constructed, so a missing mapping is a startup error rather than a
//! runtime surprise.

use crate::crews::Crew;
use crate::logging::log_error;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub type CrewFactory = Arc<dyn Fn() -> Arc<dyn Crew> + Send + Sync>;

#[derive(Default)]
pub struct CrewRegistry {
    factories: RwLock<BTreeMap<String, CrewFactory>>,
}

impl CrewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory invoked once per dispatch
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> &Self
    where
        F: Fn() -> Arc<dyn Crew> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .factories
            .write()
            .insert(name.clone(), Arc::new(factory))
            .is_some()
        {
            debug!(crew = %name, "Replaced existing crew registration");
        }
        info!(crew = %name, "📚 Crew registered");
        self
    }

    /// Register a shared instance handed out on every dispatch
    pub fn register_instance(&self, name: impl Into<String>, crew: Arc<dyn Crew>) -> &Self {
        self.register(name, move || Arc::clone(&crew))
    }

    /// Builder-style registration for static setup lists
    pub fn with_crew(self, name: impl Into<String>, crew: Arc<dyn Crew>) -> Self {
        self.register_instance(name, crew);
        self
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }

    /// Instantiate the crew registered as `name`
    pub fn create(&self, name: &str) -> Option<Arc<dyn Crew>> {
        let factory = self.factories.read().get(name).cloned();
        match factory {
            Some(factory) => Some(factory()),
            None => {
                log_error("crew_registry", "create", "crew not registered", Some(name));
                None
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl fmt::Debug for CrewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrewRegistry")
            .field("crews", &self.names())
            .finish()
    }
}
