//! Registry of monitored endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::probe::ProbeDefinition;

/// The set of probe definitions, in registration order.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    probes: Vec<Arc<ProbeDefinition>>,
    index: HashMap<String, usize>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Names must be unique.
    pub fn register(&mut self, definition: ProbeDefinition) -> Result<(), ConfigError> {
        if self.index.contains_key(definition.name()) {
            return Err(ConfigError::DuplicateName(definition.name().to_string()));
        }

        self.index
            .insert(definition.name().to_string(), self.probes.len());
        self.probes.push(Arc::new(definition));
        Ok(())
    }

    pub fn list(&self) -> &[Arc<ProbeDefinition>] {
        &self.probes
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProbeDefinition>> {
        self.index.get(name).map(|&i| &self.probes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}
