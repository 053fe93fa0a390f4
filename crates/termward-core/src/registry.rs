use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::TerminalBackend;
use crate::error::TerminalError;

/// Name-keyed set of terminal backends, populated at startup.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn TerminalBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn TerminalBackend>) {
        let name = name.into();
        tracing::debug!(provider = %name, isolation = %backend.isolation_level(), "registering terminal provider");
        if self.backends.insert(name.clone(), backend).is_some() {
            tracing::warn!(provider = %name, "replaced previously registered terminal provider");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TerminalBackend>> {
        self.backends.get(name).cloned()
    }

    /// # Errors
    ///
    /// Returns [`TerminalError::ProviderNotFound`] if `name` is not registered.
    pub fn require(&self, name: &str) -> Result<Arc<dyn TerminalBackend>, TerminalError> {
        self.get(name).ok_or_else(|| TerminalError::ProviderNotFound {
            name: name.to_owned(),
        })
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}
