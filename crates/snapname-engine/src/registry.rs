use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use snapname_contracts::config::AppSettings;

use crate::dryrun::DryrunOracle;
use crate::gemini::GeminiOracle;
use crate::oracle::NamingOracle;

/// Naming oracles by name.
#[derive(Default)]
pub struct OracleRegistry {
    oracles: BTreeMap<String, Arc<dyn NamingOracle>>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: NamingOracle + 'static>(&mut self, oracle: O) {
        self.oracles
            .insert(oracle.name().to_string(), Arc::new(oracle));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NamingOracle>> {
        self.oracles.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.oracles.keys().cloned().collect()
    }

    /// Registers every built-in oracle configured from `settings`.
    pub fn from_settings(settings: &AppSettings) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(DryrunOracle);
        registry.register(GeminiOracle::new(
            settings.resolve_api_key(),
            settings.model.clone(),
            settings.rename.oracle_timeout(),
        )?);
        Ok(registry)
    }

    pub fn select(&self, name: &str) -> anyhow::Result<Arc<dyn NamingOracle>> {
        self.get(name).ok_or_else(|| {
            anyhow!(
                "unknown oracle '{name}' (available: {})",
                self.names().join(", ")
            )
        })
    }
}
