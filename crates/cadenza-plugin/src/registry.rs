//! Plugin registry
//!
//! Maps plugin URIs to factories and builds instances from them. Port tables are built once
//! per plugin and sample rate and shared read-only by every instance.

use crate::error::{LoadStage, PluginError, Result};
use crate::instance::PluginInstance;
use crate::metadata::PluginMetadata;
use crate::native::PluginFactory;
use crate::port::PortTable;
use cadenza_core::{HostConfig, UriMap};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type TableKey = (String, u64);

#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
    tables: Mutex<HashMap<TableKey, Arc<PortTable>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its metadata URI, replacing any previous one.
    pub fn register(&self, factory: impl PluginFactory + 'static) {
        self.register_arc(Arc::new(factory));
    }

    pub fn register_arc(&self, factory: Arc<dyn PluginFactory>) {
        let uri = factory.metadata().uri.clone();
        self.forget_tables(&uri);
        if self.factories.write().insert(uri.clone(), factory).is_some() {
            tracing::warn!("Replaced registered plugin: {}", uri);
        } else {
            tracing::info!("Registered plugin: {}", uri);
        }
    }

    /// Returns whether a factory was registered under `uri`.
    pub fn unregister(&self, uri: &str) -> bool {
        self.forget_tables(uri);
        self.factories.write().remove(uri).is_some()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.factories.read().contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }

    /// Metadata of every registered plugin, sorted by URI.
    pub fn discover(&self) -> Vec<PluginMetadata> {
        let mut found: Vec<_> = self
            .factories
            .read()
            .values()
            .map(|f| f.metadata().clone())
            .collect();
        found.sort_by(|a, b| a.uri.cmp(&b.uri));
        found
    }

    pub fn factory(&self, uri: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.read().get(uri).cloned()
    }

    /// Shared port table of `uri` at `sample_rate`, built on first use.
    pub fn port_table(&self, uri: &str, sample_rate: f64) -> Result<Arc<PortTable>> {
        let factory = self
            .factory(uri)
            .ok_or_else(|| PluginError::UnknownPlugin(uri.to_string()))?;
        self.table_for(&*factory, sample_rate)
    }

    fn table_for(&self, factory: &dyn PluginFactory, sample_rate: f64) -> Result<Arc<PortTable>> {
        let uri = &factory.metadata().uri;
        let key = (uri.clone(), sample_rate.to_bits());
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(&key) {
            return Ok(Arc::clone(table));
        }

        let table = PortTable::build(factory.ports(), sample_rate).map_err(|e| {
            PluginError::LoadFailed {
                uri: uri.clone(),
                stage: LoadStage::Ports,
                reason: e.to_string(),
            }
        })?;
        tracing::debug!("Built port table for {} ({} ports)", uri, table.len());
        let table = Arc::new(table);
        tables.insert(key, Arc::clone(&table));
        Ok(table)
    }

    fn forget_tables(&self, uri: &str) {
        self.tables.lock().retain(|(cached, _), _| cached != uri);
    }

    /// Instantiate a registered plugin.
    pub fn instantiate(
        &self,
        uri: &str,
        config: &HostConfig,
        uri_map: Arc<UriMap>,
    ) -> Result<PluginInstance> {
        let factory = self.factory(uri).ok_or_else(|| {
            tracing::warn!("No plugin registered for {}", uri);
            PluginError::UnknownPlugin(uri.to_string())
        })?;
        let table = self.table_for(&*factory, config.sample_rate)?;
        let instance = PluginInstance::new(&*factory, table, config, uri_map)?;
        tracing::info!("Loaded plugin: {}", uri);
        Ok(instance)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.len())
            .field("tables", &self.tables.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallCounts, FailingPlugin, GainPlugin, LatencyPlugin, TestFactory};
    use crate::port::PortInfo;

    fn config() -> HostConfig {
        HostConfig {
            sample_rate: 48000.0,
            max_block_size: 128,
            event_buffer_capacity: 256,
        }
    }

    #[test]
    fn test_register_and_discover() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());

        registry.register(LatencyPlugin::factory(CallCounts::new()));
        registry.register(GainPlugin::factory(CallCounts::new()));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(GainPlugin::URI));

        let uris: Vec<_> = registry.discover().into_iter().map(|m| m.uri).collect();
        assert_eq!(uris, vec![GainPlugin::URI, LatencyPlugin::URI]);

        assert!(registry.unregister(GainPlugin::URI));
        assert!(!registry.unregister(GainPlugin::URI));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_port_tables_are_shared() {
        let registry = PluginRegistry::new();
        registry.register(GainPlugin::factory(CallCounts::new()));
        let map = Arc::new(UriMap::new());

        let a = registry
            .instantiate(GainPlugin::URI, &config(), Arc::clone(&map))
            .unwrap();
        let b = registry
            .instantiate(GainPlugin::URI, &config(), Arc::clone(&map))
            .unwrap();
        assert!(Arc::ptr_eq(a.ports(), b.ports()));

        let other_rate = HostConfig {
            sample_rate: 44100.0,
            ..config()
        };
        let c = registry.instantiate(GainPlugin::URI, &other_rate, map).unwrap();
        assert!(!Arc::ptr_eq(a.ports(), c.ports()));
    }

    #[test]
    fn test_unknown_and_failing_plugins() {
        let registry = PluginRegistry::new();
        let map = Arc::new(UriMap::new());
        let err = registry
            .instantiate("urn:missing", &config(), Arc::clone(&map))
            .unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin(_)));

        registry.register(FailingPlugin::factory());
        let err = registry
            .instantiate(FailingPlugin::URI, &config(), map)
            .unwrap_err();
        assert!(err.to_string().contains("creating instance"));
    }

    #[test]
    fn test_bad_port_declaration_fails_at_ports_stage() {
        let registry = PluginRegistry::new();
        registry.register(TestFactory::new(
            PluginMetadata::new("urn:cadenza:test:gap", "Gap"),
            vec![PortInfo::audio_input(1, "in")],
            |_| None,
        ));
        let err = registry
            .port_table("urn:cadenza:test:gap", 48000.0)
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::LoadFailed {
                stage: LoadStage::Ports,
                ..
            }
        ));
    }
}
