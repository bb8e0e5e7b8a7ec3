//! The plugin host: shared URI map, configuration and plugin registry.

use crate::{PluginHostBuilder, Result};
use cadenza_core::{HostConfig, HostUris, UriMap};
use cadenza_plugin::{
    InstanceSnapshot, PluginFactory, PluginInstance, PluginMetadata, PluginRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the process-wide services plugin instances are created with.
///
/// Instances hold their own `Arc` of the URI map and stay usable after the host is dropped.
pub struct PluginHost {
    config: HostConfig,
    uri_map: Arc<UriMap>,
    uris: HostUris,
    registry: PluginRegistry,
    plugins_dir: Option<PathBuf>,
}

impl PluginHost {
    pub fn builder() -> PluginHostBuilder {
        PluginHostBuilder::default()
    }

    pub(crate) fn from_parts(
        config: HostConfig,
        uri_map: Arc<UriMap>,
        plugins_dir: Option<PathBuf>,
    ) -> Self {
        let uris = HostUris::new(&uri_map);
        tracing::info!(
            "Plugin host ready ({} Hz, {} frames max)",
            config.sample_rate,
            config.max_block_size
        );
        Self {
            config,
            uri_map,
            uris,
            registry: PluginRegistry::new(),
            plugins_dir,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn uri_map(&self) -> &Arc<UriMap> {
        &self.uri_map
    }

    pub fn uris(&self) -> &HostUris {
        &self.uris
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn plugins_dir(&self) -> Option<&Path> {
        self.plugins_dir.as_deref()
    }

    pub fn register(&self, factory: impl PluginFactory + 'static) {
        self.registry.register(factory);
    }

    pub fn discover(&self) -> Vec<PluginMetadata> {
        self.registry.discover()
    }

    pub fn instantiate(&self, uri: &str) -> Result<PluginInstance> {
        Ok(self
            .registry
            .instantiate(uri, &self.config, Arc::clone(&self.uri_map))?)
    }

    /// Open a plugin library and register the listed plugins from it.
    ///
    /// Plugins the library does not contain are skipped with a warning. Returns the URIs
    /// that were registered.
    #[cfg(feature = "ffi")]
    pub fn load_library(
        &self,
        path: impl AsRef<Path>,
        plugins: impl IntoIterator<Item = (PluginMetadata, Vec<cadenza_plugin::PortInfo>)>,
    ) -> Result<Vec<String>> {
        let library = cadenza_plugin::Lv2Library::open(path)?;
        let mut registered = Vec::new();
        for (metadata, ports) in plugins {
            let uri = metadata.uri.clone();
            match library.factory(metadata, ports) {
                Ok(factory) => {
                    self.registry.register(factory);
                    registered.push(uri);
                }
                Err(e) => tracing::warn!(
                    "Failed to register {} from {}: {}",
                    uri,
                    library.path().display(),
                    e
                ),
            }
        }
        Ok(registered)
    }

    fn require_plugins_dir(&self) -> Result<&Path> {
        self.plugins_dir().ok_or_else(|| {
            cadenza_core::Error::InvalidConfig("no plugins directory configured".to_string())
                .into()
        })
    }

    /// Save an instance's control values and state into the plugins directory.
    pub fn save(&self, instance: &mut PluginInstance, insert_id: &str) -> Result<InstanceSnapshot> {
        let dir = self.require_plugins_dir()?;
        Ok(instance.save(dir, insert_id)?)
    }

    pub fn restore(
        &self,
        instance: &mut PluginInstance,
        snapshot: &InstanceSnapshot,
        insert_id: &str,
    ) -> Result<()> {
        let dir = self.require_plugins_dir()?;
        Ok(instance.restore(snapshot, dir, insert_id)?)
    }

    /// Tear down the URI map. Instances still alive afterwards can no longer map URIs.
    pub fn shutdown(self) {
        tracing::info!("Shutting down plugin host ({} URIs)", self.uri_map.len());
        self.uri_map.teardown();
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("config", &self.config)
            .field("plugins", &self.registry.len())
            .field("plugins_dir", &self.plugins_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use cadenza_plugin::testing::{CallCounts, GainPlugin};

    #[test]
    fn test_instantiate_registered_plugin() {
        let host = PluginHost::builder().max_block_size(128).build().unwrap();
        host.register(GainPlugin::factory(CallCounts::new()));
        assert_eq!(host.discover().len(), 1);

        let mut gain = host.instantiate(GainPlugin::URI).unwrap();
        gain.activate();
        gain.run(128).unwrap();

        let err = host.instantiate("urn:missing").unwrap_err();
        assert!(matches!(err, Error::Plugin(_)));
    }

    #[test]
    fn test_save_requires_plugins_dir() {
        let host = PluginHost::builder().build().unwrap();
        host.register(GainPlugin::factory(CallCounts::new()));
        let mut gain = host.instantiate(GainPlugin::URI).unwrap();
        assert!(matches!(host.save(&mut gain, "gain-1"), Err(Error::Core(_))));
    }

    #[test]
    fn test_shutdown_tears_down_uri_map() {
        let host = PluginHost::builder().build().unwrap();
        let map = Arc::clone(host.uri_map());
        assert!(host.uris().midi_event != 0);
        host.shutdown();
        assert!(!map.is_active());
        assert_eq!(map.map("urn:after"), 0);
    }
}
