//! Builder for configuring and constructing a `PluginHost`.

use crate::{PluginHost, Result};
use cadenza_core::{HostConfig, UriMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Every instance created by the host shares the configuration set here; it is validated
/// once in [`build`](Self::build).
///
/// # Example
///
/// ```ignore
/// use cadenza::prelude::*;
///
/// let host = PluginHost::builder()
///     .sample_rate(48000.0)
///     .max_block_size(512)
///     .plugins_dir("/path/to/session/plugins")
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct PluginHostBuilder {
    config: HostConfig,
    plugins_dir: Option<PathBuf>,
    uri_map: Option<Arc<UriMap>>,
}

impl PluginHostBuilder {
    /// Default: 44100
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 1024
    pub fn max_block_size(mut self, frames: u32) -> Self {
        self.config.max_block_size = frames;
        self
    }

    /// Default: 8192
    pub fn event_buffer_capacity(mut self, bytes: u32) -> Self {
        self.config.event_buffer_capacity = bytes;
        self
    }

    /// Replace the whole configuration, e.g. one loaded from a settings file.
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory for plugin state files. Without one, `save`/`restore` on the host fail.
    pub fn plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = Some(dir.into());
        self
    }

    /// Share an existing URI map instead of creating a new one.
    pub fn uri_map(mut self, uri_map: Arc<UriMap>) -> Self {
        self.uri_map = Some(uri_map);
        self
    }

    pub fn build(self) -> Result<PluginHost> {
        self.config.validate()?;
        let uri_map = self.uri_map.unwrap_or_else(|| Arc::new(UriMap::new()));
        if !uri_map.is_active() {
            return Err(cadenza_core::Error::UriMapClosed.into());
        }
        Ok(PluginHost::from_parts(self.config, uri_map, self.plugins_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_builder_defaults() {
        let host = PluginHostBuilder::default().build().unwrap();
        assert_eq!(host.config(), &HostConfig::default());
        assert!(host.plugins_dir().is_none());
    }

    #[test]
    fn test_builder_validates() {
        let err = PluginHostBuilder::default()
            .max_block_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Core(_)));

        let closed = Arc::new(UriMap::new());
        closed.teardown();
        let err = PluginHostBuilder::default()
            .uri_map(closed)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Core(cadenza_core::Error::UriMapClosed)));
    }

    #[test]
    fn test_builder_shares_uri_map() {
        let map = Arc::new(UriMap::new());
        let id = map.map("urn:cadenza:test:shared");
        let host = PluginHostBuilder::default()
            .uri_map(Arc::clone(&map))
            .sample_rate(96000.0)
            .build()
            .unwrap();
        assert_eq!(host.uri_map().lookup("urn:cadenza:test:shared"), Some(id));
        assert_eq!(host.config().sample_rate, 96000.0);
    }
}
