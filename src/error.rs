//! Centralized error type for the cadenza umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cadenza_core::Error),

    #[error("Plugin: {0}")]
    Plugin(#[from] cadenza_plugin::PluginError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<cadenza_plugin::ProcessError> for Error {
    fn from(e: cadenza_plugin::ProcessError) -> Self {
        Error::Plugin(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_subsystem_errors() {
        let err: Error = cadenza_core::Error::UriMapClosed.into();
        assert!(matches!(err, Error::Core(_)));

        let err: Error = cadenza_plugin::PluginError::UnknownPlugin("urn:x".into()).into();
        assert_eq!(err.to_string(), "Plugin: Unknown plugin: urn:x");

        let err: Error = cadenza_plugin::ProcessError::NotActivated.into();
        assert!(err.to_string().contains("not activated"));
    }
}
