//! Error types for plugin hosting

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Discovery,
    Opening,
    Descriptor,
    Ports,
    Instantiation,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Discovery => write!(f, "discovery"),
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::Descriptor => write!(f, "reading descriptor"),
            LoadStage::Ports => write!(f, "building port table"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin load failed at {stage} stage: {uri}\n  Reason: {reason}")]
    LoadFailed {
        uri: String,
        stage: LoadStage,
        reason: String,
    },

    #[error("Plugin library could not be opened: {path}\n  Reason: {reason}")]
    LibraryFailed { path: PathBuf, reason: String },

    #[error("Plugin {0} cannot process in-place and was rejected")]
    InPlaceBroken(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Invalid port declaration: {0}")]
    InvalidPorts(String),

    #[error("Port {index} out of range ({count} ports)")]
    PortOutOfRange { index: u32, count: u32 },

    #[error("Failed to save plugin state: {0}")]
    StateSaveError(String),

    #[error("Failed to restore plugin state: {0}")]
    StateRestoreError(String),

    #[error("Corrupt state file: {0}")]
    CorruptState(String),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Core(#[from] cadenza_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;

/// Failure of a single process cycle. Never allocates.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    #[error("plugin is not activated")]
    NotActivated,

    #[error("block of {nframes} frames exceeds maximum of {max}")]
    BlockTooLarge { nframes: u32, max: u32 },

    #[error("buffer {buffer} holds fewer than offset + nframes samples")]
    BufferTooShort { buffer: usize },

    #[error("scratch buffers are shorter than the block")]
    ScratchTooShort,
}

/// An event did not fit into the remaining capacity of its buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event of {needed} bytes does not fit ({available} bytes free)")]
pub struct EventOverflow {
    pub needed: usize,
    pub available: usize,
}

/// Status codes of the state save/restore callbacks.
///
/// Discriminants match the C status values; `0` (success) is `Ok(())`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StateError {
    #[error("unknown state error")]
    Unknown = 1,

    #[error("unsupported value type")]
    BadType = 2,

    #[error("unsupported value flags")]
    BadFlags = 3,

    #[error("required feature not provided")]
    NoFeature = 4,

    #[error("property not found")]
    NoProperty = 5,

    #[error("insufficient space")]
    NoSpace = 6,
}

impl StateError {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Interpret a C status value.
    pub fn check(status: u32) -> std::result::Result<(), StateError> {
        match status {
            0 => Ok(()),
            2 => Err(StateError::BadType),
            3 => Err(StateError::BadFlags),
            4 => Err(StateError::NoFeature),
            5 => Err(StateError::NoProperty),
            6 => Err(StateError::NoSpace),
            _ => Err(StateError::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stage_display() {
        assert_eq!(LoadStage::Discovery.to_string(), "discovery");
        assert_eq!(LoadStage::Opening.to_string(), "opening library");
        assert_eq!(LoadStage::Descriptor.to_string(), "reading descriptor");
        assert_eq!(LoadStage::Ports.to_string(), "building port table");
        assert_eq!(LoadStage::Instantiation.to_string(), "creating instance");
        assert_eq!(LoadStage::Activation.to_string(), "activating");
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::LoadFailed {
            uri: "urn:test:gain".to_string(),
            stage: LoadStage::Instantiation,
            reason: "instantiate returned null".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("creating instance"));
        assert!(msg.contains("urn:test:gain"));
        assert!(msg.contains("null"));

        let err = PluginError::PortOutOfRange { index: 9, count: 4 };
        assert_eq!(err.to_string(), "Port 9 out of range (4 ports)");
    }

    #[test]
    fn test_process_error_converts() {
        let err: PluginError = ProcessError::NotActivated.into();
        assert!(err.to_string().contains("not activated"));

        let err = ProcessError::BlockTooLarge {
            nframes: 4096,
            max: 1024,
        };
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_state_status_codes() {
        assert_eq!(StateError::check(0), Ok(()));
        assert_eq!(StateError::check(5), Err(StateError::NoProperty));
        assert_eq!(StateError::check(99), Err(StateError::Unknown));
        for err in [
            StateError::Unknown,
            StateError::BadType,
            StateError::BadFlags,
            StateError::NoFeature,
            StateError::NoProperty,
            StateError::NoSpace,
        ] {
            assert_eq!(StateError::check(err.code()), Err(err));
        }
    }
}
