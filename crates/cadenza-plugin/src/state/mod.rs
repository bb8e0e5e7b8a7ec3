//! Plugin state save/restore
//!
//! Plugins with the state extension save by calling back into a [`StateSink`] and restore
//! by pulling values from a [`StateSource`], synchronously inside the host's call. The host
//! side of both is [`PluginState`], which also reads and writes the chunked state file.
//! Control port values are saved separately in an [`InstanceSnapshot`].

mod paths;
mod riff;

pub use paths::StatePaths;
pub use riff::{PluginState, StateRecord, STATE_FILE_EXTENSION};

use crate::error::StateError;
use bitflags::bitflags;
use cadenza_core::Urid;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags attached to a stored value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct StateFlags: u32 {
        /// Plain old data: no pointers or handles.
        const POD = 1;
        /// Independent of machine word size and endianness.
        const PORTABLE = 1 << 1;
        /// Only meaningful on this machine.
        const NATIVE = 1 << 2;
    }
}

/// A value handed back to a restoring plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateValue<'a> {
    pub value: &'a [u8],
    pub value_type: Urid,
    pub flags: StateFlags,
}

/// Receives values from a saving plugin.
pub trait StateSink {
    fn store(
        &mut self,
        key: Urid,
        value: &[u8],
        value_type: Urid,
        flags: StateFlags,
    ) -> Result<(), StateError>;
}

/// Supplies values to a restoring plugin.
pub trait StateSource {
    fn retrieve(&self, key: Urid) -> Option<StateValue<'_>>;
}

/// The state extension of a plugin.
pub trait StateInterface {
    fn save(
        &mut self,
        sink: &mut dyn StateSink,
        flags: StateFlags,
        paths: Option<&StatePaths>,
    ) -> Result<(), StateError>;

    fn restore(
        &mut self,
        source: &dyn StateSource,
        flags: StateFlags,
        paths: Option<&StatePaths>,
    ) -> Result<(), StateError>;
}

/// Saved value of one control input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortValue {
    pub symbol: String,
    pub value: f32,
}

/// Everything needed to bring an instance back: control values by symbol and the name of
/// the state file written next to them, if the plugin had internal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub ports: Vec<PortValue>,
    #[serde(default)]
    pub state_file: Option<String>,
}

impl InstanceSnapshot {
    pub fn port(&self, symbol: &str) -> Option<f32> {
        self.ports
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = StateFlags::POD | StateFlags::PORTABLE;
        assert_eq!(flags.bits(), 3);
        assert!(flags.contains(StateFlags::POD));
        assert!(!flags.contains(StateFlags::NATIVE));
        assert_eq!(StateFlags::from_bits(4), Some(StateFlags::NATIVE));
        // Bits from a newer plugin are dropped rather than rejected.
        assert_eq!(StateFlags::from_bits_truncate(0b1001), StateFlags::POD);
        assert!(StateFlags::empty().contains(StateFlags::empty()));
        assert_eq!(StateFlags::default(), StateFlags::empty());

        let json = serde_json::to_string(&flags).unwrap();
        let back: StateFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = InstanceSnapshot {
            ports: vec![PortValue {
                symbol: "gain".into(),
                value: 0.5,
            }],
            state_file: Some("7.rdff".into()),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: InstanceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.port("gain"), Some(0.5));
        assert_eq!(back.port("nope"), None);

        let bare: InstanceSnapshot = serde_json::from_str(r#"{"ports":[]}"#).unwrap();
        assert!(bare.state_file.is_none());
    }
}
