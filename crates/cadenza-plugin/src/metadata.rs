//! Plugin metadata
//!
//! Static description of a plugin type, supplied by its factory before any instance exists.

use crate::evbuf::EventFormat;
use serde::{Deserialize, Serialize};

/// Plugin metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin URI
    pub uri: String,

    /// Human-readable name
    pub name: String,

    /// Author or vendor name
    pub author: String,

    /// Wire format of this plugin's event ports
    pub event_format: EventFormat,

    /// The plugin corrupts audio when an input and an output share a buffer
    pub in_place_broken: bool,

    /// The plugin provides the state interface extension
    pub has_state: bool,
}

impl PluginMetadata {
    /// Create new metadata with required fields
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            author: String::new(),
            event_format: EventFormat::Atom,
            in_place_broken: false,
            has_state: false,
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn event_format(mut self, format: EventFormat) -> Self {
        self.event_format = format;
        self
    }

    pub fn in_place_broken(mut self, broken: bool) -> Self {
        self.in_place_broken = broken;
        self
    }

    pub fn state(mut self, has_state: bool) -> Self {
        self.has_state = has_state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let meta = PluginMetadata::new("urn:test:amp", "Amp");
        assert_eq!(meta.event_format, EventFormat::Atom);
        assert!(!meta.in_place_broken);
        assert!(!meta.has_state);
        assert!(meta.author.is_empty());
    }

    #[test]
    fn test_metadata_serde_roundtrip() {
        let meta = PluginMetadata::new("urn:test:synth", "Synth")
            .author("TestCo")
            .event_format(EventFormat::Event)
            .state(true);

        let json = serde_json::to_string(&meta).unwrap();
        let back: PluginMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uri, "urn:test:synth");
        assert_eq!(back.author, "TestCo");
        assert_eq!(back.event_format, EventFormat::Event);
        assert!(back.has_state);
    }
}
