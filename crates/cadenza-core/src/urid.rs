//! URI interning service.
//!
//! Plugins and host identify event types, state keys and extensions by URI, but compare
//! and store them as small integers. [`UriMap`] owns that mapping for one host process.
//! It is created once at host startup and handed to every component that needs it as an
//! `Arc<UriMap>`; nothing reaches for a global.
//!
//! Ids are process-local: the same URI may receive a different id in another process, so
//! anything persisted must store the URI strings alongside the ids.

use crate::compat::{Arc, HashMap, RwLock, String, ToString, Vec};
use crate::{Error, Result};

/// Integer id for an interned URI. `0` is never assigned and means "unmapped".
pub type Urid = u32;

/// Well-known URIs.
pub mod uris {
    pub const ATOM_SEQUENCE: &str = "http://lv2plug.in/ns/ext/atom#Sequence";
    pub const ATOM_CHUNK: &str = "http://lv2plug.in/ns/ext/atom#Chunk";
    pub const ATOM_INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
    pub const ATOM_FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
    pub const ATOM_STRING: &str = "http://lv2plug.in/ns/ext/atom#String";
    pub const ATOM_PATH: &str = "http://lv2plug.in/ns/ext/atom#Path";
    pub const MIDI_EVENT: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";
    pub const STATE_INTERFACE: &str = "http://lv2plug.in/ns/ext/state#interface";
    pub const URID_MAP: &str = "http://lv2plug.in/ns/ext/urid#map";
    pub const URID_UNMAP: &str = "http://lv2plug.in/ns/ext/urid#unmap";
}

#[derive(Default)]
struct Tables {
    by_uri: HashMap<Arc<str>, Urid>,
    by_id: Vec<Arc<str>>,
    active: bool,
}

/// Bidirectional URI <-> [`Urid`] table.
///
/// Lookups take a read lock and interning a new URI takes a write lock, so the map must
/// not be touched from the audio thread. Components that need ids on the audio thread
/// resolve them up front (see [`HostUris`]).
pub struct UriMap {
    tables: RwLock<Tables>,
}

impl UriMap {
    /// Create an empty, active map.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                active: true,
                ..Default::default()
            }),
        }
    }

    /// Intern `uri`, returning its id. Returns `0` after [`teardown`](Self::teardown).
    pub fn map(&self, uri: &str) -> Urid {
        if let Some(&id) = self.tables.read().by_uri.get(uri) {
            return id;
        }

        let mut tables = self.tables.write();
        if !tables.active {
            return 0;
        }
        // Another writer may have interned it between the two locks.
        if let Some(&id) = tables.by_uri.get(uri) {
            return id;
        }

        let uri: Arc<str> = Arc::from(uri);
        tables.by_id.push(Arc::clone(&uri));
        let id = tables.by_id.len() as Urid;
        tables.by_uri.insert(uri, id);
        id
    }

    /// Fallible variant of [`map`](Self::map) for callers outside the C callback path.
    pub fn try_map(&self, uri: &str) -> Result<Urid> {
        if uri.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }
        match self.map(uri) {
            0 => Err(Error::UriMapClosed),
            id => Ok(id),
        }
    }

    /// Resolve an id back to its URI.
    pub fn unmap(&self, id: Urid) -> Option<Arc<str>> {
        let index = (id as usize).checked_sub(1)?;
        self.tables.read().by_id.get(index).cloned()
    }

    /// Like [`unmap`](Self::unmap) but returns an owned string, for diagnostics.
    pub fn unmap_string(&self, id: Urid) -> Option<String> {
        self.unmap(id).map(|uri| String::from(&*uri))
    }

    /// Id of an already interned URI, without interning it.
    pub fn lookup(&self, uri: &str) -> Option<Urid> {
        self.tables.read().by_uri.get(uri).copied()
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self) -> bool {
        self.tables.read().active
    }

    /// Drop every entry and refuse further interning.
    pub fn teardown(&self) {
        let mut tables = self.tables.write();
        tables.by_uri.clear();
        tables.by_id.clear();
        tables.active = false;
    }
}

impl Default for UriMap {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for UriMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UriMap")
            .field("len", &self.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ids of the URIs the host itself needs, interned once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostUris {
    pub atom_sequence: Urid,
    pub atom_chunk: Urid,
    pub atom_int: Urid,
    pub atom_float: Urid,
    pub atom_string: Urid,
    pub atom_path: Urid,
    pub midi_event: Urid,
    pub state_interface: Urid,
}

impl HostUris {
    pub fn new(map: &UriMap) -> Self {
        Self {
            atom_sequence: map.map(uris::ATOM_SEQUENCE),
            atom_chunk: map.map(uris::ATOM_CHUNK),
            atom_int: map.map(uris::ATOM_INT),
            atom_float: map.map(uris::ATOM_FLOAT),
            atom_string: map.map(uris::ATOM_STRING),
            atom_path: map.map(uris::ATOM_PATH),
            midi_event: map.map(uris::MIDI_EVENT),
            state_interface: map.map(uris::STATE_INTERFACE),
        }
    }
}
