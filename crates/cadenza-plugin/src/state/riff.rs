//! Chunked state container
//!
//! ```text
//! "RIFF" <u32 size> "RDFF"
//! "URID" <u32 len> <u32 id> <uri bytes> 0        one per key or type URI
//! "KVAL" <u32 len> <u32 key> <u32 type> <u32 size> <value bytes>
//! ```
//!
//! All integers are little-endian and chunks with an odd body length are followed by one
//! zero byte. Every URID chunk precedes the first KVAL chunk. Ids in the file are those of
//! the writing process; the reader re-interns each URI through its own [`UriMap`].

use super::{StateFlags, StateSink, StateSource, StateValue};
use crate::error::{PluginError, Result, StateError};
use cadenza_core::{UriMap, Urid};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// File extension of state files written next to a session.
pub const STATE_FILE_EXTENSION: &str = "rdff";

const RIFF: &[u8; 4] = b"RIFF";
const RDFF: &[u8; 4] = b"RDFF";
const URID: &[u8; 4] = b"URID";
const KVAL: &[u8; 4] = b"KVAL";

const CHUNK_HEADER_SIZE: usize = 8;
const KVAL_HEADER_SIZE: usize = 12;

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub key: Urid,
    pub value_type: Urid,
    pub flags: StateFlags,
    pub value: Vec<u8>,
}

/// Key/value state of one plugin, in store order.
pub struct PluginState {
    uri_map: Arc<UriMap>,
    records: Vec<StateRecord>,
    keys: HashMap<Urid, usize>,
}

fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn push_chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[&[u8]]) {
    let len: usize = body.iter().map(|part| part.len()).sum();
    out.extend_from_slice(tag);
    out.extend_from_slice(&(len as u32).to_le_bytes());
    for part in body {
        out.extend_from_slice(part);
    }
    if len % 2 == 1 {
        out.push(0);
    }
}

impl PluginState {
    pub fn new(uri_map: Arc<UriMap>) -> Self {
        Self {
            uri_map,
            records: Vec::new(),
            keys: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StateRecord] {
        &self.records
    }

    pub fn get(&self, key: Urid) -> Option<&StateRecord> {
        self.keys.get(&key).map(|&i| &self.records[i])
    }

    /// Look up a value by key URI.
    pub fn get_uri(&self, key: &str) -> Option<&StateRecord> {
        self.uri_map.lookup(key).and_then(|id| self.get(id))
    }

    /// Add a value. Keys and types must be mapped URIs; the first value for a key wins.
    pub fn insert(
        &mut self,
        key: Urid,
        value: &[u8],
        value_type: Urid,
        flags: StateFlags,
    ) -> std::result::Result<(), StateError> {
        let Some(key_uri) = self.uri_map.unmap(key) else {
            tracing::warn!("Plugin stored state under unmapped key id {}", key);
            return Err(StateError::Unknown);
        };
        if self.uri_map.unmap(value_type).is_none() {
            tracing::warn!("Plugin stored '{}' with unmapped type id {}", key_uri, value_type);
            return Err(StateError::BadType);
        }
        if self.keys.contains_key(&key) {
            tracing::error!("Plugin stored duplicate state key '{}', keeping first value", key_uri);
            return Err(StateError::Unknown);
        }

        self.keys.insert(key, self.records.len());
        self.records.push(StateRecord {
            key,
            value_type,
            flags,
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Encode as a state file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(RIFF);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(RDFF);

        let mut written = HashSet::new();
        for record in &self.records {
            for id in [record.key, record.value_type] {
                if !written.insert(id) {
                    continue;
                }
                match self.uri_map.unmap(id) {
                    Some(uri) => {
                        push_chunk(&mut out, URID, &[&id.to_le_bytes(), uri.as_bytes(), &[0]]);
                    }
                    None => tracing::warn!("URI id {} vanished from the URI map", id),
                }
            }
        }

        for record in &self.records {
            push_chunk(
                &mut out,
                KVAL,
                &[
                    &record.key.to_le_bytes(),
                    &record.value_type.to_le_bytes(),
                    &(record.value.len() as u32).to_le_bytes(),
                    &record.value,
                ],
            );
        }

        let size = (out.len() - CHUNK_HEADER_SIZE) as u32;
        out[4..8].copy_from_slice(&size.to_le_bytes());
        out
    }

    /// Decode a state file, re-interning its URIs through `uri_map`.
    ///
    /// Records that reference unknown URI ids or are malformed are skipped with a
    /// warning; a truncated chunk ends reading with whatever was decoded so far.
    pub fn from_bytes(bytes: &[u8], uri_map: Arc<UriMap>) -> Result<Self> {
        if bytes.len() < 12 || &bytes[0..4] != RIFF || &bytes[8..12] != RDFF {
            return Err(PluginError::CorruptState(
                "missing RIFF/RDFF header".to_string(),
            ));
        }

        let declared = read_u32_le(bytes, 4) as usize;
        let end = bytes.len().min(declared.saturating_add(CHUNK_HEADER_SIZE));
        if end < bytes.len() || declared + CHUNK_HEADER_SIZE > bytes.len() {
            tracing::debug!(
                "State file size field {} disagrees with {} bytes on disk",
                declared,
                bytes.len()
            );
        }

        let mut state = Self::new(uri_map);
        let mut ids: HashMap<u32, Urid> = HashMap::new();
        let mut offset = 12;

        while offset + CHUNK_HEADER_SIZE <= end {
            let tag = &bytes[offset..offset + 4];
            let len = read_u32_le(bytes, offset + 4) as usize;
            let body_start = offset + CHUNK_HEADER_SIZE;
            let Some(body_end) = body_start.checked_add(len).filter(|&e| e <= end) else {
                tracing::warn!(
                    "Truncated '{}' chunk at offset {} in plugin state",
                    String::from_utf8_lossy(tag),
                    offset
                );
                break;
            };
            let body = &bytes[body_start..body_end];

            if tag == URID {
                state.read_uri_chunk(body, &mut ids);
            } else if tag == KVAL {
                state.read_value_chunk(body, &ids);
            } else {
                tracing::debug!("Skipping unknown chunk '{}'", String::from_utf8_lossy(tag));
            }

            offset = body_end + (len & 1);
        }

        Ok(state)
    }

    fn read_uri_chunk(&self, body: &[u8], ids: &mut HashMap<u32, Urid>) {
        if body.len() < 5 {
            tracing::warn!("Malformed URID record of {} bytes in plugin state", body.len());
            return;
        }
        let id = read_u32_le(body, 0);
        let text = &body[4..];
        let text = text.split(|&b| b == 0).next().unwrap_or(text);
        match std::str::from_utf8(text) {
            Ok(uri) => match self.uri_map.map(uri) {
                0 => tracing::warn!("Could not map '{}' while reading plugin state", uri),
                urid => {
                    ids.insert(id, urid);
                }
            },
            Err(_) => tracing::warn!("URID record {} is not valid UTF-8", id),
        }
    }

    fn read_value_chunk(&mut self, body: &[u8], ids: &HashMap<u32, Urid>) {
        if body.len() < KVAL_HEADER_SIZE {
            tracing::warn!("Malformed KVAL record of {} bytes in plugin state", body.len());
            return;
        }
        let key = read_u32_le(body, 0);
        let value_type = read_u32_le(body, 4);
        let size = read_u32_le(body, 8) as usize;
        let Some(value) = body.get(KVAL_HEADER_SIZE..KVAL_HEADER_SIZE.saturating_add(size))
        else {
            tracing::warn!("KVAL record for key id {} claims {} bytes", key, size);
            return;
        };

        let (Some(&key), Some(&value_type)) = (ids.get(&key), ids.get(&value_type)) else {
            tracing::warn!(
                "State record references unknown URI id (key {}, type {}), skipping",
                key,
                value_type
            );
            return;
        };

        if self.keys.contains_key(&key) {
            tracing::warn!("Duplicate key id {} in plugin state, keeping first", key);
            return;
        }
        self.keys.insert(key, self.records.len());
        self.records.push(StateRecord {
            key,
            value_type,
            flags: StateFlags::POD | StateFlags::PORTABLE,
            value: value.to_vec(),
        });
    }

    /// Write the state file at `path`.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        tracing::debug!("Wrote {} state records to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn read_file(path: &Path, uri_map: Arc<UriMap>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, uri_map)
    }
}

impl StateSink for PluginState {
    fn store(
        &mut self,
        key: Urid,
        value: &[u8],
        value_type: Urid,
        flags: StateFlags,
    ) -> std::result::Result<(), StateError> {
        self.insert(key, value, value_type, flags)
    }
}

impl StateSource for PluginState {
    fn retrieve(&self, key: Urid) -> Option<StateValue<'_>> {
        match self.get(key) {
            Some(record) => Some(StateValue {
                value: &record.value,
                value_type: record.value_type,
                flags: StateFlags::POD | StateFlags::PORTABLE,
            }),
            None => {
                let uri = self.uri_map.unmap(key);
                tracing::warn!(
                    "Plugin attempted to retrieve nonexistent key: {}",
                    uri.as_deref().unwrap_or("<unmapped>")
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginState")
            .field("records", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "urn:test:state#key";
    const OTHER: &str = "urn:test:state#other";
    const BLOB: &str = "urn:test:types#blob";

    fn sample(map: &Arc<UriMap>) -> PluginState {
        let mut state = PluginState::new(Arc::clone(map));
        let key = map.map(KEY);
        let other = map.map(OTHER);
        let blob = map.map(BLOB);
        state.store(key, b"hello", blob, StateFlags::POD).unwrap();
        state.store(other, &[1, 2, 3, 4], blob, StateFlags::POD).unwrap();
        state
    }

    #[test]
    fn test_container_layout() {
        let map = Arc::new(UriMap::new());
        let bytes = sample(&map).to_bytes();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32_le(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"RDFF");
        assert_eq!(&bytes[12..16], b"URID");

        // All URID chunks come before the first KVAL chunk.
        let first_kval = bytes.windows(4).position(|w| w == b"KVAL").unwrap();
        let last_urid = bytes.windows(4).rposition(|w| w == b"URID").unwrap();
        assert!(last_urid < first_kval);
        assert_eq!(bytes.windows(4).filter(|w| *w == b"URID").count(), 3);
    }

    #[test]
    fn test_odd_chunks_are_padded() {
        let map = Arc::new(UriMap::new());
        let mut state = PluginState::new(Arc::clone(&map));
        // 4 + len("urn:a") + 1 = 10, even; a 1-byte value makes KVAL odd.
        state
            .store(map.map("urn:a"), &[9], map.map("urn:b"), StateFlags::POD)
            .unwrap();
        let bytes = state.to_bytes();
        assert_eq!(bytes.len() % 2, 0);
        let back = PluginState::from_bytes(&bytes, map).unwrap();
        assert_eq!(back.get_uri("urn:a").unwrap().value, vec![9]);
    }

    #[test]
    fn test_roundtrip_in_same_process() {
        let map = Arc::new(UriMap::new());
        let bytes = sample(&map).to_bytes();
        let back = PluginState::from_bytes(&bytes, Arc::clone(&map)).unwrap();
        assert_eq!(back.len(), 2);
        let record = back.get(map.map(KEY)).unwrap();
        assert_eq!(record.value, b"hello");
        assert_eq!(record.value_type, map.map(BLOB));
        assert_eq!(record.flags, StateFlags::POD | StateFlags::PORTABLE);
    }

    #[test]
    fn test_duplicate_key_keeps_first() {
        let map = Arc::new(UriMap::new());
        let mut state = sample(&map);
        let err = state
            .store(map.map(KEY), b"again", map.map(BLOB), StateFlags::POD)
            .unwrap_err();
        assert_eq!(err, StateError::Unknown);
        assert_eq!(state.get_uri(KEY).unwrap().value, b"hello");
    }

    #[test]
    fn test_unmapped_ids_are_rejected() {
        let map = Arc::new(UriMap::new());
        let mut state = PluginState::new(Arc::clone(&map));
        let key = map.map(KEY);
        assert_eq!(
            state.store(key, b"x", 999, StateFlags::POD),
            Err(StateError::BadType)
        );
        assert_eq!(
            state.store(999, b"x", key, StateFlags::POD),
            Err(StateError::Unknown)
        );
        assert!(state.is_empty());
    }

    #[test]
    fn test_retrieve_missing_key() {
        let map = Arc::new(UriMap::new());
        let state = sample(&map);
        assert!(state.retrieve(map.map("urn:test:missing")).is_none());
        let value = state.retrieve(map.map(KEY)).unwrap();
        assert_eq!(value.value, b"hello");
    }

    #[test]
    fn test_bad_magic_is_an_error() {
        let map = Arc::new(UriMap::new());
        assert!(matches!(
            PluginState::from_bytes(b"RIFX\0\0\0\0RDFF", Arc::clone(&map)),
            Err(PluginError::CorruptState(_))
        ));
        assert!(PluginState::from_bytes(b"RIFF", map).is_err());
    }

    #[test]
    fn test_truncated_file_keeps_earlier_records() {
        let map = Arc::new(UriMap::new());
        let bytes = sample(&map).to_bytes();
        let cut = &bytes[..bytes.len() - 3];
        let back = PluginState::from_bytes(cut, map).unwrap();
        assert_eq!(back.len(), 1);
        assert!(back.get_uri(KEY).is_some());
    }

    #[test]
    fn test_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(format!("1.{STATE_FILE_EXTENSION}"));
        let map = Arc::new(UriMap::new());
        sample(&map).write_file(&path).unwrap();
        let back = PluginState::read_file(&path, map).unwrap();
        assert_eq!(back.get_uri(OTHER).unwrap().value, vec![1, 2, 3, 4]);
    }
}
