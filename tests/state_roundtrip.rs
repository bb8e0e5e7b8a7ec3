//! Plugin state persistence tests
//!
//! State files must survive a reload in a process whose URI map numbers URIs
//! differently, and must load partially when individual records are damaged.
//!
//! Run with:
//! ```bash
//! cargo test -p cadenza --test state_roundtrip
//! ```

mod helpers;

use cadenza::plugin::testing::{StatefulData, StatefulPlugin};
use cadenza::plugin::StateSink;
use cadenza::{uris, Error, InstanceSnapshot, PluginError, PluginState, StateError, StateFlags, UriMap};
use parking_lot::Mutex;
use std::sync::Arc;

/// A map whose ids are shifted by `junk` unrelated URIs.
fn shifted_map(junk: usize) -> Arc<UriMap> {
    let map = Arc::new(UriMap::new());
    for i in 0..junk {
        map.map(&format!("urn:cadenza:test:junk#{i}"));
    }
    map
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

fn urid_chunk(out: &mut Vec<u8>, id: u32, uri: &str) {
    let mut body = id.to_le_bytes().to_vec();
    body.extend_from_slice(uri.as_bytes());
    body.push(0);
    chunk(out, b"URID", &body);
}

fn kval_chunk(out: &mut Vec<u8>, key: u32, value_type: u32, value: &[u8]) {
    let mut body = Vec::new();
    body.extend_from_slice(&key.to_le_bytes());
    body.extend_from_slice(&value_type.to_le_bytes());
    body.extend_from_slice(&(value.len() as u32).to_le_bytes());
    body.extend_from_slice(value);
    chunk(out, b"KVAL", &body);
}

fn riff(chunks: &[u8]) -> Vec<u8> {
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&((chunks.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"RDFF");
    out.extend_from_slice(chunks);
    out
}

#[test]
fn round_trip_across_differently_numbered_maps() {
    let writer_map = shifted_map(3);
    let mut state = PluginState::new(Arc::clone(&writer_map));
    let flags = StateFlags::POD | StateFlags::PORTABLE;
    let level = 0.5f32.to_le_bytes();
    let entries: [(&str, &str, &[u8]); 3] = [
        ("urn:cadenza:test#name", uris::ATOM_STRING, b"lead\0"),
        ("urn:cadenza:test#blob", uris::ATOM_CHUNK, &[1, 2, 3]),
        ("urn:cadenza:test#level", uris::ATOM_FLOAT, &level),
    ];
    for (key, value_type, value) in entries {
        state
            .store(writer_map.map(key), value, writer_map.map(value_type), flags)
            .unwrap();
    }
    let bytes = state.to_bytes();
    // Declared size covers everything after the size field.
    assert_eq!(
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize,
        bytes.len() - 8
    );

    let reader_map = shifted_map(11);
    let restored = PluginState::from_bytes(&bytes, Arc::clone(&reader_map)).unwrap();
    assert_eq!(restored.len(), 3);
    for (key, value_type, value) in entries {
        let record = restored.get_uri(key).unwrap();
        assert_ne!(record.key, writer_map.lookup(key).unwrap());
        assert_eq!(record.value, value);
        assert_eq!(reader_map.unmap(record.value_type).as_deref(), Some(value_type));
        assert_eq!(record.flags, flags);
    }
}

#[test]
fn unknown_uri_id_skips_only_that_record() {
    let mut chunks = Vec::new();
    urid_chunk(&mut chunks, 1, "urn:cadenza:test#good");
    urid_chunk(&mut chunks, 2, uris::ATOM_INT);
    kval_chunk(&mut chunks, 99, 2, &[9, 9, 9, 9]);
    kval_chunk(&mut chunks, 1, 2, &[1, 0, 0, 0]);

    let state = PluginState::from_bytes(&riff(&chunks), Arc::new(UriMap::new())).unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(
        state.get_uri("urn:cadenza:test#good").unwrap().value,
        vec![1, 0, 0, 0]
    );
}

#[test]
fn odd_length_chunks_are_padded() {
    let mut chunks = Vec::new();
    urid_chunk(&mut chunks, 4, "urn:x");
    urid_chunk(&mut chunks, 5, "urn:t");
    kval_chunk(&mut chunks, 4, 5, &[1, 2, 3]);
    assert_eq!(chunks.len() % 2, 0);

    let state = PluginState::from_bytes(&riff(&chunks), Arc::new(UriMap::new())).unwrap();
    assert_eq!(state.get_uri("urn:x").unwrap().value, vec![1, 2, 3]);
}

#[test]
fn truncated_file_keeps_complete_records() {
    let mut chunks = Vec::new();
    urid_chunk(&mut chunks, 1, "urn:a");
    urid_chunk(&mut chunks, 2, "urn:b");
    kval_chunk(&mut chunks, 1, 2, &[1, 1]);
    kval_chunk(&mut chunks, 2, 2, &[2, 2, 2, 2, 2, 2]);
    let mut bytes = riff(&chunks);
    bytes.truncate(bytes.len() - 3);

    let state = PluginState::from_bytes(&bytes, Arc::new(UriMap::new())).unwrap();
    assert_eq!(state.len(), 1);
    assert!(state.get_uri("urn:a").is_some());
}

#[test]
fn bad_magic_is_rejected() {
    let err = PluginState::from_bytes(b"RIFX\0\0\0\0RDFF", Arc::new(UriMap::new())).unwrap_err();
    assert!(matches!(err, PluginError::CorruptState(_)));
}

#[test]
fn duplicate_key_keeps_first_value() {
    let map = Arc::new(UriMap::new());
    let key = map.map("urn:cadenza:test#dup");
    let chunk_type = map.map(uris::ATOM_CHUNK);
    let mut state = PluginState::new(Arc::clone(&map));
    state.store(key, &[1], chunk_type, StateFlags::POD).unwrap();
    assert_eq!(
        state.store(key, &[2], chunk_type, StateFlags::POD),
        Err(StateError::Unknown)
    );
    assert_eq!(state.get(key).unwrap().value, vec![1]);
}

#[test]
fn instance_state_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let data = Arc::new(Mutex::new(StatefulData {
        blob: vec![0xde, 0xad, 0xbe, 0xef, 0x01],
        counter: -42,
        sample: Some("kick.wav".to_string()),
        ..Default::default()
    }));

    let saved_json = {
        let host = helpers::test_host_in(dir.path());
        host.register(StatefulPlugin::factory(Arc::clone(&data)));
        let mut plugin = host.instantiate(StatefulPlugin::URI).unwrap();
        plugin.set_parameter(StatefulPlugin::VOLUME, 0.3);

        let snapshot = host.save(&mut plugin, "insert-7").unwrap();
        assert_eq!(snapshot.state_file.as_deref(), Some("insert-7.rdff"));
        assert!(dir.path().join("insert-7.rdff").is_file());
        serde_json::to_string(&snapshot).unwrap()
    };
    assert_eq!(data.lock().saves, 1);

    // A "new process": fresh data, differently numbered URI map.
    let restored = Arc::new(Mutex::new(StatefulData::default()));
    let host = cadenza::PluginHost::builder()
        .config(helpers::test_config())
        .plugins_dir(dir.path())
        .uri_map(shifted_map(5))
        .build()
        .unwrap();
    host.register(StatefulPlugin::factory(Arc::clone(&restored)));
    let mut plugin = host.instantiate(StatefulPlugin::URI).unwrap();

    let snapshot: InstanceSnapshot = serde_json::from_str(&saved_json).unwrap();
    assert_eq!(snapshot.port("volume"), Some(0.3));
    host.restore(&mut plugin, &snapshot, "insert-7").unwrap();

    assert_eq!(plugin.get_parameter(StatefulPlugin::VOLUME), 0.3);
    let restored = restored.lock();
    assert_eq!(restored.restores, 1);
    assert_eq!(restored.blob, vec![0xde, 0xad, 0xbe, 0xef, 0x01]);
    assert_eq!(restored.counter, -42);
    assert_eq!(restored.sample.as_deref(), Some("kick.wav"));
}

#[test]
fn unknown_port_symbols_are_skipped_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let host = helpers::test_host_in(dir.path());
    host.register(StatefulPlugin::factory(Arc::new(Mutex::new(StatefulData::default()))));
    let mut plugin = host.instantiate(StatefulPlugin::URI).unwrap();

    let snapshot: InstanceSnapshot = serde_json::from_str(
        r#"{"ports":[{"symbol":"gone","value":1.0},{"symbol":"volume","value":0.9}]}"#,
    )
    .unwrap();
    host.restore(&mut plugin, &snapshot, "insert-1").unwrap();
    assert_eq!(plugin.get_parameter(StatefulPlugin::VOLUME), 0.9);
}

#[test]
fn missing_state_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = helpers::test_host_in(dir.path());
    host.register(StatefulPlugin::factory(Arc::new(Mutex::new(StatefulData::default()))));
    let mut plugin = host.instantiate(StatefulPlugin::URI).unwrap();

    let snapshot = InstanceSnapshot {
        ports: Vec::new(),
        state_file: Some("nope.rdff".to_string()),
    };
    let err = host.restore(&mut plugin, &snapshot, "nope").unwrap_err();
    assert!(matches!(err, Error::Plugin(PluginError::Io(_))));
}
