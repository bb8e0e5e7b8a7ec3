//! In-process plugins for exercising the host side.
//!
//! Available to this crate's tests and, with the `test-utils` feature, to downstream
//! integration tests.

use crate::error::StateError;
use crate::evbuf::{EventFormat, EventUrids, PortEvents};
use crate::metadata::PluginMetadata;
use crate::native::{Extension, HostFeatures, NativePlugin, PluginFactory, PortPtr};
use crate::port::PortInfo;
use crate::state::{StateFlags, StateInterface, StatePaths, StateSink, StateSource};
use cadenza_core::{uris, Urid};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counts {
    instantiate: AtomicU32,
    activate: AtomicU32,
    deactivate: AtomicU32,
    run: AtomicU32,
}

/// Shared counters of the callbacks a test plugin received.
#[derive(Debug, Clone, Default)]
pub struct CallCounts(Arc<Counts>);

impl CallCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instantiate(&self) -> u32 {
        self.0.instantiate.load(Ordering::SeqCst)
    }

    pub fn activate(&self) -> u32 {
        self.0.activate.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) -> u32 {
        self.0.deactivate.load(Ordering::SeqCst)
    }

    pub fn run(&self) -> u32 {
        self.0.run.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

type MakeFn = dyn Fn(&HostFeatures) -> Option<Box<dyn NativePlugin>> + Send + Sync;

/// Factory built from metadata, ports and a constructor closure.
pub struct TestFactory {
    metadata: PluginMetadata,
    ports: Vec<PortInfo>,
    make: Box<MakeFn>,
}

impl TestFactory {
    pub fn new(
        metadata: PluginMetadata,
        ports: Vec<PortInfo>,
        make: impl Fn(&HostFeatures) -> Option<Box<dyn NativePlugin>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            metadata,
            ports,
            make: Box::new(make),
        }
    }
}

impl PluginFactory for TestFactory {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    fn instantiate(
        &self,
        _sample_rate: f64,
        features: &HostFeatures,
    ) -> Option<Box<dyn NativePlugin>> {
        (self.make)(features)
    }
}

fn connect(ports: &mut [PortPtr], index: u32, data: PortPtr) {
    if let Some(slot) = ports.get_mut(index as usize) {
        *slot = data;
    }
}

/// Mono gain with a peak meter output.
pub struct GainPlugin {
    ports: [PortPtr; 4],
    counts: CallCounts,
}

impl GainPlugin {
    pub const URI: &'static str = "urn:cadenza:test:gain";
    pub const INPUT: u32 = 0;
    pub const OUTPUT: u32 = 1;
    pub const GAIN: u32 = 2;
    pub const LEVEL: u32 = 3;

    pub fn ports() -> Vec<PortInfo> {
        vec![
            PortInfo::audio_input(Self::INPUT, "in"),
            PortInfo::audio_output(Self::OUTPUT, "out"),
            PortInfo::control_input(Self::GAIN, "gain")
                .name("Gain")
                .range(0.0, 2.0, 1.0),
            PortInfo::control_output(Self::LEVEL, "level").name("Level"),
        ]
    }

    pub fn factory(counts: CallCounts) -> TestFactory {
        TestFactory::new(
            PluginMetadata::new(Self::URI, "Test Gain"),
            Self::ports(),
            move |_| {
                CallCounts::bump(&counts.0.instantiate);
                Some(Box::new(GainPlugin {
                    ports: [PortPtr::NULL; 4],
                    counts: counts.clone(),
                }))
            },
        )
    }

    pub fn in_place_broken_factory() -> TestFactory {
        TestFactory::new(
            PluginMetadata::new("urn:cadenza:test:broken", "Broken").in_place_broken(true),
            Self::ports(),
            |_| {
                Some(Box::new(GainPlugin {
                    ports: [PortPtr::NULL; 4],
                    counts: CallCounts::new(),
                }))
            },
        )
    }
}

impl NativePlugin for GainPlugin {
    fn connect_port(&mut self, index: u32, data: PortPtr) {
        connect(&mut self.ports, index, data);
    }

    fn activate(&mut self) {
        CallCounts::bump(&self.counts.0.activate);
    }

    fn deactivate(&mut self) {
        CallCounts::bump(&self.counts.0.deactivate);
    }

    fn run(&mut self, nframes: u32) {
        CallCounts::bump(&self.counts.0.run);
        if self.ports.iter().any(|p| p.is_null()) {
            return;
        }
        let input = self.ports[Self::INPUT as usize].as_raw() as *const f32;
        let output = self.ports[Self::OUTPUT as usize].as_raw() as *mut f32;
        // SAFETY: the host connected every port; input and output may alias, so samples
        // are read before they are written.
        unsafe {
            let gain = self.ports[Self::GAIN as usize].control();
            let mut peak = 0.0f32;
            for i in 0..nframes as usize {
                let sample = *input.add(i) * gain;
                *output.add(i) = sample;
                peak = peak.max(sample.abs());
            }
            self.ports[Self::LEVEL as usize].set_control(peak);
        }
    }
}

/// Pass-through that reports the length of its last block as latency.
pub struct LatencyPlugin {
    ports: [PortPtr; 3],
    counts: CallCounts,
}

impl LatencyPlugin {
    pub const URI: &'static str = "urn:cadenza:test:latency";
    pub const INPUT: u32 = 0;
    pub const OUTPUT: u32 = 1;
    pub const LATENCY: u32 = 2;

    pub fn ports() -> Vec<PortInfo> {
        vec![
            PortInfo::audio_input(Self::INPUT, "in"),
            PortInfo::audio_output(Self::OUTPUT, "out"),
            PortInfo::control_output(Self::LATENCY, "latency")
                .integer()
                .reports_latency(),
        ]
    }

    pub fn factory(counts: CallCounts) -> TestFactory {
        TestFactory::new(
            PluginMetadata::new(Self::URI, "Test Latency"),
            Self::ports(),
            move |_| {
                CallCounts::bump(&counts.0.instantiate);
                Some(Box::new(LatencyPlugin {
                    ports: [PortPtr::NULL; 3],
                    counts: counts.clone(),
                }))
            },
        )
    }
}

impl NativePlugin for LatencyPlugin {
    fn connect_port(&mut self, index: u32, data: PortPtr) {
        connect(&mut self.ports, index, data);
    }

    fn activate(&mut self) {
        CallCounts::bump(&self.counts.0.activate);
    }

    fn deactivate(&mut self) {
        CallCounts::bump(&self.counts.0.deactivate);
    }

    fn run(&mut self, nframes: u32) {
        CallCounts::bump(&self.counts.0.run);
        if self.ports.iter().any(|p| p.is_null()) {
            return;
        }
        let input = self.ports[Self::INPUT as usize].as_raw() as *const f32;
        let output = self.ports[Self::OUTPUT as usize].as_raw() as *mut f32;
        // SAFETY: connected ports of at least nframes samples; copy handles aliasing.
        unsafe {
            std::ptr::copy(input, output, nframes as usize);
            self.ports[Self::LATENCY as usize].set_control(nframes as f32);
        }
    }
}

/// Copies every input event to its output port.
pub struct MidiThruPlugin {
    ports: [PortPtr; 2],
    format: EventFormat,
    urids: EventUrids,
}

impl MidiThruPlugin {
    pub const URI: &'static str = "urn:cadenza:test:midi-thru";
    pub const INPUT: u32 = 0;
    pub const OUTPUT: u32 = 1;

    pub fn ports() -> Vec<PortInfo> {
        vec![
            PortInfo::midi_input(Self::INPUT, "midi_in"),
            PortInfo::midi_output(Self::OUTPUT, "midi_out"),
        ]
    }

    pub fn factory(format: EventFormat) -> TestFactory {
        TestFactory::new(
            PluginMetadata::new(Self::URI, "Test MIDI Thru").event_format(format),
            Self::ports(),
            move |features| {
                Some(Box::new(MidiThruPlugin {
                    ports: [PortPtr::NULL; 2],
                    format,
                    urids: EventUrids::from(&features.uris),
                }))
            },
        )
    }
}

impl NativePlugin for MidiThruPlugin {
    fn connect_port(&mut self, index: u32, data: PortPtr) {
        connect(&mut self.ports, index, data);
    }

    fn run(&mut self, _nframes: u32) {
        // SAFETY: both pointers are distinct event buffers connected for this cycle.
        let (input, output) = unsafe {
            (
                PortEvents::input(self.ports[Self::INPUT as usize], self.format, self.urids),
                PortEvents::output(self.ports[Self::OUTPUT as usize], self.format, self.urids),
            )
        };
        let (Some(input), Some(mut output)) = (input, output) else {
            return;
        };
        for event in input.iter() {
            // Events that do not fit are dropped.
            let _ = output.append(event.frames, event.subframes, event.event_type, event.payload);
        }
    }
}

/// Data a [`StatefulPlugin`] keeps outside its control ports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatefulData {
    pub blob: Vec<u8>,
    pub counter: i32,
    /// Contents of a file saved alongside the state.
    pub sample: Option<String>,
    pub saves: u32,
    pub restores: u32,
}

/// Plugin with a state interface; its data lives in a handle shared with the test.
pub struct StatefulPlugin {
    volume: PortPtr,
    data: Arc<Mutex<StatefulData>>,
    keys: StatefulKeys,
}

#[derive(Debug, Clone, Copy)]
struct StatefulKeys {
    blob: Urid,
    counter: Urid,
    sample: Urid,
    chunk: Urid,
    int: Urid,
    path: Urid,
}

impl StatefulPlugin {
    pub const URI: &'static str = "urn:cadenza:test:stateful";
    pub const KEY_BLOB: &'static str = "urn:cadenza:test:stateful#blob";
    pub const KEY_COUNTER: &'static str = "urn:cadenza:test:stateful#counter";
    pub const KEY_SAMPLE: &'static str = "urn:cadenza:test:stateful#sample";
    pub const VOLUME: u32 = 0;
    const SAMPLE_FILE: &'static str = "sample.txt";

    pub fn ports() -> Vec<PortInfo> {
        vec![PortInfo::control_input(Self::VOLUME, "volume").range(0.0, 1.0, 0.8)]
    }

    pub fn factory(data: Arc<Mutex<StatefulData>>) -> TestFactory {
        TestFactory::new(
            PluginMetadata::new(Self::URI, "Test Stateful").state(true),
            Self::ports(),
            move |features| {
                let map = &features.uri_map;
                Some(Box::new(StatefulPlugin {
                    volume: PortPtr::NULL,
                    data: Arc::clone(&data),
                    keys: StatefulKeys {
                        blob: map.map(Self::KEY_BLOB),
                        counter: map.map(Self::KEY_COUNTER),
                        sample: map.map(Self::KEY_SAMPLE),
                        chunk: features.uris.atom_chunk,
                        int: features.uris.atom_int,
                        path: features.uris.atom_path,
                    },
                }))
            },
        )
    }
}

impl NativePlugin for StatefulPlugin {
    fn connect_port(&mut self, index: u32, data: PortPtr) {
        if index == Self::VOLUME {
            self.volume = data;
        }
    }

    fn run(&mut self, _nframes: u32) {}

    fn extension_data(&mut self, uri: &str) -> Option<Extension<'_>> {
        if uri == uris::STATE_INTERFACE {
            Some(Extension::State(self))
        } else {
            None
        }
    }
}

impl StateInterface for StatefulPlugin {
    fn save(
        &mut self,
        sink: &mut dyn StateSink,
        flags: StateFlags,
        paths: Option<&StatePaths>,
    ) -> Result<(), StateError> {
        let mut data = self.data.lock();
        data.saves += 1;
        sink.store(self.keys.blob, &data.blob, self.keys.chunk, flags)?;
        sink.store(
            self.keys.counter,
            &data.counter.to_le_bytes(),
            self.keys.int,
            flags,
        )?;

        if let (Some(sample), Some(paths)) = (&data.sample, paths) {
            let file = paths
                .new_file_path(Path::new(Self::SAMPLE_FILE))
                .map_err(|_| StateError::Unknown)?;
            std::fs::write(&file, sample).map_err(|_| StateError::Unknown)?;
            let stored = paths.abstract_path(&file);
            sink.store(
                self.keys.sample,
                stored.to_string_lossy().as_bytes(),
                self.keys.path,
                flags,
            )?;
        }
        Ok(())
    }

    fn restore(
        &mut self,
        source: &dyn StateSource,
        _flags: StateFlags,
        paths: Option<&StatePaths>,
    ) -> Result<(), StateError> {
        let mut data = self.data.lock();
        data.restores += 1;

        if let Some(value) = source.retrieve(self.keys.blob) {
            if value.value_type != self.keys.chunk {
                return Err(StateError::BadType);
            }
            data.blob = value.value.to_vec();
        }
        if let Some(value) = source.retrieve(self.keys.counter) {
            let raw: [u8; 4] = value.value.try_into().map_err(|_| StateError::BadType)?;
            data.counter = i32::from_le_bytes(raw);
        }
        if let (Some(value), Some(paths)) = (source.retrieve(self.keys.sample), paths) {
            let stored = String::from_utf8_lossy(value.value);
            let file = paths.absolute_path(Path::new(stored.as_ref()));
            data.sample = std::fs::read_to_string(file).ok();
        }
        Ok(())
    }
}

/// Factory whose plugin always refuses to instantiate.
pub struct FailingPlugin;

impl FailingPlugin {
    pub const URI: &'static str = "urn:cadenza:test:failing";

    pub fn factory() -> TestFactory {
        TestFactory::new(
            PluginMetadata::new(Self::URI, "Test Failing"),
            vec![PortInfo::audio_input(0, "in")],
            |_| None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::UriMap;

    #[test]
    fn test_factories_describe_their_ports() {
        let counts = CallCounts::new();
        let gain = GainPlugin::factory(counts.clone());
        assert_eq!(gain.metadata().uri, GainPlugin::URI);
        assert_eq!(gain.ports().len(), 4);

        let features = HostFeatures::new(Arc::new(UriMap::new()));
        assert!(gain.instantiate(48000.0, &features).is_some());
        assert_eq!(counts.instantiate(), 1);

        assert!(FailingPlugin::factory()
            .instantiate(48000.0, &features)
            .is_none());
    }

    #[test]
    fn test_gain_processes_in_place() {
        let mut plugin = GainPlugin {
            ports: [PortPtr::NULL; 4],
            counts: CallCounts::new(),
        };
        let mut audio = [0.5f32, -1.0];
        let mut gain = 2.0f32;
        let mut level = 0.0f32;
        let audio_ptr = PortPtr::from_raw(audio.as_mut_ptr().cast());
        plugin.connect_port(GainPlugin::INPUT, audio_ptr);
        plugin.connect_port(GainPlugin::OUTPUT, audio_ptr);
        plugin.connect_port(GainPlugin::GAIN, PortPtr::from_raw((&mut gain as *mut f32).cast()));
        plugin.connect_port(GainPlugin::LEVEL, PortPtr::from_raw((&mut level as *mut f32).cast()));
        plugin.run(2);

        assert_eq!(audio, [1.0, -2.0]);
        assert_eq!(level, 2.0);
    }
}
