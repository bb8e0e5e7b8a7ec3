//! Plugin instance: port connection, control shadows, run loop, latency, state
//!
//! ```text
//! Created -> Connected -> Activated -> Running (per block) -> Deactivated -> dropped
//!                             ^                                    |
//!                             +------------------------------------+
//! ```
//!
//! A UI thread writes control inputs through a [`ControlHandle`] at any time. The audio
//! thread copies every control input from its shadow into the value the plugin reads once
//! per `run`, so the plugin sees one consistent snapshot per block. Control outputs are
//! published back to the shadows after each `run`.
//!
//! `run`, `connect_and_run`, `activate` and `deactivate` must be serialized by the caller;
//! the instance takes no locks.

use crate::error::{LoadStage, PluginError, ProcessError, Result};
use crate::evbuf::{EventBuffer, EventUrids};
use crate::io::ProcessIo;
use crate::metadata::PluginMetadata;
use crate::native::{Extension, HostFeatures, NativePlugin, PluginFactory, PortPtr};
use crate::port::{ParameterDescriptor, PortKind, PortTable};
use crate::state::{
    InstanceSnapshot, PluginState, PortValue, StateFlags, StatePaths, STATE_FILE_EXTENSION,
};
use cadenza_core::{uris, AtomicFloat, HostConfig, UriMap};
use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Connected,
    Activated,
    Running,
    Deactivated,
}

/// Thread-safe handle to an instance's control values.
#[derive(Clone)]
pub struct ControlHandle {
    shadow: Arc<[AtomicFloat]>,
    ports: Arc<PortTable>,
}

impl ControlHandle {
    /// Current shadow value. For control outputs this is the value published by the last
    /// `run`.
    pub fn get(&self, index: u32) -> Option<f32> {
        self.shadow.get(index as usize).map(AtomicFloat::get)
    }

    /// Set a control input. Returns `false` for any other port.
    pub fn set(&self, index: u32, value: f32) -> bool {
        match self.ports.get(index) {
            Some(port) if port.is_control_input() => {
                self.shadow[index as usize].set(value);
                true
            }
            _ => false,
        }
    }

    pub fn get_by_symbol(&self, symbol: &str) -> Option<f32> {
        self.get(self.ports.port_index(symbol)?)
    }

    pub fn set_by_symbol(&self, symbol: &str, value: f32) -> bool {
        self.ports
            .port_index(symbol)
            .is_some_and(|index| self.set(index, value))
    }
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("ports", &self.shadow.len())
            .finish()
    }
}

/// One loaded plugin.
pub struct PluginInstance {
    plugin: Box<dyn NativePlugin>,
    metadata: Arc<PluginMetadata>,
    ports: Arc<PortTable>,
    config: HostConfig,
    uri_map: Arc<UriMap>,
    /// Host-side values, one per port.
    shadow: Arc<[AtomicFloat]>,
    /// Values the plugin reads and writes, one per port, connected once.
    live: Box<[Cell<f32>]>,
    events: Box<[Option<EventBuffer>]>,
    /// Read by event inputs during the latency run.
    idle_events: Option<EventBuffer>,
    /// Bound to audio inputs whenever the host has not supplied buffers.
    silence: Box<[f32]>,
    /// Bound to audio outputs whenever the host has not supplied buffers.
    discard: Box<[f32]>,
    activated: bool,
    lifecycle: Lifecycle,
}

impl PluginInstance {
    /// Instantiate `factory`'s plugin and measure its latency.
    ///
    /// Fails if the configuration is invalid, the plugin cannot process in place, or the
    /// plugin refuses to instantiate.
    pub fn new(
        factory: &dyn PluginFactory,
        ports: Arc<PortTable>,
        config: &HostConfig,
        uri_map: Arc<UriMap>,
    ) -> Result<Self> {
        config.validate()?;
        let metadata = Arc::new(factory.metadata().clone());

        if metadata.in_place_broken {
            tracing::error!("Plugin {} cannot process in-place, rejecting", metadata.uri);
            return Err(PluginError::InPlaceBroken(metadata.uri.clone()));
        }
        if ports.len() != factory.ports().len() {
            return Err(PluginError::LoadFailed {
                uri: metadata.uri.clone(),
                stage: LoadStage::Ports,
                reason: format!(
                    "port table has {} ports, plugin declares {}",
                    ports.len(),
                    factory.ports().len()
                ),
            });
        }

        let features = HostFeatures::new(Arc::clone(&uri_map));
        let plugin = factory
            .instantiate(config.sample_rate, &features)
            .ok_or_else(|| {
                tracing::error!("Failed to instantiate plugin {}", metadata.uri);
                PluginError::LoadFailed {
                    uri: metadata.uri.clone(),
                    stage: LoadStage::Instantiation,
                    reason: "plugin returned no instance".to_string(),
                }
            })?;

        let urids = EventUrids::from(&features.uris);
        let shadow: Arc<[AtomicFloat]> = ports
            .iter()
            .map(|p| AtomicFloat::new(p.default_value))
            .collect::<Vec<_>>()
            .into();
        let live = ports
            .iter()
            .map(|p| Cell::new(p.default_value))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let events = ports
            .iter()
            .map(|p| {
                (p.kind == PortKind::Event).then(|| {
                    EventBuffer::new(config.event_buffer_capacity, metadata.event_format, urids)
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let idle_events = ports
            .iter()
            .any(|p| p.kind == PortKind::Event && p.is_input())
            .then(|| EventBuffer::new(config.event_buffer_capacity, metadata.event_format, urids));
        let frames = config.max_block_size as usize;

        let mut instance = Self {
            plugin,
            metadata,
            ports,
            config: config.clone(),
            uri_map,
            shadow,
            live,
            events,
            idle_events,
            silence: vec![0.0; frames].into_boxed_slice(),
            discard: vec![0.0; frames].into_boxed_slice(),
            activated: false,
            lifecycle: Lifecycle::Created,
        };
        instance.connect_defaults();
        tracing::debug!(
            "Instantiated {} ({} ports)",
            instance.metadata.uri,
            instance.ports.len()
        );

        instance.latency_compute_run()?;
        Ok(instance)
    }

    /// Bind every port to instance-owned memory.
    fn connect_defaults(&mut self) {
        for port in self.ports.iter() {
            let i = port.index as usize;
            let ptr = match port.kind {
                PortKind::Control => PortPtr::from_raw(self.live[i].as_ptr().cast()),
                PortKind::Audio if port.is_input() => {
                    PortPtr::from_raw(self.silence.as_mut_ptr().cast())
                }
                PortKind::Audio => PortPtr::from_raw(self.discard.as_mut_ptr().cast()),
                PortKind::Event => self.events[i]
                    .as_mut()
                    .map_or(PortPtr::NULL, EventBuffer::port_ptr),
                PortKind::Unknown => PortPtr::NULL,
            };
            self.plugin.connect_port(port.index, ptr);
        }
        self.lifecycle = Lifecycle::Connected;
    }

    /// Point audio inputs at the silent buffer and audio outputs at the discard buffer.
    fn connect_audio_defaults(&mut self) {
        let silence = PortPtr::from_raw(self.silence.as_mut_ptr().cast());
        let discard = PortPtr::from_raw(self.discard.as_mut_ptr().cast());
        for port in self.ports.iter().filter(|p| p.kind == PortKind::Audio) {
            let ptr = if port.is_input() { silence } else { discard };
            self.plugin.connect_port(port.index, ptr);
        }
    }

    /// Bind a port to caller-owned memory.
    ///
    /// # Safety
    ///
    /// `data` must stay valid, and large enough for the port's kind and every block size
    /// later passed to `run`, until the port is connected again or the instance is dropped.
    /// `connect_and_run` rebinds audio ports to instance memory when it returns.
    pub unsafe fn connect_port(&mut self, index: u32, data: PortPtr) -> Result<()> {
        if index as usize >= self.ports.len() {
            return Err(PluginError::PortOutOfRange {
                index,
                count: self.ports.len() as u32,
            });
        }
        self.plugin.connect_port(index, data);
        Ok(())
    }

    /// Activate the plugin. No-op if already active.
    pub fn activate(&mut self) {
        if self.activated {
            return;
        }
        tracing::debug!("Activating {}", self.metadata.uri);
        self.plugin.activate();
        self.activated = true;
        self.lifecycle = Lifecycle::Activated;
    }

    /// Deactivate the plugin. No-op if not active.
    pub fn deactivate(&mut self) {
        if !self.activated {
            return;
        }
        tracing::debug!("Deactivating {}", self.metadata.uri);
        self.plugin.deactivate();
        self.activated = false;
        self.lifecycle = Lifecycle::Deactivated;
    }

    /// Process one block with the currently connected buffers.
    pub fn run(&mut self, nframes: u32) -> std::result::Result<(), ProcessError> {
        self.process(nframes, false)
    }

    /// With `idle_inputs`, event inputs read an empty buffer and keep what the host queued.
    fn process(
        &mut self,
        nframes: u32,
        idle_inputs: bool,
    ) -> std::result::Result<(), ProcessError> {
        if !self.activated {
            return Err(ProcessError::NotActivated);
        }
        if nframes > self.config.max_block_size {
            return Err(ProcessError::BlockTooLarge {
                nframes,
                max: self.config.max_block_size,
            });
        }

        for port in self.ports.iter() {
            let i = port.index as usize;
            match port.kind {
                PortKind::Control if port.is_input() => self.live[i].set(self.shadow[i].get()),
                PortKind::Event => {
                    let buffer = if idle_inputs && port.is_input() {
                        self.idle_events.as_mut()
                    } else {
                        self.events[i].as_mut()
                    };
                    if let Some(buffer) = buffer {
                        if port.is_output() {
                            buffer.prepare_output();
                        }
                        self.plugin.connect_port(port.index, buffer.port_ptr());
                    }
                }
                _ => {}
            }
        }

        self.plugin.run(nframes);

        for port in self.ports.iter() {
            let i = port.index as usize;
            match port.kind {
                PortKind::Control if port.is_output() => self.shadow[i].set(self.live[i].get()),
                PortKind::Event if port.is_input() => {
                    let buffer = if idle_inputs {
                        self.idle_events.as_mut()
                    } else {
                        self.events[i].as_mut()
                    };
                    if let Some(buffer) = buffer {
                        buffer.reset();
                    }
                }
                _ => {}
            }
        }

        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Bind audio ports to `io` starting at sample `offset`, then run.
    ///
    /// Unmapped inputs read silence and unmapped outputs write to the discard buffer.
    pub fn connect_and_run(
        &mut self,
        mut io: ProcessIo<'_>,
        nframes: u32,
        offset: u32,
    ) -> std::result::Result<(), ProcessError> {
        if nframes > self.config.max_block_size {
            return Err(ProcessError::BlockTooLarge {
                nframes,
                max: self.config.max_block_size,
            });
        }
        if io.scratch.frames() < nframes as usize {
            return Err(ProcessError::ScratchTooShort);
        }

        let (frames, start) = (nframes as usize, offset as usize);
        let (mut input, mut output) = (0, 0);
        for port in self.ports.iter().filter(|p| p.kind == PortKind::Audio) {
            let (map, nth) = if port.is_input() {
                input += 1;
                (io.inputs, input - 1)
            } else {
                output += 1;
                (io.outputs, output - 1)
            };
            let ptr = match map.get(nth) {
                Some(buffer) => io
                    .buffers
                    .sample_ptr(buffer, start, frames)
                    .ok_or(ProcessError::BufferTooShort { buffer })?,
                None if port.is_input() => io.scratch.silence_ptr(),
                None => io.scratch.discard_ptr(),
            };
            self.plugin.connect_port(port.index, PortPtr::from_raw(ptr.cast()));
        }

        let result = self.run(nframes);
        self.connect_audio_defaults();
        result
    }

    /// Prime the plugin's reported latency by running one silent block.
    ///
    /// Every audio port shares the silent buffer for this block and event inputs read
    /// nothing, so events queued for the next `run` are kept. Restores the previous
    /// activation state afterwards and returns the latency.
    pub fn latency_compute_run(&mut self) -> std::result::Result<u32, ProcessError> {
        if self.ports.latency_port().is_none() {
            return Ok(0);
        }

        let was_activated = self.activated;
        let previous = self.lifecycle;
        self.activate();

        self.silence.fill(0.0);
        let silence = PortPtr::from_raw(self.silence.as_mut_ptr().cast());
        for port in self.ports.iter().filter(|p| p.kind == PortKind::Audio) {
            self.plugin.connect_port(port.index, silence);
        }
        let result = self.process(self.config.max_block_size, true);

        self.deactivate();
        if was_activated {
            self.activate();
        } else {
            self.lifecycle = previous;
        }
        self.silence.fill(0.0);
        self.connect_audio_defaults();
        result?;

        let latency = self.signal_latency();
        tracing::debug!("Latency of {}: {} frames", self.metadata.uri, latency);
        Ok(latency)
    }

    /// Latency reported by the plugin's latency port, floored, or 0 without one.
    pub fn signal_latency(&self) -> u32 {
        self.ports.latency_port().map_or(0, |i| {
            let value = self.live[i as usize].get();
            if value.is_finite() && value > 0.0 {
                value.floor() as u32
            } else {
                0
            }
        })
    }

    /// Control inputs read the shadow, everything else the value the plugin wrote.
    pub fn get_parameter(&self, index: u32) -> f32 {
        match self.ports.get(index) {
            Some(port) if port.is_input() => self.shadow[index as usize].get(),
            Some(_) => self.live[index as usize].get(),
            None => 0.0,
        }
    }

    pub fn set_parameter(&self, index: u32, value: f32) {
        match self.ports.get(index) {
            Some(port) if port.kind == PortKind::Control => {
                self.shadow[index as usize].set(value);
            }
            _ => tracing::warn!(
                "Illegal parameter number used with plugin {}: {}",
                self.metadata.uri,
                index
            ),
        }
    }

    pub fn parameter_count(&self) -> u32 {
        self.ports.parameter_count()
    }

    pub fn nth_parameter(&self, n: u32) -> Option<u32> {
        self.ports.nth_parameter(n)
    }

    pub fn parameter_descriptor(&self, index: u32) -> Option<ParameterDescriptor> {
        self.ports.parameter_descriptor(index)
    }

    pub fn describe_parameter(&self, index: u32) -> &str {
        self.ports.describe(index)
    }

    /// Value formatted for display, empty for non-control ports.
    pub fn print_parameter(&self, index: u32) -> String {
        if self.ports.is_control(index) {
            format!("{:.3}", self.get_parameter(index))
        } else {
            String::new()
        }
    }

    pub fn automatable(&self) -> Vec<u32> {
        self.ports.automatable().collect()
    }

    pub fn port_symbol(&self, index: u32) -> Option<&str> {
        self.ports.get(index).map(|p| p.symbol.as_str())
    }

    pub fn port_is_input(&self, index: u32) -> bool {
        self.ports.is_input(index)
    }

    pub fn port_is_output(&self, index: u32) -> bool {
        self.ports.is_output(index)
    }

    pub fn port_is_audio(&self, index: u32) -> bool {
        self.ports.is_audio(index)
    }

    pub fn port_is_control(&self, index: u32) -> bool {
        self.ports.is_control(index)
    }

    pub fn port_is_midi(&self, index: u32) -> bool {
        self.ports.is_midi(index)
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            shadow: Arc::clone(&self.shadow),
            ports: Arc::clone(&self.ports),
        }
    }

    /// Event buffer of an event port: fill inputs before `run`, read outputs after it.
    pub fn event_buffer(&self, index: u32) -> Option<&EventBuffer> {
        self.events.get(index as usize)?.as_ref()
    }

    pub fn event_buffer_mut(&mut self, index: u32) -> Option<&mut EventBuffer> {
        self.events.get_mut(index as usize)?.as_mut()
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn uri(&self) -> &str {
        &self.metadata.uri
    }

    pub fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Save control inputs and, if the plugin has a state interface, its internal state
    /// to `<plugins_dir>/<insert_id>.rdff`.
    pub fn save(&mut self, plugins_dir: &Path, insert_id: &str) -> Result<InstanceSnapshot> {
        let ports = self
            .ports
            .automatable()
            .filter_map(|i| {
                let port = self.ports.get(i)?;
                Some(PortValue {
                    symbol: port.symbol.clone(),
                    value: self.shadow[i as usize].get(),
                })
            })
            .collect();
        let mut snapshot = InstanceSnapshot {
            ports,
            state_file: None,
        };

        let paths = StatePaths::new(plugins_dir, insert_id);
        match self.plugin.extension_data(uris::STATE_INTERFACE) {
            Some(Extension::State(state_iface)) => {
                let mut state = PluginState::new(Arc::clone(&self.uri_map));
                state_iface
                    .save(
                        &mut state,
                        StateFlags::POD | StateFlags::PORTABLE,
                        Some(&paths),
                    )
                    .map_err(|e| PluginError::StateSaveError(e.to_string()))?;

                let file = format!("{insert_id}.{STATE_FILE_EXTENSION}");
                std::fs::create_dir_all(plugins_dir)?;
                state.write_file(&plugins_dir.join(&file))?;
                snapshot.state_file = Some(file);
            }
            None if self.metadata.has_state => tracing::warn!(
                "Plugin {} declares state but provides no state interface",
                self.metadata.uri
            ),
            None => {}
        }

        Ok(snapshot)
    }

    /// Apply a snapshot written by [`save`](Self::save), then re-measure latency.
    pub fn restore(
        &mut self,
        snapshot: &InstanceSnapshot,
        plugins_dir: &Path,
        insert_id: &str,
    ) -> Result<()> {
        for port in &snapshot.ports {
            match self.ports.port_index(&port.symbol) {
                Some(i) if self.ports.get(i).is_some_and(|p| p.is_control_input()) => {
                    self.shadow[i as usize].set(port.value);
                }
                _ => tracing::warn!(
                    "Unknown port symbol '{}' in saved state of {}",
                    port.symbol,
                    self.metadata.uri
                ),
            }
        }

        if let Some(file) = &snapshot.state_file {
            let state = PluginState::read_file(&plugins_dir.join(file), Arc::clone(&self.uri_map))?;
            let paths = StatePaths::new(plugins_dir, insert_id);
            match self.plugin.extension_data(uris::STATE_INTERFACE) {
                Some(Extension::State(state_iface)) => state_iface
                    .restore(&state, StateFlags::POD | StateFlags::PORTABLE, Some(&paths))
                    .map_err(|e| PluginError::StateRestoreError(e.to_string()))?,
                None => tracing::warn!(
                    "State file {} present but plugin {} has no state interface",
                    file,
                    self.metadata.uri
                ),
            }
        }

        self.latency_compute_run()?;
        Ok(())
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        self.deactivate();
        tracing::debug!("Releasing {}", self.metadata.uri);
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("uri", &self.metadata.uri)
            .field("ports", &self.ports.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
