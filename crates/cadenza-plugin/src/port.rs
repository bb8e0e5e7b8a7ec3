//! Port descriptor table
//!
//! A factory declares its ports as [`PortInfo`]s; [`PortTable::build`] turns them into the
//! immutable per-plugin-type table every instance shares. Sample-rate scaling happens here,
//! once, so instances never look at the sample rate again.

use crate::error::{PluginError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Control,
    Event,
    /// Connected to nothing and skipped by the run loop.
    Unknown,
}

/// Port properties that change how a value is presented or scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortProperties {
    pub integer: bool,
    pub toggled: bool,
    pub logarithmic: bool,
    /// Default and bounds are fractions of the sample rate.
    pub sample_rate: bool,
    /// The port reports the plugin's latency in frames.
    pub reports_latency: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub label: String,
    pub value: f32,
}

/// A port as declared by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub default: Option<f32>,
    pub minimum: Option<f32>,
    pub maximum: Option<f32>,
    pub properties: PortProperties,
    /// Event port that carries MIDI.
    pub midi: bool,
    #[serde(default)]
    pub scale_points: Vec<ScalePoint>,
}

impl PortInfo {
    pub fn new(
        index: u32,
        symbol: impl Into<String>,
        direction: PortDirection,
        kind: PortKind,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            index,
            name: symbol.clone(),
            symbol,
            direction,
            kind,
            default: None,
            minimum: None,
            maximum: None,
            properties: PortProperties::default(),
            midi: false,
            scale_points: Vec::new(),
        }
    }

    pub fn audio_input(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Input, PortKind::Audio)
    }

    pub fn audio_output(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Output, PortKind::Audio)
    }

    pub fn control_input(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Input, PortKind::Control)
    }

    pub fn control_output(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Output, PortKind::Control)
    }

    pub fn midi_input(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Input, PortKind::Event).midi()
    }

    pub fn midi_output(index: u32, symbol: impl Into<String>) -> Self {
        Self::new(index, symbol, PortDirection::Output, PortKind::Event).midi()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn range(mut self, minimum: f32, maximum: f32, default: f32) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self.default = Some(default);
        self
    }

    pub fn default_value(mut self, default: f32) -> Self {
        self.default = Some(default);
        self
    }

    pub fn integer(mut self) -> Self {
        self.properties.integer = true;
        self
    }

    pub fn toggled(mut self) -> Self {
        self.properties.toggled = true;
        self
    }

    pub fn logarithmic(mut self) -> Self {
        self.properties.logarithmic = true;
        self
    }

    pub fn sample_rate(mut self) -> Self {
        self.properties.sample_rate = true;
        self
    }

    pub fn reports_latency(mut self) -> Self {
        self.properties.reports_latency = true;
        self
    }

    pub fn midi(mut self) -> Self {
        self.midi = true;
        self
    }

    pub fn scale_point(mut self, label: impl Into<String>, value: f32) -> Self {
        self.scale_points.push(ScalePoint {
            label: label.into(),
            value,
        });
        self
    }
}

/// Immutable description of one port, with bounds already scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub default_value: f32,
    /// `None` when the plugin declares no lower bound.
    pub lower_bound: Option<f32>,
    /// `None` when the plugin declares no upper bound.
    pub upper_bound: Option<f32>,
    pub properties: PortProperties,
    pub midi: bool,
    pub scale_points: Vec<ScalePoint>,
}

impl PortDescriptor {
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    pub fn is_control_input(&self) -> bool {
        self.kind == PortKind::Control && self.is_input()
    }
}

/// Presentation data for one control port, as consumed by UIs and automation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub label: String,
    pub lower: f32,
    pub upper: f32,
    pub normal: f32,
    pub integer_step: bool,
    pub toggled: bool,
    pub logarithmic: bool,
    pub sample_rate: bool,
    pub step: f32,
    pub smallstep: f32,
    pub largestep: f32,
}

/// Per-plugin-type port table, built once and shared read-only by every instance.
#[derive(Debug, Clone)]
pub struct PortTable {
    ports: Vec<PortDescriptor>,
    by_symbol: HashMap<String, u32>,
    controls: Vec<u32>,
    latency_port: Option<u32>,
}

impl PortTable {
    /// Build the table from declared ports.
    ///
    /// Ports must be indexed `0..n` in order. Sample-rate ports have default and bounds
    /// multiplied by `sample_rate`; defaults outside declared bounds are clamped.
    pub fn build(infos: &[PortInfo], sample_rate: f64) -> Result<Self> {
        let mut ports = Vec::with_capacity(infos.len());
        let mut by_symbol = HashMap::with_capacity(infos.len());
        let mut controls = Vec::new();
        let mut latency_port = None;

        for (position, info) in infos.iter().enumerate() {
            if info.index as usize != position {
                return Err(PluginError::InvalidPorts(format!(
                    "port '{}' has index {}, expected {}",
                    info.symbol, info.index, position
                )));
            }
            if by_symbol.insert(info.symbol.clone(), info.index).is_some() {
                return Err(PluginError::InvalidPorts(format!(
                    "duplicate port symbol '{}'",
                    info.symbol
                )));
            }

            let scale = if info.properties.sample_rate {
                sample_rate as f32
            } else {
                1.0
            };
            let lower_bound = info.minimum.map(|v| v * scale);
            let upper_bound = info.maximum.map(|v| v * scale);
            let mut default_value = info.default.or(info.minimum).unwrap_or(0.0) * scale;

            if let (Some(lower), Some(upper)) = (lower_bound, upper_bound) {
                if lower > upper {
                    return Err(PluginError::InvalidPorts(format!(
                        "port '{}' has minimum {} above maximum {}",
                        info.symbol, lower, upper
                    )));
                }
                if !(lower..=upper).contains(&default_value) {
                    tracing::warn!(
                        "Port '{}' default {} outside [{}, {}], clamping",
                        info.symbol,
                        default_value,
                        lower,
                        upper
                    );
                    default_value = default_value.clamp(lower, upper);
                }
            }

            if info.kind == PortKind::Control {
                controls.push(info.index);
                if info.properties.reports_latency && info.direction == PortDirection::Output {
                    latency_port = Some(info.index);
                }
            }

            ports.push(PortDescriptor {
                index: info.index,
                symbol: info.symbol.clone(),
                name: info.name.clone(),
                direction: info.direction,
                kind: info.kind,
                default_value,
                lower_bound,
                upper_bound,
                properties: info.properties,
                midi: info.midi,
                scale_points: info.scale_points.clone(),
            });
        }

        Ok(Self {
            ports,
            by_symbol,
            controls,
            latency_port,
        })
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&PortDescriptor> {
        self.ports.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.ports.iter()
    }

    /// Parameters are addressed by port index, so this is the port count.
    pub fn parameter_count(&self) -> u32 {
        self.ports.len() as u32
    }

    fn check(&self, index: u32, f: impl Fn(&PortDescriptor) -> bool) -> bool {
        self.get(index).is_some_and(f)
    }

    pub fn is_input(&self, index: u32) -> bool {
        self.check(index, PortDescriptor::is_input)
    }

    pub fn is_output(&self, index: u32) -> bool {
        self.check(index, PortDescriptor::is_output)
    }

    pub fn is_audio(&self, index: u32) -> bool {
        self.check(index, |p| p.kind == PortKind::Audio)
    }

    pub fn is_control(&self, index: u32) -> bool {
        self.check(index, |p| p.kind == PortKind::Control)
    }

    pub fn is_midi(&self, index: u32) -> bool {
        self.check(index, |p| p.kind == PortKind::Event && p.midi)
    }

    pub fn is_event(&self, index: u32) -> bool {
        self.check(index, |p| p.kind == PortKind::Event)
    }

    /// Port index of the `n`-th control port.
    pub fn nth_parameter(&self, n: u32) -> Option<u32> {
        self.controls.get(n as usize).copied()
    }

    pub fn port_index(&self, symbol: &str) -> Option<u32> {
        self.by_symbol.get(symbol).copied()
    }

    /// Control inputs, in port order.
    pub fn automatable(&self) -> impl Iterator<Item = u32> + '_ {
        self.controls
            .iter()
            .copied()
            .filter(|&i| self.is_input(i))
    }

    /// Human-readable port name, or `"??"` for an invalid index.
    pub fn describe(&self, index: u32) -> &str {
        self.get(index).map_or("??", |p| p.name.as_str())
    }

    pub fn scale_points(&self, index: u32) -> &[ScalePoint] {
        self.get(index).map_or(&[], |p| p.scale_points.as_slice())
    }

    pub fn latency_port(&self) -> Option<u32> {
        self.latency_port
    }

    /// Presentation data for a control port. Missing bounds fall back to 0.0 and 1.0.
    pub fn parameter_descriptor(&self, index: u32) -> Option<ParameterDescriptor> {
        let port = self.get(index).filter(|p| p.kind == PortKind::Control)?;
        let lower = port.lower_bound.unwrap_or(0.0);
        let upper = port.upper_bound.unwrap_or(1.0);
        let props = port.properties;

        let (step, smallstep, largestep) = if props.integer {
            (1.0, 0.1, 10.0)
        } else {
            let range = upper - lower;
            (range / 1000.0, range / 10000.0, range / 10.0)
        };

        Some(ParameterDescriptor {
            label: port.name.clone(),
            lower,
            upper,
            normal: port.default_value,
            integer_step: props.integer,
            toggled: props.toggled,
            logarithmic: props.logarithmic,
            sample_rate: props.sample_rate,
            step,
            smallstep,
            largestep,
        })
    }

    fn count(&self, kind: PortKind, direction: PortDirection) -> usize {
        self.ports
            .iter()
            .filter(|p| p.kind == kind && p.direction == direction)
            .count()
    }

    pub fn audio_inputs(&self) -> usize {
        self.count(PortKind::Audio, PortDirection::Input)
    }

    pub fn audio_outputs(&self) -> usize {
        self.count(PortKind::Audio, PortDirection::Output)
    }

    pub fn event_inputs(&self) -> usize {
        self.count(PortKind::Event, PortDirection::Input)
    }

    pub fn event_outputs(&self) -> usize {
        self.count(PortKind::Event, PortDirection::Output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ports() -> Vec<PortInfo> {
        vec![
            PortInfo::audio_input(0, "in"),
            PortInfo::audio_output(1, "out"),
            PortInfo::control_input(2, "gain")
                .name("Gain")
                .range(0.0, 2.0, 1.0),
            PortInfo::control_input(3, "cutoff")
                .range(0.0, 0.5, 0.25)
                .sample_rate()
                .logarithmic(),
            PortInfo::control_input(4, "voices")
                .range(1.0, 16.0, 4.0)
                .integer()
                .scale_point("Mono", 1.0),
            PortInfo::control_output(5, "latency").reports_latency(),
            PortInfo::midi_input(6, "midi_in"),
            PortInfo::new(7, "cv", PortDirection::Input, PortKind::Unknown),
        ]
    }

    #[test]
    fn test_build_and_query() {
        let table = PortTable::build(&ports(), 48000.0).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(table.parameter_count(), 8);
        assert!(table.is_audio(0) && table.is_input(0));
        assert!(table.is_output(1));
        assert!(table.is_control(2));
        assert!(table.is_midi(6));
        assert!(!table.is_midi(0));
        assert!(!table.is_audio(42));
        assert_eq!(table.port_index("gain"), Some(2));
        assert_eq!(table.port_index("missing"), None);
        assert_eq!(table.latency_port(), Some(5));
        assert_eq!(table.audio_inputs(), 1);
        assert_eq!(table.audio_outputs(), 1);
        assert_eq!(table.event_inputs(), 1);
        assert_eq!(table.event_outputs(), 0);
    }

    #[test]
    fn test_sample_rate_scaling() {
        let table = PortTable::build(&ports(), 48000.0).unwrap();
        let cutoff = table.get(3).unwrap();
        assert_relative_eq!(cutoff.default_value, 12000.0);
        assert_eq!(cutoff.lower_bound, Some(0.0));
        assert_eq!(cutoff.upper_bound, Some(24000.0));
    }

    #[test]
    fn test_parameters() {
        let table = PortTable::build(&ports(), 44100.0).unwrap();
        assert_eq!(table.nth_parameter(0), Some(2));
        assert_eq!(table.nth_parameter(3), Some(5));
        assert_eq!(table.nth_parameter(4), None);
        assert_eq!(table.automatable().collect::<Vec<_>>(), [2, 3, 4]);
        assert_eq!(table.describe(2), "Gain");
        assert_eq!(table.describe(99), "??");
        assert_eq!(table.scale_points(4)[0].label, "Mono");
        assert!(table.scale_points(99).is_empty());
    }

    #[test]
    fn test_parameter_descriptor_steps() {
        let table = PortTable::build(&ports(), 44100.0).unwrap();

        let gain = table.parameter_descriptor(2).unwrap();
        assert_relative_eq!(gain.step, 0.002);
        assert_relative_eq!(gain.smallstep, 0.0002);
        assert_relative_eq!(gain.largestep, 0.2);
        assert_relative_eq!(gain.normal, 1.0);

        let voices = table.parameter_descriptor(4).unwrap();
        assert!(voices.integer_step);
        assert_eq!((voices.step, voices.smallstep, voices.largestep), (1.0, 0.1, 10.0));

        // Unbounded ports fall back to [0, 1].
        let latency = table.parameter_descriptor(5).unwrap();
        assert_eq!((latency.lower, latency.upper), (0.0, 1.0));

        assert!(table.parameter_descriptor(0).is_none());
    }

    #[test]
    fn test_default_is_clamped() {
        let infos = [PortInfo::control_input(0, "x").range(0.0, 1.0, 3.0)];
        let table = PortTable::build(&infos, 44100.0).unwrap();
        assert_eq!(table.get(0).unwrap().default_value, 1.0);
    }

    #[test]
    fn test_missing_default_uses_minimum() {
        let mut info = PortInfo::control_input(0, "x");
        info.minimum = Some(-6.0);
        let table = PortTable::build(&[info], 44100.0).unwrap();
        assert_eq!(table.get(0).unwrap().default_value, -6.0);
        assert_eq!(table.get(0).unwrap().upper_bound, None);
    }

    #[test]
    fn test_rejects_bad_declarations() {
        let gap = [PortInfo::audio_input(0, "a"), PortInfo::audio_input(2, "b")];
        assert!(matches!(
            PortTable::build(&gap, 44100.0),
            Err(PluginError::InvalidPorts(_))
        ));

        let dup = [PortInfo::audio_input(0, "a"), PortInfo::audio_output(1, "a")];
        assert!(PortTable::build(&dup, 44100.0).is_err());

        let inverted = [PortInfo::control_input(0, "x").range(1.0, 0.0, 0.5)];
        assert!(PortTable::build(&inverted, 44100.0).is_err());
    }
}
