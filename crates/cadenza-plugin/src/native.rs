//! The seam between the host and a plugin implementation.
//!
//! [`NativePlugin`] is the per-instance callback table: connect ports, activate, run,
//! deactivate, query extensions. Loaded C libraries implement it over their descriptor
//! (see the `ffi` module); in-process plugins and test doubles implement it directly.

use crate::metadata::PluginMetadata;
use crate::port::PortInfo;
use crate::state::StateInterface;
use cadenza_core::{HostUris, UriMap};
use std::ffi::c_void;
use std::sync::Arc;

/// A buffer address handed to a plugin port.
///
/// Audio ports point at `f32` samples, control ports at a single `f32`, event ports at an
/// event buffer header. The host keeps the memory alive while it is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPtr(*mut c_void);

// SAFETY: a PortPtr is only an address; the host serializes every access to the memory
// behind it with the plugin's run() on the audio thread.
unsafe impl Send for PortPtr {}

impl PortPtr {
    pub const NULL: PortPtr = PortPtr(std::ptr::null_mut());

    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// # Safety
    ///
    /// Must point at `nframes` samples valid for `'a` and not written elsewhere.
    pub unsafe fn audio<'a>(self, nframes: u32) -> &'a [f32] {
        std::slice::from_raw_parts(self.0 as *const f32, nframes as usize)
    }

    /// # Safety
    ///
    /// Must point at `nframes` samples valid for `'a`. May alias an input buffer when the
    /// host processes in place; read inputs before writing outputs.
    pub unsafe fn audio_mut<'a>(self, nframes: u32) -> &'a mut [f32] {
        std::slice::from_raw_parts_mut(self.0 as *mut f32, nframes as usize)
    }

    /// # Safety
    ///
    /// Must point at a connected control value.
    pub unsafe fn control(self) -> f32 {
        *(self.0 as *const f32)
    }

    /// # Safety
    ///
    /// Must point at a connected control output value.
    pub unsafe fn set_control(self, value: f32) {
        *(self.0 as *mut f32) = value;
    }
}

/// Optional interfaces a plugin may expose.
pub enum Extension<'a> {
    State(&'a mut dyn StateInterface),
}

/// One instantiated plugin.
///
/// All methods are called from a single thread at a time. `run` is called on the audio
/// thread and must not allocate, lock or block.
pub trait NativePlugin: Send {
    /// Bind a port to host memory. The pointer stays valid until the next call for the
    /// same port.
    fn connect_port(&mut self, index: u32, data: PortPtr);

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    /// Process `nframes` frames using the currently connected buffers.
    fn run(&mut self, nframes: u32);

    /// Look up an extension by URI.
    fn extension_data(&mut self, _uri: &str) -> Option<Extension<'_>> {
        None
    }
}

/// Host services offered to a plugin at instantiation.
#[derive(Debug, Clone)]
pub struct HostFeatures {
    pub uri_map: Arc<UriMap>,
    pub uris: HostUris,
}

impl HostFeatures {
    pub fn new(uri_map: Arc<UriMap>) -> Self {
        let uris = HostUris::new(&uri_map);
        Self { uri_map, uris }
    }
}

/// Creates instances of one plugin type.
pub trait PluginFactory: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Declared ports, indexed from 0 without gaps.
    fn ports(&self) -> &[PortInfo];

    /// Instantiate the plugin. `None` means the plugin refused to instantiate.
    fn instantiate(
        &self,
        sample_rate: f64,
        features: &HostFeatures,
    ) -> Option<Box<dyn NativePlugin>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_ptr_access() {
        let mut samples = [0.5f32, -0.5, 0.25];
        let ptr = PortPtr::from_raw(samples.as_mut_ptr().cast());
        assert!(!ptr.is_null());
        unsafe {
            assert_eq!(ptr.audio(3), &[0.5, -0.5, 0.25]);
            ptr.audio_mut(2)[1] = 1.0;
            assert_eq!(ptr.control(), 0.5);
            ptr.set_control(2.0);
        }
        assert_eq!(samples, [2.0, 1.0, 0.25]);
        assert!(PortPtr::NULL.is_null());
    }

    #[test]
    fn test_host_features_intern_host_uris() {
        let map = Arc::new(UriMap::new());
        let features = HostFeatures::new(Arc::clone(&map));
        assert_eq!(
            map.lookup(cadenza_core::uris::ATOM_SEQUENCE),
            Some(features.uris.atom_sequence)
        );
    }
}
