//! LV2 shared-library loader
//!
//! Opens a plugin library, enumerates its `lv2_descriptor` table and adapts each
//! descriptor's function pointers to [`NativePlugin`]. The host offers the URID map and
//! unmap features, backed by the shared [`UriMap`], and exposes the C state extension as a
//! [`StateInterface`].
//!
//! Port metadata is not read from the bundle; callers supply it as [`PortInfo`]s.

use crate::error::{LoadStage, PluginError, Result, StateError};
use crate::metadata::PluginMetadata;
use crate::native::{Extension, HostFeatures, NativePlugin, PluginFactory, PortPtr};
use crate::port::PortInfo;
use crate::state::{StateFlags, StateInterface, StatePaths, StateSink, StateSource};
use cadenza_core::{uris, UriMap, Urid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use lv2_sys::{
    LV2_Descriptor, LV2_Feature, LV2_Handle, LV2_State_Handle, LV2_State_Interface,
    LV2_State_Status, LV2_URID_Map, LV2_URID_Map_Handle, LV2_URID_Unmap,
    LV2_URID_Unmap_Handle, LV2_STATE__interface, LV2_URID__map, LV2_URID__unmap,
};

/// Upper bound on descriptors read from one library.
const MAX_DESCRIPTORS: u32 = 4096;

/// The `lv2-sys` URI constants are NUL-terminated byte strings.
fn c_uri(uri: &'static [u8]) -> *const c_char {
    uri.as_ptr().cast()
}

type DescriptorFn = unsafe extern "C" fn(index: u32) -> *const LV2_Descriptor;

// ============================================================================
// URID features
// ============================================================================

struct UridHost {
    uri_map: Arc<UriMap>,
    /// Strings handed out by unmap; they must outlive the plugin.
    unmapped: Mutex<HashMap<Urid, CString>>,
}

unsafe extern "C" fn urid_map(handle: LV2_URID_Map_Handle, uri: *const c_char) -> Urid {
    if handle.is_null() || uri.is_null() {
        return 0;
    }
    // SAFETY: handle is the UridHost boxed in the plugin's UridFeatures.
    let host = &*(handle as *const UridHost);
    match CStr::from_ptr(uri).to_str() {
        Ok(uri) => host.uri_map.map(uri),
        Err(_) => 0,
    }
}

unsafe extern "C" fn urid_unmap(handle: LV2_URID_Unmap_Handle, urid: Urid) -> *const c_char {
    if handle.is_null() {
        return ptr::null();
    }
    // SAFETY: as in urid_map.
    let host = &*(handle as *const UridHost);
    let mut unmapped = host.unmapped.lock();
    if let Some(uri) = unmapped.get(&urid) {
        return uri.as_ptr();
    }
    let Some(uri) = host.uri_map.unmap(urid) else {
        return ptr::null();
    };
    let Ok(uri) = CString::new(uri.as_bytes()) else {
        return ptr::null();
    };
    // The CString's heap buffer does not move when the map rehashes.
    let ptr = uri.as_ptr();
    unmapped.insert(urid, uri);
    ptr
}

/// NULL-terminated feature array offered to one plugin instance.
pub(crate) struct UridFeatures {
    _host: Box<UridHost>,
    _map: Box<LV2_URID_Map>,
    _unmap: Box<LV2_URID_Unmap>,
    _features: Box<[LV2_Feature; 2]>,
    list: Box<[*const LV2_Feature; 3]>,
}

impl UridFeatures {
    pub(crate) fn new(uri_map: Arc<UriMap>) -> Self {
        let host = Box::new(UridHost {
            uri_map,
            unmapped: Mutex::new(HashMap::new()),
        });
        let handle = &*host as *const UridHost as *mut c_void;
        let map = Box::new(LV2_URID_Map {
            handle,
            map: Some(urid_map),
        });
        let unmap = Box::new(LV2_URID_Unmap {
            handle,
            unmap: Some(urid_unmap),
        });
        let features = Box::new([
            LV2_Feature {
                URI: c_uri(LV2_URID__map),
                data: &*map as *const LV2_URID_Map as *mut c_void,
            },
            LV2_Feature {
                URI: c_uri(LV2_URID__unmap),
                data: &*unmap as *const LV2_URID_Unmap as *mut c_void,
            },
        ]);
        let list = Box::new([
            &features[0] as *const LV2_Feature,
            &features[1] as *const LV2_Feature,
            ptr::null(),
        ]);
        Self {
            _host: host,
            _map: map,
            _unmap: unmap,
            _features: features,
            list,
        }
    }

    pub(crate) fn as_ptr(&self) -> *const *const LV2_Feature {
        self.list.as_ptr()
    }
}

// ============================================================================
// Library
// ============================================================================

#[derive(Clone, Copy)]
struct DescriptorPtr(*const LV2_Descriptor);

// SAFETY: descriptors are immutable static data of the plugin library, kept loaded by the
// Arc<Library> stored next to every DescriptorPtr.
unsafe impl Send for DescriptorPtr {}
unsafe impl Sync for DescriptorPtr {}

/// An opened plugin library.
pub struct Lv2Library {
    path: PathBuf,
    library: Arc<libloading::Library>,
    descriptors: Vec<(String, DescriptorPtr)>,
}

impl Lv2Library {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // SAFETY: opening runs the library's initializers; plugin libraries are trusted.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            PluginError::LibraryFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let descriptors = {
            // SAFETY: lv2_descriptor has this signature in every LV2 library.
            let entry: libloading::Symbol<DescriptorFn> =
                unsafe { library.get(b"lv2_descriptor\0") }.map_err(|e| {
                    PluginError::LoadFailed {
                        uri: path.display().to_string(),
                        stage: LoadStage::Descriptor,
                        reason: format!("No lv2_descriptor symbol: {}", e),
                    }
                })?;

            let mut descriptors = Vec::new();
            for index in 0..MAX_DESCRIPTORS {
                // SAFETY: the table ends with the first null entry.
                let descriptor = unsafe { entry(index) };
                if descriptor.is_null() {
                    break;
                }
                // SAFETY: non-null descriptors point at static data.
                let uri = unsafe { (*descriptor).URI };
                if uri.is_null() {
                    tracing::warn!("Descriptor {} of {} has no URI", index, path.display());
                    continue;
                }
                let uri = unsafe { CStr::from_ptr(uri) }.to_string_lossy().into_owned();
                descriptors.push((uri, DescriptorPtr(descriptor)));
            }
            descriptors
        };

        tracing::info!(
            "Opened {} ({} plugins)",
            path.display(),
            descriptors.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
            descriptors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// URIs of the plugins in this library, in descriptor order.
    pub fn plugin_uris(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|(uri, _)| uri.as_str())
    }

    /// Factory for the plugin named by `metadata.uri`.
    pub fn factory(&self, metadata: PluginMetadata, ports: Vec<PortInfo>) -> Result<ForeignFactory> {
        let (_, descriptor) = self
            .descriptors
            .iter()
            .find(|(uri, _)| *uri == metadata.uri)
            .ok_or_else(|| PluginError::UnknownPlugin(metadata.uri.clone()))?;
        let bundle = bundle_path(self.path.parent().unwrap_or(Path::new(".")), &metadata.uri)?;
        Ok(ForeignFactory {
            descriptor: *descriptor,
            bundle,
            metadata,
            ports,
            library: Some(Arc::clone(&self.library)),
        })
    }
}

impl std::fmt::Debug for Lv2Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lv2Library")
            .field("path", &self.path)
            .field("plugins", &self.descriptors.len())
            .finish()
    }
}

/// Bundle directory with the trailing separator plugins expect.
fn bundle_path(dir: &Path, uri: &str) -> Result<CString> {
    let mut bundle = dir.as_os_str().to_string_lossy().into_owned();
    if !bundle.ends_with(std::path::MAIN_SEPARATOR) {
        bundle.push(std::path::MAIN_SEPARATOR);
    }
    CString::new(bundle).map_err(|e| PluginError::LoadFailed {
        uri: uri.to_string(),
        stage: LoadStage::Opening,
        reason: format!("Invalid bundle path: {}", e),
    })
}

// ============================================================================
// Factory and instance
// ============================================================================

/// Factory over one C descriptor.
pub struct ForeignFactory {
    descriptor: DescriptorPtr,
    bundle: CString,
    metadata: PluginMetadata,
    ports: Vec<PortInfo>,
    library: Option<Arc<libloading::Library>>,
}

impl ForeignFactory {
    /// Wrap a descriptor that is not owned by an [`Lv2Library`], such as one linked into
    /// the host binary.
    ///
    /// # Safety
    ///
    /// `descriptor` must be a valid LV2 descriptor that outlives the factory and every
    /// instance created from it.
    pub unsafe fn from_descriptor(
        descriptor: *const LV2_Descriptor,
        bundle: &Path,
        metadata: PluginMetadata,
        ports: Vec<PortInfo>,
    ) -> Result<Self> {
        let bundle = bundle_path(bundle, &metadata.uri)?;
        Ok(Self {
            descriptor: DescriptorPtr(descriptor),
            bundle,
            metadata,
            ports,
            library: None,
        })
    }
}

impl PluginFactory for ForeignFactory {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    fn instantiate(
        &self,
        sample_rate: f64,
        features: &HostFeatures,
    ) -> Option<Box<dyn NativePlugin>> {
        // SAFETY: valid for the factory's lifetime, see DescriptorPtr.
        let descriptor = unsafe { &*self.descriptor.0 };
        let (Some(instantiate), Some(_), Some(_), Some(_)) = (
            descriptor.instantiate,
            descriptor.connect_port,
            descriptor.run,
            descriptor.cleanup,
        ) else {
            tracing::error!("Descriptor of {} lacks required functions", self.metadata.uri);
            return None;
        };

        let urid_features = Box::new(UridFeatures::new(Arc::clone(&features.uri_map)));
        // SAFETY: every pointer passed stays valid for the instance's lifetime; the feature
        // list is owned by the ForeignPlugin below.
        let handle = unsafe {
            instantiate(
                self.descriptor.0,
                sample_rate,
                self.bundle.as_ptr(),
                urid_features.as_ptr(),
            )
        };
        if handle.is_null() {
            return None;
        }

        Some(Box::new(ForeignPlugin {
            handle,
            descriptor: self.descriptor,
            state: None,
            features: urid_features,
            _library: self.library.clone(),
        }))
    }
}

/// A plugin instance driven through its C function table.
pub struct ForeignPlugin {
    handle: LV2_Handle,
    descriptor: DescriptorPtr,
    state: Option<ForeignState>,
    features: Box<UridFeatures>,
    // Dropped last: code and descriptor live in the library.
    _library: Option<Arc<libloading::Library>>,
}

// SAFETY: the host serializes every call into the instance; LV2 instances may move between
// threads as long as calls do not overlap.
unsafe impl Send for ForeignPlugin {}

impl ForeignPlugin {
    fn descriptor(&self) -> &LV2_Descriptor {
        // SAFETY: see DescriptorPtr.
        unsafe { &*self.descriptor.0 }
    }
}

impl NativePlugin for ForeignPlugin {
    fn connect_port(&mut self, index: u32, data: PortPtr) {
        if let Some(connect) = self.descriptor().connect_port {
            // SAFETY: handle is live until Drop; the host guarantees the buffer.
            unsafe { connect(self.handle, index, data.as_raw()) };
        }
    }

    fn activate(&mut self) {
        if let Some(activate) = self.descriptor().activate {
            unsafe { activate(self.handle) };
        }
    }

    fn deactivate(&mut self) {
        if let Some(deactivate) = self.descriptor().deactivate {
            unsafe { deactivate(self.handle) };
        }
    }

    fn run(&mut self, nframes: u32) {
        if let Some(run) = self.descriptor().run {
            unsafe { run(self.handle, nframes) };
        }
    }

    fn extension_data(&mut self, uri: &str) -> Option<Extension<'_>> {
        if uri != uris::STATE_INTERFACE {
            return None;
        }
        if self.state.is_none() {
            let extension_data = self.descriptor().extension_data?;
            // SAFETY: extension_data takes a NUL-terminated URI and returns static data.
            let iface =
                unsafe { extension_data(c_uri(LV2_STATE__interface)) } as *const LV2_State_Interface;
            if iface.is_null() {
                return None;
            }
            self.state = Some(ForeignState {
                iface,
                instance: self.handle,
                features: self.features.as_ptr(),
            });
        }
        self.state.as_mut().map(|state| Extension::State(state))
    }
}

impl Drop for ForeignPlugin {
    fn drop(&mut self) {
        if let Some(cleanup) = self.descriptor().cleanup {
            // SAFETY: the handle is not used after this.
            unsafe { cleanup(self.handle) };
        }
    }
}

/// The C state extension of one instance.
///
/// No map-path feature is offered, so foreign plugins cannot save files of their own.
struct ForeignState {
    iface: *const LV2_State_Interface,
    instance: LV2_Handle,
    features: *const *const LV2_Feature,
}

struct StoreContext<'a> {
    sink: &'a mut dyn StateSink,
}

struct RetrieveContext<'a> {
    source: &'a dyn StateSource,
}

fn to_status(result: std::result::Result<(), StateError>) -> LV2_State_Status {
    match result {
        Ok(()) => 0,
        Err(e) => e.code() as LV2_State_Status,
    }
}

unsafe extern "C" fn store_value(
    handle: LV2_State_Handle,
    key: Urid,
    value: *const c_void,
    size: usize,
    value_type: Urid,
    flags: u32,
) -> LV2_State_Status {
    if handle.is_null() || (value.is_null() && size > 0) {
        return to_status(Err(StateError::Unknown));
    }
    // SAFETY: handle is the StoreContext on ForeignState::save's stack.
    let context = &mut *(handle as *mut StoreContext<'_>);
    let bytes = if size == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(value as *const u8, size)
    };
    to_status(
        context
            .sink
            .store(key, bytes, value_type, StateFlags::from_bits_truncate(flags)),
    )
}

unsafe extern "C" fn retrieve_value(
    handle: LV2_State_Handle,
    key: Urid,
    size: *mut usize,
    value_type: *mut Urid,
    flags: *mut u32,
) -> *const c_void {
    if handle.is_null() {
        return ptr::null();
    }
    // SAFETY: handle is the RetrieveContext on ForeignState::restore's stack.
    let context = &*(handle as *const RetrieveContext<'_>);
    let Some(value) = context.source.retrieve(key) else {
        return ptr::null();
    };
    if !size.is_null() {
        *size = value.value.len();
    }
    if !value_type.is_null() {
        *value_type = value.value_type;
    }
    if !flags.is_null() {
        *flags = value.flags.bits();
    }
    value.value.as_ptr().cast()
}

impl StateInterface for ForeignState {
    fn save(
        &mut self,
        sink: &mut dyn StateSink,
        flags: StateFlags,
        _paths: Option<&StatePaths>,
    ) -> std::result::Result<(), StateError> {
        // SAFETY: iface came from the plugin's extension_data and is static.
        let Some(save) = (unsafe { &*self.iface }).save else {
            return Err(StateError::NoFeature);
        };
        let mut context = StoreContext { sink };
        let status = unsafe {
            save(
                self.instance,
                Some(store_value),
                &mut context as *mut StoreContext<'_> as *mut c_void,
                flags.bits(),
                self.features,
            )
        };
        StateError::check(status as u32)
    }

    fn restore(
        &mut self,
        source: &dyn StateSource,
        flags: StateFlags,
        _paths: Option<&StatePaths>,
    ) -> std::result::Result<(), StateError> {
        // SAFETY: as in save.
        let Some(restore) = (unsafe { &*self.iface }).restore else {
            return Err(StateError::NoFeature);
        };
        let context = RetrieveContext { source };
        let status = unsafe {
            restore(
                self.instance,
                Some(retrieve_value),
                &context as *const RetrieveContext<'_> as *mut c_void,
                flags.bits(),
                self.features,
            )
        };
        StateError::check(status as u32)
    }
}

// ============================================================================
// Discovery helpers
// ============================================================================

/// Directories searched for bundles: `LV2_PATH` if set, otherwise the platform defaults.
pub fn search_paths() -> Vec<PathBuf> {
    match std::env::var_os("LV2_PATH") {
        Some(value) => std::env::split_paths(&value).collect(),
        None => default_search_paths(),
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();

    #[cfg(target_os = "macos")]
    {
        vec![
            home.join("Library/Audio/Plug-Ins/LV2"),
            PathBuf::from("/Library/Audio/Plug-Ins/LV2"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let _ = home;
        let mut paths = Vec::new();
        if let Some(appdata) = std::env::var_os("APPDATA") {
            paths.push(PathBuf::from(appdata).join("LV2"));
        }
        if let Some(common) = std::env::var_os("COMMONPROGRAMFILES") {
            paths.push(PathBuf::from(common).join("LV2"));
        }
        paths
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            home.join(".lv2"),
            PathBuf::from("/usr/local/lib/lv2"),
            PathBuf::from("/usr/lib/lv2"),
        ]
    }
}

fn is_plugin_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("so" | "dylib" | "dll")
    )
}

/// Shared libraries inside the `*.lv2` bundles of `dir`, sorted.
pub fn find_libraries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let bundle = entry?.path();
        if !bundle.is_dir() || bundle.extension().and_then(|s| s.to_str()) != Some("lv2") {
            continue;
        }
        let files = match std::fs::read_dir(&bundle) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", bundle.display(), e);
                continue;
            }
        };
        for file in files.flatten() {
            let path = file.path();
            if path.is_file() && is_plugin_library(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
