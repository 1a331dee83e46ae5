//! The seam between the safe conversion flow and the native entry points.
//!
//! [`NativeLibrary`] mirrors the wkhtmltox C API one method per entry point,
//! with the PDF and image families folded together through [`Kind`] wherever
//! their signatures match. [`crate::loader::Library`] implements it over the
//! real symbols; [`crate::mock::MockLibrary`] implements it in-process.
//!
//! All methods must only be called from the executor's worker thread.

use crate::loader::Library;
use crate::progress::Progress;
use crate::sys;
use crate::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int, c_uchar};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Which native family a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Pdf,
    Image,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Pdf => f.write_str("wkhtmltopdf"),
            Kind::Image => f.write_str("wkhtmltoimage"),
        }
    }
}

/// Opaque, non-null pointer to a native object (settings or converter).
///
/// Rust code never dereferences it; it is only handed back to the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonNull<std::ffi::c_void>);

impl Handle {
    /// Wrap a raw pointer, `None` when it is null.
    pub fn from_raw(ptr: *mut std::ffi::c_void) -> Option<Self> {
        NonNull::new(ptr).map(Handle)
    }

    /// The raw pointer to pass back across the boundary
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0.as_ptr()
    }

    /// Stable address, usable as a map key
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Receiver of the callbacks a converter issues while `convert` runs.
///
/// Invoked synchronously on the worker thread, before `convert` returns.
pub trait ConverterEvents: Send + Sync {
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    fn phase_changed(&self, progress: &Progress);
    fn progress_changed(&self, progress: &Progress);
    fn finished(&self, success: bool);
}

/// The native entry-point catalogue.
///
/// Handles passed in must come from the same implementation. Ownership rules
/// follow the C API: global settings belong to the converter created from
/// them, object settings belong to the converter they were added to.
pub trait NativeLibrary: Send + Sync {
    /// `*_init`; `true` on success
    fn init(&self, kind: Kind, use_graphics: bool) -> bool;
    /// `*_deinit`; after this no other call is allowed
    fn deinit(&self, kind: Kind) -> bool;
    fn version(&self, kind: Kind) -> String;
    /// Whether the library was built against wkhtmltopdf's patched Qt
    fn extended_qt(&self, kind: Kind) -> bool;

    fn create_global_settings(&self, kind: Kind) -> Result<Handle>;
    /// `false` when the library rejected the setting
    fn set_global_setting(&self, kind: Kind, settings: Handle, name: &str, value: &str) -> bool;
    fn get_global_setting(&self, kind: Kind, settings: Handle, name: &str) -> Option<String>;
    fn destroy_global_settings(&self, kind: Kind, settings: Handle);

    fn create_object_settings(&self) -> Result<Handle>;
    fn set_object_setting(&self, settings: Handle, name: &str, value: &str) -> bool;
    fn get_object_setting(&self, settings: Handle, name: &str) -> Option<String>;
    fn destroy_object_settings(&self, settings: Handle);

    /// Consumes `settings`. `data` is the HTML payload for images and is
    /// ignored for PDFs.
    fn create_converter(&self, kind: Kind, settings: Handle, data: Option<&str>) -> Result<Handle>;
    fn install_callbacks(&self, kind: Kind, converter: Handle, events: Arc<dyn ConverterEvents>);
    /// Consumes `settings`; objects end up in the document in the order added.
    fn add_object(&self, converter: Handle, settings: Handle, data: Option<&str>);
    /// Runs the conversion, firing callbacks along the way. `true` on success.
    fn convert(&self, kind: Kind, converter: Handle) -> bool;
    /// Copy of the in-memory output (empty when `out` was set)
    fn output(&self, kind: Kind, converter: Handle) -> Vec<u8>;

    fn current_phase(&self, kind: Kind, converter: Handle) -> i32;
    fn phase_count(&self, kind: Kind, converter: Handle) -> i32;
    fn phase_description(&self, kind: Kind, converter: Handle, phase: i32) -> String;
    fn progress_string(&self, kind: Kind, converter: Handle) -> String;
    /// Largest HTTP status >= 300 seen while loading, 0 if none
    fn http_error_code(&self, kind: Kind, converter: Handle) -> i32;

    fn destroy_converter(&self, kind: Kind, converter: Handle);
}

/// Convert to a C string; the native side would stop at the first NUL
/// anyway, so everything after it is dropped here.
pub(crate) fn c_string(s: &str) -> CString {
    let end = s.find('\0').unwrap_or(s.len());
    CString::new(&s[..end]).unwrap_or_default()
}

/// Copy a library-owned UTF-8 string; null becomes empty.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
unsafe fn copy_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

const SETTING_BUFFER_LEN: usize = 4096;

/// Phase query functions needed to build a [`Progress`] from inside a callback.
#[derive(Clone, Copy)]
struct PhaseProbe {
    current_phase: unsafe extern "C" fn(*mut sys::converter) -> c_int,
    phase_count: unsafe extern "C" fn(*mut sys::converter) -> c_int,
    phase_description: unsafe extern "C" fn(*mut sys::converter, c_int) -> *const c_char,
}

impl PhaseProbe {
    /// # Safety
    /// `converter` must be a live converter of the family this probe was
    /// taken from.
    unsafe fn snapshot(&self, converter: *mut sys::converter, percent: c_int) -> Progress {
        let phase = (self.current_phase)(converter);
        let count = (self.phase_count)(converter);
        let description = copy_c_str((self.phase_description)(converter, phase));
        Progress::from_native(phase, description, count, percent)
    }
}

struct Registration {
    events: Arc<dyn ConverterEvents>,
    probe: PhaseProbe,
}

// Trampolines only receive the converter pointer, so registrations are
// looked up by its address.
static CALLBACKS: OnceLock<Mutex<HashMap<usize, Registration>>> = OnceLock::new();

fn callbacks() -> MutexGuard<'static, HashMap<usize, Registration>> {
    CALLBACKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn register(converter: Handle, registration: Registration) {
    callbacks().insert(converter.addr(), registration);
}

fn unregister(converter: Handle) {
    callbacks().remove(&converter.addr());
}

fn registration(converter: *mut sys::converter) -> Option<(Arc<dyn ConverterEvents>, PhaseProbe)> {
    callbacks()
        .get(&(converter as usize))
        .map(|r| (Arc::clone(&r.events), r.probe))
}

unsafe extern "C" fn on_warning(converter: *mut sys::converter, message: *const c_char) {
    if let Some((events, _)) = registration(converter) {
        events.warning(&copy_c_str(message));
    }
}

unsafe extern "C" fn on_error(converter: *mut sys::converter, message: *const c_char) {
    if let Some((events, _)) = registration(converter) {
        events.error(&copy_c_str(message));
    }
}

unsafe extern "C" fn on_phase_changed(converter: *mut sys::converter) {
    if let Some((events, probe)) = registration(converter) {
        events.phase_changed(&probe.snapshot(converter, 0));
    }
}

unsafe extern "C" fn on_progress_changed(converter: *mut sys::converter, percent: c_int) {
    if let Some((events, probe)) = registration(converter) {
        events.progress_changed(&probe.snapshot(converter, percent));
    }
}

unsafe extern "C" fn on_finished(converter: *mut sys::converter, value: c_int) {
    if let Some((events, _)) = registration(converter) {
        events.finished(value == 1);
    }
}

impl Library {
    fn common(&self, kind: Kind) -> &sys::CommonFns {
        match kind {
            Kind::Pdf => &self.pdf.common,
            Kind::Image => &self.image.common,
        }
    }

    fn read_setting(
        get: unsafe extern "C" fn(*mut std::ffi::c_void, *const c_char, *mut c_char, c_int) -> c_int,
        settings: Handle,
        name: &str,
    ) -> Option<String> {
        let name = c_string(name);
        let mut buf = vec![0u8; SETTING_BUFFER_LEN];
        // SAFETY: the buffer length passed matches the allocation; the
        // library NUL-terminates within it.
        let ok = unsafe {
            get(
                settings.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                buf.len() as c_int,
            )
        };
        if ok != 1 {
            return None;
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Some(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

// SAFETY (all blocks below): handles originate from this library and are
// used on the single worker thread, as the NativeLibrary contract requires.
impl NativeLibrary for Library {
    fn init(&self, kind: Kind, use_graphics: bool) -> bool {
        unsafe { (self.common(kind).init)(use_graphics as c_int) == 1 }
    }

    fn deinit(&self, kind: Kind) -> bool {
        unsafe { (self.common(kind).deinit)() == 1 }
    }

    fn version(&self, kind: Kind) -> String {
        unsafe { copy_c_str((self.common(kind).version)()) }
    }

    fn extended_qt(&self, kind: Kind) -> bool {
        unsafe { (self.common(kind).extended_qt)() == 1 }
    }

    fn create_global_settings(&self, kind: Kind) -> Result<Handle> {
        let raw = unsafe { (self.common(kind).create_global_settings)() };
        Handle::from_raw(raw)
            .ok_or_else(|| Error::NativeError(format!("{}_create_global_settings returned null", kind)))
    }

    fn set_global_setting(&self, kind: Kind, settings: Handle, name: &str, value: &str) -> bool {
        let (name, value) = (c_string(name), c_string(value));
        unsafe {
            (self.common(kind).set_global_setting)(settings.as_ptr(), name.as_ptr(), value.as_ptr()) == 1
        }
    }

    fn get_global_setting(&self, kind: Kind, settings: Handle, name: &str) -> Option<String> {
        Self::read_setting(self.common(kind).get_global_setting, settings, name)
    }

    fn destroy_global_settings(&self, kind: Kind, settings: Handle) {
        unsafe { (self.common(kind).destroy_global_settings)(settings.as_ptr()) }
    }

    fn create_object_settings(&self) -> Result<Handle> {
        let raw = unsafe { (self.pdf.create_object_settings)() };
        Handle::from_raw(raw)
            .ok_or_else(|| Error::NativeError("wkhtmltopdf_create_object_settings returned null".into()))
    }

    fn set_object_setting(&self, settings: Handle, name: &str, value: &str) -> bool {
        let (name, value) = (c_string(name), c_string(value));
        unsafe { (self.pdf.set_object_setting)(settings.as_ptr(), name.as_ptr(), value.as_ptr()) == 1 }
    }

    fn get_object_setting(&self, settings: Handle, name: &str) -> Option<String> {
        Self::read_setting(self.pdf.get_object_setting, settings, name)
    }

    fn destroy_object_settings(&self, settings: Handle) {
        unsafe { (self.pdf.destroy_object_settings)(settings.as_ptr()) }
    }

    fn create_converter(&self, kind: Kind, settings: Handle, data: Option<&str>) -> Result<Handle> {
        let raw = match kind {
            Kind::Pdf => unsafe { (self.pdf.create_converter)(settings.as_ptr()) },
            Kind::Image => {
                let data = data.map(c_string);
                let data_ptr = data.as_ref().map_or(ptr::null(), |d| d.as_ptr());
                unsafe { (self.image.create_converter)(settings.as_ptr(), data_ptr) }
            }
        };
        Handle::from_raw(raw).ok_or_else(|| Error::NativeError(format!("{}_create_converter returned null", kind)))
    }

    fn install_callbacks(&self, kind: Kind, converter: Handle, events: Arc<dyn ConverterEvents>) {
        let fns = self.common(kind);
        let probe = PhaseProbe {
            current_phase: fns.current_phase,
            phase_count: fns.phase_count,
            phase_description: fns.phase_description,
        };
        register(converter, Registration { events, probe });
        let c = converter.as_ptr();
        unsafe {
            (fns.set_warning_callback)(c, Some(on_warning));
            (fns.set_error_callback)(c, Some(on_error));
            (fns.set_phase_changed_callback)(c, Some(on_phase_changed));
            (fns.set_progress_changed_callback)(c, Some(on_progress_changed));
            (fns.set_finished_callback)(c, Some(on_finished));
        }
    }

    fn add_object(&self, converter: Handle, settings: Handle, data: Option<&str>) {
        let data = data.map(c_string);
        let data_ptr = data.as_ref().map_or(ptr::null(), |d| d.as_ptr());
        unsafe { (self.pdf.add_object)(converter.as_ptr(), settings.as_ptr(), data_ptr) }
    }

    fn convert(&self, kind: Kind, converter: Handle) -> bool {
        unsafe { (self.common(kind).convert)(converter.as_ptr()) == 1 }
    }

    fn output(&self, kind: Kind, converter: Handle) -> Vec<u8> {
        let mut data: *const c_uchar = ptr::null();
        let len = unsafe { (self.common(kind).get_output)(converter.as_ptr(), &mut data) };
        if data.is_null() || len <= 0 {
            return Vec::new();
        }
        // SAFETY: the library reports `len` readable bytes at `data`, owned by
        // the converter until it is destroyed.
        unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec()
    }

    fn current_phase(&self, kind: Kind, converter: Handle) -> i32 {
        unsafe { (self.common(kind).current_phase)(converter.as_ptr()) }
    }

    fn phase_count(&self, kind: Kind, converter: Handle) -> i32 {
        unsafe { (self.common(kind).phase_count)(converter.as_ptr()) }
    }

    fn phase_description(&self, kind: Kind, converter: Handle, phase: i32) -> String {
        unsafe { copy_c_str((self.common(kind).phase_description)(converter.as_ptr(), phase)) }
    }

    fn progress_string(&self, kind: Kind, converter: Handle) -> String {
        unsafe { copy_c_str((self.common(kind).progress_string)(converter.as_ptr())) }
    }

    fn http_error_code(&self, kind: Kind, converter: Handle) -> i32 {
        unsafe { (self.common(kind).http_error_code)(converter.as_ptr()) }
    }

    fn destroy_converter(&self, kind: Kind, converter: Handle) {
        unregister(converter);
        unsafe { (self.common(kind).destroy_converter)(converter.as_ptr()) };
        debug!("Destroyed {} converter {:#x}", kind, converter.addr());
    }
}
