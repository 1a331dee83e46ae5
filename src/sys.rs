//! Raw entry points of the wkhtmltox shared library.
//!
//! The library exports two structurally identical families, `wkhtmltopdf_*`
//! and `wkhtmltoimage_*`. Every handle is an opaque pointer owned by the
//! library; nothing here dereferences them. Symbols are resolved at runtime
//! with `libloading` and copied out as plain function pointers, so the tables
//! stay valid for as long as the owning [`libloading::Library`] is alive.

#![allow(non_camel_case_types)]

use crate::{Error, Result};
use std::os::raw::{c_char, c_int, c_long, c_uchar, c_void};

/// `wkhtmltopdf_global_settings *` / `wkhtmltoimage_global_settings *`
pub type global_settings = c_void;
/// `wkhtmltopdf_object_settings *`
pub type object_settings = c_void;
/// `wkhtmltopdf_converter *` / `wkhtmltoimage_converter *`
pub type converter = c_void;

/// Error, warning, info and debug callbacks. `message` is UTF-8.
pub type str_callback = unsafe extern "C" fn(converter: *mut converter, message: *const c_char);
/// Phase-changed callback.
pub type void_callback = unsafe extern "C" fn(converter: *mut converter);
/// Progress-changed (percent within phase) and finished (1 on success) callbacks.
pub type int_callback = unsafe extern "C" fn(converter: *mut converter, value: c_int);

/// Function pointers shared by both families.
#[derive(Clone, Copy)]
pub struct CommonFns {
    pub init: unsafe extern "C" fn(use_graphics: c_int) -> c_int,
    pub deinit: unsafe extern "C" fn() -> c_int,
    pub extended_qt: unsafe extern "C" fn() -> c_int,
    pub version: unsafe extern "C" fn() -> *const c_char,

    pub create_global_settings: unsafe extern "C" fn() -> *mut global_settings,
    pub set_global_setting: unsafe extern "C" fn(
        settings: *mut global_settings,
        name: *const c_char,
        value: *const c_char,
    ) -> c_int,
    pub get_global_setting: unsafe extern "C" fn(
        settings: *mut global_settings,
        name: *const c_char,
        value: *mut c_char,
        vs: c_int,
    ) -> c_int,
    pub destroy_global_settings: unsafe extern "C" fn(settings: *mut global_settings),

    pub set_warning_callback: unsafe extern "C" fn(converter: *mut converter, cb: Option<str_callback>),
    pub set_error_callback: unsafe extern "C" fn(converter: *mut converter, cb: Option<str_callback>),
    pub set_phase_changed_callback:
        unsafe extern "C" fn(converter: *mut converter, cb: Option<void_callback>),
    pub set_progress_changed_callback:
        unsafe extern "C" fn(converter: *mut converter, cb: Option<int_callback>),
    pub set_finished_callback: unsafe extern "C" fn(converter: *mut converter, cb: Option<int_callback>),

    pub current_phase: unsafe extern "C" fn(converter: *mut converter) -> c_int,
    pub phase_count: unsafe extern "C" fn(converter: *mut converter) -> c_int,
    pub phase_description: unsafe extern "C" fn(converter: *mut converter, phase: c_int) -> *const c_char,
    pub progress_string: unsafe extern "C" fn(converter: *mut converter) -> *const c_char,
    pub http_error_code: unsafe extern "C" fn(converter: *mut converter) -> c_int,

    pub convert: unsafe extern "C" fn(converter: *mut converter) -> c_int,
    pub get_output: unsafe extern "C" fn(converter: *mut converter, data: *mut *const c_uchar) -> c_long,
    pub destroy_converter: unsafe extern "C" fn(converter: *mut converter),
}

/// `wkhtmltopdf_*` entry points.
#[derive(Clone, Copy)]
pub struct PdfFns {
    pub common: CommonFns,
    pub create_object_settings: unsafe extern "C" fn() -> *mut object_settings,
    pub set_object_setting: unsafe extern "C" fn(
        settings: *mut object_settings,
        name: *const c_char,
        value: *const c_char,
    ) -> c_int,
    pub get_object_setting: unsafe extern "C" fn(
        settings: *mut object_settings,
        name: *const c_char,
        value: *mut c_char,
        vs: c_int,
    ) -> c_int,
    pub destroy_object_settings: unsafe extern "C" fn(settings: *mut object_settings),
    pub create_converter: unsafe extern "C" fn(settings: *mut global_settings) -> *mut converter,
    pub add_object: unsafe extern "C" fn(
        converter: *mut converter,
        settings: *mut object_settings,
        data: *const c_char,
    ),
}

/// `wkhtmltoimage_*` entry points.
#[derive(Clone, Copy)]
pub struct ImageFns {
    pub common: CommonFns,
    pub create_converter:
        unsafe extern "C" fn(settings: *mut global_settings, data: *const c_char) -> *mut converter,
}

fn symbol<T: Copy>(lib: &libloading::Library, name: &str) -> Result<T> {
    let mut raw = Vec::with_capacity(name.len() + 1);
    raw.extend_from_slice(name.as_bytes());
    raw.push(0);
    // SAFETY: every call site pins `T` to the signature documented in
    // wkhtmltox's pdf.h / image.h for `name`.
    let sym: libloading::Symbol<T> = unsafe { lib.get(&raw) }
        .map_err(|e| Error::LoadError(format!("missing symbol {}: {}", name, e)))?;
    Ok(*sym)
}

impl CommonFns {
    fn load(lib: &libloading::Library, prefix: &str) -> Result<Self> {
        let s = |suffix: &str| format!("{}_{}", prefix, suffix);
        Ok(Self {
            init: symbol(lib, &s("init"))?,
            deinit: symbol(lib, &s("deinit"))?,
            extended_qt: symbol(lib, &s("extended_qt"))?,
            version: symbol(lib, &s("version"))?,
            create_global_settings: symbol(lib, &s("create_global_settings"))?,
            set_global_setting: symbol(lib, &s("set_global_setting"))?,
            get_global_setting: symbol(lib, &s("get_global_setting"))?,
            destroy_global_settings: symbol(lib, &s("destroy_global_settings"))?,
            set_warning_callback: symbol(lib, &s("set_warning_callback"))?,
            set_error_callback: symbol(lib, &s("set_error_callback"))?,
            set_phase_changed_callback: symbol(lib, &s("set_phase_changed_callback"))?,
            set_progress_changed_callback: symbol(lib, &s("set_progress_changed_callback"))?,
            set_finished_callback: symbol(lib, &s("set_finished_callback"))?,
            current_phase: symbol(lib, &s("current_phase"))?,
            phase_count: symbol(lib, &s("phase_count"))?,
            phase_description: symbol(lib, &s("phase_description"))?,
            progress_string: symbol(lib, &s("progress_string"))?,
            http_error_code: symbol(lib, &s("http_error_code"))?,
            convert: symbol(lib, &s("convert"))?,
            get_output: symbol(lib, &s("get_output"))?,
            destroy_converter: symbol(lib, &s("destroy_converter"))?,
        })
    }
}

impl PdfFns {
    /// Resolve every `wkhtmltopdf_*` symbol.
    pub fn load(lib: &libloading::Library) -> Result<Self> {
        Ok(Self {
            common: CommonFns::load(lib, "wkhtmltopdf")?,
            create_object_settings: symbol(lib, "wkhtmltopdf_create_object_settings")?,
            set_object_setting: symbol(lib, "wkhtmltopdf_set_object_setting")?,
            get_object_setting: symbol(lib, "wkhtmltopdf_get_object_setting")?,
            destroy_object_settings: symbol(lib, "wkhtmltopdf_destroy_object_settings")?,
            create_converter: symbol(lib, "wkhtmltopdf_create_converter")?,
            add_object: symbol(lib, "wkhtmltopdf_add_object")?,
        })
    }
}

impl ImageFns {
    /// Resolve every `wkhtmltoimage_*` symbol.
    pub fn load(lib: &libloading::Library) -> Result<Self> {
        Ok(Self {
            common: CommonFns::load(lib, "wkhtmltoimage")?,
            create_converter: symbol(lib, "wkhtmltoimage_create_converter")?,
        })
    }
}
