//! The conversion flow shared by the PDF and image builders.
//!
//! Native handles are wrapped in guards that destroy them on drop unless
//! ownership was handed to the library. Everything here runs on the worker.

use crate::executor::{Executor, Session};
use crate::native::{ConverterEvents, Handle, Kind, NativeLibrary};
use crate::pdf::PdfObject;
use crate::progress::{Callbacks, Dispatcher};
use crate::settings::{Settings, OUTPUT_KEY};
use crate::{Error, Result};
use log::{debug, warn};
use std::mem;
use std::path::Path;
use std::sync::Arc;

/// Global settings of one conversion
pub(crate) struct GlobalSettings<'a> {
    lib: &'a dyn NativeLibrary,
    kind: Kind,
    handle: Handle,
}

impl<'a> GlobalSettings<'a> {
    pub fn create(lib: &'a dyn NativeLibrary, kind: Kind) -> Result<Self> {
        let handle = lib.create_global_settings(kind)?;
        Ok(Self { lib, kind, handle })
    }

    pub fn set(&self, name: &str, value: &str) {
        if !self.lib.set_global_setting(self.kind, self.handle, name, value) {
            warn!("{} rejected global setting {}={}", self.kind, name, value);
        }
    }

    pub fn apply(&self, settings: &Settings) {
        for (name, value) in settings.iter() {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lib.get_global_setting(self.kind, self.handle, name)
    }

    fn into_raw(self) -> Handle {
        let handle = self.handle;
        mem::forget(self);
        handle
    }
}

impl Drop for GlobalSettings<'_> {
    fn drop(&mut self) {
        self.lib.destroy_global_settings(self.kind, self.handle);
    }
}

/// Settings of one PDF content object
pub(crate) struct ObjectSettings<'a> {
    lib: &'a dyn NativeLibrary,
    handle: Handle,
}

impl<'a> ObjectSettings<'a> {
    pub fn create(lib: &'a dyn NativeLibrary) -> Result<Self> {
        let handle = lib.create_object_settings()?;
        Ok(Self { lib, handle })
    }

    pub fn set(&self, name: &str, value: &str) {
        if !self.lib.set_object_setting(self.handle, name, value) {
            warn!("wkhtmltopdf rejected object setting {}={}", name, value);
        }
    }

    pub fn apply(&self, settings: &Settings) {
        for (name, value) in settings.iter() {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lib.get_object_setting(self.handle, name)
    }

    fn into_raw(self) -> Handle {
        let handle = self.handle;
        mem::forget(self);
        handle
    }
}

impl Drop for ObjectSettings<'_> {
    fn drop(&mut self) {
        self.lib.destroy_object_settings(self.handle);
    }
}

/// A live native converter, destroyed when dropped.
pub(crate) struct Converter<'a> {
    lib: &'a dyn NativeLibrary,
    kind: Kind,
    handle: Handle,
}

impl<'a> Converter<'a> {
    /// Create a converter from `global`, which it takes ownership of, and
    /// route its callbacks to `events`.
    pub fn create(global: GlobalSettings<'a>, data: Option<&str>, events: Arc<dyn ConverterEvents>) -> Result<Self> {
        let (lib, kind) = (global.lib, global.kind);
        let settings = global.into_raw();
        let handle = match lib.create_converter(kind, settings, data) {
            Ok(handle) => handle,
            Err(e) => {
                lib.destroy_global_settings(kind, settings);
                return Err(e);
            }
        };
        lib.install_callbacks(kind, handle, events);
        debug!("Created {} converter {:#x}", kind, handle.addr());
        Ok(Self { lib, kind, handle })
    }

    /// Append a content object; page order follows call order.
    pub fn add_object(&self, settings: ObjectSettings<'a>, html: Option<&str>) {
        self.lib.add_object(self.handle, settings.into_raw(), html);
    }

    pub fn convert(&self) -> bool {
        self.lib.convert(self.kind, self.handle)
    }

    pub fn output(&self) -> Vec<u8> {
        self.lib.output(self.kind, self.handle)
    }

    pub fn http_error_code(&self) -> i32 {
        self.lib.http_error_code(self.kind, self.handle)
    }
}

impl Drop for Converter<'_> {
    fn drop(&mut self) {
        self.lib.destroy_converter(self.kind, self.handle);
    }
}

/// Everything a terminal operation hands to the worker
#[derive(Debug)]
pub(crate) struct Request {
    pub kind: Kind,
    pub settings: Settings,
    /// HTML payload of an image conversion
    pub data: Option<String>,
    pub objects: Vec<PdfObject>,
    pub callbacks: Callbacks,
}

/// What came back from one native conversion
#[derive(Debug)]
pub(crate) struct Conversion {
    pub success: bool,
    pub output: Vec<u8>,
    pub log: Vec<String>,
    pub http_error_code: i32,
}

impl Conversion {
    /// Warning and error lines, then the HTTP status if one was recorded
    pub fn failure_log(&self) -> String {
        let mut lines = self.log.clone();
        if self.http_error_code != 0 {
            lines.push(format!("HTTP error: {}", self.http_error_code));
        }
        lines.join("\n")
    }
}

/// Run one conversion start to finish. `capture` reads the in-memory output
/// back after a successful run.
pub(crate) fn run(session: &mut Session, request: Request, capture: bool) -> Result<Conversion> {
    session.ensure_initialized(request.kind)?;
    let lib = session.library();

    let global = GlobalSettings::create(lib, request.kind)?;
    global.apply(&request.settings);

    let dispatcher = Arc::new(Dispatcher::new(request.callbacks));
    let data = request.data.as_deref().filter(|d| !d.is_empty());
    let converter = Converter::create(global, data, dispatcher.clone())?;

    for object in &request.objects {
        let settings = ObjectSettings::create(lib)?;
        settings.apply(&object.settings);
        converter.add_object(settings, object.html.as_deref());
    }

    let success = converter.convert();
    let output = if success && capture { converter.output() } else { Vec::new() };
    let http_error_code = converter.http_error_code();
    drop(converter);

    Ok(Conversion {
        success,
        output,
        log: dispatcher.log(),
        http_error_code,
    })
}

fn executor(explicit: Option<&Executor>) -> Result<Executor> {
    match explicit {
        Some(executor) => Ok(executor.clone()),
        None => Executor::global().cloned(),
    }
}

impl Request {
    /// Convert into the file at `path`; `Ok(false)` when the library reports
    /// failure.
    pub fn render_to_path(mut self, executor_override: Option<&Executor>, path: &Path) -> Result<bool> {
        let out = path
            .to_str()
            .ok_or_else(|| Error::ConfigError(format!("Output path {} is not valid UTF-8", path.display())))?;
        self.settings.set(OUTPUT_KEY, out);
        let kind = self.kind;

        let conversion = executor(executor_override)?.run(move |session| run(session, self, false))?;
        if !conversion.success {
            warn!("{} conversion to {} failed:\n{}", kind, out, conversion.failure_log());
        }
        Ok(conversion.success)
    }

    /// Convert in memory and return the produced bytes.
    pub fn render_to_stream(mut self, executor_override: Option<&Executor>) -> Result<Vec<u8>> {
        self.settings.remove(OUTPUT_KEY);
        let conversion = executor(executor_override)?.run(move |session| run(session, self, true))?;
        if conversion.success {
            Ok(conversion.output)
        } else {
            Err(Error::ConversionFailed(conversion.failure_log()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLibrary;

    fn request(objects: Vec<PdfObject>) -> Request {
        Request {
            kind: Kind::Pdf,
            settings: Settings::new().with("documentTitle", "t"),
            data: None,
            objects,
            callbacks: Callbacks::default(),
        }
    }

    #[test]
    fn unconsumed_settings_are_destroyed() {
        let lib = MockLibrary::new();
        {
            let global = GlobalSettings::create(&lib, Kind::Pdf).unwrap();
            global.set("dpi", "300");
            assert_eq!(global.get("dpi").as_deref(), Some("300"));
            let object = ObjectSettings::create(&lib).unwrap();
            object.set("page", "http://localhost/");
            assert_eq!(object.get("page").as_deref(), Some("http://localhost/"));
            assert_eq!(lib.live_settings(), 2);
        }
        assert_eq!(lib.live_settings(), 0);
    }

    #[test]
    fn converter_owns_its_settings() {
        let lib = MockLibrary::new();
        let events = Arc::new(Dispatcher::new(Callbacks::default()));
        {
            let global = GlobalSettings::create(&lib, Kind::Pdf).unwrap();
            let converter = Converter::create(global, None, events).unwrap();
            converter.add_object(ObjectSettings::create(&lib).unwrap(), Some("<p>x</p>"));
            assert_eq!(lib.converters_created(), 1);
            assert_eq!(lib.converters_destroyed(), 0);
        }
        assert_eq!(lib.converters_destroyed(), 1);
        assert_eq!(lib.live_settings(), 0);
    }

    #[test]
    fn run_follows_native_call_order() {
        let lib = Arc::new(MockLibrary::new());
        let exec = Executor::new(lib.clone()).unwrap();
        let objects = vec![PdfObject::for_html("<p>a</p>").unwrap(), PdfObject::for_url("http://x/")];
        let conversion = exec.run(move |s| run(s, request(objects), true)).unwrap();
        assert!(conversion.success);

        let calls = lib.calls();
        let names: Vec<&str> = calls.iter().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "init",
                "create_global_settings",
                "set_global_setting",
                "create_converter",
                "install_callbacks",
                "create_object_settings",
                "add_object",
                "create_object_settings",
                "set_object_setting",
                "add_object",
                "convert",
                "output",
                "http_error_code",
                "destroy_converter",
            ]
        );
    }

    #[test]
    fn failure_log_appends_http_status() {
        let conversion = Conversion {
            success: false,
            output: Vec::new(),
            log: vec!["Warning: slow".into(), "Error: broken".into()],
            http_error_code: 404,
        };
        assert_eq!(conversion.failure_log(), "Warning: slow\nError: broken\nHTTP error: 404");
    }

    #[test]
    fn non_utf8_path_is_config_error() {
        #[cfg(unix)]
        {
            use std::ffi::OsStr;
            use std::os::unix::ffi::OsStrExt;
            let path = Path::new(OsStr::from_bytes(b"/tmp/\xff.pdf"));
            let err = request(vec![]).render_to_path(None, path).unwrap_err();
            assert!(matches!(err, Error::ConfigError(_)));
        }
    }
}
