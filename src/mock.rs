//! In-process stand-in for the native library.
//!
//! [`MockLibrary`] keeps settings and converters in memory, walks through the
//! same phases wkhtmltox reports and fires the same callbacks, so the whole
//! conversion flow can run without `libwkhtmltox` installed. It also records
//! how it was driven (call order, calling threads, handle lifetimes) for
//! tests to assert on.
//!
//! Output is deterministic: a PDF is `%PDF-mock` followed by one `page:` line
//! per object, an image is a `MOCKIMG` header naming the format and source.

use crate::native::{ConverterEvents, Handle, Kind, NativeLibrary};
use crate::progress::Progress;
use crate::settings::{Settings, INPUT_KEY, OUTPUT_KEY, PAGE_KEY};
use crate::{Error, Result};
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

const PDF_PHASES: &[&str] = &[
    "Loading pages",
    "Counting pages",
    "Resolving links",
    "Loading headers and footers",
    "Printing pages",
    "Done",
];
const IMAGE_PHASES: &[&str] = &["Loading page", "Rendering", "Done"];

fn phases(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::Pdf => PDF_PHASES,
        Kind::Image => IMAGE_PHASES,
    }
}

struct MockConverter {
    kind: Kind,
    settings: Settings,
    data: Option<String>,
    objects: Vec<(Settings, Option<String>)>,
    events: Option<Arc<dyn ConverterEvents>>,
    output: Vec<u8>,
    phase: i32,
    percent: i32,
    http_error_code: i32,
}

#[derive(Default)]
struct State {
    next_id: usize,
    global: HashMap<usize, (Kind, Settings)>,
    objects: HashMap<usize, Settings>,
    converters: HashMap<usize, MockConverter>,
    calls: Vec<String>,
    threads: Vec<ThreadId>,
    inits: HashMap<Kind, usize>,
    created: usize,
    destroyed: usize,
    in_flight: usize,
    max_in_flight: usize,
}

impl State {
    fn record(&mut self, call: &str) {
        self.calls.push(call.to_string());
        let id = thread::current().id();
        if !self.threads.contains(&id) {
            self.threads.push(id);
        }
    }

    fn allocate(&mut self) -> Result<Handle> {
        self.next_id += 1;
        Handle::from_raw(self.next_id as *mut c_void)
            .ok_or_else(|| Error::NativeError("mock handle space exhausted".to_string()))
    }
}

/// Scripted fake of the native library; clones share state.
#[derive(Clone, Default)]
pub struct MockLibrary {
    state: Arc<Mutex<State>>,
    convert_delay: Duration,
    http_error_code: i32,
    failing_init: bool,
}

impl std::fmt::Debug for MockLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLibrary")
            .field("convert_delay", &self.convert_delay)
            .field("http_error_code", &self.http_error_code)
            .field("failing_init", &self.failing_init)
            .finish_non_exhaustive()
    }
}

/// How loading one source went
enum Loaded {
    Page(String),
    Skipped,
    Failed,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `convert`.
    pub fn with_convert_delay(mut self, delay: Duration) -> Self {
        self.convert_delay = delay;
        self
    }

    /// Pretend every remote page answered with `code`, failing the load.
    pub fn with_http_error_code(mut self, code: i32) -> Self {
        self.http_error_code = code;
        self
    }

    /// Make `init` report failure.
    pub fn with_failing_init(mut self) -> Self {
        self.failing_init = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of the entry points called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Distinct threads that called into the library, in first-seen order
    pub fn threads(&self) -> Vec<ThreadId> {
        self.state().threads.clone()
    }

    pub fn init_count(&self, kind: Kind) -> usize {
        self.state().inits.get(&kind).copied().unwrap_or(0)
    }

    pub fn converters_created(&self) -> usize {
        self.state().created
    }

    pub fn converters_destroyed(&self) -> usize {
        self.state().destroyed
    }

    /// Settings objects created and neither destroyed nor owned by a converter
    pub fn live_settings(&self) -> usize {
        let st = self.state();
        st.global.len() + st.objects.len()
    }

    /// Highest number of `convert` calls that overlapped
    pub fn max_concurrent_conversions(&self) -> usize {
        self.state().max_in_flight
    }

    fn set_phase(&self, converter: Handle, phase: i32, percent: i32) {
        if let Some(c) = self.state().converters.get_mut(&converter.addr()) {
            c.phase = phase;
            c.percent = percent;
        }
    }

    fn load_page(&self, url: &str, settings: &Settings, events: &dyn ConverterEvents) -> Loaded {
        let failure = if self.http_error_code != 0 && !url.starts_with("file:") {
            Some(format!("Failed loading page {} (HTTP status {})", url, self.http_error_code))
        } else if is_missing_file(url) {
            Some(format!(
                "Failed loading page {} (sometimes it will work just to ignore this error with --load-error-handling ignore)",
                url
            ))
        } else if url.contains(".invalid") {
            Some(format!("Failed loading page {} (HostNotFoundError)", url))
        } else {
            None
        };

        let Some(message) = failure else {
            return Loaded::Page(format!("url:{}", url));
        };
        match settings.get("load.loadErrorHandling") {
            Some("ignore") => {
                events.warning(&message);
                Loaded::Page(format!("url:{}", url))
            }
            Some("skip") => {
                events.warning(&message);
                Loaded::Skipped
            }
            _ => {
                events.error(&message);
                Loaded::Failed
            }
        }
    }

    // Loading phase; `None` when the conversion has to stop.
    fn render(&self, job: &Job, events: &dyn ConverterEvents) -> Option<Vec<u8>> {
        match job.kind {
            Kind::Pdf => {
                let mut doc = b"%PDF-mock\n".to_vec();
                for (settings, html) in &job.objects {
                    let loaded = match (html, settings.get(PAGE_KEY)) {
                        (Some(html), _) => Loaded::Page(html.clone()),
                        (None, Some(url)) => self.load_page(url, settings, events),
                        (None, None) => Loaded::Page(String::new()),
                    };
                    match loaded {
                        Loaded::Page(page) => doc.extend_from_slice(format!("page:{}\n", page).as_bytes()),
                        Loaded::Skipped => {}
                        Loaded::Failed => return None,
                    }
                }
                Some(doc)
            }
            Kind::Image => {
                let source = match (&job.data, job.settings.get(INPUT_KEY)) {
                    (Some(html), _) => html.clone(),
                    (None, Some(url)) => match self.load_page(url, &job.settings, events) {
                        Loaded::Page(page) => page,
                        Loaded::Skipped | Loaded::Failed => return None,
                    },
                    (None, None) => {
                        events.error("No input specified");
                        return None;
                    }
                };
                let format = job
                    .settings
                    .get("fmt")
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .or_else(|| {
                        job.settings
                            .get(OUTPUT_KEY)
                            .and_then(|out| out.rsplit_once('.'))
                            .map(|(_, ext)| ext.to_string())
                    })
                    .unwrap_or_else(|| "jpg".to_string());
                Some(format!("MOCKIMG {}\n{}\n", format, source).into_bytes())
            }
        }
    }
}

fn is_missing_file(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
        .is_some_and(|path| !path.exists())
}

/// Snapshot of a converter taken before callbacks run, so none fire with the
/// state lock held.
struct Job {
    kind: Kind,
    settings: Settings,
    data: Option<String>,
    objects: Vec<(Settings, Option<String>)>,
    events: Option<Arc<dyn ConverterEvents>>,
}

struct Silent;

impl ConverterEvents for Silent {
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn phase_changed(&self, _: &Progress) {}
    fn progress_changed(&self, _: &Progress) {}
    fn finished(&self, _: bool) {}
}

impl NativeLibrary for MockLibrary {
    fn init(&self, kind: Kind, _use_graphics: bool) -> bool {
        let mut st = self.state();
        st.record("init");
        *st.inits.entry(kind).or_insert(0) += 1;
        !self.failing_init
    }

    fn deinit(&self, _kind: Kind) -> bool {
        self.state().record("deinit");
        true
    }

    fn version(&self, _kind: Kind) -> String {
        self.state().record("version");
        format!("{} (mock)", crate::loader::LIBRARY_VERSION)
    }

    fn extended_qt(&self, _kind: Kind) -> bool {
        self.state().record("extended_qt");
        false
    }

    fn create_global_settings(&self, kind: Kind) -> Result<Handle> {
        let mut st = self.state();
        st.record("create_global_settings");
        let handle = st.allocate()?;
        st.global.insert(handle.addr(), (kind, Settings::new()));
        Ok(handle)
    }

    fn set_global_setting(&self, _kind: Kind, settings: Handle, name: &str, value: &str) -> bool {
        let mut st = self.state();
        st.record("set_global_setting");
        if name.is_empty() || name.contains(char::is_whitespace) {
            return false;
        }
        match st.global.get_mut(&settings.addr()) {
            Some((_, s)) => {
                s.set(name, value);
                true
            }
            None => false,
        }
    }

    fn get_global_setting(&self, _kind: Kind, settings: Handle, name: &str) -> Option<String> {
        let mut st = self.state();
        st.record("get_global_setting");
        st.global
            .get(&settings.addr())
            .and_then(|(_, s)| s.get(name))
            .map(str::to_string)
    }

    fn destroy_global_settings(&self, _kind: Kind, settings: Handle) {
        let mut st = self.state();
        st.record("destroy_global_settings");
        st.global.remove(&settings.addr());
    }

    fn create_object_settings(&self) -> Result<Handle> {
        let mut st = self.state();
        st.record("create_object_settings");
        let handle = st.allocate()?;
        st.objects.insert(handle.addr(), Settings::new());
        Ok(handle)
    }

    fn set_object_setting(&self, settings: Handle, name: &str, value: &str) -> bool {
        let mut st = self.state();
        st.record("set_object_setting");
        if name.is_empty() || name.contains(char::is_whitespace) {
            return false;
        }
        match st.objects.get_mut(&settings.addr()) {
            Some(s) => {
                s.set(name, value);
                true
            }
            None => false,
        }
    }

    fn get_object_setting(&self, settings: Handle, name: &str) -> Option<String> {
        let mut st = self.state();
        st.record("get_object_setting");
        st.objects
            .get(&settings.addr())
            .and_then(|s| s.get(name))
            .map(str::to_string)
    }

    fn destroy_object_settings(&self, settings: Handle) {
        let mut st = self.state();
        st.record("destroy_object_settings");
        st.objects.remove(&settings.addr());
    }

    fn create_converter(&self, kind: Kind, settings: Handle, data: Option<&str>) -> Result<Handle> {
        let mut st = self.state();
        st.record("create_converter");
        let (owner, settings) = st
            .global
            .remove(&settings.addr())
            .ok_or_else(|| Error::NativeError("unknown global settings handle".to_string()))?;
        if owner != kind {
            return Err(Error::NativeError(format!("{} settings passed to a {} converter", owner, kind)));
        }
        let handle = st.allocate()?;
        st.converters.insert(
            handle.addr(),
            MockConverter {
                kind,
                settings,
                data: data.map(str::to_string),
                objects: Vec::new(),
                events: None,
                output: Vec::new(),
                phase: 0,
                percent: 0,
                http_error_code: 0,
            },
        );
        st.created += 1;
        Ok(handle)
    }

    fn install_callbacks(&self, _kind: Kind, converter: Handle, events: Arc<dyn ConverterEvents>) {
        let mut st = self.state();
        st.record("install_callbacks");
        if let Some(c) = st.converters.get_mut(&converter.addr()) {
            c.events = Some(events);
        }
    }

    fn add_object(&self, converter: Handle, settings: Handle, data: Option<&str>) {
        let mut st = self.state();
        st.record("add_object");
        let settings = st.objects.remove(&settings.addr()).unwrap_or_default();
        if let Some(c) = st.converters.get_mut(&converter.addr()) {
            c.objects.push((settings, data.map(str::to_string)));
        }
    }

    fn convert(&self, kind: Kind, converter: Handle) -> bool {
        let job = {
            let mut st = self.state();
            st.record("convert");
            let Some(c) = st.converters.get(&converter.addr()) else {
                return false;
            };
            let job = Job {
                kind: c.kind,
                settings: c.settings.clone(),
                data: c.data.clone(),
                objects: c.objects.clone(),
                events: c.events.clone(),
            };
            st.in_flight += 1;
            st.max_in_flight = st.max_in_flight.max(st.in_flight);
            job
        };

        if !self.convert_delay.is_zero() {
            thread::sleep(self.convert_delay);
        }

        let events: Arc<dyn ConverterEvents> = job.events.clone().unwrap_or_else(|| Arc::new(Silent) as Arc<dyn ConverterEvents>);
        let names = phases(kind);
        let count = names.len() as i32;
        let mut rendered = None;
        let mut success = true;

        for (phase, name) in names.iter().enumerate() {
            let phase = phase as i32;
            self.set_phase(converter, phase, 0);
            events.phase_changed(&Progress::from_native(phase, name.to_string(), count, 0));
            if phase == count - 1 {
                break;
            }
            for percent in [0, 50, 100] {
                self.set_phase(converter, phase, percent);
                events.progress_changed(&Progress::from_native(phase, name.to_string(), count, percent));
            }
            if phase == 0 {
                rendered = self.render(&job, events.as_ref());
                if rendered.is_none() {
                    success = false;
                    break;
                }
            }
        }

        let mut output = rendered.unwrap_or_default();
        if success {
            if let Some(out) = job.settings.get(OUTPUT_KEY).filter(|o| !o.is_empty()) {
                if fs::write(out, &output).is_err() {
                    events.error("Could not write to output file");
                    success = false;
                }
                output.clear();
            }
        } else {
            output.clear();
        }
        events.finished(success);

        let mut st = self.state();
        st.in_flight -= 1;
        let http_error_code = self.http_error_code;
        if let Some(c) = st.converters.get_mut(&converter.addr()) {
            c.output = output;
            c.http_error_code = http_error_code;
        }
        success
    }

    fn output(&self, _kind: Kind, converter: Handle) -> Vec<u8> {
        let mut st = self.state();
        st.record("output");
        st.converters
            .get(&converter.addr())
            .map(|c| c.output.clone())
            .unwrap_or_default()
    }

    fn current_phase(&self, _kind: Kind, converter: Handle) -> i32 {
        let mut st = self.state();
        st.record("current_phase");
        st.converters.get(&converter.addr()).map_or(0, |c| c.phase)
    }

    fn phase_count(&self, kind: Kind, _converter: Handle) -> i32 {
        self.state().record("phase_count");
        phases(kind).len() as i32
    }

    fn phase_description(&self, kind: Kind, _converter: Handle, phase: i32) -> String {
        self.state().record("phase_description");
        usize::try_from(phase)
            .ok()
            .and_then(|p| phases(kind).get(p))
            .map(|d| d.to_string())
            .unwrap_or_default()
    }

    fn progress_string(&self, _kind: Kind, converter: Handle) -> String {
        let mut st = self.state();
        st.record("progress_string");
        st.converters
            .get(&converter.addr())
            .map(|c| format!("{}%", c.percent))
            .unwrap_or_default()
    }

    fn http_error_code(&self, _kind: Kind, converter: Handle) -> i32 {
        let mut st = self.state();
        st.record("http_error_code");
        st.converters.get(&converter.addr()).map_or(0, |c| c.http_error_code)
    }

    fn destroy_converter(&self, _kind: Kind, converter: Handle) {
        let mut st = self.state();
        st.record("destroy_converter");
        if st.converters.remove(&converter.addr()).is_some() {
            st.destroyed += 1;
        }
    }
}
