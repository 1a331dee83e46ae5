//! PDF conversions driven end to end through a worker over the mock library

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use wkhtmltox::{Error, ErrorHandling, Executor, MockLibrary, PdfConverter, PdfObject, Progress, Settings};

fn setup() -> (Executor, MockLibrary) {
    setup_with(MockLibrary::new())
}

fn setup_with(mock: MockLibrary) -> (Executor, MockLibrary) {
    let executor = Executor::new(Arc::new(mock.clone())).expect("worker");
    (executor, mock)
}

fn html(body: &str) -> PdfObject {
    PdfObject::for_html(format!("<html><body>{}</body></html>", body)).unwrap()
}

#[test]
fn test_render_to_path_succeeds() {
    let (executor, mock) = setup();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("hello.pdf");

    let ok = PdfConverter::new()
        .executor(executor)
        .object(html("<p>hello</p>"))
        .render_to_path(&out)
        .unwrap();

    assert!(ok);
    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(mock.converters_destroyed(), 1);
    assert_eq!(mock.live_settings(), 0);
}

#[test]
fn test_output_file_is_released() {
    let (executor, _) = setup();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("first.pdf");

    assert!(PdfConverter::new()
        .executor(executor)
        .object(html("x"))
        .render_to_path(&out)
        .unwrap());

    let moved = tmp.path().join("second.pdf");
    std::fs::rename(&out, &moved).unwrap();
    assert!(moved.exists());
    assert!(!out.exists());
}

#[test]
fn test_missing_file_returns_false() {
    let (executor, _) = setup();
    let tmp = tempfile::tempdir().unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();

    let ok = PdfConverter::new()
        .executor(executor)
        .object(PdfObject::for_url("file:///path/that/does/not/exist"))
        .on_error(move |e| seen.lock().unwrap().push(e.to_string()))
        .render_to_path(tmp.path().join("out.pdf"))
        .unwrap();

    assert!(!ok);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[test]
fn test_no_objects_returns_false_without_native_calls() {
    let (executor, mock) = setup();
    let tmp = tempfile::tempdir().unwrap();

    let ok = PdfConverter::new()
        .executor(executor)
        .document_title("empty")
        .render_to_path(tmp.path().join("empty.pdf"))
        .unwrap();

    assert!(!ok);
    assert!(mock.calls().is_empty());
}

#[test]
fn test_empty_html_is_rejected() {
    assert!(matches!(PdfObject::for_html(""), Err(Error::InvalidObject(_))));
    assert!(matches!(PdfObject::for_html("\0"), Err(Error::InvalidObject(_))));
}

#[test]
fn test_stream_failure_carries_log() {
    let (executor, _) = setup();

    let err = PdfConverter::new()
        .executor(executor)
        .object(
            PdfObject::for_url("http://also.invalid/").load_error_handling(ErrorHandling::Ignore),
        )
        .object(PdfObject::for_url("file:///path/that/does/not/exist"))
        .render_to_stream()
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, Error::ConversionFailed(_)));
    assert!(message.starts_with("Conversion returned with failure. Log:\n"));
    let warning = message
        .find("Warning: Failed loading page http://also.invalid/")
        .expect("ignored load failure is logged as a warning");
    let error = message
        .find("Error: Failed loading page file:///path/that/does/not/exist")
        .expect("fatal load failure is logged as an error");
    assert!(warning < error);
}

#[test]
fn test_stream_failure_reports_http_status() {
    let (executor, _) = setup_with(MockLibrary::new().with_http_error_code(404));

    let err = PdfConverter::new()
        .executor(executor)
        .object(PdfObject::for_url("http://127.0.0.1:1/missing"))
        .render_to_stream()
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Error: Failed loading page http://127.0.0.1:1/missing"));
    assert!(message.ends_with("HTTP error: 404"));
}

#[test]
fn test_log_is_collected_per_call() {
    let (executor, _) = setup();
    let converter = PdfConverter::new()
        .executor(executor)
        .object(PdfObject::for_url("file:///path/that/does/not/exist"));

    let first = converter.render_to_stream().unwrap_err().to_string();
    let second = converter.render_to_stream().unwrap_err().to_string();
    assert_eq!(first, second);
    assert_eq!(second.matches("Error: ").count(), 1);
}

#[test]
fn test_stream_ignores_out_setting() {
    let (executor, _) = setup();
    let tmp = tempfile::tempdir().unwrap();
    let stray = tmp.path().join("stray.pdf");

    let bytes = PdfConverter::new()
        .executor(executor)
        .setting("out", stray.display())
        .object(html("in memory"))
        .render_to_stream()
        .unwrap();

    assert!(String::from_utf8_lossy(&bytes).contains("in memory"));
    assert!(!stray.exists());
}

#[test]
fn test_objects_render_in_order() {
    let (executor, _) = setup();

    let bytes = PdfConverter::new()
        .executor(executor)
        .object(html("one"))
        .object(PdfObject::for_url("https://example.com/two"))
        .object(html("three"))
        .render_to_stream()
        .unwrap();

    let text = String::from_utf8(bytes).unwrap();
    let one = text.find("one").unwrap();
    let two = text.find("url:https://example.com/two").unwrap();
    let three = text.find("three").unwrap();
    assert!(one < two && two < three);
}

#[test]
fn test_writer_receives_stream() {
    let (executor, _) = setup();
    let mut buf = Vec::new();
    PdfConverter::new()
        .executor(executor)
        .object(html("w"))
        .render_to_writer(&mut buf)
        .unwrap();
    assert!(buf.starts_with(b"%PDF-mock"));
}

#[test]
fn test_progress_phases_never_go_backwards() {
    let (executor, _) = setup();
    let seen: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let phases: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let (s, p) = (seen.clone(), phases.clone());

    PdfConverter::new()
        .executor(executor)
        .object(html("progress"))
        .on_progress(move |progress| s.lock().unwrap().push(progress.clone()))
        .on_phase_changed(move |progress| p.lock().unwrap().push(progress.clone()))
        .render_to_stream()
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].phase <= w[1].phase));
    assert!(seen.iter().all(|p| p.percent <= 100 && p.phase < p.phase_count));
    assert_eq!(seen[0].phase_description, "Loading pages");

    let phases = phases.lock().unwrap();
    assert!(phases.iter().all(|p| p.percent == 0));
    assert_eq!(phases.len() as u32, phases[0].phase_count);
}

#[test]
fn test_success_and_failure_callbacks() {
    let (executor, _) = setup();
    let events = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (events.clone(), events.clone(), events.clone());

    let converter = |object: PdfObject| {
        let (a, b, c) = (a.clone(), b.clone(), c.clone());
        PdfConverter::new()
            .executor(executor.clone())
            .object(object)
            .on_finished(move |ok| a.lock().unwrap().push(format!("finished:{}", ok)))
            .on_success(move || b.lock().unwrap().push("success".to_string()))
            .on_failure(move || c.lock().unwrap().push("failure".to_string()))
    };

    converter(html("ok")).render_to_stream().unwrap();
    let _ = converter(PdfObject::for_url("file:///path/that/does/not/exist")).render_to_stream();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["finished:true", "success", "finished:false", "failure"]
    );
}

#[test]
fn test_panicking_callback_does_not_abort_conversion() {
    let (executor, _) = setup();
    let finished = Arc::new(Mutex::new(None));
    let f = finished.clone();

    let bytes = PdfConverter::new()
        .executor(executor)
        .object(html("resilient"))
        .on_progress(|_| panic!("consumer bug"))
        .on_finished(move |ok| *f.lock().unwrap() = Some(ok))
        .render_to_stream()
        .unwrap();

    assert!(!bytes.is_empty());
    assert_eq!(*finished.lock().unwrap(), Some(true));
}

#[test]
fn test_rejected_setting_does_not_stop_conversion() {
    let (executor, _) = setup();
    let bytes = PdfConverter::new()
        .executor(executor)
        .setting("not a setting", 1)
        .object(html("still here"))
        .render_to_stream()
        .unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_settings_reach_native_objects() {
    let (executor, mock) = setup();
    let global = Settings::from_json(r#"{"documentTitle": "Report", "outline": true}"#).unwrap();

    PdfConverter::with_settings(global)
        .executor(executor)
        .object(PdfObject::for_url("https://example.com/").print_media_type(true))
        .render_to_stream()
        .unwrap();

    let calls = mock.calls();
    let count = |name: &str| calls.iter().filter(|c| c.as_str() == name).count();
    assert_eq!(count("set_global_setting"), 2);
    assert_eq!(count("set_object_setting"), 2);
}

#[test]
fn test_concurrent_conversions_do_not_hang() {
    let (executor, mock) = setup_with(MockLibrary::new().with_convert_delay(Duration::from_millis(20)));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let executor = executor.clone();
            thread::spawn(move || {
                PdfConverter::new()
                    .executor(executor)
                    .object(html(&format!("thread {}", i)))
                    .render_to_stream()
            })
        })
        .collect();

    for handle in handles {
        let bytes = handle.join().unwrap().unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    assert_eq!(mock.max_concurrent_conversions(), 1);
    assert_eq!(mock.threads().len(), 1);
    assert_eq!(mock.converters_created(), 5);
    assert_eq!(mock.converters_destroyed(), 5);
    assert_eq!(mock.init_count(wkhtmltox::Kind::Pdf), 1);
}

#[test]
fn test_failed_init_is_reported_every_time() {
    let (executor, mock) = setup_with(MockLibrary::new().with_failing_init());
    let converter = PdfConverter::new().executor(executor).object(html("never"));

    for _ in 0..2 {
        let err = converter.render_to_stream().unwrap_err();
        assert!(matches!(err, Error::InitializationError(_)));
    }
    assert_eq!(mock.init_count(wkhtmltox::Kind::Pdf), 1);
    assert_eq!(mock.converters_created(), 0);
}
