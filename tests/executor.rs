//! Worker behaviour as seen by library users

use std::sync::{Arc, Mutex};
use std::thread;
use wkhtmltox::{Error, Executor, Kind, MockLibrary, NativeLibrary, PdfConverter, PdfObject};

#[test]
fn test_tasks_run_on_named_worker() {
    let executor = Executor::new(Arc::new(MockLibrary::new())).unwrap();
    let name = executor
        .run(|_| Ok(thread::current().name().map(str::to_string)))
        .unwrap();
    assert_eq!(name.as_deref(), Some("wkhtmltox-worker"));
}

#[test]
fn test_tasks_can_drive_the_library_directly() {
    let mock = MockLibrary::new();
    let executor = Executor::new(Arc::new(mock.clone())).unwrap();

    let version = executor
        .run(|session| {
            session.ensure_initialized(Kind::Pdf)?;
            let lib = session.library();
            let settings = lib.create_global_settings(Kind::Pdf)?;
            lib.set_global_setting(Kind::Pdf, settings, "dpi", "96");
            let dpi = lib.get_global_setting(Kind::Pdf, settings, "dpi");
            lib.destroy_global_settings(Kind::Pdf, settings);
            Ok((lib.version(Kind::Pdf), dpi))
        })
        .unwrap();

    assert!(version.0.starts_with("0.12.5"));
    assert_eq!(version.1.as_deref(), Some("96"));
    assert_eq!(mock.live_settings(), 0);
}

#[test]
fn test_run_from_callback_is_rejected() {
    let executor = Executor::new(Arc::new(MockLibrary::new())).unwrap();
    let nested = Arc::new(Mutex::new(None));
    let (inner, slot) = (executor.clone(), nested.clone());

    PdfConverter::new()
        .executor(executor)
        .object(PdfObject::for_html("<p>reentrant</p>").unwrap())
        .on_finished(move |_| {
            *slot.lock().unwrap() = Some(inner.run(|_| Ok(())));
        })
        .render_to_stream()
        .unwrap();

    let nested = nested.lock().unwrap().take().unwrap();
    assert!(matches!(nested, Err(Error::ExecutionError(_))));
}

#[test]
fn test_worker_survives_panicking_task() {
    let mock = MockLibrary::new();
    let executor = Executor::new(Arc::new(mock.clone())).unwrap();

    let err = executor
        .run(|_| -> wkhtmltox::Result<()> { panic!("task blew up") })
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionError(_)));

    let bytes = PdfConverter::new()
        .executor(executor)
        .object(PdfObject::for_html("<p>after</p>").unwrap())
        .render_to_stream()
        .unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_each_executor_owns_its_worker() {
    let a = Executor::new(Arc::new(MockLibrary::new())).unwrap();
    let b = Executor::new(Arc::new(MockLibrary::new())).unwrap();
    let ta = a.run(|_| Ok(thread::current().id())).unwrap();
    let tb = b.run(|_| Ok(thread::current().id())).unwrap();
    assert_ne!(ta, tb);
}
