//! wkhtmltox
//!
//! Safe Rust bindings for the wkhtmltopdf / wkhtmltoimage native library:
//! HTML (inline or by URL) goes in, a PDF document or an image comes out.
//!
//! # Features
//!
//! - **Single worker**: every native call runs on one dedicated thread, so
//!   converters can be used from any number of application threads
//! - **Builders**: [`PdfConverter`] with ordered [`PdfObject`]s and
//!   [`ImageConverter`], rendering to a file or into memory
//! - **Events**: warning, error, phase, progress and completion callbacks
//! - **Mockable**: the native surface sits behind [`NativeLibrary`];
//!   [`MockLibrary`] runs the full flow without `libwkhtmltox`
//!
//! # Example
//!
//! ```no_run
//! use wkhtmltox::{PageSize, PdfConverter, PdfObject};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pdf = PdfConverter::new()
//!     .page_size(PageSize::A4)
//!     .object(PdfObject::for_html("<h1>Invoice</h1>")?)
//!     .on_progress(|p| println!("{} {}%", p.phase_description, p.percent))
//!     .render_to_stream()?;
//! std::fs::write("invoice.pdf", pdf)?;
//! # Ok(())
//! # }
//! ```
//!
//! The native library is located through [`LoaderConfig`]; see
//! [`loader`] for the environment variables it reads.

pub mod error;
pub use error::{Error, Result};

mod sys;

pub mod loader;
pub use loader::{Library, LoaderConfig};

pub mod native;
pub use native::{ConverterEvents, Handle, Kind, NativeLibrary};

pub mod executor;
pub use executor::{Executor, Session};

mod convert;

pub mod progress;
pub use progress::Progress;

pub mod settings;
pub use settings::{ColorMode, ErrorHandling, Orientation, PageSize, Settings};

pub mod pdf;
pub use pdf::{PdfConverter, PdfObject};

pub mod image;
pub use image::ImageConverter;

pub mod mock;
pub use mock::MockLibrary;

/// Version string reported by the loaded native library
pub fn version(kind: Kind) -> Result<String> {
    Executor::global()?.run(move |session| Ok(session.library().version(kind)))
}

/// Whether the loaded native library was built against wkhtmltopdf's
/// patched Qt. Headers, footers, outlines and links need it.
pub fn extended_qt(kind: Kind) -> Result<bool> {
    Executor::global()?.run(move |session| Ok(session.library().extended_qt(kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn mock_executor() -> (Executor, MockLibrary) {
        let mock = MockLibrary::new();
        let executor = Executor::new(Arc::new(mock.clone())).unwrap();
        (executor, mock)
    }

    #[test]
    fn test_pdf_round_through_worker() {
        let (executor, mock) = mock_executor();
        let bytes = PdfConverter::new()
            .executor(executor)
            .object(PdfObject::for_html("<p>hello</p>").unwrap())
            .render_to_stream()
            .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(mock.converters_created(), 1);
        assert_eq!(mock.converters_destroyed(), 1);
    }

    #[test]
    fn test_image_round_through_worker() {
        let (executor, _) = mock_executor();
        let bytes = ImageConverter::from_html("<p>hello</p>")
            .executor(executor)
            .format("png")
            .render_to_stream()
            .unwrap();
        assert!(bytes.starts_with(b"MOCKIMG png"));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ConversionFailed("Error: boom".to_string());
        assert_eq!(err.to_string(), "Conversion returned with failure. Log:\nError: boom");
        let err = Error::InvalidObject("No content specified for object.".to_string());
        assert!(err.to_string().contains("No content specified"));
    }

    #[test]
    fn test_settings_reexport() {
        let s = Settings::new().with("orientation", Orientation::Portrait);
        assert_eq!(s.get("orientation"), Some("Portrait"));
    }
}
