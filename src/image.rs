//! Image conversion through wkhtmltoimage.

use crate::convert::Request;
use crate::executor::Executor;
use crate::native::Kind;
use crate::progress::{Callbacks, Progress};
use crate::settings::{Settings, INPUT_KEY};
use crate::Result;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Builder for a single image, rendered from inline HTML or from the URL set
/// with [`ImageConverter::input`].
#[derive(Debug, Clone, Default)]
pub struct ImageConverter {
    executor: Option<Executor>,
    settings: Settings,
    html: Option<String>,
    callbacks: Callbacks,
}

impl ImageConverter {
    /// Render `html`. An empty string means no payload, so `in` must be set.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self::from_html_with_settings(html, Settings::new())
    }

    pub fn from_html_with_settings(html: impl Into<String>, settings: Settings) -> Self {
        let html = html.into();
        Self {
            settings,
            html: (!html.is_empty()).then_some(html),
            ..Self::default()
        }
    }

    /// Render the page at `url`.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self::default().input(&url)
    }

    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn setting(mut self, name: &str, value: impl ToString) -> Self {
        self.settings.set(name, value);
        self
    }

    pub fn settings(mut self, settings: &Settings) -> Self {
        self.settings.merge(settings);
        self
    }

    pub fn crop_left(self, px: u32) -> Self {
        self.setting("crop.left", px)
    }

    pub fn crop_top(self, px: u32) -> Self {
        self.setting("crop.top", px)
    }

    pub fn crop_width(self, px: u32) -> Self {
        self.setting("crop.width", px)
    }

    pub fn crop_height(self, px: u32) -> Self {
        self.setting("crop.height", px)
    }

    pub fn cookie_jar(self, path: &str) -> Self {
        self.setting("load.cookieJar", path)
    }

    /// Make the white background transparent (PNG and SVG only)
    pub fn transparent(self, transparent: bool) -> Self {
        self.setting("transparent", transparent)
    }

    /// URL or path of the page to render, `-` for stdin
    pub fn input(self, url: &str) -> Self {
        self.setting(INPUT_KEY, url)
    }

    /// One of `jpg`, `png`, `bmp` or `svg`; empty lets the library guess
    /// from the output name.
    pub fn format(self, format: &str) -> Self {
        self.setting("fmt", format)
    }

    pub fn screen_width(self, px: u32) -> Self {
        self.setting("screenWidth", px)
    }

    /// Widen the screen past `screenWidth` when the content does not fit
    pub fn smart_width(self, smart: bool) -> Self {
        self.setting("smartWidth", smart)
    }

    /// JPEG compression quality
    pub fn quality(self, quality: u32) -> Self {
        self.setting("quality", quality)
    }

    pub fn on_warning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.warning.push(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.error.push(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.callbacks.progress.push(Arc::new(f));
        self
    }

    pub fn on_phase_changed(mut self, f: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.callbacks.phase.push(Arc::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.callbacks.finished.push(Arc::new(f));
        self
    }

    pub fn on_success(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_finished(move |ok| {
            if ok {
                f()
            }
        })
    }

    pub fn on_failure(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_finished(move |ok| {
            if !ok {
                f()
            }
        })
    }

    fn request(&self) -> Request {
        Request {
            kind: Kind::Image,
            settings: self.settings.clone(),
            data: self.html.clone(),
            objects: Vec::new(),
            callbacks: self.callbacks.clone(),
        }
    }

    /// Write the image to `path`; returns the library's success flag.
    pub fn render_to_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.request().render_to_path(self.executor.as_ref(), path.as_ref())
    }

    /// Render in memory. Failure is [`crate::Error::ConversionFailed`] with
    /// the library's log.
    pub fn render_to_stream(&self) -> Result<Vec<u8>> {
        self.request().render_to_stream(self.executor.as_ref())
    }

    pub fn render_to_writer(&self, mut writer: impl Write) -> Result<()> {
        let bytes = self.render_to_stream()?;
        writer.write_all(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_html_means_no_payload() {
        assert_eq!(ImageConverter::from_html("").html, None);
        assert_eq!(ImageConverter::from_html("<b>x</b>").html.as_deref(), Some("<b>x</b>"));
    }

    #[test]
    fn from_url_sets_input() {
        let conv = ImageConverter::from_url("https://example.com/");
        assert_eq!(conv.settings.get("in"), Some("https://example.com/"));
        assert!(conv.html.is_none());
    }

    #[test]
    fn setters_use_native_names() {
        let conv = ImageConverter::from_html("<p/>")
            .crop_width(320)
            .format("png")
            .transparent(true)
            .smart_width(false)
            .quality(90);
        assert_eq!(conv.settings.get("crop.width"), Some("320"));
        assert_eq!(conv.settings.get("fmt"), Some("png"));
        assert_eq!(conv.settings.get("transparent"), Some("true"));
        assert_eq!(conv.settings.get("smartWidth"), Some("false"));
        assert_eq!(conv.settings.get("quality"), Some("90"));
    }
}
