//! PDF conversion: [`PdfConverter`] and its content objects.
//!
//! ```no_run
//! use wkhtmltox::{Orientation, PdfConverter, PdfObject};
//!
//! # fn main() -> wkhtmltox::Result<()> {
//! let ok = PdfConverter::new()
//!     .orientation(Orientation::Landscape)
//!     .margin_top("1cm")
//!     .object(PdfObject::for_html("<h1>Hello</h1>")?)
//!     .object(PdfObject::for_url("https://example.com/").print_media_type(true))
//!     .on_warning(|w| eprintln!("warning: {}", w))
//!     .render_to_path("hello.pdf")?;
//! assert!(ok);
//! # Ok(())
//! # }
//! ```

use crate::convert::Request;
use crate::executor::Executor;
use crate::native::Kind;
use crate::progress::{Callbacks, Progress};
use crate::settings::{ColorMode, ErrorHandling, Orientation, PageSize, Settings, PAGE_KEY};
use crate::{Error, Result};
use log::warn;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// One unit of PDF content: inline HTML or a page URL, plus its own settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfObject {
    pub(crate) settings: Settings,
    pub(crate) html: Option<String>,
}

impl PdfObject {
    /// Object rendered from an HTML string.
    ///
    /// Fails with [`Error::InvalidObject`] for an empty string or one that
    /// starts with NUL, since the library would see no content at all.
    pub fn for_html(html: impl Into<String>) -> Result<Self> {
        Self::for_html_with_settings(html, Settings::new())
    }

    pub fn for_html_with_settings(html: impl Into<String>, settings: Settings) -> Result<Self> {
        let html = html.into();
        if html.is_empty() || html.starts_with('\0') {
            return Err(Error::InvalidObject("No content specified for object.".to_string()));
        }
        Ok(Self {
            settings,
            html: Some(html),
        })
    }

    /// Object loaded from a URL by the library.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self::for_url_with_settings(url, Settings::new())
    }

    pub fn for_url_with_settings(url: impl Into<String>, mut settings: Settings) -> Self {
        let url: String = url.into();
        settings.set(PAGE_KEY, url);
        Self { settings, html: None }
    }

    /// Object loaded from a local file, relative paths resolved against the
    /// current directory.
    pub fn for_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path)?;
        let url = url::Url::from_file_path(&absolute)
            .map_err(|_| Error::ConfigError(format!("Cannot build a file URL for {}", path.display())))?;
        Ok(Self::for_url(url.to_string()))
    }

    /// HTML payload, if this object has one
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Set any object setting by its native name.
    pub fn setting(mut self, name: &str, value: impl ToString) -> Self {
        self.settings.set(name, value);
        self
    }

    // web.*

    pub fn show_background(self, background: bool) -> Self {
        self.setting("web.background", background)
    }

    pub fn load_images(self, load: bool) -> Self {
        self.setting("web.loadImages", load)
    }

    pub fn enable_javascript(self, enable: bool) -> Self {
        self.setting("web.enableJavascript", enable)
    }

    /// Let the library shrink content to fit the page width
    pub fn enable_intelligent_shrinking(self, enable: bool) -> Self {
        self.setting("web.enableIntelligentShrinking", enable)
    }

    pub fn minimum_font_size(self, size: u32) -> Self {
        self.setting("web.minimumFontSize", size)
    }

    pub fn print_media_type(self, print: bool) -> Self {
        self.setting("web.printMediaType", print)
    }

    pub fn default_encoding(self, encoding: &str) -> Self {
        self.setting("web.defaultEncoding", encoding)
    }

    /// URL or path of a stylesheet applied to the page
    pub fn user_style_sheet(self, url_or_path: &str) -> Self {
        self.setting("web.userStyleSheet", url_or_path)
    }

    // load.*

    pub fn auth_username(self, username: &str) -> Self {
        self.setting("load.username", username)
    }

    pub fn auth_password(self, password: &str) -> Self {
        self.setting("load.password", password)
    }

    /// Milliseconds to wait for javascript after the page loaded
    pub fn javascript_delay(self, delay_ms: u32) -> Self {
        self.setting("load.jsdelay", delay_ms)
    }

    pub fn zoom_factor(self, factor: f32) -> Self {
        self.setting("load.zoomFactor", factor)
    }

    pub fn block_local_file_access(self, block: bool) -> Self {
        self.setting("load.blockLocalFileAccess", block)
    }

    pub fn stop_slow_script(self, stop: bool) -> Self {
        self.setting("load.stopSlowScript", stop)
    }

    /// Forward javascript warnings and errors to the warning callback
    pub fn debug_javascript(self, debug: bool) -> Self {
        self.setting("load.debugJavascript", debug)
    }

    pub fn load_error_handling(self, handling: ErrorHandling) -> Self {
        self.setting("load.loadErrorHandling", handling)
    }

    // header.* / footer.*

    pub fn header_font_size(self, size: u32) -> Self {
        self.setting("header.fontSize", size)
    }

    pub fn header_font_name(self, name: &str) -> Self {
        self.setting("header.fontName", name)
    }

    pub fn header_line(self, line: bool) -> Self {
        self.setting("header.line", line)
    }

    pub fn header_spacing(self, spacing: u32) -> Self {
        self.setting("header.spacing", spacing)
    }

    pub fn header_html_url(self, url: &str) -> Self {
        self.setting("header.htmlUrl", url)
    }

    pub fn header_left(self, text: &str) -> Self {
        self.setting("header.left", text)
    }

    pub fn header_center(self, text: &str) -> Self {
        self.setting("header.center", text)
    }

    pub fn header_right(self, text: &str) -> Self {
        self.setting("header.right", text)
    }

    pub fn footer_font_size(self, size: u32) -> Self {
        self.setting("footer.fontSize", size)
    }

    pub fn footer_font_name(self, name: &str) -> Self {
        self.setting("footer.fontName", name)
    }

    pub fn footer_line(self, line: bool) -> Self {
        self.setting("footer.line", line)
    }

    pub fn footer_spacing(self, spacing: u32) -> Self {
        self.setting("footer.spacing", spacing)
    }

    pub fn footer_html_url(self, url: &str) -> Self {
        self.setting("footer.htmlUrl", url)
    }

    pub fn footer_left(self, text: &str) -> Self {
        self.setting("footer.left", text)
    }

    pub fn footer_center(self, text: &str) -> Self {
        self.setting("footer.center", text)
    }

    pub fn footer_right(self, text: &str) -> Self {
        self.setting("footer.right", text)
    }

    // toc.* and outline

    pub fn toc_dotted_lines(self, dotted: bool) -> Self {
        self.setting("toc.useDottedLines", dotted)
    }

    pub fn toc_caption_text(self, caption: &str) -> Self {
        self.setting("toc.captionText", caption)
    }

    pub fn toc_forward_links(self, forward: bool) -> Self {
        self.setting("toc.forwardLinks", forward)
    }

    pub fn toc_back_links(self, back: bool) -> Self {
        self.setting("toc.backLinks", back)
    }

    /// Indentation per toc level, e.g. "2em"
    pub fn toc_indentation(self, indentation: &str) -> Self {
        self.setting("toc.indentation", indentation)
    }

    pub fn toc_font_scale(self, scale: f32) -> Self {
        self.setting("toc.fontScale", scale)
    }

    pub fn include_in_outline(self, include: bool) -> Self {
        self.setting("includeInOutline", include)
    }

    pub fn use_external_links(self, external: bool) -> Self {
        self.setting("useExternalLinks", external)
    }

    /// Turn internal links into PDF references
    pub fn use_local_links(self, local: bool) -> Self {
        self.setting("useLocalLinks", local)
    }

    pub fn produce_forms(self, forms: bool) -> Self {
        self.setting("produceForms", forms)
    }

    pub fn pages_count(self, count: bool) -> Self {
        self.setting("pagesCount", count)
    }
}

/// Builder for one PDF document made of any number of [`PdfObject`]s.
///
/// Runs on [`Executor::global`] unless another executor is supplied with
/// [`PdfConverter::executor`].
#[derive(Debug, Clone, Default)]
pub struct PdfConverter {
    executor: Option<Executor>,
    settings: Settings,
    objects: Vec<PdfObject>,
    callbacks: Callbacks,
}

impl PdfConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Run conversions on `executor` instead of the process-wide one.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set any global setting by its native name.
    pub fn setting(mut self, name: &str, value: impl ToString) -> Self {
        self.settings.set(name, value);
        self
    }

    pub fn settings(mut self, settings: &Settings) -> Self {
        self.settings.merge(settings);
        self
    }

    pub fn page_size(self, size: PageSize) -> Self {
        self.setting("size.pageSize", size)
    }

    pub fn orientation(self, orientation: Orientation) -> Self {
        self.setting("orientation", orientation)
    }

    pub fn color_mode(self, mode: ColorMode) -> Self {
        self.setting("colorMode", mode)
    }

    pub fn dpi(self, dpi: u32) -> Self {
        self.setting("dpi", dpi)
    }

    pub fn collate(self, collate: bool) -> Self {
        self.setting("collate", collate)
    }

    pub fn outline(self, outline: bool) -> Self {
        self.setting("outline", outline)
    }

    pub fn outline_depth(self, depth: u32) -> Self {
        self.setting("outlineDepth", depth)
    }

    pub fn document_title(self, title: &str) -> Self {
        self.setting("documentTitle", title)
    }

    /// Lossless compression of the PDF
    pub fn compression(self, compression: bool) -> Self {
        self.setting("useCompression", compression)
    }

    /// CSS length, e.g. "5in" or "15px"
    pub fn margin_top(self, margin: &str) -> Self {
        self.setting("margin.top", margin)
    }

    pub fn margin_bottom(self, margin: &str) -> Self {
        self.setting("margin.bottom", margin)
    }

    pub fn margin_left(self, margin: &str) -> Self {
        self.setting("margin.left", margin)
    }

    pub fn margin_right(self, margin: &str) -> Self {
        self.setting("margin.right", margin)
    }

    pub fn image_dpi(self, dpi: u32) -> Self {
        self.setting("imageDPI", dpi)
    }

    /// JPEG quality of embedded images
    pub fn image_quality(self, quality: u32) -> Self {
        self.setting("imageQuality", quality)
    }

    pub fn cookie_jar(self, path: &str) -> Self {
        self.setting("load.cookieJar", path)
    }

    pub fn disable_smart_shrinking(self, disable: bool) -> Self {
        self.setting("disable-smart-shrinking", disable)
    }

    /// Append a content object; objects are rendered in the order added.
    pub fn object(mut self, object: PdfObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn objects(&self) -> &[PdfObject] {
        &self.objects
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

    /// Called when a new phase starts, with `percent` at 0
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
            kind: Kind::Pdf,
            settings: self.settings.clone(),
            data: None,
            objects: self.objects.clone(),
            callbacks: self.callbacks.clone(),
        }
    }

    /// Write the PDF to `path`.
    ///
    /// Returns the library's success flag. With no objects nothing is
    /// converted and `Ok(false)` comes back.
    pub fn render_to_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        if self.objects.is_empty() {
            warn!("No objects to render, skipping PDF conversion");
            return Ok(false);
        }
        self.request().render_to_path(self.executor.as_ref(), path.as_ref())
    }

    /// Render the PDF in memory.
    ///
    /// A failed conversion is [`Error::ConversionFailed`] carrying every
    /// warning and error the library reported.
    pub fn render_to_stream(&self) -> Result<Vec<u8>> {
        self.request().render_to_stream(self.executor.as_ref())
    }

    /// [`PdfConverter::render_to_stream`] into `writer`
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
    fn for_html_rejects_empty_content() {
        assert!(matches!(PdfObject::for_html(""), Err(Error::InvalidObject(_))));
        assert!(matches!(PdfObject::for_html("\0<p>x</p>"), Err(Error::InvalidObject(_))));
        assert!(PdfObject::for_html(" ").is_ok());
        assert!(PdfObject::for_html("plain text").is_ok());
    }

    #[test]
    fn for_url_stores_page_key() {
        let obj = PdfObject::for_url("https://example.com/");
        assert_eq!(obj.settings().get("page"), Some("https://example.com/"));
        assert_eq!(obj.html(), None);
    }

    #[test]
    fn for_file_builds_absolute_file_url() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page one.html");
        let obj = PdfObject::for_file(&path).unwrap();
        let page = obj.settings().get("page").unwrap();
        assert!(page.starts_with("file://"));
        assert!(page.ends_with("page%20one.html"));
    }

    #[test]
    fn with_settings_keeps_initial_values() {
        let base = Settings::new().with("web.background", false);
        let obj = PdfObject::for_url_with_settings("http://a/", base).zoom_factor(1.25);
        assert_eq!(obj.settings().get("web.background"), Some("false"));
        assert_eq!(obj.settings().get("load.zoomFactor"), Some("1.25"));
        assert_eq!(obj.settings().get("page"), Some("http://a/"));
    }

    #[test]
    fn object_setters_use_native_names() {
        let obj = PdfObject::for_html("<p/>")
            .unwrap()
            .load_error_handling(ErrorHandling::Skip)
            .header_center("[page]")
            .footer_line(true)
            .toc_font_scale(0.8)
            .pages_count(true);
        let s = obj.settings();
        assert_eq!(s.get("load.loadErrorHandling"), Some("skip"));
        assert_eq!(s.get("header.center"), Some("[page]"));
        assert_eq!(s.get("footer.line"), Some("true"));
        assert_eq!(s.get("toc.fontScale"), Some("0.8"));
        assert_eq!(s.get("pagesCount"), Some("true"));
    }

    #[test]
    fn global_setters_use_native_names() {
        let conv = PdfConverter::new()
            .page_size(PageSize::A4)
            .color_mode(ColorMode::Grayscale)
            .compression(false)
            .image_dpi(600)
            .disable_smart_shrinking(true);
        assert_eq!(conv.settings.get("size.pageSize"), Some("A4"));
        assert_eq!(conv.settings.get("colorMode"), Some("Grayscale"));
        assert_eq!(conv.settings.get("useCompression"), Some("false"));
        assert_eq!(conv.settings.get("imageDPI"), Some("600"));
        assert_eq!(conv.settings.get("disable-smart-shrinking"), Some("true"));
    }

    #[test]
    fn objects_keep_insertion_order() {
        let conv = PdfConverter::new()
            .object(PdfObject::for_url("http://1/"))
            .object(PdfObject::for_url("http://2/"));
        let pages: Vec<_> = conv.objects().iter().map(|o| o.settings().get("page").unwrap()).collect();
        assert_eq!(pages, vec!["http://1/", "http://2/"]);
    }

    #[test]
    fn empty_document_renders_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("empty.pdf");
        assert!(!PdfConverter::new().render_to_path(&out).unwrap());
        assert!(!out.exists());
    }
}
