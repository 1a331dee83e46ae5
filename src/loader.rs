//! Locating, staging and binding the native wkhtmltox library.
//!
//! The bundled binary is copied into a writable cache directory before it is
//! opened, so the process never maps a file from a read-only install location
//! that an upgrade might replace underneath it. Loading happens at most once
//! per process; a failure is remembered and handed back on every later call.

use crate::sys::{ImageFns, PdfFns};
use crate::{Error, Result};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Version directory of the bundled native artifact
pub const LIBRARY_VERSION: &str = "0.12.5";

/// Configuration for locating the native library
///
/// The defaults read the environment:
/// - `WKHTMLTOX_LIBRARY`: open this file directly and skip staging
/// - `WKHTMLTOX_BUNDLE_DIR`: directory holding the bundled artifact tree
///   (defaults to the directory of the running executable)
/// - `WKHTMLTOX_CACHE_DIR`: where the artifact is staged
///   (defaults to `<temp dir>/org.wkhtmltopdf`)
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Explicit library file, bypasses staging entirely
    pub library_path: Option<PathBuf>,
    /// Root of the bundled artifact tree
    pub bundle_dir: Option<PathBuf>,
    /// Writable directory the artifact is staged into
    pub cache_dir: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let bundle_dir = std::env::var_os("WKHTMLTOX_BUNDLE_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
            });
        Self {
            library_path: std::env::var_os("WKHTMLTOX_LIBRARY").map(PathBuf::from),
            bundle_dir,
            cache_dir: std::env::var_os("WKHTMLTOX_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("org.wkhtmltopdf")),
        }
    }
}

/// Relative path of the artifact for the current platform and architecture,
/// e.g. `wkhtmltox/0.12.5/libwkhtmltox.so` or `wkhtmltox/0.12.5/wkhtmltox.32.dll`.
pub fn artifact_path() -> PathBuf {
    let mut name = String::new();
    if !cfg!(windows) {
        name.push_str("lib");
    }
    name.push_str("wkhtmltox");
    if !cfg!(target_pointer_width = "64") {
        name.push_str(".32");
    }
    name.push_str(system_library_suffix());
    Path::new("wkhtmltox").join(LIBRARY_VERSION).join(name)
}

fn system_library_suffix() -> &'static str {
    if cfg!(windows) {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    }
}

/// Name handed to the dynamic linker when nothing is bundled.
pub fn system_library_name() -> String {
    if cfg!(windows) {
        "wkhtmltox.dll".to_string()
    } else {
        format!("libwkhtmltox{}", system_library_suffix())
    }
}

/// Make sure `cache_dir` exists and is writable, then copy the bundled
/// artifact into it unless an identical copy is already there.
///
/// Returns the path of the staged file.
pub fn stage(bundled: &Path, cache_dir: &Path) -> Result<PathBuf> {
    if !cache_dir.exists() {
        fs::create_dir_all(cache_dir).map_err(|e| {
            Error::ConfigError(format!(
                "Unable to create wkhtmltox cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;
    }
    let meta = fs::metadata(cache_dir)?;
    if !meta.is_dir() || meta.permissions().readonly() {
        return Err(Error::ConfigError(format!(
            "wkhtmltox cache directory {} is not writable",
            cache_dir.display()
        )));
    }

    if !bundled.is_file() {
        return Err(Error::LoadError(format!(
            "bundled library not found at {}",
            bundled.display()
        )));
    }

    let staged = cache_dir.join(artifact_path());
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::ConfigError(format!(
                "Unable to create directories for native library {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    if staged.exists() {
        let cached = file_digest(&staged)?;
        let fresh = file_digest(bundled)?;
        if cached == fresh {
            debug!("Reusing staged library {} ({})", staged.display(), cached);
            return Ok(staged);
        }
        info!(
            "Staged library {} is stale ({} != {}), replacing",
            staged.display(),
            cached,
            fresh
        );
    }

    fs::copy(bundled, &staged).map_err(|e| {
        Error::LoadError(format!(
            "Failed to copy {} to {}: {}",
            bundled.display(),
            staged.display(),
            e
        ))
    })?;
    info!("Staged native library at {}", staged.display());
    Ok(staged)
}

fn file_digest(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// A bound copy of the native library with both symbol families resolved.
pub struct Library {
    pub(crate) pdf: PdfFns,
    pub(crate) image: ImageFns,
    path: PathBuf,
    // Keeps the mapping alive for the function pointers above.
    _lib: libloading::Library,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

impl Library {
    /// Open a library file (or a bare name resolved by the dynamic linker)
    /// and resolve all entry points.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's static initializers; wkhtmltox
        // does nothing beyond Qt plugin registration there.
        let lib = unsafe { libloading::Library::new(path) }
            .map_err(|e| Error::LoadError(format!("{}: {}", path.display(), e)))?;
        let pdf = PdfFns::load(&lib)?;
        let image = ImageFns::load(&lib)?;
        debug!("Bound wkhtmltox entry points from {}", path.display());
        Ok(Self {
            pdf,
            image,
            path: path.to_path_buf(),
            _lib: lib,
        })
    }

    /// Resolve, stage and open the library according to `config`.
    pub fn load_with(config: &LoaderConfig) -> Result<Self> {
        if let Some(path) = &config.library_path {
            return Self::open(path);
        }

        let bundled = config.bundle_dir.as_ref().map(|dir| dir.join(artifact_path()));
        match bundled {
            Some(bundled) if bundled.is_file() => {
                let staged = stage(&bundled, &config.cache_dir)?;
                Self::open(staged)
            }
            _ => {
                debug!(
                    "No bundled {} found, falling back to the system library",
                    artifact_path().display()
                );
                Self::open(system_library_name())
            }
        }
    }

    /// Location the library was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

static INSTANCE: OnceLock<Result<Arc<Library>>> = OnceLock::new();

/// Process-wide library instance, loaded on first use with
/// [`LoaderConfig::default`].
pub fn load() -> Result<Arc<Library>> {
    match INSTANCE.get_or_init(|| Library::load_with(&LoaderConfig::default()).map(Arc::new)) {
        Ok(lib) => Ok(Arc::clone(lib)),
        Err(e) => Err(e.replay()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_is_versioned_and_platform_specific() {
        let path = artifact_path();
        let text = path.to_string_lossy();
        assert!(path.starts_with(Path::new("wkhtmltox").join(LIBRARY_VERSION)));
        assert!(text.ends_with(system_library_suffix()));
        if cfg!(all(unix, target_pointer_width = "64")) {
            assert!(text.contains("libwkhtmltox"));
            assert!(!text.contains(".32"));
        }
    }

    #[test]
    fn stage_creates_cache_dir_and_copies() {
        let tmp = tempfile::tempdir().unwrap();
        let bundled = tmp.path().join("bundle.bin");
        fs::write(&bundled, b"native bits").unwrap();
        let cache = tmp.path().join("nested").join("cache");

        let staged = stage(&bundled, &cache).unwrap();
        assert!(staged.starts_with(&cache));
        assert_eq!(fs::read(&staged).unwrap(), b"native bits");
    }

    #[test]
    fn stage_replaces_stale_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let bundled = tmp.path().join("bundle.bin");
        fs::write(&bundled, b"v1").unwrap();
        let staged = stage(&bundled, tmp.path()).unwrap();

        fs::write(&bundled, b"v2").unwrap();
        let again = stage(&bundled, tmp.path()).unwrap();
        assert_eq!(staged, again);
        assert_eq!(fs::read(&again).unwrap(), b"v2");
    }

    #[test]
    fn stage_without_bundle_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = stage(&tmp.path().join("missing.so"), tmp.path()).unwrap_err();
        assert!(matches!(err, Error::LoadError(_)));
    }

    #[test]
    fn stage_rejects_file_as_cache_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bundled = tmp.path().join("bundle.bin");
        fs::write(&bundled, b"x").unwrap();
        let not_a_dir = tmp.path().join("file");
        fs::write(&not_a_dir, b"").unwrap();

        let err = stage(&bundled, &not_a_dir).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn open_missing_library_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Library::open(tmp.path().join("nope.so")).unwrap_err();
        assert!(matches!(err, Error::LoadError(_)));
    }
}
