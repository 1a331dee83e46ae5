//! Conversion settings: the name/value dictionary copied into native
//! settings objects, plus typed values for the common enumerated settings.
//!
//! Names are wkhtmltox's dot-namespaced setting names (`margin.top`,
//! `web.enableJavascript`, ...). Values are not validated here; the library
//! decides what it accepts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Output file path. Present: output goes to disk. Absent: output is kept in
/// memory and read back after conversion.
pub const OUTPUT_KEY: &str = "out";
/// Source URL of a PDF content object
pub const PAGE_KEY: &str = "page";
/// Source URL of an image conversion
pub const INPUT_KEY: &str = "in";

/// Name to value map; last write wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, stringifying the value (`true`/`false`, decimal numbers).
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.insert(name.into(), value.to_string());
        self
    }

    /// Builder-style [`Settings::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Copy every entry of `other` over this map
    pub fn merge(&mut self, other: &Settings) {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a flat JSON object. Strings are taken as-is, booleans and
    /// numbers are stringified; anything else is rejected.
    ///
    /// ```
    /// let s = wkhtmltox::Settings::from_json(r#"{"margin.top": "10mm", "outline": true, "dpi": 300}"#).unwrap();
    /// assert_eq!(s.get("outline"), Some("true"));
    /// assert_eq!(s.get("dpi"), Some("300"));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid settings JSON: {}", e)))?;
        let mut settings = Settings::new();
        for (name, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(Error::ConfigError(format!(
                        "Setting {} must be a string, boolean or number, got {}",
                        name, other
                    )))
                }
            };
            settings.0.insert(name, value);
        }
        Ok(settings)
    }

    /// Parse a `name=value` pair as given on a command line
    pub fn parse_pair(pair: &str) -> Result<(String, String)> {
        match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(Error::ConfigError(format!(
                "Expected name=value, got '{}'",
                pair
            ))),
        }
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (k, v) in iter {
            settings.set(k, v);
        }
        settings
    }
}

/// `orientation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Orientation::Portrait => "Portrait",
            Orientation::Landscape => "Landscape",
        })
    }
}

/// `colorMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Color,
    Grayscale,
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColorMode::Color => "Color",
            ColorMode::Grayscale => "Grayscale",
        })
    }
}

/// `size.pageSize`, named as Qt's QPrinter page sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    A3,
    A4,
    A5,
    B4,
    B5,
    Letter,
    Legal,
    Tabloid,
    Executive,
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PageSize::A3 => "A3",
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::B4 => "B4",
            PageSize::B5 => "B5",
            PageSize::Letter => "Letter",
            PageSize::Legal => "Legal",
            PageSize::Tabloid => "Tabloid",
            PageSize::Executive => "Executive",
        })
    }
}

/// `load.loadErrorHandling`: what to do when an object fails to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHandling {
    /// Fail the whole conversion
    Abort,
    /// Leave the object out
    Skip,
    /// Render whatever was loaded
    Ignore,
}

impl fmt::Display for ErrorHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorHandling::Abort => "abort",
            ErrorHandling::Skip => "skip",
            ErrorHandling::Ignore => "ignore",
        })
    }
}
