//! Configuration constants and reader options.

use std::str::FromStr;

use crate::error::{ReaderError, Result};

/// Events delivered per pump of the pull backend.
pub const DEFAULT_TOKEN_BUDGET: usize = 1000;

/// Bytes of input consumed per pump of the batch backend (64 KiB).
pub const DEFAULT_BATCH_BYTES: usize = 64 * 1024;

/// Read buffer capacity for the underlying file handle.
pub const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Extension of the persisted schema sidecar file.
pub const SCHEMA_FILE_EXTENSION: &str = "gfs";

/// Format version written into persisted schema files.
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

/// Suffix of the document written by link resolution.
pub const RESOLVED_SUFFIX: &str = ".resolved.gml";

/// Nesting limit when resolving links inside already inlined content.
pub const MAX_LINK_DEPTH: usize = 8;

/// Fallback geometry slot name when the geometry is a direct feature child.
pub const DEFAULT_GEOMETRY_SLOT: &str = "geometry";

/// Which event-source backend drives the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Token-budgeted pull loop that yields as soon as a feature completes.
    #[default]
    Pull,
    /// Byte-budgeted batches that may complete several features per pump.
    Batch,
}

impl Backend {
    /// Name used in logs and configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Batch => "batch",
        }
    }
}

impl FromStr for Backend {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" | "xerces" => Ok(Self::Pull),
            "batch" | "expat" => Ok(Self::Batch),
            _ => Err(ReaderError::InvalidOption {
                option: "GML_PARSER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Options controlling a reader session.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Event-source backend.
    pub backend: Backend,
    /// Turn recoverable schema, geometry and link problems into failures.
    pub strict: bool,
    /// Keep every geometry slot instead of only the first one.
    pub fetch_all_geometries: bool,
    /// Events per pull pump.
    pub token_budget: usize,
    /// Input bytes per batch pump.
    pub batch_bytes: usize,
    /// Stop prescan once this many features were observed.
    pub prescan_feature_limit: Option<usize>,
    /// Elements deeper than this many levels below the feature are not promoted to properties.
    pub max_property_depth: Option<usize>,
    /// Element names whose links are left unresolved.
    pub skip_resolve_elements: Vec<String>,
    /// Write the schema sidecar after a prescan in [`crate::FeatureReader::open`].
    pub save_schema: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            strict: false,
            fetch_all_geometries: false,
            token_budget: DEFAULT_TOKEN_BUDGET,
            batch_bytes: DEFAULT_BATCH_BYTES,
            prescan_feature_limit: None,
            max_property_depth: None,
            skip_resolve_elements: Vec::new(),
            save_schema: false,
        }
    }
}

impl ReaderOptions {
    /// Defaults overridden by `GML_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(value) = lookup("GML_PARSER") {
            options.backend = value.parse()?;
        }
        if let Some(value) = lookup("GML_FETCH_ALL_GEOMETRIES") {
            options.fetch_all_geometries = parse_flag("GML_FETCH_ALL_GEOMETRIES", &value)?;
        }
        if let Some(value) = lookup("GML_STRICT") {
            options.strict = parse_flag("GML_STRICT", &value)?;
        }
        if let Some(value) = lookup("GML_SKIP_RESOLVE_ELEMS") {
            options.skip_resolve_elements = parse_list(&value);
        }

        Ok(options)
    }

    /// Builder-style backend selection.
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Builder-style strict mode.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Parse a boolean configuration flag.
///
/// # Examples
/// ```
/// use gmlscan::config::parse_flag;
///
/// assert!(parse_flag("X", "YES").unwrap());
/// assert!(!parse_flag("X", "off").unwrap());
/// assert!(parse_flag("X", "maybe").is_err());
/// ```
pub fn parse_flag(option: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(ReaderError::InvalidOption {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Split a comma separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("pull".parse::<Backend>().unwrap(), Backend::Pull);
        assert_eq!("EXPAT".parse::<Backend>().unwrap(), Backend::Batch);
        assert!("sax".parse::<Backend>().is_err());
    }

    #[test]
    fn test_options_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GML_PARSER", "batch"),
            ("GML_STRICT", "yes"),
            ("GML_SKIP_RESOLVE_ELEMS", "river, ,road"),
        ]);
        let options = ReaderOptions::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(options.backend, Backend::Batch);
        assert!(options.strict);
        assert!(!options.fetch_all_geometries);
        assert_eq!(options.skip_resolve_elements, vec!["river", "road"]);
    }

    #[test]
    fn test_options_from_lookup_invalid_flag() {
        let result = ReaderOptions::from_lookup(|k| {
            (k == "GML_FETCH_ALL_GEOMETRIES").then(|| "perhaps".to_string())
        });
        assert!(matches!(result, Err(ReaderError::InvalidOption { .. })));
    }

    #[test]
    fn test_defaults() {
        let options = ReaderOptions::default();
        assert_eq!(options.backend, Backend::Pull);
        assert_eq!(options.token_budget, DEFAULT_TOKEN_BUDGET);
        assert_eq!(options.batch_bytes, DEFAULT_BATCH_BYTES);
    }
}
