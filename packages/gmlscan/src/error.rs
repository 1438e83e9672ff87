//! Error types for the feature reader.
//!
//! Uses the dual-error pattern: `ReaderError` for failures that abort a call,
//! and `FeatureIssue` for recoverable problems attached to a single feature.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the reader library.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Malformed nesting or an unexpected end tag. Aborts the current read.
    #[error("Malformed document at depth {depth}: {message}")]
    StructuralParse { depth: usize, message: String },

    /// A class or property appeared after the class list was locked.
    #[error("Schema violation in class '{class}': {message}")]
    SchemaViolation { class: String, message: String },

    /// A geometry scope was still open when the document ended.
    #[error("Incomplete geometry '{slot}' in feature {}", .fid.as_deref().unwrap_or("<no fid>"))]
    IncompleteGeometry { fid: Option<String>, slot: String },

    /// The geometry builder rejected accumulated geometry markup.
    #[error("Geometry parse failed{}: {message}", .fid.as_ref().map(|f| format!(" for feature {f}")).unwrap_or_default())]
    GeometryParse {
        fid: Option<String>,
        message: String,
    },

    /// A link could not be resolved (only an error in strict mode).
    #[error("Unresolved link '{href}' on <{element}>")]
    DanglingLink { element: String, href: String },

    /// Could not open or read the event source.
    #[error("Cannot read {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No source file has been configured.
    #[error("No source file set")]
    NoSource,

    /// A call that is invalid in the reader's current state.
    #[error("Invalid reader state: {0}")]
    InvalidState(String),

    /// A configuration value could not be parsed.
    #[error("Invalid value '{value}' for option {option}")]
    InvalidOption { option: String, value: String },

    /// Persisted schema file is unreadable or inconsistent.
    #[error("Invalid schema file {}: {message}", .path.display())]
    InvalidSchema { path: PathBuf, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tokenizer error from the streaming backends.
    #[error("XML tokenizer error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Document parse failure during link resolution.
    #[error("XML parsing failed: {0}")]
    XmlDocument(#[from] roxmltree::Error),

    /// YAML (de)serialization of the schema file failed.
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ReaderError {
    /// Build a structural parse error.
    pub fn structural(depth: usize, message: impl Into<String>) -> Self {
        Self::StructuralParse {
            depth,
            message: message.into(),
        }
    }

    /// Whether this error only concerns one feature and the document read may go on.
    #[must_use]
    pub fn is_per_feature(&self) -> bool {
        matches!(
            self,
            Self::SchemaViolation { .. }
                | Self::IncompleteGeometry { .. }
                | Self::GeometryParse { .. }
                | Self::DanglingLink { .. }
        )
    }
}

/// Recoverable problem recorded on a feature instead of failing the read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureIssue {
    /// Value for a property the locked class does not declare was dropped.
    #[error("property '{property}' is not declared by the locked class; value dropped")]
    SchemaViolation { property: String },

    /// Geometry markup was cut off by the end of the document.
    #[error("geometry '{slot}' was not terminated before end of document")]
    IncompleteGeometry { slot: String },

    /// A link on this feature pointed at nothing.
    #[error("link '{href}' on property '{property}' could not be resolved")]
    DanglingLink { property: String, href: String },
}

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReaderError::structural(3, "unexpected </b>, expected </a>");
        assert_eq!(
            err.to_string(),
            "Malformed document at depth 3: unexpected </b>, expected </a>"
        );
    }

    #[test]
    fn test_incomplete_geometry_without_fid() {
        let err = ReaderError::IncompleteGeometry {
            fid: None,
            slot: "geom".to_string(),
        };
        assert_eq!(err.to_string(), "Incomplete geometry 'geom' in feature <no fid>");
    }

    #[test]
    fn test_geometry_parse_with_fid() {
        let err = ReaderError::GeometryParse {
            fid: Some("R1".to_string()),
            message: "no coordinates".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Geometry parse failed for feature R1: no coordinates"
        );
    }

    #[test]
    fn test_per_feature_classification() {
        assert!(ReaderError::DanglingLink {
            element: "river".to_string(),
            href: "#F9".to_string(),
        }
        .is_per_feature());
        assert!(!ReaderError::structural(0, "x").is_per_feature());
        assert!(!ReaderError::NoSource.is_per_feature());
    }

    #[test]
    fn test_feature_issue_display() {
        let issue = FeatureIssue::SchemaViolation {
            property: "colour".to_string(),
        };
        assert!(issue.to_string().contains("colour"));
    }
}
