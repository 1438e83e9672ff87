//! Persisted schema files.
//!
//! A prescan is expensive, so its result can be saved next to the document
//! and loaded on later opens. The file embeds a fingerprint of the document
//! (size and modification time) so stale schemas are ignored.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classes::ClassRegistry;
use crate::config::{SCHEMA_FILE_EXTENSION, SCHEMA_FORMAT_VERSION};
use crate::error::{ReaderError, Result};
use crate::types::{Extent, FeatureClass, GeometryKind, PropertyDefinition, PropertyType};

/// Identity of a document at the time its schema was inferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if the filesystem reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl SourceFingerprint {
    /// Fingerprint of the file at `path`.
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|source| ReaderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

/// Top-level schema file representation.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<SourceFingerprint>,
    classes: Vec<SchemaClass>,
}

/// Class representation for YAML serialization.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaClass {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element_path: Option<String>,
    #[serde(default)]
    properties: Vec<SchemaProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    geometry_slots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry_kind: Option<GeometryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    srs_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feature_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extent: Option<Extent>,
}

/// Property representation for YAML serialization.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaProperty {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element_path: Option<String>,
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    multi_valued: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    width: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl From<&PropertyDefinition> for SchemaProperty {
    fn from(p: &PropertyDefinition) -> Self {
        Self {
            name: p.name.clone(),
            element_path: (p.element_path != p.name).then(|| p.element_path.clone()),
            property_type: p.property_type,
            multi_valued: p.multi_valued,
            width: p.width,
        }
    }
}

impl From<SchemaProperty> for PropertyDefinition {
    fn from(p: SchemaProperty) -> Self {
        Self {
            element_path: p.element_path.unwrap_or_else(|| p.name.clone()),
            name: p.name,
            property_type: p.property_type,
            multi_valued: p.multi_valued,
            width: p.width,
        }
    }
}

impl From<&FeatureClass> for SchemaClass {
    fn from(c: &FeatureClass) -> Self {
        Self {
            name: c.name().to_string(),
            element_path: (c.element_path() != c.name()).then(|| c.element_path().to_string()),
            properties: c.properties().iter().map(SchemaProperty::from).collect(),
            geometry_slots: c.geometry_slots().to_vec(),
            geometry_kind: c.geometry_kind(),
            srs_name: c.srs_name().map(String::from),
            feature_count: c.feature_count(),
            extent: c.extent().copied(),
        }
    }
}

impl SchemaClass {
    fn into_class(self, path: &Path) -> Result<FeatureClass> {
        let mut class = FeatureClass::new(&self.name);
        if let Some(element_path) = self.element_path {
            class = class.with_element_path(element_path);
        }
        for property in self.properties {
            if class.property_index(&property.name).is_some() {
                return Err(ReaderError::InvalidSchema {
                    path: path.to_path_buf(),
                    message: format!(
                        "duplicate property '{}' in class '{}'",
                        property.name, self.name
                    ),
                });
            }
            class.add_property(property.into())?;
        }
        for slot in self.geometry_slots {
            class.add_geometry_slot(slot)?;
        }
        class.set_geometry_kind(self.geometry_kind);
        class.set_srs_name(self.srs_name);
        class.set_feature_count(self.feature_count);
        class.set_extent(self.extent);
        class.lock();
        Ok(class)
    }
}

/// Sidecar schema path for a document (`roads.gml` -> `roads.gfs`).
#[must_use]
pub fn schema_path_for(source: &Path) -> PathBuf {
    source.with_extension(SCHEMA_FILE_EXTENSION)
}

/// Generate the YAML text of a schema file.
pub fn generate_schema(
    classes: &ClassRegistry,
    fingerprint: Option<&SourceFingerprint>,
) -> Result<String> {
    let file = SchemaFile {
        version: SCHEMA_FORMAT_VERSION,
        source: fingerprint.cloned(),
        classes: classes.iter().map(SchemaClass::from).collect(),
    };
    let yaml = serde_yaml_ng::to_string(&file)?;
    Ok(format!("---\n{}", yaml.trim_start_matches("---\n")))
}

/// Save classes to `path`.
pub fn save_schema(
    path: &Path,
    classes: &ClassRegistry,
    fingerprint: Option<&SourceFingerprint>,
) -> Result<()> {
    let content = generate_schema(classes, fingerprint)?;
    write_atomic(path, &content)?;
    tracing::debug!(path = %path.display(), classes = classes.len(), "saved schema");
    Ok(())
}

/// Write `content` to `path`.
///
/// Uses atomic write pattern: writes to temp file, syncs to disk, then renames.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let temp_file = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file = File::create(&temp_file)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    // On Windows, rename fails if the destination already exists
    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path)?;
    }

    fs::rename(&temp_file, path)?;
    Ok(())
}

/// Parse schema text into a locked registry and its recorded fingerprint.
pub fn parse_schema(
    text: &str,
    path: &Path,
) -> Result<(ClassRegistry, Option<SourceFingerprint>)> {
    let file: SchemaFile = serde_yaml_ng::from_str(text)?;
    if file.version > SCHEMA_FORMAT_VERSION {
        return Err(ReaderError::InvalidSchema {
            path: path.to_path_buf(),
            message: format!("unsupported version {}", file.version),
        });
    }

    let mut registry = ClassRegistry::new();
    for class in file.classes {
        let class = class.into_class(path)?;
        registry.add_class(class).map_err(|err| ReaderError::InvalidSchema {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    }
    registry.lock();
    Ok((registry, file.source))
}

/// Load a schema file.
///
/// Returns `Ok(None)` when `expected` is given and the file's fingerprint
/// does not match it (the document changed since the schema was saved).
pub fn load_schema(
    path: &Path,
    expected: Option<&SourceFingerprint>,
) -> Result<Option<ClassRegistry>> {
    let text = fs::read_to_string(path).map_err(|source| ReaderError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let (registry, recorded) = parse_schema(&text, path)?;

    if let Some(expected) = expected {
        if recorded.as_ref() != Some(expected) {
            tracing::info!(path = %path.display(), "ignoring stale schema file");
            return Ok(None);
        }
    }
    Ok(Some(registry))
}
