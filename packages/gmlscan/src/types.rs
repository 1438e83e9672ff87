//! Core data types: feature classes, their property definitions, and features.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FeatureIssue, ReaderError, Result};

/// Integer literal, optionally signed.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static INTEGER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("valid regex"));

/// Decimal literal with optional fraction and exponent.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static REAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid regex")
});

/// Calendar date, optionally followed by a time of day and zone.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}[-/]\d{2}[-/]\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("valid regex")
});

/// Scalar type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// No non-empty value observed yet.
    #[default]
    Generic,
    Integer,
    Real,
    String,
    Date,
}

impl PropertyType {
    /// Name used in the schema file and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::String => "string",
            Self::Date => "date",
        }
    }

    /// Infer the type of a literal from its lexical form.
    ///
    /// # Examples
    /// ```
    /// use gmlscan::types::PropertyType;
    ///
    /// assert_eq!(PropertyType::infer("123"), PropertyType::Integer);
    /// assert_eq!(PropertyType::infer("-1.5e3"), PropertyType::Real);
    /// assert_eq!(PropertyType::infer("2024-05-01"), PropertyType::Date);
    /// assert_eq!(PropertyType::infer("Main St"), PropertyType::String);
    /// assert_eq!(PropertyType::infer("  "), PropertyType::Generic);
    /// ```
    #[must_use]
    pub fn infer(literal: &str) -> Self {
        let literal = literal.trim();
        if literal.is_empty() {
            Self::Generic
        } else if INTEGER_PATTERN.is_match(literal) {
            // Out-of-range integers still hold a usable real value.
            if literal.parse::<i64>().is_ok() {
                Self::Integer
            } else {
                Self::Real
            }
        } else if REAL_PATTERN.is_match(literal) {
            Self::Real
        } else if DATE_PATTERN.is_match(literal) {
            Self::Date
        } else {
            Self::String
        }
    }

    /// Combine two observed types; integer widens to real, other conflicts fall back to string.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Generic, t) | (t, Self::Generic) => t,
            (a, b) if a == b => a,
            (Self::Integer, Self::Real) | (Self::Real, Self::Integer) => Self::Real,
            _ => Self::String,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of one property of a feature class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    /// Property name, unique within the class.
    pub name: String,
    /// Element path relative to the feature element.
    pub element_path: String,
    /// Inferred or declared scalar type.
    pub property_type: PropertyType,
    /// Seen more than once inside a single feature.
    pub multi_valued: bool,
    /// Longest string value observed.
    pub width: usize,
}

impl PropertyDefinition {
    /// Create an untyped definition whose name is its element path.
    #[must_use]
    pub fn new(element_path: impl Into<String>) -> Self {
        let element_path = element_path.into();
        Self {
            name: element_path.clone(),
            element_path,
            property_type: PropertyType::Generic,
            multi_valued: false,
            width: 0,
        }
    }

    /// Builder-style type declaration.
    #[must_use]
    pub fn with_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = property_type;
        self
    }

    /// Fold one observed value into the inferred type.
    pub fn observe(&mut self, value: &PropertyValue) {
        for item in value.items() {
            let Some(literal) = item.as_text() else {
                continue;
            };
            self.width = self.width.max(literal.chars().count());
            self.property_type = self.property_type.merge(item.literal_type(literal));
        }
    }
}

/// Broad kind of geometry held by a geometry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Surface,
    Solid,
    Envelope,
    /// Mixed kinds across features.
    Unknown,
}

impl GeometryKind {
    /// Combine kinds seen on different features.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Unknown
        }
    }
}

/// Axis-aligned 2D bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Degenerate extent around one point.
    #[must_use]
    pub fn from_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Grow to include a point.
    pub fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Grow to include another extent.
    pub fn merge(&mut self, other: &Self) {
        self.expand(other.min_x, other.min_y);
        self.expand(other.max_x, other.max_y);
    }

    /// Merge into an optional extent.
    pub fn merge_into(target: &mut Option<Self>, other: &Self) {
        match target {
            Some(extent) => extent.merge(other),
            None => *target = Some(*other),
        }
    }
}

/// Inferred or loaded structure of one feature type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureClass {
    name: String,
    element_path: String,
    properties: Vec<PropertyDefinition>,
    geometry_slots: Vec<String>,
    geometry_kind: Option<GeometryKind>,
    srs_name: Option<String>,
    feature_count: Option<u64>,
    extent: Option<Extent>,
    candidates: Vec<String>,
    locked: bool,
}

impl FeatureClass {
    /// Create an unlocked class matched by its own element name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            element_path: name.clone(),
            name,
            ..Self::default()
        }
    }

    /// Builder-style element path (a `|`-joined suffix such as `cityObjectMember|Building`).
    #[must_use]
    pub fn with_element_path(mut self, element_path: impl Into<String>) -> Self {
        self.element_path = element_path.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element_path(&self) -> &str {
        &self.element_path
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn property(&self, index: usize) -> Option<&PropertyDefinition> {
        self.properties.get(index)
    }

    /// Index of the property with the given name.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Index of the property read from the given relative element path.
    #[must_use]
    pub fn property_index_by_element(&self, element_path: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| p.element_path == element_path)
    }

    pub(crate) fn property_mut(&mut self, index: usize) -> Option<&mut PropertyDefinition> {
        self.properties.get_mut(index)
    }

    /// Add a property definition, returning its index.
    ///
    /// Fails with a schema violation once the class is locked.
    pub fn add_property(&mut self, definition: PropertyDefinition) -> Result<usize> {
        if let Some(index) = self.property_index(&definition.name) {
            return Ok(index);
        }
        if self.locked {
            return Err(ReaderError::SchemaViolation {
                class: self.name.clone(),
                message: format!("cannot add property '{}'", definition.name),
            });
        }
        self.properties.push(definition);
        Ok(self.properties.len() - 1)
    }

    #[must_use]
    pub fn geometry_slots(&self) -> &[String] {
        &self.geometry_slots
    }

    #[must_use]
    pub fn has_geometry_slot(&self, slot: &str) -> bool {
        self.geometry_slots.iter().any(|s| s == slot)
    }

    /// Declare a geometry slot.
    pub fn add_geometry_slot(&mut self, slot: impl Into<String>) -> Result<()> {
        let slot = slot.into();
        if self.has_geometry_slot(&slot) {
            return Ok(());
        }
        if self.locked {
            return Err(ReaderError::SchemaViolation {
                class: self.name.clone(),
                message: format!("cannot add geometry slot '{slot}'"),
            });
        }
        self.geometry_slots.push(slot);
        Ok(())
    }

    #[must_use]
    pub fn geometry_kind(&self) -> Option<GeometryKind> {
        self.geometry_kind
    }

    pub fn set_geometry_kind(&mut self, kind: Option<GeometryKind>) {
        self.geometry_kind = kind;
    }

    /// Fold an observed geometry kind into the class.
    pub fn observe_geometry_kind(&mut self, kind: GeometryKind) {
        self.geometry_kind = Some(match self.geometry_kind {
            Some(current) => current.merge(kind),
            None => kind,
        });
    }

    #[must_use]
    pub fn srs_name(&self) -> Option<&str> {
        self.srs_name.as_deref()
    }

    pub fn set_srs_name(&mut self, srs_name: Option<String>) {
        self.srs_name = srs_name;
    }

    #[must_use]
    pub fn feature_count(&self) -> Option<u64> {
        self.feature_count
    }

    pub fn set_feature_count(&mut self, count: Option<u64>) {
        self.feature_count = count;
    }

    pub(crate) fn increment_feature_count(&mut self) {
        self.feature_count = Some(self.feature_count.unwrap_or(0) + 1);
    }

    #[must_use]
    pub fn extent(&self) -> Option<&Extent> {
        self.extent.as_ref()
    }

    pub fn set_extent(&mut self, extent: Option<Extent>) {
        self.extent = extent;
    }

    pub(crate) fn merge_extent(&mut self, extent: &Extent) {
        Extent::merge_into(&mut self.extent, extent);
    }

    /// Container elements seen during prescan that were not promoted to properties.
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub(crate) fn note_candidate(&mut self, element_path: &str) {
        if !self.candidates.iter().any(|c| c == element_path) {
            self.candidates.push(element_path.to_string());
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Freeze the structure. Further properties and slots are rejected.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}

/// Handle of a feature stored in the reader's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(pub usize);

/// Value of one property on a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Character data of the property element.
    Text(String),
    /// Repeated occurrences within one feature, in document order.
    List(Vec<PropertyValue>),
    /// Unresolved `xlink:href` reference.
    Link(String),
    /// Value with a unit of measure.
    Measure { value: String, uom: String },
    /// Serialized markup of an embedded sub-feature.
    Embedded(String),
}

impl PropertyValue {
    /// Text form of a single-valued property.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Link(s) | Self::Embedded(s) => Some(s),
            Self::Measure { value, .. } => Some(value),
            Self::List(_) => None,
        }
    }

    /// Integer value, if the text parses as one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_text()?.trim().parse().ok()
    }

    /// Real value, if the text parses as a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_text()?.trim().parse().ok()
    }

    /// Single values held by this value: the list items, or the value itself.
    #[must_use]
    pub fn items(&self) -> &[PropertyValue] {
        match self {
            Self::List(items) => items,
            single => std::slice::from_ref(single),
        }
    }

    /// Text of every single value, in document order.
    #[must_use]
    pub fn literals(&self) -> Vec<&str> {
        self.items().iter().filter_map(Self::as_text).collect()
    }

    fn into_items(self) -> Vec<PropertyValue> {
        match self {
            Self::List(items) => items,
            single => vec![single],
        }
    }

    fn literal_type(&self, literal: &str) -> PropertyType {
        match self {
            Self::Link(_) | Self::Embedded(_) => PropertyType::String,
            _ => PropertyType::infer(literal),
        }
    }
}

/// Raw geometry markup accumulated for one geometry slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySlot {
    /// Slot name (relative path of the element holding the geometry).
    pub name: String,
    /// Kind derived from the outermost geometry element.
    pub kind: GeometryKind,
    /// Verbatim reconstruction of the geometry markup.
    pub raw: String,
    /// `srsName` attribute of the outermost geometry element.
    pub srs_name: Option<String>,
}

/// One decoded feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    class_name: String,
    fid: Option<String>,
    properties: Vec<(String, PropertyValue)>,
    geometries: Vec<GeometrySlot>,
    depth: usize,
    issues: Vec<FeatureIssue>,
}

impl Feature {
    /// Create an empty feature of a class, opened at `depth`.
    #[must_use]
    pub fn new(class_name: impl Into<String>, fid: Option<String>, depth: usize) -> Self {
        Self {
            class_name: class_name.into(),
            fid,
            properties: Vec::new(),
            geometries: Vec::new(),
            depth,
            issues: Vec::new(),
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn fid(&self) -> Option<&str> {
        self.fid.as_deref()
    }

    /// Element depth at which the feature was opened.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Properties in order of first appearance.
    #[must_use]
    pub fn properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }

    /// Look up a property by name. `None` means unset; an empty text is a set value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Set a property, turning repeated assignments into a list.
    ///
    /// Returns `true` when the property already had a value.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> bool {
        let Some(slot) = self
            .properties
            .iter_mut()
            .find_map(|(n, v)| (n == name).then_some(v))
        else {
            self.properties.push((name.to_string(), value));
            return false;
        };

        let incoming = value.into_items();
        match slot {
            PropertyValue::List(items) => items.extend(incoming),
            existing => {
                let mut items =
                    std::mem::replace(existing, PropertyValue::List(Vec::new())).into_items();
                items.extend(incoming);
                *existing = PropertyValue::List(items);
            }
        }
        true
    }

    #[must_use]
    pub fn geometries(&self) -> &[GeometrySlot] {
        &self.geometries
    }

    /// Geometry slot by name.
    #[must_use]
    pub fn geometry(&self, slot: &str) -> Option<&GeometrySlot> {
        self.geometries.iter().find(|g| g.name == slot)
    }

    pub(crate) fn push_geometry(&mut self, slot: GeometrySlot) {
        self.geometries.push(slot);
    }

    /// Recoverable problems met while decoding this feature.
    #[must_use]
    pub fn issues(&self) -> &[FeatureIssue] {
        &self.issues
    }

    pub(crate) fn push_issue(&mut self, issue: FeatureIssue) {
        self.issues.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_integer_overflow_is_real() {
        assert_eq!(
            PropertyType::infer("123456789012345678901234567890"),
            PropertyType::Real
        );
    }

    #[test]
    fn test_type_merge() {
        use PropertyType::*;
        assert_eq!(Generic.merge(Integer), Integer);
        assert_eq!(Integer.merge(Real), Real);
        assert_eq!(Real.merge(Integer), Real);
        assert_eq!(Integer.merge(String), String);
        assert_eq!(Date.merge(Integer), String);
        assert_eq!(Date.merge(Date), Date);
    }

    #[test]
    fn test_definition_observe_promotes() {
        let mut def = PropertyDefinition::new("height");
        def.observe(&PropertyValue::Text("123".to_string()));
        assert_eq!(def.property_type, PropertyType::Integer);
        def.observe(&PropertyValue::Text("12.5".to_string()));
        assert_eq!(def.property_type, PropertyType::Real);
        def.observe(&PropertyValue::Text(String::new()));
        assert_eq!(def.property_type, PropertyType::Real);
        assert_eq!(def.width, 4);
    }

    #[test]
    fn test_link_values_are_strings() {
        let mut def = PropertyDefinition::new("river");
        def.observe(&PropertyValue::Link("#12".to_string()));
        assert_eq!(def.property_type, PropertyType::String);
    }

    #[test]
    fn test_locked_class_rejects_new_property() {
        let mut class = FeatureClass::new("Road");
        class.add_property(PropertyDefinition::new("name")).unwrap();
        class.lock();

        assert_eq!(class.add_property(PropertyDefinition::new("name")).unwrap(), 0);
        let err = class
            .add_property(PropertyDefinition::new("lanes"))
            .unwrap_err();
        assert!(matches!(err, ReaderError::SchemaViolation { .. }));
        assert!(class.add_geometry_slot("geom").is_err());
    }

    #[test]
    fn test_set_property_repeats_become_list() {
        let mut feature = Feature::new("Road", None, 2);
        assert!(!feature.set_property("alias", PropertyValue::Text("A1".to_string())));
        assert!(feature.set_property("alias", PropertyValue::Text("E35".to_string())));
        feature.set_property("alias", PropertyValue::Text("N1".to_string()));

        assert_eq!(
            feature.property("alias"),
            Some(&PropertyValue::List(vec![
                PropertyValue::Text("A1".to_string()),
                PropertyValue::Text("E35".to_string()),
                PropertyValue::Text("N1".to_string()),
            ]))
        );
        assert_eq!(
            feature.property("alias").map(PropertyValue::literals),
            Some(vec!["A1", "E35", "N1"])
        );
    }

    #[test]
    fn test_repeated_measures_and_links_keep_their_kind() {
        let mut feature = Feature::new("Road", None, 2);
        for (value, uom) in [("1", "m"), ("2", "km")] {
            feature.set_property(
                "width",
                PropertyValue::Measure {
                    value: value.to_string(),
                    uom: uom.to_string(),
                },
            );
        }
        feature.set_property("operator", PropertyValue::Link("#X".to_string()));
        feature.set_property("operator", PropertyValue::Link("#Y".to_string()));

        let widths = feature.property("width").unwrap().items();
        assert!(matches!(&widths[1], PropertyValue::Measure { uom, .. } if uom == "km"));
        assert_eq!(
            feature.property("operator"),
            Some(&PropertyValue::List(vec![
                PropertyValue::Link("#X".to_string()),
                PropertyValue::Link("#Y".to_string()),
            ]))
        );

        let mut def = PropertyDefinition::new("operator");
        def.observe(&PropertyValue::List(vec![PropertyValue::Link("#12".to_string())]));
        assert_eq!(def.property_type, PropertyType::String);
    }

    #[test]
    fn test_unset_vs_empty() {
        let mut feature = Feature::new("Road", None, 2);
        feature.set_property("name", PropertyValue::Text(String::new()));
        assert_eq!(feature.property("name"), Some(&PropertyValue::Text(String::new())));
        assert_eq!(feature.property("width"), None);
    }

    #[test]
    fn test_extent_merge() {
        let mut extent = Extent::from_point(1.0, 2.0);
        extent.expand(-1.0, 5.0);
        let mut target = None;
        Extent::merge_into(&mut target, &extent);
        Extent::merge_into(&mut target, &Extent::from_point(3.0, 0.0));
        assert_eq!(
            target,
            Some(Extent {
                min_x: -1.0,
                min_y: 0.0,
                max_x: 3.0,
                max_y: 5.0
            })
        );
    }

    #[test]
    fn test_geometry_kind_merge() {
        assert_eq!(GeometryKind::Point.merge(GeometryKind::Point), GeometryKind::Point);
        assert_eq!(
            GeometryKind::Point.merge(GeometryKind::Polygon),
            GeometryKind::Unknown
        );
    }
}
