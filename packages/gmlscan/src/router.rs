//! Element event router.
//!
//! Turns the flat start/characters/end callbacks of an event source into
//! reader-level actions: opening features, assigning properties, capturing
//! geometry markup, and the special handling of bounding boxes, CityGML
//! generic attributes, unit-bearing values and links.

use std::collections::VecDeque;

use quick_xml::escape::escape;

use crate::classes::ClassRegistry;
use crate::config::{ReaderOptions, DEFAULT_GEOMETRY_SLOT};
use crate::error::{FeatureIssue, ReaderError, Result};
use crate::geometry::{geometry_kind, slot_extent, CoordinateBuilder, GeometryBuilder};
use crate::path::PathTracker;
use crate::source::{local_part, EventSink, StartElement};
use crate::types::{
    Extent, Feature, FeatureClass, FeatureId, GeometryKind, GeometrySlot, PropertyDefinition,
    PropertyType, PropertyValue,
};

/// What a document pass is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Schema inference; completed features are only counted.
    Prescan { compute_extents: bool },
    /// Feature extraction.
    Read,
}

/// Router behaviour for one pass.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub pass: PassKind,
    pub strict: bool,
    pub fetch_all_geometries: bool,
    pub max_property_depth: Option<usize>,
    pub filtered_class: Option<String>,
    /// Set the stop flag after this many completed features.
    pub feature_limit: Option<usize>,
}

impl RouterSettings {
    /// Settings for a schema prescan.
    #[must_use]
    pub fn prescan(options: &ReaderOptions, compute_extents: bool) -> Self {
        Self {
            pass: PassKind::Prescan { compute_extents },
            strict: options.strict,
            fetch_all_geometries: options.fetch_all_geometries,
            max_property_depth: options.max_property_depth,
            filtered_class: None,
            feature_limit: options.prescan_feature_limit,
        }
    }

    /// Settings for a read pass.
    #[must_use]
    pub fn read(options: &ReaderOptions, filtered_class: Option<String>) -> Self {
        Self {
            pass: PassKind::Read,
            strict: options.strict,
            fetch_all_geometries: options.fetch_all_geometries,
            max_property_depth: options.max_property_depth,
            filtered_class,
            feature_limit: None,
        }
    }
}

/// Arena owning features while they are under construction.
///
/// Path frames only hold [`FeatureId`]s into it.
#[derive(Debug, Default)]
pub struct FeatureArena {
    slots: Vec<Option<ArenaEntry>>,
    free: Vec<usize>,
}

#[derive(Debug)]
struct ArenaEntry {
    feature: Feature,
    class_index: usize,
}

impl FeatureArena {
    fn insert(&mut self, feature: Feature, class_index: usize) -> FeatureId {
        let entry = Some(ArenaEntry {
            feature,
            class_index,
        });
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = entry;
                FeatureId(index)
            }
            None => {
                self.slots.push(entry);
                FeatureId(self.slots.len() - 1)
            }
        }
    }

    fn get_mut(&mut self, id: FeatureId) -> Option<&mut ArenaEntry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn take(&mut self, id: FeatureId) -> Option<ArenaEntry> {
        let entry = self.slots.get_mut(id.0)?.take();
        if entry.is_some() {
            self.free.push(id.0);
        }
        entry
    }

    /// Features currently under construction.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Character data being collected for one property element.
#[derive(Debug)]
struct FieldScope {
    element_path: String,
    depth: usize,
    text: String,
    href: Option<String>,
    uom: Option<String>,
}

#[derive(Debug)]
enum CaptureKind {
    Geometry {
        slot: String,
        kind: GeometryKind,
        srs_name: Option<String>,
    },
    Embedded {
        property: String,
    },
    BoundingBox {
        feature_level: bool,
    },
}

/// Verbatim markup accumulation below a geometry or sub-feature element.
#[derive(Debug)]
struct Capture {
    kind: CaptureKind,
    depth: usize,
    buffer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenericChild {
    Name,
    Value,
}

/// Open CityGML generic attribute wrapper.
#[derive(Debug)]
struct GenericScope {
    depth: usize,
    name: Option<String>,
    value: Option<String>,
    hint: PropertyType,
    child: Option<GenericChild>,
    text: String,
}

/// Open `boundedBy` element.
#[derive(Debug, Clone, Copy)]
struct BoundedBy {
    depth: usize,
    feature_level: bool,
}

/// CityGML generic attribute wrapper names and the type they imply.
fn generic_attribute_hint(local_name: &str) -> Option<PropertyType> {
    match local_name {
        "stringAttribute" | "uriAttribute" | "genericAttribute" => Some(PropertyType::Generic),
        "intAttribute" => Some(PropertyType::Integer),
        "doubleAttribute" | "measureAttribute" => Some(PropertyType::Real),
        "dateAttribute" => Some(PropertyType::Date),
        _ => None,
    }
}

/// `featureMember`, `featureMembers`, `cityObjectMember`, `member`, ...
fn is_member_element(local_name: &str) -> bool {
    let lower = local_name.to_ascii_lowercase();
    lower.ends_with("member") || lower.ends_with("members")
}

fn parent_path(relative: &str) -> &str {
    relative.rsplit_once('|').map_or("", |(parent, _)| parent)
}

/// Backend-agnostic translation of markup events into reader actions.
#[derive(Debug)]
pub struct ElementRouter {
    settings: RouterSettings,
    path: PathTracker,
    arena: FeatureArena,
    completed: VecDeque<Feature>,
    stop: bool,
    field: Option<FieldScope>,
    capture: Option<Capture>,
    generic: Option<GenericScope>,
    bounded_by: Option<BoundedBy>,
    ignore_depth: Option<usize>,
    pending_candidates: Vec<String>,
    document_extent: Option<Extent>,
    warnings: Vec<String>,
    features_completed: usize,
}

impl ElementRouter {
    #[must_use]
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            settings,
            path: PathTracker::new(),
            arena: FeatureArena::default(),
            completed: VecDeque::new(),
            stop: false,
            field: None,
            capture: None,
            generic: None,
            bounded_by: None,
            ignore_depth: None,
            pending_candidates: Vec::new(),
            document_extent: None,
            warnings: Vec::new(),
            features_completed: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &PathTracker {
        &self.path
    }

    #[must_use]
    pub fn arena(&self) -> &FeatureArena {
        &self.arena
    }

    /// Next completed feature in document order.
    pub fn pop_completed(&mut self) -> Option<Feature> {
        self.completed.pop_front()
    }

    /// Number of completed features not yet collected.
    #[must_use]
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Drop completed features (prescan only needs their schema effects).
    pub fn discard_completed(&mut self) {
        self.completed.clear();
    }

    /// Features finished so far in this pass.
    #[must_use]
    pub fn features_completed(&self) -> usize {
        self.features_completed
    }

    /// Request the feed loop to end after the current event.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    /// Extent from a document-level `boundedBy`.
    #[must_use]
    pub fn document_extent(&self) -> Option<Extent> {
        self.document_extent
    }

    /// Collect warnings raised since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn is_prescan(&self) -> bool {
        matches!(self.settings.pass, PassKind::Prescan { .. })
    }

    fn computes_extents(&self) -> bool {
        matches!(
            self.settings.pass,
            PassKind::Prescan {
                compute_extents: true
            }
        )
    }

    fn warn(&mut self, message: String) {
        tracing::warn!(path = %self.path.path(), "{message}");
        self.warnings.push(message);
    }

    /// Handle a start tag.
    pub fn on_start(&mut self, element: &StartElement, classes: &mut ClassRegistry) -> Result<()> {
        let local = element.local_name();
        self.path.push(local);
        let depth = self.path.depth();

        if self.ignore_depth.is_some() {
            return Ok(());
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.buffer.push('<');
            capture.buffer.push_str(&element.qname);
            capture.buffer.push_str(&element.attributes.serialized());
            capture.buffer.push('>');
            return Ok(());
        }

        if let Some(scope) = self.generic.as_mut() {
            // Only direct children of the wrapper carry the name and value.
            if depth == scope.depth + 1 {
                scope.child = match local {
                    "name" => Some(GenericChild::Name),
                    "value" => Some(GenericChild::Value),
                    _ => None,
                };
                scope.text.clear();
            }
            return Ok(());
        }

        if let Some(bounded_by) = self.bounded_by {
            if geometry_kind(local).is_some() {
                self.begin_capture(
                    element,
                    depth,
                    CaptureKind::BoundingBox {
                        feature_level: bounded_by.feature_level,
                    },
                );
            }
            return Ok(());
        }

        match self.path.current_feature() {
            None => self.start_outside_feature(element, depth, classes),
            Some((_, feature_depth)) => {
                self.start_inside_feature(element, depth, feature_depth);
                Ok(())
            }
        }
    }

    fn begin_capture(&mut self, element: &StartElement, depth: usize, kind: CaptureKind) {
        self.field = None;
        self.capture = Some(Capture {
            kind,
            depth,
            buffer: format!("<{}{}>", element.qname, element.attributes.serialized()),
        });
    }

    fn start_outside_feature(
        &mut self,
        element: &StartElement,
        depth: usize,
        classes: &mut ClassRegistry,
    ) -> Result<()> {
        let local = element.local_name();

        if let Some(class_index) = self.feature_class_for(local, depth, classes)? {
            let Some(class) = classes.class(class_index) else {
                return Ok(());
            };
            if let Some(filter) = self.settings.filtered_class.as_deref() {
                if filter != class.name() {
                    self.ignore_depth = Some(depth);
                    return Ok(());
                }
            }

            let fid = element.attributes.fid().map(String::from);
            tracing::trace!(class = class.name(), fid = ?fid, depth, "feature opened");
            let feature = Feature::new(class.name(), fid, depth);
            let id = self.arena.insert(feature, class_index);
            self.path.set_feature(id);
        } else if local == "boundedBy" {
            self.bounded_by = Some(BoundedBy {
                depth,
                feature_level: false,
            });
        }
        Ok(())
    }

    /// Class of the element just pushed, if it is a feature-class element.
    fn feature_class_for(
        &mut self,
        local: &str,
        depth: usize,
        classes: &mut ClassRegistry,
    ) -> Result<Option<usize>> {
        if let Some(index) = classes.match_path(&self.path) {
            return Ok(Some(index));
        }
        if !self.path.parent_component().is_some_and(is_member_element) {
            return Ok(None);
        }
        if let Some(index) = classes.class_index(local) {
            return Ok(Some(index));
        }
        if classes.is_locked() {
            let err = ReaderError::SchemaViolation {
                class: local.to_string(),
                message: "feature class not in locked class list".to_string(),
            };
            if self.settings.strict {
                return Err(err);
            }
            self.warn(err.to_string());
            self.ignore_depth = Some(depth);
            return Ok(None);
        }
        tracing::debug!(class = local, "new feature class");
        classes.add_class(FeatureClass::new(local)).map(Some)
    }

    fn start_inside_feature(&mut self, element: &StartElement, depth: usize, feature_depth: usize) {
        let local = element.local_name();
        let relative = self.path.relative_path(feature_depth);
        let level = depth - feature_depth;

        if let Some(kind) = geometry_kind(local) {
            let slot = match parent_path(&relative) {
                "" => DEFAULT_GEOMETRY_SLOT.to_string(),
                parent => parent.to_string(),
            };
            let srs_name = element.attributes.get("srsName").map(String::from);
            self.begin_capture(
                element,
                depth,
                CaptureKind::Geometry {
                    slot,
                    kind,
                    srs_name,
                },
            );
            return;
        }

        if level == 1 && local == "boundedBy" {
            self.field = None;
            self.bounded_by = Some(BoundedBy {
                depth,
                feature_level: true,
            });
            return;
        }

        if let Some(hint) = generic_attribute_hint(local) {
            self.field = None;
            self.generic = Some(GenericScope {
                depth,
                name: element.attributes.get("name").map(String::from),
                value: None,
                hint,
                child: None,
                text: String::new(),
            });
            return;
        }

        if level >= 2 && element.attributes.fid().is_some() {
            let property = parent_path(&relative).to_string();
            self.begin_capture(element, depth, CaptureKind::Embedded { property });
            return;
        }

        // A field that receives a child element is a container, not a property.
        if let Some(container) = self.field.take() {
            self.note_candidate(&container.element_path);
        }

        if self.settings.max_property_depth.is_some_and(|max| level > max) {
            self.note_candidate(&relative);
            return;
        }

        self.field = Some(FieldScope {
            element_path: relative,
            depth,
            text: String::new(),
            href: element.attributes.get("href").map(String::from),
            uom: element.attributes.get("uom").map(String::from),
        });
    }

    fn note_candidate(&mut self, element_path: &str) {
        if !self.is_prescan() {
            return;
        }
        tracing::trace!(element = element_path, "unclassified container element");
        self.pending_candidates.push(element_path.to_string());
    }

    /// Handle character data; chunks are concatenated in arrival order.
    pub fn on_characters(&mut self, text: &str) {
        if self.ignore_depth.is_some() {
            return;
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.buffer.push_str(&escape(text));
        } else if let Some(scope) = self.generic.as_mut() {
            if scope.child.is_some() && self.path.depth() == scope.depth + 1 {
                scope.text.push_str(text);
            }
        } else if let Some(field) = self.field.as_mut() {
            if field.depth == self.path.depth() {
                field.text.push_str(text);
            }
        }
    }

    /// Handle an end tag.
    pub fn on_end(&mut self, qname: &str, classes: &mut ClassRegistry) -> Result<()> {
        let local = local_part(qname);
        let depth = self.path.depth();
        match self.path.last_component() {
            Some(open) if open == local => {}
            open => {
                return Err(ReaderError::structural(
                    depth,
                    format!(
                        "unexpected </{qname}>, expected {}",
                        open.map_or("no end tag".to_string(), |o| format!("</{o}>"))
                    ),
                ));
            }
        }

        let result = self.dispatch_end(qname, depth, classes);
        self.path.pop();
        result
    }

    fn dispatch_end(&mut self, qname: &str, depth: usize, classes: &mut ClassRegistry) -> Result<()> {
        if let Some(ignore) = self.ignore_depth {
            if depth == ignore {
                self.ignore_depth = None;
            }
            return Ok(());
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.buffer.push_str("</");
            capture.buffer.push_str(qname);
            capture.buffer.push('>');
            if capture.depth == depth {
                if let Some(capture) = self.capture.take() {
                    self.finish_capture(capture, classes)?;
                }
            }
            return Ok(());
        }

        if let Some(scope) = self.generic.as_mut() {
            if depth > scope.depth + 1 {
                return Ok(());
            }
            if depth == scope.depth + 1 {
                let text = std::mem::take(&mut scope.text);
                match scope.child.take() {
                    Some(GenericChild::Name) => scope.name = Some(text.trim().to_string()),
                    Some(GenericChild::Value) => scope.value = Some(text),
                    None => {}
                }
                return Ok(());
            }
            if let Some(scope) = self.generic.take() {
                self.finish_generic(scope, classes)?;
            }
            return Ok(());
        }

        if let Some(bounded_by) = self.bounded_by {
            if bounded_by.depth == depth {
                self.bounded_by = None;
            }
            return Ok(());
        }

        if self.field.as_ref().is_some_and(|f| f.depth == depth) {
            if let Some(field) = self.field.take() {
                self.finish_field(field, classes)?;
            }
        }

        if let Some((id, feature_depth)) = self.path.current_feature() {
            if feature_depth == depth {
                self.finish_feature(id, classes);
            }
        }
        Ok(())
    }

    fn finish_field(&mut self, field: FieldScope, classes: &mut ClassRegistry) -> Result<()> {
        let text = field.text.trim().to_string();
        let value = match (field.href, field.uom) {
            (Some(href), _) => PropertyValue::Link(href),
            (None, Some(uom)) => PropertyValue::Measure { value: text, uom },
            (None, None) => PropertyValue::Text(text),
        };
        self.assign_property(&field.element_path, value, None, classes)
    }

    fn finish_generic(&mut self, scope: GenericScope, classes: &mut ClassRegistry) -> Result<()> {
        let Some(name) = scope.name.filter(|n| !n.is_empty()) else {
            self.warn("generic attribute without a name ignored".to_string());
            return Ok(());
        };
        let value = PropertyValue::Text(scope.value.unwrap_or_default().trim().to_string());
        self.assign_property(&name, value, Some(scope.hint), classes)
    }

    /// Store a value on the open feature, growing or checking the class schema.
    fn assign_property(
        &mut self,
        element_path: &str,
        value: PropertyValue,
        hint: Option<PropertyType>,
        classes: &mut ClassRegistry,
    ) -> Result<()> {
        let Some((id, _)) = self.path.current_feature() else {
            return Ok(());
        };
        let strict = self.settings.strict;
        let Some(entry) = self.arena.get_mut(id) else {
            return Ok(());
        };
        let Some(class) = classes.class_mut(entry.class_index) else {
            return Ok(());
        };

        let index = match class.property_index_by_element(element_path) {
            Some(index) => index,
            None if !class.is_locked() => {
                tracing::trace!(class = class.name(), property = element_path, "new property");
                class.add_property(PropertyDefinition::new(element_path))?
            }
            None => {
                let err = ReaderError::SchemaViolation {
                    class: class.name().to_string(),
                    message: format!("undeclared property '{element_path}'"),
                };
                if strict {
                    return Err(err);
                }
                entry.feature.push_issue(FeatureIssue::SchemaViolation {
                    property: element_path.to_string(),
                });
                let message = err.to_string();
                self.warn(message);
                return Ok(());
            }
        };

        let locked = class.is_locked();
        let Some(definition) = class.property_mut(index) else {
            return Ok(());
        };
        let repeated = entry.feature.set_property(&definition.name, value.clone());
        if !locked {
            definition.observe(&value);
            if let Some(hint) = hint {
                definition.property_type = definition.property_type.merge(hint);
            }
            definition.multi_valued |= repeated;
        }
        Ok(())
    }

    fn finish_capture(&mut self, capture: Capture, classes: &mut ClassRegistry) -> Result<()> {
        match capture.kind {
            CaptureKind::Geometry {
                slot,
                kind,
                srs_name,
            } => self.attach_geometry(
                GeometrySlot {
                    name: slot,
                    kind,
                    raw: capture.buffer,
                    srs_name,
                },
                classes,
            ),
            CaptureKind::Embedded { property } => self.assign_property(
                &property,
                PropertyValue::Embedded(capture.buffer),
                None,
                classes,
            ),
            CaptureKind::BoundingBox { feature_level } => {
                let Ok(extent) = CoordinateBuilder
                    .parse_geometry_markup(&capture.buffer)
                    .map(|g| g.extent())
                else {
                    self.warn("unreadable boundedBy envelope ignored".to_string());
                    return Ok(());
                };
                let Some(extent) = extent else {
                    return Ok(());
                };
                if !feature_level {
                    Extent::merge_into(&mut self.document_extent, &extent);
                } else if self.computes_extents() {
                    let class_index = self
                        .path
                        .current_feature()
                        .and_then(|(id, _)| self.arena.get_mut(id))
                        .map(|entry| entry.class_index);
                    if let Some(class) = class_index.and_then(|i| classes.class_mut(i)) {
                        class.merge_extent(&extent);
                    }
                }
                Ok(())
            }
        }
    }

    fn attach_geometry(&mut self, geometry: GeometrySlot, classes: &mut ClassRegistry) -> Result<()> {
        let Some((id, _)) = self.path.current_feature() else {
            return Ok(());
        };
        let strict = self.settings.strict;
        let fetch_all = self.settings.fetch_all_geometries;
        let Some(entry) = self.arena.get_mut(id) else {
            return Ok(());
        };
        if !fetch_all && !entry.feature.geometries().is_empty() {
            tracing::debug!(slot = %geometry.name, "additional geometry skipped");
            return Ok(());
        }
        let Some(class) = classes.class_mut(entry.class_index) else {
            return Ok(());
        };

        if let Err(err) = class.add_geometry_slot(geometry.name.as_str()) {
            if strict {
                return Err(err);
            }
            entry.feature.push_issue(FeatureIssue::SchemaViolation {
                property: geometry.name.clone(),
            });
            self.warn(err.to_string());
            return Ok(());
        }
        if !class.is_locked() {
            class.observe_geometry_kind(geometry.kind);
            if class.srs_name().is_none() {
                class.set_srs_name(geometry.srs_name.clone());
            }
        }
        entry.feature.push_geometry(geometry);
        Ok(())
    }

    fn finish_feature(&mut self, id: FeatureId, classes: &mut ClassRegistry) {
        let Some(entry) = self.arena.take(id) else {
            return;
        };
        let candidates = std::mem::take(&mut self.pending_candidates);
        if let Some(class) = classes.class_mut(entry.class_index) {
            if self.is_prescan() {
                class.increment_feature_count();
                for candidate in &candidates {
                    class.note_candidate(candidate);
                }
            }
            if self.computes_extents() {
                for extent in entry.feature.geometries().iter().filter_map(slot_extent) {
                    class.merge_extent(&extent);
                }
            }
        }
        tracing::trace!(class = entry.feature.class_name(), fid = ?entry.feature.fid(), "feature complete");

        self.features_completed += 1;
        if self
            .settings
            .feature_limit
            .is_some_and(|limit| self.features_completed >= limit)
        {
            self.stop = true;
        }
        self.completed.push_back(entry.feature);
    }

    /// Handle end of input.
    pub fn on_end_document(&mut self, classes: &mut ClassRegistry) -> Result<()> {
        let depth = self.path.depth();
        if depth == 0 {
            return Ok(());
        }

        let open_geometry = match self.capture.take() {
            Some(Capture {
                kind: CaptureKind::Geometry { slot, .. },
                ..
            }) => Some(slot),
            _ => None,
        };
        let open_feature = self.path.current_feature();

        if let (Some(slot), Some((id, _))) = (open_geometry, open_feature) {
            let fid = self
                .arena
                .get_mut(id)
                .and_then(|e| e.feature.fid().map(String::from));
            let err = ReaderError::IncompleteGeometry { fid, slot: slot.clone() };
            if self.settings.strict {
                return Err(err);
            }
            self.warn(err.to_string());
            if let Some(entry) = self.arena.get_mut(id) {
                entry.feature.push_issue(FeatureIssue::IncompleteGeometry { slot });
            }
            self.finish_feature(id, classes);
            self.path.clear();
            self.field = None;
            self.generic = None;
            self.bounded_by = None;
            return Ok(());
        }

        Err(ReaderError::structural(
            depth,
            format!("document ended inside <{}>", self.path.path()),
        ))
    }
}

/// Adapter lending the router and class registry to an event source.
pub struct RouterSink<'a> {
    pub router: &'a mut ElementRouter,
    pub classes: &'a mut ClassRegistry,
}

impl EventSink for RouterSink<'_> {
    fn start_element(&mut self, element: &StartElement) -> Result<()> {
        self.router.on_start(element, self.classes)
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.router.on_characters(text);
        Ok(())
    }

    fn end_element(&mut self, qname: &str) -> Result<()> {
        self.router.on_end(qname, self.classes)
    }

    fn end_document(&mut self) -> Result<()> {
        self.router.on_end_document(self.classes)
    }

    fn should_stop(&self) -> bool {
        self.router.is_stopped()
    }

    fn has_completed(&self) -> bool {
        self.router.completed_len() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Attributes;

    fn start(router: &mut ElementRouter, classes: &mut ClassRegistry, qname: &str, attrs: &[(&str, &str)]) {
        let attributes = Attributes::new(
            attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        router
            .on_start(&StartElement::new(qname, attributes), classes)
            .unwrap();
    }

    fn leaf(router: &mut ElementRouter, classes: &mut ClassRegistry, qname: &str, text: &str) {
        start(router, classes, qname, &[]);
        router.on_characters(text);
        router.on_end(qname, classes).unwrap();
    }

    fn prescan_router() -> ElementRouter {
        ElementRouter::new(RouterSettings::prescan(&ReaderOptions::default(), true))
    }

    #[test]
    fn test_member_child_becomes_feature() {
        let mut router = prescan_router();
        let mut classes = ClassRegistry::new();
        start(&mut router, &mut classes, "wfs:FeatureCollection", &[]);
        start(&mut router, &mut classes, "gml:featureMember", &[]);
        start(&mut router, &mut classes, "app:Road", &[("fid", "R1")]);
        leaf(&mut router, &mut classes, "app:name", "Main");
        start(&mut router, &mut classes, "app:info", &[]);
        leaf(&mut router, &mut classes, "app:lanes", "2");
        router.on_end("app:info", &mut classes).unwrap();
        router.on_end("app:Road", &mut classes).unwrap();

        let feature = router.pop_completed().unwrap();
        assert_eq!(feature.class_name(), "Road");
        assert_eq!(feature.fid(), Some("R1"));
        assert_eq!(feature.property("info|lanes").and_then(PropertyValue::as_i64), Some(2));

        let road = classes.class_by_name("Road").unwrap();
        assert_eq!(road.property_count(), 2);
        assert_eq!(road.feature_count(), Some(1));
        assert_eq!(road.candidates(), ["info".to_string()]);
        assert_eq!(router.arena().open_count(), 0);
    }

    #[test]
    fn test_mismatched_end_tag_is_structural() {
        let mut router = prescan_router();
        let mut classes = ClassRegistry::new();
        start(&mut router, &mut classes, "a", &[]);
        start(&mut router, &mut classes, "b", &[]);
        let err = router.on_end("a", &mut classes).unwrap_err();
        assert!(matches!(err, ReaderError::StructuralParse { depth: 2, .. }));
    }

    #[test]
    fn test_geometry_markup_is_captured_verbatim() {
        let mut router = prescan_router();
        let mut classes: ClassRegistry = [FeatureClass::new("City")].into_iter().collect();
        start(&mut router, &mut classes, "City", &[]);
        start(&mut router, &mut classes, "geom", &[]);
        start(&mut router, &mut classes, "gml:Point", &[("srsName", "EPSG:4326")]);
        leaf(&mut router, &mut classes, "gml:coordinates", "1,2");
        router.on_end("gml:Point", &mut classes).unwrap();
        router.on_end("geom", &mut classes).unwrap();
        router.on_end("City", &mut classes).unwrap();

        let feature = router.pop_completed().unwrap();
        let slot = feature.geometry("geom").unwrap();
        assert_eq!(
            slot.raw,
            r#"<gml:Point srsName="EPSG:4326"><gml:coordinates>1,2</gml:coordinates></gml:Point>"#
        );
        let city = classes.class(0).unwrap();
        assert_eq!(city.geometry_slots(), ["geom".to_string()]);
        assert_eq!(city.property_count(), 0);
        assert_eq!(city.srs_name(), Some("EPSG:4326"));
        assert_eq!(city.extent(), Some(&Extent::from_point(1.0, 2.0)));
    }

    #[test]
    fn test_generic_attribute_uses_wrapper_type() {
        let mut router = prescan_router();
        let mut classes: ClassRegistry = [FeatureClass::new("Building")].into_iter().collect();
        start(&mut router, &mut classes, "bldg:Building", &[]);
        start(&mut router, &mut classes, "gen:intAttribute", &[("name", "storeys")]);
        leaf(&mut router, &mut classes, "gen:value", "4");
        router.on_end("gen:intAttribute", &mut classes).unwrap();
        router.on_end("bldg:Building", &mut classes).unwrap();

        let feature = router.pop_completed().unwrap();
        assert_eq!(feature.property("storeys").and_then(PropertyValue::as_text), Some("4"));
        let property = classes.class(0).unwrap().property(0).unwrap();
        assert_eq!(property.name, "storeys");
        assert_eq!(property.property_type, PropertyType::Integer);
    }

    #[test]
    fn test_generic_attribute_ignores_nested_elements() {
        let mut router = prescan_router();
        let mut classes: ClassRegistry = [FeatureClass::new("Building")].into_iter().collect();
        start(&mut router, &mut classes, "bldg:Building", &[]);
        start(&mut router, &mut classes, "gen:stringAttribute", &[("name", "usage")]);
        start(&mut router, &mut classes, "gen:value", &[]);
        router.on_characters("off");
        leaf(&mut router, &mut classes, "gen:name", "x");
        router.on_characters("ice");
        router.on_end("gen:value", &mut classes).unwrap();
        router.on_end("gen:stringAttribute", &mut classes).unwrap();
        router.on_end("bldg:Building", &mut classes).unwrap();

        let feature = router.pop_completed().unwrap();
        assert_eq!(feature.property("usage").and_then(PropertyValue::as_text), Some("office"));
        assert!(feature.property("x").is_none());
        let building = classes.class(0).unwrap();
        assert_eq!(building.property_count(), 1);
        assert_eq!(building.property(0).unwrap().name, "usage");
    }

    #[test]
    fn test_locked_class_reports_undeclared_property() {
        let mut router = ElementRouter::new(RouterSettings::read(&ReaderOptions::default(), None));
        let mut classes: ClassRegistry = [FeatureClass::new("Road")].into_iter().collect();
        classes.lock();
        start(&mut router, &mut classes, "Road", &[]);
        leaf(&mut router, &mut classes, "surprise", "x");
        router.on_end("Road", &mut classes).unwrap();

        let feature = router.pop_completed().unwrap();
        assert!(feature.properties().is_empty());
        assert_eq!(
            feature.issues(),
            [FeatureIssue::SchemaViolation {
                property: "surprise".to_string()
            }]
        );
        assert_eq!(router.take_warnings().len(), 1);
    }

    #[test]
    fn test_filtered_class_is_never_built() {
        let settings = RouterSettings::read(&ReaderOptions::default(), Some("Road".to_string()));
        let mut router = ElementRouter::new(settings);
        let mut classes = ClassRegistry::new();
        start(&mut router, &mut classes, "featureMembers", &[]);
        start(&mut router, &mut classes, "River", &[("fid", "W1")]);
        assert_eq!(router.arena().open_count(), 0);
        leaf(&mut router, &mut classes, "name", "Rhine");
        router.on_end("River", &mut classes).unwrap();
        start(&mut router, &mut classes, "Road", &[("fid", "R1")]);
        assert_eq!(router.arena().open_count(), 1);
        router.on_end("Road", &mut classes).unwrap();

        assert_eq!(router.features_completed(), 1);
        assert_eq!(router.pop_completed().unwrap().fid(), Some("R1"));
        assert!(router.pop_completed().is_none());
        assert_eq!(classes.class_by_name("River").unwrap().property_count(), 0);
    }

    #[test]
    fn test_feature_limit_sets_stop() {
        let options = ReaderOptions {
            prescan_feature_limit: Some(1),
            ..ReaderOptions::default()
        };
        let mut router = ElementRouter::new(RouterSettings::prescan(&options, false));
        let mut classes = ClassRegistry::new();
        start(&mut router, &mut classes, "featureMembers", &[]);
        start(&mut router, &mut classes, "Road", &[]);
        assert!(!router.is_stopped());
        router.on_end("Road", &mut classes).unwrap();
        assert!(router.is_stopped());
    }
}
