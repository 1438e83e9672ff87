//! Feature reader orchestration.
//!
//! [`FeatureReader`] coordinates three passes over one document:
//!
//! 1. **Prescan** ([`FeatureReader::prescan_for_schema`]): infer the feature
//!    classes, then lock them.
//! 2. **Read** ([`FeatureReader::next_feature`]): stream features in document
//!    order, validated against the class list.
//! 3. **Link resolution** ([`FeatureReader::resolve_links`]): write a copy of
//!    the document with references inlined and switch to it.
//!
//! # Example
//!
//! ```no_run
//! use gmlscan::{FeatureReader, ReaderOptions};
//!
//! let mut reader = FeatureReader::open("roads.gml", ReaderOptions::default())?;
//! while let Some(feature) = reader.next_feature()? {
//!     println!("{} {:?}", feature.class_name(), feature.fid());
//! }
//! # Ok::<(), gmlscan::ReaderError>(())
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::classes::ClassRegistry;
use crate::config::ReaderOptions;
use crate::error::{FeatureIssue, ReaderError, Result};
use crate::links::{self, LinkResolution};
use crate::router::{ElementRouter, RouterSettings, RouterSink};
use crate::schema::{self, SourceFingerprint};
use crate::source::{open_source, EventSource};
use crate::types::{Extent, Feature, FeatureClass, PropertyValue};

/// Where a reader is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No schema yet and no read in progress.
    Idle,
    Prescanning,
    /// Classes are locked; reading starts from the top of the document.
    ClassesLoaded,
    Reading,
    /// The document was read to the end.
    Done,
    /// The last pass failed; see [`FeatureReader::last_error`].
    Error,
}

/// An open event source with the router state for one pass.
struct Session {
    source: Box<dyn EventSource>,
    router: ElementRouter,
    exhausted: bool,
    pending_error: Option<ReaderError>,
}

/// Streaming, schema-inferring reader over one document at a time.
pub struct FeatureReader {
    options: ReaderOptions,
    source_path: Option<PathBuf>,
    classes: ClassRegistry,
    state: ReaderState,
    session: Option<Session>,
    filtered_class: Option<String>,
    document_extent: Option<Extent>,
    dangling_hrefs: HashSet<String>,
    warnings: Vec<String>,
    last_error: Option<String>,
}

impl FeatureReader {
    /// Create a reader without a source.
    #[must_use]
    pub fn new(options: ReaderOptions) -> Self {
        Self {
            options,
            source_path: None,
            classes: ClassRegistry::new(),
            state: ReaderState::Idle,
            session: None,
            filtered_class: None,
            document_extent: None,
            dangling_hrefs: HashSet::new(),
            warnings: Vec::new(),
            last_error: None,
        }
    }

    /// Open a document with its schema ready.
    ///
    /// Loads the `.gfs` sidecar when it matches the document, otherwise
    /// prescans (and saves the sidecar if `options.save_schema` is set).
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = Self::new(options);
        reader.set_source_file(path);

        let sidecar = schema::schema_path_for(path);
        if sidecar.exists() {
            match reader.load_classes(Some(sidecar.as_path())) {
                Ok(true) => return Ok(reader),
                Ok(false) => {}
                Err(err) => reader.warn(format!("ignoring schema file: {err}")),
            }
        }

        reader.prescan_for_schema(true)?;
        if reader.options.save_schema {
            if let Err(err) = reader.save_classes(Some(sidecar.as_path())) {
                reader.warn(format!("cannot save schema: {err}"));
            }
        }
        Ok(reader)
    }

    /// Point the reader at another document. Classes are kept.
    pub fn set_source_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!(path = %path.display(), "source file set");
        self.source_path = Some(path);
        self.session = None;
        self.document_extent = None;
        self.dangling_hrefs.clear();
        self.state = self.resting_state();
    }

    #[must_use]
    pub fn source_file(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    #[must_use]
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    fn resting_state(&self) -> ReaderState {
        if self.classes.is_locked() {
            ReaderState::ClassesLoaded
        } else {
            ReaderState::Idle
        }
    }

    fn source_required(&self) -> Result<PathBuf> {
        self.source_path.clone().ok_or(ReaderError::NoSource)
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// Remember the message of a failed call.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
        }
        result
    }

    /// Infer the class list from a full pass over the document, then lock it.
    ///
    /// Classes added beforehand are kept and extended. With `compute_extents`
    /// each class also gets the bounding box of its features.
    pub fn prescan_for_schema(&mut self, compute_extents: bool) -> Result<()> {
        let result = self.prescan(compute_extents);
        if result.is_err() {
            self.state = ReaderState::Error;
        }
        self.track(result)
    }

    fn prescan(&mut self, compute_extents: bool) -> Result<()> {
        let path = self.source_required()?;
        self.session = None;
        self.state = ReaderState::Prescanning;
        self.classes.set_locked(false);

        let mut source = open_source(&path, &self.options)?;
        let mut router = ElementRouter::new(RouterSettings::prescan(&self.options, compute_extents));
        loop {
            let pump = source.pump(&mut RouterSink {
                router: &mut router,
                classes: &mut self.classes,
            });
            self.warnings.extend(router.take_warnings());
            router.discard_completed();
            if !pump?.more_available || router.is_stopped() {
                break;
            }
        }

        self.document_extent = router.document_extent();
        self.classes.lock();
        self.state = ReaderState::ClassesLoaded;
        tracing::info!(
            path = %path.display(),
            classes = self.classes.len(),
            features = router.features_completed(),
            bytes = source.bytes_read(),
            "prescan complete"
        );
        Ok(())
    }

    /// Restart reading from the top of the document.
    pub fn reset_reading(&mut self) {
        self.session = None;
        self.state = self.resting_state();
    }

    fn start_session(&mut self) -> Result<()> {
        let path = self.source_required()?;
        let source = open_source(&path, &self.options)?;
        let settings = RouterSettings::read(&self.options, self.filtered_class.clone());
        self.session = Some(Session {
            source,
            router: ElementRouter::new(settings),
            exhausted: false,
            pending_error: None,
        });
        self.state = ReaderState::Reading;
        Ok(())
    }

    /// Next feature in document order, `Ok(None)` at the end.
    ///
    /// A document-level error is returned once after every feature completed
    /// before it has been delivered; later calls return `Ok(None)` until
    /// [`reset_reading`](Self::reset_reading).
    pub fn next_feature(&mut self) -> Result<Option<Feature>> {
        let result = self.read_next();
        if result.is_err() {
            self.state = ReaderState::Error;
        }
        self.track(result)
    }

    fn read_next(&mut self) -> Result<Option<Feature>> {
        match self.state {
            ReaderState::Done | ReaderState::Error => return Ok(None),
            ReaderState::Reading if self.session.is_some() => {}
            _ => self.start_session()?,
        }

        let Self {
            session,
            classes,
            warnings,
            dangling_hrefs,
            state,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            return Ok(None);
        };

        loop {
            if let Some(mut feature) = session.router.pop_completed() {
                flag_dangling(&mut feature, dangling_hrefs);
                return Ok(Some(feature));
            }
            if let Some(err) = session.pending_error.take() {
                return Err(err);
            }
            if session.exhausted || session.router.is_stopped() {
                *state = ReaderState::Done;
                return Ok(None);
            }

            let pump = session.source.pump(&mut RouterSink {
                router: &mut session.router,
                classes: &mut *classes,
            });
            warnings.extend(session.router.take_warnings());
            match pump {
                Ok(pump) => session.exhausted = !pump.more_available,
                Err(err) => {
                    session.exhausted = true;
                    session.pending_error = Some(err);
                }
            }
        }
    }

    /// Iterate over the remaining features.
    pub fn features(&mut self) -> Features<'_> {
        Features { reader: self }
    }

    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn class(&self, index: usize) -> Option<&FeatureClass> {
        self.classes.class(index)
    }

    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&FeatureClass> {
        self.classes.class_by_name(name)
    }

    /// Register a class before reading or prescanning.
    pub fn add_class(&mut self, class: FeatureClass) -> Result<usize> {
        let result = self.classes.add_class(class);
        self.track(result)
    }

    /// Forget every class; the next read infers them again.
    pub fn clear_classes(&mut self) {
        self.classes.clear();
        self.reset_reading();
    }

    #[must_use]
    pub fn is_class_list_locked(&self) -> bool {
        self.classes.is_locked()
    }

    pub fn set_class_list_locked(&mut self, locked: bool) {
        self.classes.set_locked(locked);
    }

    /// Restrict reading to one class; features of other classes are skipped
    /// without being built. Takes effect from the top of the document.
    pub fn set_filtered_class_name(&mut self, name: Option<&str>) {
        self.filtered_class = name.map(String::from);
        self.reset_reading();
    }

    #[must_use]
    pub fn filtered_class_name(&self) -> Option<&str> {
        self.filtered_class.as_deref()
    }

    /// Load a schema file (`None`: the source's sidecar).
    ///
    /// Returns `Ok(false)` when the file belongs to a different version of
    /// the source document.
    pub fn load_classes(&mut self, path: Option<&Path>) -> Result<bool> {
        let result = self.load(path);
        self.track(result)
    }

    fn load(&mut self, path: Option<&Path>) -> Result<bool> {
        let fingerprint = match &self.source_path {
            Some(source) => Some(SourceFingerprint::of(source)?),
            None => None,
        };
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => schema::schema_path_for(&self.source_required()?),
        };
        let Some(classes) = schema::load_schema(&path, fingerprint.as_ref())? else {
            return Ok(false);
        };
        tracing::debug!(path = %path.display(), classes = classes.len(), "loaded schema");
        self.classes = classes;
        self.reset_reading();
        Ok(true)
    }

    /// Save the class list (`None`: the source's sidecar).
    pub fn save_classes(&mut self, path: Option<&Path>) -> Result<()> {
        let result = self.save(path);
        self.track(result)
    }

    fn save(&self, path: Option<&Path>) -> Result<()> {
        let fingerprint = match &self.source_path {
            Some(source) => Some(SourceFingerprint::of(source)?),
            None => None,
        };
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => schema::schema_path_for(&self.source_required()?),
        };
        schema::save_schema(&path, &self.classes, fingerprint.as_ref())
    }

    /// Resolve links in the source and switch to the resolved document.
    ///
    /// `skip` is added to the configured skip list. A locked class list is
    /// dropped because the resolved document has a different structure.
    pub fn resolve_links(&mut self, skip: &[String], strict: bool) -> Result<LinkResolution> {
        let result = self.resolve(skip, strict);
        self.track(result)
    }

    fn resolve(&mut self, skip: &[String], strict: bool) -> Result<LinkResolution> {
        let source = self.source_required()?;
        let mut skip_list = self.options.skip_resolve_elements.clone();
        skip_list.extend(skip.iter().cloned());

        let resolution = links::resolve_links(&source, &skip_list, strict || self.options.strict)?;
        for reference in &resolution.dangling {
            self.warn(format!(
                "dangling link '{}' on <{}>",
                reference.href, reference.element
            ));
        }

        if self.classes.is_locked() {
            self.classes.clear();
        }
        self.set_source_file(resolution.output_path.clone());
        self.dangling_hrefs = resolution.dangling.iter().map(|d| d.href.clone()).collect();
        Ok(resolution)
    }

    /// Extent from the document-level `boundedBy`, known after a prescan.
    #[must_use]
    pub fn document_extent(&self) -> Option<&Extent> {
        self.document_extent.as_ref()
    }

    /// Non-fatal problems collected so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Message of the most recent failed call.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Attach issues for link values that resolution could not follow.
fn flag_dangling(feature: &mut Feature, dangling: &HashSet<String>) {
    if dangling.is_empty() {
        return;
    }
    let issues: Vec<FeatureIssue> = feature
        .properties()
        .iter()
        .flat_map(|(name, value)| value.items().iter().map(move |item| (name, item)))
        .filter_map(|(name, item)| match item {
            PropertyValue::Link(href) if dangling.contains(href) => Some(FeatureIssue::DanglingLink {
                property: name.clone(),
                href: href.clone(),
            }),
            _ => None,
        })
        .collect();
    for issue in issues {
        feature.push_issue(issue);
    }
}

/// Iterator returned by [`FeatureReader::features`].
pub struct Features<'a> {
    reader: &'a mut FeatureReader,
}

impl Iterator for Features<'_> {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_feature().transpose()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Backend;
    use crate::source::tests::write_doc;
    use crate::types::PropertyType;

    #[test]
    fn test_dangling_links_inside_repeats_are_flagged() {
        let mut feature = Feature::new("Road", Some("R1".to_string()), 2);
        feature.set_property("owner", PropertyValue::Link("#P1".to_string()));
        feature.set_property("owner", PropertyValue::Link("#P9".to_string()));
        let dangling: HashSet<String> = ["#P9".to_string()].into_iter().collect();

        flag_dangling(&mut feature, &dangling);
        assert_eq!(
            feature.issues(),
            [FeatureIssue::DanglingLink {
                property: "owner".to_string(),
                href: "#P9".to_string()
            }]
        );
    }

    const ROADS: &str = r#"<?xml version="1.0"?>
<FeatureCollection>
  <featureMember><Road fid="R1"><name>A1</name><lanes>2</lanes></Road></featureMember>
  <featureMember><River fid="W1"><name>Rhine</name></River></featureMember>
  <featureMember><Road fid="R2"><name>A2</name><lanes>2.5</lanes></Road></featureMember>
</FeatureCollection>
"#;

    fn fids(reader: &mut FeatureReader) -> Vec<String> {
        reader
            .features()
            .map(|f| f.unwrap().fid().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_prescan_locks_inferred_classes() {
        let doc = write_doc(ROADS);
        let mut reader = FeatureReader::new(ReaderOptions::default());
        reader.set_source_file(doc.path());
        reader.prescan_for_schema(false).unwrap();

        assert_eq!(reader.state(), ReaderState::ClassesLoaded);
        assert!(reader.is_class_list_locked());
        assert_eq!(reader.class_count(), 2);
        let road = reader.class_by_name("Road").unwrap();
        assert!(road.is_locked());
        assert_eq!(road.feature_count(), Some(2));
        let lanes = &road.properties()[road.property_index("lanes").unwrap()];
        assert_eq!(lanes.property_type, PropertyType::Real);
    }

    #[test]
    fn test_read_order_and_reset() {
        let doc = write_doc(ROADS);
        for backend in [Backend::Pull, Backend::Batch] {
            let mut reader = FeatureReader::new(ReaderOptions::default().with_backend(backend));
            reader.set_source_file(doc.path());
            reader.prescan_for_schema(false).unwrap();

            let first = fids(&mut reader);
            assert_eq!(first, vec!["R1", "W1", "R2"]);
            assert_eq!(reader.state(), ReaderState::Done);
            assert!(reader.next_feature().unwrap().is_none());

            reader.reset_reading();
            assert_eq!(fids(&mut reader), first);
        }
    }

    #[test]
    fn test_filtered_class() {
        let doc = write_doc(ROADS);
        let mut reader = FeatureReader::new(ReaderOptions::default());
        reader.set_source_file(doc.path());
        reader.set_filtered_class_name(Some("Road"));
        assert_eq!(fids(&mut reader), vec!["R1", "R2"]);
    }

    #[test]
    fn test_structural_error_after_completed_features() {
        let doc = write_doc(
            "<c><featureMember><A fid=\"1\"><x>1</x></A></featureMember><featureMember><A fid=\"2\"></B>",
        );
        let mut reader = FeatureReader::new(ReaderOptions::default());
        reader.set_source_file(doc.path());

        let first = reader.next_feature().unwrap().unwrap();
        assert_eq!(first.fid(), Some("1"));
        let err = reader.next_feature().unwrap_err();
        assert!(matches!(err, ReaderError::StructuralParse { .. }));
        assert_eq!(reader.state(), ReaderState::Error);
        assert!(reader.last_error().unwrap().contains("</B>"));
        assert!(reader.next_feature().unwrap().is_none());
    }

    #[test]
    fn test_no_source() {
        let mut reader = FeatureReader::new(ReaderOptions::default());
        assert!(matches!(reader.prescan_for_schema(false), Err(ReaderError::NoSource)));
        assert!(reader.last_error().is_some());
    }

    #[test]
    fn test_prescan_feature_limit() {
        let doc = write_doc(ROADS);
        let options = ReaderOptions {
            prescan_feature_limit: Some(1),
            ..ReaderOptions::default()
        };
        let mut reader = FeatureReader::new(options);
        reader.set_source_file(doc.path());
        reader.prescan_for_schema(false).unwrap();
        assert_eq!(reader.class_count(), 1);
    }
}
