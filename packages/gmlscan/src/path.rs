//! Element path tracking for the streaming parser.
//!
//! The tracker is an explicit stack of frames. Each frame remembers the
//! element's local name and, when the element opened a feature, a
//! non-owning handle into the reader's feature arena.

use crate::types::FeatureId;

/// Separator between path components.
pub const PATH_SEPARATOR: char = '|';

/// One open element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFrame {
    /// Local name of the element.
    pub name: String,
    /// Feature opened by this element, if any.
    pub feature: Option<FeatureId>,
    /// Length of the cached path string before this frame was pushed.
    path_len: usize,
}

/// Stack of open elements and the cached `|`-joined path.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    frames: Vec<ParseFrame>,
    path: String,
}

impl PathTracker {
    /// Create an empty tracker positioned at the document root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter an element.
    pub fn push(&mut self, name: &str) {
        let path_len = self.path.len();
        if !self.path.is_empty() {
            self.path.push(PATH_SEPARATOR);
        }
        self.path.push_str(name);
        self.frames.push(ParseFrame {
            name: name.to_string(),
            feature: None,
            path_len,
        });
    }

    /// Leave the innermost element.
    ///
    /// Popping an empty tracker is a caller bug; it is reported in debug
    /// builds and ignored otherwise.
    pub fn pop(&mut self) -> Option<ParseFrame> {
        debug_assert!(!self.frames.is_empty(), "pop on empty path tracker");
        let frame = self.frames.pop()?;
        self.path.truncate(frame.path_len);
        Some(frame)
    }

    /// Drop every frame.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.path.clear();
    }

    /// Number of open elements.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Full path from the document root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Local name of the innermost element.
    #[must_use]
    pub fn last_component(&self) -> Option<&str> {
        self.frames.last().map(|f| f.name.as_str())
    }

    /// Local name of the parent of the innermost element.
    #[must_use]
    pub fn parent_component(&self) -> Option<&str> {
        let len = self.frames.len();
        (len >= 2).then(|| self.frames[len - 2].name.as_str())
    }

    /// Check whether `candidate` equals the current path or is a suffix of it
    /// that starts on a component boundary.
    ///
    /// # Examples
    /// ```
    /// use gmlscan::path::PathTracker;
    ///
    /// let mut path = PathTracker::new();
    /// path.push("CityModel");
    /// path.push("cityObjectMember");
    /// path.push("Building");
    ///
    /// assert!(path.match_path("cityObjectMember|Building"));
    /// assert!(path.match_path("Building"));
    /// assert!(!path.match_path("ding"));
    /// ```
    #[must_use]
    pub fn match_path(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match self.path.strip_suffix(candidate) {
            Some("") => true,
            Some(rest) => rest.ends_with(PATH_SEPARATOR),
            None => false,
        }
    }

    /// Path of the current position relative to the element at `depth`
    /// (1-based, as returned by [`depth`](Self::depth) when it was pushed).
    ///
    /// Returns an empty string when the current position is that element.
    #[must_use]
    pub fn relative_path(&self, depth: usize) -> String {
        self.frames
            .iter()
            .skip(depth)
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Attach a feature handle to the innermost frame.
    pub fn set_feature(&mut self, id: FeatureId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.feature = Some(id);
        }
    }

    /// Feature opened at or above the current position, with its depth.
    #[must_use]
    pub fn current_feature(&self) -> Option<(FeatureId, usize)> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, f)| f.feature.map(|id| (id, i + 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_rebuilds_path() {
        let mut path = PathTracker::new();
        path.push("FeatureCollection");
        path.push("featureMember");
        assert_eq!(path.path(), "FeatureCollection|featureMember");
        assert_eq!(path.depth(), 2);

        path.push("Road");
        assert_eq!(path.last_component(), Some("Road"));
        assert_eq!(path.parent_component(), Some("featureMember"));

        let frame = path.pop().unwrap();
        assert_eq!(frame.name, "Road");
        assert_eq!(path.path(), "FeatureCollection|featureMember");
        assert_eq!(path.last_component(), Some("featureMember"));
    }

    #[test]
    fn test_match_path_suffix_on_boundary() {
        let mut path = PathTracker::new();
        path.push("a");
        path.push("bc");
        assert!(path.match_path("a|bc"));
        assert!(path.match_path("bc"));
        assert!(!path.match_path("c"));
        assert!(!path.match_path("x|a|bc"));
        assert!(!path.match_path(""));
    }

    #[test]
    fn test_relative_path() {
        let mut path = PathTracker::new();
        for name in ["root", "member", "Road", "address", "street"] {
            path.push(name);
        }
        assert_eq!(path.relative_path(3), "address|street");
        assert_eq!(path.relative_path(5), "");
    }

    #[test]
    fn test_current_feature_is_inherited_by_children() {
        let mut path = PathTracker::new();
        path.push("member");
        path.push("Road");
        path.set_feature(FeatureId(7));
        path.push("name");

        assert_eq!(path.current_feature(), Some((FeatureId(7), 2)));
        path.pop();
        path.pop();
        assert_eq!(path.current_feature(), None);
    }
}
