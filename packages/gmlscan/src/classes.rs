//! Registry of the feature classes known to a reader session.

use crate::error::{ReaderError, Result};
use crate::path::PathTracker;
use crate::types::FeatureClass;

/// Ordered collection of feature classes, lockable once the schema is final.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: Vec<FeatureClass>,
    locked: bool,
}

impl ClassRegistry {
    /// Create an empty, unlocked registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class and return its index.
    ///
    /// Rejected once the registry is locked, or if the name is taken. The
    /// class takes on the registry's (unlocked) state.
    pub fn add_class(&mut self, mut class: FeatureClass) -> Result<usize> {
        if self.locked {
            return Err(ReaderError::SchemaViolation {
                class: class.name().to_string(),
                message: "class list is locked".to_string(),
            });
        }
        if self.class_index(class.name()).is_some() {
            return Err(ReaderError::InvalidState(format!(
                "class '{}' is already registered",
                class.name()
            )));
        }
        class.set_locked(false);
        self.classes.push(class);
        Ok(self.classes.len() - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[must_use]
    pub fn class(&self, index: usize) -> Option<&FeatureClass> {
        self.classes.get(index)
    }

    pub fn class_mut(&mut self, index: usize) -> Option<&mut FeatureClass> {
        self.classes.get_mut(index)
    }

    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&FeatureClass> {
        self.class_index(name).and_then(|i| self.classes.get(i))
    }

    #[must_use]
    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name() == name)
    }

    /// Class whose element path matches the current position, preferring the
    /// most specific (longest) element path.
    #[must_use]
    pub fn match_path(&self, path: &PathTracker) -> Option<usize> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| path.match_path(c.element_path()))
            .max_by_key(|(_, c)| c.element_path().len())
            .map(|(i, _)| i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureClass> {
        self.classes.iter()
    }

    /// Remove every class and unlock the registry.
    pub fn clear(&mut self) {
        self.classes.clear();
        self.locked = false;
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock or unlock the class list together with every class in it.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        for class in &mut self.classes {
            class.set_locked(locked);
        }
    }

    /// Lock the class list and freeze every class.
    pub fn lock(&mut self) {
        self.set_locked(true);
    }
}

impl FromIterator<FeatureClass> for ClassRegistry {
    fn from_iter<T: IntoIterator<Item = FeatureClass>>(iter: T) -> Self {
        let mut registry = Self {
            classes: iter.into_iter().collect(),
            locked: false,
        };
        registry.set_locked(false);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyDefinition;

    #[test]
    fn test_add_and_lookup() {
        let mut registry = ClassRegistry::new();
        assert_eq!(registry.add_class(FeatureClass::new("Road")).unwrap(), 0);
        assert_eq!(registry.add_class(FeatureClass::new("River")).unwrap(), 1);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.class(1).map(FeatureClass::name), Some("River"));
        assert_eq!(registry.class_index("Road"), Some(0));
        assert!(registry.class_by_name("Lake").is_none());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut registry = ClassRegistry::new();
        registry.add_class(FeatureClass::new("Road")).unwrap();
        assert!(matches!(
            registry.add_class(FeatureClass::new("Road")),
            Err(ReaderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_lock_freezes_classes() {
        let mut registry = ClassRegistry::new();
        registry.add_class(FeatureClass::new("Road")).unwrap();
        registry.lock();

        assert!(registry.is_locked());
        assert!(matches!(
            registry.add_class(FeatureClass::new("River")),
            Err(ReaderError::SchemaViolation { .. })
        ));
        let road = registry.class_mut(0).unwrap();
        assert!(road.add_property(PropertyDefinition::new("name")).is_err());

        registry.clear();
        assert!(!registry.is_locked());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_locked_applies_to_every_class() {
        let mut registry: ClassRegistry = [FeatureClass::new("Road"), FeatureClass::new("River")]
            .into_iter()
            .collect();
        registry.set_locked(true);
        assert!(registry.iter().all(FeatureClass::is_locked));

        registry.set_locked(false);
        assert!(registry.iter().all(|c| !c.is_locked()));
        let road = registry.class_mut(0).unwrap();
        assert_eq!(road.add_property(PropertyDefinition::new("lanes")).unwrap(), 0);
    }

    #[test]
    fn test_match_path_prefers_specific_class() {
        let registry: ClassRegistry = [
            FeatureClass::new("Building"),
            FeatureClass::new("Part").with_element_path("consistsOfBuildingPart|Building"),
        ]
        .into_iter()
        .collect();

        let mut path = PathTracker::new();
        path.push("CityModel");
        path.push("cityObjectMember");
        path.push("Building");
        assert_eq!(registry.match_path(&path), Some(0));

        path.push("consistsOfBuildingPart");
        path.push("Building");
        assert_eq!(registry.match_path(&path), Some(1));
    }
}
