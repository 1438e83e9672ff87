//! gmlscan
//!
//! A streaming, schema-inferring reader for GML feature collections.
//! This library provides functionality for:
//! - Inferring feature classes (properties, types, geometry slots) in a prescan
//! - Reading features one at a time without loading the document
//! - Persisting the inferred schema next to the document
//! - Resolving `xlink:href` references into inlined content
//!
//! Two interchangeable event-source backends drive the reader: a pull
//! backend that yields per feature and a batch backend that consumes a fixed
//! amount of input per step.
//!
//! # Example
//!
//! ```no_run
//! use gmlscan::geometry::CoordinateBuilder;
//! use gmlscan::{FeatureReader, ReaderOptions};
//!
//! let mut reader = FeatureReader::open("cities.gml", ReaderOptions::from_env()?)?;
//! for class in reader.classes().iter() {
//!     println!("{}: {} properties", class.name(), class.property_count());
//! }
//! while let Some(feature) = reader.next_feature()? {
//!     if let Ok(point) = feature.build_geometry("geom", &CoordinateBuilder) {
//!         println!("{:?} at {:?}", feature.fid(), point.coordinates);
//!     }
//! }
//! # Ok::<(), gmlscan::ReaderError>(())
//! ```

pub mod classes;
pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod links;
pub mod path;
pub mod reader;
pub mod router;
pub mod schema;
pub mod source;
pub mod types;

// Re-export commonly used items
pub use classes::ClassRegistry;
pub use config::{Backend, ReaderOptions};
pub use error::{FeatureIssue, ReaderError, Result};
pub use geometry::{CoordinateBuilder, GeometryBuilder};
pub use links::{DanglingReference, LinkResolution};
pub use reader::{FeatureReader, ReaderState};
pub use types::{
    Extent, Feature, FeatureClass, GeometryKind, GeometrySlot, PropertyDefinition, PropertyType,
    PropertyValue,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
