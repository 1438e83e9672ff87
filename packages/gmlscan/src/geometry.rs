//! Geometry element recognition and the geometry-builder seam.
//!
//! The reader never builds geometries itself. It accumulates the raw markup
//! of every geometry element and hands it to a [`GeometryBuilder`] chosen by
//! the caller. [`CoordinateBuilder`] is a lightweight builder that only
//! decodes coordinate tuples, which is enough for extents and inspection.

use std::collections::HashMap;
use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ReaderError, Result};
use crate::types::{Extent, Feature, GeometryKind, GeometrySlot};

/// Geometry element local names (GML 2/3, CityGML, AIXM) and their kind.
static GEOMETRY_NAMES: LazyLock<HashMap<&'static str, GeometryKind>> = LazyLock::new(|| {
    use GeometryKind::*;
    HashMap::from([
        ("Point", Point),
        ("ElevatedPoint", Point),
        ("LineString", LineString),
        ("LinearRing", LineString),
        ("Curve", LineString),
        ("CompositeCurve", LineString),
        ("OrientableCurve", LineString),
        ("ElevatedCurve", LineString),
        ("TopoCurve", LineString),
        ("Polygon", Polygon),
        ("ElevatedSurface", Polygon),
        ("Surface", Surface),
        ("CompositeSurface", Surface),
        ("PolyhedralSurface", Surface),
        ("TriangulatedSurface", Surface),
        ("Tin", Surface),
        ("TopoSurface", Surface),
        ("MultiPoint", MultiPoint),
        ("MultiLineString", MultiLineString),
        ("MultiCurve", MultiLineString),
        ("MultiPolygon", MultiPolygon),
        ("MultiSurface", MultiPolygon),
        ("MultiGeometry", GeometryCollection),
        ("GeometryCollection", GeometryCollection),
        ("Solid", Solid),
        ("CompositeSolid", Solid),
        ("MultiSolid", Solid),
        ("Box", Envelope),
        ("Envelope", Envelope),
    ])
});

/// Kind of a geometry element, or `None` if the name is not a geometry element.
///
/// # Examples
/// ```
/// use gmlscan::geometry::geometry_kind;
/// use gmlscan::types::GeometryKind;
///
/// assert_eq!(geometry_kind("MultiSurface"), Some(GeometryKind::MultiPolygon));
/// assert_eq!(geometry_kind("name"), None);
/// ```
#[must_use]
pub fn geometry_kind(local_name: &str) -> Option<GeometryKind> {
    GEOMETRY_NAMES.get(local_name).copied()
}

/// Builds geometry values from accumulated geometry markup.
pub trait GeometryBuilder {
    /// Geometry value produced by the builder.
    type Geometry;

    /// Parse one geometry slot's raw markup.
    fn parse_geometry_markup(&self, raw: &str) -> Result<Self::Geometry>;
}

impl Feature {
    /// Build the geometry held in `slot`, attributing failures to this feature.
    pub fn build_geometry<B: GeometryBuilder>(&self, slot: &str, builder: &B) -> Result<B::Geometry> {
        let geometry = self.geometry(slot).ok_or_else(|| ReaderError::GeometryParse {
            fid: self.fid().map(String::from),
            message: format!("no geometry slot '{slot}'"),
        })?;
        builder
            .parse_geometry_markup(&geometry.raw)
            .map_err(|err| ReaderError::GeometryParse {
                fid: self.fid().map(String::from),
                message: match err {
                    ReaderError::GeometryParse { message, .. } => message,
                    other => other.to_string(),
                },
            })
    }
}

/// Coordinate-level decoding of a geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateGeometry {
    /// Kind of the outermost geometry element.
    pub kind: GeometryKind,
    /// `srsName` of the outermost geometry element.
    pub srs_name: Option<String>,
    /// Every coordinate tuple in document order.
    pub coordinates: Vec<Vec<f64>>,
}

impl CoordinateGeometry {
    /// Bounding box of the XY components.
    #[must_use]
    pub fn extent(&self) -> Option<Extent> {
        let mut extent: Option<Extent> = None;
        for tuple in &self.coordinates {
            if let [x, y, ..] = tuple.as_slice() {
                match extent.as_mut() {
                    Some(e) => e.expand(*x, *y),
                    None => extent = Some(Extent::from_point(*x, *y)),
                }
            }
        }
        extent
    }
}

/// Builder that decodes `coordinates`, `pos`, `posList`, corner and `coord` markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateBuilder;

impl GeometryBuilder for CoordinateBuilder {
    type Geometry = CoordinateGeometry;

    fn parse_geometry_markup(&self, raw: &str) -> Result<CoordinateGeometry> {
        let mut reader = Reader::from_str(raw);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;

        let mut kind: Option<GeometryKind> = None;
        let mut srs_name = None;
        let mut dimension = 2usize;
        let mut current: Option<String> = None;
        let mut coord: Vec<f64> = Vec::new();
        let mut coordinates = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    for attr in e.attributes() {
                        let attr = attr.map_err(quick_xml::Error::from)?;
                        match attr.key.local_name().as_ref() {
                            b"srsName" if kind.is_none() => {
                                srs_name = Some(attr.unescape_value()?.into_owned());
                            }
                            b"srsDimension" => {
                                dimension = attr.unescape_value()?.trim().parse().unwrap_or(2);
                            }
                            _ => {}
                        }
                    }
                    if kind.is_none() {
                        kind = Some(geometry_kind(&name).ok_or_else(|| {
                            parse_error(format!("<{name}> is not a geometry element"))
                        })?);
                    }
                    current = Some(name);
                }
                Event::Text(e) => {
                    let text = e.unescape()?;
                    match current.as_deref() {
                        Some("coordinates") => {
                            for tuple in text.split_whitespace() {
                                coordinates.push(parse_numbers(tuple.split(','))?);
                            }
                        }
                        Some("pos" | "posList" | "lowerCorner" | "upperCorner") => {
                            let values = parse_numbers(text.split_whitespace())?;
                            if dimension == 0 || values.len() % dimension != 0 {
                                return Err(parse_error(format!(
                                    "{} ordinates do not fit dimension {dimension}",
                                    values.len()
                                )));
                            }
                            coordinates.extend(values.chunks(dimension).map(<[f64]>::to_vec));
                        }
                        Some("X" | "Y" | "Z") => coord.push(parse_number(&text)?),
                        _ => {}
                    }
                }
                Event::End(e) => {
                    if e.local_name().as_ref() == b"coord" && !coord.is_empty() {
                        coordinates.push(std::mem::take(&mut coord));
                    }
                    current = None;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let kind = kind.ok_or_else(|| parse_error("empty geometry markup"))?;
        if coordinates.is_empty() {
            return Err(parse_error("geometry has no coordinates"));
        }
        Ok(CoordinateGeometry {
            kind,
            srs_name,
            coordinates,
        })
    }
}

/// Extent of a geometry slot, if its coordinates decode.
pub(crate) fn slot_extent(slot: &GeometrySlot) -> Option<Extent> {
    CoordinateBuilder
        .parse_geometry_markup(&slot.raw)
        .ok()
        .and_then(|g| g.extent())
}

fn parse_numbers<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<f64>> {
    parts
        .filter(|p| !p.is_empty())
        .map(parse_number)
        .collect()
}

fn parse_number(text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| parse_error(format!("'{}' is not a number", text.trim())))
}

fn parse_error(message: impl Into<String>) -> ReaderError {
    ReaderError::GeometryParse {
        fid: None,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_coordinates() {
        let geometry = CoordinateBuilder
            .parse_geometry_markup("<Point><coordinates>1,2</coordinates></Point>")
            .unwrap();
        assert_eq!(geometry.kind, GeometryKind::Point);
        assert_eq!(geometry.coordinates, vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_pos_list_with_dimension() {
        let raw = r#"<gml:LineString srsName="EPSG:4326" srsDimension="3"><gml:posList>0 0 1 2 3 1</gml:posList></gml:LineString>"#;
        let geometry = CoordinateBuilder.parse_geometry_markup(raw).unwrap();
        assert_eq!(geometry.kind, GeometryKind::LineString);
        assert_eq!(geometry.srs_name.as_deref(), Some("EPSG:4326"));
        assert_eq!(geometry.coordinates.len(), 2);
        assert_eq!(
            geometry.extent(),
            Some(Extent {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 2.0,
                max_y: 3.0
            })
        );
    }

    #[test]
    fn test_gml2_coord() {
        let raw = "<Box><coord><X>1</X><Y>2</Y></coord><coord><X>3</X><Y>4</Y></coord></Box>";
        let geometry = CoordinateBuilder.parse_geometry_markup(raw).unwrap();
        assert_eq!(geometry.kind, GeometryKind::Envelope);
        assert_eq!(geometry.coordinates, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_rejects_non_geometry_and_garbage() {
        assert!(CoordinateBuilder
            .parse_geometry_markup("<name>x</name>")
            .is_err());
        assert!(CoordinateBuilder
            .parse_geometry_markup("<Point><pos>a b</pos></Point>")
            .is_err());
        assert!(CoordinateBuilder.parse_geometry_markup("<Point/>").is_err());
    }

    #[test]
    fn test_build_geometry_attributes_fid() {
        let feature = Feature::new("Road", Some("R1".to_string()), 2);
        let err = feature.build_geometry("geom", &CoordinateBuilder).unwrap_err();
        assert!(err.to_string().contains("R1"));
    }
}
