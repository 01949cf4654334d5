//! Spatial values.
//!
//! Geometries travel as WKB on the wire and are exposed to applications in a
//! GeoJSON-shaped form: `{"type": "LineString", "coordinates": [[x, y], ...]}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

/// A single `[x, y]` coordinate.
pub type Coord = [f64; 2];

/// OpenGIS geometry type codes as used in WKB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GeometryType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLineString = 5,
    MultiPolygon = 6,
    GeometryCollection = 7,
}

impl GeometryType {
    /// Parse a WKB type code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Point),
            2 => Some(Self::LineString),
            3 => Some(Self::Polygon),
            4 => Some(Self::MultiPoint),
            5 => Some(Self::MultiLineString),
            6 => Some(Self::MultiPolygon),
            7 => Some(Self::GeometryCollection),
            _ => None,
        }
    }

    /// Parse a GeoJSON `type` tag.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Point" => Some(Self::Point),
            "LineString" => Some(Self::LineString),
            "Polygon" => Some(Self::Polygon),
            "MultiPoint" => Some(Self::MultiPoint),
            "MultiLineString" => Some(Self::MultiLineString),
            "MultiPolygon" => Some(Self::MultiPolygon),
            "GeometryCollection" => Some(Self::GeometryCollection),
            _ => None,
        }
    }

    /// Map a column's declared type name (e.g. `POINT`) to a geometry type.
    pub fn from_column_type_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "point" => Some(Self::Point),
            "linestring" => Some(Self::LineString),
            "polygon" => Some(Self::Polygon),
            "multipoint" => Some(Self::MultiPoint),
            "multilinestring" => Some(Self::MultiLineString),
            "multipolygon" => Some(Self::MultiPolygon),
            "geometrycollection" | "geomcollection" => Some(Self::GeometryCollection),
            _ => None,
        }
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }
}

/// A decoded or caller-supplied geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
    /// A type tag with no coordinates, produced for empty column values and
    /// for tagged objects whose coordinates could not be understood.
    Empty(GeometryType),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
            Geometry::Empty(kind) => *kind,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Geometry::Empty(_))
    }

    /// Recognize a GeoJSON-shaped object by its `type` tag.
    ///
    /// Returns `None` when the value is not an object or the tag is not a
    /// geometry name. A recognized tag with unusable coordinates yields
    /// [`Geometry::Empty`] rather than `None`.
    pub fn from_geojson(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        let kind = GeometryType::from_name(object.get("type")?.as_str()?)?;
        if kind == GeometryType::GeometryCollection {
            let members = object
                .get("geometries")
                .and_then(JsonValue::as_array)
                .map(|items| items.iter().map(Geometry::from_geojson).collect::<Option<Vec<_>>>());
            return Some(match members {
                Some(Some(members)) => Geometry::GeometryCollection(members),
                _ => Geometry::Empty(kind),
            });
        }
        let parsed = object
            .get("coordinates")
            .and_then(|coords| parse_coordinates(kind, coords));
        Some(parsed.unwrap_or(Geometry::Empty(kind)))
    }

    /// Render as a GeoJSON-shaped object.
    pub fn to_geojson(&self) -> JsonValue {
        let mut object = Map::new();
        object.insert("type".into(), json!(self.geometry_type().name()));
        match self {
            Geometry::Point(c) => {
                object.insert("coordinates".into(), json!(c));
            }
            Geometry::LineString(points) | Geometry::MultiPoint(points) => {
                object.insert("coordinates".into(), json!(points));
            }
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                object.insert("coordinates".into(), json!(rings));
            }
            Geometry::MultiPolygon(polygons) => {
                object.insert("coordinates".into(), json!(polygons));
            }
            Geometry::GeometryCollection(members) => {
                let members: Vec<JsonValue> = members.iter().map(Geometry::to_geojson).collect();
                object.insert("geometries".into(), JsonValue::Array(members));
            }
            Geometry::Empty(_) => {}
        }
        JsonValue::Object(object)
    }

    /// Render as WKT, e.g. `LINESTRING(0 0,1 1)`.
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(c) => format!("POINT({})", wkt_coord(c)),
            Geometry::LineString(points) => format!("LINESTRING({})", wkt_points(points)),
            Geometry::Polygon(rings) => format!("POLYGON({})", wkt_rings(rings)),
            Geometry::MultiPoint(points) => format!("MULTIPOINT({})", wkt_points(points)),
            Geometry::MultiLineString(lines) => {
                format!("MULTILINESTRING({})", wkt_rings(lines))
            }
            Geometry::MultiPolygon(polygons) => {
                let parts: Vec<String> = polygons
                    .iter()
                    .map(|rings| format!("({})", wkt_rings(rings)))
                    .collect();
                format!("MULTIPOLYGON({})", parts.join(","))
            }
            Geometry::GeometryCollection(members) => {
                let parts: Vec<String> = members.iter().map(Geometry::to_wkt).collect();
                format!("GEOMETRYCOLLECTION({})", parts.join(","))
            }
            Geometry::Empty(kind) => {
                format!("{} EMPTY", kind.name().to_ascii_uppercase())
            }
        }
    }
}

impl Serialize for Geometry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Geometry::from_geojson(&value)
            .ok_or_else(|| serde::de::Error::custom("expected a GeoJSON geometry object"))
    }
}

fn wkt_coord(c: &Coord) -> String {
    format!("{} {}", c[0], c[1])
}

fn wkt_points(points: &[Coord]) -> String {
    points.iter().map(wkt_coord).collect::<Vec<_>>().join(",")
}

fn wkt_rings(rings: &[Vec<Coord>]) -> String {
    rings
        .iter()
        .map(|ring| format!("({})", wkt_points(ring)))
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_coordinates(kind: GeometryType, coords: &JsonValue) -> Option<Geometry> {
    match kind {
        GeometryType::Point => parse_coord(coords).map(Geometry::Point),
        GeometryType::LineString => parse_points(coords).map(Geometry::LineString),
        GeometryType::MultiPoint => parse_points(coords).map(Geometry::MultiPoint),
        GeometryType::Polygon => parse_rings(coords).map(Geometry::Polygon),
        GeometryType::MultiLineString => parse_rings(coords).map(Geometry::MultiLineString),
        GeometryType::MultiPolygon => coords
            .as_array()?
            .iter()
            .map(parse_rings)
            .collect::<Option<Vec<_>>>()
            .map(Geometry::MultiPolygon),
        GeometryType::GeometryCollection => None,
    }
}

fn parse_coord(value: &JsonValue) -> Option<Coord> {
    let items = value.as_array()?;
    if items.len() < 2 {
        return None;
    }
    Some([items[0].as_f64()?, items[1].as_f64()?])
}

fn parse_points(value: &JsonValue) -> Option<Vec<Coord>> {
    value.as_array()?.iter().map(parse_coord).collect()
}

fn parse_rings(value: &JsonValue) -> Option<Vec<Vec<Coord>>> {
    value.as_array()?.iter().map(parse_points).collect()
}
