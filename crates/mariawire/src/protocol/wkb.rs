//! Well-Known Binary geometry codec.
//!
//! Decoding is a recursive descent over a bounds-checked cursor; every
//! nested geometry carries its own byte-order flag. Encoding always writes
//! little-endian.

use mariawire_core::{Coord, Error, Geometry, GeometryType, Result};

/// Nesting limit for collections inside collections.
const MAX_DEPTH: usize = 32;

const BIG_ENDIAN: u8 = 0;
const LITTLE_ENDIAN: u8 = 1;

/// Decode a WKB buffer (without SRID prefix).
pub fn decode_wkb(data: &[u8]) -> Result<Geometry> {
    let mut cursor = WkbCursor::new(data);
    let geometry = cursor.read_geometry(0)?;
    if cursor.pos != data.len() {
        tracing::debug!(
            trailing = data.len() - cursor.pos,
            "ignoring trailing bytes after WKB geometry"
        );
    }
    Ok(geometry)
}

struct WkbCursor<'a> {
    data: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> WkbCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            little_endian: true,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::protocol(format!("truncated WKB at offset {}", self.pos)))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    /// Element count, bounded by what the remaining bytes could hold.
    fn read_count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.read_u32()? as usize;
        let available = (self.data.len() - self.pos) / min_element_size;
        if count > available {
            return Err(Error::protocol(format!(
                "WKB declares {count} elements but only {available} fit"
            )));
        }
        Ok(count)
    }

    fn read_coord(&mut self) -> Result<Coord> {
        Ok([self.read_f64()?, self.read_f64()?])
    }

    fn read_points(&mut self) -> Result<Vec<Coord>> {
        let count = self.read_count(16)?;
        (0..count).map(|_| self.read_coord()).collect()
    }

    fn read_rings(&mut self) -> Result<Vec<Vec<Coord>>> {
        let count = self.read_count(4)?;
        (0..count).map(|_| self.read_points()).collect()
    }

    fn read_header(&mut self) -> Result<GeometryType> {
        let [order] = self.take::<1>()?;
        self.little_endian = match order {
            LITTLE_ENDIAN => true,
            BIG_ENDIAN => false,
            other => {
                return Err(Error::protocol(format!("invalid WKB byte order {other}")));
            }
        };
        let code = self.read_u32()?;
        GeometryType::from_code(code)
            .ok_or_else(|| Error::protocol(format!("unsupported WKB geometry type {code}")))
    }

    /// Members of a Multi* geometry, each a full WKB geometry of `expected` type.
    fn read_members(&mut self, expected: GeometryType, depth: usize) -> Result<Vec<Geometry>> {
        let count = self.read_count(5)?;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let member = self.read_geometry(depth + 1)?;
            if member.geometry_type() != expected {
                return Err(Error::protocol(format!(
                    "expected {} inside multi-geometry, found {}",
                    expected.name(),
                    member.geometry_type().name()
                )));
            }
            members.push(member);
        }
        Ok(members)
    }

    fn read_geometry(&mut self, depth: usize) -> Result<Geometry> {
        if depth > MAX_DEPTH {
            return Err(Error::protocol("WKB nesting too deep"));
        }
        let kind = self.read_header()?;
        let geometry = match kind {
            GeometryType::Point => {
                let coord = self.read_coord()?;
                if coord[0].is_nan() && coord[1].is_nan() {
                    Geometry::Empty(GeometryType::Point)
                } else {
                    Geometry::Point(coord)
                }
            }
            GeometryType::LineString => Geometry::LineString(self.read_points()?),
            GeometryType::Polygon => Geometry::Polygon(self.read_rings()?),
            GeometryType::MultiPoint => {
                let members = self.read_members(GeometryType::Point, depth)?;
                let points = members
                    .into_iter()
                    .map(|m| match m {
                        Geometry::Point(c) => Ok(c),
                        _ => Err(Error::protocol("empty point inside MultiPoint")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Geometry::MultiPoint(points)
            }
            GeometryType::MultiLineString => {
                let members = self.read_members(GeometryType::LineString, depth)?;
                Geometry::MultiLineString(
                    members
                        .into_iter()
                        .filter_map(|m| match m {
                            Geometry::LineString(points) => Some(points),
                            _ => None,
                        })
                        .collect(),
                )
            }
            GeometryType::MultiPolygon => {
                let members = self.read_members(GeometryType::Polygon, depth)?;
                Geometry::MultiPolygon(
                    members
                        .into_iter()
                        .filter_map(|m| match m {
                            Geometry::Polygon(rings) => Some(rings),
                            _ => None,
                        })
                        .collect(),
                )
            }
            GeometryType::GeometryCollection => {
                let count = self.read_count(5)?;
                let members = (0..count)
                    .map(|_| self.read_geometry(depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Geometry::GeometryCollection(members)
            }
        };
        Ok(geometry)
    }
}

/// Encode a geometry as little-endian WKB.
pub fn encode_wkb(geometry: &Geometry, out: &mut Vec<u8>) {
    put_header(out, geometry.geometry_type());
    match geometry {
        Geometry::Point(c) => put_coord(out, c),
        Geometry::LineString(points) => put_points(out, points),
        Geometry::Polygon(rings) => put_rings(out, rings),
        Geometry::MultiPoint(points) => {
            put_count(out, points.len());
            for c in points {
                put_header(out, GeometryType::Point);
                put_coord(out, c);
            }
        }
        Geometry::MultiLineString(lines) => {
            put_count(out, lines.len());
            for points in lines {
                put_header(out, GeometryType::LineString);
                put_points(out, points);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            put_count(out, polygons.len());
            for rings in polygons {
                put_header(out, GeometryType::Polygon);
                put_rings(out, rings);
            }
        }
        Geometry::GeometryCollection(members) => {
            put_count(out, members.len());
            for member in members {
                encode_wkb(member, out);
            }
        }
        // The empty point has no count field; WKB spells it POINT(NaN NaN)
        Geometry::Empty(GeometryType::Point) => put_coord(out, &[f64::NAN, f64::NAN]),
        Geometry::Empty(_) => put_count(out, 0),
    }
}

fn put_header(out: &mut Vec<u8>, kind: GeometryType) {
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&kind.code().to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)]
fn put_count(out: &mut Vec<u8>, count: usize) {
    out.extend_from_slice(&(count as u32).to_le_bytes());
}

fn put_coord(out: &mut Vec<u8>, c: &Coord) {
    out.extend_from_slice(&c[0].to_le_bytes());
    out.extend_from_slice(&c[1].to_le_bytes());
}

fn put_points(out: &mut Vec<u8>, points: &[Coord]) {
    put_count(out, points.len());
    for c in points {
        put_coord(out, c);
    }
}

fn put_rings(out: &mut Vec<u8>, rings: &[Vec<Coord>]) {
    put_count(out, rings.len());
    for ring in rings {
        put_points(out, ring);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line_string_le() -> Vec<u8> {
        let mut data = vec![1, 2, 0, 0, 0, 2, 0, 0, 0];
        for v in [1.0_f64, 2.0, 3.0, 4.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_decode_line_string() {
        let geometry = decode_wkb(&line_string_le()).unwrap();
        assert_eq!(
            geometry.to_geojson(),
            json!({"type": "LineString", "coordinates": [[1.0, 2.0], [3.0, 4.0]]})
        );
    }

    #[test]
    fn test_decode_big_endian_point() {
        let mut data = vec![0, 0, 0, 0, 1];
        data.extend_from_slice(&10.5_f64.to_be_bytes());
        data.extend_from_slice(&(-3.0_f64).to_be_bytes());
        assert_eq!(decode_wkb(&data).unwrap(), Geometry::Point([10.5, -3.0]));
    }

    #[test]
    fn test_truncated_wkb_is_error() {
        let data = line_string_le();
        assert!(matches!(
            decode_wkb(&data[..data.len() - 1]),
            Err(Error::Protocol(_))
        ));
        assert!(decode_wkb(&[1, 99, 0, 0, 0]).is_err());
        assert!(decode_wkb(&[7]).is_err());
    }

    #[test]
    fn test_oversized_count_rejected() {
        let data = vec![1, 2, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0x7F];
        assert!(decode_wkb(&data).is_err());
    }

    #[test]
    fn test_encode_decode_nested() {
        let geometry = Geometry::GeometryCollection(vec![
            Geometry::Point([1.0, 1.0]),
            Geometry::MultiPolygon(vec![vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]]]),
            Geometry::MultiPoint(vec![[5.0, 5.0], [6.0, 6.0]]),
            Geometry::MultiLineString(vec![vec![[0.0, 0.0], [2.0, 2.0]]]),
        ]);
        let mut out = Vec::new();
        encode_wkb(&geometry, &mut out);
        assert_eq!(decode_wkb(&out).unwrap(), geometry);
    }

    #[test]
    fn test_encode_empty_point() {
        let mut out = Vec::new();
        encode_wkb(&Geometry::Empty(GeometryType::Point), &mut out);
        assert_eq!(out.len(), 21);
        assert_eq!(
            decode_wkb(&out).unwrap(),
            Geometry::Empty(GeometryType::Point)
        );
    }

    #[test]
    fn test_multi_point_with_empty_member_is_rejected() {
        let mut out = vec![1, 4, 0, 0, 0, 2, 0, 0, 0];
        encode_wkb(&Geometry::Point([1.0, 2.0]), &mut out);
        encode_wkb(&Geometry::Empty(GeometryType::Point), &mut out);
        assert!(matches!(decode_wkb(&out), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_multi_member_type_mismatch() {
        let mut out = vec![1, 4, 0, 0, 0, 1, 0, 0, 0];
        encode_wkb(&Geometry::LineString(vec![]), &mut out);
        assert!(decode_wkb(&out).is_err());
    }
}
