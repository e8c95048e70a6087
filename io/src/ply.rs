//! PLY (Polygon File Format) I/O
//!
//! Reads ASCII and binary little-endian files with a `vertex` element
//! (positions, optional normals and colours) and an optional `face` element
//! whose polygons are fan-triangulated. Unknown elements and properties are
//! skipped.

use crate::{Error, Result};
use nalgebra::{Point3, Vector3};
use recon_3d::TriangleMesh;
use recon_core::PointCloud;
use std::io::{BufRead, Read, Write};

/// Upper bound on rows reserved up front; header counts are untrusted.
const MAX_PREALLOCATED: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            other => {
                return Err(Error::Parse(format!("Unknown PLY property type '{}'", other)))
            }
        })
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn read_le<R: Read>(self, reader: &mut R) -> Result<f64> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..self.size()];
        reader.read_exact(bytes)?;
        Ok(match self {
            Self::I8 => bytes[0] as i8 as f64,
            Self::U8 => bytes[0] as f64,
            Self::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::F64 => f64::from_le_bytes(buf),
        })
    }

    fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: ScalarType },
    List { name: String, count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug, Clone)]
struct Header {
    format: PlyFormat,
    elements: Vec<Element>,
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<Header> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(Error::Parse("Missing 'ply' magic".to_string()));
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Parse("Unexpected EOF in header".to_string()));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", fmt, ..] => {
                format = Some(match *fmt {
                    "ascii" => PlyFormat::Ascii,
                    "binary_little_endian" => PlyFormat::BinaryLittleEndian,
                    other => {
                        return Err(Error::UnsupportedFormat(format!(
                            "PLY format '{}' not supported",
                            other
                        )))
                    }
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| Error::Parse(format!("Invalid element count '{}'", count)))?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::Parse("Property before element".to_string()))?;
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count: ScalarType::parse(count)?,
                    item: ScalarType::parse(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::Parse("Property before element".to_string()))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: ScalarType::parse(ty)?,
                });
            }
            _ => {}
        }
    }

    Ok(Header {
        format: format.ok_or_else(|| Error::Parse("Missing format line".to_string()))?,
        elements,
    })
}

/// One parsed element row: scalar values and list values, in property order.
#[derive(Debug, Default)]
struct Row {
    scalars: Vec<f64>,
    lists: Vec<Vec<f64>>,
}

struct RowReader<'a, R> {
    reader: &'a mut R,
    format: PlyFormat,
    line: String,
}

impl<'a, R: BufRead> RowReader<'a, R> {
    fn read_row(&mut self, element: &Element, row: &mut Row) -> Result<()> {
        row.scalars.clear();
        row.lists.clear();
        match self.format {
            PlyFormat::BinaryLittleEndian => {
                for prop in &element.properties {
                    match prop {
                        Property::Scalar { ty, .. } => row.scalars.push(ty.read_le(self.reader)?),
                        Property::List { count, item, .. } => {
                            let n = count.read_le(self.reader)? as usize;
                            let mut values = Vec::with_capacity(n.min(MAX_PREALLOCATED));
                            for _ in 0..n {
                                values.push(item.read_le(self.reader)?);
                            }
                            row.lists.push(values);
                        }
                    }
                }
            }
            PlyFormat::Ascii => {
                self.line.clear();
                if self.reader.read_line(&mut self.line)? == 0 {
                    return Err(Error::Parse("Unexpected EOF in data".to_string()));
                }
                let mut tokens = self.line.split_whitespace().map(|s| {
                    s.parse::<f64>()
                        .map_err(|_| Error::Parse(format!("Invalid number: {}", s)))
                });
                let mut next = || {
                    tokens
                        .next()
                        .unwrap_or_else(|| Err(Error::InvalidData(format!(
                            "Not enough values for {}",
                            element.name
                        ))))
                };
                for prop in &element.properties {
                    match prop {
                        Property::Scalar { .. } => row.scalars.push(next()?),
                        Property::List { .. } => {
                            let n = next()? as usize;
                            let mut values = Vec::with_capacity(n.min(MAX_PREALLOCATED));
                            for _ in 0..n {
                                values.push(next()?);
                            }
                            row.lists.push(values);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn scalar_index(element: &Element, name: &str) -> Option<(usize, ScalarType)> {
    element
        .properties
        .iter()
        .filter_map(|p| match p {
            Property::Scalar { name, ty } => Some((name.as_str(), *ty)),
            Property::List { .. } => None,
        })
        .enumerate()
        .find(|(_, (n, _))| *n == name)
        .map(|(i, (_, ty))| (i, ty))
}

fn list_index(element: &Element, names: &[&str]) -> Option<usize> {
    element
        .properties
        .iter()
        .filter_map(|p| match p {
            Property::List { name, .. } => Some(name.as_str()),
            Property::Scalar { .. } => None,
        })
        .position(|n| names.contains(&n))
}

/// Vertices (with attributes) and triangulated faces of a PLY file.
fn read_ply_data<R: BufRead>(mut reader: R) -> Result<(PointCloud, Vec<[usize; 3]>)> {
    let header = read_header(&mut reader)?;
    let mut rows = RowReader {
        reader: &mut reader,
        format: header.format,
        line: String::new(),
    };

    let mut cloud = PointCloud::default();
    let mut faces = Vec::new();
    let mut row = Row::default();

    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => {
                let xyz = ["x", "y", "z"]
                    .map(|n| scalar_index(element, n).map(|(i, _)| i));
                let [Some(xi), Some(yi), Some(zi)] = xyz else {
                    return Err(Error::InvalidData(
                        "PLY vertex element lacks x/y/z".to_string(),
                    ));
                };
                let normal_idx = match ["nx", "ny", "nz"].map(|n| scalar_index(element, n)) {
                    [Some(a), Some(b), Some(c)] => Some([a.0, b.0, c.0]),
                    _ => None,
                };
                let color_idx = match ["red", "green", "blue"].map(|n| scalar_index(element, n)) {
                    [Some(r), Some(g), Some(b)] => Some(([r.0, g.0, b.0], r.1.is_integer())),
                    _ => None,
                };

                let reserve = element.count.min(MAX_PREALLOCATED);
                let mut points = Vec::with_capacity(reserve);
                let mut normals = normal_idx.map(|_| Vec::with_capacity(reserve));
                let mut colors = color_idx.map(|_| Vec::with_capacity(reserve));

                for _ in 0..element.count {
                    rows.read_row(element, &mut row)?;
                    let s = &row.scalars;
                    points.push(Point3::new(s[xi] as f32, s[yi] as f32, s[zi] as f32));
                    if let (Some([a, b, c]), Some(out)) = (normal_idx, normals.as_mut()) {
                        out.push(Vector3::new(s[a] as f32, s[b] as f32, s[c] as f32));
                    }
                    if let (Some(([r, g, b], integer)), Some(out)) = (color_idx, colors.as_mut()) {
                        let scale = if integer { 1.0 / 255.0 } else { 1.0 };
                        out.push(Point3::new(
                            (s[r] * scale) as f32,
                            (s[g] * scale) as f32,
                            (s[b] * scale) as f32,
                        ));
                    }
                }

                cloud = PointCloud {
                    points,
                    colors,
                    normals,
                };
            }
            "face" => {
                let list = list_index(element, &["vertex_indices", "vertex_index"]);
                for _ in 0..element.count {
                    rows.read_row(element, &mut row)?;
                    let Some(polygon) = list.and_then(|i| row.lists.get(i)) else {
                        continue;
                    };
                    for k in 1..polygon.len().saturating_sub(1) {
                        faces.push([
                            polygon[0] as usize,
                            polygon[k] as usize,
                            polygon[k + 1] as usize,
                        ]);
                    }
                }
            }
            _ => {
                for _ in 0..element.count {
                    rows.read_row(element, &mut row)?;
                }
            }
        }
    }

    let n = cloud.len();
    if let Some(f) = faces.iter().find(|f| f.iter().any(|&v| v >= n)) {
        return Err(Error::InvalidData(format!(
            "Face {:?} references a vertex beyond {}",
            f, n
        )));
    }

    Ok((cloud, faces))
}

/// Read a PLY file as a point cloud; faces, if any, are ignored.
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud> {
    read_ply_data(reader).map(|(cloud, _)| cloud)
}

/// Read a PLY file as a triangle mesh. Files without a face element yield a
/// mesh with vertices (and their normals and colours) but no faces.
pub fn read_ply_mesh<R: BufRead>(reader: R) -> Result<TriangleMesh> {
    let (cloud, faces) = read_ply_data(reader)?;
    Ok(TriangleMesh {
        vertices: cloud.points,
        faces,
        normals: cloud.normals,
        colors: cloud.colors,
    })
}

/// Write a point cloud to PLY format
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let num_points = cloud.len();

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", num_points)?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;

    if cloud.normals.is_some() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }

    if cloud.colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }

    writeln!(writer, "end_header")?;

    for i in 0..num_points {
        let p = cloud.points[i];
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;

        if let Some(ref normals) = cloud.normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }

        if let Some(ref colors) = cloud.colors {
            let c = colors[i];
            let r = (c.x.clamp(0.0, 1.0) * 255.0).round() as u8;
            let g = (c.y.clamp(0.0, 1.0) * 255.0).round() as u8;
            let b = (c.z.clamp(0.0, 1.0) * 255.0).round() as u8;
            write!(writer, " {} {} {}", r, g, b)?;
        }

        writeln!(writer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ascii_cloud_round_trip() {
        let cloud = PointCloud::new(vec![Point3::new(0.0, 1.0, 2.0), Point3::new(-1.5, 0.25, 3.0)])
            .with_colors(vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 0.0, 1.0)])
            .unwrap();
        let mut buf = Vec::new();
        write_ply(&mut buf, &cloud).unwrap();

        let loaded = read_ply(Cursor::new(buf)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.points[1], Point3::new(-1.5, 0.25, 3.0));
        let colors = loaded.colors.unwrap();
        assert!((colors[0].x - 1.0).abs() < 1e-6);
        assert!((colors[1].z - 1.0).abs() < 1e-6);
        assert!(loaded.normals.is_none());
    }

    #[test]
    fn test_ascii_faces_are_fan_triangulated() {
        let text = "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n";
        let mesh = read_ply_mesh(Cursor::new(text)).unwrap();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_binary_little_endian_vertices_and_normals() {
        let mut data = b"ply\nformat binary_little_endian 1.0\ncomment fused\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nproperty float nx\nproperty float ny\nproperty float nz\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n".to_vec();
        for (p, c) in [([1.0f32, 2.0, 3.0], [255u8, 0, 128]), ([4.0, 5.0, 6.0], [0, 255, 0])] {
            for v in p {
                data.extend_from_slice(&v.to_le_bytes());
            }
            for v in [0.0f32, 0.0, 1.0] {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&c);
        }

        let cloud = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(cloud.points, vec![Point3::new(1.0, 2.0, 3.0), Point3::new(4.0, 5.0, 6.0)]);
        assert_eq!(cloud.normals.as_ref().unwrap()[1], Vector3::new(0.0, 0.0, 1.0));
        let c = &cloud.colors.as_ref().unwrap()[0];
        assert!((c.x - 1.0).abs() < 1e-6);
        assert!((c.z - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_binary_faces() {
        let mut data = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar uint vertex_index\nend_header\n".to_vec();
        for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for v in p {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        data.push(3);
        for i in [0u32, 1, 2] {
            data.extend_from_slice(&i.to_le_bytes());
        }
        let mesh = read_ply_mesh(Cursor::new(data)).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_rejects_big_endian_and_truncated() {
        let big = "ply\nformat binary_big_endian 1.0\nelement vertex 0\nend_header\n";
        assert!(matches!(
            read_ply(Cursor::new(big)),
            Err(Error::UnsupportedFormat(_))
        ));

        let truncated = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";
        assert!(read_ply(Cursor::new(truncated)).is_err());
    }

    #[test]
    fn test_face_index_out_of_range() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n3 0 1 2\n";
        assert!(matches!(
            read_ply_mesh(Cursor::new(text)),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_oversized_header_counts_fail_cleanly() {
        let text = "ply\nformat ascii 1.0\nelement vertex 4000000000\nproperty float x\nproperty float y\nproperty float z\nproperty float nx\nproperty float ny\nproperty float nz\nend_header\n0 0 0 0 0 1\n1 0 0 0 0 1\n";
        assert!(matches!(read_ply(Cursor::new(text)), Err(Error::Parse(_))));

        let mut data = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uint uint vertex_indices\nend_header\n".to_vec();
        for v in [0.0f32, 0.0, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        assert!(read_ply_mesh(Cursor::new(data)).is_err());
    }
}
