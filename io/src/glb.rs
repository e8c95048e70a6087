//! Binary glTF 2.0 (`.glb`) export.
//!
//! One scene, one node, one mesh primitive: `POSITION`, optional `NORMAL` and
//! `COLOR_0` (float RGB) and `u32` triangle indices. A mesh without faces is
//! written as a point primitive.

use crate::{Error, Result};
use recon_3d::TriangleMesh;
use serde_json::{json, Value};
use std::io::Write;

pub const GLB_MIME_TYPE: &str = "model/gltf-binary";

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_FLOAT: u32 = 5126;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_POINTS: u32 = 0;
const MODE_TRIANGLES: u32 = 4;

/// Accumulates the binary chunk and the views/accessors describing it.
#[derive(Default)]
struct BufferBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    fn push_vec3(&mut self, data: &[[f32; 3]], with_bounds: bool) -> usize {
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytemuck::cast_slice(data));
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": data.len() * 12,
            "target": TARGET_ARRAY_BUFFER,
        }));

        let mut accessor = json!({
            "bufferView": self.views.len() - 1,
            "componentType": COMPONENT_FLOAT,
            "count": data.len(),
            "type": "VEC3",
        });
        if with_bounds {
            let mut min = [f32::INFINITY; 3];
            let mut max = [f32::NEG_INFINITY; 3];
            for v in data {
                for k in 0..3 {
                    min[k] = min[k].min(v[k]);
                    max[k] = max[k].max(v[k]);
                }
            }
            accessor["min"] = json!(min);
            accessor["max"] = json!(max);
        }
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    fn push_indices(&mut self, indices: &[u32]) -> usize {
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytemuck::cast_slice(indices));
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": indices.len() * 4,
            "target": TARGET_ELEMENT_ARRAY_BUFFER,
        }));
        self.accessors.push(json!({
            "bufferView": self.views.len() - 1,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }
}

/// Encode `mesh` as a complete `.glb` byte buffer.
pub fn encode_glb(mesh: &TriangleMesh) -> Result<Vec<u8>> {
    if mesh.vertices.is_empty() {
        return Err(Error::invalid_input("Cannot export a mesh without vertices"));
    }
    let n = mesh.num_vertices();
    if let Some(f) = mesh.faces.iter().find(|f| f.iter().any(|&v| v >= n)) {
        return Err(Error::InvalidData(format!("Face {:?} references a vertex beyond {}", f, n)));
    }
    let index_limit = u32::MAX as usize;
    if n > index_limit {
        return Err(Error::invalid_input("Too many vertices for 32-bit indices"));
    }

    let mut buffers = BufferBuilder::default();
    let positions: Vec<[f32; 3]> = mesh.vertices.iter().map(|p| [p.x, p.y, p.z]).collect();
    let mut attributes = serde_json::Map::new();
    attributes.insert("POSITION".into(), json!(buffers.push_vec3(&positions, true)));

    if let Some(normals) = mesh.normals.as_ref().filter(|n| n.len() == mesh.num_vertices()) {
        let data: Vec<[f32; 3]> = normals.iter().map(|v| [v.x, v.y, v.z]).collect();
        attributes.insert("NORMAL".into(), json!(buffers.push_vec3(&data, false)));
    }
    if let Some(colors) = mesh.colors.as_ref().filter(|c| c.len() == mesh.num_vertices()) {
        let data: Vec<[f32; 3]> = colors
            .iter()
            .map(|c| [c.x.clamp(0.0, 1.0), c.y.clamp(0.0, 1.0), c.z.clamp(0.0, 1.0)])
            .collect();
        attributes.insert("COLOR_0".into(), json!(buffers.push_vec3(&data, false)));
    }

    let mut primitive = json!({ "attributes": attributes });
    if mesh.faces.is_empty() {
        primitive["mode"] = json!(MODE_POINTS);
    } else {
        let indices: Vec<u32> = mesh.faces.iter().flatten().map(|&i| i as u32).collect();
        primitive["indices"] = json!(buffers.push_indices(&indices));
        primitive["mode"] = json!(MODE_TRIANGLES);
    }

    let BufferBuilder {
        mut bin,
        views,
        accessors,
    } = buffers;

    let document = json!({
        "asset": { "version": "2.0", "generator": concat!("photogrammetry ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0, "name": "reconstruction" }],
        "meshes": [{ "primitives": [primitive] }],
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": views,
        "accessors": accessors,
    });

    let mut json_bytes =
        serde_json::to_vec(&document).map_err(|e| Error::InvalidData(e.to_string()))?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    for word in [GLB_MAGIC, GLB_VERSION, total as u32] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    Ok(out)
}

/// Write `mesh` as `.glb` to `writer`.
pub fn write_glb<W: Write>(writer: &mut W, mesh: &TriangleMesh) -> Result<()> {
    let bytes = encode_glb(mesh)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Validate the container framing of a `.glb` buffer and return its JSON document.
pub fn read_glb_json(bytes: &[u8]) -> Result<Value> {
    let word = |at: usize| -> Result<u32> {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| Error::Parse("Truncated GLB".to_string()))
    };

    if word(0)? != GLB_MAGIC {
        return Err(Error::Parse("Not a GLB file".to_string()));
    }
    if word(4)? != GLB_VERSION {
        return Err(Error::UnsupportedFormat(format!("GLB version {}", word(4)?)));
    }
    if word(8)? as usize != bytes.len() {
        return Err(Error::Parse("GLB length mismatch".to_string()));
    }
    let json_len = word(12)? as usize;
    if word(16)? != CHUNK_JSON {
        return Err(Error::Parse("First GLB chunk is not JSON".to_string()));
    }
    let json = bytes
        .get(20..20 + json_len)
        .ok_or_else(|| Error::Parse("Truncated GLB JSON chunk".to_string()))?;
    serde_json::from_slice(json).map_err(|e| Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn triangle() -> TriangleMesh {
        TriangleMesh::with_vertices_and_faces(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 2.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_triangle_layout() {
        let mesh = triangle().with_colors(vec![Point3::new(1.0, 0.0, 0.0); 3]);
        let bytes = encode_glb(&mesh).unwrap();
        assert_eq!(bytes.len() % 4, 0);

        let doc = read_glb_json(&bytes).unwrap();
        let prim = &doc["meshes"][0]["primitives"][0];
        assert_eq!(prim["mode"], 4);
        assert!(prim["attributes"]["COLOR_0"].is_number());
        assert!(prim["attributes"].get("NORMAL").is_none());

        let pos = prim["attributes"]["POSITION"].as_u64().unwrap() as usize;
        assert_eq!(doc["accessors"][pos]["count"], 3);
        assert_eq!(doc["accessors"][pos]["max"][1], 2.0);
        let idx = prim["indices"].as_u64().unwrap() as usize;
        assert_eq!(doc["accessors"][idx]["count"], 3);
        assert_eq!(doc["accessors"][idx]["componentType"], 5125);

        // positions (36) + colours (36) + indices (12)
        assert_eq!(doc["buffers"][0]["byteLength"], 84);
    }

    #[test]
    fn test_point_mode_without_faces() {
        let mut mesh = triangle();
        mesh.faces.clear();
        let doc = read_glb_json(&encode_glb(&mesh).unwrap()).unwrap();
        let prim = &doc["meshes"][0]["primitives"][0];
        assert_eq!(prim["mode"], 0);
        assert!(prim.get("indices").is_none());
    }

    #[test]
    fn test_rejects_empty_and_bad_faces() {
        assert!(encode_glb(&TriangleMesh::new()).is_err());
        let mut mesh = triangle();
        mesh.faces.push([0, 1, 7]);
        assert!(matches!(encode_glb(&mesh), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_read_rejects_garbage() {
        assert!(read_glb_json(b"not a glb at all").is_err());
        assert!(read_glb_json(&[]).is_err());
    }
}
