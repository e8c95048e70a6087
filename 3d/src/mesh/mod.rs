//! Triangle mesh data structure and processing.

use nalgebra::{Point3, Vector3};

/// Triangle mesh with vertices, face indices and optional per-vertex attributes.
///
/// `colors`, when present, are RGB in `[0, 1]` and index-aligned with `vertices`.
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<Point3<f32>>>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            normals: None,
            colors: None,
        }
    }

    pub fn with_vertices_and_faces(vertices: Vec<Point3<f32>>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    /// Attach per-vertex colours; ignored unless the count matches the vertex count.
    pub fn with_colors(mut self, colors: Vec<Point3<f32>>) -> Self {
        if colors.len() == self.vertices.len() {
            self.colors = Some(colors);
        }
        self
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn face_area(&self, face: &[usize; 3]) -> f32 {
        let v0 = self.vertices[face[0]];
        let e1 = self.vertices[face[1]] - v0;
        let e2 = self.vertices[face[2]] - v0;
        e1.cross(&e2).norm() * 0.5
    }

    /// Compute face normals; degenerate faces get a zero normal.
    pub fn compute_face_normals(&self) -> Vec<Vector3<f32>> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let e1 = self.vertices[face[1]] - v0;
                let e2 = self.vertices[face[2]] - v0;
                e1.cross(&e2)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3::zeros)
            })
            .collect()
    }

    /// Compute vertex normals by averaging adjacent face normals
    pub fn compute_vertex_normals(&mut self) {
        let mut vertex_normals: Vec<Vector3<f32>> = vec![Vector3::zeros(); self.vertices.len()];
        let face_normals = self.compute_face_normals();

        for (face, normal) in self.faces.iter().zip(face_normals.iter()) {
            for &vertex_idx in face.iter() {
                vertex_normals[vertex_idx] += normal;
            }
        }

        for normal in vertex_normals.iter_mut() {
            *normal = normal
                .try_normalize(f32::EPSILON)
                .unwrap_or_else(|| Vector3::new(0.0, 0.0, 1.0));
        }

        self.normals = Some(vertex_normals);
    }

    /// Calculate mesh bounds
    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        if self.vertices.is_empty() {
            return (Point3::origin(), Point3::origin());
        }

        let mut min = self.vertices[0];
        let mut max = self.vertices[0];

        for v in &self.vertices {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            min.z = min.z.min(v.z);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
            max.z = max.z.max(v.z);
        }

        (min, max)
    }

    /// Calculate surface area
    pub fn surface_area(&self) -> f32 {
        self.faces.iter().map(|f| self.face_area(f)).sum()
    }

    /// Drop every vertex whose `remove` flag is set, together with the faces
    /// that reference it. Remaining vertices keep their relative order.
    pub fn remove_vertices_by_mask(&mut self, remove: &[bool]) {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0;
        for (i, slot) in remap.iter_mut().enumerate() {
            if !remove.get(i).copied().unwrap_or(false) {
                *slot = next;
                next += 1;
            }
        }
        self.apply_remap(&remap, next);
    }

    /// Drop vertices that no face references.
    pub fn remove_unreferenced_vertices(&mut self) {
        let mut referenced = vec![false; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                referenced[v] = true;
            }
        }
        let unreferenced: Vec<bool> = referenced.iter().map(|r| !r).collect();
        self.remove_vertices_by_mask(&unreferenced);
    }

    fn apply_remap(&mut self, remap: &[usize], kept: usize) {
        fn compact<T: Copy>(values: &[T], remap: &[usize], kept: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(kept);
            for (i, v) in values.iter().enumerate() {
                if remap[i] != usize::MAX {
                    out.push(*v);
                }
            }
            out
        }

        self.faces = self
            .faces
            .iter()
            .filter_map(|f| {
                let mapped = [remap[f[0]], remap[f[1]], remap[f[2]]];
                if mapped.contains(&usize::MAX) {
                    None
                } else {
                    Some(mapped)
                }
            })
            .collect();
        self.vertices = compact(&self.vertices, remap, kept);
        self.colors = self.colors.as_ref().map(|c| compact(c, remap, kept));
        self.normals = self.normals.as_ref().map(|n| compact(n, remap, kept));
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

pub mod processing;
pub mod reconstruction;
