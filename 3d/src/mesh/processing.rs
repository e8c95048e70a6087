//! Mesh Processing Operations
//!
//! Implements:
//! - Low-density vertex pruning
//! - Quadric error metric edge collapse simplification

use super::TriangleMesh;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector4};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Linear-interpolated `q`-quantile of `values` (`q` in `[0, 1]`).
pub fn quantile(values: &[f32], q: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Remove vertices whose density is strictly below the `q`-quantile of all
/// densities, along with their faces. Returns the number of removed vertices.
pub fn remove_low_density_vertices(mesh: &mut TriangleMesh, densities: &[f32], q: f32) -> usize {
    if densities.len() != mesh.num_vertices() {
        return 0;
    }
    let Some(threshold) = quantile(densities, q) else {
        return 0;
    };

    let mask: Vec<bool> = densities.iter().map(|&d| d < threshold).collect();
    let removed = mask.iter().filter(|&&m| m).count();
    if removed > 0 {
        mesh.remove_vertices_by_mask(&mask);
    }
    tracing::debug!(threshold, removed, "low-density vertices pruned");
    removed
}

/// Fundamental error quadric of the plane through a triangle.
fn face_quadric(a: &Point3<f32>, b: &Point3<f32>, c: &Point3<f32>) -> Option<Matrix4<f64>> {
    let a = a.coords.cast::<f64>();
    let b = b.coords.cast::<f64>();
    let c = c.coords.cast::<f64>();
    let n = (b - a).cross(&(c - a)).try_normalize(1e-12)?;
    let plane = Vector4::new(n.x, n.y, n.z, -n.dot(&a));
    Some(plane * plane.transpose())
}

fn quadric_error(q: &Matrix4<f64>, p: &Vector3<f64>) -> f64 {
    let h = Vector4::new(p.x, p.y, p.z, 1.0);
    (h.transpose() * q * h)[(0, 0)].max(0.0)
}

/// Optimal collapse target for the combined quadric, falling back to the best
/// of the endpoints and midpoint when the system is singular.
fn optimal_position(q: &Matrix4<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> (Vector3<f64>, f64) {
    let m = Matrix3::new(
        q[(0, 0)],
        q[(0, 1)],
        q[(0, 2)],
        q[(1, 0)],
        q[(1, 1)],
        q[(1, 2)],
        q[(2, 0)],
        q[(2, 1)],
        q[(2, 2)],
    );
    let rhs = -Vector3::new(q[(0, 3)], q[(1, 3)], q[(2, 3)]);

    if m.determinant().abs() > 1e-12 {
        if let Some(inv) = m.try_inverse() {
            let p = inv * rhs;
            // Reject solutions far outside the edge's neighbourhood.
            let span = (b - a).norm().max(1e-9);
            if (p - (a + b) * 0.5).norm() <= 2.0 * span {
                return (p, quadric_error(q, &p));
            }
        }
    }

    let mid = (a + b) * 0.5;
    [*a, *b, mid]
        .into_iter()
        .map(|p| (p, quadric_error(q, &p)))
        .min_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(Ordering::Equal))
        .unwrap_or((mid, 0.0))
}

#[derive(Debug, Clone, Copy)]
struct Collapse {
    cost: f64,
    v0: usize,
    v1: usize,
    stamp0: u32,
    stamp1: u32,
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    // Min-heap on cost.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

struct QuadricSimplifier {
    positions: Vec<Vector3<f64>>,
    quadrics: Vec<Matrix4<f64>>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    removed: Vec<bool>,
    stamps: Vec<u32>,
    heap: BinaryHeap<Collapse>,
    live_faces: usize,
}

impl QuadricSimplifier {
    fn new(mesh: &TriangleMesh) -> Self {
        let n = mesh.num_vertices();
        let mut quadrics = vec![Matrix4::zeros(); n];
        let mut vertex_faces = vec![Vec::new(); n];

        for (fi, f) in mesh.faces.iter().enumerate() {
            if let Some(q) = face_quadric(&mesh.vertices[f[0]], &mesh.vertices[f[1]], &mesh.vertices[f[2]]) {
                for &v in f {
                    quadrics[v] += q;
                }
            }
            for &v in f {
                vertex_faces[v].push(fi);
            }
        }

        let mut simplifier = Self {
            positions: mesh.vertices.iter().map(|v| v.coords.cast::<f64>()).collect(),
            quadrics,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            vertex_faces,
            removed: vec![false; n],
            stamps: vec![0; n],
            heap: BinaryHeap::new(),
            live_faces: mesh.faces.len(),
        };

        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        for f in &mesh.faces {
            for i in 0..3 {
                let (a, b) = (f[i], f[(i + 1) % 3]);
                edges.insert((a.min(b), a.max(b)));
            }
        }
        for (a, b) in edges {
            simplifier.push_edge(a, b);
        }
        simplifier
    }

    fn push_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let q = self.quadrics[a] + self.quadrics[b];
        let (_, cost) = optimal_position(&q, &self.positions[a], &self.positions[b]);
        self.heap.push(Collapse {
            cost,
            v0: a,
            v1: b,
            stamp0: self.stamps[a],
            stamp1: self.stamps[b],
        });
    }

    fn neighbours(&self, v: usize) -> HashSet<usize> {
        let mut out = HashSet::new();
        for &fi in &self.vertex_faces[v] {
            if self.face_alive[fi] {
                for &u in &self.faces[fi] {
                    if u != v {
                        out.insert(u);
                    }
                }
            }
        }
        out
    }

    /// A collapse is rejected when it would flip the orientation of a surviving face.
    fn flips_face(&self, keep: usize, gone: usize, target: &Vector3<f64>) -> bool {
        for &v in &[keep, gone] {
            for &fi in &self.vertex_faces[v] {
                if !self.face_alive[fi] {
                    continue;
                }
                let f = self.faces[fi];
                if f.contains(&keep) && f.contains(&gone) {
                    continue;
                }
                let before: Vec<Vector3<f64>> = f.iter().map(|&i| self.positions[i]).collect();
                let after: Vec<Vector3<f64>> = f
                    .iter()
                    .map(|&i| if i == keep || i == gone { *target } else { self.positions[i] })
                    .collect();
                let n0 = (before[1] - before[0]).cross(&(before[2] - before[0]));
                let n1 = (after[1] - after[0]).cross(&(after[2] - after[0]));
                if n0.dot(&n1) < 0.0 {
                    return true;
                }
            }
        }
        false
    }

    fn collapse(&mut self, keep: usize, gone: usize, target: Vector3<f64>) {
        self.positions[keep] = target;
        let gone_q = self.quadrics[gone];
        self.quadrics[keep] += gone_q;
        self.removed[gone] = true;

        let gone_faces = std::mem::take(&mut self.vertex_faces[gone]);
        for fi in gone_faces {
            if !self.face_alive[fi] {
                continue;
            }
            let f = &mut self.faces[fi];
            if f.contains(&keep) {
                self.face_alive[fi] = false;
                self.live_faces -= 1;
            } else {
                for slot in f.iter_mut() {
                    if *slot == gone {
                        *slot = keep;
                    }
                }
                self.vertex_faces[keep].push(fi);
            }
        }
        let alive = &self.face_alive;
        self.vertex_faces[keep].retain(|&fi| alive[fi]);

        self.stamps[keep] = self.stamps[keep].wrapping_add(1);
        self.stamps[gone] = self.stamps[gone].wrapping_add(1);
        for u in self.neighbours(keep) {
            self.push_edge(keep, u);
        }
    }

    fn run(&mut self, target_faces: usize) {
        while self.live_faces > target_faces {
            let Some(c) = self.heap.pop() else {
                break;
            };
            if self.removed[c.v0]
                || self.removed[c.v1]
                || self.stamps[c.v0] != c.stamp0
                || self.stamps[c.v1] != c.stamp1
            {
                continue;
            }
            let q = self.quadrics[c.v0] + self.quadrics[c.v1];
            let (target, _) = optimal_position(&q, &self.positions[c.v0], &self.positions[c.v1]);
            if self.flips_face(c.v0, c.v1, &target) {
                continue;
            }
            self.collapse(c.v0, c.v1, target);
        }
    }
}

/// Quadric error metric edge-collapse simplification (Garland–Heckbert).
///
/// Afterwards `mesh.num_faces() <= target_faces` always holds: when no valid
/// collapse is left above the target, the smallest faces are dropped.
/// Surviving vertices keep their colour.
pub fn simplify_quadric_decimation(mesh: &mut TriangleMesh, target_faces: usize) {
    if mesh.num_faces() <= target_faces {
        return;
    }
    let input_faces = mesh.num_faces();

    let mut simplifier = QuadricSimplifier::new(mesh);
    simplifier.run(target_faces);

    for (v, p) in mesh.vertices.iter_mut().enumerate() {
        if !simplifier.removed[v] {
            let c = simplifier.positions[v];
            *p = Point3::new(c.x as f32, c.y as f32, c.z as f32);
        }
    }
    mesh.faces = simplifier
        .faces
        .iter()
        .zip(simplifier.face_alive.iter())
        .filter(|(_, &alive)| alive)
        .map(|(f, _)| *f)
        .collect();

    if mesh.num_faces() > target_faces {
        drop_smallest_faces(mesh, target_faces);
    }

    mesh.remove_unreferenced_vertices();
    mesh.compute_vertex_normals();
    tracing::debug!(
        input = input_faces,
        output = mesh.num_faces(),
        target = target_faces,
        "quadric simplification"
    );
}

/// Keep the `target_faces` largest faces, preserving their order.
fn drop_smallest_faces(mesh: &mut TriangleMesh, target_faces: usize) {
    let mut order: Vec<(usize, f32)> = mesh
        .faces
        .iter()
        .enumerate()
        .map(|(i, f)| (i, mesh.face_area(f)))
        .collect();
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut keep = vec![false; mesh.faces.len()];
    for &(i, _) in order.iter().take(target_faces) {
        keep[i] = true;
    }
    let faces = std::mem::take(&mut mesh.faces);
    mesh.faces = faces
        .into_iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(f, _)| f)
        .collect();
}
