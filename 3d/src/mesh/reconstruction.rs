//! Surface reconstruction from oriented point clouds.
//!
//! The samples are splatted onto the nodes of a sparse grid covering their
//! padded bounding cube: every node near a sample stores the Gaussian-weighted
//! average of the oriented plane distances `n·(x - p)` and the sum of weights
//! (its density). The zero level set is extracted by marching tetrahedra.

use super::TriangleMesh;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use recon_core::PointCloud;
use recon_point_cloud::mean_neighbor_distances;
use std::collections::HashMap;

const KEY_BITS: u32 = 21;
const KEY_MASK: u64 = (1 << KEY_BITS) - 1;
const MAX_DEPTH: u32 = 12;
const SPACING_NEIGHBORS: usize = 6;

/// Corner offsets of a grid cell.
const CUBE_CORNERS: [[u32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Six tetrahedra around the 0-6 diagonal; face diagonals agree between neighbouring cells.
const CUBE_TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 5, 1, 6],
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
];

/// Parameters of the surface reconstructor.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfig {
    /// Grid resolution is `2^depth` cells along the bounding cube edge.
    pub depth: u32,
    /// Splat radius as a multiple of the mean sample spacing.
    pub spacing_factor: f32,
    /// Splat radius bounds, in cells.
    pub min_support_cells: f32,
    pub max_support_cells: f32,
    /// Bounding cube padding, as a fraction of the cloud extent on each side.
    pub padding: f32,
    /// Vertices with density below this quantile are pruned.
    pub density_quantile: f32,
    /// Triangle budget of the simplified mesh.
    pub target_triangles: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            depth: 9,
            spacing_factor: 2.0,
            min_support_cells: 2.0,
            max_support_cells: 8.0,
            padding: 0.1,
            density_quantile: 0.01,
            target_triangles: 50_000,
        }
    }
}

impl SurfaceConfig {
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth.clamp(1, MAX_DEPTH);
        self
    }

    pub fn with_density_quantile(mut self, quantile: f32) -> Self {
        self.density_quantile = quantile.clamp(0.0, 1.0);
        self
    }

    pub fn with_target_triangles(mut self, target: usize) -> Self {
        self.target_triangles = target;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeSample {
    weight: f32,
    value: f32,
    color: Vector3<f32>,
}

impl NodeSample {
    fn merge(&mut self, other: &NodeSample) {
        self.weight += other.weight;
        self.value += other.value;
        self.color += other.color;
    }
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    key: u64,
    position: Point3<f32>,
    value: f32,
    density: f32,
    color: Vector3<f32>,
}

/// Zero crossing on one grid edge, identified by its endpoint keys.
#[derive(Debug, Clone, Copy)]
struct EdgeCut {
    edge: (u64, u64),
    position: Point3<f32>,
    density: f32,
    color: Vector3<f32>,
}

#[inline]
fn pack_key(i: u32, j: u32, k: u32) -> u64 {
    i as u64 | (j as u64) << KEY_BITS | (k as u64) << (2 * KEY_BITS)
}

#[inline]
fn unpack_key(key: u64) -> [u32; 3] {
    [
        (key & KEY_MASK) as u32,
        ((key >> KEY_BITS) & KEY_MASK) as u32,
        ((key >> (2 * KEY_BITS)) & KEY_MASK) as u32,
    ]
}

/// Sparse sampling grid over the padded bounding cube of a cloud.
#[derive(Debug, Clone, Copy)]
struct Grid {
    origin: Point3<f32>,
    cell: f32,
    resolution: u32,
}

impl Grid {
    fn covering(cloud: &PointCloud, depth: u32, padding: f32) -> Option<Self> {
        let (min, max) = cloud.bounds()?;
        let extent = (max - min).max().max(1e-3);
        let side = extent * (1.0 + 2.0 * padding);
        let center = nalgebra::center(&min, &max);
        let resolution = 1u32 << depth.clamp(1, MAX_DEPTH);
        Some(Self {
            origin: center - Vector3::repeat(side * 0.5),
            cell: side / resolution as f32,
            resolution,
        })
    }

    #[inline]
    fn node_position(&self, i: u32, j: u32, k: u32) -> Point3<f32> {
        self.origin + Vector3::new(i as f32, j as f32, k as f32) * self.cell
    }
}

/// Reconstruct a triangle surface from a cloud carrying normals.
///
/// Returns the mesh and one density value per mesh vertex, or `None` when the
/// cloud is empty or has no normals. The mesh may have zero faces.
pub fn reconstruct_implicit_surface(
    cloud: &PointCloud,
    config: &SurfaceConfig,
) -> Option<(TriangleMesh, Vec<f32>)> {
    let normals = cloud.normals.as_ref()?;
    if cloud.is_empty() || normals.len() != cloud.len() {
        return None;
    }
    let grid = Grid::covering(cloud, config.depth, config.padding)?;

    let distances = mean_neighbor_distances(cloud, SPACING_NEIGHBORS);
    let spacing = distances.iter().sum::<f32>() / distances.len() as f32;
    let radius = (config.spacing_factor * spacing).clamp(
        config.min_support_cells * grid.cell,
        config.max_support_cells * grid.cell,
    );

    let nodes = splat_samples(cloud, normals, &grid, radius);
    tracing::debug!(
        points = cloud.len(),
        nodes = nodes.len(),
        cell = grid.cell,
        radius,
        "implicit surface sampled"
    );

    let triangles = extract_triangles(&nodes, &grid);
    let (mut mesh, densities) = assemble_mesh(&triangles);
    if cloud.colors.is_none() {
        mesh.colors = None;
    }
    Some((mesh, densities))
}

fn splat_samples(
    cloud: &PointCloud,
    normals: &[Vector3<f32>],
    grid: &Grid,
    radius: f32,
) -> HashMap<u64, NodeSample> {
    let radius2 = radius * radius;
    let inv_two_sigma2 = 1.0 / (2.0 * (radius * 0.5).powi(2));
    let reach = radius / grid.cell;
    let max_index = grid.resolution as f32;

    let accumulated = cloud
        .points
        .par_iter()
        .enumerate()
        .fold(HashMap::new, |mut acc: HashMap<u64, NodeSample>, (idx, p)| {
            let normal = normals[idx];
            let color = cloud
                .colors
                .as_ref()
                .map(|c| c[idx].coords)
                .unwrap_or_else(Vector3::zeros);
            let g = (*p - grid.origin) / grid.cell;

            let lo = |c: f32| (c - reach).ceil().clamp(0.0, max_index) as u32;
            let hi = |c: f32| (c + reach).floor().clamp(0.0, max_index) as u32;

            for k in lo(g.z)..=hi(g.z) {
                for j in lo(g.y)..=hi(g.y) {
                    for i in lo(g.x)..=hi(g.x) {
                        let x = grid.node_position(i, j, k);
                        let d = x - *p;
                        let d2 = d.norm_squared();
                        if d2 > radius2 {
                            continue;
                        }
                        let w = (-d2 * inv_two_sigma2).exp();
                        let entry = acc.entry(pack_key(i, j, k)).or_default();
                        entry.weight += w;
                        entry.value += w * normal.dot(&d);
                        entry.color += color * w;
                    }
                }
            }
            acc
        })
        .reduce(HashMap::new, |mut a, mut b| {
            if a.len() < b.len() {
                std::mem::swap(&mut a, &mut b);
            }
            for (key, sample) in b {
                a.entry(key).or_default().merge(&sample);
            }
            a
        });

    accumulated
        .into_iter()
        .filter(|(_, s)| s.weight > 0.0)
        .map(|(key, s)| {
            (
                key,
                NodeSample {
                    weight: s.weight,
                    value: s.value / s.weight,
                    color: s.color / s.weight,
                },
            )
        })
        .collect()
}

fn extract_triangles(nodes: &HashMap<u64, NodeSample>, grid: &Grid) -> Vec<[EdgeCut; 3]> {
    let mut cells: Vec<u64> = nodes
        .keys()
        .copied()
        .filter(|&key| {
            let [i, j, k] = unpack_key(key);
            i < grid.resolution && j < grid.resolution && k < grid.resolution
        })
        .collect();
    cells.sort_unstable();

    cells
        .par_iter()
        .flat_map_iter(|&cell| {
            let mut out = Vec::new();
            if let Some(corners) = cell_corners(cell, nodes, grid) {
                for tet in CUBE_TETRAHEDRA {
                    polygonise_tetrahedron(
                        [corners[tet[0]], corners[tet[1]], corners[tet[2]], corners[tet[3]]],
                        &mut out,
                    );
                }
            }
            out.into_iter()
        })
        .collect()
}

fn cell_corners(cell: u64, nodes: &HashMap<u64, NodeSample>, grid: &Grid) -> Option<[Corner; 8]> {
    let [i, j, k] = unpack_key(cell);
    let mut corners = [Corner {
        key: 0,
        position: Point3::origin(),
        value: 0.0,
        density: 0.0,
        color: Vector3::zeros(),
    }; 8];
    let (mut any_inside, mut any_outside) = (false, false);

    for (slot, offset) in corners.iter_mut().zip(CUBE_CORNERS.iter()) {
        let (ci, cj, ck) = (i + offset[0], j + offset[1], k + offset[2]);
        let key = pack_key(ci, cj, ck);
        let sample = nodes.get(&key)?;
        if sample.value < 0.0 {
            any_inside = true;
        } else {
            any_outside = true;
        }
        *slot = Corner {
            key,
            position: grid.node_position(ci, cj, ck),
            value: sample.value,
            density: sample.weight,
            color: sample.color,
        };
    }

    if any_inside && any_outside {
        Some(corners)
    } else {
        None
    }
}

fn edge_cut(a: &Corner, b: &Corner) -> EdgeCut {
    // Interpolate in key order so both cells sharing the edge agree exactly.
    let (a, b) = if a.key < b.key { (a, b) } else { (b, a) };
    let denom = a.value - b.value;
    let t = if denom.abs() > f32::EPSILON {
        (a.value / denom).clamp(0.0, 1.0)
    } else {
        0.5
    };
    EdgeCut {
        edge: (a.key, b.key),
        position: a.position + (b.position - a.position) * t,
        density: a.density + (b.density - a.density) * t,
        color: a.color + (b.color - a.color) * t,
    }
}

fn push_oriented(out: &mut Vec<[EdgeCut; 3]>, tri: [EdgeCut; 3], outward: &Vector3<f32>) {
    let n = (tri[1].position - tri[0].position).cross(&(tri[2].position - tri[0].position));
    if n.dot(outward) < 0.0 {
        out.push([tri[0], tri[2], tri[1]]);
    } else {
        out.push(tri);
    }
}

/// Emit the zero-level triangles of one tetrahedron, facing increasing value.
fn polygonise_tetrahedron(t: [Corner; 4], out: &mut Vec<[EdgeCut; 3]>) {
    let inside: Vec<usize> = (0..4).filter(|&i| t[i].value < 0.0).collect();
    let outside: Vec<usize> = (0..4).filter(|&i| t[i].value >= 0.0).collect();
    if inside.is_empty() || outside.is_empty() {
        return;
    }

    let mean = |idx: &[usize]| {
        idx.iter().fold(Vector3::zeros(), |acc, &i| acc + t[i].position.coords) / idx.len() as f32
    };
    let outward = mean(&outside) - mean(&inside);

    match inside.len() {
        1 | 3 => {
            let (lone, others) = if inside.len() == 1 {
                (inside[0], outside)
            } else {
                (outside[0], inside)
            };
            let tri = [
                edge_cut(&t[lone], &t[others[0]]),
                edge_cut(&t[lone], &t[others[1]]),
                edge_cut(&t[lone], &t[others[2]]),
            ];
            push_oriented(out, tri, &outward);
        }
        _ => {
            let (a, b) = (inside[0], inside[1]);
            let (c, d) = (outside[0], outside[1]);
            // Quad a-c, a-d, b-d, b-c split into two triangles.
            let ac = edge_cut(&t[a], &t[c]);
            let ad = edge_cut(&t[a], &t[d]);
            let bd = edge_cut(&t[b], &t[d]);
            let bc = edge_cut(&t[b], &t[c]);
            push_oriented(out, [ac, ad, bd], &outward);
            push_oriented(out, [ac, bd, bc], &outward);
        }
    }
}

fn assemble_mesh(triangles: &[[EdgeCut; 3]]) -> (TriangleMesh, Vec<f32>) {
    let mut index: HashMap<(u64, u64), usize> = HashMap::with_capacity(triangles.len());
    let mut vertices = Vec::new();
    let mut colors = Vec::new();
    let mut densities = Vec::new();
    let mut faces = Vec::with_capacity(triangles.len());

    for tri in triangles {
        let mut face = [0usize; 3];
        for (slot, cut) in face.iter_mut().zip(tri.iter()) {
            *slot = *index.entry(cut.edge).or_insert_with(|| {
                vertices.push(cut.position);
                colors.push(Point3::from(cut.color));
                densities.push(cut.density);
                vertices.len() - 1
            });
        }
        faces.push(face);
    }

    let mesh = TriangleMesh::with_vertices_and_faces(vertices, faces).with_colors(colors);
    (mesh, densities)
}

/// Points sampled on a sphere with outward normals, for tests and benchmarks.
pub fn create_sphere_point_cloud(center: Point3<f32>, radius: f32, num_points: usize) -> PointCloud {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    let mut points = Vec::with_capacity(num_points);
    let mut normals = Vec::with_capacity(num_points);
    for i in 0..num_points {
        let y = 1.0 - 2.0 * (i as f32 + 0.5) / num_points as f32;
        let r = (1.0 - y * y).max(0.0).sqrt();
        let theta = golden * i as f32;
        let n = Vector3::new(r * theta.cos(), y, r * theta.sin());
        points.push(center + n * radius);
        normals.push(n);
    }
    PointCloud {
        points,
        colors: None,
        normals: Some(normals),
    }
}
