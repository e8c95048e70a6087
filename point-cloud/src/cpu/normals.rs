//! Normal estimation and orientation.

use super::{build_tree, PointWrapper};
use crate::NormalConfig;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use recon_core::PointCloud;

/// Estimate normals for the point cloud using K-nearest neighbors.
/// Uses PCA on the covariance matrix of the neighborhood.
/// Modifies the point cloud in place to add normals.
pub fn estimate_normals(pc: &mut PointCloud, k: usize) {
    if pc.is_empty() {
        return;
    }

    let tree = build_tree(&pc.points);

    let normals: Vec<Vector3<f32>> = pc
        .points
        .par_iter()
        .map(|p| {
            let query_point = [p.x, p.y, p.z];
            let neighbors: Vec<&PointWrapper> =
                tree.nearest_neighbor_iter(&query_point).take(k).collect();

            if neighbors.len() < 3 {
                return Vector3::new(0.0, 0.0, 1.0);
            }

            let mut centroid = Vector3::zeros();
            for n in &neighbors {
                centroid += n.1.coords;
            }
            centroid /= neighbors.len() as f32;

            let mut cov = Matrix3::zeros();
            for n in &neighbors {
                let d = n.1.coords - centroid;
                cov += d * d.transpose();
            }
            cov /= neighbors.len() as f32;

            let eigen = SymmetricEigen::new(cov);
            let mut min_idx = 0;
            for i in 1..3 {
                if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
                    min_idx = i;
                }
            }

            let normal = eigen.eigenvectors.column(min_idx).into_owned();
            let norm = normal.norm();
            if norm > f32::EPSILON && norm.is_finite() {
                normal / norm
            } else {
                Vector3::new(0.0, 0.0, 1.0)
            }
        })
        .collect();

    pc.normals = Some(normals);
}

/// Orient normals consistently by propagating the sign of each visited
/// normal to its `k` nearest neighbours.
pub fn orient_normals(pc: &mut PointCloud, k: usize) {
    let n = pc.len();
    if n < 3 {
        return;
    }

    let mut normals = match pc.normals.take() {
        Some(n) => n,
        None => return,
    };

    let tree = build_tree(&pc.points);

    let mut visited = vec![false; n];
    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut stack = vec![seed];

        while let Some(i) = stack.pop() {
            let q = [pc.points[i].x, pc.points[i].y, pc.points[i].z];
            for nb in tree.nearest_neighbor_iter(&q).take(k) {
                let j = nb.0;
                if visited[j] {
                    continue;
                }
                if normals[j].dot(&normals[i]) < 0.0 {
                    normals[j] = -normals[j];
                }
                visited[j] = true;
                stack.push(j);
            }
        }
    }

    pc.normals = Some(normals);
}

/// Flip every normal when, on average, they point towards the centroid.
pub fn orient_normals_outward(pc: &mut PointCloud) {
    let Some(centroid) = pc.centroid() else {
        return;
    };
    let Some(normals) = pc.normals.as_mut() else {
        return;
    };

    let alignment: f32 = pc
        .points
        .iter()
        .zip(normals.iter())
        .map(|(p, n)| n.dot(&(*p - centroid)))
        .sum();

    if alignment < 0.0 {
        for n in normals.iter_mut() {
            *n = -*n;
        }
    }
}

/// Estimate, propagate and outward-orient normals per `config`.
pub fn compute_oriented_normals(pc: &mut PointCloud, config: &NormalConfig) {
    estimate_normals(pc, config.k);
    orient_normals(pc, config.k);
    if config.orient_outward {
        orient_normals_outward(pc);
    }
}
