//! Statistical outlier removal.

use super::{build_tree, PointWrapper};
use crate::OutlierConfig;
use rayon::prelude::*;
use recon_core::PointCloud;
use rstar::PointDistance;

/// Relative slack on the cut-off so a cloud that already passed the filter
/// passes it again despite float noise in the neighbour distances.
const THRESHOLD_TOLERANCE: f32 = 1e-5;

/// Mean distance from every point to its `k` nearest neighbours (itself excluded).
pub fn mean_neighbor_distances(pc: &PointCloud, k: usize) -> Vec<f32> {
    if pc.is_empty() || k == 0 {
        return vec![0.0; pc.len()];
    }
    let tree = build_tree(&pc.points);

    pc.points
        .par_iter()
        .map(|p| {
            let query_point = [p.x, p.y, p.z];
            // The first neighbour returned is the point itself.
            let neighbors: Vec<&PointWrapper> = tree
                .nearest_neighbor_iter(&query_point)
                .take(k + 1)
                .collect();

            let mut sum_dist = 0.0;
            let mut count = 0;
            for n in neighbors.iter().skip(1) {
                sum_dist += n.distance_2(&query_point).sqrt();
                count += 1;
            }

            if count > 0 {
                sum_dist / count as f32
            } else {
                0.0
            }
        })
        .collect()
}

/// Indices of `distances` within `global_mean + std_ratio * std_dev`.
fn statistical_inliers(distances: &[f32], std_ratio: f64) -> (Vec<usize>, f32) {
    let n = distances.len() as f64;
    let mean_dist = distances.iter().map(|&d| d as f64).sum::<f64>() / n;
    let variance = distances
        .iter()
        .map(|&d| {
            let diff = d as f64 - mean_dist;
            diff * diff
        })
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    let threshold = (mean_dist + std_ratio * std_dev) as f32;
    let cutoff = threshold + threshold.abs() * THRESHOLD_TOLERANCE + f32::EPSILON;

    let inliers = distances
        .iter()
        .enumerate()
        .filter(|(_, &dist)| dist <= cutoff)
        .map(|(i, _)| i)
        .collect();
    (inliers, threshold)
}

/// Remove statistical outliers.
///
/// Points whose mean distance to their `k` neighbours exceeds
/// `global_mean + std_ratio * std_dev` are removed, and the cut is repeated on
/// the survivors until a pass removes nothing. The result is therefore a fixed
/// point: filtering it again with the same parameters keeps every point.
/// Returns the filtered cloud (colours and normals kept aligned) and the
/// surviving indices into `pc`.
pub fn remove_statistical_outliers(
    pc: &PointCloud,
    k: usize,
    std_ratio: f64,
) -> (PointCloud, Vec<usize>) {
    if pc.is_empty() || k == 0 {
        return (pc.clone(), (0..pc.len()).collect());
    }

    let mut kept: Vec<usize> = (0..pc.len()).collect();
    let mut passes = 0usize;
    loop {
        passes += 1;
        let subset = PointCloud::new(kept.iter().map(|&i| pc.points[i]).collect());
        let distances = mean_neighbor_distances(&subset, k);
        let (inliers, threshold) = statistical_inliers(&distances, std_ratio);

        tracing::trace!(pass = passes, input = kept.len(), kept = inliers.len(), threshold, "outlier pass");
        if inliers.len() == kept.len() {
            break;
        }
        // The point with the smallest distance is always an inlier, so this never empties.
        kept = inliers.into_iter().map(|i| kept[i]).collect();
    }

    tracing::debug!(
        input = pc.len(),
        kept = kept.len(),
        passes,
        "statistical outlier removal"
    );

    (pc.select(&kept), kept)
}

/// [`remove_statistical_outliers`] with the parameters of `config`.
pub fn filter_outliers(pc: &PointCloud, config: &OutlierConfig) -> PointCloud {
    remove_statistical_outliers(pc, config.k, config.std_ratio).0
}
