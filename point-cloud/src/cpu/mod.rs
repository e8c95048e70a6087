//! CPU point cloud operations backed by an R*-tree for neighbour queries.

pub mod filtering;
pub mod normals;

pub use filtering::*;
pub use normals::*;

use nalgebra::Point3;
use rstar::{RTree, RTreeObject, AABB};

/// Indexed point stored in the R*-tree.
pub(crate) struct PointWrapper(pub usize, pub Point3<f32>);

impl RTreeObject for PointWrapper {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl rstar::PointDistance for PointWrapper {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

pub(crate) fn build_tree(points: &[Point3<f32>]) -> RTree<PointWrapper> {
    let wrappers: Vec<PointWrapper> = points
        .iter()
        .enumerate()
        .map(|(i, p)| PointWrapper(i, *p))
        .collect();
    RTree::bulk_load(wrappers)
}
