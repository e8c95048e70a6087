use nalgebra::{Point3, Scalar, Vector3};

/// Unordered set of 3D samples with optional per-point RGB colour (`[0, 1]`) and normal.
#[derive(Debug, Clone, Default)]
pub struct PointCloud<T: Scalar = f32> {
    pub points: Vec<Point3<T>>,
    pub colors: Option<Vec<Point3<T>>>,
    pub normals: Option<Vec<Vector3<T>>>,
}

impl<T: Scalar> PointCloud<T> {
    pub fn new(points: Vec<Point3<T>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<T>>) -> crate::Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(crate::Error::invalid_input(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<T>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::invalid_input(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Keep the points whose index is listed in `indices` (ascending), along with their attributes.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            points: indices.iter().map(|&i| self.points[i].clone()).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i].clone()).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i].clone()).collect()),
        }
    }
}

impl PointCloud<f32> {
    pub fn centroid(&self) -> Option<Point3<f32>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f32))
    }

    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.points.first()?;
        let (mut min, mut max) = (first, first);
        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some((min, max))
    }
}
