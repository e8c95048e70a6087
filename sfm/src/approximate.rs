//! Approximate point synthesis from adjacent-pair matches.
//!
//! Not triangulation. Each image is assigned a position on a synthetic camera
//! ring (`angle = i / N * 2π`), the descriptor distance of a correspondence is
//! used as a depth proxy, and the keypoint row gives the height:
//!
//! ```text
//! depth    = depth_offset + distance / distance_scale
//! position = (depth * cos(angle), y / height_scale - 0.5, depth * sin(angle))
//! ```

use crate::{Result, SfmError};
use image::RgbImage;
use nalgebra::Point3;
use recon_core::PointCloud;
use recon_features::FeatureTracks;
use std::f32::consts::TAU;

pub const DEFAULT_HEIGHT_SCALE: f32 = 500.0;

#[derive(Debug, Clone)]
pub struct ApproximateConfig {
    /// Pixel rows per unit of height.
    pub height_scale: f32,
    pub depth_offset: f32,
    /// Descriptor distance per unit of depth.
    pub distance_scale: f32,
}

impl Default for ApproximateConfig {
    fn default() -> Self {
        Self {
            height_scale: DEFAULT_HEIGHT_SCALE,
            depth_offset: 0.5,
            distance_scale: 1000.0,
        }
    }
}

impl ApproximateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_height_scale(mut self, height_scale: f32) -> Self {
        self.height_scale = height_scale;
        self
    }

    pub fn with_depth(mut self, offset: f32, distance_scale: f32) -> Self {
        self.depth_offset = offset;
        self.distance_scale = distance_scale;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApproximateSynthesizer {
    pub config: ApproximateConfig,
}

impl ApproximateSynthesizer {
    pub fn new(config: ApproximateConfig) -> Self {
        Self { config }
    }

    /// Build one coloured point per accepted correspondence.
    ///
    /// `images` are the decoded RGB images of the set, in the same order the
    /// tracks were computed from; colour is sampled from the query image of
    /// each pair.
    pub fn synthesize(&self, tracks: &FeatureTracks, images: &[RgbImage]) -> Result<PointCloud> {
        if tracks.features.len() != images.len() {
            return Err(SfmError::InvalidInput(format!(
                "{} feature sets for {} images",
                tracks.features.len(),
                images.len()
            )));
        }

        let n = images.len() as f32;
        let cfg = &self.config;
        let mut points = Vec::with_capacity(tracks.total_matches());
        let mut colors = Vec::with_capacity(tracks.total_matches());

        for pair in &tracks.pairs {
            let i = pair.query_image;
            let (Some(features), Some(image)) = (tracks.features.get(i), images.get(i)) else {
                return Err(SfmError::InvalidInput(format!("pair references missing image {}", i)));
            };

            let angle = i as f32 / n * TAU;
            let (sin, cos) = angle.sin_cos();

            for m in pair.iter() {
                let Some(kp) = features.keypoint(m.query_idx) else {
                    continue;
                };
                let depth = cfg.depth_offset + m.distance / cfg.distance_scale;
                let height = kp.y as f32 / cfg.height_scale - 0.5;
                points.push(Point3::new(depth * cos, height, depth * sin));

                let (px, py) = kp.pixel(image.width(), image.height());
                let [r, g, b] = image.get_pixel(px, py).0;
                colors.push(Point3::new(
                    r as f32 / 255.0,
                    g as f32 / 255.0,
                    b as f32 / 255.0,
                ));
            }
        }

        if points.is_empty() {
            return Err(SfmError::EmptyPointCloud);
        }

        tracing::debug!(points = points.len(), "approximate cloud synthesized");
        Ok(PointCloud::new(points).with_colors(colors)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use recon_core::{Descriptor, Descriptors, FeatureMatch, KeyPoint, Matches};

    fn features(kps: &[(f64, f64)]) -> Descriptors {
        let mut d = Descriptors::new();
        for &(x, y) in kps {
            d.push(Descriptor::new(vec![0.0; 4], KeyPoint::new(x, y)));
        }
        d
    }

    fn tracks(n: usize, pairs: Vec<Matches>) -> FeatureTracks {
        FeatureTracks {
            features: (0..n).map(|_| features(&[(10.0, 250.0), (20.0, 0.0)])).collect(),
            pairs,
        }
    }

    fn images(n: usize) -> Vec<RgbImage> {
        (0..n).map(|_| RgbImage::new(64, 64)).collect()
    }

    #[test]
    fn test_ring_placement() {
        let pairs = vec![
            Matches::with_matches(0, 1, vec![FeatureMatch::new(0, 0, 500.0)]),
            Matches::with_matches(1, 2, vec![FeatureMatch::new(1, 0, 0.0)]),
        ];
        let cloud = ApproximateSynthesizer::default()
            .synthesize(&tracks(4, pairs), &images(4))
            .unwrap();
        assert_eq!(cloud.len(), 2);

        // image 0: angle 0, depth 1.0, y = 250 / 500 - 0.5
        let p = cloud.points[0];
        assert!((p.x - 1.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
        assert!(p.z.abs() < 1e-6);

        // image 1 of 4: angle π/2, depth 0.5, y = -0.5
        let p = cloud.points[1];
        assert!(p.x.abs() < 1e-6);
        assert!((p.y + 0.5).abs() < 1e-6);
        assert!((p.z - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_colors_are_rgb_and_clamped() {
        let mut imgs = images(3);
        imgs[0].put_pixel(10, 63, Rgb([255, 0, 0]));
        let pairs = vec![Matches::with_matches(0, 1, vec![FeatureMatch::new(0, 0, 1.0)])];

        let cloud = ApproximateSynthesizer::default()
            .synthesize(&tracks(3, pairs), &imgs)
            .unwrap();
        let colors = cloud.colors.unwrap();
        assert_eq!(colors.len(), cloud.points.len());
        // keypoint row 250 falls outside the 64-px image and clamps to the last row
        assert_eq!(colors[0], Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_no_matches_is_empty_cloud() {
        let pairs = vec![Matches::new(0, 1), Matches::new(1, 2)];
        let err = ApproximateSynthesizer::default()
            .synthesize(&tracks(3, pairs), &images(3))
            .unwrap_err();
        assert!(matches!(err, SfmError::EmptyPointCloud));
    }

    #[test]
    fn test_image_count_mismatch() {
        let err = ApproximateSynthesizer::default()
            .synthesize(&tracks(3, Vec::new()), &images(2))
            .unwrap_err();
        assert!(matches!(err, SfmError::InvalidInput(_)));
    }
}
