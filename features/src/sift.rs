//! SIFT-style keypoint detector and 128-D descriptor.
//!
//! Gaussian scale space, difference-of-Gaussians extrema with sub-pixel
//! refinement, contrast and edge-response rejection, dominant gradient
//! orientation, and a 4x4x8 orientation-histogram descriptor expressed in the
//! keypoint's rotated frame.

use image::GrayImage;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use recon_core::{Descriptor, Descriptors, KeyPoint};
use std::f32::consts::{PI, SQRT_2};

const DESCRIPTOR_WIDTH: usize = 4;
const DESCRIPTOR_BINS: usize = 8;
const ORIENTATION_BINS: usize = 36;
const ORIENTATION_RADIUS_FACTOR: f32 = 3.0;
const ORIENTATION_SIGMA_FACTOR: f32 = 1.5;
const ORIENTATION_PEAK_RATIO: f32 = 0.8;
const DESCRIPTOR_SCALE_FACTOR: f32 = 3.0;
const DESCRIPTOR_MAG_THRESHOLD: f32 = 0.2;
const DESCRIPTOR_INT_FACTOR: f32 = 512.0;
const IMAGE_BORDER: isize = 5;
const MAX_INTERP_STEPS: usize = 5;
const INITIAL_BLUR: f32 = 0.5;

pub const SIFT_DESCRIPTOR_SIZE: usize = DESCRIPTOR_WIDTH * DESCRIPTOR_WIDTH * DESCRIPTOR_BINS;

#[derive(Debug, Clone)]
pub struct Sift {
    /// Octave count; `None` derives it from the image size.
    pub n_octaves: Option<usize>,
    pub n_layers: usize,
    pub sigma: f32,
    pub contrast_threshold: f32,
    pub edge_threshold: f32,
    /// Keep only the strongest responses; `None` keeps everything.
    pub max_features: Option<usize>,
}

impl Default for Sift {
    fn default() -> Self {
        Self {
            n_octaves: None,
            n_layers: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            max_features: None,
        }
    }
}

/// Single-channel float image in `[0, 1]`, row-major.
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> f32 {
        self.data[y as usize * self.width + x as usize]
    }

    fn downsample(&self) -> Plane {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(self.data[(2 * y).min(self.height - 1) * self.width + (2 * x).min(self.width - 1)]);
            }
        }
        Plane { width, height, data }
    }

    fn subtract(&self, other: &Plane) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a - b)
                .collect(),
        }
    }
}

/// Extremum located in scale space, in the coordinates of its own octave.
#[derive(Debug, Clone, Copy)]
struct ScaleSpacePoint {
    octave: usize,
    layer: usize,
    x: f32,
    y: f32,
    scale: f32,
    response: f32,
}

fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let sigma2 = sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma2)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    if sum != 0.0 {
        for v in &mut kernel {
            *v /= sum;
        }
    }
    kernel
}

/// Separable Gaussian blur with replicated borders.
fn gaussian_blur(src: &Plane, sigma: f32) -> Plane {
    if sigma <= 0.0 {
        return src.clone();
    }
    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (w, h) = (src.width, src.height);

    let mut tmp = vec![0.0f32; w * h];
    tmp.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let src_row = &src.data[y * w..(y + 1) * w];
        for (x, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, kv) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
                acc += kv * src_row[sx];
            }
            *out = acc;
        }
    });

    let mut data = vec![0.0f32; w * h];
    data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, kv) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += kv * tmp[sy * w + x];
            }
            *out = acc;
        }
    });

    Plane {
        width: w,
        height: h,
        data,
    }
}

impl Sift {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_octaves(mut self, n: usize) -> Self {
        self.n_octaves = Some(n.max(1));
        self
    }

    pub fn with_contrast_threshold(mut self, threshold: f32) -> Self {
        self.contrast_threshold = threshold;
        self
    }

    pub fn with_edge_threshold(mut self, threshold: f32) -> Self {
        self.edge_threshold = threshold;
        self
    }

    pub fn with_max_features(mut self, n: usize) -> Self {
        self.max_features = Some(n);
        self
    }

    fn octave_count(&self, width: usize, height: usize) -> usize {
        if let Some(n) = self.n_octaves {
            return n;
        }
        let min_dim = width.min(height).max(1) as f32;
        (min_dim.log2().floor() as i32 - 3).max(1) as usize
    }

    /// Detect keypoints and compute their descriptors. Keypoints that cannot be
    /// described are dropped, so every returned descriptor owns its keypoint.
    pub fn detect_and_compute(&self, image: &GrayImage) -> Descriptors {
        let min_size = (2 * IMAGE_BORDER + 3) as u32;
        if image.width() < min_size || image.height() < min_size {
            return Descriptors::new();
        }

        let base = Plane::from_gray(image);
        let base_sigma = (self.sigma * self.sigma - INITIAL_BLUR * INITIAL_BLUR)
            .max(0.01)
            .sqrt();
        let base = gaussian_blur(&base, base_sigma);

        let n_octaves = self.octave_count(base.width, base.height);
        let gaussians = self.build_gaussian_pyramid(base, n_octaves);
        let dogs = build_dog_pyramid(&gaussians);

        let mut points = self.find_scale_space_extrema(&dogs);
        if let Some(max) = self.max_features {
            points.sort_by(|a, b| {
                b.response
                    .partial_cmp(&a.response)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            points.truncate(max);
        }

        let mut descriptors = Descriptors::with_capacity(points.len());
        for p in &points {
            let img = &gaussians[p.octave][p.layer];
            for angle in dominant_orientations(img, p) {
                let data = compute_descriptor(img, p, angle);
                let octave_scale = (1u32 << p.octave) as f32;
                let kp = KeyPoint::new((p.x * octave_scale) as f64, (p.y * octave_scale) as f64)
                    .with_size((p.scale * octave_scale * 2.0) as f64)
                    .with_angle(angle.to_degrees() as f64)
                    .with_response(p.response as f64)
                    .with_octave(p.octave as i32);
                descriptors.push(Descriptor::new(data, kp));
            }
        }
        descriptors
    }

    fn build_gaussian_pyramid(&self, base: Plane, n_octaves: usize) -> Vec<Vec<Plane>> {
        let n = self.n_layers;
        let k = 2.0f32.powf(1.0 / n as f32);

        // Incremental blur taking layer i-1 to layer i.
        let mut increments = vec![0.0f32; n + 3];
        for (i, inc) in increments.iter_mut().enumerate().skip(1) {
            let prev = self.sigma * k.powi(i as i32 - 1);
            let total = prev * k;
            *inc = (total * total - prev * prev).sqrt();
        }

        let mut pyramid: Vec<Vec<Plane>> = Vec::with_capacity(n_octaves);
        for octave in 0..n_octaves {
            let first = if octave == 0 {
                base.clone()
            } else {
                pyramid[octave - 1][n].downsample()
            };
            let mut layers = Vec::with_capacity(n + 3);
            layers.push(first);
            for inc in increments.iter().skip(1) {
                let next = gaussian_blur(&layers[layers.len() - 1], *inc);
                layers.push(next);
            }
            pyramid.push(layers);
        }
        pyramid
    }

    fn find_scale_space_extrema(&self, dogs: &[Vec<Plane>]) -> Vec<ScaleSpacePoint> {
        let threshold = 0.5 * self.contrast_threshold / self.n_layers as f32;

        dogs.par_iter()
            .enumerate()
            .flat_map_iter(|(octave, layers)| {
                let mut found = Vec::new();
                let (w, h) = (layers[0].width as isize, layers[0].height as isize);
                if w <= 2 * IMAGE_BORDER || h <= 2 * IMAGE_BORDER {
                    return found.into_iter();
                }
                for layer in 1..=self.n_layers {
                    for y in IMAGE_BORDER..h - IMAGE_BORDER {
                        for x in IMAGE_BORDER..w - IMAGE_BORDER {
                            let v = layers[layer].at(x, y);
                            if v.abs() <= threshold || !is_extremum(layers, layer, x, y) {
                                continue;
                            }
                            if let Some(p) = self.refine_extremum(layers, octave, layer, x, y) {
                                found.push(p);
                            }
                        }
                    }
                }
                found.into_iter()
            })
            .collect()
    }

    /// Quadratic fit around a discrete extremum; rejects low contrast and edge responses.
    fn refine_extremum(
        &self,
        dog: &[Plane],
        octave: usize,
        layer: usize,
        x: isize,
        y: isize,
    ) -> Option<ScaleSpacePoint> {
        let (w, h) = (dog[0].width as isize, dog[0].height as isize);
        let (mut layer, mut x, mut y) = (layer as isize, x, y);

        for _ in 0..MAX_INTERP_STEPS {
            let l = layer as usize;
            let (img, prev, next) = (&dog[l], &dog[l - 1], &dog[l + 1]);

            let grad = Vector3::new(
                (img.at(x + 1, y) - img.at(x - 1, y)) * 0.5,
                (img.at(x, y + 1) - img.at(x, y - 1)) * 0.5,
                (next.at(x, y) - prev.at(x, y)) * 0.5,
            );
            let v2 = img.at(x, y) * 2.0;
            let dxx = img.at(x + 1, y) + img.at(x - 1, y) - v2;
            let dyy = img.at(x, y + 1) + img.at(x, y - 1) - v2;
            let dss = next.at(x, y) + prev.at(x, y) - v2;
            let dxy = (img.at(x + 1, y + 1) - img.at(x - 1, y + 1) - img.at(x + 1, y - 1)
                + img.at(x - 1, y - 1))
                * 0.25;
            let dxs = (next.at(x + 1, y) - next.at(x - 1, y) - prev.at(x + 1, y)
                + prev.at(x - 1, y))
                * 0.25;
            let dys = (next.at(x, y + 1) - next.at(x, y - 1) - prev.at(x, y + 1)
                + prev.at(x, y - 1))
                * 0.25;

            let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
            let offset = -(hessian.try_inverse()? * grad);

            if offset.iter().all(|o| o.abs() < 0.5) {
                let contrast = img.at(x, y) + 0.5 * grad.dot(&offset);
                if contrast.abs() < self.contrast_threshold / self.n_layers as f32 {
                    return None;
                }

                let trace = dxx + dyy;
                let det = dxx * dyy - dxy * dxy;
                let r = self.edge_threshold;
                if det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det {
                    return None;
                }

                let fractional_layer = layer as f32 + offset.z;
                return Some(ScaleSpacePoint {
                    octave,
                    layer: l,
                    x: x as f32 + offset.x,
                    y: y as f32 + offset.y,
                    scale: self.sigma * 2.0f32.powf(fractional_layer / self.n_layers as f32),
                    response: contrast.abs(),
                });
            }

            if offset.iter().any(|o| !o.is_finite() || o.abs() > 1e3) {
                return None;
            }
            x += offset.x.round() as isize;
            y += offset.y.round() as isize;
            layer += offset.z.round() as isize;

            if layer < 1
                || layer > self.n_layers as isize
                || x < IMAGE_BORDER
                || x >= w - IMAGE_BORDER
                || y < IMAGE_BORDER
                || y >= h - IMAGE_BORDER
            {
                return None;
            }
        }
        None
    }
}

fn build_dog_pyramid(gaussians: &[Vec<Plane>]) -> Vec<Vec<Plane>> {
    gaussians
        .iter()
        .map(|layers| layers.windows(2).map(|w| w[1].subtract(&w[0])).collect())
        .collect()
}

fn is_extremum(dog: &[Plane], layer: usize, x: isize, y: isize) -> bool {
    let v = dog[layer].at(x, y);
    for plane in &dog[layer - 1..=layer + 1] {
        for dy in -1..=1 {
            for dx in -1..=1 {
                let n = plane.at(x + dx, y + dy);
                if (v > 0.0 && n > v) || (v < 0.0 && n < v) {
                    return false;
                }
            }
        }
    }
    true
}

#[inline]
fn gradient(img: &Plane, x: isize, y: isize) -> (f32, f32) {
    (
        img.at(x + 1, y) - img.at(x - 1, y),
        img.at(x, y + 1) - img.at(x, y - 1),
    )
}

/// Orientations (radians, `[0, 2π)`) of the histogram peaks within 80% of the maximum.
fn dominant_orientations(img: &Plane, p: &ScaleSpacePoint) -> Vec<f32> {
    let (w, h) = (img.width as isize, img.height as isize);
    let cx = p.x.round() as isize;
    let cy = p.y.round() as isize;
    let sigma = ORIENTATION_SIGMA_FACTOR * p.scale;
    let radius = (ORIENTATION_RADIUS_FACTOR * sigma).round() as isize;
    let exp_factor = -1.0 / (2.0 * sigma * sigma);

    let mut raw = [0.0f32; ORIENTATION_BINS];
    for dy in -radius..=radius {
        let y = cy + dy;
        if y <= 0 || y >= h - 1 {
            continue;
        }
        for dx in -radius..=radius {
            let x = cx + dx;
            if x <= 0 || x >= w - 1 {
                continue;
            }
            let (gx, gy) = gradient(img, x, y);
            let mag = (gx * gx + gy * gy).sqrt();
            let ori = gy.atan2(gx).rem_euclid(2.0 * PI);
            let weight = (((dx * dx + dy * dy) as f32) * exp_factor).exp();
            let bin = ((ori * ORIENTATION_BINS as f32 / (2.0 * PI)).round() as usize) % ORIENTATION_BINS;
            raw[bin] += weight * mag;
        }
    }

    let n = ORIENTATION_BINS;
    let mut hist = [0.0f32; ORIENTATION_BINS];
    for i in 0..n {
        hist[i] = (raw[(i + n - 2) % n] + raw[(i + 2) % n]) / 16.0
            + (raw[(i + n - 1) % n] + raw[(i + 1) % n]) * 4.0 / 16.0
            + raw[i] * 6.0 / 16.0;
    }

    let max = hist.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0];
    }

    let mut angles = Vec::new();
    for i in 0..n {
        let left = hist[(i + n - 1) % n];
        let right = hist[(i + 1) % n];
        if hist[i] > left && hist[i] > right && hist[i] >= ORIENTATION_PEAK_RATIO * max {
            let denom = left - 2.0 * hist[i] + right;
            let shift = if denom != 0.0 { 0.5 * (left - right) / denom } else { 0.0 };
            let bin = (i as f32 + shift).rem_euclid(n as f32);
            angles.push(bin * 2.0 * PI / n as f32);
        }
    }
    if angles.is_empty() {
        angles.push(0.0);
    }
    angles
}

/// 4x4 spatial cells x 8 orientation bins, sampled in the keypoint's rotated frame.
fn compute_descriptor(img: &Plane, p: &ScaleSpacePoint, angle: f32) -> Vec<f32> {
    let d = DESCRIPTOR_WIDTH;
    let n = DESCRIPTOR_BINS;
    let (w, h) = (img.width as isize, img.height as isize);
    let cx = p.x.round() as isize;
    let cy = p.y.round() as isize;

    let hist_width = DESCRIPTOR_SCALE_FACTOR * p.scale;
    let max_radius = ((w * w + h * h) as f32).sqrt();
    let radius = (hist_width * SQRT_2 * (d as f32 + 1.0) * 0.5)
        .round()
        .min(max_radius) as isize;
    let cos_t = angle.cos() / hist_width;
    let sin_t = angle.sin() / hist_width;
    let bins_per_rad = n as f32 / (2.0 * PI);
    let exp_scale = -1.0 / (d as f32 * d as f32 * 0.5);
    let half = d as f32 / 2.0 - 0.5;

    let mut hist = vec![0.0f32; d * d * n];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let c_rot = dx as f32 * cos_t + dy as f32 * sin_t;
            let r_rot = -(dx as f32) * sin_t + dy as f32 * cos_t;
            let rbin = r_rot + half;
            let cbin = c_rot + half;
            if rbin <= -1.0 || rbin >= d as f32 || cbin <= -1.0 || cbin >= d as f32 {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x <= 0 || x >= w - 1 || y <= 0 || y >= h - 1 {
                continue;
            }

            let (gx, gy) = gradient(img, x, y);
            let mag = (gx * gx + gy * gy).sqrt();
            let ori = (gy.atan2(gx) - angle).rem_euclid(2.0 * PI);
            let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
            let obin = ori * bins_per_rad;

            let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
            let (fr, fc, fo) = (rbin - r0, cbin - c0, obin - o0);
            let value = mag * weight;

            for (ri, wr) in [(r0 as isize, 1.0 - fr), (r0 as isize + 1, fr)] {
                if ri < 0 || ri >= d as isize {
                    continue;
                }
                for (ci, wc) in [(c0 as isize, 1.0 - fc), (c0 as isize + 1, fc)] {
                    if ci < 0 || ci >= d as isize {
                        continue;
                    }
                    for (oi, wo) in [(o0 as usize % n, 1.0 - fo), ((o0 as usize + 1) % n, fo)] {
                        hist[(ri as usize * d + ci as usize) * n + oi] += value * wr * wc * wo;
                    }
                }
            }
        }
    }

    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    let threshold = norm * DESCRIPTOR_MAG_THRESHOLD;
    for v in &mut hist {
        *v = v.min(threshold);
    }
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    let scale = DESCRIPTOR_INT_FACTOR / norm;
    for v in &mut hist {
        *v = (*v * scale).min(255.0);
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blob_image(size: u32, blobs: &[(f32, f32, f32, u8)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(size, size, Luma([40]));
        for y in 0..size {
            for x in 0..size {
                let mut v = 40.0f32;
                for &(bx, by, r, intensity) in blobs {
                    let d2 = (x as f32 - bx).powi(2) + (y as f32 - by).powi(2);
                    v += (intensity as f32 - 40.0) * (-d2 / (2.0 * r * r)).exp();
                }
                img.put_pixel(x, y, Luma([v.clamp(0.0, 255.0) as u8]));
            }
        }
        img
    }

    #[test]
    fn test_gaussian_kernel_is_normalized() {
        let k = gaussian_kernel_1d(1.6);
        assert_eq!(k.len() % 2, 1);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(k[k.len() / 2] > k[0]);
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let plane = Plane {
            width: 16,
            height: 12,
            data: vec![0.5; 16 * 12],
        };
        let blurred = gaussian_blur(&plane, 2.0);
        assert!(blurred.data.iter().all(|v| (v - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let img = GrayImage::from_pixel(96, 96, Luma([128]));
        let features = Sift::new().detect_and_compute(&img);
        assert!(features.is_empty());
    }

    #[test]
    fn test_tiny_image_is_ignored() {
        let img = GrayImage::from_pixel(8, 8, Luma([10]));
        assert!(Sift::new().detect_and_compute(&img).is_empty());
    }

    #[test]
    fn test_detects_isolated_blob() {
        let img = blob_image(96, &[(48.0, 48.0, 4.0, 230)]);
        let features = Sift::new().detect_and_compute(&img);
        assert!(!features.is_empty());
        let near_center = features
            .iter()
            .any(|d| (d.keypoint.x - 48.0).abs() < 4.0 && (d.keypoint.y - 48.0).abs() < 4.0);
        assert!(near_center);
        for d in features.iter() {
            assert_eq!(d.size(), SIFT_DESCRIPTOR_SIZE);
            assert!(d.data.iter().all(|v| (0.0..=255.0).contains(v)));
        }
    }

    #[test]
    fn test_max_features_limits_output_keypoints() {
        let blobs: Vec<_> = (0..4)
            .flat_map(|i| (0..4).map(move |j| (20.0 + 20.0 * i as f32, 20.0 + 20.0 * j as f32, 3.0, 220)))
            .collect();
        let img = blob_image(100, &blobs);
        let all = Sift::new().detect_and_compute(&img);
        let limited = Sift::new().with_max_features(2).detect_and_compute(&img);
        assert!(limited.len() <= all.len());
        // one scale-space point can yield several orientations
        let distinct: std::collections::HashSet<_> = limited
            .iter()
            .map(|d| ((d.keypoint.x * 10.0) as i64, (d.keypoint.y * 10.0) as i64))
            .collect();
        assert!(distinct.len() <= 2);
    }
}
