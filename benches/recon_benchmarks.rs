//! Benchmarks for the approximate reconstruction path
//!
//! Feature detection and matching on textured images, and statistical
//! outlier removal on noisy spheres.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma};
use nalgebra::Point3;
use photogrammetry::features::{Matcher, Sift};
use photogrammetry::mesh::create_sphere_point_cloud;
use photogrammetry::point_cloud::{filter_outliers, OutlierConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Random Gaussian blobs on a mid-grey canvas
fn create_textured_image(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let blobs: Vec<(f32, f32, f32, f32)> = (0..(width * height / 400))
        .map(|_| {
            (
                rng.gen_range(0.0..width as f32),
                rng.gen_range(0.0..height as f32),
                rng.gen_range(2.0..6.0),
                rng.gen_range(-90.0..90.0),
            )
        })
        .collect();

    let mut img = GrayImage::from_pixel(width, height, Luma([128]));
    for &(bx, by, r, amp) in &blobs {
        let reach = (4.0 * r) as i64;
        for y in (by as i64 - reach).max(0)..(by as i64 + reach).min(height as i64) {
            for x in (bx as i64 - reach).max(0)..(bx as i64 + reach).min(width as i64) {
                let d2 = (x as f32 - bx).powi(2) + (y as f32 - by).powi(2);
                let p = img.get_pixel_mut(x as u32, y as u32);
                let v = p.0[0] as f32 + amp * (-d2 / (2.0 * r * r)).exp();
                p.0[0] = v.clamp(0.0, 255.0) as u8;
            }
        }
    }
    img
}

fn benchmark_sift_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("sift_detection");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    for size in [128u32, 256, 512] {
        let img = create_textured_image(size, size, 1);
        group.bench_with_input(
            BenchmarkId::new("cpu", format!("{}x{}", size, size)),
            &img,
            |b, img| {
                let sift = Sift::new();
                b.iter(|| sift.detect_and_compute(black_box(img)));
            },
        );
    }

    group.finish();
}

fn benchmark_ratio_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("ratio_matching");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for size in [256u32, 512] {
        let img = create_textured_image(size + 8, size, 2);
        let left = image::imageops::crop_imm(&img, 0, 0, size, size).to_image();
        let right = image::imageops::crop_imm(&img, 8, 0, size, size).to_image();
        let sift = Sift::new();
        let features = (sift.detect_and_compute(&left), sift.detect_and_compute(&right));

        group.bench_with_input(
            BenchmarkId::new("knn2", format!("{}x{}", size, size)),
            &features,
            |b, (query, train)| {
                let matcher = Matcher::new();
                b.iter(|| matcher.match_pair(0, black_box(query), 1, black_box(train)));
            },
        );
    }

    group.finish();
}

fn benchmark_outlier_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistical_outlier_removal");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    let mut rng = StdRng::seed_from_u64(3);
    for n in [1_000usize, 10_000, 50_000] {
        let mut cloud = create_sphere_point_cloud(Point3::origin(), 1.0, n);
        for p in cloud.points.iter_mut().step_by(50) {
            *p += nalgebra::Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
        }

        group.bench_with_input(BenchmarkId::new("k20", n), &cloud, |b, cloud| {
            let config = OutlierConfig::default();
            b.iter(|| filter_outliers(black_box(cloud), &config));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sift_detection,
    benchmark_ratio_matching,
    benchmark_outlier_filter
);
criterion_main!(benches);
