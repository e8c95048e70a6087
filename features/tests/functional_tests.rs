use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recon_features::*;

/// Random bright and dark Gaussian blobs on a mid-grey canvas.
fn textured_canvas(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let blobs: Vec<(f32, f32, f32, f32)> = (0..60)
        .map(|_| {
            (
                rng.gen_range(0.0..width as f32),
                rng.gen_range(0.0..height as f32),
                rng.gen_range(2.0..5.0),
                rng.gen_range(-90.0..90.0),
            )
        })
        .collect();

    let mut img = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut v = 128.0f32;
            for &(bx, by, r, amp) in &blobs {
                let d2 = (x as f32 - bx).powi(2) + (y as f32 - by).powi(2);
                if d2 < 16.0 * r * r {
                    v += amp * (-d2 / (2.0 * r * r)).exp();
                }
            }
            img.put_pixel(x, y, Luma([v.clamp(0.0, 255.0) as u8]));
        }
    }
    img
}

fn crop(src: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| *src.get_pixel(x0 + x, y0 + y))
}

#[test]
fn test_sift_detects_on_textured_image() {
    let img = textured_canvas(160, 160, 7);
    let features = Sift::new().detect_and_compute(&img);
    assert!(features.len() > 10);
    for d in features.iter() {
        assert_eq!(d.size(), SIFT_DESCRIPTOR_SIZE);
        assert!(d.keypoint.x >= 0.0 && d.keypoint.x < 160.0);
        assert!(d.keypoint.y >= 0.0 && d.keypoint.y < 160.0);
    }
}

#[test]
fn test_shifted_views_match_with_consistent_offset() {
    let canvas = textured_canvas(200, 180, 11);
    let a = crop(&canvas, 0, 0, 160, 160);
    let b = crop(&canvas, 6, 0, 160, 160);

    let sift = Sift::new();
    let fa = sift.detect_and_compute(&a);
    let fb = sift.detect_and_compute(&b);
    let matches = Matcher::new().match_pair(0, &fa, 1, &fb);
    assert!(!matches.is_empty());

    let consistent = matches
        .iter()
        .filter(|m| {
            let qa = fa.keypoint(m.query_idx).map(|k| k.x).unwrap_or(f64::NAN);
            let tb = fb.keypoint(m.train_idx).map(|k| k.x).unwrap_or(f64::NAN);
            ((qa - tb) - 6.0).abs() < 1.5
        })
        .count();
    assert!(consistent * 2 >= matches.len());
}

#[test]
fn test_feature_matcher_run_pairs_adjacent_images() {
    let canvas = textured_canvas(200, 170, 3);
    let images: Vec<GrayImage> = (0..4).map(|i| crop(&canvas, 3 * i, 0, 160, 160)).collect();

    let tracks = FeatureMatcher::default().run(&images);
    assert_eq!(tracks.features.len(), 4);
    assert_eq!(tracks.pairs.len(), 3);
    for (i, pair) in tracks.pairs.iter().enumerate() {
        assert_eq!(pair.query_image, i);
        assert_eq!(pair.train_image, i + 1);
        assert!(pair.len() <= DEFAULT_MAX_MATCHES);
        for m in pair.iter() {
            assert!(m.query_idx < tracks.features[i].len());
            assert!(m.train_idx < tracks.features[i + 1].len());
        }
    }
    assert!(tracks.total_matches() > 0);
}

#[test]
fn test_featureless_images_produce_no_matches() {
    let images: Vec<GrayImage> = (0..3)
        .map(|_| GrayImage::from_pixel(120, 120, Luma([90])))
        .collect();
    let tracks = FeatureMatcher::default().run(&images);
    assert!(tracks.features.iter().all(|f| f.is_empty()));
    assert_eq!(tracks.total_matches(), 0);
}

#[test]
fn test_single_image_has_no_pairs() {
    let img = textured_canvas(64, 64, 1);
    let tracks = FeatureMatcher::default().run(&[img]);
    assert_eq!(tracks.features.len(), 1);
    assert!(tracks.pairs.is_empty());
}
