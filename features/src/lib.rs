//! Feature detection and matching for ordered image sets.
//!
//! Each image gets one feature set (keypoints with 128-D float descriptors);
//! each adjacent pair `(i, i + 1)` gets one ratio-tested match set.

pub mod matcher;
pub mod sift;

pub use matcher::*;
pub use sift::*;

use image::GrayImage;
use rayon::prelude::*;
use recon_core::{Descriptors, Matches};

/// Features and adjacent-pair matches of one ordered image set.
#[derive(Debug, Clone, Default)]
pub struct FeatureTracks {
    /// One feature set per image, in input order.
    pub features: Vec<Descriptors>,
    /// One match set per adjacent pair; `pairs[i]` matches image `i` against `i + 1`.
    pub pairs: Vec<Matches>,
}

impl FeatureTracks {
    pub fn total_matches(&self) -> usize {
        self.pairs.iter().map(Matches::len).sum()
    }
}

/// Detector plus matcher, run over an ordered image set.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatcher {
    pub sift: Sift,
    pub matcher: Matcher,
}

impl FeatureMatcher {
    pub fn new(sift: Sift, matcher: Matcher) -> Self {
        Self { sift, matcher }
    }

    /// Detect features on every image. Images with no features yield an empty set.
    pub fn detect_all(&self, images: &[GrayImage]) -> Vec<Descriptors> {
        images
            .par_iter()
            .map(|img| self.sift.detect_and_compute(img))
            .collect()
    }

    /// Match every adjacent pair of feature sets.
    pub fn match_adjacent(&self, features: &[Descriptors]) -> Vec<Matches> {
        if features.len() < 2 {
            return Vec::new();
        }
        (0..features.len() - 1)
            .into_par_iter()
            .map(|i| self.matcher.match_pair(i, &features[i], i + 1, &features[i + 1]))
            .collect()
    }

    pub fn run(&self, images: &[GrayImage]) -> FeatureTracks {
        let features = self.detect_all(images);
        for (i, f) in features.iter().enumerate() {
            tracing::debug!(image = i, features = f.len(), "features detected");
        }

        let pairs = self.match_adjacent(&features);
        for m in &pairs {
            tracing::debug!(
                query = m.query_image,
                train = m.train_image,
                matches = m.len(),
                "pair matched"
            );
        }

        FeatureTracks { features, pairs }
    }
}
