use rayon::prelude::*;
use recon_core::{Descriptors, FeatureMatch, Matches};
use std::cmp::Ordering;

pub const DEFAULT_RATIO_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MAX_MATCHES: usize = 500;

/// Brute-force L2 matcher with Lowe's ratio test and a per-pair cap.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub ratio_threshold: f32,
    pub max_matches: usize,
    pub cross_check: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            max_matches: DEFAULT_MAX_MATCHES,
            cross_check: false,
        }
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ratio_test(mut self, threshold: f32) -> Self {
        self.ratio_threshold = threshold;
        self
    }

    pub fn with_max_matches(mut self, max: usize) -> Self {
        self.max_matches = max;
        self
    }

    pub fn with_cross_check(mut self) -> Self {
        self.cross_check = true;
        self
    }

    /// Ratio-tested correspondences from `query` (image `query_image`) into
    /// `train` (image `train_image`), in query order, capped at `max_matches`.
    pub fn match_pair(
        &self,
        query_image: usize,
        query: &Descriptors,
        train_image: usize,
        train: &Descriptors,
    ) -> Matches {
        let knn = knn_match(query, train, 2);
        let mut good = filter_matches_by_ratio_test(&knn, self.ratio_threshold);

        if self.cross_check {
            good.retain(|m| find_best_match(train, query, m.train_idx) == Some(m.query_idx));
        }

        good.truncate(self.max_matches);
        Matches::with_matches(query_image, train_image, good)
    }
}

/// For each query descriptor, its `k` nearest train descriptors by ascending distance.
pub fn knn_match(query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<FeatureMatch>> {
    query
        .descriptors
        .par_iter()
        .enumerate()
        .map(|(query_idx, q_desc)| {
            let mut distances: Vec<(usize, f32)> = train
                .iter()
                .enumerate()
                .map(|(idx, t_desc)| (idx, q_desc.l2_distance(t_desc)))
                .collect();

            distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

            distances
                .into_iter()
                .take(k)
                .map(|(train_idx, distance)| FeatureMatch::new(query_idx, train_idx, distance))
                .collect()
        })
        .collect()
}

/// Keeps the nearest neighbour of every k-NN list whose best distance is below
/// `ratio` times the second best. Lists without a second neighbour are rejected.
pub fn filter_matches_by_ratio_test(
    matches: &[Vec<FeatureMatch>],
    ratio: f32,
) -> Vec<FeatureMatch> {
    let mut good_matches = Vec::new();

    for knn in matches {
        if knn.len() >= 2 {
            let best = &knn[0];
            let second = &knn[1];

            if best.distance < ratio * second.distance {
                good_matches.push(*best);
            }
        }
    }

    good_matches
}

fn find_best_match(query: &Descriptors, train: &Descriptors, query_idx: usize) -> Option<usize> {
    let q_desc = query.get(query_idx)?;
    train
        .iter()
        .enumerate()
        .map(|(idx, t_desc)| (idx, q_desc.l2_distance(t_desc)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::{Descriptor, KeyPoint};

    fn descriptors(rows: &[[f32; 4]]) -> Descriptors {
        let mut ds = Descriptors::new();
        for (i, r) in rows.iter().enumerate() {
            ds.push(Descriptor::new(r.to_vec(), KeyPoint::new(i as f64, i as f64)));
        }
        ds
    }

    #[test]
    fn test_knn_match_sorted_by_distance() {
        let query = descriptors(&[[0.0, 0.0, 0.0, 0.0]]);
        let train = descriptors(&[[3.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0]]);
        let knn = knn_match(&query, &train, 2);
        assert_eq!(knn.len(), 1);
        assert_eq!(knn[0].len(), 2);
        assert_eq!(knn[0][0].train_idx, 1);
        assert_eq!(knn[0][1].train_idx, 2);
        assert!((knn[0][0].distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() {
        let knn = vec![
            vec![FeatureMatch::new(0, 0, 1.0), FeatureMatch::new(0, 1, 10.0)],
            vec![FeatureMatch::new(1, 2, 9.0), FeatureMatch::new(1, 3, 10.0)],
        ];
        let good = filter_matches_by_ratio_test(&knn, 0.75);
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].query_idx, 0);
    }

    #[test]
    fn test_ratio_test_is_strict() {
        let knn = vec![vec![FeatureMatch::new(0, 0, 3.0), FeatureMatch::new(0, 1, 4.0)]];
        assert!(filter_matches_by_ratio_test(&knn, 0.75).is_empty());
        assert_eq!(filter_matches_by_ratio_test(&knn, 0.76).len(), 1);
    }

    #[test]
    fn test_single_neighbour_is_rejected() {
        let query = descriptors(&[[0.0, 0.0, 0.0, 0.0]]);
        let train = descriptors(&[[0.0, 0.0, 0.0, 0.0]]);
        let m = Matcher::new().match_pair(0, &query, 1, &train);
        assert!(m.is_empty());
    }

    #[test]
    fn test_ratio_threshold_is_monotonic() {
        let knn: Vec<Vec<FeatureMatch>> = (0..50)
            .map(|i| {
                let best = (i % 10) as f32 + 1.0;
                let second = ((i * 7) % 13) as f32 + 2.0;
                vec![FeatureMatch::new(i, 0, best), FeatureMatch::new(i, 1, second)]
            })
            .collect();

        let mut previous: Vec<usize> = Vec::new();
        for step in 1..=20 {
            let ratio = step as f32 * 0.05;
            let accepted: Vec<usize> = filter_matches_by_ratio_test(&knn, ratio)
                .iter()
                .map(|m| m.query_idx)
                .collect();
            assert!(previous.iter().all(|q| accepted.contains(q)));
            previous = accepted;
        }
    }

    #[test]
    fn test_match_pair_caps_in_query_order() {
        let mut query = Descriptors::new();
        let mut train = Descriptors::new();
        for i in 0..20 {
            let v = i as f32 * 10.0;
            query.push(Descriptor::new(vec![v, 0.0], KeyPoint::new(0.0, 0.0)));
            train.push(Descriptor::new(vec![v + 0.1, 0.0], KeyPoint::new(0.0, 0.0)));
        }
        let m = Matcher::new().with_max_matches(5).match_pair(2, &query, 3, &train);
        assert_eq!(m.query_image, 2);
        assert_eq!(m.train_image, 3);
        assert_eq!(m.len(), 5);
        let idx: Vec<usize> = m.iter().map(|fm| fm.query_idx).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
        assert!(m.iter().all(|fm| fm.train_idx == fm.query_idx));
    }

    #[test]
    fn test_cross_check_keeps_mutual_matches() {
        let query = descriptors(&[[0.0, 0.0, 0.0, 0.0], [0.25, 0.0, 0.0, 0.0]]);
        let train = descriptors(&[[0.1, 0.0, 0.0, 0.0], [50.0, 0.0, 0.0, 0.0]]);
        let plain = Matcher::new().match_pair(0, &query, 1, &train);
        let checked = Matcher::new().with_cross_check().match_pair(0, &query, 1, &train);
        assert_eq!(plain.len(), 2);
        assert_eq!(checked.len(), 1);
        assert_eq!(checked.matches[0].query_idx, 0);
    }

    #[test]
    fn test_empty_train_yields_no_matches() {
        let query = descriptors(&[[0.0, 0.0, 0.0, 0.0]]);
        let m = Matcher::new().match_pair(0, &query, 1, &Descriptors::new());
        assert!(m.is_empty());
    }
}
