#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub angle: f64,
    pub response: f64,
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response;
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.octave = octave;
        self
    }

    /// Integer pixel containing the keypoint, clamped to a `width` x `height` image.
    pub fn pixel(&self, width: u32, height: u32) -> (u32, u32) {
        let px = (self.x.max(0.0) as u32).min(width.saturating_sub(1));
        let py = (self.y.max(0.0) as u32).min(height.saturating_sub(1));
        (px, py)
    }
}

impl Default for KeyPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// One correspondence between a query feature and a train feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl FeatureMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

/// Accepted correspondences between two images of an ordered set.
#[derive(Debug, Clone, Default)]
pub struct Matches {
    pub query_image: usize,
    pub train_image: usize,
    pub matches: Vec<FeatureMatch>,
}

impl Matches {
    pub fn new(query_image: usize, train_image: usize) -> Self {
        Self {
            query_image,
            train_image,
            matches: Vec::new(),
        }
    }

    pub fn with_matches(query_image: usize, train_image: usize, matches: Vec<FeatureMatch>) -> Self {
        Self {
            query_image,
            train_image,
            matches,
        }
    }

    pub fn push(&mut self, m: FeatureMatch) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter()
    }

    /// Keep only the first `max` correspondences.
    pub fn truncate(&mut self, max: usize) {
        self.matches.truncate(max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypoint_pixel_is_clamped() {
        let kp = KeyPoint::new(120.7, -3.0);
        assert_eq!(kp.pixel(100, 50), (99, 0));
        let kp = KeyPoint::new(10.9, 20.2);
        assert_eq!(kp.pixel(100, 50), (10, 20));
    }

    #[test]
    fn matches_truncate_keeps_prefix() {
        let mut m = Matches::new(0, 1);
        for i in 0..10 {
            m.push(FeatureMatch::new(i, i, i as f32));
        }
        m.truncate(3);
        assert_eq!(m.len(), 3);
        assert_eq!(m.matches[2].query_idx, 2);
    }
}
