use crate::KeyPoint;

/// Fixed-length float descriptor attached to the keypoint it describes.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub data: Vec<f32>,
    pub keypoint: KeyPoint,
}

impl Descriptor {
    pub fn new(data: Vec<f32>, keypoint: KeyPoint) -> Self {
        Self { data, keypoint }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn squared_distance(&self, other: &Descriptor) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum()
    }

    pub fn l2_distance(&self, other: &Descriptor) -> f32 {
        self.squared_distance(other).sqrt()
    }
}

/// Ordered feature set of one image: `descriptors[i].keypoint` is keypoint `i`.
#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub descriptors: Vec<Descriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: Descriptor) {
        self.descriptors.push(desc);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Descriptor> {
        self.descriptors.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn keypoint(&self, idx: usize) -> Option<&KeyPoint> {
        self.descriptors.get(idx).map(|d| &d.keypoint)
    }
}
