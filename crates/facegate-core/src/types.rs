use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for a located face, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score. Backends without a score report 0.0.
    pub confidence: f64,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 0.0,
        }
    }

    /// `[x, y, width, height]`, the shape reported by detection.
    pub fn to_xywh(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// `[top, right, bottom, left]`, i.e. `[y, x + w, y + h, x]`.
    ///
    /// Recognition clients depend on this axis order.
    pub fn to_trbl(&self) -> [u32; 4] {
        [
            self.y,
            self.x + self.width,
            self.y + self.height,
            self.x,
        ]
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Square grayscale face patch, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    size: u32,
    pixels: Vec<u8>,
}

impl Patch {
    /// Wrap `size * size` row-major pixels. Returns `None` on a length mismatch.
    pub fn new(size: u32, pixels: Vec<u8>) -> Option<Self> {
        if size == 0 || pixels.len() != (size as usize) * (size as usize) {
            return None;
        }
        Some(Self { size, pixels })
    }

    /// Wrap a flat pixel sequence whose length is a perfect square.
    pub fn from_flat(pixels: Vec<u8>) -> Option<Self> {
        let side = (pixels.len() as f64).sqrt().round() as u32;
        Self::new(side, pixels)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.size + x) as usize]
    }
}

/// A persisted enrollment record.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub id: i64,
    pub name: String,
    pub patch: Patch,
    pub created_at: String,
}

impl FaceSample {
    pub fn summary(&self) -> SampleSummary {
        SampleSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Listing view of a sample, without its pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// Concatenated per-cell LBP histograms for one patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bins: Vec<f32>,
}

impl Histogram {
    /// Alternative chi-square distance: `Σ 2(a−b)² / (a+b)`.
    ///
    /// Bins empty in both histograms contribute nothing. 0.0 means identical;
    /// larger is less similar.
    pub fn chi_square_distance(&self, other: &Histogram) -> f64 {
        self.bins
            .iter()
            .zip(other.bins.iter())
            .map(|(&a, &b)| {
                let (a, b) = (a as f64, b as f64);
                let sum = a + b;
                if sum > 0.0 {
                    2.0 * (a - b) * (a - b) / sum
                } else {
                    0.0
                }
            })
            .sum()
    }
}

/// One gallery entry inside a trained classifier.
#[derive(Debug, Clone)]
pub struct TrainedFace {
    pub sample_id: i64,
    pub name: String,
    pub histogram: Histogram,
}

/// Nearest gallery entry for a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub sample_id: i64,
    pub name: String,
    /// Distance to the nearest entry; smaller is a closer match.
    pub distance: f64,
}

/// Strategy for finding the closest gallery entry to a probe histogram.
pub trait Matcher {
    fn nearest(&self, probe: &Histogram, gallery: &[TrainedFace]) -> Option<Prediction>;
}

/// Nearest-neighbour matcher over chi-square distance.
///
/// Ties keep the earliest entry, so older samples win over later duplicates.
pub struct ChiSquareMatcher;

impl Matcher for ChiSquareMatcher {
    fn nearest(&self, probe: &Histogram, gallery: &[TrainedFace]) -> Option<Prediction> {
        let mut best: Option<(usize, f64)> = None;

        for (i, face) in gallery.iter().enumerate() {
            let distance = probe.chi_square_distance(&face.histogram);
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((i, distance)),
            }
        }

        best.map(|(idx, distance)| Prediction {
            sample_id: gallery[idx].sample_id,
            name: gallery[idx].name.clone(),
            distance,
        })
    }
}
