//! Local Binary Pattern Histogram (LBPH) face recognizer.
//!
//! Each patch is encoded with circular LBP (radius 1, 8 bilinear-sampled
//! neighbours), split into an 8×8 grid of cells, and summarised as one
//! normalized 256-bin histogram per cell. Prediction is nearest neighbour
//! under chi-square distance.

use crate::types::{
    ChiSquareMatcher, FaceSample, Histogram, Matcher, Patch, Prediction, TrainedFace,
};
use std::f64::consts::PI;
use thiserror::Error;

// --- Named constants ---
const LBP_RADIUS: usize = 1;
const LBP_NEIGHBORS: usize = 8;
const LBP_BINS: usize = 1 << LBP_NEIGHBORS;
const GRID_X: usize = 8;
const GRID_Y: usize = 8;
/// Interpolated neighbours this close to the centre count as equal (bit set).
const LBP_EQUALITY_EPSILON: f64 = 1e-9;
/// Smallest side that leaves at least one LBP pixel per grid cell (grid is square).
pub const MIN_PATCH_SIZE: u32 = (2 * LBP_RADIUS + GRID_X) as u32;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("no samples to train on")]
    EmptyTrainingSet,
    #[error("sample {sample_id} has a {found}x{found} patch, expected {expected}x{expected}")]
    InconsistentPatch {
        sample_id: i64,
        expected: u32,
        found: u32,
    },
    #[error("{size}x{size} patch is too small for an 8x8 LBP grid")]
    PatchTooSmall { size: u32 },
    #[error("probe patch is {found}x{found}, classifier was trained on {expected}x{expected}")]
    DimensionMismatch { expected: u32, found: u32 },
    #[error("face region ({x}, {y}, {width}x{height}) lies outside the image")]
    EmptyRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Trained LBPH classifier.
///
/// Every entry carries the id and name of the sample it was built from, so
/// predictions never depend on the order of a later gallery listing.
#[derive(Debug, Clone)]
pub struct LbphRecognizer {
    patch_size: u32,
    faces: Vec<TrainedFace>,
}

impl LbphRecognizer {
    /// Build a classifier from scratch over `samples`.
    ///
    /// All patches must share the first sample's size.
    pub fn train(samples: &[FaceSample]) -> Result<Self, RecognizerError> {
        let first = samples.first().ok_or(RecognizerError::EmptyTrainingSet)?;
        let patch_size = first.patch.size();
        if patch_size < MIN_PATCH_SIZE {
            return Err(RecognizerError::PatchTooSmall { size: patch_size });
        }

        let mut faces = Vec::with_capacity(samples.len());
        for sample in samples {
            let found = sample.patch.size();
            if found != patch_size {
                return Err(RecognizerError::InconsistentPatch {
                    sample_id: sample.id,
                    expected: patch_size,
                    found,
                });
            }
            faces.push(TrainedFace {
                sample_id: sample.id,
                name: sample.name.clone(),
                histogram: spatial_histogram(&sample.patch),
            });
        }

        tracing::debug!(samples = faces.len(), patch_size, "trained LBPH classifier");

        Ok(Self { patch_size, faces })
    }

    /// Find the nearest trained sample to `patch`.
    pub fn predict(&self, patch: &Patch) -> Result<Prediction, RecognizerError> {
        if patch.size() != self.patch_size {
            return Err(RecognizerError::DimensionMismatch {
                expected: self.patch_size,
                found: patch.size(),
            });
        }

        let probe = spatial_histogram(patch);
        ChiSquareMatcher
            .nearest(&probe, &self.faces)
            .ok_or(RecognizerError::EmptyTrainingSet)
    }

    /// Number of samples in the classifier.
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }
}

/// Circular LBP codes for every interior pixel.
///
/// Output is `(size - 2r)²` codes, row-major. Bit `n` is set when the
/// interpolated neighbour at angle `2πn/8` is greater than or equal to the centre.
fn lbp_codes(patch: &Patch) -> Vec<u8> {
    let size = patch.size() as usize;
    let out = size - 2 * LBP_RADIUS;
    let mut codes = vec![0u8; out * out];
    let pixel = |x: isize, y: isize| patch.get(x as u32, y as u32) as f64;

    for n in 0..LBP_NEIGHBORS {
        let angle = 2.0 * PI * n as f64 / LBP_NEIGHBORS as f64;
        let sx = LBP_RADIUS as f64 * angle.cos();
        let sy = -(LBP_RADIUS as f64) * angle.sin();

        let (fx, fy) = (sx.floor(), sy.floor());
        let (cx, cy) = (sx.ceil() as isize, sy.ceil() as isize);
        let (tx, ty) = (sx - fx, sy - fy);
        let (fx, fy) = (fx as isize, fy as isize);

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in LBP_RADIUS..size - LBP_RADIUS {
            for j in LBP_RADIUS..size - LBP_RADIUS {
                let (row, col) = (i as isize, j as isize);
                let t = w1 * pixel(col + fx, row + fy)
                    + w2 * pixel(col + cx, row + fy)
                    + w3 * pixel(col + fx, row + cy)
                    + w4 * pixel(col + cx, row + cy);
                let center = pixel(col, row);

                if t > center || (t - center).abs() < LBP_EQUALITY_EPSILON {
                    codes[(i - LBP_RADIUS) * out + (j - LBP_RADIUS)] |= 1 << n;
                }
            }
        }
    }

    codes
}

/// Concatenated per-cell histograms over the LBP code image.
///
/// Cells are `⌊out/GRID⌋` wide; trailing rows/columns that do not fill a
/// cell are ignored. Each cell histogram sums to 1.
fn spatial_histogram(patch: &Patch) -> Histogram {
    let out = patch.size() as usize - 2 * LBP_RADIUS;
    let codes = lbp_codes(patch);
    let cell_w = out / GRID_X;
    let cell_h = out / GRID_Y;
    let cell_pixels = (cell_w * cell_h) as f32;

    let mut bins = vec![0.0f32; GRID_X * GRID_Y * LBP_BINS];

    for gy in 0..GRID_Y {
        for gx in 0..GRID_X {
            let cell = &mut bins[(gy * GRID_X + gx) * LBP_BINS..][..LBP_BINS];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    cell[codes[y * out + x] as usize] += 1.0;
                }
            }
            for bin in cell.iter_mut() {
                *bin /= cell_pixels;
            }
        }
    }

    Histogram { bins }
}
