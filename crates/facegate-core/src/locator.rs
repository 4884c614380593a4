//! Face location backends.
//!
//! The production backend wraps the SeetaFace frontal cascade from `rustface`,
//! a sliding-window classifier over an image pyramid. Any
//! `Fn(&GrayImage) -> Vec<FaceBox>` closure is also a locator.

use crate::types::FaceBox;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

const DEFAULT_MIN_FACE_SIZE: u32 = 30;
/// Pyramid step of ~1.1 between scales.
const DEFAULT_PYRAMID_SCALE_FACTOR: f32 = 1.0 / 1.1;
const DEFAULT_SCORE_THRESH: f64 = 2.0;
const DEFAULT_WINDOW_STEP: u32 = 4;
/// rustface refuses windows below 20px.
const RUSTFACE_MIN_WINDOW: u32 = 20;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("face model not found: {0}; place seeta_fd_frontal_v1.0.bin in the model directory")]
    ModelNotFound(String),
    #[error("failed to read face model: {0}")]
    Io(#[from] std::io::Error),
}

/// Pluggable face locator.
///
/// Returns candidate boxes in backend order. An empty result is not an error.
pub trait FaceLocator: Send {
    fn locate(&self, gray: &GrayImage) -> Vec<FaceBox>;
}

impl<F> FaceLocator for F
where
    F: Fn(&GrayImage) -> Vec<FaceBox> + Send,
{
    fn locate(&self, gray: &GrayImage) -> Vec<FaceBox> {
        self(gray)
    }
}

/// Tuning for the cascade search.
#[derive(Debug, Clone)]
pub struct LocatorSettings {
    /// Boxes smaller than this on either side are discarded.
    pub min_face_size: u32,
    pub pyramid_scale_factor: f32,
    pub score_thresh: f64,
    pub window_step: u32,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            pyramid_scale_factor: DEFAULT_PYRAMID_SCALE_FACTOR,
            score_thresh: DEFAULT_SCORE_THRESH,
            window_step: DEFAULT_WINDOW_STEP,
        }
    }
}

/// Face locator backed by the `rustface` SeetaFace engine.
pub struct RustfaceLocator {
    model: rustface::Model,
    settings: LocatorSettings,
}

impl RustfaceLocator {
    /// Load the SeetaFace model from disk.
    pub fn load(model_path: &Path, settings: LocatorSettings) -> Result<Self, LocatorError> {
        if !model_path.exists() {
            return Err(LocatorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let file = std::fs::File::open(model_path)?;
        let model = rustface::read_model(std::io::BufReader::new(file))?;

        tracing::info!(
            path = %model_path.display(),
            min_face_size = settings.min_face_size,
            score_thresh = settings.score_thresh,
            "loaded SeetaFace model"
        );

        Ok(Self { model, settings })
    }
}

impl FaceLocator for RustfaceLocator {
    fn locate(&self, gray: &GrayImage) -> Vec<FaceBox> {
        let (width, height) = gray.dimensions();

        // Detector state is per-search; the model is shared.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.settings.min_face_size.max(RUSTFACE_MIN_WINDOW));
        detector.set_score_thresh(self.settings.score_thresh);
        detector.set_pyramid_scale_factor(self.settings.pyramid_scale_factor);
        detector.set_slide_window_step(self.settings.window_step, self.settings.window_step);

        let mut image = rustface::ImageData::new(gray.as_raw(), width, height);
        let faces = detector.detect(&mut image);

        let candidates = faces.iter().map(|face| {
            let bbox = face.bbox();
            (
                bbox.x() as i64,
                bbox.y() as i64,
                bbox.width() as i64,
                bbox.height() as i64,
                face.score(),
            )
        });

        let boxes = clamp_boxes(candidates, width, height, self.settings.min_face_size);
        tracing::debug!(width, height, faces = boxes.len(), "located faces");
        boxes
    }
}

/// Clip raw `(x, y, w, h, score)` candidates to the image and drop any that end
/// up smaller than `min_size` on either side. Input order is preserved.
fn clamp_boxes(
    candidates: impl IntoIterator<Item = (i64, i64, i64, i64, f64)>,
    width: u32,
    height: u32,
    min_size: u32,
) -> Vec<FaceBox> {
    let (width, height) = (width as i64, height as i64);

    candidates
        .into_iter()
        .filter_map(|(x, y, w, h, score)| {
            let x0 = x.clamp(0, width);
            let y0 = y.clamp(0, height);
            let x1 = (x + w).clamp(0, width);
            let y1 = (y + h).clamp(0, height);

            let (cw, ch) = (x1 - x0, y1 - y0);
            if cw < min_size as i64 || ch < min_size as i64 {
                return None;
            }

            Some(FaceBox {
                x: x0 as u32,
                y: y0 as u32,
                width: cw as u32,
                height: ch as u32,
                confidence: score,
            })
        })
        .collect()
}
