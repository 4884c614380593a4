//! Enrollment, retraining and identification over the sample store.
//!
//! A `Gallery` owns the store, the face locator and the trained classifier.
//! The classifier is `None` until the first successful training and is
//! replaced wholesale afterwards; it never goes back to untrained.

use crate::ingest::DecodeError;
use crate::locator::FaceLocator;
use crate::normalize::normalize_face;
use crate::recognizer::{LbphRecognizer, RecognizerError};
use crate::store::{SampleStore, StoreError};
use crate::types::{FaceBox, FaceSample, SampleSummary};
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name reported for faces that do not match any sample.
pub const UNKNOWN_NAME: &str = "Unknown";

const DEFAULT_PATCH_SIZE: u32 = 100;
const DEFAULT_MATCH_THRESHOLD: f64 = 100.0;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("no face found in the image")]
    NoFaceFound,
    #[error("image contains {0} faces; enrollment needs exactly one")]
    MultipleFaces(usize),
    #[error("could not normalize face: {0}")]
    Normalize(#[source] RecognizerError),
    #[error("training failed: {0}")]
    Training(#[source] RecognizerError),
    #[error("sample store: {0}")]
    Store(#[from] StoreError),
}

/// What to do when an enrollment image contains more than one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrollPolicy {
    /// Enroll the first face in locator order.
    #[default]
    First,
    /// Refuse the enrollment.
    RejectMultiple,
}

impl FromStr for EnrollPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "reject-multiple" | "reject_multiple" => Ok(Self::RejectMultiple),
            other => Err(format!("unknown enroll policy: {other}")),
        }
    }
}

impl fmt::Display for EnrollPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::RejectMultiple => f.write_str("reject-multiple"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GallerySettings {
    /// Side length of stored and probe patches.
    pub patch_size: u32,
    /// A prediction matches when its distance is strictly below this.
    pub match_threshold: f64,
    pub enroll_policy: EnrollPolicy,
}

impl Default for GallerySettings {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            enroll_policy: EnrollPolicy::default(),
        }
    }
}

/// Outcome for one located face.
#[derive(Debug, Clone)]
pub struct Identification {
    pub face: FaceBox,
    /// Matched sample name, or [`UNKNOWN_NAME`].
    pub name: String,
    pub sample_id: Option<i64>,
    /// Nearest distance, if the classifier was queried successfully.
    pub distance: Option<f64>,
}

impl Identification {
    fn unknown(face: FaceBox, distance: Option<f64>) -> Self {
        Self {
            face,
            name: UNKNOWN_NAME.to_string(),
            sample_id: None,
            distance,
        }
    }

    pub fn is_known(&self) -> bool {
        self.sample_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryStatus {
    pub samples: usize,
    pub trained: bool,
    pub trained_samples: usize,
}

pub struct Gallery {
    store: SampleStore,
    locator: Box<dyn FaceLocator>,
    classifier: Option<LbphRecognizer>,
    settings: GallerySettings,
}

impl Gallery {
    /// Create an untrained gallery. Call [`Gallery::retrain`] to load
    /// already-persisted samples into the classifier.
    pub fn new(
        store: SampleStore,
        locator: Box<dyn FaceLocator>,
        settings: GallerySettings,
    ) -> Self {
        Self {
            store,
            locator,
            classifier: None,
            settings,
        }
    }

    pub fn settings(&self) -> &GallerySettings {
        &self.settings
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_some()
    }

    /// Locate faces without identifying them.
    pub fn detect(&self, image: &DynamicImage) -> Vec<FaceBox> {
        self.locator.locate(&image.to_luma8())
    }

    /// Enroll the face in `image` under `name` and retrain.
    ///
    /// The new row and the retrain are one unit: if training fails the row is
    /// rolled back and the previous classifier stays in place. Nothing is
    /// written when no face is found.
    pub fn enroll(&mut self, name: &str, image: &DynamicImage) -> Result<FaceSample, GalleryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GalleryError::Validation("name must not be empty".into()));
        }

        let gray = image.to_luma8();
        let faces = self.locator.locate(&gray);
        let face = match (faces.as_slice(), self.settings.enroll_policy) {
            ([], _) => return Err(GalleryError::NoFaceFound),
            ([only], _) => only,
            ([first, ..], EnrollPolicy::First) => {
                tracing::warn!(
                    faces = faces.len(),
                    name,
                    "multiple faces in enrollment image; using the first"
                );
                first
            }
            (many, EnrollPolicy::RejectMultiple) => {
                return Err(GalleryError::MultipleFaces(many.len()));
            }
        };

        let patch = normalize_face(&gray, face, self.settings.patch_size)
            .map_err(GalleryError::Normalize)?;

        let (sample, classifier) = self.store.insert_with(name, &patch, |sample, all| {
            let classifier = LbphRecognizer::train(all).map_err(GalleryError::Training)?;
            Ok::<_, GalleryError>((sample.clone(), classifier))
        })?;

        tracing::info!(
            sample_id = sample.id,
            name = %sample.name,
            trained_samples = classifier.len(),
            "enrolled face"
        );
        self.classifier = Some(classifier);

        Ok(sample)
    }

    /// Rebuild the classifier from every stored sample.
    ///
    /// An empty gallery leaves the classifier untouched. On failure the
    /// previous classifier is kept.
    pub fn retrain(&mut self) -> Result<(), GalleryError> {
        let samples = self.store.list_all()?;
        if samples.is_empty() {
            tracing::warn!("no samples stored; skipping training");
            return Ok(());
        }

        let classifier = LbphRecognizer::train(&samples).map_err(GalleryError::Training)?;
        tracing::info!(trained_samples = classifier.len(), "classifier retrained");
        self.classifier = Some(classifier);
        Ok(())
    }

    /// Locate and identify every face in `image`.
    ///
    /// Failures are isolated per face: a face that cannot be normalized or
    /// queried is reported as unknown and the rest are still identified.
    pub fn recognize(&self, image: &DynamicImage) -> Vec<Identification> {
        let gray = image.to_luma8();
        self.locator
            .locate(&gray)
            .into_iter()
            .map(|face| self.identify(&gray, face))
            .collect()
    }

    fn identify(&self, gray: &GrayImage, face: FaceBox) -> Identification {
        let Some(classifier) = &self.classifier else {
            return Identification::unknown(face, None);
        };

        let prediction = normalize_face(gray, &face, self.settings.patch_size)
            .and_then(|patch| classifier.predict(&patch));

        match prediction {
            Ok(p) if p.distance < self.settings.match_threshold => {
                tracing::debug!(sample_id = p.sample_id, distance = p.distance, "face matched");
                Identification {
                    face,
                    name: p.name,
                    sample_id: Some(p.sample_id),
                    distance: Some(p.distance),
                }
            }
            Ok(p) => {
                tracing::debug!(distance = p.distance, "face above match threshold");
                Identification::unknown(face, Some(p.distance))
            }
            Err(e) => {
                tracing::warn!(error = %e, face = ?face.to_xywh(), "recognition failed for face");
                Identification::unknown(face, None)
            }
        }
    }

    /// All stored samples, oldest first.
    pub fn samples(&self) -> Result<Vec<SampleSummary>, GalleryError> {
        Ok(self
            .store
            .list_all()?
            .iter()
            .map(FaceSample::summary)
            .collect())
    }

    pub fn status(&self) -> Result<GalleryStatus, GalleryError> {
        Ok(GalleryStatus {
            samples: self.store.count()?,
            trained: self.classifier.is_some(),
            trained_samples: self.classifier.as_ref().map_or(0, LbphRecognizer::len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Patch;
    use image::Luma;

    const FRAME: u32 = 200;

    fn frame(f: impl Fn(u32, u32) -> u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(FRAME, FRAME, |x, y| Luma([f(x, y)])))
    }

    fn alice() -> DynamicImage {
        frame(|x, _| (x * 255 / (FRAME - 1)) as u8)
    }

    fn bob() -> DynamicImage {
        frame(|x, y| if (x / 10 + y / 10) % 2 == 0 { 30 } else { 220 })
    }

    fn stranger() -> DynamicImage {
        frame(|_, y| (y * 255 / (FRAME - 1)) as u8)
    }

    fn empty_scene() -> DynamicImage {
        frame(|_, _| 0)
    }

    /// One centred face whenever the frame is not completely black.
    fn centred_locator() -> Box<dyn FaceLocator> {
        Box::new(|gray: &GrayImage| {
            if gray.pixels().all(|p| p.0[0] == 0) {
                Vec::new()
            } else {
                vec![FaceBox::new(50, 50, 100, 100)]
            }
        })
    }

    fn two_face_locator() -> Box<dyn FaceLocator> {
        Box::new(|_: &GrayImage| {
            vec![FaceBox::new(0, 0, 100, 100), FaceBox::new(100, 100, 100, 100)]
        })
    }

    fn gallery() -> Gallery {
        Gallery::new(
            SampleStore::open_in_memory().unwrap(),
            centred_locator(),
            GallerySettings::default(),
        )
    }

    #[test]
    fn test_recognize_enrolled_faces() {
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();
        g.enroll("Bob", &bob()).unwrap();

        let results = g.recognize(&alice());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Alice");
        assert!(results[0].distance.unwrap() < 100.0);

        assert_eq!(g.recognize(&bob())[0].name, "Bob");
    }

    #[test]
    fn test_unenrolled_face_is_unknown() {
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();
        g.enroll("Bob", &bob()).unwrap();

        let results = g.recognize(&stranger());
        assert_eq!(results[0].name, UNKNOWN_NAME);
        assert!(!results[0].is_known());
        assert!(results[0].distance.unwrap() >= 100.0);
    }

    #[test]
    fn test_recognize_untrained_skips_classifier() {
        let g = gallery();
        let results = g.recognize(&alice());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, UNKNOWN_NAME);
        assert!(results[0].distance.is_none());
        assert!(!g.is_trained());
    }

    #[test]
    fn test_location_order() {
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();
        for id in g.recognize(&alice()) {
            let [top, right, bottom, left] = id.face.to_trbl();
            assert!(right > left);
            assert!(bottom > top);
            assert_eq!([top, right, bottom, left], [50, 150, 150, 50]);
        }
    }

    #[test]
    fn test_enroll_without_face_leaves_store_untouched() {
        let mut g = gallery();
        let err = g.enroll("Alice", &empty_scene()).unwrap_err();
        assert!(matches!(err, GalleryError::NoFaceFound));
        assert_eq!(g.status().unwrap().samples, 0);
        assert!(!g.is_trained());
    }

    #[test]
    fn test_enroll_rejects_blank_name() {
        let mut g = gallery();
        let err = g.enroll("   ", &alice()).unwrap_err();
        assert!(matches!(err, GalleryError::Validation(_)));
        assert_eq!(g.status().unwrap().samples, 0);
    }

    #[test]
    fn test_enroll_trims_name() {
        let mut g = gallery();
        let sample = g.enroll("  Alice \n", &alice()).unwrap();
        assert_eq!(sample.name, "Alice");
    }

    #[test]
    fn test_enroll_same_name_twice() {
        let mut g = gallery();
        let first = g.enroll("Alice", &alice()).unwrap();
        let second = g.enroll("Alice", &alice()).unwrap();
        assert_ne!(first.id, second.id);

        let status = g.status().unwrap();
        assert_eq!(status.samples, 2);
        assert_eq!(status.trained_samples, 2);

        let results = g.recognize(&alice());
        assert_eq!(results[0].name, "Alice");
        assert_eq!(results[0].sample_id, Some(first.id));
    }

    #[test]
    fn test_first_policy_uses_first_face() {
        let mut g = Gallery::new(
            SampleStore::open_in_memory().unwrap(),
            two_face_locator(),
            GallerySettings::default(),
        );
        let sample = g.enroll("Alice", &bob()).unwrap();

        let gray = bob().to_luma8();
        let expected = normalize_face(&gray, &FaceBox::new(0, 0, 100, 100), 100).unwrap();
        assert_eq!(sample.patch, expected);
    }

    #[test]
    fn test_reject_multiple_policy() {
        let settings = GallerySettings {
            enroll_policy: EnrollPolicy::RejectMultiple,
            ..GallerySettings::default()
        };
        let mut g = Gallery::new(
            SampleStore::open_in_memory().unwrap(),
            two_face_locator(),
            settings,
        );

        let err = g.enroll("Alice", &alice()).unwrap_err();
        assert!(matches!(err, GalleryError::MultipleFaces(2)));
        assert_eq!(g.status().unwrap().samples, 0);
    }

    #[test]
    fn test_training_failure_rolls_back() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store
            .insert("legacy", &Patch::new(50, vec![7; 50 * 50]).unwrap())
            .unwrap();
        let mut g = Gallery::new(store, centred_locator(), GallerySettings::default());

        let err = g.enroll("Alice", &alice()).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::Training(RecognizerError::InconsistentPatch { .. })
        ));
        assert_eq!(g.status().unwrap().samples, 1);
        assert!(!g.is_trained());
    }

    #[test]
    fn test_per_face_failure_is_isolated() {
        // Trained on 100px patches, then probed at a different size.
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();
        g.settings.patch_size = 64;

        let results = g.recognize(&alice());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, UNKNOWN_NAME);
        assert!(results[0].distance.is_none());
    }

    #[test]
    fn test_failed_face_does_not_affect_others() {
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();

        // First box lies entirely outside the 200x200 frame.
        g.locator = Box::new(|_: &GrayImage| {
            vec![FaceBox::new(500, 500, 40, 40), FaceBox::new(50, 50, 100, 100)]
        });

        let results = g.recognize(&alice());
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, [UNKNOWN_NAME, "Alice"]);
        assert!(results[0].distance.is_none());
        assert!(results[1].is_known());
    }

    #[test]
    fn test_retrain_loads_persisted_samples() {
        let mut first = gallery();
        first.enroll("Alice", &alice()).unwrap();
        first.enroll("Bob", &bob()).unwrap();

        // Simulate a restart over the same store.
        let Gallery { store, .. } = first;
        let mut restarted = Gallery::new(store, centred_locator(), GallerySettings::default());
        assert_eq!(restarted.recognize(&bob())[0].name, UNKNOWN_NAME);

        restarted.retrain().unwrap();
        assert!(restarted.is_trained());
        assert_eq!(restarted.recognize(&bob())[0].name, "Bob");
    }

    #[test]
    fn test_retrain_empty_is_noop() {
        let mut g = gallery();
        g.retrain().unwrap();
        assert!(!g.is_trained());
    }

    #[test]
    fn test_detect_empty_scene() {
        let g = gallery();
        assert!(g.detect(&empty_scene()).is_empty());
        assert_eq!(g.detect(&alice())[0].to_xywh(), [50, 50, 100, 100]);
    }

    #[test]
    fn test_samples_listing() {
        let mut g = gallery();
        g.enroll("Alice", &alice()).unwrap();
        g.enroll("Bob", &bob()).unwrap();
        let names: Vec<_> = g.samples().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn test_enroll_policy_parse() {
        assert_eq!("first".parse::<EnrollPolicy>().unwrap(), EnrollPolicy::First);
        assert_eq!(
            "Reject-Multiple".parse::<EnrollPolicy>().unwrap(),
            EnrollPolicy::RejectMultiple
        );
        assert!("largest".parse::<EnrollPolicy>().is_err());
        assert_eq!(EnrollPolicy::RejectMultiple.to_string(), "reject-multiple");
    }
}
