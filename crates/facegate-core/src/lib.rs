//! facegate-core: face location, LBPH recognition and the enrollment gallery.
//!
//! Faces are located with the SeetaFace cascade (via `rustface`), normalized
//! to fixed-size grayscale patches, persisted in SQLite and identified with a
//! local binary pattern histogram classifier.

pub mod gallery;
pub mod ingest;
pub mod locator;
pub mod normalize;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use gallery::{
    EnrollPolicy, Gallery, GalleryError, GallerySettings, GalleryStatus, Identification,
    UNKNOWN_NAME,
};
pub use ingest::{decode_data_url, decode_image, DecodeError};
pub use locator::{FaceLocator, LocatorError, LocatorSettings, RustfaceLocator};
pub use recognizer::{LbphRecognizer, RecognizerError, MIN_PATCH_SIZE};
pub use store::{SampleStore, StoreError};
pub use types::{FaceBox, FaceSample, Patch, SampleSummary};

/// File name of the SeetaFace frontal detection model.
pub const DEFAULT_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

/// System-wide model directory.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}

/// Per-user data directory: `$XDG_DATA_HOME/facegate`, falling back to
/// `~/.local/share/facegate`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

/// Default gallery database path.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("faces.db")
}
