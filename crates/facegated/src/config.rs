use facegate_core::{EnrollPolicy, GallerySettings, LocatorSettings, MIN_PATCH_SIZE};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP server listens on (default: 0.0.0.0:5000).
    pub bind: SocketAddr,
    /// Path to the SQLite sample database.
    pub db_path: PathBuf,
    /// Path to the SeetaFace detection model.
    pub model_path: PathBuf,
    /// Match distance threshold; smaller distances are closer matches.
    pub match_threshold: f64,
    /// Side length of normalized face patches.
    pub patch_size: u32,
    /// Smallest face side the locator reports.
    pub min_face_size: u32,
    /// Handling of enrollment images with several faces.
    pub enroll_policy: EnrollPolicy,
    /// Whether to rebuild the classifier from the stored gallery at startup.
    pub retrain_on_startup: bool,
    /// Directory of static files served for non-API paths, if present.
    pub static_dir: PathBuf,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `var`, which returns the value of a variable if set.
    ///
    /// Values that fail to parse or fall outside their valid range are replaced
    /// by the default with a warning.
    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facegate_core::default_model_dir);

        let model_path = var("FACEGATE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(facegate_core::DEFAULT_MODEL_FILE));

        let db_path = var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(facegate_core::default_db_path);

        let gallery_defaults = GallerySettings::default();
        let locator_defaults = LocatorSettings::default();

        Self {
            bind: parsed(&var, "FACEGATE_BIND", |_| true)
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))),
            db_path,
            model_path,
            match_threshold: parsed(&var, "FACEGATE_MATCH_THRESHOLD", |t: &f64| {
                t.is_finite() && *t > 0.0
            })
            .unwrap_or(gallery_defaults.match_threshold),
            patch_size: parsed(&var, "FACEGATE_PATCH_SIZE", |s: &u32| *s >= MIN_PATCH_SIZE)
                .unwrap_or(gallery_defaults.patch_size),
            min_face_size: parsed(&var, "FACEGATE_MIN_FACE_SIZE", |_| true)
                .unwrap_or(locator_defaults.min_face_size),
            enroll_policy: parsed(&var, "FACEGATE_ENROLL_POLICY", |_| true)
                .unwrap_or(gallery_defaults.enroll_policy),
            retrain_on_startup: var("FACEGATE_RETRAIN_ON_STARTUP")
                .map(|v| v != "0")
                .unwrap_or(true),
            static_dir: var("FACEGATE_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static")),
            max_body_bytes: parsed(&var, "FACEGATE_MAX_BODY_BYTES", |_| true)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
        }
    }

    pub fn gallery_settings(&self) -> GallerySettings {
        GallerySettings {
            patch_size: self.patch_size,
            match_threshold: self.match_threshold,
            enroll_policy: self.enroll_policy,
        }
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        LocatorSettings {
            min_face_size: self.min_face_size,
            ..LocatorSettings::default()
        }
    }
}

/// Parse `key` and check it with `valid`. `None` when unset, unparseable or invalid.
fn parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    valid: impl Fn(&T) -> bool,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid setting; using default");
            None
        }
    }
}
