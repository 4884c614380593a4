use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    decode_image, EnrollPolicy, Gallery, GallerySettings, LbphRecognizer, LocatorSettings,
    RustfaceLocator, SampleStore, MIN_PATCH_SIZE,
};
use image::DynamicImage;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate offline gallery tool")]
struct Cli {
    /// Sample database (defaults to the daemon's database)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// SeetaFace detection model
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Match distance threshold
    #[arg(long, global = true, default_value_t = 100.0, value_parser = parse_threshold)]
    threshold: f64,

    /// Normalized patch side length
    #[arg(
        long,
        global = true,
        default_value_t = 100,
        value_parser = clap::value_parser!(u32).range(MIN_PATCH_SIZE as i64..)
    )]
    patch_size: u32,

    /// Enrollment policy for images with several faces ("first", "reject-multiple")
    #[arg(long, global = true, default_value_t = EnrollPolicy::First)]
    policy: EnrollPolicy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate faces in an image file
    Detect {
        image: PathBuf,
    },
    /// Enroll the face in an image file
    Enroll {
        /// Display name for this sample
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// Identify faces in an image file against the gallery
    Recognize {
        image: PathBuf,
    },
    /// List enrolled samples
    List,
    /// Show gallery status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(facegate_core::default_db_path);

    match &cli.command {
        Commands::Detect { image } => {
            let gallery = open_gallery(&cli, &db_path)?;
            let faces = gallery.detect(&load_image(image)?);
            let boxes: Vec<_> = faces.iter().map(|f| f.to_xywh()).collect();
            println!("{}", json!({ "faces": boxes }));
        }
        Commands::Enroll { name, image } => {
            let mut gallery = open_gallery(&cli, &db_path)?;
            let sample = gallery.enroll(name, &load_image(image)?)?;
            tracing::info!(sample_id = sample.id, name = %sample.name, "enrolled");
            println!("{}", serde_json::to_string(&sample.summary())?);
        }
        Commands::Recognize { image } => {
            let mut gallery = open_gallery(&cli, &db_path)?;
            gallery.retrain()?;
            let results = gallery.recognize(&load_image(image)?);
            tracing::info!(
                faces = results.len(),
                known = results.iter().filter(|r| r.is_known()).count(),
                "recognized"
            );
            let faces: Vec<_> = results
                .into_iter()
                .map(|r| {
                    json!({
                        "location": r.face.to_trbl(),
                        "name": r.name,
                        "distance": r.distance,
                    })
                })
                .collect();
            println!("{}", json!({ "faces": faces }));
        }
        Commands::List => {
            let store = SampleStore::open(&db_path)?;
            let samples: Vec<_> = store.list_all()?.iter().map(|s| s.summary()).collect();
            println!("{}", serde_json::to_string_pretty(&samples)?);
        }
        Commands::Status => {
            let store = SampleStore::open(&db_path)?;
            let samples = store.list_all()?;
            let training = if samples.is_empty() {
                "empty".to_string()
            } else {
                match LbphRecognizer::train(&samples) {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.to_string(),
                }
            };
            println!(
                "{}",
                json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "db": db_path.display().to_string(),
                    "samples": samples.len(),
                    "training": training,
                })
            );
        }
    }

    Ok(())
}

fn open_gallery(cli: &Cli, db_path: &Path) -> Result<Gallery> {
    let model_path = cli.model.clone().unwrap_or_else(|| {
        facegate_core::default_model_dir().join(facegate_core::DEFAULT_MODEL_FILE)
    });
    let locator = RustfaceLocator::load(&model_path, LocatorSettings::default())?;
    let store = SampleStore::open(db_path)?;

    Ok(Gallery::new(
        store,
        Box::new(locator),
        GallerySettings {
            patch_size: cli.patch_size,
            match_threshold: cli.threshold,
            enroll_policy: cli.policy,
        },
    ))
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(t) if t.is_finite() && t > 0.0 => Ok(t),
        Ok(_) => Err("threshold must be a finite positive number".into()),
        Err(e) => Err(e.to_string()),
    }
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(decode_image(&bytes)?)
}
