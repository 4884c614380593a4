use facegate_core::{
    decode_data_url, FaceBox, Gallery, GalleryError, GalleryStatus, Identification, SampleSummary,
};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine did not reply")]
    ChannelClosed,
}

impl From<facegate_core::DecodeError> for EngineError {
    fn from(err: facegate_core::DecodeError) -> Self {
        Self::Gallery(GalleryError::Decode(err))
    }
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: String,
        reply: oneshot::Sender<Result<Vec<FaceBox>, EngineError>>,
    },
    Enroll {
        name: String,
        image: String,
        reply: oneshot::Sender<Result<SampleSummary, EngineError>>,
    },
    Recognize {
        image: String,
        reply: oneshot::Sender<Result<Vec<Identification>, EngineError>>,
    },
    ListSamples {
        reply: oneshot::Sender<Result<Vec<SampleSummary>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<GalleryStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Locate faces in a data-URL frame.
    pub async fn detect(&self, image: String) -> Result<Vec<FaceBox>, EngineError> {
        self.call(|reply| EngineRequest::Detect { image, reply }).await
    }

    /// Enroll the face in a data-URL frame under `name`, then retrain.
    pub async fn enroll(&self, name: String, image: String) -> Result<SampleSummary, EngineError> {
        self.call(|reply| EngineRequest::Enroll { name, image, reply }).await
    }

    /// Identify every face in a data-URL frame.
    pub async fn recognize(&self, image: String) -> Result<Vec<Identification>, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await
    }

    pub async fn list_samples(&self) -> Result<Vec<SampleSummary>, EngineError> {
        self.call(|reply| EngineRequest::ListSamples { reply }).await
    }

    pub async fn status(&self) -> Result<GalleryStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread is the sole owner of the gallery, so store writes, retraining
/// and classifier reads are serialized: a recognition never observes a
/// half-rebuilt classifier and two enrollments never interleave.
pub fn spawn_engine(mut gallery: Gallery) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                // A panic drops the reply sender, so only that caller sees an error.
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| handle_request(&mut gallery, req)));
                if outcome.is_err() {
                    tracing::error!("engine request panicked; continuing");
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request(gallery: &mut Gallery, req: EngineRequest) {
    match req {
        EngineRequest::Detect { image, reply } => {
            let _ = reply.send(run_detect(gallery, &image));
        }
        EngineRequest::Enroll { name, image, reply } => {
            let _ = reply.send(run_enroll(gallery, &name, &image));
        }
        EngineRequest::Recognize { image, reply } => {
            let _ = reply.send(run_recognize(gallery, &image));
        }
        EngineRequest::ListSamples { reply } => {
            let _ = reply.send(gallery.samples().map_err(EngineError::from));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(gallery.status().map_err(EngineError::from));
        }
    }
}

fn run_detect(gallery: &Gallery, image: &str) -> Result<Vec<FaceBox>, EngineError> {
    let image = decode_data_url(image)?;
    let faces = gallery.detect(&image);
    tracing::debug!(faces = faces.len(), "detect");
    Ok(faces)
}

fn run_enroll(
    gallery: &mut Gallery,
    name: &str,
    image: &str,
) -> Result<SampleSummary, EngineError> {
    let image = decode_data_url(image)?;
    let sample = gallery.enroll(name, &image)?;
    Ok(sample.summary())
}

fn run_recognize(gallery: &Gallery, image: &str) -> Result<Vec<Identification>, EngineError> {
    let image = decode_data_url(image)?;
    let results = gallery.recognize(&image);
    tracing::debug!(
        faces = results.len(),
        known = results.iter().filter(|r| r.is_known()).count(),
        "recognize"
    );
    Ok(results)
}
