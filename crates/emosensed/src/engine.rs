use emosense_core::{
    load_classifier, CascadeLocator, DetectionResult, ImageInput, InferencePipeline,
    LocatorConfig, TensorLayout,
};
use emosense_hw::CameraError;
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face locator error: {0}")]
    Locator(#[from] emosense_core::LocatorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] emosense_core::ClassifierError),
    #[error("inference error: {0}")]
    Pipeline(#[from] emosense_core::PipelineError),
    #[error("captured frame has inconsistent dimensions")]
    InvalidFrame,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// An image decoded on the engine thread and the detection run on it.
pub struct DetectedImage {
    pub detection: DetectionResult,
    pub image: DynamicImage,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect {
        input: ImageInput,
        reply: oneshot::Sender<Result<DetectionResult, EngineError>>,
    },
    DetectUpload {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Option<DetectedImage>, EngineError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<DetectedImage, EngineError>>,
    },
}

/// Startup parameters for the engine thread.
pub struct EngineSettings {
    pub model_path: String,
    pub cascade_path: String,
    pub onnx_layout: TensorLayout,
    pub min_face_size: u32,
    pub camera_device: String,
    pub warmup_frames: usize,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run detection on an image, path, or encoded bytes.
    pub async fn detect(&self, input: ImageInput) -> Result<DetectionResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                input,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode uploaded bytes and run detection, keeping the decoded image.
    ///
    /// `None` means the bytes are not a usable image.
    pub async fn detect_upload(&self, bytes: Vec<u8>) -> Result<Option<DetectedImage>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DetectUpload {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture one camera frame and run detection on it.
    pub async fn capture(&self) -> Result<DetectedImage, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the cascade and the classifier synchronously; a missing artifact
/// fails here, before any request can be served. The thread then owns the
/// pipeline for the life of the process.
pub fn spawn_engine(settings: EngineSettings) -> Result<EngineHandle, EngineError> {
    let locator = CascadeLocator::load(
        &settings.cascade_path,
        LocatorConfig {
            min_face_size: settings.min_face_size,
            ..LocatorConfig::default()
        },
    )?;
    tracing::info!(path = %settings.cascade_path, "face cascade loaded");

    let classifier = load_classifier(&settings.model_path, settings.onnx_layout)?;
    tracing::info!(path = %settings.model_path, "emotion classifier loaded");

    let pipeline = InferencePipeline::new(Box::new(locator), classifier);
    spawn_with_pipeline(pipeline, settings.camera_device, settings.warmup_frames)
}

/// Spawn the engine thread around an already-built pipeline.
pub fn spawn_with_pipeline(
    mut pipeline: InferencePipeline,
    camera_device: String,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("emosense-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { input, reply } => {
                        let result = pipeline.detect(input).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::DetectUpload { bytes, reply } => {
                        let _ = reply.send(run_upload(&mut pipeline, bytes));
                    }
                    EngineRequest::Capture { reply } => {
                        let result = run_capture(&mut pipeline, &camera_device, warmup_frames);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_upload(
    pipeline: &mut InferencePipeline,
    bytes: Vec<u8>,
) -> Result<Option<DetectedImage>, EngineError> {
    let image = match ImageInput::Bytes(bytes).resolve() {
        Ok(image) => image,
        Err(outcome) => {
            tracing::debug!(outcome = outcome.label(), "upload rejected");
            return Ok(None);
        }
    };
    let detection = pipeline.detect_image(&image)?;
    Ok(Some(DetectedImage { detection, image }))
}

/// Capture a frame (the camera is released before detection starts), then detect.
fn run_capture(
    pipeline: &mut InferencePipeline,
    camera_device: &str,
    warmup_frames: usize,
) -> Result<DetectedImage, EngineError> {
    let frame = emosense_hw::capture_once(camera_device, warmup_frames)?;
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        sequence = frame.sequence,
        "capture: frame acquired"
    );

    let image = frame.into_image().ok_or(EngineError::InvalidFrame)?;
    let detection = pipeline.detect_image(&image)?;

    Ok(DetectedImage { detection, image })
}
