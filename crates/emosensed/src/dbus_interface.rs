use crate::engine::EngineHandle;
use crate::store::{MediaStore, NewResult, ResultStore, StoredResult};
use emosense_core::{advice_for_name, DetectionResult, ImageInput};
use image::DynamicImage;
use serde::Serialize;
use std::path::PathBuf;
use zbus::interface;

/// JSON body returned for every detection.
#[derive(Debug, Serialize, PartialEq)]
pub struct DetectionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub emotion: String,
    /// Percentage, 0–100.
    pub confidence_score: f32,
    pub health_tip: String,
}

impl DetectionPayload {
    fn from_detection(result: &DetectionResult) -> Self {
        Self {
            id: None,
            image_url: None,
            emotion: result.label().to_string(),
            confidence_score: result.confidence_percent(),
            health_tip: result.advice.to_string(),
        }
    }
}

/// Request-level failure, mapped onto a D-Bus error.
#[derive(Debug)]
pub enum ServiceError {
    InvalidArgs(String),
    Failed(String),
}

impl ServiceError {
    fn failed(e: impl std::fmt::Display) -> Self {
        ServiceError::Failed(e.to_string())
    }
}

impl From<ServiceError> for zbus::fdo::Error {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidArgs(msg) => zbus::fdo::Error::InvalidArgs(msg),
            ServiceError::Failed(msg) => zbus::fdo::Error::Failed(msg),
        }
    }
}

/// D-Bus interface for the Emosense daemon.
///
/// Bus name: org.emosense.Emosense1
/// Object path: /org/emosense/Emosense1
pub struct EmosenseService {
    engine: EngineHandle,
    results: ResultStore,
    media: MediaStore,
    model_path: PathBuf,
}

impl EmosenseService {
    pub fn new(
        engine: EngineHandle,
        results: ResultStore,
        media: MediaStore,
        model_path: PathBuf,
    ) -> Self {
        Self {
            engine,
            results,
            media,
            model_path,
        }
    }

    /// Decode, detect, store the image and the result.
    pub async fn handle_upload(&self, bytes: Vec<u8>) -> Result<DetectionPayload, ServiceError> {
        let len = bytes.len();
        let detected = self
            .engine
            .detect_upload(bytes)
            .await
            .map_err(ServiceError::failed)?
            .ok_or_else(|| {
                tracing::warn!(len, "upload: undecodable image");
                ServiceError::InvalidArgs("failed to read image".into())
            })?;

        self.persist(&detected.detection, detected.image).await
    }

    /// Detect from a path without persisting anything.
    pub async fn handle_detect_file(&self, path: &str) -> Result<DetectionPayload, ServiceError> {
        let detection = self
            .engine
            .detect(ImageInput::Path(PathBuf::from(path)))
            .await
            .map_err(ServiceError::failed)?;
        Ok(DetectionPayload::from_detection(&detection))
    }

    pub async fn handle_capture(&self) -> Result<DetectionPayload, ServiceError> {
        let captured = self.engine.capture().await.map_err(|e| {
            tracing::warn!(error = %e, "capture failed");
            ServiceError::failed(e)
        })?;
        self.persist(&captured.detection, captured.image).await
    }

    /// Store a result computed earlier by a caller.
    pub async fn handle_save(
        &self,
        emotion: &str,
        confidence_score: f64,
        health_tip: &str,
        image: Vec<u8>,
    ) -> Result<String, ServiceError> {
        if !confidence_score.is_finite() || !(0.0..=100.0).contains(&confidence_score) {
            return Err(ServiceError::InvalidArgs(format!(
                "confidence_score must be within 0–100, got {confidence_score}"
            )));
        }

        let stored_image = if image.is_empty() {
            None
        } else {
            let media = self.media.clone();
            let stored = tokio::task::spawn_blocking(move || media.save_bytes(&image))
                .await
                .map_err(ServiceError::failed)?
                .map_err(ServiceError::failed)?;
            Some(stored.relative)
        };

        let health_tip = if health_tip.trim().is_empty() {
            advice_for_name(emotion).to_string()
        } else {
            health_tip.to_string()
        };

        self.results
            .create(NewResult {
                emotion: emotion.to_string(),
                confidence: (confidence_score / 100.0) as f32,
                health_tip,
                image: stored_image,
            })
            .await
            .map_err(ServiceError::failed)
    }

    pub async fn handle_get(&self, id: &str) -> Result<StoredResult, ServiceError> {
        self.results
            .get(id)
            .await
            .map_err(ServiceError::failed)?
            .ok_or_else(|| ServiceError::InvalidArgs(format!("unknown result id: {id}")))
    }

    pub async fn handle_report(&self, id: &str) -> Result<PathBuf, ServiceError> {
        let result = self.handle_get(id).await?;
        let media = self.media.clone();
        tokio::task::spawn_blocking(move || media.write_report(&result))
            .await
            .map_err(ServiceError::failed)?
            .map_err(ServiceError::failed)
    }

    async fn persist(
        &self,
        detection: &DetectionResult,
        image: DynamicImage,
    ) -> Result<DetectionPayload, ServiceError> {
        let media = self.media.clone();
        let stored = tokio::task::spawn_blocking(move || media.save_image(&image))
            .await
            .map_err(ServiceError::failed)?
            .map_err(ServiceError::failed)?;

        let id = self
            .results
            .create(NewResult {
                emotion: detection.label().to_string(),
                confidence: detection.confidence,
                health_tip: detection.advice.to_string(),
                image: Some(stored.relative),
            })
            .await
            .map_err(ServiceError::failed)?;

        tracing::info!(id = %id, emotion = detection.label(), "result persisted");

        Ok(DetectionPayload {
            id: Some(id),
            image_url: Some(stored.url),
            ..DetectionPayload::from_detection(detection)
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.emosense.Emosense1")]
impl EmosenseService {
    /// Detect the emotion in uploaded image bytes and store the result.
    async fn upload_image(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(len = image.len(), "upload_image requested");
        to_json(&self.handle_upload(image).await?)
    }

    /// Detect the emotion in an image file readable by the daemon.
    async fn detect_file(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "detect_file requested");
        to_json(&self.handle_detect_file(path).await?)
    }

    /// Capture a camera frame, detect, and store the result.
    async fn capture_camera(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture_camera requested");
        to_json(&self.handle_capture().await?)
    }

    /// Persist a previously computed result.
    async fn save_result(
        &self,
        emotion: &str,
        confidence_score: f64,
        health_tip: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(emotion, confidence_score, "save_result requested");
        let id = self
            .handle_save(emotion, confidence_score, health_tip, image)
            .await?;
        to_json(&serde_json::json!({ "id": id }))
    }

    /// Fetch one stored result.
    async fn get_result(&self, id: &str) -> zbus::fdo::Result<String> {
        to_json(&self.handle_get(id).await?)
    }

    /// List the newest stored results.
    async fn list_results(&self, limit: u32) -> zbus::fdo::Result<String> {
        let results = self
            .results
            .list(limit)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&results)
    }

    /// Write a text report for a stored result; returns its path.
    async fn export_report(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "export_report requested");
        let path = self.handle_report(id).await?;
        to_json(&serde_json::json!({ "path": path.to_string_lossy() }))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model": self.model_path.to_string_lossy(),
            "media_root": self.media.root().to_string_lossy(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_with_pipeline;
    use emosense_core::{
        BoundingBox, ClassifierError, EmotionClassifier, EmotionScores, FaceLocator, FaceTensor,
        InferencePipeline,
    };
    use image::{GrayImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    struct WholeImageLocator;

    impl FaceLocator for WholeImageLocator {
        fn locate(&mut self, gray: &GrayImage) -> Option<BoundingBox> {
            let (w, h) = gray.dimensions();
            // Treat all-black images as faceless.
            if gray.pixels().all(|p| p.0[0] == 0) {
                return None;
            }
            BoundingBox::clamped(0, 0, w as i32, h as i32, w, h)
        }
    }

    struct HappyClassifier;

    impl EmotionClassifier for HappyClassifier {
        fn predict(&mut self, _face: &FaceTensor) -> Result<EmotionScores, ClassifierError> {
            EmotionScores::from_raw(&[0.0, 0.0, 0.0, 0.8, 0.1, 0.1, 0.0])
        }
    }

    async fn service() -> (EmosenseService, PathBuf) {
        let root = std::env::temp_dir().join(format!("emosense-svc-{}", uuid::Uuid::new_v4()));
        let pipeline =
            InferencePipeline::new(Box::new(WholeImageLocator), Box::new(HappyClassifier));
        let engine = spawn_with_pipeline(pipeline, "/nonexistent/video99".into(), 0).unwrap();
        let results = ResultStore::open_in_memory().await.unwrap();
        let media = MediaStore::new(root.clone(), "/media/".into());
        (
            EmosenseService::new(engine, results, media, PathBuf::from("model.mpk")),
            root,
        )
    }

    fn png(pixel: u8) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, image::Rgb([pixel; 3])))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_upload_stores_result_and_image() {
        let (svc, root) = service().await;
        let payload = svc.handle_upload(png(200)).await.unwrap();

        assert_eq!(payload.emotion, "happy");
        assert!((payload.confidence_score - 80.0).abs() < 1e-3);
        assert_eq!(payload.health_tip, "Keep smiling! Laughter is the best medicine.");

        let url = payload.image_url.unwrap();
        assert!(url.starts_with("/media/uploads/"));

        let stored = svc.handle_get(&payload.id.unwrap()).await.unwrap();
        assert_eq!(stored.emotion, "happy");
        assert!(root.join(stored.image.unwrap()).exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_upload_no_face_is_sentinel_not_error() {
        let (svc, root) = service().await;
        let payload = svc.handle_upload(png(0)).await.unwrap();
        assert_eq!(payload.emotion, "No face detected");
        assert_eq!(payload.confidence_score, 0.0);
        assert_eq!(payload.health_tip, "No health tip available");
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_upload_rejects_undecodable_bytes() {
        let (svc, _root) = service().await;
        let err = svc.handle_upload(b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn test_detect_file_missing_path() {
        let (svc, _root) = service().await;
        let payload = svc.handle_detect_file("/nonexistent/face.jpg").await.unwrap();
        assert_eq!(payload.emotion, "File not found");
        assert!(payload.id.is_none());
    }

    #[tokio::test]
    async fn test_capture_without_camera_is_failure() {
        let (svc, _root) = service().await;
        let err = svc.handle_capture().await.unwrap_err();
        assert!(matches!(err, ServiceError::Failed(_)));
    }

    #[tokio::test]
    async fn test_save_result_validates_and_fills_tip() {
        let (svc, root) = service().await;

        let err = svc.handle_save("sad", 120.0, "", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgs(_)));

        let id = svc.handle_save("Sad", 42.0, "", Vec::new()).await.unwrap();
        let stored = svc.handle_get(&id).await.unwrap();
        assert!((stored.confidence - 0.42).abs() < 1e-6);
        assert_eq!(stored.health_tip, "Engage in activities you enjoy or talk to someone.");
        assert!(stored.image.is_none());

        let id = svc.handle_save("calm", 10.0, "custom", png(9)).await.unwrap();
        let stored = svc.handle_get(&id).await.unwrap();
        assert_eq!(stored.health_tip, "custom");
        assert!(root.join(stored.image.unwrap()).exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_get_unknown_and_report() {
        let (svc, root) = service().await;
        assert!(matches!(
            svc.handle_get("nope").await,
            Err(ServiceError::InvalidArgs(_))
        ));

        let id = svc.handle_save("fear", 55.5, "", Vec::new()).await.unwrap();
        let path = svc.handle_report(&id).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Emotion:     fear"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = DetectionPayload {
            id: None,
            image_url: Some("/media/uploads/x.jpg".into()),
            emotion: "neutral".into(),
            confidence_score: 50.0,
            health_tip: "tip".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["image_url"], "/media/uploads/x.jpg");
        assert_eq!(json["confidence_score"], 50.0);
    }
}
