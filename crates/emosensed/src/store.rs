//! Result persistence (SQLite) and media blob storage (filesystem).

use image::{DynamicImage, ImageFormat};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const UPLOAD_DIR: &str = "uploads";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding: {0}")]
    Image(#[from] image::ImageError),
}

/// A result about to be persisted.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub emotion: String,
    /// Softmax confidence, 0–1.
    pub confidence: f32,
    pub health_tip: String,
    /// Path relative to the media root, if an image was stored.
    pub image: Option<String>,
}

/// A persisted result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredResult {
    pub id: String,
    pub emotion: String,
    pub confidence: f32,
    pub health_tip: String,
    pub image: Option<String>,
    pub detected_at: String,
}

/// Emotion results table.
pub struct ResultStore {
    conn: tokio_rusqlite::Connection,
}

impl ResultStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "result store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS emotion_results (
                        id          TEXT PRIMARY KEY,
                        emotion     TEXT NOT NULL,
                        confidence  REAL NOT NULL,
                        health_tip  TEXT NOT NULL,
                        image       TEXT,
                        detected_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_emotion_results_detected_at
                        ON emotion_results (detected_at);",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a result and return its id.
    pub async fn create(&self, new: NewResult) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let detected_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let row_id = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO emotion_results (id, emotion, confidence, health_tip, image, detected_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row_id,
                        new.emotion,
                        new.confidence as f64,
                        new.health_tip,
                        new.image,
                        detected_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::debug!(id = %id, "result stored");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredResult>, StoreError> {
        let id = id.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, emotion, confidence, health_tip, image, detected_at
                         FROM emotion_results WHERE id = ?1",
                        params![id],
                        row_to_result,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(result)
    }

    /// Most recent results first.
    pub async fn list(&self, limit: u32) -> Result<Vec<StoredResult>, StoreError> {
        let results = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, emotion, confidence, health_tip, image, detected_at
                     FROM emotion_results ORDER BY detected_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], row_to_result)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(results)
    }
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResult> {
    Ok(StoredResult {
        id: row.get(0)?,
        emotion: row.get(1)?,
        confidence: row.get::<_, f64>(2)? as f32,
        health_tip: row.get(3)?,
        image: row.get(4)?,
        detected_at: row.get(5)?,
    })
}

/// A file written under the media root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMedia {
    /// Path relative to the media root, e.g. `uploads/20250101_120000_1a2b3c4d.jpg`.
    pub relative: String,
    /// `relative` prefixed with the media URL.
    pub url: String,
}

/// Image and report files under a media root directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    pub fn new(root: PathBuf, url_prefix: String) -> Self {
        Self { root, url_prefix }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL for a path relative to the media root.
    pub fn url_for(&self, relative: &str) -> String {
        if relative.starts_with(&self.url_prefix) {
            relative.to_string()
        } else {
            format!("{}{}", self.url_prefix, relative)
        }
    }

    /// Encode `image` as JPEG under `uploads/`.
    pub fn save_image(&self, image: &DynamicImage) -> Result<StoredMedia, StoreError> {
        let (relative, path) = self.new_upload_path()?;
        DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(&path, ImageFormat::Jpeg)?;
        tracing::debug!(path = %path.display(), "image saved");
        Ok(self.stored(relative))
    }

    /// Write uploaded bytes as-is under `uploads/`.
    pub fn save_bytes(&self, bytes: &[u8]) -> Result<StoredMedia, StoreError> {
        let (relative, path) = self.new_upload_path()?;
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), len = bytes.len(), "upload saved");
        Ok(self.stored(relative))
    }

    /// Write a plain-text report for `result` and return its path.
    pub fn write_report(&self, result: &StoredResult) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("emotion_report_{}.txt", result.id));

        let image = result
            .image
            .as_deref()
            .map(|relative| self.url_for(relative))
            .unwrap_or_else(|| "none".to_string());

        let report = format!(
            "Emotion Detection Report\n\
             ========================\n\
             Result ID:   {}\n\
             Detected at: {}\n\
             Emotion:     {}\n\
             Confidence:  {:.2}%\n\
             Health tip:  {}\n\
             Image:       {}\n",
            result.id,
            result.detected_at,
            result.emotion,
            result.confidence * 100.0,
            result.health_tip,
            image,
        );
        std::fs::write(&path, report)?;

        tracing::info!(id = %result.id, path = %path.display(), "report written");
        Ok(path)
    }

    fn new_upload_path(&self) -> Result<(String, PathBuf), StoreError> {
        let dir = self.root.join(UPLOAD_DIR);
        std::fs::create_dir_all(&dir)?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{stamp}_{}.jpg", &suffix[..8]);

        Ok((format!("{UPLOAD_DIR}/{name}"), dir.join(name)))
    }

    fn stored(&self, relative: String) -> StoredMedia {
        StoredMedia {
            url: self.url_for(&relative),
            relative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("emosense-media-{}", uuid::Uuid::new_v4()))
    }

    fn new_result(emotion: &str, confidence: f32) -> NewResult {
        NewResult {
            emotion: emotion.to_string(),
            confidence,
            health_tip: "tip".to_string(),
            image: Some("uploads/a.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = ResultStore::open_in_memory().await.unwrap();
        let id = store.create(new_result("happy", 0.75)).await.unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.emotion, "happy");
        assert!((stored.confidence - 0.75).abs() < 1e-6);
        assert_eq!(stored.image.as_deref(), Some("uploads/a.jpg"));
        assert!(chrono::DateTime::parse_from_rfc3339(&stored.detected_at).is_ok());
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let store = ResultStore::open_in_memory().await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let store = ResultStore::open_in_memory().await.unwrap();
        let first = store.create(new_result("sad", 0.5)).await.unwrap();
        let second = store.create(new_result("fear", 0.6)).await.unwrap();
        let third = store.create(new_result("angry", 0.7)).await.unwrap();

        let all = store.list(10).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

        assert_eq!(store.list(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let root = temp_root();
        let db = root.join("results.db");
        let id = {
            let store = ResultStore::open(&db).await.unwrap();
            store.create(new_result("neutral", 0.9)).await.unwrap()
        };
        let store = ResultStore::open(&db).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_media_save_image_and_url() {
        let root = temp_root();
        let media = MediaStore::new(root.clone(), "/media/".to_string());
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30])));

        let stored = media.save_image(&image).unwrap();
        assert!(stored.relative.starts_with("uploads/"));
        assert!(stored.relative.ends_with(".jpg"));
        assert_eq!(stored.url, format!("/media/{}", stored.relative));
        assert!(root.join(&stored.relative).exists());

        let again = media.save_bytes(b"raw").unwrap();
        assert_ne!(again.relative, stored.relative);
        assert_eq!(std::fs::read(root.join(&again.relative)).unwrap(), b"raw");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_url_for_keeps_existing_prefix() {
        let media = MediaStore::new(PathBuf::from("/tmp"), "/media/".to_string());
        assert_eq!(media.url_for("uploads/x.jpg"), "/media/uploads/x.jpg");
        assert_eq!(media.url_for("/media/uploads/x.jpg"), "/media/uploads/x.jpg");
    }

    #[test]
    fn test_write_report() {
        let root = temp_root();
        let media = MediaStore::new(root.clone(), "/media/".to_string());
        let result = StoredResult {
            id: "abc".to_string(),
            emotion: "happy".to_string(),
            confidence: 0.8125,
            health_tip: "Keep smiling! Laughter is the best medicine.".to_string(),
            image: None,
            detected_at: "2025-01-01T00:00:00+00:00".to_string(),
        };

        let path = media.write_report(&result).unwrap();
        assert_eq!(path, root.join("emotion_report_abc.txt"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Emotion:     happy"));
        assert!(text.contains("Confidence:  81.25%"));
        assert!(text.contains("Image:       none"));

        std::fs::remove_dir_all(&root).ok();
    }
}
