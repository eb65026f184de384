//! Client for the black-box document reader (OCR/VLM engines behind an
//! HTTP facade): file path in, normalised text plus images and heading
//! structure out.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use uuid::Uuid;

use common::{
    error::AppError, storage::types::document_image::NewDocumentImage, utils::config::AppConfig,
};

use crate::chunker::HeadingAnnotation;

#[derive(Debug, Serialize)]
struct ReadRequest<'a> {
    file_path: &'a str,
}

/// Normalised output of the reader service.
#[derive(Debug, Deserialize)]
pub struct ReadDocument {
    pub text: String,
    #[serde(default)]
    pub headings: Vec<HeadingAnnotation>,
    #[serde(default)]
    pub images: Vec<NewDocumentImage>,
}

#[derive(Clone)]
pub struct DocumentReader {
    http: reqwest::Client,
    base_url: String,
    upload_dir: PathBuf,
}

impl DocumentReader {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: config.document_reader_url.trim_end_matches('/').to_owned(),
            upload_dir: PathBuf::from(&config.upload_dir),
        })
    }

    /// Uploads land on a shared volume keyed by job id; both the API and
    /// the worker see the same tree.
    pub fn resolve_upload(&self, job_id: Uuid, filename: &str) -> Result<PathBuf, AppError> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| AppError::Validation(format!("invalid upload filename {filename}")))?;

        Ok(self.upload_dir.join(job_id.to_string()).join(name))
    }

    pub async fn read(&self, file_path: &Path) -> Result<ReadDocument, AppError> {
        if !file_path.exists() {
            return Err(AppError::Processing(format!(
                "uploaded file {} is missing from shared storage",
                file_path.display()
            )));
        }

        let path = file_path.to_string_lossy();
        let retry_strategy = ExponentialBackoff::from_millis(500).map(jitter).take(2);

        let response = Retry::spawn(retry_strategy, || async {
            self.http
                .post(format!("{}/read", self.base_url))
                .json(&ReadRequest { file_path: &path })
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| AppError::ExternalService(format!("document reader failed: {e}")))?;

        let document: ReadDocument = response.json().await?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_document_tolerates_missing_optionals() {
        let document: ReadDocument =
            serde_json::from_str("{\"text\": \"Bonjour\"}").expect("minimal payload");
        assert_eq!(document.text, "Bonjour");
        assert!(document.headings.is_empty());
        assert!(document.images.is_empty());
    }

    #[test]
    fn test_read_document_parses_headings() {
        let payload = r#"{
            "text": "Guide\n\nLes congés...",
            "headings": [{"offset": 0, "level": 1, "title": "Guide"}],
            "images": [
                {"page_number": 1, "storage_path": "/img/p1.png"},
                {"page_number": 2, "storage_path": "/img/p2.png", "text_offset": 7}
            ]
        }"#;
        let document: ReadDocument = serde_json::from_str(payload).expect("full payload");
        assert_eq!(document.headings.len(), 1);
        assert_eq!(document.headings[0].title, "Guide");
        assert_eq!(document.images.len(), 2);
        assert_eq!(document.images[0].text_offset, None);
        assert_eq!(document.images[1].text_offset, Some(7));
    }
}
