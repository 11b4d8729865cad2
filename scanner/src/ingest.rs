use dumpwatch_common::config::IngestConfig;
use dumpwatch_common::detection::DetectionReport;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Identifier the ingestion API assigned to an accepted detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub id: String,
}

/// Destination for confirmed detections.
///
/// Delivery is best effort: the scanner logs a failed submission and moves
/// on, it never retries or queues.
pub trait Ingest: Send + Sync {
    fn submit(
        &self,
        report: &DetectionReport,
    ) -> impl Future<Output = Result<IngestReceipt, IngestError>> + Send;
}

/// Posts detections as `multipart/form-data` to the ingestion REST API.
pub struct HttpIngest {
    client: reqwest::Client,
    url: String,
}

impl HttpIngest {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(IngestError::Transport)?;
        Ok(Self {
            client,
            url: config.url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn build_form(report: &DetectionReport) -> Result<Form, IngestError> {
    let image = Part::bytes(report.image.clone())
        .file_name(report.image_name.clone())
        .mime_str(report.image_mime())
        .map_err(IngestError::Transport)?;

    Ok(Form::new()
        .text("camera_id", report.camera_id.clone())
        .text("timestamp", report.timestamp())
        .text("latitude", report.coordinates.latitude.to_string())
        .text("longitude", report.coordinates.longitude.to_string())
        .text("detection_area", report.detection_area.to_string())
        .text("waste_type", report.waste_type.clone())
        .part("image", image))
}

/// Pull the `id` field out of the API's JSON response; `"N/A"` when absent.
fn receipt_from_body(body: &serde_json::Value) -> IngestReceipt {
    let id = match body.get("id") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    };
    IngestReceipt { id }
}

impl Ingest for HttpIngest {
    async fn submit(&self, report: &DetectionReport) -> Result<IngestReceipt, IngestError> {
        let form = build_form(report)?;

        debug!(
            url = self.url,
            camera = report.camera_id,
            bytes = report.image.len(),
            "posting detection"
        );

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(IngestError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Status(status.as_u16(), body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IngestError::Body(e.to_string()))?;
        Ok(receipt_from_body(&body))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingestion request failed: {0}")]
    Transport(reqwest::Error),
    #[error("ingestion API returned HTTP {0}: {1}")]
    Status(u16, String),
    #[error("invalid ingestion response: {0}")]
    Body(String),
}
