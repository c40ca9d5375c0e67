//! HTTP client for the Medsync import API

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use medsync_common::ndjson::NdjsonDecoder;
use medsync_common::{ImportResult, MedsyncError, ProgressEvent, StreamFrame};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default server address when neither `--server` nor `MEDSYNC_SERVER_URL` is set
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// Header the server records as the run's initiator
pub const TRIGGERED_BY_HEADER: &str = "x-triggered-by";

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected the request ({status}): {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Medsync(#[from] MedsyncError),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// One catalogue entry as listed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub id: String,
    pub label: String,
    pub target_table: String,
    pub mode: String,
    pub status: String,
    pub format: String,
    #[serde(default)]
    pub natural_key: Vec<String>,
    #[serde(default)]
    pub has_cloud_url: Option<bool>,
}

/// One past run as listed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub source: String,
    pub triggered_by: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
    pub status: String,
    pub success: u64,
    pub errors: u64,
    pub total_processed: u64,
}

#[derive(Debug, Clone)]
pub struct ImportClient {
    http: reqwest::Client,
    base_url: String,
    triggered_by: String,
}

impl ImportClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("medsync-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            triggered_by: "medsync-ingest".to_string(),
        })
    }

    pub fn with_triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = who.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/imports{}", self.base_url, path)
    }

    /// Upload a file to a file-mode source and wait for its result
    pub async fn upload(&self, source: &str, file: &Path) -> ClientResult<ImportResult> {
        let content = tokio::fs::read(file).await.map_err(|e| ClientError::File {
            path: file.display().to_string(),
            source: e,
        })?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        info!(source, file = %file_name, bytes = content.len(), "Uploading file");
        let form = Form::new().part("file", Part::bytes(content).file_name(file_name));
        let response = self
            .http
            .post(self.url(&format!("/{source}")))
            .header(TRIGGERED_BY_HEADER, &self.triggered_by)
            .multipart(form)
            .send()
            .await?;

        read_envelope(response).await
    }

    /// Trigger a cloud source and follow its progress stream
    ///
    /// `on_progress` sees every progress frame in order. An error frame ends
    /// the call with [`MedsyncError::RemoteAbort`].
    pub async fn sync<F>(&self, source: &str, mut on_progress: F) -> ClientResult<ImportResult>
    where
        F: FnMut(&ProgressEvent),
    {
        info!(source, "Starting cloud sync");
        let response = self
            .http
            .post(self.url(&format!("/{source}/sync")))
            .header(TRIGGERED_BY_HEADER, &self.triggered_by)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut decoder = NdjsonDecoder::new();
        let mut body = response.bytes_stream();
        let mut result = None;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.push(&chunk)? {
                if let Some(done) = handle_frame(frame, &mut on_progress)? {
                    result = Some(done);
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            if let Some(done) = handle_frame(frame, &mut on_progress)? {
                result = Some(done);
            }
        }

        result.ok_or_else(|| {
            MedsyncError::Protocol("Progress stream ended without a result".to_string()).into()
        })
    }

    pub async fn sources(&self) -> ClientResult<Vec<SourceSummary>> {
        let response = self.http.get(self.url("/sources")).send().await?;
        read_envelope(response).await
    }

    pub async fn history(
        &self,
        source: Option<&str>,
        limit: Option<i64>,
    ) -> ClientResult<Vec<HistoryEntry>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(source) = source {
            query.push(("source", source.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let response = self
            .http
            .get(self.url("/history"))
            .query(&query)
            .send()
            .await?;
        read_envelope(response).await
    }
}

fn handle_frame<F>(frame: StreamFrame, on_progress: &mut F) -> ClientResult<Option<ImportResult>>
where
    F: FnMut(&ProgressEvent),
{
    match frame {
        StreamFrame::Progress(event) => {
            debug!(status = %event.status, pct = ?event.pct, "Progress");
            on_progress(&event);
            Ok(None)
        },
        StreamFrame::Result { result } => Ok(Some(result)),
        StreamFrame::Error { error, .. } => Err(MedsyncError::RemoteAbort(error).into()),
    }
}

/// Turn a non-2xx answer into `ClientError::Api`
async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (
            status
                .canonical_reason()
                .unwrap_or("UNKNOWN")
                .to_uppercase()
                .replace(' ', "_"),
            text,
        ),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(MedsyncError::from)?;
    Ok(envelope.data)
}

/// True when the server answered with a status the caller could fix
pub fn is_client_error(error: &ClientError) -> bool {
    matches!(error, ClientError::Api { status, .. }
        if StatusCode::from_u16(*status).is_ok_and(|s| s.is_client_error()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result_json() -> serde_json::Value {
        json!({
            "success": 1, "errors": 0, "duplicates": 0, "skipped": 0,
            "totalProcessed": 1, "duration": 12
        })
    }

    #[tokio::test]
    async fn test_upload_posts_multipart_and_reads_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/imports/procedures"))
            .and(header(TRIGGERED_BY_HEADER, "medsync-ingest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": result_json()})),
            )
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<table><tr><td>FECHA</td></tr></table>").unwrap();

        let client = ImportClient::new(server.uri()).unwrap();
        let result = client.upload("procedures", file.path()).await.unwrap();
        assert_eq!(result.success, 1);
        assert_eq!(result.duration_ms, 12);
    }

    #[tokio::test]
    async fn test_upload_surfaces_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "success": false,
                "error": {"code": "HEADER_NOT_FOUND", "message": "No table with the expected headers"}
            })))
            .mount(&server)
            .await;

        let file = tempfile::NamedTempFile::new().unwrap();
        let client = ImportClient::new(server.uri()).unwrap();
        let err = client.upload("procedures", file.path()).await.unwrap_err();
        assert!(is_client_error(&err));
        match err {
            ClientError::Api { status, code, .. } => {
                assert_eq!(status, 422);
                assert_eq!(code, "HEADER_NOT_FOUND");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_with_path() {
        let client = ImportClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .upload("procedures", Path::new("/definitely/not/here.xls"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::File { ref path, .. } if path.contains("here.xls")));
    }

    #[tokio::test]
    async fn test_sync_replays_progress_and_returns_result() {
        let server = MockServer::start().await;
        let body = format!(
            "{}\n{}\nnot json\n{}\n",
            json!({"status": "Reading file", "pct": 5}),
            json!({"status": "Loading", "pct": 60}),
            json!({"result": result_json()})
        );
        Mock::given(method("POST"))
            .and(path("/api/v1/imports/roster_federal/sync"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = ImportClient::new(server.uri()).unwrap();
        let mut seen = Vec::new();
        let result = client
            .sync("roster_federal", |event| seen.push(event.pct))
            .await
            .unwrap();

        assert_eq!(seen, vec![Some(5), Some(60)]);
        assert_eq!(result.total_processed, 1);
    }

    #[tokio::test]
    async fn test_sync_error_frame_aborts() {
        let server = MockServer::start().await;
        let body = format!(
            "{}\n{}",
            json!({"status": "Reading file", "pct": 5}),
            json!({"phase": "error", "error": "Read error: connection reset"})
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = ImportClient::new(server.uri()).unwrap();
        let err = client.sync("roster_federal", |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Medsync(MedsyncError::RemoteAbort(ref msg)) if msg.contains("connection reset")
        ));
    }

    #[tokio::test]
    async fn test_sync_without_result_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"status\":\"Loading\",\"pct\":60}\n", "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = ImportClient::new(server.uri()).unwrap();
        let err = client.sync("roster_federal", |_| {}).await.unwrap_err();
        assert!(matches!(err, ClientError::Medsync(MedsyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_history_passes_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/imports/history"))
            .and(query_param("source", "procedures"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [{
                    "source": "procedures", "triggeredBy": "api", "fileName": "rips.xls",
                    "startedAt": "2026-10-01T10:00:00Z", "durationMs": 40, "status": "completed",
                    "success": 3, "errors": 1, "totalProcessed": 4
                }],
                "meta": {"limit": 5, "count": 1}
            })))
            .mount(&server)
            .await;

        let client = ImportClient::new(format!("{}/", server.uri())).unwrap();
        let runs = client.history(Some("procedures"), Some(5)).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].errors, 1);
    }
}
