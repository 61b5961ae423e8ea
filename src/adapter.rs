use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::cache::ImageCache;
use crate::config::BenchConfig;
use crate::sample::{
    ErrorKind, RequestSample, SampleError, PHASE_PARSE, PHASE_PREPARE, PHASE_TRANSFER,
};
use crate::wire::parse_detect_body;

/// One logical detection exchange. Implementations never retry internally;
/// every attempt yields exactly one sample.
#[async_trait]
pub trait DetectExchange: Send + Sync {
    async fn execute(&self, worker_id: usize) -> RequestSample;
}

/// Deterministic adapter choice per request index, independent of
/// completion order.
pub enum AdapterSelect {
    Single(Arc<dyn DetectExchange>),
    Alternating {
        even: Arc<dyn DetectExchange>,
        odd: Arc<dyn DetectExchange>,
    },
}

impl AdapterSelect {
    pub fn for_index(&self, index: u64) -> &Arc<dyn DetectExchange> {
        match self {
            AdapterSelect::Single(adapter) => adapter,
            AdapterSelect::Alternating { even, odd } => {
                if index % 2 == 0 {
                    even
                } else {
                    odd
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncApi {
    /// Multipart file upload.
    File,
    /// JSON body carrying the base64 payload.
    Base64,
}

/// One-shot request/response adapter over either sync endpoint. Timing is
/// decomposed into prepare (request assembly), transfer (send to full
/// response body), and parse (body classification).
pub struct SyncAdapter {
    client: Client,
    url: String,
    api: SyncApi,
    cache: Arc<ImageCache>,
}

impl SyncAdapter {
    pub fn new(config: &BenchConfig, api: SyncApi, cache: Arc<ImageCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to construct HTTP client")?;
        let url = match api {
            SyncApi::File => config.detect_file_url(),
            SyncApi::Base64 => config.detect_base64_url(),
        };
        Ok(Self {
            client,
            url,
            api,
            cache,
        })
    }
}

#[async_trait]
impl DetectExchange for SyncAdapter {
    async fn execute(&self, _worker_id: usize) -> RequestSample {
        let start = Instant::now();
        let payload = self.cache.pick();

        let prepare_start = Instant::now();
        let request = match self.api {
            SyncApi::File => {
                let part = match build_file_part(payload.bytes.clone(), "image/png") {
                    Ok(part) => part,
                    Err(error) => return RequestSample::failed(start.elapsed(), error),
                };
                self.client
                    .post(&self.url)
                    .multipart(Form::new().part("file", part))
            }
            SyncApi::Base64 => self
                .client
                .post(&self.url)
                .json(&json!({ "image": payload.base64 })),
        };
        let prepare_time = prepare_start.elapsed();

        let transfer_start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %self.url, error = %err, "transport failure");
                return RequestSample::failed(start.elapsed(), SampleError::from_reqwest(&err))
                    .with_phase(PHASE_PREPARE, prepare_time)
                    .with_phase(PHASE_TRANSFER, transfer_start.elapsed());
            }
        };
        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                return RequestSample::failed(start.elapsed(), SampleError::from_reqwest(&err))
                    .with_phase(PHASE_PREPARE, prepare_time)
                    .with_phase(PHASE_TRANSFER, transfer_start.elapsed());
            }
        };
        let transfer_time = transfer_start.elapsed();

        if !status.is_success() {
            return RequestSample::failed(
                start.elapsed(),
                SampleError::new(ErrorKind::Protocol, format!("HTTP {}", status.as_u16())),
            )
            .with_phase(PHASE_PREPARE, prepare_time)
            .with_phase(PHASE_TRANSFER, transfer_time);
        }

        let parse_start = Instant::now();
        let parsed = parse_detect_body(&bytes);
        let parse_time = parse_start.elapsed();

        let mut sample = match parsed {
            Ok(body) if body.success => {
                let mut sample = RequestSample::succeeded(start.elapsed());
                if let Some(stats) = body.statistics {
                    sample.server_reported = stats.as_metrics();
                }
                sample
            }
            Ok(body) => RequestSample::failed(
                start.elapsed(),
                SampleError::new(
                    ErrorKind::Application,
                    body.error
                        .unwrap_or_else(|| "service reported failure".to_string()),
                ),
            ),
            Err(error) => RequestSample::failed(start.elapsed(), error),
        };
        sample = sample
            .with_phase(PHASE_PREPARE, prepare_time)
            .with_phase(PHASE_TRANSFER, transfer_time)
            .with_phase(PHASE_PARSE, parse_time);
        sample.response_size = Some(bytes.len());

        sample
    }
}

/// Request assembly, not transport: a bad MIME string is a local
/// protocol-level mistake.
fn build_file_part(bytes: Vec<u8>, mime: &str) -> Result<Part, SampleError> {
    Part::bytes(bytes)
        .file_name("test.png")
        .mime_str(mime)
        .map_err(|err| SampleError::new(ErrorKind::Protocol, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_part_rejects_invalid_mime_as_protocol_error() {
        let err = build_file_part(b"png".to_vec(), "not a mime type").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn file_part_accepts_the_png_mime() {
        assert!(build_file_part(b"png".to_vec(), "image/png").is_ok());
    }
}
