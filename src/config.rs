use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;

#[derive(Clone, Debug)]
pub enum RunMode {
    /// Execute a fixed total number of requests and then stop.
    FixedCount { total_requests: u64 },
    /// Keep issuing requests until the wall-clock deadline passes. A request
    /// already in flight when the deadline passes is allowed to finish, so
    /// the run can overshoot by up to one call's latency.
    DurationBound { duration: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Multipart upload to `/detect/file`.
    File,
    /// JSON body to `/detect/base64`.
    Base64,
    /// Alternate file/base64 by request index parity.
    Mixed,
    /// Persistent duplex sessions against `/ws`.
    Stream,
}

#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub base_url: Url,
    pub protocol: Protocol,
    pub concurrency: usize,
    pub mode: RunMode,
    pub warmup_requests: u64,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl BenchConfig {
    pub fn try_new(
        base_url: impl AsRef<str>,
        protocol: Protocol,
        concurrency: usize,
        mode: RunMode,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be greater than zero"));
        }

        match &mode {
            RunMode::FixedCount { total_requests } => {
                if *total_requests == 0 {
                    return Err(anyhow!(
                        "total_requests must be greater than zero for fixed-count mode"
                    ));
                }
            }
            RunMode::DurationBound { duration } => {
                if duration.is_zero() {
                    return Err(anyhow!(
                        "duration must be greater than zero for duration-bound mode"
                    ));
                }
            }
        }

        let base_url = Url::parse(base_url.as_ref())
            .with_context(|| format!("invalid base URL: {}", base_url.as_ref()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "base URL must use http or https, got {}",
                base_url.scheme()
            ));
        }

        Ok(Self {
            base_url,
            protocol,
            concurrency,
            mode,
            warmup_requests: 0,
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_warmup(mut self, warmup_requests: u64) -> Self {
        self.warmup_requests = warmup_requests;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        if !handshake_timeout.is_zero() {
            self.handshake_timeout = handshake_timeout;
        }
        self
    }

    pub fn detect_file_url(&self) -> String {
        self.endpoint("detect/file")
    }

    pub fn detect_base64_url(&self) -> String {
        self.endpoint("detect/base64")
    }

    pub fn health_url(&self) -> String {
        format!("{}?verbose=true", self.endpoint("health"))
    }

    /// Streaming endpoint: same base as the HTTP routes with only the
    /// scheme switched to ws/wss.
    pub fn stream_url(&self) -> String {
        let endpoint = self.endpoint("ws");
        match endpoint.split_once("://") {
            Some(("https", rest)) => format!("wss://{}", rest),
            Some((_, rest)) => format!("ws://{}", rest),
            None => endpoint,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_concurrency_and_empty_modes() {
        assert!(BenchConfig::try_new(
            "http://localhost:3000",
            Protocol::File,
            0,
            RunMode::FixedCount { total_requests: 1 },
        )
        .is_err());
        assert!(BenchConfig::try_new(
            "http://localhost:3000",
            Protocol::File,
            1,
            RunMode::FixedCount { total_requests: 0 },
        )
        .is_err());
        assert!(BenchConfig::try_new(
            "http://localhost:3000",
            Protocol::File,
            1,
            RunMode::DurationBound {
                duration: Duration::ZERO
            },
        )
        .is_err());
    }

    #[test]
    fn builds_endpoint_urls() {
        let config = BenchConfig::try_new(
            "http://localhost:3000",
            Protocol::Mixed,
            4,
            RunMode::FixedCount { total_requests: 10 },
        )
        .unwrap();
        assert_eq!(config.detect_file_url(), "http://localhost:3000/detect/file");
        assert_eq!(
            config.detect_base64_url(),
            "http://localhost:3000/detect/base64"
        );
        assert_eq!(
            config.health_url(),
            "http://localhost:3000/health?verbose=true"
        );
        assert_eq!(config.stream_url(), "ws://localhost:3000/ws");
    }

    #[test]
    fn stream_url_upgrades_to_wss_for_https() {
        let config = BenchConfig::try_new(
            "https://qr.example.com",
            Protocol::Stream,
            1,
            RunMode::FixedCount { total_requests: 1 },
        )
        .unwrap();
        assert_eq!(config.stream_url(), "wss://qr.example.com/ws");
    }

    #[test]
    fn stream_url_keeps_base_path_prefixes() {
        let config = BenchConfig::try_new(
            "http://localhost:3000/api",
            Protocol::Stream,
            1,
            RunMode::FixedCount { total_requests: 1 },
        )
        .unwrap();
        assert_eq!(config.stream_url(), "ws://localhost:3000/api/ws");
        assert_eq!(
            config.detect_file_url(),
            "http://localhost:3000/api/detect/file"
        );
    }
}
