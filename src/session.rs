use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::adapter::DetectExchange;
use crate::cache::ImageCache;
use crate::config::BenchConfig;
use crate::sample::{ErrorKind, RequestSample, SampleError, PHASE_TRANSFER};
use crate::verify::{verify, AccuracyTracker};
use crate::wire::{parse_detect_body, ClientFrame, QrCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingWelcome,
    Ready,
    AwaitingResponse,
    Closing,
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One persistent duplex connection. Strictly half-duplex: a single
/// outstanding request at a time, responses consumed in send order. Owned
/// by exactly one worker for its whole lifetime.
pub struct StreamSession {
    ws: WsStream,
    state: SessionState,
    request_timeout: Duration,
    handshake_timeout: Duration,
    sent: u64,
    received: u64,
}

impl StreamSession {
    /// Connect and consume the welcome frame. The welcome never becomes a
    /// sample.
    pub async fn connect(
        url: &str,
        handshake_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let (ws, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        let mut session = Self {
            ws,
            state: SessionState::AwaitingWelcome,
            request_timeout,
            handshake_timeout,
            sent: 0,
            received: 0,
        };
        session
            .recv_frame(handshake_timeout)
            .await
            .map_err(|err| anyhow!("welcome frame not received: {}", err.message))?;
        session.state = SessionState::Ready;
        debug!(url, "stream session established");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Send one detect frame and block for exactly one inbound frame. The
    /// sample carries a single `transfer` phase covering send-to-receive.
    /// Returns the decoded detections alongside the sample so the caller
    /// can verify them; empty on failure.
    pub async fn detect(&mut self, image_base64: &str) -> (RequestSample, Vec<QrCode>) {
        if self.state != SessionState::Ready {
            return (
                RequestSample::failed(
                    Duration::ZERO,
                    SampleError::new(
                        ErrorKind::Transport,
                        format!("session not ready (state {:?})", self.state),
                    ),
                ),
                Vec::new(),
            );
        }

        let frame = match serde_json::to_string(&ClientFrame::Detect {
            image: image_base64,
        }) {
            Ok(frame) => frame,
            Err(err) => {
                return (
                    RequestSample::failed(
                        Duration::ZERO,
                        SampleError::new(ErrorKind::Protocol, err.to_string()),
                    ),
                    Vec::new(),
                );
            }
        };

        let start = Instant::now();
        if let Err(err) = self.ws.send(Message::Text(frame)).await {
            self.state = SessionState::Closed;
            return (
                RequestSample::failed(
                    start.elapsed(),
                    SampleError::new(ErrorKind::Transport, err.to_string()),
                ),
                Vec::new(),
            );
        }
        self.sent += 1;
        self.state = SessionState::AwaitingResponse;

        let payload = match self.recv_frame(self.request_timeout).await {
            Ok(payload) => payload,
            Err(error) => {
                self.state = SessionState::Closed;
                return (RequestSample::failed(start.elapsed(), error), Vec::new());
            }
        };
        let transfer_time = start.elapsed();
        self.state = SessionState::Ready;

        let (sample, qrcodes) = match parse_detect_body(&payload) {
            Ok(body) if body.success => {
                let mut sample = RequestSample::succeeded(transfer_time);
                if let Some(stats) = &body.statistics {
                    sample.server_reported = stats.as_metrics();
                }
                sample.response_size = Some(payload.len());
                (sample, body.qrcodes.unwrap_or_default())
            }
            Ok(body) => (
                RequestSample::failed(
                    transfer_time,
                    SampleError::new(
                        ErrorKind::Application,
                        body.error
                            .unwrap_or_else(|| "service reported failure".to_string()),
                    ),
                ),
                Vec::new(),
            ),
            Err(error) => (RequestSample::failed(transfer_time, error), Vec::new()),
        };
        (
            sample.with_phase(PHASE_TRANSFER, transfer_time),
            qrcodes,
        )
    }

    /// Send the close frame and block for the acknowledgment. Neither frame
    /// becomes a sample.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closing;
        let frame = serde_json::to_string(&ClientFrame::Close)?;
        self.ws
            .send(Message::Text(frame))
            .await
            .context("failed to send close frame")?;
        let ack = self.recv_frame(self.handshake_timeout).await;
        self.state = SessionState::Closed;
        let _ = self.ws.close(None).await;
        ack.map(|_| ())
            .map_err(|err| anyhow!("close acknowledgment not received: {}", err.message))
    }

    /// Await exactly one data frame, skipping protocol-level ping/pong.
    async fn recv_frame(&mut self, wait: Duration) -> Result<Vec<u8>, SampleError> {
        let handshaking = matches!(
            self.state,
            SessionState::AwaitingWelcome | SessionState::Closing
        );
        let kind = if handshaking {
            ErrorKind::Handshake
        } else {
            ErrorKind::Transport
        };
        loop {
            let message = timeout(wait, self.ws.next())
                .await
                .map_err(|_| SampleError::new(kind, "timed out waiting for frame"))?;
            match message {
                Some(Ok(Message::Text(text))) => {
                    self.received_data();
                    return Ok(text.into_bytes());
                }
                Some(Ok(Message::Binary(bytes))) => {
                    self.received_data();
                    return Ok(bytes);
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(SampleError::new(kind, "server closed the session"));
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(SampleError::new(kind, err.to_string())),
                None => return Err(SampleError::new(kind, "connection closed")),
            }
        }
    }

    fn received_data(&mut self) {
        if self.state == SessionState::AwaitingResponse {
            self.received += 1;
        }
    }
}

/// Streaming adapter: one session per worker, never shared between
/// workers. Each exchange picks a pooled payload and verifies the decoded
/// detections against the payload's embedded token.
pub struct StreamAdapter {
    sessions: Vec<tokio::sync::Mutex<StreamSession>>,
    cache: Arc<ImageCache>,
    accuracy: AccuracyTracker,
}

impl StreamAdapter {
    pub async fn connect(config: &BenchConfig, cache: Arc<ImageCache>) -> Result<Self> {
        let url = config.stream_url();
        let mut sessions = Vec::with_capacity(config.concurrency);
        for _ in 0..config.concurrency {
            let session = StreamSession::connect(
                &url,
                config.handshake_timeout,
                config.request_timeout,
            )
            .await?;
            sessions.push(tokio::sync::Mutex::new(session));
        }
        Ok(Self {
            sessions,
            cache,
            accuracy: AccuracyTracker::new(),
        })
    }

    pub fn accuracy(&self) -> &AccuracyTracker {
        &self.accuracy
    }

    /// Drop any accuracy tally accumulated so far. Called after warmup so
    /// discarded exchanges never count toward the measured run.
    pub fn begin_measurement(&self) {
        self.accuracy.reset();
    }

    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }

    pub async fn sent(&self) -> u64 {
        let mut total = 0;
        for session in &self.sessions {
            total += session.lock().await.sent();
        }
        total
    }

    pub async fn received(&self) -> u64 {
        let mut total = 0;
        for session in &self.sessions {
            total += session.lock().await.received();
        }
        total
    }

    /// Close every session, waiting for each acknowledgment.
    pub async fn shutdown(&self) -> Result<()> {
        for session in &self.sessions {
            let mut session = session.lock().await;
            if let Err(err) = session.close().await {
                warn!(error = %err, "session teardown failed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DetectExchange for StreamAdapter {
    async fn execute(&self, worker_id: usize) -> RequestSample {
        let session = &self.sessions[worker_id % self.sessions.len()];
        let mut session = session.lock().await;
        let payload = self.cache.pick();
        let (sample, qrcodes) = session.detect(&payload.base64).await;
        if sample.success || sample
            .error
            .as_ref()
            .is_some_and(|error| error.kind == ErrorKind::Application)
        {
            self.accuracy
                .record(sample.success && verify(&payload.token, &qrcodes));
        }
        sample
    }
}
