use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Client-side latency phases. An adapter records only the phases it
/// actually measures; the streaming adapter reports `transfer` alone.
pub const PHASE_PREPARE: &str = "prepare";
pub const PHASE_TRANSFER: &str = "transfer";
pub const PHASE_PARSE: &str = "parse";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused/reset, or the per-call timeout elapsed.
    Transport,
    /// Non-success status code or a response body that failed classification.
    Protocol,
    /// The service itself reported `success: false`.
    Application,
    /// Streaming welcome or close acknowledgment never arrived.
    Handshake,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Transport => "TransportError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Application => "ApplicationError",
            ErrorKind::Handshake => "HandshakeError",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SampleError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SampleError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection refused or host unreachable".to_string()
        } else {
            err.to_string()
        };
        Self::new(ErrorKind::Transport, message)
    }
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

/// One completed exchange attempt. `success` and `error` are mutually
/// exclusive; use the constructors to keep them that way.
#[derive(Clone, Debug)]
pub struct RequestSample {
    pub success: bool,
    pub total_time: Duration,
    pub phase_times: HashMap<&'static str, Duration>,
    pub server_reported: HashMap<String, f64>,
    pub error: Option<SampleError>,
    pub response_size: Option<usize>,
}

impl RequestSample {
    pub fn succeeded(total_time: Duration) -> Self {
        Self {
            success: true,
            total_time,
            phase_times: HashMap::new(),
            server_reported: HashMap::new(),
            error: None,
            response_size: None,
        }
    }

    pub fn failed(total_time: Duration, error: SampleError) -> Self {
        Self {
            success: false,
            total_time,
            phase_times: HashMap::new(),
            server_reported: HashMap::new(),
            error: Some(error),
            response_size: None,
        }
    }

    pub fn with_phase(mut self, phase: &'static str, elapsed: Duration) -> Self {
        self.phase_times.insert(phase, elapsed);
        self
    }
}

/// Append-only sample sink shared by every worker in a run. The element
/// vector is guarded by a mutex; the length rides in a separate atomic so
/// progress reporting never touches the vector while workers are appending.
#[derive(Debug, Default)]
pub struct SampleCollector {
    samples: Mutex<Vec<RequestSample>>,
    appended: AtomicUsize,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sample: RequestSample) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
        self.appended.fetch_add(1, Ordering::Release);
    }

    /// Snapshot of how many samples have landed so far.
    pub fn len(&self) -> usize {
        self.appended.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the collector once every worker has been joined.
    pub fn into_samples(self) -> Vec<RequestSample> {
        self.samples
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn constructors_keep_success_and_error_exclusive() {
        let ok = RequestSample::succeeded(Duration::from_millis(5));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = RequestSample::failed(
            Duration::from_millis(5),
            SampleError::new(ErrorKind::Transport, "reset"),
        );
        assert!(!failed.success);
        assert!(failed.error.is_some());
    }

    #[test]
    fn concurrent_appends_are_neither_lost_nor_duplicated() {
        let collector = Arc::new(SampleCollector::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let collector = Arc::clone(&collector);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    collector.append(RequestSample::succeeded(Duration::from_millis(1)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collector.len(), 2000);
        let samples = Arc::try_unwrap(collector).unwrap().into_samples();
        assert_eq!(samples.len(), 2000);
    }
}
