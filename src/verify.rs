use std::sync::atomic::{AtomicU64, Ordering};

use crate::wire::QrCode;

/// True iff the expected token appears verbatim among the decoded texts.
pub fn verify(expected_token: &str, detections: &[QrCode]) -> bool {
    detections.iter().any(|qr| qr.text == expected_token)
}

/// Running detection-accuracy tally, shared across streaming workers.
#[derive(Debug, Default)]
pub struct AccuracyTracker {
    received: AtomicU64,
    correct: AtomicU64,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, correct: bool) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if correct {
            self.correct.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Discard everything tallied so far, e.g. warmup exchanges that must
    /// not count toward the measured run.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.correct.store(0, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn correct(&self) -> u64 {
        self.correct.load(Ordering::Relaxed)
    }

    /// `None` until at least one result has been received.
    pub fn accuracy(&self) -> Option<f64> {
        let received = self.received();
        if received == 0 {
            return None;
        }
        Some(self.correct() as f64 / received as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qr(text: &str) -> QrCode {
        QrCode {
            text: text.to_string(),
            points: Vec::new(),
            bbox: None,
        }
    }

    #[test]
    fn verbatim_match_only() {
        let detections = vec![qr("other"), qr("T-42")];
        assert!(verify("T-42", &detections));
        assert!(!verify("t-42", &detections));
        assert!(!verify("T-42", &[]));
    }

    #[test]
    fn accuracy_is_undefined_without_results() {
        let tracker = AccuracyTracker::new();
        assert_eq!(tracker.accuracy(), None);
        tracker.record(true);
        tracker.record(true);
        tracker.record(false);
        assert_eq!(tracker.received(), 3);
        assert!((tracker.accuracy().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_the_tally() {
        let tracker = AccuracyTracker::new();
        tracker.record(true);
        tracker.record(false);
        tracker.reset();
        assert_eq!(tracker.received(), 0);
        assert_eq!(tracker.correct(), 0);
        assert_eq!(tracker.accuracy(), None);
    }
}
