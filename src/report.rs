use std::collections::BTreeMap;
use std::time::Duration;

use crate::sample::RequestSample;

/// Latency distribution in milliseconds. Percentiles use the nearest-rank
/// convention, `sorted[floor(n * p / 100)]` clamped to the last element,
/// matching prior reports exactly (no interpolation).
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Distribution {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            mean,
            median: nearest_rank(&sorted, 50),
            min: sorted[0],
            max: sorted[count - 1],
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
        })
    }
}

fn nearest_rank(sorted: &[f64], percentile: usize) -> f64 {
    let index = (sorted.len() * percentile / 100).min(sorted.len() - 1);
    sorted[index]
}

#[derive(Clone, Debug)]
pub struct AggregateReport {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub elapsed: Duration,
    /// Successful exchanges per second of wall-clock run time.
    pub qps: f64,
    /// Client-observed total latency over successful samples.
    pub client_latency: Option<Distribution>,
    /// Per-phase latency over the samples that measured each phase.
    pub phases: BTreeMap<&'static str, Distribution>,
    /// Distributions of the service's self-reported timings.
    pub server_reported: BTreeMap<String, Distribution>,
    /// Failure counts grouped by normalized error-kind label.
    pub errors: BTreeMap<String, u64>,
    pub mean_response_size: Option<f64>,
}

/// Consume a frozen sample sequence and derive the aggregate report.
/// Arrival order is irrelevant; only the multiset of values matters.
pub fn build_report(samples: &[RequestSample], elapsed: Duration) -> AggregateReport {
    let total = samples.len();
    let successes = samples.iter().filter(|sample| sample.success).count();
    let failures = total - successes;

    let elapsed_secs = elapsed.as_secs_f64();
    let qps = if elapsed_secs > 0.0 {
        successes as f64 / elapsed_secs
    } else {
        0.0
    };

    let latencies: Vec<f64> = samples
        .iter()
        .filter(|sample| sample.success)
        .map(|sample| sample.total_time.as_secs_f64() * 1000.0)
        .collect();
    let client_latency = Distribution::from_values(&latencies);

    let mut phase_values: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        for (phase, elapsed) in &sample.phase_times {
            phase_values
                .entry(phase)
                .or_default()
                .push(elapsed.as_secs_f64() * 1000.0);
        }
    }
    let phases = phase_values
        .into_iter()
        .filter_map(|(phase, values)| Distribution::from_values(&values).map(|d| (phase, d)))
        .collect();

    let mut server_values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        for (metric, value) in &sample.server_reported {
            server_values
                .entry(metric.clone())
                .or_default()
                .push(*value);
        }
    }
    let server_reported = server_values
        .into_iter()
        .filter_map(|(metric, values)| Distribution::from_values(&values).map(|d| (metric, d)))
        .collect();

    let mut errors: BTreeMap<String, u64> = BTreeMap::new();
    for sample in samples.iter().filter(|sample| !sample.success) {
        let label = sample
            .error
            .as_ref()
            .map(|error| error.kind.label().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        *errors.entry(label).or_insert(0) += 1;
    }

    let sizes: Vec<f64> = samples
        .iter()
        .filter_map(|sample| sample.response_size)
        .map(|size| size as f64)
        .collect();
    let mean_response_size = if sizes.is_empty() {
        None
    } else {
        Some(sizes.iter().sum::<f64>() / sizes.len() as f64)
    };

    AggregateReport {
        total,
        successes,
        failures,
        elapsed,
        qps,
        client_latency,
        phases,
        server_reported,
        errors,
        mean_response_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{ErrorKind, SampleError, PHASE_TRANSFER};

    fn ok_sample(ms: u64) -> RequestSample {
        RequestSample::succeeded(Duration::from_millis(ms))
            .with_phase(PHASE_TRANSFER, Duration::from_millis(ms))
    }

    fn failed_sample(kind: ErrorKind) -> RequestSample {
        RequestSample::failed(Duration::from_millis(1), SampleError::new(kind, "boom"))
    }

    #[test]
    fn nearest_rank_percentiles_match_prior_reports() {
        let dist = Distribution::from_values(&[10.0, 20.0, 30.0, 40.0, 50.0]).unwrap();
        assert_eq!(dist.median, 30.0);
        assert_eq!(dist.p95, 50.0);
        assert_eq!(dist.p99, 50.0);
        assert_eq!(dist.min, 10.0);
        assert_eq!(dist.max, 50.0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let values: Vec<f64> = (0..137).map(|v| ((v * 37) % 101) as f64).collect();
        let dist = Distribution::from_values(&values).unwrap();
        assert!(dist.min <= dist.median);
        assert!(dist.median <= dist.p95);
        assert!(dist.p95 <= dist.p99);
        assert!(dist.p99 <= dist.max);
    }

    #[test]
    fn empty_values_yield_no_distribution() {
        assert!(Distribution::from_values(&[]).is_none());
    }

    #[test]
    fn counts_balance_and_qps_uses_successes() {
        let samples = vec![
            ok_sample(10),
            ok_sample(20),
            failed_sample(ErrorKind::Transport),
        ];
        let report = build_report(&samples, Duration::from_secs(2));
        assert_eq!(report.total, 3);
        assert_eq!(report.successes + report.failures, report.total);
        assert_eq!(report.failures, 1);
        assert!((report.qps - 1.0).abs() < 1e-9);
        assert!(report.phases.contains_key(PHASE_TRANSFER));
    }

    #[test]
    fn error_histogram_groups_by_kind() {
        let samples = vec![
            failed_sample(ErrorKind::Transport),
            failed_sample(ErrorKind::Transport),
            failed_sample(ErrorKind::Protocol),
            failed_sample(ErrorKind::Handshake),
        ];
        let report = build_report(&samples, Duration::from_secs(1));
        assert_eq!(report.errors["TransportError"], 2);
        assert_eq!(report.errors["ProtocolError"], 1);
        assert_eq!(report.errors["HandshakeError"], 1);
        assert_eq!(report.successes, 0);
        assert!(report.client_latency.is_none());
    }

    #[test]
    fn all_failure_runs_still_report() {
        let samples = vec![failed_sample(ErrorKind::Application)];
        let report = build_report(&samples, Duration::from_secs(1));
        assert_eq!(report.total, 1);
        assert_eq!(report.qps, 0.0);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn server_reported_metrics_aggregate_when_present() {
        let mut with_stats = ok_sample(10);
        with_stats
            .server_reported
            .insert("detection_time_ms".to_string(), 3.5);
        let samples = vec![with_stats, ok_sample(20)];
        let report = build_report(&samples, Duration::from_secs(1));
        let dist = &report.server_reported["detection_time_ms"];
        assert_eq!(dist.count, 1);
        assert_eq!(dist.mean, 3.5);
    }
}
