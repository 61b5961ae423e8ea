use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::adapter::{AdapterSelect, DetectExchange};
use crate::report::{build_report, AggregateReport};
use crate::sample::SampleCollector;

/// Run a fixed total number of exchanges across `concurrency` workers.
/// Workers claim request indices from a shared atomic counter, so each
/// index is executed exactly once and adapter selection by index parity is
/// deterministic regardless of completion order.
pub async fn run_fixed_count(
    select: Arc<AdapterSelect>,
    total_requests: u64,
    concurrency: usize,
) -> Result<AggregateReport> {
    if concurrency == 0 {
        return Err(anyhow!("concurrency must be greater than zero"));
    }

    let collector = Arc::new(SampleCollector::new());
    let next_index = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let progress = spawn_progress(Arc::clone(&collector), Some(total_requests), start);

    let mut join_set = JoinSet::new();
    for worker_id in 0..concurrency {
        let select = Arc::clone(&select);
        let collector = Arc::clone(&collector);
        let next_index = Arc::clone(&next_index);
        join_set.spawn(async move {
            loop {
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                if index >= total_requests {
                    break;
                }
                let sample = select.for_index(index).execute(worker_id).await;
                collector.append(sample);
            }
        });
    }

    let joined = join_workers(join_set).await;
    progress.abort();
    let _ = progress.await;
    joined?;

    let elapsed = start.elapsed();
    finalize(collector, elapsed)
}

/// Run exchanges until the deadline passes. The deadline is checked only
/// before starting a new exchange; an exchange already in flight is allowed
/// to finish, so elapsed time lands in `[duration, duration + per-call
/// timeout]`.
pub async fn run_duration_bound(
    select: Arc<AdapterSelect>,
    concurrency: usize,
    duration: Duration,
) -> Result<AggregateReport> {
    if concurrency == 0 {
        return Err(anyhow!("concurrency must be greater than zero"));
    }
    if duration.is_zero() {
        return Err(anyhow!("duration must be greater than zero"));
    }

    let collector = Arc::new(SampleCollector::new());
    let next_index = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let deadline = start + duration;

    let progress = spawn_progress(Arc::clone(&collector), None, start);

    let mut join_set = JoinSet::new();
    for worker_id in 0..concurrency {
        let select = Arc::clone(&select);
        let collector = Arc::clone(&collector);
        let next_index = Arc::clone(&next_index);
        join_set.spawn(async move {
            while Instant::now() < deadline {
                let index = next_index.fetch_add(1, Ordering::Relaxed);
                let sample = select.for_index(index).execute(worker_id).await;
                collector.append(sample);
            }
        });
    }

    let joined = join_workers(join_set).await;
    progress.abort();
    let _ = progress.await;
    joined?;

    let elapsed = start.elapsed();
    finalize(collector, elapsed)
}

/// Execute `count` exchanges with results discarded, priming connections
/// and caches before a measured run.
pub async fn run_warmup(adapter: &dyn DetectExchange, count: u64) {
    for index in 0..count {
        let sample = adapter.execute(0).await;
        debug!(index, success = sample.success, "warmup exchange completed");
    }
}

async fn join_workers(mut join_set: JoinSet<()>) -> Result<()> {
    while let Some(join_result) = join_set.join_next().await {
        join_result.map_err(|err| anyhow!("worker task failed: {}", err))?;
    }
    Ok(())
}

fn finalize(collector: Arc<SampleCollector>, elapsed: Duration) -> Result<AggregateReport> {
    // Every worker has been joined; the collector is exclusively ours now.
    let collector = Arc::try_unwrap(collector)
        .map_err(|_| anyhow!("collector still shared after workers were joined"))?;
    let samples = collector.into_samples();
    Ok(build_report(&samples, elapsed))
}

/// Periodic live progress. Reads only the collector's atomic length
/// counter, never the sample vector itself.
fn spawn_progress(
    collector: Arc<SampleCollector>,
    planned_total: Option<u64>,
    start: Instant,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        interval.tick().await;
        loop {
            interval.tick().await;
            let completed = collector.len();
            let elapsed_secs = start.elapsed().as_secs_f64();
            match planned_total {
                Some(total) => info!(completed, total, elapsed_secs, "run progress"),
                None => info!(completed, elapsed_secs, "run progress"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RequestSample;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct InstantStub;

    #[async_trait]
    impl DetectExchange for InstantStub {
        async fn execute(&self, _worker_id: usize) -> RequestSample {
            RequestSample::succeeded(Duration::from_micros(10))
        }
    }

    /// Records the peak number of concurrently executing exchanges.
    struct InFlightProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlightProbe {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DetectExchange for InFlightProbe {
        async fn execute(&self, _worker_id: usize) -> RequestSample {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            RequestSample::succeeded(Duration::from_millis(2))
        }
    }

    #[tokio::test]
    async fn fixed_count_executes_exactly_the_requested_total() {
        let select = Arc::new(AdapterSelect::Single(Arc::new(InstantStub)));
        let report = run_fixed_count(select, 50, 1).await.unwrap();
        assert_eq!(report.total, 50);
        assert_eq!(report.successes, 50);
        assert_eq!(report.failures, 0);
        assert!(report.qps > 0.0);
    }

    #[tokio::test]
    async fn in_flight_exchanges_never_exceed_concurrency() {
        let probe = Arc::new(InFlightProbe::new());
        let select = Arc::new(AdapterSelect::Single(
            Arc::clone(&probe) as Arc<dyn DetectExchange>
        ));
        let report = run_fixed_count(select, 40, 3).await.unwrap();
        assert_eq!(report.total, 40);
        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {} exceeded concurrency", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn duration_bound_checks_deadline_before_starting_only() {
        let select = Arc::new(AdapterSelect::Single(Arc::new(InstantStub)));
        let duration = Duration::from_millis(200);
        let start = Instant::now();
        let report = run_duration_bound(select, 3, duration).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= duration);
        assert!(report.total > 0);
        assert_eq!(report.successes, report.total);
    }

    #[tokio::test]
    async fn warmup_discards_results() {
        let probe = Arc::new(InFlightProbe::new());
        run_warmup(probe.as_ref(), 5).await;
        // Nothing to assert on a collector: warmup never touches one. The
        // probe just proves the adapter actually ran.
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn worker_panic_surfaces_as_an_error_without_leaking_tasks() {
        struct PanickingStub;

        #[async_trait]
        impl DetectExchange for PanickingStub {
            async fn execute(&self, _worker_id: usize) -> RequestSample {
                panic!("adapter blew up");
            }
        }

        let select = Arc::new(AdapterSelect::Single(Arc::new(PanickingStub)));
        let result = run_fixed_count(select, 4, 2).await;
        assert!(result.is_err());
        // The progress task must be gone by the time the error returns;
        // a fresh run on the same runtime proceeds normally.
        let select = Arc::new(AdapterSelect::Single(Arc::new(InstantStub)));
        let report = run_fixed_count(select, 5, 1).await.unwrap();
        assert_eq!(report.total, 5);
    }

    #[tokio::test]
    async fn rejects_zero_concurrency() {
        let select = Arc::new(AdapterSelect::Single(Arc::new(InstantStub)));
        assert!(run_fixed_count(Arc::clone(&select), 10, 0).await.is_err());
        assert!(run_duration_bound(select, 0, Duration::from_millis(10))
            .await
            .is_err());
    }
}
