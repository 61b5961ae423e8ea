pub mod adapter;
pub mod cache;
pub mod config;
pub mod report;
pub mod runner;
pub mod sample;
pub mod session;
pub mod verify;
pub mod wire;

pub use adapter::{AdapterSelect, DetectExchange, SyncAdapter, SyncApi};
pub use cache::{EncodedImage, ImageCache, PayloadEncoder};
pub use config::{BenchConfig, Protocol, RunMode};
pub use report::{build_report, AggregateReport, Distribution};
pub use runner::{run_duration_bound, run_fixed_count, run_warmup};
pub use sample::{ErrorKind, RequestSample, SampleCollector, SampleError};
pub use session::{SessionState, StreamAdapter, StreamSession};
pub use verify::{verify, AccuracyTracker};
