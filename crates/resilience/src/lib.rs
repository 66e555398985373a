/// Retry and timeout helpers shared by the ingest and worker services.
///
/// - **Retry**: exponential backoff with jitter for transient infrastructure
///   failures (dedup backend, stream backend, document store, dead-letter
///   sink).
/// - **Timeout**: enforces deadlines on the suspension points each service
///   blocks on (stream reads, bulk inserts, acknowledgements, dedup calls).
pub mod retry;
pub mod timeout;

pub use retry::{RetryConfig, RetryOutcome, with_retry};
pub use timeout::{TimeoutConfig, TimeoutError, with_timeout, with_timeout_result};
