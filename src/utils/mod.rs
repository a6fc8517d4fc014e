pub mod progress;
pub mod retry;

pub use progress::{ProgressCallback, ProgressStream, format_bytes, format_duration};
pub use retry::{RateLimitPolicy, RetryPolicy, RetryStrategy};
