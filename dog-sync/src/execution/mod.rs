pub mod retry;
pub mod executor;
pub mod batch;
pub mod driver;

pub use retry::RetryPolicy;
pub use executor::{ItemExecutor, ItemOutcome};
pub use batch::{BatchProcessor, BatchReport};
pub use driver::{CancelHandle, CancelSignal, QueueDriver};
