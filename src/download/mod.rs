pub mod backing_store;
pub mod callbacks;
pub mod error;
pub mod events;
pub mod executor;
pub mod http_client;
pub mod http_errors;
pub mod manager;
pub mod notify;
pub mod record;
pub mod store;

pub use error::DownloadError;
pub use events::DownloadEvent;
pub use executor::{TaskHandle, TransferExecutor, TransferOutcome, TransferReport, TransferRequest};
pub use http_client::HttpExecutor;
pub use manager::DownloadManager;
pub use record::{Callbacks, CompletionCallback, DownloadRecord, ProgressCallback, ResumeToken};
pub use store::{DurableStore, JsonFileStore, MemoryStore, StoreError};
