//! Management API integration for voice-agent
//!
//! Provides:
//! - `ManageApiClient`: envelope-aware HTTP client with retry
//! - `RetryPolicy`: error-kind keyed retry schedule
//! - `ChatReporter`: fire-and-forget transcript reporting

pub mod client;
pub mod error;
pub mod reporter;
pub mod retry;

pub use client::{parse_envelope, ChatHistoryApi, ChatReport, ManageApiClient};
pub use error::{ErrorKind, ReportError};
pub use reporter::ChatReporter;
pub use retry::RetryPolicy;
