//! Testing utilities
//!
//! An in-memory [`MockSwfService`] that scripts poll results and records
//! every call, plus builders for execution histories and tasks.
//!
//! # Example
//!
//! ```ignore
//! use flowlane::testing::{HistoryBuilder, MockSwfService};
//! use serde_json::json;
//!
//! let history = HistoryBuilder::new()
//!     .workflow_started(json!([3, 4]))
//!     .activity_scheduled("sum-0", "sum", "1.0")
//!     .build();
//! let service = MockSwfService::new();
//! ```

mod builders;
mod mock_service;

pub use builders::{activity_task, decision_page, HistoryBuilder};
pub use mock_service::{MockSwfService, ServiceCall};
