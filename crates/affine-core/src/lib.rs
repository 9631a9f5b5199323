//! affine-core
//!
//! Thread-affine work queue and the single-threaded async context built on it.
//!
//! # モジュール構成
//! - **queue**: WorkQueue（MPSC FIFO）, WaitSignal, QueueState
//! - **context**: AsyncContext（専用スレッド上の drain loop）, ContextHandle, TaskHandle
//! - **config**: ContextConfig
//! - **observability**: QueueStats, DrainReport
//! - **error**: ContextError

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod queue;

pub use config::ContextConfig;
pub use context::{AsyncContext, ContextHandle, TaskHandle};
pub use error::ContextError;
pub use observability::{DrainReport, QueueStats};
pub use queue::{QueueState, WaitSignal, WorkItem, WorkQueue};
