//! Blocking-to-async execution bridge.
//!
//! [`ExecutionBridge`] owns one dedicated worker thread running a
//! single-threaded tokio runtime. Any number of synchronous caller threads
//! submit work with [`ExecutionBridge::submit_and_wait`] and block until the
//! work resolves, fails or times out. The worker is started on first use and
//! rebuilt on demand if it has stopped.

pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::ExecutionBridge;
pub use config::{BridgeConfig, TimeoutPolicy};
pub use error::{BoxError, BridgeError, WorkPanicked};
