pub mod capture;
pub mod config;
pub mod data_manager;
pub mod models;
pub mod packet_capture;
pub mod packet_parser;
pub mod web_server;

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("web server error: {0}")]
    WebServer(String),
    /// A reassembled stream produced a frame length no real message can
    /// have. The stream is unrecoverably misaligned; callers are expected
    /// to terminate the process.
    #[error("frame stream corrupted: length {0:#x} exceeds limit")]
    FrameCorruption(u32),
}

pub type Result<T> = std::result::Result<T, MeterError>;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall clock in Unix milliseconds, the timestamp unit used across
/// the statistics engine and the history snapshots.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
