//! Operator side of a live event: network sampling, capture, the room
//! connection lifecycle and status reporting back to the API.

pub mod client;
pub mod config;
pub mod connection;
pub mod media;
pub mod network;
pub mod probe;
pub mod reporter;
pub mod retry;

pub use connection::{ConnectionManager, ConnectionState, FailureReason, ManagerConfig};
pub use media::{LocalMedia, MediaAcquirer, MediaError};
pub use network::{CaptureSettings, EffectiveType, NetworkQuality, NetworkQualitySampler};
pub use reporter::{CameraStatus, CameraStatusReporter, StatusSink, StreamQualityReport};
pub use retry::{RetryExecutor, RetryPolicy, Retryable};
