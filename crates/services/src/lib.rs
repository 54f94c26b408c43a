pub mod auth;
pub mod channel;
pub mod dao;
pub mod status;
pub mod store;

pub use auth::{CameraClaims, CameraRole, TokenError, TokenVerifier};
pub use channel::{
    ChannelConfig, ChannelError, StatusEventKind, StatusHub, StatusMessage, Subscription,
};
pub use status::{AggregationError, AggregatorConfig, StreamStatusAggregator, SweepReport};
pub use store::{CameraStore, MemoryCameraStore, MemoryStatusStore, StatusStore, StatusUpdate};
