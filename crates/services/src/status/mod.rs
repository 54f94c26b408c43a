pub mod aggregator;
pub mod health;
pub mod selector;

use bson::oid::ObjectId;
use thiserror::Error;

use crate::dao::DaoError;

pub use aggregator::{AggregatorConfig, Derived, StreamStatusAggregator, SweepReport, derive_status};
pub use selector::{Selection, SelectionPolicy};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error(transparent)]
    Store(#[from] DaoError),
    #[error("Status document kept changing while being written")]
    ConcurrentWriteConflict,
    #[error("Camera {0} is not active")]
    CameraNotActive(ObjectId),
}
