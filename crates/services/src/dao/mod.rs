pub mod base;
pub mod camera;
pub mod stream_status;

pub use base::{BaseDao, DaoError, DaoResult};
pub use camera::CameraDao;
pub use stream_status::StreamStatusDao;
