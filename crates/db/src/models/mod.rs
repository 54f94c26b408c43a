pub mod camera_connection;
pub mod stream_status;

pub use camera_connection::*;
pub use stream_status::*;
