pub mod command;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod media;
pub mod results;
pub mod session;
pub mod status;

pub use self::media::MediaFactory;
pub use self::results::ResultSet;
pub use self::session::{Controller, Quality};
pub use status::{StatusBoard, StatusSink};
