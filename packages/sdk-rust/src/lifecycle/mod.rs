//! Node lifecycle: per-side connection status and the background tasks that
//! keep it current.

pub mod heartbeat;
pub mod status;

pub use heartbeat::{HeartbeatPublisher, LifecycleTask, StatusPoller};
pub use status::{Side, Status, StatusBoard, StatusChange, StatusError};
