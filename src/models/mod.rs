//! Data models

pub mod device;
pub mod threat;
pub mod activity_log;

pub use device::*;
pub use threat::*;
pub use activity_log::*;
