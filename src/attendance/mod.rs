pub mod breaks;
pub mod clock;
pub mod directory;
pub mod error;
pub mod finalizer;
pub mod live;
pub mod machine;
pub mod schedule;
pub mod service;
pub mod sweeper;
pub mod ticker;

pub use error::{AttendanceError, AttendanceResult};
pub use service::AttendanceService;
