pub mod control;
pub mod pacing;
pub mod scheduler;
pub mod status;
pub mod universe;

pub use control::SweepController;
pub use scheduler::{SchedulerConfig, SweepScheduler};
pub use status::SweepStatus;
pub use universe::WorkQueue;
