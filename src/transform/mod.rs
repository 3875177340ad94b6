//! Schedule computation and schedule-level transforms.

pub mod scheduler;
pub mod tiling;

pub use scheduler::{Schedule, ScheduleConstraints, ScheduleNode};
pub use tiling::{split_map, tile_schedule};
