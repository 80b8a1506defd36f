pub mod attendance;
pub mod common;
pub mod role;
pub mod schedule;
pub mod timetable;
pub mod wire;
