pub mod attendance;
pub mod day_assignment;
pub mod day_pattern;
pub mod period_slot;
pub mod shift;
pub mod timetable;
