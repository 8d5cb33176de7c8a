pub mod job;
pub mod usage;
