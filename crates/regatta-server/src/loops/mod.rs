//! Background loops for continuous processing.

pub mod maintenance_loop;
pub mod race_clock_loop;
