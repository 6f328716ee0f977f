//! Response models.

pub mod uploads;
