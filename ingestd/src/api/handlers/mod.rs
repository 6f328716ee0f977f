//! Route handlers.
//!
//! - [`uploads`]: reports the outcome of an ingested upload request

pub mod uploads;
