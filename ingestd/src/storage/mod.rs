//! Durable storage of accepted uploads.
//!
//! The pieces here are independent of HTTP and are composed per request by [`crate::ingest`]:
//!
//! - [`directory`]: lazy, race-free bootstrap of the upload root ([`StorageDirectory`])
//! - [`naming`]: collision-resistant destination names ([`NameGenerator`])
//! - [`filter`]: declared content type check ([`ContentFilter`])
//! - [`writer`]: streaming, cleanup-on-failure writes ([`StorageWriter`], [`StoredFile`])
//!
//! Files live in a single flat directory. Each write target is unique by construction, so
//! concurrent writers never coordinate beyond the one-time directory bootstrap.

pub mod directory;
pub mod filter;
pub mod naming;
pub mod writer;

pub use directory::StorageDirectory;
pub use filter::ContentFilter;
pub use naming::{NameGenerator, TimestampNameGenerator};
pub use writer::{Reservation, StorageWriter, StoredFile};
