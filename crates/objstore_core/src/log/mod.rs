//! Durable log-structured backend.
//!
//! A single data file holds a header followed by framed records grouped
//! into transactions. See [`LogBackend`] for the concurrency model and
//! [`record`] for the on-disk format.

mod backend;
mod file;
mod index;
pub mod record;
mod replay;

pub use backend::{LogBackend, SpaceStats, VerifyReport};
