//! Output generation for the run's digest.
//!
//! The pipeline core produces [`crate::models::NewsRecord`]s; this module
//! renders them for delivery. Only the Markdown digest lives here; mail
//! transport is somebody else's job and consumes the same records.

pub mod markdown;
