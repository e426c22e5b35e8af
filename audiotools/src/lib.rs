//! Audiotools Core Library
//!
//! Prepares audiobook chapters for distribution: pads silence at chapter
//! boundaries, enforces a minimum bitrate, and runs the resulting FFmpeg
//! transcodes in parallel with live progress reporting.
//!
//! The command-line front end lives in the `audiotools-cli` crate.

pub mod core;

pub use crate::core::{CoreError, CoreResult};
