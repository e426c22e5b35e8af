//! Audio Analysis Module
//!
//! Silence analysis for chapter boundaries and chapter file discovery.

mod chapters;
mod silence;

pub use chapters::*;
pub use silence::*;
