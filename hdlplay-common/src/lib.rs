//! Shared types for the hdlplay sandbox
//!
//! The message protocol spoken across the sandbox boundary, the configurations
//! that select which packages the interpreter loads, the version catalog, and
//! the share-link encoding used by front ends.

pub mod catalog;
pub mod config;
pub mod messages;
pub mod share;
pub mod waveform;

pub use catalog::*;
pub use config::*;
pub use messages::*;
pub use share::*;
pub use waveform::*;
