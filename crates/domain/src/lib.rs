//! # ScanStream Domain
//!
//! Business domain types and models for ScanStream.
//!
//! This crate contains:
//! - Scan job model and lifecycle states
//! - The event taxonomy and the line-oriented wire-format parser
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other ScanStream crates
//! - No I/O and no async; everything here is pure data and pure functions

pub mod config;
pub mod errors;
pub mod events;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use events::{parse_event, EventParseError, FrameDecoder, ScanEvent};
pub use types::*;
