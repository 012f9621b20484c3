//! Common types shared across the SFU components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
