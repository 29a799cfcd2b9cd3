//! Common utilities and types shared across KAT components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for case-insensitive, multi-valued HTTP header maps
pub mod headers;

/// Module for common configuration
pub mod config;

/// Module for the echo backend wire contract
pub mod echo;

/// Module for tracing subscriber initialization
pub mod observability;
