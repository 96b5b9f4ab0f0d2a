//! Shared types for the Sandwich Hub services.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for logging configuration shared by service binaries
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
