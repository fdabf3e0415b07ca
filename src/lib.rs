//! RA Longevity Backend Library
//!
//! Exposes the run lifecycle, configuration and the HTTP adapter for use by
//! binaries and tests.

pub mod api;
pub mod config;
pub mod longevity;
pub mod middleware;
