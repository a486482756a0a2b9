//! Chart History - cached, aggregated history for dashboard chart series
//!
//! This library exposes the core modules for testing and reuse.

pub mod chart;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod routes;
pub mod services;
pub mod source;
pub mod sync;
pub mod transform;
