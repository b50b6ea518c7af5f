//! # Pulse Common Library
//!
//! Shared code for the Pulse churn service:
//! - Common error types
//! - Configuration loading and data folder resolution
//! - Risk segment thresholds
//! - Minimal CSV reading/writing for the transaction schema

pub mod config;
pub mod csv;
pub mod error;
pub mod risk;

pub use error::{Error, Result};
pub use risk::{RiskSegment, RiskThresholds};
