//! Berth - deployment descriptor interpreter
//!
//! Berth reads compose-format multi-container descriptors and checks them
//! without running anything. It provides:
//!
//! - Parsing with variable interpolation and multi-file merging
//! - Typed interpretation of mounts, ports and restart policies
//! - Reference resolution and dependency-ordered startup plans
//! - Whole-document validation reports
//! - Per-service configuration digests

pub mod descriptor;
pub mod error;
pub mod resolve;
pub mod settings;
pub mod validate;

pub use error::{BerthError, Result};
