//! Descriptor resolution
//!
//! Reference checking, startup ordering and configuration digests.

pub mod graph;
pub mod hash;
pub mod resolver;

pub use graph::{DependencyGraph, StartupPlan};
pub use resolver::{check_references, ResolvedDescriptor, ResolvedService, Resolver};
