//! Deployment descriptor model and loading
//!
//! This module reads compose-format descriptors, substitutes variables,
//! merges overlay files and interprets the mount, port and restart syntaxes.

pub mod interpolate;
pub mod model;
pub mod mount;
pub mod parser;
pub mod port;
pub mod restart;

pub use model::{Document, Service, VolumeConfig};
pub use mount::{Mount, MountKind};
pub use parser::DescriptorParser;
pub use port::{PortMapping, PortRange, Protocol};
pub use restart::RestartPolicy;
