//! Descriptor validation
//!
//! Runs every rule over a document and reports all findings at once.

pub mod finding;
pub mod validator;

pub use finding::{Finding, Report, Rule, Severity};
pub use validator::{ValidationOptions, Validator};
