// src/workflow/mod.rs

//! Workflow description: data model, JSON loading, validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_workflow, parse_workflow};
pub use model::{TaskSpec, Workflow};
pub use validate::validate_workflow;
