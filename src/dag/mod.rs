// src/dag/mod.rs

//! Task dependency graph: readiness tracking and failure propagation.

pub mod graph;

pub use graph::{TaskGraph, TaskState};
