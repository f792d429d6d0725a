//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O beyond
//! reading small lookup files. Types and functions here can be unit
//! tested without mocking.

pub mod chart;
pub mod environment;
pub mod git_url;
pub mod helmfile;
pub mod pull_request;
pub mod release;
pub mod template;
