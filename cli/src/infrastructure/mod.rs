//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Git operations
//! - Git provider REST API
//! - Kubernetes API
//! - Helm chart search
//! - Pipeline activity tracking

pub mod activity;
pub mod git;
pub mod github;
pub mod helm;
pub mod k8s;
pub mod scm;
