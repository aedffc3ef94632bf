//! Deployment orchestration.
//!
//! This module runs the forward pipeline from uploaded config to a live
//! endpoint, and the reverse pipeline from a stored record back to nothing.

mod manager;

pub use manager::{function_tags, DeploymentManager};
