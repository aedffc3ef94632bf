//! Botfleet Control
//!
//! Deploys and tears down per-user chatbot endpoints on a serverless
//! platform. Each bot becomes one compute function, one route on a shared
//! HTTP API, and one invoke permission letting the API call the function.
//!
//! # Architecture
//!
//! - **Naming**: [`naming`] derives every external identifier for a bot
//!   from the owning user and the bot's name
//! - **Packaging**: [`package`] injects the user's config into a copy of the
//!   base archive
//! - **Function lifecycle**: [`lifecycle`] creates the function, or waits
//!   out in-flight updates and replaces its code and configuration
//! - **Routing and permissions**: [`route`] and [`permission`] expose the
//!   function publicly
//! - **Teardown**: [`teardown`] removes all three pieces, tolerating any
//!   that are already gone
//! - **Service**: [`service`] runs the HTTP API and a worker pool draining
//!   the [`queue`]
//!
//! ```text
//! config ──▶ name ──▶ archive ──▶ function ──▶ route ──▶ permission ──▶ record
//! record ──▶ delete function ──▶ delete route method ──▶ revoke permission
//! ```
//!
//! # Example
//!
//! ```ignore
//! use botfleet_control::{ControlConfig, ControlService};
//!
//! let config = ControlConfig::load()?;
//! ControlService::new(config).run().await?;
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod botconfig;
pub mod cloud;
pub mod config;
pub mod deployment;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod package;
pub mod permission;
pub mod queue;
pub mod retry;
pub mod route;
pub mod service;
pub mod store;
pub mod teardown;
pub mod types;
pub mod worker;

// Re-export commonly used types at the crate root
pub use cloud::{CloudClients, CloudConfig, CloudError, CloudProvider};
pub use config::ControlConfig;
pub use deployment::DeploymentManager;
pub use error::{ControlError, ControlResult};
pub use naming::ResolvedBotIdentity;
pub use queue::{FlightKey, TaskId, TaskQueue, TaskStatus};
pub use service::ControlService;
pub use store::{DeploymentFilter, DeploymentStore, MemoryStore};
pub use types::{
    DeployOutput, DeploymentId, DeploymentRecord, DeploymentRequest, DeploymentStatus,
    OperationOutcome, TeardownOutput, UserId,
};
pub use worker::TaskWorker;
