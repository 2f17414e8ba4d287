//! Jobtree Core - workspace bootstrap and batch system dispatch
//!
//! This crate creates or reloads the on-disk workspace of a job tree
//! (configuration, environment snapshot, job records), and builds the
//! batch system that executes jobs: a local worker pool, a cluster queue,
//! or two of them combined and split by memory request.

pub mod adapters;
pub mod config;
pub mod environment;
pub mod error;
pub mod launch;
pub mod persist;
pub mod router;
pub mod state;
pub mod workspace;

pub use adapters::{BatchSystem, BatchSystemKind, JobId, JobSubmission, JobUpdate};
pub use config::{LogLevel, TreeConfig};
pub use error::{JobTreeError, Result};
pub use launch::JobTreeCommand;
pub use router::{BatchSystemHandle, BatchSystemSpec};
pub use state::{Job, JobStore};
pub use workspace::{resolve, ResolveMode, ResolveOptions, Resolved, Workspace};
