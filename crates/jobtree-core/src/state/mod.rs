//! Job records - one file per pending or active job.

mod job;
mod store;

pub use job::Job;
pub use store::JobStore;
