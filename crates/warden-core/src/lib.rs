pub mod config;
pub mod decision;
pub mod error;
pub mod execution;
pub mod executor;
pub mod explain;
pub mod export;
pub mod jobs;
pub mod ledger;
pub mod playbook;
pub mod policy;
pub mod proposal;
pub mod rbac;
pub mod retention;
pub mod routing;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;

pub use error::{Result, WardenError};
