//! Typed client for `smartctl`: S.M.A.R.T. queries, self-test start and
//! abort, and progress tracking for running self-tests.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;

pub use error::{DeviceError, QueryError, TestError};
