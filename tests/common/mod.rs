//! Common test utilities for collection-dl integration tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod fakes;

pub use config::*;
#[allow(unused_imports)]
pub use fakes::*;
