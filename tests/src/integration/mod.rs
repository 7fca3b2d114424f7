//! # Integration Tests
//!
//! Flows between several nodes on one network, exercised through the public
//! `Interface` API only.

pub mod fixtures;

mod properties;
mod runtime;
mod scenarios;
