//! Internal implementation modules for `pdmb-core`.
//!
//! Front-ends should go through `pdmb_core::api` rather than importing these
//! modules directly.

pub mod collect;
pub mod config;
pub mod distribution;
pub mod hooks;
pub mod python;
pub mod runtime;
pub mod tooling;
