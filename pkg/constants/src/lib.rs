//! Centralized constants for the profile manager.
//!
//! Label keys, fixed principals and default names live here so that the
//! controllers and the access API agree on one contract.

pub mod auth;
pub mod labels;
pub mod network;
pub mod paths;
pub mod resources;
pub mod state;
