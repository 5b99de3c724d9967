//! Convergence of profiles and contributors into their derived resources.

pub mod apply;
pub mod contributor;
pub mod engine;
pub mod profile;
pub mod runtime;

pub use contributor::ContributorReconciler;
pub use profile::ProfileReconciler;
pub use runtime::{Controller, Reconciler};
