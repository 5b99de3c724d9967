pub mod client;
pub mod error;
pub mod registry;
pub mod watch;

pub use error::{IgnoreNotFound, StoreError, StoreResult};
pub use registry::{ListParams, Registry};
