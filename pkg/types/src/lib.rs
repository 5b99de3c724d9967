pub mod authorization;
pub mod binding;
pub mod config;
pub mod contributor;
pub mod identity;
pub mod meta;
pub mod namespace;
pub mod profile;
pub mod quota;
pub mod rbac;
pub mod serviceaccount;
pub mod validate;
