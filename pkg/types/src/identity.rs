//! Identity codec: maps free-form user identities to label-safe values.

use md5::{Digest, Md5};

/// Label-safe digest of a user identity: 32 lowercase hex characters.
///
/// Identities such as e-mail addresses contain characters that are illegal
/// in label values, so derived resources are labeled with this digest and
/// looked up by equality on it.
pub fn hash(identity: &str) -> String {
    hex::encode(Md5::digest(identity.as_bytes()))
}

/// The part of `identity` before the first `@`.
///
/// Not unique across domains; callers scope the result by namespace.
pub fn local_name(identity: &str) -> &str {
    identity.split('@').next().unwrap_or(identity)
}
