use anyhow::{Result, bail};

use crate::profile::Profile;

const MAX_NAME_LEN: usize = 63;

/// Validate a DNS-label style name, as required for namespaces.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        bail!(
            "name '{}' exceeds {} characters (got {})",
            name,
            MAX_NAME_LEN,
            name.len()
        );
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        bail!(
            "name '{}' contains '{}'; only lowercase letters, digits and hyphens are allowed",
            name,
            c
        );
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    Ok(())
}

/// Checks applied to a profile submitted through the access API.
pub fn validate_profile(profile: &Profile) -> Result<()> {
    validate_name(&profile.metadata.name)?;
    let owner = &profile.spec.owner;
    if owner.kind.is_empty() {
        bail!("profile '{}' must declare an owner kind", profile.metadata.name);
    }
    if owner.name.trim().is_empty() {
        bail!("profile '{}' must declare an owner name", profile.metadata.name);
    }
    Ok(())
}
