use pkg_state::{IgnoreNotFound, Registry};
use pkg_types::meta::Resource;
use tracing::info;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Unchanged,
    Created,
    Updated,
}

/// Create `base` with `mutate` applied, or apply `mutate` to the stored copy.
///
/// The stored copy is written back only when the mutation changed it, so a
/// pass over converged state performs no writes. Updates are conditional on
/// the version read here; a concurrent writer surfaces as a conflict error.
pub async fn create_or_patch<T, F>(
    registry: &Registry,
    base: T,
    mutate: F,
) -> anyhow::Result<(T, Applied)>
where
    T: Resource,
    F: FnOnce(&mut T) -> anyhow::Result<()>,
{
    let key = base.key();
    match registry.get::<T>(&key).await.ignore_not_found()? {
        None => {
            let mut obj = base;
            mutate(&mut obj)?;
            let created = registry.create(obj).await?;
            info!("Created {} {}", T::KIND, key);
            Ok((created, Applied::Created))
        }
        Some(current) => {
            let mut obj = current.clone();
            mutate(&mut obj)?;
            if obj == current {
                return Ok((current, Applied::Unchanged));
            }
            let updated = registry.update(obj).await?;
            info!("Updated {} {}", T::KIND, key);
            Ok((updated, Applied::Updated))
        }
    }
}
