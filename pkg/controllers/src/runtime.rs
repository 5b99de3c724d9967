use async_trait::async_trait;
use pkg_constants::state::{REGISTRY_PREFIX, REQUEUE_BACKOFF_BASE_MS, REQUEUE_BACKOFF_MAX_MS};
use pkg_state::watch::{EventLog, WatchEvent};
use pkg_types::config::ManagerConfig;
use pkg_types::meta::{ObjectKey, ObjectMeta, Resource};
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tracing::{Instrument, debug, info, info_span, warn};

/// A level-triggered reconciler driven by `Controller`.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Converge the object at `key`. A missing object is not an error.
    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()>;

    /// Keys of every primary object, enqueued on each resync.
    async fn list_keys(&self) -> anyhow::Result<Vec<ObjectKey>>;

    /// Keys to enqueue for a registry change.
    fn map_event(&self, event: &WatchEvent) -> Vec<ObjectKey>;
}

/// Split `/registry/<plural>/[<namespace>/]<name>` into the plural and the object key.
pub fn parse_registry_key(key: &str) -> Option<(&str, ObjectKey)> {
    let rest = key.strip_prefix(REGISTRY_PREFIX)?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [plural, name] if !name.is_empty() => Some((*plural, ObjectKey::cluster(*name))),
        [plural, ns, name] if !ns.is_empty() && !name.is_empty() => {
            Some((*plural, ObjectKey::namespaced(*ns, *name)))
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    metadata: ObjectMeta,
}

/// Key of the `O` controlling the object in `event`, if any.
pub fn controller_key<O: Resource>(event: &WatchEvent) -> Option<ObjectKey> {
    let (_, key) = parse_registry_key(&event.key)?;
    let meta = event.decode::<Envelope>()?.metadata;
    let owner = meta.controller().filter(|r| r.kind == O::KIND)?;
    if O::NAMESPACED {
        Some(ObjectKey::namespaced(key.namespace?, owner.name.clone()))
    } else {
        Some(ObjectKey::cluster(owner.name.clone()))
    }
}

fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let ms = REQUEUE_BACKOFF_BASE_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(ms.min(REQUEUE_BACKOFF_MAX_MS))
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    /// Re-added while in flight; queued again once the pass ends.
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

/// De-duplicating work queue with at most one in-flight pass per key.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Wait for the next key and mark it in flight.
    pub async fn next(&self) -> ObjectKey {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Finish a pass. A failed key is re-added after a growing delay.
    pub async fn done(self: &Arc<Self>, key: &ObjectKey, succeeded: bool) {
        let retry_after = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(key);
            let dirty = state.dirty.remove(key);
            if succeeded {
                state.failures.remove(key);
                if !dirty {
                    return;
                }
                None
            } else {
                let failures = state.failures.entry(key.clone()).or_insert(0);
                *failures += 1;
                Some(backoff(*failures))
            }
        };

        match retry_after {
            None => self.add(key.clone()).await,
            Some(delay) => {
                debug!("Requeueing {} in {}ms", key, delay.as_millis());
                let queue = Arc::clone(self);
                let key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.add(key).await;
                });
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drives a `Reconciler` from registry events and periodic resync.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    events: EventLog,
    workers: usize,
    resync_interval: Duration,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: R, events: EventLog, config: &ManagerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            events,
            workers: config.workers.max(1),
            resync_interval: Duration::from_secs(config.resync_interval_secs.max(1)),
        }
    }

    /// Run until `shutdown` flips or its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        info!(
            "{} controller started (workers={}, resync={}s)",
            name,
            self.workers,
            self.resync_interval.as_secs()
        );

        let queue = Arc::new(WorkQueue::new());
        let mut events = self.events.subscribe();
        let workers: Vec<_> = (0..self.workers)
            .map(|_| {
                tokio::spawn(worker(
                    self.reconciler.clone(),
                    queue.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        // First tick fires immediately and enqueues everything already stored.
        let mut resync = tokio::time::interval(self.resync_interval);
        loop {
            tokio::select! {
                _ = resync.tick() => match self.reconciler.list_keys().await {
                    Ok(keys) => {
                        debug!("{} resync: {} objects", name, keys.len());
                        for key in keys {
                            queue.add(key).await;
                        }
                    }
                    Err(e) => warn!("{} resync failed: {:#}", name, e),
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        for key in self.reconciler.map_event(&event) {
                            queue.add(key).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("{} controller missed {} events, resyncing", name, missed);
                        resync.reset_immediately();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        for handle in workers {
            if let Err(e) = handle.await {
                warn!("{} worker exited abnormally: {}", name, e);
            }
        }
        info!("{} controller stopped", name);
    }
}

async fn worker<R: Reconciler>(
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let key = tokio::select! {
            key = queue.next() => key,
            _ = shutdown.changed() => return,
        };
        let span = info_span!("reconcile", controller = reconciler.name(), key = %key);
        let result = reconciler.reconcile(&key).instrument(span).await;
        if let Err(e) = &result {
            warn!("{} reconcile of {} failed: {:#}", reconciler.name(), key, e);
        }
        queue.done(&key, result.is_ok()).await;
    }
}
