//! # Watch Loop
//!
//! Turns cluster change notifications into reconcile keys.
//!
//! Four watch streams run side by side:
//!
//! | Stream       | Keys enqueued                                        |
//! |--------------|------------------------------------------------------|
//! | Namespace    | every known export (the index is updated first)      |
//! | Secret       | `Export(ns,name)` and `Import(ns,name)` when known   |
//! | SecretExport | `Export(ns,name)`                                    |
//! | SecretImport | `Import(ns,name)`                                    |
//!
//! A periodic resync enqueues every export and import listed from the store. A stream
//! that fails or ends is restarted after a delay; the restart relists, and objects that
//! vanished while the stream was down are enqueued so their copies get withdrawn.

use crate::config::SharedControllerConfig;
use crate::controller::namespaces::NamespaceIndex;
use crate::controller::reconciler::ReconcileKey;
use crate::crd::{SecretExport, SecretImport};
use crate::runtime::error_policy::handle_watch_stream_error;
use crate::runtime::workers::ReconcileQueue;
use crate::store::{ClusterStore, NamespaceMetadata, ObjectKey, StoreError};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::Api;
use kube::core::PartialObjectMeta;
use kube::Client;
use kube_runtime::{metadata_watcher, watcher};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One event from any of the watched kinds
#[derive(Debug)]
pub enum WatchEvent {
    Namespace(watcher::Event<Namespace>),
    Secret(watcher::Event<PartialObjectMeta<Secret>>),
    Export(watcher::Event<SecretExport>),
    Import(watcher::Event<SecretImport>),
}

#[derive(Debug, Default)]
struct InitBuffers {
    namespaces: Vec<NamespaceMetadata>,
    exports: BTreeSet<ObjectKey>,
    imports: BTreeSet<ObjectKey>,
}

/// Applies watch events to the namespace index and enqueues the affected keys
#[derive(Debug)]
pub struct EventDispatcher {
    queue: Arc<ReconcileQueue>,
    namespaces: NamespaceIndex,
    exports: RwLock<BTreeSet<ObjectKey>>,
    imports: RwLock<BTreeSet<ObjectKey>>,
    init: Mutex<InitBuffers>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(queue: Arc<ReconcileQueue>, namespaces: NamespaceIndex) -> Self {
        Self {
            queue,
            namespaces,
            exports: RwLock::new(BTreeSet::new()),
            imports: RwLock::new(BTreeSet::new()),
            init: Mutex::new(InitBuffers::default()),
        }
    }

    pub async fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::Namespace(event) => self.on_namespace(event).await,
            WatchEvent::Secret(event) => self.on_secret(event).await,
            WatchEvent::Export(event) => self.on_export(event).await,
            WatchEvent::Import(event) => self.on_import(event).await,
        }
    }

    async fn enqueue_all_exports(&self) {
        for key in self.exports.read().await.iter() {
            self.queue.add(ReconcileKey::Export(key.clone()));
        }
    }

    async fn on_namespace(&self, event: watcher::Event<Namespace>) {
        match event {
            watcher::Event::Init => self.init.lock().await.namespaces.clear(),
            watcher::Event::InitApply(ns) => {
                self.init
                    .lock()
                    .await
                    .namespaces
                    .push(NamespaceMetadata::from(&ns));
            }
            watcher::Event::InitDone => {
                let listed = std::mem::take(&mut self.init.lock().await.namespaces);
                info!("Namespace index synced with {} namespaces", listed.len());
                self.namespaces.replace_all(listed).await;
                self.enqueue_all_exports().await;
            }
            watcher::Event::Apply(ns) => {
                let metadata = NamespaceMetadata::from(&ns);
                if self.namespaces.get(&metadata.name).await.as_ref() == Some(&metadata) {
                    return;
                }
                debug!(namespace = %metadata.name, "Namespace metadata changed");
                self.namespaces.apply(metadata).await;
                self.enqueue_all_exports().await;
            }
            watcher::Event::Delete(ns) => {
                let name = ns.metadata.name.unwrap_or_default();
                debug!(namespace = %name, "Namespace deleted");
                self.namespaces.remove(&name).await;
                self.enqueue_all_exports().await;
            }
        }
    }

    async fn on_secret(&self, event: watcher::Event<PartialObjectMeta<Secret>>) {
        let secret = match event {
            watcher::Event::Apply(secret)
            | watcher::Event::Delete(secret)
            | watcher::Event::InitApply(secret) => secret,
            watcher::Event::Init | watcher::Event::InitDone => return,
        };
        let Some(key) = ObjectKey::of(&secret) else {
            return;
        };
        // Only secrets that back an export or hold an import's copy matter
        if self.exports.read().await.contains(&key) {
            self.queue.add(ReconcileKey::Export(key.clone()));
        }
        if self.imports.read().await.contains(&key) {
            self.queue.add(ReconcileKey::Import(key));
        }
    }

    async fn on_export(&self, event: watcher::Event<SecretExport>) {
        match event {
            watcher::Event::Init => self.init.lock().await.exports.clear(),
            watcher::Event::InitApply(export) => {
                if let Some(key) = ObjectKey::of(&export) {
                    self.init.lock().await.exports.insert(key.clone());
                    self.exports.write().await.insert(key.clone());
                    self.queue.add(ReconcileKey::Export(key));
                }
            }
            watcher::Event::InitDone => {
                let listed = std::mem::take(&mut self.init.lock().await.exports);
                let vanished = swap_known(&self.exports, listed).await;
                for key in vanished {
                    self.queue.add(ReconcileKey::Export(key));
                }
            }
            watcher::Event::Apply(export) => {
                if let Some(key) = ObjectKey::of(&export) {
                    self.exports.write().await.insert(key.clone());
                    self.queue.add(ReconcileKey::Export(key));
                }
            }
            watcher::Event::Delete(export) => {
                if let Some(key) = ObjectKey::of(&export) {
                    self.exports.write().await.remove(&key);
                    self.queue.add(ReconcileKey::Export(key));
                }
            }
        }
    }

    async fn on_import(&self, event: watcher::Event<SecretImport>) {
        match event {
            watcher::Event::Init => self.init.lock().await.imports.clear(),
            watcher::Event::InitApply(import) => {
                if let Some(key) = ObjectKey::of(&import) {
                    self.init.lock().await.imports.insert(key.clone());
                    self.imports.write().await.insert(key.clone());
                    self.queue.add(ReconcileKey::Import(key));
                }
            }
            watcher::Event::InitDone => {
                let listed = std::mem::take(&mut self.init.lock().await.imports);
                let vanished = swap_known(&self.imports, listed).await;
                for key in vanished {
                    self.queue.add(ReconcileKey::Import(key));
                }
            }
            watcher::Event::Apply(import) => {
                if let Some(key) = ObjectKey::of(&import) {
                    self.imports.write().await.insert(key.clone());
                    self.queue.add(ReconcileKey::Import(key));
                }
            }
            watcher::Event::Delete(import) => {
                if let Some(key) = ObjectKey::of(&import) {
                    self.imports.write().await.remove(&key);
                    self.queue.add(ReconcileKey::Import(key));
                }
            }
        }
    }

    /// Enqueue every export and import the store lists
    pub async fn resync(&self, store: &dyn ClusterStore) -> Result<usize, StoreError> {
        let exports: BTreeSet<ObjectKey> =
            store.list_exports().await?.iter().filter_map(ObjectKey::of).collect();
        let imports: BTreeSet<ObjectKey> =
            store.list_imports().await?.iter().filter_map(ObjectKey::of).collect();

        self.exports.write().await.extend(exports.iter().cloned());
        self.imports.write().await.extend(imports.iter().cloned());

        let total = exports.len() + imports.len();
        for key in exports {
            self.queue.add(ReconcileKey::Export(key));
        }
        for key in imports {
            self.queue.add(ReconcileKey::Import(key));
        }
        Ok(total)
    }

    pub async fn known_exports(&self) -> BTreeSet<ObjectKey> {
        self.exports.read().await.clone()
    }

    pub async fn known_imports(&self) -> BTreeSet<ObjectKey> {
        self.imports.read().await.clone()
    }
}

/// Replace a known-key set, returning keys present before but not listed now
async fn swap_known(
    known: &RwLock<BTreeSet<ObjectKey>>,
    listed: BTreeSet<ObjectKey>,
) -> Vec<ObjectKey> {
    let mut known = known.write().await;
    let vanished = known.difference(&listed).cloned().collect();
    *known = listed;
    vanished
}

type EventStream<K> = BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>;

/// Drive one watch stream until shutdown, restarting it after errors
async fn run_watch<K, S>(
    resource: &'static str,
    make_stream: S,
    wrap: fn(watcher::Event<K>) -> WatchEvent,
    dispatcher: Arc<EventDispatcher>,
    config: SharedControllerConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Send + 'static,
    S: Fn() -> EventStream<K> + Send,
{
    info!("Starting {} watch", resource);
    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut stream = make_stream();
        let delay = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stopping {} watch", resource);
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => dispatcher.handle(wrap(event)).await,
                    Some(Err(e)) => {
                        let config = config.read().await;
                        break handle_watch_stream_error(
                            resource,
                            &format!("{e:?}"),
                            config.watch_restart_delay(),
                            config.backoff_max_duration(),
                        );
                    }
                    None => {
                        let delay = config.read().await.watch_restart_delay();
                        warn!("{} watch stream ended, restarting in {:?}", resource, delay);
                        break delay;
                    }
                }
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    info!("Stopped {} watch", resource);
}

/// Start the four watch streams
pub fn start_watches(
    client: &Client,
    dispatcher: &Arc<EventDispatcher>,
    config: &SharedControllerConfig,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let exports: Api<SecretExport> = Api::all(client.clone());
    let imports: Api<SecretImport> = Api::all(client.clone());

    vec![
        tokio::spawn(run_watch(
            "Namespace",
            move || watcher(namespaces.clone(), watcher::Config::default()).boxed(),
            WatchEvent::Namespace,
            Arc::clone(dispatcher),
            config.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_watch(
            "Secret",
            move || metadata_watcher(secrets.clone(), watcher::Config::default()).boxed(),
            WatchEvent::Secret,
            Arc::clone(dispatcher),
            config.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_watch(
            "SecretExport",
            move || watcher(exports.clone(), watcher::Config::default()).boxed(),
            WatchEvent::Export,
            Arc::clone(dispatcher),
            config.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_watch(
            "SecretImport",
            move || watcher(imports.clone(), watcher::Config::default()).boxed(),
            WatchEvent::Import,
            Arc::clone(dispatcher),
            config.clone(),
            shutdown.clone(),
        )),
    ]
}

/// Periodically enqueue every export and import
pub async fn run_resync_loop(
    dispatcher: Arc<EventDispatcher>,
    store: Arc<dyn ClusterStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = period.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match dispatcher.resync(store.as_ref()).await {
                    Ok(count) => debug!(keys = count, "Periodic resync enqueued keys"),
                    Err(e) => warn!(error = %e, "Periodic resync failed to list resources"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SecretExportSpec, SecretImportSpec};
    use crate::runtime::queue::{KeyOutcome, RetryPolicy, WorkQueue};
    use kube::core::{ObjectMeta, PartialObjectMetaExt};
    use std::collections::BTreeMap;

    fn dispatcher() -> (Arc<ReconcileQueue>, NamespaceIndex, EventDispatcher) {
        let queue = WorkQueue::new(RetryPolicy {
            backoff_start: Duration::from_millis(10),
            backoff_max: Duration::from_millis(100),
            max_retries: 3,
        });
        let index = NamespaceIndex::new();
        let dispatcher = EventDispatcher::new(queue.clone(), index.clone());
        (queue, index, dispatcher)
    }

    fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        ns.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        ns
    }

    fn export(ns: &str, name: &str) -> SecretExport {
        let mut export = SecretExport::new(name, SecretExportSpec::default());
        export.metadata.namespace = Some(ns.to_string());
        export
    }

    fn import(ns: &str, name: &str) -> SecretImport {
        let mut import = SecretImport::new(
            name,
            SecretImportSpec {
                from_namespace: "src".to_string(),
            },
        );
        import.metadata.namespace = Some(ns.to_string());
        import
    }

    fn secret_meta(ns: &str, name: &str) -> PartialObjectMeta<Secret> {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        }
        .into_response_partial::<Secret>()
    }

    async fn drain(queue: &Arc<ReconcileQueue>) -> Vec<ReconcileKey> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            if let Some(key) = queue.next().await {
                queue.done(&key, KeyOutcome::Converged);
                keys.push(key);
            }
        }
        keys
    }

    #[tokio::test]
    async fn test_namespace_init_syncs_index() {
        let (queue, index, dispatcher) = dispatcher();
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::Apply(export("src", "creds"))))
            .await;
        drain(&queue).await;

        dispatcher.handle(WatchEvent::Namespace(watcher::Event::Init)).await;
        dispatcher
            .handle(WatchEvent::Namespace(watcher::Event::InitApply(namespace("a", &[]))))
            .await;
        assert!(!index.is_synced());
        dispatcher.handle(WatchEvent::Namespace(watcher::Event::InitDone)).await;

        assert!(index.is_synced());
        assert!(index.get("a").await.is_some());
        assert_eq!(
            drain(&queue).await,
            vec![ReconcileKey::Export(ObjectKey::new("src", "creds"))]
        );
    }

    #[tokio::test]
    async fn test_namespace_change_updates_index_before_enqueue() {
        let (queue, index, dispatcher) = dispatcher();
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::Apply(export("src", "creds"))))
            .await;
        drain(&queue).await;

        dispatcher
            .handle(WatchEvent::Namespace(watcher::Event::Apply(namespace(
                "a",
                &[("team", "x")],
            ))))
            .await;
        assert!(index.get("a").await.is_some());
        assert_eq!(drain(&queue).await.len(), 1);

        // Same metadata again: nothing to do
        dispatcher
            .handle(WatchEvent::Namespace(watcher::Event::Apply(namespace(
                "a",
                &[("team", "x")],
            ))))
            .await;
        assert!(queue.is_empty());

        dispatcher
            .handle(WatchEvent::Namespace(watcher::Event::Delete(namespace("a", &[]))))
            .await;
        assert!(index.get("a").await.is_none());
        assert_eq!(drain(&queue).await.len(), 1);
    }

    #[tokio::test]
    async fn test_secret_events_only_enqueue_known_keys() {
        let (queue, _index, dispatcher) = dispatcher();
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::Apply(export("src", "creds"))))
            .await;
        dispatcher
            .handle(WatchEvent::Import(watcher::Event::Apply(import("a", "creds"))))
            .await;
        drain(&queue).await;

        dispatcher
            .handle(WatchEvent::Secret(watcher::Event::Apply(secret_meta("other", "x"))))
            .await;
        assert!(queue.is_empty());

        dispatcher
            .handle(WatchEvent::Secret(watcher::Event::Apply(secret_meta("src", "creds"))))
            .await;
        dispatcher
            .handle(WatchEvent::Secret(watcher::Event::Delete(secret_meta("a", "creds"))))
            .await;
        assert_eq!(
            drain(&queue).await,
            vec![
                ReconcileKey::Export(ObjectKey::new("src", "creds")),
                ReconcileKey::Import(ObjectKey::new("a", "creds")),
            ]
        );
    }

    #[tokio::test]
    async fn test_relist_enqueues_vanished_exports() {
        let (queue, _index, dispatcher) = dispatcher();
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::Apply(export("src", "gone"))))
            .await;
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::Apply(export("src", "kept"))))
            .await;
        drain(&queue).await;

        dispatcher.handle(WatchEvent::Export(watcher::Event::Init)).await;
        dispatcher
            .handle(WatchEvent::Export(watcher::Event::InitApply(export("src", "kept"))))
            .await;
        dispatcher.handle(WatchEvent::Export(watcher::Event::InitDone)).await;

        let keys = drain(&queue).await;
        assert!(keys.contains(&ReconcileKey::Export(ObjectKey::new("src", "gone"))));
        assert!(keys.contains(&ReconcileKey::Export(ObjectKey::new("src", "kept"))));
        assert_eq!(
            dispatcher.known_exports().await,
            BTreeSet::from([ObjectKey::new("src", "kept")])
        );
    }

    #[tokio::test]
    async fn test_resync_enqueues_everything() {
        let (queue, _index, dispatcher) = dispatcher();
        let store = crate::store::MemoryStore::new();
        store.put_export("src", "creds", SecretExportSpec::default()).await;
        store.put_import("a", "creds", "src").await;
        store.put_import("b", "creds", "src").await;

        assert_eq!(dispatcher.resync(&store).await.unwrap(), 3);
        assert_eq!(drain(&queue).await.len(), 3);
        assert_eq!(dispatcher.known_imports().await.len(), 2);
    }
}
