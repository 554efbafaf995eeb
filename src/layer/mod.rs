//! Shared lifecycle for both layer kinds (Tier and Wrapper): setup,
//! heartbeat loop, teardown, upward registration, message-limit
//! enforcement. A layer implements `LayerHost` to plug its own
//! `summarise()` into the generic heartbeat/teardown driver.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};

use crate::hub::HubClient;
use crate::logger::{Logger, MessageLimits};
use crate::metrics::MetricsRegister;
use crate::rpc::{Router, RpcClient, Server};
use crate::store::Store;
use crate::summary::Summary;
use crate::types::JobResult;

#[async_trait]
pub trait LayerHost: Send + Sync {
    /// Produces this layer's current summary: own counters folded with
    /// whatever is known about children so far.
    async fn summarise(&self) -> Summary;

    /// Each immediate child's last-known metrics, for recomputing this
    /// layer's GROUP scope. Empty for a leaf, which has no children.
    async fn child_metrics(&self) -> Vec<BTreeMap<String, i64>> {
        Vec::new()
    }
}

/// Identifier triple assigned once this layer registers with its parent.
#[derive(Debug, Clone)]
pub struct Identity {
    pub uidx: String,
    pub root: String,
    pub path: String,
}

pub struct LayerCore {
    pub ident: String,
    pub tracking: PathBuf,
    pub store: Store,
    pub logger: Arc<Logger>,
    pub server: Server,
    pub parent: Option<RpcClient>,
    pub hub: Option<HubClient>,
    pub hub_uid: Mutex<Option<String>>,
    pub metrics: Mutex<MetricsRegister>,
    pub limits: MessageLimits,
    pub interval: Duration,
    pub identity: RwLock<Identity>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

#[allow(clippy::too_many_arguments)]
impl LayerCore {
    pub async fn setup(
        ident: String,
        tracking: PathBuf,
        router: Router,
        parent_addr: Option<String>,
        interval: u64,
        quiet: bool,
        all_msg: bool,
        verbose: bool,
        limits: MessageLimits,
        hub_url: Option<String>,
    ) -> anyhow::Result<Arc<LayerCore>> {
        std::fs::create_dir_all(&tracking)?;
        let store = Store::open(&tracking.join(format!("{ident}.db")))?;
        let server = Server::bind(router.clone()).await?;

        let parent = match &parent_addr {
            Some(addr) => {
                let link = crate::rpc::Link::connect(addr, router).await?;
                Some(RpcClient::new(link))
            }
            None => None,
        };

        let logger = Logger::new(
            ident.clone(),
            store.clone(),
            parent.clone(),
            quiet,
            all_msg,
            verbose,
            limits,
        );

        let hub = hub_url.as_deref().map(HubClient::new);

        let (stop_tx, stop_rx) = watch::channel(false);

        let mut identity = Identity {
            uidx: ident.clone(),
            root: ident.clone(),
            path: ident.clone(),
        };

        let mut hub_uid = None;
        if let Some(client) = &parent {
            let response = client.register(&ident, &server.address_string()).await?;
            identity = Identity {
                uidx: response.uidx,
                root: response.root,
                path: response.path,
            };
        } else if let Some(hub) = &hub {
            hub_uid = hub.register(&ident, &server.address_string(), "tier").await;
        }

        for (name, value) in [
            ("uidx", identity.uidx.clone()),
            ("root", identity.root.clone()),
            ("path", identity.path.clone()),
        ] {
            store.push_attribute(name, value)?;
        }

        Ok(Arc::new(LayerCore {
            ident,
            tracking,
            store,
            logger,
            server,
            parent,
            hub,
            hub_uid: Mutex::new(hub_uid),
            metrics: Mutex::new(MetricsRegister::new()),
            limits,
            interval: Duration::from_secs(interval.max(1)),
            identity: RwLock::new(identity),
            stop_tx,
            stop_rx,
        }))
    }

    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Whether this layer has no parent to forward a stop request through.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Runs until `request_stop` is called, performing at least one more
    /// heartbeat pass after the stop signal lands before returning.
    pub async fn run_heartbeat(self: Arc<Self>, host: Arc<dyn LayerHost>) {
        let mut stop_rx = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop_rx.changed() => {}
            }
            self.heartbeat_pass(&*host).await;
            if *stop_rx.borrow() {
                break;
            }
        }
    }

    async fn heartbeat_pass(&self, host: &dyn LayerHost) {
        let summary = host.summarise().await;
        let children = host.child_metrics().await;
        {
            let mut metrics = self.metrics.lock().await;
            metrics.set_own("messages_warning", self.logger.warning_count() as i64);
            metrics.set_own("messages_error", self.logger.error_count() as i64);
            metrics.set_own("messages_critical", self.logger.critical_count() as i64);
            metrics.recompute_group(children.iter());
            if let Err(e) = metrics.sync_to_store(&self.store) {
                tracing::warn!("failed to sync metrics: {e}");
            }
        }
        let result = self.current_result(&summary);
        if let Some(parent) = &self.parent {
            if let Err(e) = parent.update(&self.ident, &summary, result).await {
                tracing::debug!("update to parent failed: {e}");
            }
        }
        if let Some(hub) = &self.hub {
            if let Some(uid) = self.hub_uid.lock().await.clone() {
                hub.heartbeat(&uid, &summary).await;
            }
        }
    }

    fn current_result(&self, summary: &Summary) -> JobResult {
        if self.logger.limits_exceeded() || summary.sub_failed > 0 {
            JobResult::Failure
        } else {
            JobResult::Unknown
        }
    }

    /// Decides the final result, persists it, sends the final `complete`
    /// upstream, and shuts down the store/server/hub registration.
    pub async fn teardown(&self, host: &dyn LayerHost, code: i32) -> JobResult {
        self.request_stop();
        let summary = host.summarise().await;
        let result = if code == 0 && !self.logger.limits_exceeded() && summary.sub_failed == 0 {
            JobResult::Success
        } else {
            JobResult::Failure
        };
        let _ = self.store.push_attribute("result", format!("{result:?}"));
        let _ = self
            .store
            .push_attribute("end", Utc::now().timestamp().to_string());
        if let Some(parent) = &self.parent {
            if let Err(e) = parent.complete(&self.ident, code, result, &summary).await {
                tracing::debug!("complete to parent failed: {e}");
            }
        }
        if let Some(hub) = &self.hub {
            if let Some(uid) = self.hub_uid.lock().await.clone() {
                hub.complete(&uid, &self.store.path().to_string_lossy(), result)
                    .await;
            }
        }
        result
    }
}

/// Installs a SIGINT/SIGTERM listener that fires `on_signal` once, but only
/// for a root layer — one with no parent to forward a `stop` through. A
/// non-root layer is stopped by its parent cascading an RPC `stop` instead.
pub fn spawn_root_stop_listener<F>(core: &Arc<LayerCore>, on_signal: F)
where
    F: FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + 'static,
{
    if !core.is_root() {
        return;
    }
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to install SIGINT handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        on_signal().await;
    });
}
