//! A symmetric, multiplexed RPC connection: request/response with
//! correlation ids, fire-and-forget posted messages, and server-initiated
//! pushes, all over a newline-delimited JSON byte stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{Framed, LinesCodec};

use super::envelope::Envelope;
use super::router::Router;
use crate::error::RpcError;

/// Handle to the peer on the other end of a link. Cloning is cheap; both
/// sides of a connection share the same type since the protocol is
/// symmetric.
#[derive(Clone)]
pub struct Peer(Link);

impl std::ops::Deref for Peer {
    type Target = Link;
    fn deref(&self) -> &Link {
        &self.0
    }
}

struct Inner {
    writer: Mutex<futures::stream::SplitSink<Framed<TcpStream, LinesCodec>, String>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    next_req_id: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

#[derive(Clone)]
pub struct Link(Arc<Inner>);

impl Link {
    /// Wraps an established TCP stream as a link, spawning the background
    /// read loop that dispatches inbound frames via `router`.
    pub fn new(stream: TcpStream, router: Router) -> Link {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(16 * 1024 * 1024));
        let (writer, mut reader) = framed.split();
        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_req_id: AtomicU64::new(1),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        let link = Link(inner);
        let read_link = link.clone();
        tokio::spawn(async move {
            let peer = Peer(read_link.clone());
            loop {
                match reader.next().await {
                    Some(Ok(line)) => {
                        let envelope: Envelope = match serde_json::from_str(&line) {
                            Ok(e) => e,
                            Err(e) => {
                                tracing::warn!("{}", RpcError::Decode(e.to_string()));
                                continue;
                            }
                        };
                        read_link.handle_inbound(&peer, &router, envelope).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("link read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            read_link.close().await;
        });
        link
    }

    pub async fn connect(addr: &str, router: Router) -> anyhow::Result<Link> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Link::new(stream, router))
    }

    async fn handle_inbound(&self, peer: &Peer, router: &Router, envelope: Envelope) {
        if envelope.is_response() {
            let rsp_id = envelope.rsp_id.unwrap();
            let sender = self.0.pending.lock().await.remove(&rsp_id);
            match sender {
                Some(sender) => {
                    let _ = sender.send(envelope);
                }
                None => {
                    if let Some(fallback) = router.fallback() {
                        let mut payload = envelope.payload.clone();
                        payload.insert("rsp_id".into(), Value::from(rsp_id));
                        if let Some(result) = &envelope.result {
                            payload.insert("result".into(), Value::String(result.clone()));
                        }
                        if let Some(reason) = &envelope.reason {
                            payload.insert("reason".into(), Value::String(reason.clone()));
                        }
                        let _ = fallback(peer.clone(), payload).await;
                    } else {
                        tracing::debug!("dropping unmatched response for rsp_id {rsp_id}");
                    }
                }
            }
            return;
        }
        if envelope.action.is_empty() {
            if let Some(req_id) = envelope.req_id {
                if !envelope.posted {
                    let mut payload = Map::new();
                    payload.insert("tool".into(), Value::String("strata".into()));
                    payload.insert(
                        "version".into(),
                        Value::String(env!("CARGO_PKG_VERSION").into()),
                    );
                    let _ = self.send(Envelope::success(req_id, payload)).await;
                }
            }
            return;
        }
        let result = router
            .dispatch(peer.clone(), &envelope.action, envelope.payload)
            .await;
        if envelope.posted {
            if let Err(e) = result {
                tracing::warn!("posted action '{}' failed: {e}", envelope.action);
            }
            return;
        }
        if let Some(req_id) = envelope.req_id {
            let reply = match result {
                Ok(payload) => Envelope::success(req_id, payload),
                Err(e) => Envelope::failure(req_id, e.to_string()),
            };
            let _ = self.send(reply).await;
        }
    }

    async fn send(&self, envelope: Envelope) -> anyhow::Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(RpcError::LinkClosed.into());
        }
        let text = serde_json::to_string(&envelope)?;
        let mut writer = self.0.writer.lock().await;
        writer
            .send(text)
            .await
            .map_err(|e| anyhow::anyhow!("link write failed: {e}"))
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        let mut pending = self.0.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Envelope::failure(0, "link closed"));
        }
    }

    /// Sends a request and awaits its matching response.
    pub async fn call(
        &self,
        action: &str,
        payload: Map<String, Value>,
    ) -> anyhow::Result<Map<String, Value>> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(RpcError::LinkClosed.into());
        }
        let req_id = self.0.next_req_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().await.insert(req_id, tx);
        self.send(Envelope::request(req_id, action, payload, false))
            .await?;
        let response = rx.await.map_err(|_| RpcError::LinkClosed)?;
        if response.is_error() {
            return Err(RpcError::HandlerFailed {
                action: action.to_string(),
                reason: response
                    .reason
                    .unwrap_or_else(|| "unknown error".to_string()),
            }
            .into());
        }
        Ok(response.payload)
    }

    /// Sends a fire-and-forget message; no response is expected.
    pub async fn post(&self, action: &str, payload: Map<String, Value>) -> anyhow::Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let req_id = self.0.next_req_id.fetch_add(1, Ordering::SeqCst);
        self.send(Envelope::request(req_id, action, payload, true))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}
