//! Dispatches inbound request frames to registered handlers by action name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::Peer;
use crate::error::RpcError;

pub type HandlerResult = anyhow::Result<Map<String, Value>>;
type BoxFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;
pub(crate) type Handler = Arc<dyn Fn(Peer, Map<String, Value>) -> BoxFuture<'static> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Router {
    handlers: HashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Registers a handler for `action`. Actions are matched lowercase.
    pub fn register<F, Fut>(&mut self, action: &str, handler: F)
    where
        F: Fn(Peer, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |peer, payload| Box::pin(handler(peer, payload)));
        self.handlers.insert(action.to_ascii_lowercase(), handler);
    }

    /// Sets the handler invoked when an action isn't registered, or when a
    /// response frame's `rsp_id` matches no pending request.
    pub fn set_fallback<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Peer, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |peer, payload| {
            Box::pin(handler(peer, payload))
        }));
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.handlers.contains_key(&action.to_ascii_lowercase())
    }

    pub fn fallback(&self) -> Option<&Handler> {
        self.fallback.as_ref()
    }

    pub async fn dispatch(
        &self,
        peer: Peer,
        action: &str,
        payload: Map<String, Value>,
    ) -> HandlerResult {
        match self.handlers.get(&action.to_ascii_lowercase()) {
            Some(handler) => handler(peer, payload).await,
            None => match &self.fallback {
                Some(fallback) => fallback(peer, payload).await,
                None => Err(RpcError::UnknownAction(action.to_string()).into()),
            },
        }
    }
}
