//! Explicit typed request surface used in place of the dynamic
//! attribute-dispatch caller the RPC link's origin used: one method per
//! action, each taking and returning a concrete type. The wire action
//! string and routing are unchanged; only the caller-side ergonomics are.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Link;
use crate::summary::Summary;
use crate::types::JobResult;

fn payload_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub uidx: String,
    pub root: String,
    pub path: String,
}

/// Typed wrapper over a `Link` exposing the fixed RPC surface a layer uses
/// to talk to its parent or a child.
#[derive(Clone)]
pub struct RpcClient {
    link: Link,
}

impl RpcClient {
    pub fn new(link: Link) -> RpcClient {
        RpcClient { link }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub async fn register(&self, id: &str, server: &str) -> anyhow::Result<RegisterResponse> {
        let payload = payload_of(serde_json::json!({ "id": id, "server": server }));
        let response = self.link.call("register", payload).await?;
        Ok(serde_json::from_value(Value::Object(response))?)
    }

    pub async fn update(
        &self,
        id: &str,
        summary: &Summary,
        result: JobResult,
    ) -> anyhow::Result<()> {
        let payload = payload_of(
            serde_json::json!({ "id": id, "summary": summary, "result": result as i32 }),
        );
        self.link.call("update", payload).await?;
        Ok(())
    }

    pub async fn complete(
        &self,
        id: &str,
        code: i32,
        result: JobResult,
        summary: &Summary,
    ) -> anyhow::Result<()> {
        let payload = payload_of(serde_json::json!({
            "id": id,
            "code": code,
            "result": result as i32,
            "summary": summary,
        }));
        self.link.call("complete", payload).await?;
        Ok(())
    }

    pub async fn spec(&self, id: &str) -> anyhow::Result<String> {
        let payload = payload_of(serde_json::json!({ "id": id }));
        let response = self.link.call("spec", payload).await?;
        Ok(response
            .get("spec")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub async fn children(&self) -> anyhow::Result<Value> {
        let response = self.link.call("children", Map::new()).await?;
        Ok(Value::Object(response))
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.link.post("stop", Map::new()).await
    }

    pub async fn get_tree(&self) -> anyhow::Result<Value> {
        let response = self.link.call("get_tree", Map::new()).await?;
        Ok(Value::Object(response))
    }

    pub async fn resolve(&self, path: &str) -> anyhow::Result<Value> {
        let payload = payload_of(serde_json::json!({ "path": path }));
        let response = self.link.call("resolve", payload).await?;
        Ok(Value::Object(response))
    }

    pub async fn ping(&self, timestamp_ms: i64) -> anyhow::Result<i64> {
        let payload = payload_of(serde_json::json!({ "timestamp": timestamp_ms }));
        let response = self.link.call("ping", payload).await?;
        Ok(response
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or(timestamp_ms))
    }

    pub async fn log(&self, severity: i32, message: &str, timestamp: i64) -> anyhow::Result<()> {
        let payload = payload_of(serde_json::json!({
            "severity": severity,
            "message": message,
            "timestamp": timestamp,
        }));
        self.link.post("log", payload).await
    }
}
