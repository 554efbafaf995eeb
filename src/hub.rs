//! Best-effort client for the optional external hub registry. Every call is
//! non-fatal: a failure is logged and swallowed, never propagated as an
//! error to the caller's layer.

use serde::Serialize;

use crate::summary::Summary;
use crate::types::JobResult;

#[derive(Clone)]
pub struct HubClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    ident: &'a str,
    url: &'a str,
    layer: &'a str,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>) -> HubClient {
        HubClient {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Registers this layer with the hub; returns the hub-assigned id, or
    /// `None` on any failure.
    pub async fn register(&self, ident: &str, url: &str, layer: &str) -> Option<String> {
        let endpoint = format!("{}/api/register", self.base_url.trim_end_matches('/'));
        let body = RegisterRequest { ident, url, layer };
        match self.http.post(&endpoint).json(&body).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(value) => value
                    .get("uid")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                Err(e) => {
                    tracing::debug!("hub register response unparsable: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::debug!("hub register failed: {e}");
                None
            }
        }
    }

    pub async fn heartbeat(&self, uid: &str, summary: &Summary) {
        let endpoint = format!(
            "{}/api/job/{uid}/heartbeat",
            self.base_url.trim_end_matches('/')
        );
        if let Err(e) = self.http.post(&endpoint).json(summary).send().await {
            tracing::debug!("hub heartbeat failed: {e}");
        }
    }

    pub async fn complete(&self, uid: &str, db_file: &str, result: JobResult) {
        let endpoint = format!(
            "{}/api/job/{uid}/complete",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({ "db_file": db_file, "result": result as i32 });
        if let Err(e) = self.http.post(&endpoint).json(&body).send().await {
            tracing::debug!("hub complete failed: {e}");
        }
    }
}
