//! The wire envelope shared by every frame sent over a link.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsp_id: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub posted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Envelope {
    pub fn request(
        req_id: u64,
        action: impl Into<String>,
        payload: Map<String, Value>,
        posted: bool,
    ) -> Envelope {
        Envelope {
            action: action.into(),
            payload,
            req_id: Some(req_id),
            posted,
            ..Default::default()
        }
    }

    pub fn success(rsp_id: u64, payload: Map<String, Value>) -> Envelope {
        Envelope {
            rsp_id: Some(rsp_id),
            result: Some("success".to_string()),
            payload,
            ..Default::default()
        }
    }

    pub fn failure(rsp_id: u64, reason: impl Into<String>) -> Envelope {
        Envelope {
            rsp_id: Some(rsp_id),
            result: Some("error".to_string()),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.rsp_id.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.result.as_deref() == Some("error")
    }
}
