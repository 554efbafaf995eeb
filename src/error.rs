//! Typed error enums for seams where callers need to match on a specific
//! failure kind. Free-form context at the application boundary still goes
//! through `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("link closed")]
    LinkClosed,
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("handler for '{action}' failed: {reason}")]
    HandlerFailed { action: String, reason: String },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ChildStateError {
    #[error("child '{0}' registered twice")]
    DuplicateRegister(String),
    #[error("child '{0}' updated after completion")]
    UpdateAfterComplete(String),
    #[error("child '{0}' completed twice")]
    DuplicateComplete(String),
    #[error("unknown child id '{0}'")]
    UnknownChild(String),
    #[error("dependency '{0}' does not exist among siblings")]
    UnknownDependency(String),
    #[error("dependency cycle detected involving '{0}'")]
    DependencyCycle(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("store operation failed: {0}")]
    Operation(#[from] diesel::result::Error),
}
