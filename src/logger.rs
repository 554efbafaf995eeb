//! Per-layer logger: writes to the console (unless quiet), persists every
//! message to the artifact store, and optionally forwards to the parent
//! over RPC. Tracks warning/error/critical counts against configured
//! limits.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use colored::Colorize;

use crate::rpc::RpcClient;
use crate::store::Store;
use crate::types::LogSeverity;

/// Maximum allowed message counts per severity before the layer's result is
/// forced to FAILURE. `None` on `warning` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageLimits {
    pub warning: Option<u32>,
    pub error: u32,
    pub critical: u32,
}

struct Counts {
    warning: AtomicI64,
    error: AtomicI64,
    critical: AtomicI64,
}

pub struct Logger {
    store: Store,
    parent: Option<RpcClient>,
    quiet: bool,
    all_msg: bool,
    verbose: bool,
    limits: MessageLimits,
    counts: Counts,
    ident: String,
}

impl Logger {
    pub fn new(
        ident: impl Into<String>,
        store: Store,
        parent: Option<RpcClient>,
        quiet: bool,
        all_msg: bool,
        verbose: bool,
        limits: MessageLimits,
    ) -> Arc<Logger> {
        Arc::new(Logger {
            store,
            parent,
            quiet,
            all_msg,
            verbose,
            limits,
            counts: Counts {
                warning: AtomicI64::new(0),
                error: AtomicI64::new(0),
                critical: AtomicI64::new(0),
            },
            ident: ident.into(),
        })
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.emit(LogSeverity::Debug, message.into()).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.emit(LogSeverity::Info, message.into()).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.counts.warning.fetch_add(1, Ordering::SeqCst);
        self.emit(LogSeverity::Warning, message.into()).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.counts.error.fetch_add(1, Ordering::SeqCst);
        self.emit(LogSeverity::Error, message.into()).await;
    }

    pub async fn critical(&self, message: impl Into<String>) {
        self.counts.critical.fetch_add(1, Ordering::SeqCst);
        self.emit(LogSeverity::Critical, message.into()).await;
    }

    async fn emit(&self, severity: LogSeverity, message: String) {
        self.relay(severity, message, Utc::now().timestamp()).await;
    }

    /// Persists, optionally echoes, and optionally forwards a message
    /// upstream, without touching this layer's own warning/error/critical
    /// counts. Used both for this layer's own messages (via `emit`, which
    /// stamps the current time) and for messages relayed on behalf of a
    /// child over the `log` RPC action (which keeps the child's timestamp).
    pub async fn relay(&self, severity: LogSeverity, message: impl Into<String>, timestamp: i64) {
        let message = message.into();
        if let Err(e) = self.store.push_log(severity, message.clone(), timestamp) {
            tracing::warn!("failed to persist log entry: {e}");
        }
        if !self.quiet && (severity != LogSeverity::Debug || self.verbose) {
            self.print_console(severity, &message);
        }
        if let Some(parent) = &self.parent {
            if self.all_msg || severity >= LogSeverity::Warning {
                let _ = parent.log(severity as i32, &message, timestamp).await;
            }
        }
    }

    fn print_console(&self, severity: LogSeverity, message: &str) {
        let line = format!("[{}] {message}", self.ident);
        match severity {
            LogSeverity::Debug => println!("{}", line.dimmed()),
            LogSeverity::Info => println!("{line}"),
            LogSeverity::Warning => println!("{}", line.yellow()),
            LogSeverity::Error => println!("{}", line.red()),
            LogSeverity::Critical => println!("{}", line.red().bold()),
        }
    }

    pub fn warning_count(&self) -> u32 {
        self.counts.warning.load(Ordering::SeqCst) as u32
    }

    pub fn error_count(&self) -> u32 {
        self.counts.error.load(Ordering::SeqCst) as u32
    }

    pub fn critical_count(&self) -> u32 {
        self.counts.critical.load(Ordering::SeqCst) as u32
    }

    /// Whether the configured limits have been exceeded — folded into a
    /// layer's final result at teardown.
    pub fn limits_exceeded(&self) -> bool {
        if let Some(limit) = self.limits.warning {
            if self.warning_count() > limit {
                return true;
            }
        }
        self.error_count() > self.limits.error || self.critical_count() > self.limits.critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("s.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn limits_exceeded_once_error_count_passes_zero_limit() {
        let (_dir, store) = temp_store();
        let logger = Logger::new(
            "t",
            store,
            None,
            true,
            false,
            false,
            MessageLimits::default(),
        );
        assert!(!logger.limits_exceeded());
        logger.error("boom").await;
        assert!(logger.limits_exceeded());
    }

    #[tokio::test]
    async fn unbounded_warning_limit_never_trips() {
        let (_dir, store) = temp_store();
        let limits = MessageLimits {
            warning: None,
            error: 100,
            critical: 100,
        };
        let logger = Logger::new("t", store, None, true, false, false, limits);
        for _ in 0..50 {
            logger.warning("w").await;
        }
        assert!(!logger.limits_exceeded());
    }
}
