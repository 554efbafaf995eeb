//! Plug-point that turns ready Children into live subprocesses subject to a
//! concurrency budget. The local backend is the reference implementation;
//! cluster backends are out of scope but would implement the same trait.

mod local;

pub use local::LocalScheduler;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::logger::{Logger, MessageLimits};
use std::sync::Arc;

/// Everything the scheduler needs to launch one child process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub id: String,
    pub tracking: PathBuf,
    /// 1 for a leaf Job; `min(available, expected_jobs)` for a composite.
    pub expected_jobs: u32,
    pub is_composite: bool,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Dispatches every task; must return as soon as all have been spawned,
    /// not when they complete.
    async fn launch(self: Arc<Self>, tasks: Vec<LaunchSpec>) -> anyhow::Result<()>;

    /// Blocks until every previously dispatched task has exited.
    async fn wait_for_all(&self);

    /// Exit code observed for `id`, if it has completed.
    async fn exit_code(&self, id: &str) -> Option<i32>;
}

/// Arguments common to every scheduler backend's synthesized command line.
pub struct CommandContext {
    pub parent_address: String,
    pub interval: u64,
    pub quiet: bool,
    pub all_msg: bool,
    pub limits: MessageLimits,
    pub logger: Arc<Logger>,
}

impl CommandContext {
    /// The fixed prefix of every spawned child's command line: this binary
    /// plus the flags every scheduler backend passes through unchanged.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--parent".to_string(), self.parent_address.clone()];
        args.push("--interval".to_string());
        args.push(self.interval.to_string());
        if let Some(warning) = self.limits.warning {
            args.push(format!("--limit-warning={warning}"));
        }
        args.push(format!("--limit-error={}", self.limits.error));
        args.push(format!("--limit-critical={}", self.limits.critical));
        if self.all_msg {
            args.push("--all-msg".to_string());
        }
        if self.quiet {
            args.push("--quiet".to_string());
        }
        args
    }
}
