//! Reference scheduler backend: runs every task on the local machine,
//! granting concurrency slots atomically (1 per leaf Job, up to
//! `expected_jobs` per composite) and re-invoking this binary per task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};

use super::{CommandContext, LaunchSpec, Scheduler};

struct State {
    concurrency: u32,
    exit_codes: HashMap<String, i32>,
}

pub struct LocalScheduler {
    state: Mutex<State>,
    update: Notify,
    ctx: CommandContext,
    monitors: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    drivers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl LocalScheduler {
    pub fn new(concurrency: u32, ctx: CommandContext) -> anyhow::Result<Arc<LocalScheduler>> {
        if concurrency < 1 {
            anyhow::bail!("invalid concurrency of {concurrency}");
        }
        Ok(Arc::new(LocalScheduler {
            state: Mutex::new(State {
                concurrency,
                exit_codes: HashMap::new(),
            }),
            update: Notify::new(),
            ctx,
            monitors: Mutex::new(Vec::new()),
            drivers: Mutex::new(Vec::new()),
        }))
    }

    fn command_for(&self, task: &LaunchSpec, granted: u32) -> Command {
        let exe = std::env::current_exe().unwrap_or_else(|_| "strata".into());
        let mut cmd = Command::new(exe);
        cmd.args(self.ctx.base_args());
        cmd.arg("--id").arg(&task.id);
        cmd.arg("--tracking").arg(&task.tracking);
        cmd.arg("--scheduler").arg("local");
        cmd.arg("--sched-arg").arg(format!("concurrency={granted}"));
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::inherit());
        cmd.stderr(std::process::Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn launch(self: Arc<Self>, tasks: Vec<LaunchSpec>) -> anyhow::Result<()> {
        self.ctx
            .logger
            .debug(format!(
                "local scheduler using concurrency of {}",
                self.state.lock().await.concurrency
            ))
            .await;
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut remaining = tasks;
            remaining.reverse();
            while let Some(task) = remaining.pop() {
                let mut slots;
                loop {
                    {
                        let mut state = scheduler.state.lock().await;
                        if state.concurrency >= 1 {
                            slots = state.concurrency;
                            state.concurrency = 0;
                            break;
                        }
                    }
                    scheduler.update.notified().await;
                }
                let granted = if task.is_composite {
                    slots.min(task.expected_jobs.max(1))
                } else {
                    1
                };
                let leftover = slots - granted;
                slots = granted;
                let _ = slots;
                scheduler
                    .ctx
                    .logger
                    .debug(format!("scheduling '{}' with {granted} slots", task.id))
                    .await;
                let mut cmd = scheduler.command_for(&task, granted);
                let id = task.id.clone();
                match cmd.spawn() {
                    Ok(mut child) => {
                        let scheduler_for_monitor = scheduler.clone();
                        let monitor = tokio::spawn(async move {
                            let status = child.wait().await;
                            let code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
                            let mut state = scheduler_for_monitor.state.lock().await;
                            state.exit_codes.insert(id.clone(), code);
                            state.concurrency += granted;
                            scheduler_for_monitor.update.notify_waiters();
                        });
                        scheduler.monitors.lock().await.push(monitor);
                        let mut state = scheduler.state.lock().await;
                        state.concurrency += leftover;
                        scheduler.update.notify_waiters();
                    }
                    Err(e) => {
                        scheduler
                            .ctx
                            .logger
                            .error(format!("failed to spawn '{}': {e}", task.id))
                            .await;
                        let mut state = scheduler.state.lock().await;
                        state.exit_codes.insert(task.id.clone(), -1);
                        state.concurrency += leftover + granted;
                        scheduler.update.notify_waiters();
                    }
                }
            }
        });
        self.drivers.lock().await.push(handle);
        Ok(())
    }

    async fn wait_for_all(&self) {
        let drivers = std::mem::take(&mut *self.drivers.lock().await);
        for driver in drivers {
            let _ = driver.await;
        }
        let monitors = std::mem::take(&mut *self.monitors.lock().await);
        for monitor in monitors {
            let _ = monitor.await;
        }
    }

    async fn exit_code(&self, id: &str) -> Option<i32> {
        self.state.lock().await.exit_codes.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{Logger, MessageLimits};
    use crate::store::Store;

    fn ctx() -> CommandContext {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("s.db")).unwrap();
        let logger = Logger::new(
            "sched",
            store,
            None,
            true,
            false,
            false,
            MessageLimits::default(),
        );
        std::mem::forget(dir);
        CommandContext {
            parent_address: "127.0.0.1:1".to_string(),
            interval: 5,
            quiet: true,
            all_msg: false,
            limits: MessageLimits::default(),
            logger,
        }
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(LocalScheduler::new(0, ctx()).is_err());
    }

    #[test]
    fn slot_grant_caps_composite_at_expected_jobs() {
        let task = LaunchSpec {
            id: "group".to_string(),
            tracking: std::env::temp_dir(),
            expected_jobs: 2,
            is_composite: true,
        };
        let granted = 4u32.min(task.expected_jobs.max(1));
        assert_eq!(granted, 2);
    }
}
