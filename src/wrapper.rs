//! Leaf layer: runs one external process, ingests its stdio as log entries,
//! samples its process tree's resource usage, and reports final status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, Signal, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, OnceCell};

use crate::layer::{spawn_root_stop_listener, LayerCore, LayerHost};
use crate::logger::MessageLimits;
use crate::rpc::Router;
use crate::specs::Job;
use crate::store::ProcStatInput;
use crate::summary::Summary;
use crate::types::LogSeverity;

const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct Wrapper {
    pub core: Arc<LayerCore>,
    spec: Job,
    stop_signal: Arc<Notify>,
}

#[async_trait]
impl LayerHost for Wrapper {
    async fn summarise(&self) -> Summary {
        let mut summary = Summary::new();
        summary.sub_total = 1;
        summary.sub_active = 1;
        summary.metrics.insert(
            "messages_warning".to_string(),
            self.core.logger.warning_count() as i64,
        );
        summary.metrics.insert(
            "messages_error".to_string(),
            self.core.logger.error_count() as i64,
        );
        summary
    }
}

impl Wrapper {
    /// Builds the router this Wrapper will answer RPC requests on, then
    /// opens the layer core, then runs the job to completion. Returns the
    /// process exit code.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        spec: Job,
        ident: String,
        tracking: PathBuf,
        parent_addr: Option<String>,
        interval: u64,
        quiet: bool,
        all_msg: bool,
        verbose: bool,
        limits: MessageLimits,
        hub_url: Option<String>,
    ) -> anyhow::Result<i32> {
        let stop_signal = Arc::new(Notify::new());
        let core_cell: Arc<OnceCell<Arc<LayerCore>>> = Arc::new(OnceCell::new());

        let mut router = Router::new();
        {
            let stop_signal = stop_signal.clone();
            router.register("stop", move |_peer, _payload| {
                let stop_signal = stop_signal.clone();
                async move {
                    stop_signal.notify_one();
                    Ok(Map::new())
                }
            });
        }
        {
            let core_cell = core_cell.clone();
            router.register("ping", move |_peer, payload| {
                let core_cell = core_cell.clone();
                async move {
                    let _ = &core_cell;
                    Ok(payload)
                }
            });
        }
        {
            let core_cell = core_cell.clone();
            let ident = ident.clone();
            router.register("resolve", move |_peer, _payload| {
                let core_cell = core_cell.clone();
                let ident = ident.clone();
                async move {
                    let mut out = Map::new();
                    out.insert("ident".into(), serde_json::Value::String(ident));
                    if let Some(core) = core_cell.get() {
                        let identity = core.identity.read().await;
                        out.insert(
                            "uidx".into(),
                            serde_json::Value::String(identity.uidx.clone()),
                        );
                    }
                    Ok(out)
                }
            });
        }

        let core = LayerCore::setup(
            ident,
            tracking,
            router,
            parent_addr,
            interval,
            quiet,
            all_msg,
            verbose,
            limits,
            hub_url,
        )
        .await?;
        let _ = core_cell.set(core.clone());

        let wrapper = Arc::new(Wrapper {
            core: core.clone(),
            spec,
            stop_signal,
        });

        spawn_root_stop_listener(&core, {
            let stop_signal = wrapper.stop_signal.clone();
            move || Box::pin(async move { stop_signal.notify_one() })
        });

        let heartbeat_core = core.clone();
        let heartbeat_host: Arc<dyn LayerHost> = wrapper.clone();
        let heartbeat =
            tokio::spawn(async move { heartbeat_core.run_heartbeat(heartbeat_host).await });

        let code = wrapper.execute().await?;

        core.request_stop();
        let _ = heartbeat.await;
        core.teardown(&*wrapper, code).await;
        Ok(code)
    }

    async fn execute(self: &Arc<Self>) -> anyhow::Result<i32> {
        let cwd = self
            .spec
            .cwd
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let mut env: HashMap<String, String> = std::env::vars().collect();
        for (k, v) in &self.spec.env {
            env.insert(k.clone(), v.clone());
        }
        env.insert(
            "GATOR_PARENT".to_string(),
            self.core.server.address_string(),
        );

        self.core.store.push_attribute(
            "cmd",
            format!("{} {}", self.spec.command, self.spec.args.join(" ")),
        )?;
        self.core
            .store
            .push_attribute("cwd", cwd.to_string_lossy())?;
        if let Ok(host) = hostname() {
            self.core.store.push_attribute("host", host)?;
        }
        self.core
            .store
            .push_attribute("cores", self.spec.resources.cores.to_string())?;
        if let Some(mem) = &self.spec.resources.memory {
            self.core
                .store
                .push_attribute("memory_mb", mem.in_megabytes().to_string())?;
        }
        self.core
            .store
            .push_attribute("licenses", self.spec.resources.licenses_flat())?;

        let mut cmd = tokio::process::Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .current_dir(&cwd)
            .env_clear()
            .envs(&env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let pid = child.id();
        self.core
            .store
            .push_attribute("pid", pid.map(|p| p.to_string()).unwrap_or_default())?;
        self.core
            .store
            .push_attribute("start", Utc::now().timestamp().to_string())?;
        self.core
            .logger
            .info(format!("monitoring child PID {}", pid.unwrap_or(0)))
            .await;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_core = self.core.clone();
        let out_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let ts = Utc::now().timestamp();
                    let _ = out_core.store.push_log(LogSeverity::Info, line, ts);
                }
            }
        });
        let err_core = self.core.clone();
        let err_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let ts = Utc::now().timestamp();
                    let _ = err_core.store.push_log(LogSeverity::Error, line, ts);
                }
            }
        });

        let sampler = self.clone();
        let sampler_pid = pid;
        let sampler_interval = self.core.interval.max(Duration::from_secs(1));
        let sample_task = sampler_pid.map(|pid| {
            tokio::spawn(async move {
                sampler.sample_loop(pid, sampler_interval).await;
            })
        });

        let stop_signal = self.stop_signal.clone();
        let core = self.core.clone();
        let kill_pid = pid;
        let kill_task = tokio::spawn(async move {
            stop_signal.notified().await;
            core.request_stop();
            if let Some(pid) = kill_pid {
                terminate_with_escalation(pid).await;
            }
        });

        let status = child.wait().await?;
        kill_task.abort();
        if let Some(task) = sample_task {
            task.abort();
        }
        let _ = out_task.await;
        let _ = err_task.await;

        let code = status.code().unwrap_or(-1);
        self.core
            .logger
            .info(format!("child PID {} finished", pid.unwrap_or(0)))
            .await;
        self.core
            .store
            .push_attribute("end", Utc::now().timestamp().to_string())?;
        self.core.store.push_attribute("exit", code.to_string())?;
        Ok(code)
    }

    async fn sample_loop(self: Arc<Self>, pid: u32, interval: Duration) {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
        );
        loop {
            tokio::time::sleep(interval).await;
            sys.refresh_processes();
            let (nproc, cpu, mem, vmem) = collect_tree_stats(&sys, Pid::from_u32(pid));
            if nproc == 0 {
                continue;
            }
            let stat = ProcStatInput {
                nproc: nproc as i32,
                cpu,
                mem: mem as i64,
                vmem: vmem as i64,
                timestamp: Utc::now().timestamp(),
            };
            if let Err(e) = self.core.store.push_proc_stat(stat) {
                tracing::warn!("failed to persist process stats: {e}");
            }
        }
    }
}

fn collect_tree_stats(sys: &System, root: Pid) -> (u32, f64, u64, u64) {
    let mut children_of: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children_of.entry(parent).or_default().push(*pid);
        }
    }
    let mut nproc = 0u32;
    let mut cpu = 0f64;
    let mut mem = 0u64;
    let mut vmem = 0u64;
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if let Some(process) = sys.process(pid) {
            nproc += 1;
            cpu += f64::from(process.cpu_usage());
            mem += process.memory();
            vmem += process.virtual_memory();
        }
        if let Some(kids) = children_of.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    (nproc, cpu, mem, vmem)
}

async fn terminate_with_escalation(pid: u32) {
    let mut sys = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
    );
    sys.refresh_processes();
    if let Some(process) = sys.process(Pid::from_u32(pid)) {
        process.kill_with(Signal::Term);
    }
    tokio::time::sleep(KILL_GRACE).await;
    sys.refresh_processes();
    if let Some(process) = sys.process(Pid::from_u32(pid)) {
        process.kill_with(Signal::Kill);
    }
}

fn hostname() -> anyhow::Result<String> {
    Ok(std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string()))
}
