//! Command-line surface: one binary re-invoked for every layer in the tree,
//! so every flag here also has to be reproducible by `scheduler::CommandContext`.

use std::path::PathBuf;

use clap::Parser;

use crate::logger::MessageLimits;

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    author,
    version,
    about = "Hierarchical job execution and monitoring"
)]
pub struct Cli {
    /// Path to the spec file. Optional when `--parent` is set: the spec is
    /// then fetched from the parent by id instead.
    pub spec: Option<PathBuf>,

    /// Overrides the id carried in the spec.
    #[arg(long)]
    pub id: Option<String>,

    /// Upstream RPC endpoint; enables linked mode.
    #[arg(long)]
    pub parent: Option<String>,

    /// Heartbeat cadence in seconds.
    #[arg(long, default_value_t = 5)]
    pub interval: u64,

    /// Artifact store directory. Defaults to `./tracking/<ISO timestamp>`.
    #[arg(long)]
    pub tracking: Option<PathBuf>,

    /// Suppresses console log output.
    #[arg(long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Forwards all messages upstream regardless of severity.
    #[arg(long = "all-msg", action = clap::ArgAction::Count)]
    pub all_msg: u8,

    /// Shows DEBUG messages and, on crash, local variables.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Enables terminal progress display. Out of scope; parsed and ignored.
    #[arg(long, action = clap::ArgAction::Count)]
    pub progress: u8,

    /// Scheduler backend selection.
    #[arg(long, default_value = "local")]
    pub scheduler: String,

    /// Repeatable backend-specific option, `KEY=VALUE`.
    #[arg(long = "sched-arg")]
    pub sched_arg: Vec<String>,

    /// Maximum WARNING messages before the layer is forced to FAILURE. Unset is unbounded.
    #[arg(long = "limit-warning")]
    pub limit_warning: Option<u32>,

    /// Maximum ERROR messages before the layer is forced to FAILURE.
    #[arg(long = "limit-error", default_value_t = 0)]
    pub limit_error: u32,

    /// Maximum CRITICAL messages before the layer is forced to FAILURE.
    #[arg(long = "limit-critical", default_value_t = 0)]
    pub limit_critical: u32,

    /// URL of an external hub registry. Best-effort; failures never fatal.
    #[arg(long)]
    pub hub: Option<String>,
}

impl Cli {
    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            warning: self.limit_warning,
            error: self.limit_error,
            critical: self.limit_critical,
        }
    }

    pub fn quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn all_msg(&self) -> bool {
        self.all_msg > 0
    }

    pub fn verbose(&self) -> bool {
        self.verbose > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["strata", "spec.yaml"]);
        assert_eq!(cli.spec, Some(PathBuf::from("spec.yaml")));
        assert_eq!(cli.interval, 5);
        assert_eq!(cli.scheduler, "local");
        assert_eq!(cli.limit_error, 0);
    }

    #[test]
    fn parses_repeated_sched_args_and_counted_flags() {
        let cli = Cli::parse_from([
            "strata",
            "--parent",
            "127.0.0.1:9000",
            "--sched-arg",
            "concurrency=4",
            "--sched-arg",
            "pool=default",
            "--quiet",
            "--verbose",
        ]);
        assert_eq!(cli.spec, None);
        assert_eq!(cli.parent.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cli.sched_arg, vec!["concurrency=4", "pool=default"]);
        assert!(cli.quiet());
        assert!(cli.verbose());
        assert!(!cli.all_msg());
    }

    #[test]
    fn message_limits_reflect_flags() {
        let cli = Cli::parse_from([
            "strata",
            "spec.yaml",
            "--limit-warning",
            "10",
            "--limit-error",
            "2",
        ]);
        let limits = cli.message_limits();
        assert_eq!(limits.warning, Some(10));
        assert_eq!(limits.error, 2);
        assert_eq!(limits.critical, 0);
    }
}
