use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use strata::cli::Cli;
use strata::rpc::{Link, Router};
use strata::specs::{self, Spec};
use strata::tier::Tier;
use strata::wrapper::Wrapper;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose() {
        std::env::set_var("RUST_BACKTRACE", "1");
    } else {
        human_panic::setup_panic!();
    }

    let default_filter = if cli.verbose() {
        "strata=debug"
    } else {
        "strata=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => {
            // A negative code means the job was killed or never started
            // (see Wrapper::execute's `unwrap_or(-1)`) rather than exiting
            // normally; clamping it to 0 would misreport that as success.
            let status = if code < 0 { 1 } else { code.min(255) as u8 };
            ExitCode::from(status)
        }
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if cli.scheduler != "local" {
        anyhow::bail!(
            "unknown scheduler backend '{}'; only 'local' is implemented",
            cli.scheduler
        );
    }
    let spec = resolve_spec(&cli).await?;
    let ident = cli
        .id
        .clone()
        .or_else(|| spec.id().map(str::to_string))
        .unwrap_or_else(|| "root".to_string());

    let tracking = cli.tracking.clone().unwrap_or_else(default_tracking_dir);
    let limits = cli.message_limits();

    if spec.is_composite() {
        Tier::run(
            spec,
            ident,
            tracking,
            cli.parent.clone(),
            cli.interval,
            cli.quiet(),
            cli.all_msg(),
            cli.verbose(),
            limits,
            cli.hub.clone(),
        )
        .await
    } else {
        let job = match spec {
            Spec::Job(job) => job,
            _ => unreachable!("non-composite spec must be a Job"),
        };
        Wrapper::run(
            job,
            ident,
            tracking,
            cli.parent.clone(),
            cli.interval,
            cli.quiet(),
            cli.all_msg(),
            cli.verbose(),
            limits,
            cli.hub.clone(),
        )
        .await
    }
}

/// Loads the spec from the positional path, or fetches it from the parent
/// by id when no path was given.
async fn resolve_spec(cli: &Cli) -> anyhow::Result<Spec> {
    if let Some(path) = &cli.spec {
        return specs::load(path);
    }
    let parent = cli
        .parent
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no spec file given and no --parent to fetch one from"))?;
    let id = cli
        .id
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("--parent without a spec file also requires --id"))?;
    let link = Link::connect(parent, Router::new()).await?;
    let yaml = link
        .call(
            "spec",
            serde_json::json!({ "id": id })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .await?;
    let yaml = yaml
        .get("spec")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parent returned no spec for id '{id}'"))?;
    let spec: Spec = serde_yaml::from_str(yaml)?;
    spec.check()?;
    Ok(spec)
}

fn default_tracking_dir() -> PathBuf {
    PathBuf::from("tracking").join(Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string())
}
