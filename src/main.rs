use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use endpoint_host::config::environment::{build_environment, encode_environment_block_bytes, EnvironmentPolicy};
use endpoint_host::config::{ConfigStore, HostContext, ENVIRONMENT_PREFIX};
use endpoint_host::endpoint::{ClassId, RpcError, E_FAIL};
use endpoint_host::rpc::{LocalRegistry, WorkerServer};
use endpoint_host::settings::HostSettings;
use endpoint_host::supervisor::ProcessSupervisor;

const USAGE: &str = "\
Usage: endpoint-host <command> [options]

Commands:
  show <config> [--all]                      Print resolved configuration values
  env <config> [--raw]                       Print the environment the worker would receive
  activate <config> [--settings <file>]      Activate the worker endpoint and probe it
  serve --class-id <id> [--registry <dir>]   Run a demo worker (echo, pid, shutdown)
";

/// Parsed command line.
struct Args {
    command: String,
    positional: Vec<String>,
    flags: Vec<String>,
    options: BTreeMap<String, String>,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let command = raw.next().unwrap_or_default();
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut options = BTreeMap::new();
        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--all" | "--raw" => flags.push(arg),
                "--settings" | "--class-id" | "--registry" => {
                    let value = raw.next().with_context(|| format!("{} requires a value", arg))?;
                    options.insert(arg, value);
                }
                a if a.starts_with("--") => bail!("unknown option '{}'", a),
                _ => positional.push(arg),
            }
        }
        Ok(Self {
            command,
            positional,
            flags,
            options,
        })
    }

    fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f == name)
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match self.positional.as_slice() {
            [path] => Ok(PathBuf::from(path)),
            _ => bail!("'{}' expects exactly one config file\n\n{}", self.command, USAGE),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;

    let settings_path = args
        .option("--settings")
        .map(PathBuf::from)
        .unwrap_or_else(HostSettings::default_path);
    let settings = HostSettings::load(&settings_path)?;

    // RUST_LOG 우선, 없으면 설정 파일의 log_filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command.as_str() {
        "show" => show(&args),
        "env" => env(&args),
        "activate" => activate(&args, &settings).await,
        "serve" => serve(&args, &settings).await,
        "" | "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn open_store() -> anyhow::Result<ConfigStore> {
    let host = HostContext::capture().context("locating the host executable")?;
    Ok(ConfigStore::new(host))
}

fn show(args: &Args) -> anyhow::Result<()> {
    let store = open_store()?;
    let config = store.get_config(args.config_path()?)?;
    let all = args.flag("--all");

    let sorted: BTreeMap<_, _> = config
        .values()
        .iter()
        .filter(|(k, _)| all || !k.starts_with(ENVIRONMENT_PREFIX))
        .collect();
    let mut out = std::io::stdout().lock();
    for (key, value) in sorted {
        writeln!(out, "{}={}", key, value)?;
    }
    Ok(())
}

fn env(args: &Args) -> anyhow::Result<()> {
    let store = open_store()?;
    let config = store.get_config(args.config_path()?)?;
    let environment = build_environment(&config, &EnvironmentPolicy::from_config(&config));

    let mut out = std::io::stdout().lock();
    if args.flag("--raw") {
        out.write_all(&encode_environment_block_bytes(&environment))?;
    } else {
        for (name, value) in &environment {
            writeln!(out, "{}={}", name, value)?;
        }
    }
    out.flush()?;
    Ok(())
}

async fn activate(args: &Args, settings: &HostSettings) -> anyhow::Result<()> {
    let store = open_store()?;
    let config = store.get_config(args.config_path()?)?;
    let registry = LocalRegistry::new(settings.registry_dir());
    let supervisor = ProcessSupervisor::new(Arc::new(registry), settings.supervisor_options());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, cancelling activation");
                cancel.cancel();
            }
        });
    }

    let endpoint = supervisor
        .activate(&config, &cancel)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.error_code(), e))?;
    let alive = supervisor.is_alive(&config)?;
    let type_info = endpoint.type_info_count().map_err(|e| anyhow::anyhow!(e))?;

    println!(
        "{}",
        json!({
            "success": true,
            "config": config.source_path(),
            "alive": alive,
            "type_info_count": type_info,
        })
    );
    Ok(())
}

async fn serve(args: &Args, settings: &HostSettings) -> anyhow::Result<()> {
    let class_id: ClassId = args
        .option("--class-id")
        .context("serve requires --class-id")?
        .parse()?;
    let registry_dir = args
        .option("--registry")
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.registry_dir());

    let stop = Arc::new(Notify::new());
    let handler = {
        let stop = stop.clone();
        move |method: &str, params: &[Value]| -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(Value::Array(params.to_vec())),
                "pid" => Ok(json!(std::process::id())),
                "shutdown" => {
                    stop.notify_one();
                    Ok(Value::Null)
                }
                other => Err(RpcError::new(E_FAIL, format!("unknown method '{}'", other))),
            }
        }
    };

    let server = WorkerServer::start(LocalRegistry::new(registry_dir), class_id, handler)
        .with_context(|| format!("starting worker for {}", class_id))?;
    tracing::info!("Serving {} on {}", class_id, server.address());

    tokio::select! {
        _ = stop.notified() => tracing::info!("Shutdown requested"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl+C received"),
    }
    // give the shutdown reply time to reach the host
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(server);
    Ok(())
}
