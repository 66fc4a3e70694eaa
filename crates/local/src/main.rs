use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use common::provider::ProviderBase;
use stratus_daemon::{process, Server, ServiceConfig};
use stratus_local::{LocalProvider, ROOT_VAR};

#[derive(Parser, Debug)]
#[command(name = "stratus-provider-local")]
#[command(about = "Storage provider daemon serving a local directory")]
struct Args {
    /// Well-known bus name to claim
    #[arg(long, default_value = "org.stratus.Provider.Local")]
    bus_name: String,

    /// Directory served as the provider root (defaults to $STRATUS_ROOT)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Directory for log files (stdout only if not set)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // empty service id: fixed mode, the single account 0
    let mut config = ServiceConfig::new(args.bus_name, "");
    config.log_dir = args.log_dir;

    let _log_guards = process::init_logging(&config);
    process::register_panic_logger(&config);
    process::report_build_info();

    let root = args
        .root
        .or_else(|| std::env::var_os(ROOT_VAR).map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no provider root: pass --root or set {ROOT_VAR}"))?;
    let provider = Arc::new(LocalProvider::new(&root)?);
    tracing::info!(root = %provider.root().display(), "serving local provider root");

    let server = Server::new(
        config,
        move || Arc::clone(&provider) as Arc<dyn ProviderBase>,
        None,
    )
    .await?;
    server.run().await?;
    Ok(())
}
