use std::env;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hyperhdr::cli;

const VERSION: &str = git_version::git_version!(fallback = "v0.1.0");

#[paw::main]
fn main(opts: cli::Opts) -> color_eyre::eyre::Result<()> {
    // Initialize logging, default to info
    let log_var_name = "HYPERHDR_LOG";
    if env::var(log_var_name).is_err() {
        env::set_var(log_var_name, "hyperhdr=info");
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_env(log_var_name))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_error::ErrorLayer::default())
        .init();

    color_eyre::install()?;

    tracing::info!(version = %VERSION, "hyperhdrd starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()?;

    runtime.block_on(cli::run(opts))?;

    Ok(())
}
