//! Command line interface of the hyperhdrd daemon

use std::path::PathBuf;

use structopt::StructOpt;
use thiserror::Error;

use crate::{
    global::{Event, Global},
    image::global_pool,
    instance::{Instance, InstanceError, InstanceHandle},
    models,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "hyperhdrd", about = "HyperHDR ambient lighting daemon")]
pub struct Opts {
    /// Path to the configuration file
    #[structopt(short, long, parse(from_os_str), default_value = "hyperhdr.json")]
    pub config: PathBuf,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] models::ConfigError),
    #[error("instance error: {0}")]
    Instance(#[from] InstanceError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(opts: Opts) -> Result<(), CliError> {
    let config = models::Config::read(&opts.config)?;

    global_pool().configure(
        config.video_memory_manager.enable,
        config.video_memory_manager.buffer_size as _,
    );

    let global = Global::new();
    global.send_event(Event::Start).await;

    let mut instances: Vec<(InstanceHandle, tokio::task::JoinHandle<_>)> = Vec::new();
    for instance_config in config
        .instances
        .into_iter()
        .filter(|instance| instance.instance.enabled)
    {
        let name = instance_config.instance.friendly_name.clone();
        let (instance, handle) = Instance::new(global.clone(), instance_config).await?;

        info!(name = %name, "starting instance");
        instances.push((handle, tokio::spawn(instance.run())));
    }

    if instances.is_empty() {
        warn!("no enabled instances in configuration");
        return Ok(());
    }

    wait_for_shutdown().await?;

    // Every instance drives a final black frame on its way out
    global.send_event(Event::Stop).await;
    for (_, join) in instances {
        match join.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(error = %error, "instance terminated with error"),
            Err(error) => warn!(error = %error, "instance task panicked"),
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<(), std::io::Error> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("got SIGINT, terminating");
        },
        _ = sigterm.recv() => {
            info!("got SIGTERM, terminating");
        },
    }

    Ok(())
}
