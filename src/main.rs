//! mirrorwatch - RBD mirror pool status cache

use std::sync::Arc;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::info;

use mirrorwatch::config::{Cli, Config};
use mirrorwatch::driver;
use mirrorwatch_cache::{
    CredentialResolver, KubeRecordSource, MirrorStore, ProcessRunner, RbdStatusFetcher,
};
use mirrorwatch_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::try_from(Cli::parse())?;
    init_logging(config.log_format)?;

    info!(
        allowed_namespaces = ?config.allowed_namespaces,
        resync_mode = ?config.resync_mode,
        ceph_config = %config.ceph_config.config.display(),
        "Starting mirrorwatch"
    );

    let client = kube_client(&config).await?;

    let mut runner = ProcessRunner::new(config.command_timeout);
    if !config.ceph_config.is_default() {
        runner = runner.with_env("CEPH_CONF", config.ceph_config.config.display().to_string());
    }

    let resolver = CredentialResolver::new(
        Arc::new(KubeRecordSource::new(client.clone())),
        config.allowed_namespaces.iter().cloned(),
    );
    let store = MirrorStore::new(
        &config.ceph_config,
        resolver,
        Arc::new(RbdStatusFetcher::new(Arc::new(runner))),
    )?
    .with_resync_mode(config.resync_mode);
    let store = Arc::new(store);

    let events = driver::namespaced_events(
        client,
        &config.allowed_namespaces,
        config.field_selector.as_deref(),
    );

    driver::run(store, events, config.resync_interval).await;

    Ok(())
}

async fn kube_client(config: &Config) -> anyhow::Result<Client> {
    match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let client_config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(client_config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}
