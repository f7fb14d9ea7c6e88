use acmezone::acme::client::HttpCertificateAuthority;
use acmezone::{Config, DynRecordStore, FileRecordStore, InMemoryRecordStore, Issuer, Shared};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let config_file = std::env::args().nth(1);
    let config = config_init(config_file.as_deref())?;

    let (store, file_store) = store_init(&config).await?;

    let ca = HttpCertificateAuthority::new(&config.acme_directory_url, config.acme_timeout)?;
    let issuer = Issuer::new(Arc::new(ca), store.clone(), &config);

    let mut dns_server = acmezone::new_dns(config.clone(), store.clone()).await?;
    tracing::info!("DNS listening on UDP {}", dns_server.udp_addr());
    tracing::info!("DNS listening on TCP {}", dns_server.tcp_addr());

    let (api_stop, api_stopped) = oneshot::channel::<()>();
    let api_server = acmezone::new_http(config.clone(), store.clone(), issuer, async move {
        let _ = api_stopped.await;
    })?;
    tracing::info!("API listening on {}", &config.api_bind_addr);
    let mut api_handle = tokio::spawn(api_server);

    let mut failure = None;
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        res = dns_server.stopped() => {
            failure = Some(anyhow::anyhow!("DNS server stopped: {res:?}"));
        }
        res = &mut api_handle => {
            failure = Some(anyhow::anyhow!("API server stopped: {res:?}"));
        }
    }

    let _ = api_stop.send(());
    if !dns_server.shutdown(config.shutdown_grace).await {
        tracing::warn!("DNS shutdown grace period elapsed");
    }
    if !api_handle.is_finished() {
        let _ = tokio::time::timeout(config.shutdown_grace, api_handle).await;
    }

    if let Some(file_store) = file_store {
        file_store
            .save()
            .await
            .context("saving record snapshot on shutdown")?;
    }

    match failure {
        Some(err) => Err(err),
        None => {
            tracing::info!("goodbye");
            Ok(())
        }
    }
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acmezone=info".into()),
        )
        .init();
}

fn config_init(config_file: Option<&str>) -> Result<Shared> {
    let config = Config::load(config_file.map(Path::new))?;
    match config_file {
        Some(config_file) => tracing::debug!("loaded config from {config_file}"),
        None => tracing::debug!("no config file given, using defaults and environment"),
    }
    Ok(Arc::new(config))
}

async fn store_init(config: &Config) -> Result<(DynRecordStore, Option<Arc<FileRecordStore>>)> {
    match &config.snapshot_path {
        Some(path) => {
            let file_store = Arc::new(
                FileRecordStore::try_from_file(path)
                    .await
                    .with_context(|| format!("loading record snapshot {path}"))?,
            );
            let store: DynRecordStore = file_store.clone();
            Ok((store, Some(file_store)))
        }
        None => Ok((Arc::new(InMemoryRecordStore::default()), None)),
    }
}
