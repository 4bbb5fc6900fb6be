//! # chatd
//!
//! Chat relay server binary: loads settings, wires the hub, sinks, sweeper
//! and HTTP server together, and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_auth::{IdentityResolver, TokenTable};
use chat_core::logging::init_subscriber;
use chat_server::hub::{Hub, HubConfig};
use chat_server::sink::{ArchiveWriter, DigestSink, LogSink, SendmailSink};
use chat_server::sweeper::run_sweeper;
use chat_server::{ChatServer, ServerConfig, ShutdownCoordinator};
use chat_settings::{ChatSettings, MailSettings};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, info, warn};

/// Group chat relay server.
#[derive(Parser, Debug)]
#[command(name = "chatd", about = "Group chat relay server")]
struct Cli {
    /// Settings file (default `~/.config/chat/chatd.json`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_config: bool,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(chat_settings::settings_path)
    }

    /// Command-line flags win over every settings layer.
    fn apply(&self, settings: &mut ChatSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

fn digest_sink(mail: &MailSettings) -> Arc<dyn DigestSink> {
    if mail.admin_email.is_empty() {
        info!("no admin email configured, digests go to the log");
        Arc::new(LogSink)
    } else {
        info!(to = %mail.admin_email, "digests mailed via sendmail");
        Arc::new(SendmailSink::new(&mail.sendmail_path, &mail.admin_email))
    }
}

/// A started relay.
struct Running {
    addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
}

/// Build every component from `settings` and start serving.
async fn start(settings: &ChatSettings, metrics: Option<PrometheusHandle>) -> Result<Running> {
    let work_dir = PathBuf::from(&settings.server.work_dir);
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("failed to create work dir: {}", work_dir.display()))?;

    let tokens = TokenTable::from_file(work_dir.join("tokens.json"))
        .context("failed to load token table")?;
    if tokens.is_empty() {
        warn!(dir = %work_dir.display(), "token table is empty");
    }
    let resolver: Arc<dyn IdentityResolver> = Arc::new(tokens);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let (archive, archive_task) = ArchiveWriter::spawn(work_dir.join("history.html"));
    let (hub, hub_task) = Hub::new(
        HubConfig::from_settings(settings),
        Arc::clone(&resolver),
        digest_sink(&settings.mail),
    )
    .with_archive(archive)
    .spawn(shutdown.token());
    shutdown.track("hub", hub_task);
    shutdown.track("archive", archive_task);

    let config = ServerConfig::from_settings(settings);
    {
        let hub = hub.clone();
        let interval = config.sweep_interval();
        let cancel = shutdown.token();
        shutdown.track(
            "sweeper",
            tokio::spawn(async move {
                let exit = run_sweeper(hub, interval, cancel).await;
                debug!(?exit, "sweeper stopped");
            }),
        );
    }

    let mut server = ChatServer::new(config, hub, resolver, Arc::clone(&shutdown));
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let addr = server.listen().await.context("failed to bind server")?;

    Ok(Running { addr, shutdown })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings_path();
    let mut settings = chat_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = match chat_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let running = start(&settings, metrics).await?;
    info!("chatd listening on http://{}", running.addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    let stuck = running.shutdown.drain().await;
    if stuck.is_empty() {
        info!("shutdown complete");
    } else {
        warn!(?stuck, "shutdown finished with aborted tasks");
    }
    Ok(())
}
