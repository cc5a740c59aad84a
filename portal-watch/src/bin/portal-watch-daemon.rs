// portal-watch-daemon: background poller for the placement portal
//
// Responsibilities:
// - Log into the portal and keep the session alive across polls
// - Fetch the company listing on a fixed interval and detect new entries
// - Send an alert (email or terminal) for every batch of new entries
// - Rewrite status.json after every cycle for the CLI
// - Hold daemon.pid so only one instance polls at a time

use anyhow::{Context, Result};
use portal_watch_lib::monitor::{
    config::{AlertChannel, Config},
    email::EmailNotifier,
    http_portal::HttpPortalConnector,
    notify::{Notifier, TerminalNotifier},
    persistence::{InstanceLock, StatusFile},
    runner::MonitorLoop,
    session::SessionSupervisor,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "portal_watch_lib=info,portal_watch_daemon=info";

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables win
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    config
        .ensure_dirs()
        .with_context(|| format!("Failed to create state directory: {}", config.state_dir.display()))?;

    let lock = InstanceLock::acquire(&config.pid_file)?;

    let notifier: Box<dyn Notifier> = match &config.alerts {
        AlertChannel::Email(mail) => {
            let notifier = EmailNotifier::new(mail).context("Invalid email settings")?;
            info!(from = %mail.from, recipients = mail.to.len(), relay = %mail.smtp_host, "Email alerts enabled");
            Box::new(notifier)
        }
        AlertChannel::Terminal => {
            info!("Terminal alerts enabled");
            Box::new(TerminalNotifier::stdout())
        }
    };

    let connector = HttpPortalConnector::new(config.portal.clone(), config.session.op_timeout);
    let supervisor = SessionSupervisor::new(
        connector,
        config.portal.credentials.clone(),
        config.session.clone(),
    );

    let mut monitor = MonitorLoop::new(supervisor, notifier, config.monitor.clone())
        .with_status_file(StatusFile::new(&config.status_file));

    info!(
        portal = %config.portal.base_url,
        listing = %config.portal.listing_path,
        pid = std::process::id(),
        "Daemon started"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown requested, stopping after the current cycle");
        let _ = stop_tx.send(true);
    });

    monitor.run(stop_rx).await;

    if let Err(e) = lock.release() {
        error!(error = %e, "Failed to clean up PID file");
    }

    info!("Daemon stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM from `portal-watch stop`.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    let _ = signal::ctrl_c().await;
}
