//! Portal Watchdog: keep a captive-portal network logged in.

mod config;
mod document;
mod error;
mod html;
mod login;
mod monitor;
mod notify;
mod probe;
mod service;
#[cfg(test)]
mod testing;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use config::{CredentialSource, EnvCredentials};
use html::HttpBrowser;
use login::{LoginTimings, PortalLoginClient};
use monitor::{Exit, Monitor, MonitorConfig, MonitorState};
use notify::{DesktopNotifier, LogNotifier, Notifier};
use probe::{ConnectivityCheck, ConnectivityProbe, ProbeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "portal-watchdog",
    about = "Keep a captive-portal network logged in",
    long_about = "Periodically checks internet access. If the connection is captured by a web-login portal, fills in and submits the portal form, then verifies access came back."
)]
struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Run once: check network once, try logging in once if captured, then exit (no loop)
    #[arg(long, short = '1', alias = "single")]
    pub once: bool,

    /// Check interval in seconds
    #[arg(long, default_value_t = monitor::DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Portal login page
    #[arg(long, default_value = login::DEFAULT_PORTAL_URL)]
    pub portal_url: String,

    /// Probe URL; should answer with real content only when online
    #[arg(long, default_value = probe::DEFAULT_PROBE_URL)]
    pub probe_url: String,

    /// Host the probe must end up on (subdomains count)
    #[arg(long, default_value = probe::DEFAULT_PROBE_HOST)]
    pub probe_host: String,

    /// Text the genuine probe page contains
    #[arg(long, default_value = probe::DEFAULT_PROBE_MARKER)]
    pub probe_marker: String,

    /// Probe timeout in seconds
    #[arg(long, default_value_t = probe::DEFAULT_PROBE_TIMEOUT_SECS)]
    pub probe_timeout: u64,

    /// Seconds to wait after the portal page loads
    #[arg(long, default_value_t = login::DEFAULT_PAGE_SETTLE_SECS)]
    pub page_settle: u64,

    /// Seconds to wait after submitting before verifying
    #[arg(long, default_value_t = login::DEFAULT_SUBMIT_SETTLE_SECS)]
    pub submit_settle: u64,

    /// Ceiling for one whole login attempt, in seconds
    #[arg(long, default_value_t = login::DEFAULT_LOGIN_TIMEOUT_SECS)]
    pub login_timeout: u64,

    /// Seconds to wait before re-checking after a successful login
    #[arg(long, default_value_t = monitor::DEFAULT_CONFIRM_DELAY_SECS)]
    pub confirm_delay: u64,

    /// User-Agent sent to the portal
    #[arg(long, default_value = html::DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Portal account (overrides the config file)
    #[arg(long, env = config::USERNAME_VAR)]
    pub username: Option<String>,

    /// Portal password (overrides the config file)
    #[arg(long, env = config::PASSWORD_VAR, hide_env_values = true)]
    pub password: Option<String>,

    /// Whether a --boot start keeps running (overrides the config file)
    #[arg(long, env = config::AUTO_START_VAR, value_parser = BoolishValueParser::new())]
    pub auto_start: Option<bool>,

    /// Env file with PORTAL_USERNAME / PORTAL_PASSWORD / PORTAL_AUTO_START;
    /// default: first of ~/.config/portal-watchdog/.env, /etc/portal-watchdog/.env, ./.env
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Started by the service manager: exit unless auto-start is enabled
    #[arg(long)]
    pub boot: bool,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Show alerts as desktop notifications
    #[arg(long)]
    pub notify: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a per-user service that starts the watchdog at login
    Install {
        /// Env file the service reads
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Remove the registered service
    Uninstall,
    /// Show whether the service is running
    Status,
}

impl Cli {
    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            url: self.probe_url.clone(),
            expected_host: self.probe_host.clone(),
            marker: self.probe_marker.clone(),
            timeout: Duration::from_secs(self.probe_timeout),
        }
    }

    fn login_timings(&self) -> LoginTimings {
        LoginTimings {
            page_settle: Duration::from_secs(self.page_settle),
            submit_settle: Duration::from_secs(self.submit_settle),
            attempt_timeout: Duration::from_secs(self.login_timeout),
        }
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.interval),
            confirm_delay: Duration::from_secs(self.confirm_delay),
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()),
    );
    match log_file {
        Some(path) => {
            let path = config::expand_home(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn run_command(command: &Command) -> anyhow::Result<()> {
    let installer = service::ServiceInstaller::new()?;
    match command {
        Command::Install { config } => installer.install(config),
        Command::Uninstall => installer.uninstall(),
        Command::Status => installer.status(),
    }
}

/// Cancel `shutdown` on Ctrl-C, or SIGTERM from a service manager
async fn wait_for_stop(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Stop signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    if let Some(command) = &cli.command {
        return run_command(command);
    }

    let env_file = config::locate_env_file(cli.config.as_deref())?;
    match &env_file {
        Some(path) => tracing::info!("Using config file {}", path.display()),
        None => tracing::warn!("No config file found; using command line and environment only"),
    }
    let credentials: Arc<dyn CredentialSource> = Arc::new(EnvCredentials::new(
        cli.username.clone(),
        cli.password.clone(),
        cli.auto_start,
        env_file,
    ));

    if cli.boot {
        if !credentials.current()?.auto_start {
            tracing::info!("Auto-start is disabled, exiting");
            return Ok(());
        }
        tracing::info!("Auto-start is enabled");
    }

    let probe: Arc<dyn ConnectivityCheck> = Arc::new(ConnectivityProbe::new(cli.probe_config())?);
    let browser = Arc::new(HttpBrowser::new(
        cli.user_agent.as_str(),
        Duration::from_secs(cli.login_timeout),
    ));
    let login = PortalLoginClient::new(
        cli.portal_url.as_str(),
        browser,
        Arc::clone(&probe),
        cli.login_timings(),
    );
    let notifier: Arc<dyn Notifier> = if cli.notify {
        Arc::new(DesktopNotifier::new(notify::APP_TITLE))
    } else {
        Arc::new(LogNotifier)
    };
    let monitor = Monitor::new(credentials, probe, login, notifier, cli.monitor_config());

    tracing::info!(
        "Portal Watchdog started, portal: {}, mode: {}",
        cli.portal_url,
        if cli.once { "single run" } else { "loop" }
    );

    if cli.once {
        tracing::info!("Checking network...");
        let mut state = MonitorState::default();
        let tick = monitor.tick(&mut state).await;
        tracing::info!("--once mode, exiting: {}", tick.status);
        if !tick.should_continue {
            anyhow::bail!("{}", tick.status);
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_stop(shutdown.clone()));
    match monitor.run(shutdown).await {
        Exit::Stopped => {
            tracing::info!("Portal Watchdog stopped");
            Ok(())
        }
        Exit::Halted(e) => Err(e).context("Monitoring halted"),
    }
}
