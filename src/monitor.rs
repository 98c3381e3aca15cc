//! Monitoring loop: probe, log in when captured, report, sleep, repeat

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::CredentialSource;
use crate::error::CycleError;
use crate::login::{LoginOutcome, PortalLoginClient};
use crate::notify::Notifier;
use crate::probe::{ConnectivityCheck, ConnectivityResult};

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CONFIRM_DELAY_SECS: u64 = 2;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Wait before re-probing after a successful login
    pub confirm_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            confirm_delay: Duration::from_secs(DEFAULT_CONFIRM_DELAY_SECS),
        }
    }
}

/// Most recent thing a cycle observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleResult {
    Probe(ConnectivityResult),
    Login(LoginOutcome),
}

/// Loop state, owned by the loop and threaded through every tick
#[derive(Debug, Default)]
pub struct MonitorState {
    pub last_result: Option<CycleResult>,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// `None` until the first probe
    online: Option<bool>,
    /// Last login alert sent since we were last confirmed online
    login_alert: Option<Alert>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alert {
    NetworkLost,
    LoginSucceeded,
    LoginFailed,
    ConfigurationError,
}

impl Alert {
    pub fn message(&self) -> &'static str {
        match self {
            Alert::NetworkLost => "Network lost. Attempting login...",
            Alert::LoginSucceeded => "Login successful. You are back online.",
            Alert::LoginFailed => "Login failed. Will retry.",
            Alert::ConfigurationError => "Configuration error: Missing credentials",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Connected,
    AttemptingLogin,
    /// Login reported success but the confirming probe did not
    LoginUnclear,
    Failed(CycleError),
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Connected => write!(f, "Connected - Monitoring..."),
            Status::AttemptingLogin => write!(f, "Network lost. Attempting login..."),
            Status::LoginUnclear => write!(f, "Login unclear - Retrying..."),
            Status::Failed(CycleError::Configuration) => write!(f, "Please configure credentials"),
            Status::Failed(e @ CycleError::CredentialSource(_)) => {
                write!(f, "Check failed - Retrying... ({})", e)
            }
            Status::Failed(e) => write!(f, "Login failed - Retrying... ({})", e),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tick {
    pub status: Status,
    pub should_continue: bool,
}

/// Why [`Monitor::run`] returned
#[derive(Debug, PartialEq, Eq)]
pub enum Exit {
    Stopped,
    Halted(CycleError),
}

pub struct Monitor {
    credentials: Arc<dyn CredentialSource>,
    probe: Arc<dyn ConnectivityCheck>,
    login: PortalLoginClient,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        probe: Arc<dyn ConnectivityCheck>,
        login: PortalLoginClient,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            credentials,
            probe,
            login,
            notifier,
            config,
        }
    }

    /// Tick until stopped or a fatal error; `shutdown` also aborts an in-flight tick
    pub async fn run(&self, shutdown: CancellationToken) -> Exit {
        let mut state = MonitorState::default();
        tracing::info!("Checking network every {:?}", self.config.interval);

        loop {
            tracing::info!("Checking network...");
            let tick = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stop requested, abandoning current check");
                    return Exit::Stopped;
                }
                tick = self.tick(&mut state) => tick,
            };
            if !tick.should_continue {
                return match tick.status {
                    Status::Failed(e) => Exit::Halted(e),
                    _ => Exit::Stopped,
                };
            }

            tracing::info!(
                "Sleeping {:?}... ({} consecutive failure(s))",
                self.config.interval,
                state.consecutive_failures
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stop requested");
                    return Exit::Stopped;
                }
                _ = sleep(self.config.interval) => {}
            }
        }
    }

    /// One full cycle. Never fails; failures come back as [`Status::Failed`].
    pub async fn tick(&self, state: &mut MonitorState) -> Tick {
        state.last_checked_at = Some(Utc::now());
        let status = self.cycle(state).await;

        match &status {
            Status::Connected => state.consecutive_failures = 0,
            Status::Failed(e) => {
                e.log();
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
            _ => state.consecutive_failures = state.consecutive_failures.saturating_add(1),
        }
        self.notifier.status(&status.to_string());

        let should_continue = !matches!(&status, Status::Failed(e) if e.is_fatal());
        Tick {
            status,
            should_continue,
        }
    }

    async fn cycle(&self, state: &mut MonitorState) -> Status {
        let snapshot = match self.credentials.current() {
            Ok(snapshot) => snapshot,
            Err(e) => return Status::Failed(CycleError::CredentialSource(format!("{:#}", e))),
        };
        if snapshot.credentials.is_blank() {
            self.notifier.alert(Alert::ConfigurationError.message());
            return Status::Failed(CycleError::Configuration);
        }

        let result = self.probe.probe().await;
        state.last_result = Some(CycleResult::Probe(result.clone()));
        if result.is_online() {
            tracing::info!("Network OK");
            mark_online(state);
            return Status::Connected;
        }

        tracing::info!("Internet unavailable ({}), initiating login sequence", result);
        if state.online != Some(false) {
            self.notifier.alert(Alert::NetworkLost.message());
        }
        state.online = Some(false);
        self.notifier.status(&Status::AttemptingLogin.to_string());

        let outcome = self.login.login(&snapshot.credentials).await;
        state.last_result = Some(CycleResult::Login(outcome.clone()));
        if let Some(error) = CycleError::from_outcome(&outcome) {
            self.alert_login(state, Alert::LoginFailed);
            return Status::Failed(error);
        }
        self.alert_login(state, Alert::LoginSucceeded);

        // login can report success before the route is usable
        sleep(self.config.confirm_delay).await;
        let confirm = self.probe.probe().await;
        state.last_result = Some(CycleResult::Probe(confirm.clone()));
        if confirm.is_online() {
            tracing::info!("Connectivity verified");
            mark_online(state);
            Status::Connected
        } else {
            tracing::warn!(
                "Login reported success but connectivity check failed ({})",
                confirm
            );
            Status::LoginUnclear
        }
    }

    fn alert_login(&self, state: &mut MonitorState, alert: Alert) {
        if state.login_alert != Some(alert) {
            self.notifier.alert(alert.message());
            state.login_alert = Some(alert);
        }
    }
}

fn mark_online(state: &mut MonitorState) {
    state.online = Some(true);
    state.login_alert = None;
}
