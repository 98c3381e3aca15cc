//! Portal login: load the page, detect state, fill the form, verify

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;

use crate::document::{Browser, Document, ElementHandle};
use crate::probe::{ConnectivityCheck, ConnectivityResult};

/// Default portal login page
pub const DEFAULT_PORTAL_URL: &str = "http://10.248.98.2/srun_portal_pc?ac_id=1&theme=basic2";

pub const DEFAULT_PAGE_SETTLE_SECS: u64 = 2;
pub const DEFAULT_SUBMIT_SETTLE_SECS: u64 = 3;
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 30;

/// Value of the page state field once the portal considers us logged in
const AUTHENTICATED_PAGE: &str = "success";

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.username.trim().is_empty() || self.password.expose_secret().trim().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    FormNotFound,
    SubmitFailed(String),
    /// Submitted, but the follow-up probe was not online
    VerificationFailed(ConnectivityResult),
    Timeout,
}

impl std::fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginOutcome::Success => write!(f, "success"),
            LoginOutcome::FormNotFound => write!(f, "login form not found"),
            LoginOutcome::SubmitFailed(reason) => write!(f, "submit failed: {}", reason),
            LoginOutcome::VerificationFailed(result) => {
                write!(f, "verification failed: {}", result)
            }
            LoginOutcome::Timeout => write!(f, "timed out"),
        }
    }
}

/// Selectors for one known markup of the login form
#[derive(Debug)]
pub struct FormLayout {
    pub name: &'static str,
    pub username: &'static [&'static str],
    pub password: &'static [&'static str],
    pub submit: &'static [&'static str],
}

pub const DESKTOP_LAYOUT: FormLayout = FormLayout {
    name: "desktop",
    username: &["#username"],
    password: &["#password"],
    submit: &["#login-account"],
};

pub const MOBILE_LAYOUT: FormLayout = FormLayout {
    name: "mobile",
    username: &["input[name=\"username\"]", "input[type=\"text\"]"],
    password: &["input[name=\"password\"]", "input[type=\"password\"]"],
    submit: &["button[type=\"submit\"]", ".login-btn", "button"],
};

/// Layouts in the order they are tried
const LAYOUTS: [&FormLayout; 2] = [&DESKTOP_LAYOUT, &MOBILE_LAYOUT];

struct ResolvedForm {
    layout: &'static str,
    username: ElementHandle,
    password: ElementHandle,
    submit: ElementHandle,
}

#[derive(Clone, Debug)]
pub struct LoginTimings {
    /// Wait after the page loads, for script-rendered fields
    pub page_settle: Duration,
    /// Wait after submitting, before verifying
    pub submit_settle: Duration,
    /// Ceiling for the whole attempt, delays and verification included
    pub attempt_timeout: Duration,
}

impl Default for LoginTimings {
    fn default() -> Self {
        Self {
            page_settle: Duration::from_secs(DEFAULT_PAGE_SETTLE_SECS),
            submit_settle: Duration::from_secs(DEFAULT_SUBMIT_SETTLE_SECS),
            attempt_timeout: Duration::from_secs(DEFAULT_LOGIN_TIMEOUT_SECS),
        }
    }
}

pub struct PortalLoginClient {
    portal_url: String,
    browser: Arc<dyn Browser>,
    probe: Arc<dyn ConnectivityCheck>,
    timings: LoginTimings,
}

impl PortalLoginClient {
    pub fn new(
        portal_url: impl Into<String>,
        browser: Arc<dyn Browser>,
        probe: Arc<dyn ConnectivityCheck>,
        timings: LoginTimings,
    ) -> Self {
        Self {
            portal_url: portal_url.into(),
            browser,
            probe,
            timings,
        }
    }

    /// One login attempt, abandoned as [`LoginOutcome::Timeout`] past the ceiling
    pub async fn login(&self, credentials: &Credentials) -> LoginOutcome {
        tracing::info!(
            "Login attempt for \"{}\" at {}",
            credentials.username,
            self.portal_url
        );
        let outcome =
            match tokio::time::timeout(self.timings.attempt_timeout, self.attempt(credentials))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        "Login attempt abandoned after {:?}",
                        self.timings.attempt_timeout
                    );
                    LoginOutcome::Timeout
                }
            };
        tracing::info!("Login attempt finished: {}", outcome);
        outcome
    }

    async fn attempt(&self, credentials: &Credentials) -> LoginOutcome {
        let mut doc = match self.browser.open() {
            Ok(doc) => doc,
            Err(e) => return LoginOutcome::SubmitFailed(format!("cannot open document: {:#}", e)),
        };

        tracing::debug!("Step 1/4: load login page");
        if let Err(e) = doc.load(&self.portal_url).await {
            tracing::warn!("Login page unreachable: {:#}", e);
            return LoginOutcome::SubmitFailed(format!("page unreachable: {:#}", e));
        }
        sleep(self.timings.page_settle).await;

        tracing::debug!("Step 2/4: detect page state");
        if is_authenticated(doc.as_ref()) {
            tracing::info!("Already logged in (page state)");
            return LoginOutcome::Success;
        }
        let Some(form) = resolve_form(doc.as_ref()) else {
            let text = doc.read_text();
            tracing::warn!(
                "No known login form on page: {}",
                text.chars().take(120).collect::<String>()
            );
            return LoginOutcome::FormNotFound;
        };
        tracing::info!("Login form found ({} layout)", form.layout);

        tracing::debug!("Step 3/4: fill and submit");
        if let Err(e) = submit(doc.as_mut(), &form, credentials).await {
            tracing::warn!("Error interacting with login form: {:#}", e);
            return LoginOutcome::SubmitFailed(format!("{:#}", e));
        }
        drop(doc);

        tracing::debug!("Step 4/4: wait {:?} then verify", self.timings.submit_settle);
        sleep(self.timings.submit_settle).await;
        match self.probe.probe().await {
            ConnectivityResult::GenuineInternet => LoginOutcome::Success,
            other => LoginOutcome::VerificationFailed(other),
        }
    }
}

fn is_authenticated(doc: &dyn Document) -> bool {
    doc.state_field("page").as_deref() == Some(AUTHENTICATED_PAGE)
}

/// First layout whose three controls all resolve
fn resolve_form(doc: &dyn Document) -> Option<ResolvedForm> {
    LAYOUTS.iter().find_map(|layout| {
        let form = ResolvedForm {
            layout: layout.name,
            username: doc.query_selector(layout.username)?,
            password: doc.query_selector(layout.password)?,
            submit: doc.query_selector(layout.submit)?,
        };
        Some(form)
    })
}

async fn submit(
    doc: &mut dyn Document,
    form: &ResolvedForm,
    credentials: &Credentials,
) -> anyhow::Result<()> {
    doc.set_value(&form.username, &credentials.username)?;
    doc.set_value(&form.password, credentials.password.expose_secret())?;
    doc.dispatch_input_event(&form.username)?;
    doc.dispatch_input_event(&form.password)?;
    doc.click(&form.submit).await
}
