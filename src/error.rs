//! Why a monitoring cycle did not end online.
//!
//! Messages carry causes only, never credentials.

use crate::login::LoginOutcome;
use crate::probe::ConnectivityResult;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    /// Fatal: nothing to log in with until the user supplies credentials
    #[error("credentials are not configured")]
    Configuration,

    #[error("credential source unavailable: {0}")]
    CredentialSource(String),

    #[error("network error: {0}")]
    Network(String),

    /// Login form missing or not submittable; usually portal markup drift
    #[error("portal form error: {0}")]
    PortalForm(String),

    #[error("login not confirmed: {0}")]
    Verification(String),

    #[error("login attempt timed out")]
    Timeout,
}

impl CycleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Configuration)
    }

    /// Failure of a login attempt, `None` on success
    pub fn from_outcome(outcome: &LoginOutcome) -> Option<Self> {
        match outcome {
            LoginOutcome::Success => None,
            LoginOutcome::FormNotFound => {
                Some(CycleError::PortalForm("login form not found".to_string()))
            }
            LoginOutcome::SubmitFailed(reason) => Some(CycleError::PortalForm(reason.clone())),
            LoginOutcome::VerificationFailed(ConnectivityResult::NetworkError(cause)) => {
                Some(CycleError::Network(cause.clone()))
            }
            LoginOutcome::VerificationFailed(result) => {
                Some(CycleError::Verification(result.to_string()))
            }
            LoginOutcome::Timeout => Some(CycleError::Timeout),
        }
    }

    /// Log at a level matching how much attention the failure needs
    pub fn log(&self) {
        match self {
            CycleError::Configuration | CycleError::PortalForm(_) => {
                tracing::error!("{} (retries will fail the same way until fixed)", self)
            }
            CycleError::CredentialSource(_) => tracing::error!("{}", self),
            _ => tracing::warn!("{}", self),
        }
    }
}
