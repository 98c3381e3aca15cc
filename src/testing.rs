//! Test doubles for the document, probe, credential and notifier seams

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::config::{CredentialSnapshot, CredentialSource};
use crate::document::{Browser, Document, ElementHandle};
use crate::login::Credentials;
use crate::notify::Notifier;
use crate::probe::{ConnectivityCheck, ConnectivityResult};

/// Page served by [`FakeBrowser`]; elements exist if their selector is in `present`
#[derive(Default)]
pub(crate) struct FakePage {
    pub present: Vec<&'static str>,
    pub page_state: Option<&'static str>,
    pub load_error: bool,
    pub load_delay: Option<Duration>,
    pub click_error: bool,
}

impl FakePage {
    pub fn desktop() -> Self {
        Self {
            present: vec!["#username", "#password", "#login-account"],
            ..Default::default()
        }
    }
}

struct FakeDocument {
    page: Arc<FakePage>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Document for FakeDocument {
    async fn load(&mut self, url: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.page.load_delay {
            sleep(delay).await;
        }
        if self.page.load_error {
            anyhow::bail!("connection refused");
        }
        self.log.lock().unwrap().push(format!("load {}", url));
        Ok(())
    }

    fn query_selector(&self, selectors: &[&str]) -> Option<ElementHandle> {
        selectors
            .iter()
            .find(|s| self.page.present.contains(s))
            .map(|s| ElementHandle::new(*s))
    }

    fn set_value(&mut self, element: &ElementHandle, text: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("set {}={}", element, text));
        Ok(())
    }

    fn dispatch_input_event(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("input {}", element));
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        if self.page.click_error {
            anyhow::bail!("button detached");
        }
        self.log.lock().unwrap().push(format!("click {}", element));
        Ok(())
    }

    fn read_text(&self) -> String {
        String::new()
    }

    fn state_field(&self, name: &str) -> Option<String> {
        (name == "page")
            .then_some(self.page.page_state)
            .flatten()
            .map(str::to_string)
    }
}

/// Opens documents over one shared [`FakePage`] and records what they do
pub(crate) struct FakeBrowser {
    page: Arc<FakePage>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeBrowser {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Arc::new(page),
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Browser for FakeBrowser {
    fn open(&self) -> anyhow::Result<Box<dyn Document>> {
        Ok(Box::new(FakeDocument {
            page: Arc::clone(&self.page),
            log: Arc::clone(&self.log),
        }))
    }
}

/// Replays queued results, then repeats the last one
pub(crate) struct ScriptedProbe {
    results: Mutex<VecDeque<ConnectivityResult>>,
    calls: Mutex<usize>,
    delay: Option<Duration>,
}

impl ScriptedProbe {
    pub fn new(results: Vec<ConnectivityResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(0),
            delay: None,
        })
    }

    /// Every probe takes `delay` before answering
    pub fn slow(delay: Duration, result: ConnectivityResult) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(vec![result].into()),
            calls: Mutex::new(0),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ConnectivityCheck for ScriptedProbe {
    async fn probe(&self) -> ConnectivityResult {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results.front().cloned().unwrap()
        }
    }
}

pub(crate) struct StaticCredentials(pub anyhow::Result<CredentialSnapshot>);

impl StaticCredentials {
    pub fn new(username: &str, password: &str) -> Arc<Self> {
        Arc::new(Self(Ok(CredentialSnapshot {
            credentials: Credentials::new(username, password),
            auto_start: false,
        })))
    }
}

impl CredentialSource for StaticCredentials {
    fn current(&self) -> anyhow::Result<CredentialSnapshot> {
        match &self.0 {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(e) => Err(anyhow::anyhow!("{:#}", e)),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub statuses: Mutex<Vec<String>>,
    pub alerts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }
}
