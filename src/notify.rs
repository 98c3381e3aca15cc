//! Notification sinks: ongoing status text and one-shot alerts

use std::process::Command;

use anyhow::{bail, Context};

pub const APP_TITLE: &str = "Portal Watchdog";

pub trait Notifier: Send + Sync {
    /// Replace the ongoing status line
    fn status(&self, text: &str);

    /// One-shot message for a state transition
    fn alert(&self, message: &str);
}

/// Log only
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn status(&self, text: &str) {
        tracing::info!("Status: {}", text);
    }

    fn alert(&self, message: &str) {
        tracing::info!("Alert: {}", message);
    }
}

/// Logs status, and also pops alerts up on the desktop (osascript / notify-send)
pub struct DesktopNotifier {
    title: String,
}

impl DesktopNotifier {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn status(&self, text: &str) {
        tracing::info!("Status: {}", text);
    }

    fn alert(&self, message: &str) {
        tracing::info!("Alert: {}", message);
        if let Err(e) = show(&self.title, message) {
            tracing::warn!("Failed to send notification: {:#}", e);
        }
    }
}

#[cfg(target_os = "macos")]
fn show(title: &str, message: &str) -> anyhow::Result<()> {
    let script = format!(
        "display notification {} with title {}",
        applescript_quote(message),
        applescript_quote(title)
    );
    run("osascript", &["-e", &script])
}

#[cfg(target_os = "linux")]
fn show(title: &str, message: &str) -> anyhow::Result<()> {
    run("notify-send", &["--app-name", title, title, message])
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn show(_title: &str, _message: &str) -> anyhow::Result<()> {
    tracing::debug!("Desktop notifications not supported on this platform");
    Ok(())
}

#[cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]
fn run(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let out = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("{} exited with {}: {}", program, out.status, stderr.trim());
    }
    Ok(())
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
