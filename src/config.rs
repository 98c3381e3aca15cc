//! Credential source: CLI / process env values over an optional dotenv file

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use secrecy::{ExposeSecret, SecretString};

use crate::login::Credentials;

pub const USERNAME_VAR: &str = "PORTAL_USERNAME";
pub const PASSWORD_VAR: &str = "PORTAL_PASSWORD";
pub const AUTO_START_VAR: &str = "PORTAL_AUTO_START";

/// Directory name under ~/.config and /etc
pub const APP_DIR: &str = "portal-watchdog";

#[derive(Clone, Debug)]
pub struct CredentialSnapshot {
    pub credentials: Credentials,
    /// Whether a boot-time start should keep running
    pub auto_start: bool,
}

/// Read once per monitoring cycle
pub trait CredentialSource: Send + Sync {
    fn current(&self) -> anyhow::Result<CredentialSnapshot>;
}

/// Explicit values win; anything missing comes from the env file,
/// which is re-read on every call so edits apply without a restart.
pub struct EnvCredentials {
    username: Option<String>,
    password: Option<SecretString>,
    auto_start: Option<bool>,
    env_file: Option<PathBuf>,
}

impl EnvCredentials {
    pub fn new(
        username: Option<String>,
        password: Option<String>,
        auto_start: Option<bool>,
        env_file: Option<PathBuf>,
    ) -> Self {
        Self {
            username,
            password: password.map(SecretString::new),
            auto_start,
            env_file,
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn current(&self) -> anyhow::Result<CredentialSnapshot> {
        let file = match &self.env_file {
            Some(path) => read_env_file(path)?,
            None => HashMap::new(),
        };

        let username = self
            .username
            .clone()
            .or_else(|| file.get(USERNAME_VAR).cloned())
            .unwrap_or_default();
        let password = match &self.password {
            Some(password) => password.expose_secret().clone(),
            None => file.get(PASSWORD_VAR).cloned().unwrap_or_default(),
        };
        let auto_start = match self.auto_start {
            Some(enabled) => enabled,
            None => file
                .get(AUTO_START_VAR)
                .map(|v| parse_bool(v))
                .transpose()?
                .unwrap_or(false),
        };

        Ok(CredentialSnapshot {
            credentials: Credentials::new(username, password),
            auto_start,
        })
    }
}

fn read_env_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let escaped = escape_bare_dollars(&text);

    let mut vars = HashMap::new();
    for item in dotenvy::from_read_iter(escaped.as_bytes()) {
        let (key, value) = item.with_context(|| format!("Malformed line in {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Escapes every `$` that does not open a `${VAR}` reference, so only braced
/// references are substituted. Single-quoted text and comments are left alone.
fn escape_bare_dollars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut single = false;
    let mut double = false;
    let mut comment = false;
    let mut prev = '\n';

    while let Some(c) = chars.next() {
        if comment {
            comment = c != '\n';
        } else if single {
            single = c != '\'';
        } else {
            match c {
                '\\' => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                        prev = next;
                    }
                    continue;
                }
                '\'' if !double => single = true,
                '"' => double = !double,
                '#' if !double && prev.is_whitespace() => comment = true,
                '$' if chars.peek() != Some(&'{') => out.push('\\'),
                _ => {}
            }
        }
        out.push(c);
        prev = c;
    }
    out
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be true or false, got {:?}", AUTO_START_VAR, other),
    }
}

/// Candidate env files, most specific first
pub fn default_env_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join(APP_DIR).join(".env"));
    }
    paths.push(Path::new("/etc").join(APP_DIR).join(".env"));
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
    }
    paths
}

/// An explicit path must exist. Without one, the first existing default is used, if any.
pub fn locate_env_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = expand_home(path);
        if !path.is_file() {
            bail!("Config file not found at {}", path.display());
        }
        return Ok(Some(path));
    }
    Ok(default_env_files().into_iter().find(|p| p.is_file()))
}

/// `~/x` to `$HOME/x`
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
