//! Boot-time auto-start: per-user launchd agent (macOS) or systemd user unit (Linux).
//!
//! The registered command runs with `--boot`, so it exits straight away unless
//! auto-start is enabled in the config.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};

use crate::config::{expand_home, APP_DIR};

pub const LABEL: &str = "io.github.portal-watchdog";
const UNIT_NAME: &str = "portal-watchdog.service";

/// Seconds launchd / systemd wait before restarting after a failure
const RESTART_THROTTLE_SECS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Platform {
    Launchd,
    Systemd,
}

impl Platform {
    fn current() -> anyhow::Result<Self> {
        if cfg!(target_os = "macos") {
            Ok(Platform::Launchd)
        } else if cfg!(target_os = "linux") {
            Ok(Platform::Systemd)
        } else {
            bail!("Service install is only supported on macOS (launchd) and Linux (systemd)")
        }
    }
}

pub struct ServiceInstaller {
    platform: Platform,
    exe: PathBuf,
    home: PathBuf,
}

impl ServiceInstaller {
    pub fn new() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("Failed to get current exe path")?;
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(Self {
            platform: Platform::current()?,
            exe,
            home,
        })
    }

    fn plist_path(&self) -> PathBuf {
        self.home
            .join("Library")
            .join("LaunchAgents")
            .join(format!("{}.plist", LABEL))
    }

    fn log_dir(&self) -> PathBuf {
        self.home.join("Library").join("Logs").join(APP_DIR)
    }

    fn unit_path(&self) -> PathBuf {
        self.home
            .join(".config")
            .join("systemd")
            .join("user")
            .join(UNIT_NAME)
    }

    fn definition_path(&self) -> PathBuf {
        match self.platform {
            Platform::Launchd => self.plist_path(),
            Platform::Systemd => self.unit_path(),
        }
    }

    pub fn install(&self, config: &Path) -> anyhow::Result<()> {
        tracing::info!("Installing service: {}", LABEL);
        let config = absolute(&expand_home(config))?;
        if !config.is_file() {
            tracing::warn!(
                "Config file not found at {}; create it before the service runs",
                config.display()
            );
        }

        let definition = match self.platform {
            Platform::Launchd => {
                let log_dir = self.log_dir();
                std::fs::create_dir_all(&log_dir)
                    .with_context(|| format!("Failed to create {}", log_dir.display()))?;
                tracing::info!("Log directory: {}", log_dir.display());
                launchd_plist(&self.exe, &config, &log_dir, &self.home)
            }
            Platform::Systemd => systemd_unit(&self.exe, &config),
        };

        let path = self.definition_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, definition)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Service definition written to {}", path.display());

        match self.platform {
            Platform::Launchd => {
                self.unload();
                let plist = path.to_string_lossy();
                run_tool("launchctl", &["load", "-w", &plist])?;
            }
            Platform::Systemd => {
                run_tool("systemctl", &["--user", "daemon-reload"])?;
                run_tool("systemctl", &["--user", "enable", "--now", UNIT_NAME])?;
            }
        }
        tracing::info!("Service loaded");
        Ok(())
    }

    pub fn uninstall(&self) -> anyhow::Result<()> {
        tracing::info!("Uninstalling service: {}", LABEL);
        self.unload();

        let path = self.definition_path();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            tracing::info!("Removed {}", path.display());
        } else {
            tracing::info!("No service definition at {}", path.display());
        }
        if self.platform == Platform::Systemd {
            run_tool("systemctl", &["--user", "daemon-reload"])?;
        }
        Ok(())
    }

    pub fn status(&self) -> anyhow::Result<()> {
        let probe = match self.platform {
            Platform::Launchd => run_tool("launchctl", &["list", LABEL]),
            Platform::Systemd => run_tool("systemctl", &["--user", "is-active", UNIT_NAME]),
        };
        match probe {
            Ok(out) => {
                tracing::info!("Service is running: {}", out.trim());
                if self.platform == Platform::Launchd {
                    tracing::info!("Logs are in: {}", self.log_dir().display());
                }
            }
            Err(e) => tracing::info!("Service is not running ({:#})", e),
        }
        Ok(())
    }

    /// Stop a previous registration; failures mean there was nothing to stop
    fn unload(&self) {
        let result = match self.platform {
            Platform::Launchd => {
                let plist = self.plist_path();
                if !plist.exists() {
                    return;
                }
                run_tool("launchctl", &["unload", &plist.to_string_lossy()])
            }
            Platform::Systemd => run_tool("systemctl", &["--user", "disable", "--now", UNIT_NAME]),
        };
        match result {
            Ok(_) => tracing::info!("Previous service unloaded"),
            Err(e) => tracing::debug!("Nothing to unload: {:#}", e),
        }
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(cwd.join(path))
}

/// Run a service manager command, returning stdout
fn run_tool(program: &str, args: &[&str]) -> anyhow::Result<String> {
    tracing::debug!("Running {} {}", program, args.join(" "));
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stdout = String::from_utf8_lossy(&out.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            bail!("{} {} failed ({}): {}", program, args.join(" "), out.status, detail)
        }
        Err(e) => bail!("Failed to run {}: {}", program, e),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn launchd_plist(exe: &Path, config: &Path, log_dir: &Path, home: &Path) -> String {
    let s = |p: &Path| xml_escape(&p.to_string_lossy());
    let work_dir = exe.parent().unwrap_or(home);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>--boot</string>
        <string>--config</string>
        <string>{config}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <dict>
        <key>SuccessfulExit</key>
        <false/>
        <key>Crashed</key>
        <true/>
    </dict>
    <key>StandardOutPath</key>
    <string>{log_out}</string>
    <key>StandardErrorPath</key>
    <string>{log_err}</string>
    <key>EnvironmentVariables</key>
    <dict>
        <key>PATH</key>
        <string>/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin</string>
        <key>HOME</key>
        <string>{home}</string>
    </dict>
    <key>WorkingDirectory</key>
    <string>{work_dir}</string>
    <key>ProcessType</key>
    <string>Background</string>
    <key>ThrottleInterval</key>
    <integer>{throttle}</integer>
</dict>
</plist>
"#,
        label = LABEL,
        exe = s(exe),
        config = s(config),
        log_out = s(&log_dir.join("service.log")),
        log_err = s(&log_dir.join("error.log")),
        home = s(home),
        work_dir = s(work_dir),
        throttle = RESTART_THROTTLE_SECS,
    )
}

fn systemd_unit(exe: &Path, config: &Path) -> String {
    let quote = |p: &Path| {
        format!(
            "\"{}\"",
            p.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"")
        )
    };
    format!(
        "[Unit]
Description=Captive portal auto-login watchdog
Wants=network-online.target
After=network-online.target

[Service]
Type=simple
ExecStart={exe} --boot --config {config}
Restart=on-failure
RestartSec={throttle}

[Install]
WantedBy=default.target
",
        exe = quote(exe),
        config = quote(config),
        throttle = RESTART_THROTTLE_SECS,
    )
}
