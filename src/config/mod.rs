//! Static controller configuration, read once at startup.
//!
//! The file is optional: when `config/switchboard.toml` (or the path in
//! `SWITCHBOARD_CONFIG`) does not exist the built-in defaults are used, which
//! describe the two stock workers (`5090` on GPU 1, `4090` on GPU 0).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/switchboard.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    /// HTTP 리스닝 주소 (대시보드 + 제어 API)
    pub listen_addr: String,
    /// Host the port probe connects to
    pub probe_host: String,
    pub worker: WorkerConfig,
    pub instances: Vec<InstanceConfig>,
    pub timings: Timings,
}

/// Launch command shared by every instance.
///
/// The final command line is
/// `<interpreter> <interpreter_args..> <entrypoint> <flags..> --cuda-device <gpu> --port <port>`.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub entrypoint: String,
    pub flags: Vec<String>,
    pub working_dir: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct InstanceConfig {
    pub id: String,
    pub port: u16,
    pub gpu: u32,
    /// URL the dashboard embeds; defaults to `http://localhost:<port>`
    #[serde(default)]
    pub url: Option<String>,
}

/// All intervals and bounds, in milliseconds.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Timings {
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub restart_delay_ms: u64,
    pub crash_watch_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            probe_host: "localhost".to_string(),
            worker: WorkerConfig::default(),
            instances: vec![
                InstanceConfig { id: "5090".to_string(), port: 5090, gpu: 1, url: None },
                InstanceConfig { id: "4090".to_string(), port: 4090, gpu: 0, url: None },
            ],
            timings: Timings::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: r".\python_embeded\python.exe".to_string(),
            interpreter_args: vec!["-s".to_string()],
            entrypoint: r".\ComfyUI\main.py".to_string(),
            flags: [
                "--windows-standalone-build",
                "--listen",
                "localhost",
                "--multi-user",
                "--disable-auto-launch",
                "--disable-xformers",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            working_dir: None,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            probe_timeout_ms: 2_000,
            startup_timeout_ms: 30_000,
            stop_timeout_ms: 10_000,
            restart_delay_ms: 2_000,
            crash_watch_interval_ms: 2_000,
        }
    }
}

impl Timings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn crash_watch_interval(&self) -> Duration {
        Duration::from_millis(self.crash_watch_interval_ms)
    }
}

impl WorkerConfig {
    /// Build the deterministic argument vector for one instance.
    pub fn command_for(&self, gpu: u32, port: u16) -> LaunchCommand {
        let mut args = self.interpreter_args.clone();
        args.push(self.entrypoint.clone());
        args.extend(self.flags.iter().cloned());
        args.push("--cuda-device".to_string());
        args.push(gpu.to_string());
        args.push("--port".to_string());
        args.push(port.to_string());

        LaunchCommand {
            program: self.interpreter.clone(),
            args,
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
}

impl InstanceConfig {
    pub fn display_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

impl ControllerConfig {
    /// Load from `SWITCHBOARD_CONFIG` or the default path.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using built-in defaults", path.display());
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::info!("Loaded config from {} ({} instances)", path.display(), cfg.instances.len());
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            anyhow::bail!("at least one instance must be configured");
        }
        let mut seen = HashSet::new();
        for inst in &self.instances {
            if inst.id.trim().is_empty() {
                anyhow::bail!("instance id must not be empty");
            }
            if inst.port == 0 {
                anyhow::bail!("instance '{}' has port 0", inst.id);
            }
            if !seen.insert(inst.id.as_str()) {
                anyhow::bail!("duplicate instance id '{}'", inst.id);
            }
        }
        if self.worker.interpreter.trim().is_empty() {
            anyhow::bail!("worker.interpreter must not be empty");
        }
        self.timings.validate()
    }
}

impl Timings {
    /// Interval and timeout values must be non-zero: a zero tick period
    /// panics `tokio::time::interval` and turns crash-watch into a busy loop.
    /// `startup_timeout_ms` and `restart_delay_ms` may be zero.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("crash_watch_interval_ms", self.crash_watch_interval_ms),
        ];
        for (name, value) in required {
            if value == 0 {
                anyhow::bail!("timings.{} must be greater than zero", name);
            }
        }
        Ok(())
    }
}
