use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::rpc::LocalRegistry;
use crate::supervisor::{SupervisorOptions, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};

pub const SETTINGS_FILE_NAME: &str = "endpoint-host.toml";

/// Host-wide settings (`endpoint-host.toml`).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HostSettings {
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub registry_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            registry_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl HostSettings {
    /// 설정 파일이 없으면 기본값을 사용합니다.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
    }

    /// `endpoint-host.toml` next to the running executable.
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            poll_attempts: self.poll_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.registry_dir.clone().unwrap_or_else(LocalRegistry::default_dir)
    }
}
