use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use super::client::TcpEndpoint;
use crate::endpoint::{ActivationError, Activator, ClassId, Endpoint, E_FAIL};

/// Environment override for the registry directory (tests/dev).
pub const REGISTRY_DIR_ENV: &str = "ENDPOINT_HOST_REGISTRY_DIR";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What a worker writes to advertise its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub class_id: ClassId,
    pub address: SocketAddr,
    pub pid: u32,
}

/// Directory of `<class-id>.json` registrations, one per running worker.
///
/// Activation treats a missing, unreadable or stale registration (its process
/// gone, or nothing listening on its address) as "not registered".
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    dir: PathBuf,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl LocalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// 레지스트리 디렉토리 경로를 해석합니다.
    ///
    /// `ENDPOINT_HOST_REGISTRY_DIR` 환경 변수가 설정되면 해당 경로를 우선 사용합니다.
    pub fn default_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(REGISTRY_DIR_ENV) {
            return PathBuf::from(dir);
        }
        crate::utils::resolve_data_dir().join("registry")
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registration_path(&self, class_id: &ClassId) -> PathBuf {
        self.dir.join(format!("{}.json", class_id.as_uuid().hyphenated()))
    }

    /// Publish `registration`, replacing any previous one for the same class.
    pub fn register(&self, registration: &Registration) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.registration_path(&registration.class_id);
        let tmp = path.with_extension(format!("json.{}.tmp", registration.pid));
        let body = serde_json::to_vec_pretty(registration).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        // readers only ever see a complete file
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        tracing::info!(
            "Registered class {} at {} (pid {})",
            registration.class_id,
            registration.address,
            registration.pid
        );
        Ok(())
    }

    /// Remove the registration for `class_id` if it belongs to `pid`.
    pub fn unregister(&self, class_id: &ClassId, pid: u32) -> io::Result<()> {
        match self.lookup(class_id) {
            Some(reg) if reg.pid == pid => match fs::remove_file(self.registration_path(class_id)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => {
                    tracing::info!("Unregistered class {}", class_id);
                    Ok(())
                }
            },
            _ => Ok(()),
        }
    }

    pub fn lookup(&self, class_id: &ClassId) -> Option<Registration> {
        let path = self.registration_path(class_id);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Could not read registration '{}': {}", path.display(), e);
                }
                return None;
            }
        };
        match serde_json::from_slice(&body) {
            Ok(reg) => Some(reg),
            Err(e) => {
                tracing::warn!("Ignoring malformed registration '{}': {}", path.display(), e);
                None
            }
        }
    }
}

impl Activator for LocalRegistry {
    fn activate(&self, class_id: &ClassId) -> Result<Arc<dyn Endpoint>, ActivationError> {
        let reg = self
            .lookup(class_id)
            .ok_or(ActivationError::NotRegistered(*class_id))?;

        if !is_running(reg.pid) {
            tracing::debug!("Registration for {} is stale (pid {} gone)", class_id, reg.pid);
            return Err(ActivationError::NotRegistered(*class_id));
        }

        match TcpEndpoint::connect(reg.address, self.connect_timeout, self.call_timeout) {
            Ok(endpoint) => Ok(Arc::new(endpoint)),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!("Nothing listening for {} at {}", class_id, reg.address);
                Err(ActivationError::NotRegistered(*class_id))
            }
            Err(e) => Err(ActivationError::Failed {
                code: E_FAIL,
                message: format!("could not connect to {} at {}: {}", class_id, reg.address, e),
            }),
        }
    }
}

/// 특정 PID가 실행 중인지 확인
fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}
