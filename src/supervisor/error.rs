//! Supervisor 전용 에러 타입 — 활성화 실패 원인을 구분하여
//! 호출자가 "아직 준비 안 됨" / "프로세스 종료" / "영구 실패"를 구별할 수 있게 합니다.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::state_machine::TransitionError;
use crate::config::ConfigError;
use crate::endpoint::{ActivationError, ClassId, RpcError};

/// How the worker was launched, repeated in every launch-related error so the
/// user can reproduce it or find its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSummary {
    pub command_line: String,
    pub working_dir: PathBuf,
    pub redirect: Option<PathBuf>,
}

impl fmt::Display for LaunchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(redirect) = &self.redirect {
            write!(f, "Try consulting '{}'.\n\n", redirect.display())?;
        }
        write!(
            f,
            "Command: {}\nWorking Dir: {}",
            self.command_line,
            self.working_dir.display()
        )
    }
}

/// Errors surfaced by endpoint activation and liveness checks.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not activate worker endpoint {class_id}: {source}")]
    ActivationFailure {
        class_id: ClassId,
        #[source]
        source: ActivationError,
    },

    #[error("Could not open '{}' for output redirection: {source}", path.display())]
    RedirectSetupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create worker process: {source}\n\n{launch}")]
    ProcessSpawnFailed {
        launch: LaunchSummary,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not query worker process status: {0}")]
    ProcessQueryFailed(#[source] std::io::Error),

    #[error("Worker process exited ({status}) before endpoint {class_id} could be activated.\n\n{launch}")]
    ProcessExitedPrematurely {
        class_id: ClassId,
        status: String,
        launch: LaunchSummary,
    },

    #[error("Worker did not register endpoint {class_id} within {waited:?}.\n\n{launch}")]
    ActivationTimedOut {
        class_id: ClassId,
        waited: Duration,
        launch: LaunchSummary,
    },

    #[error("Endpoint liveness probe failed: {0}")]
    EndpointProbeFailed(#[source] RpcError),

    #[error("Command line is {len} characters long, the limit is {limit}")]
    CommandLineTooLong { len: usize, limit: usize },

    #[error("No endpoint has been activated for '{}'", .0.display())]
    NoEndpoint(PathBuf),

    #[error("Activation of endpoint {class_id} was cancelled")]
    Cancelled { class_id: ClassId },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl SupervisorError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::ActivationFailure { .. } => "ACTIVATION_FAILURE",
            Self::RedirectSetupFailed { .. } => "REDIRECT_SETUP_FAILED",
            Self::ProcessSpawnFailed { .. } => "PROCESS_SPAWN_FAILED",
            Self::ProcessQueryFailed(_) => "PROCESS_QUERY_FAILED",
            Self::ProcessExitedPrematurely { .. } => "PROCESS_EXITED_PREMATURELY",
            Self::ActivationTimedOut { .. } => "ACTIVATION_TIMED_OUT",
            Self::EndpointProbeFailed(_) => "ENDPOINT_PROBE_FAILED",
            Self::CommandLineTooLong { .. } => "COMMAND_LINE_TOO_LONG",
            Self::NoEndpoint(_) => "NO_ENDPOINT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::InvalidTransition(_) => "INTERNAL_ERROR",
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(redirect: Option<&str>) -> LaunchSummary {
        LaunchSummary {
            command_line: "worker.exe --serve".into(),
            working_dir: PathBuf::from("/srv"),
            redirect: redirect.map(PathBuf::from),
        }
    }

    #[test]
    fn launch_errors_carry_command_and_redirect_hint() {
        let class_id: ClassId = "{0F3A6C1E-7B42-4D59-8E21-6A9C3B5D7E80}".parse().unwrap();
        let err = SupervisorError::ProcessExitedPrematurely {
            class_id,
            status: "exit status: 3".into(),
            launch: summary(Some("/srv/worker.log")),
        };
        let msg = err.to_string();
        assert!(msg.contains("Try consulting '/srv/worker.log'"));
        assert!(msg.contains("Command: worker.exe --serve"));
        assert!(msg.contains("Working Dir: /srv"));
        assert_eq!(err.error_code(), "PROCESS_EXITED_PREMATURELY");

        let err = SupervisorError::ProcessSpawnFailed {
            launch: summary(None),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.to_string().contains("Try consulting"));
    }

    #[test]
    fn config_errors_keep_their_code() {
        let err: SupervisorError = ConfigError::KeyNotFound("CLSID".into()).into();
        assert_eq!(err.error_code(), "KEY_NOT_FOUND");
        assert_eq!(err.to_json()["error_code"], "KEY_NOT_FOUND");
    }
}
