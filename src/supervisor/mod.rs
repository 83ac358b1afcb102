//! Endpoint activation and worker supervision.
//!
//! [`ProcessSupervisor::activate`] runs one activation attempt:
//!
//! 1. ask the activator for the class in `CLSID`
//! 2. if the class is not registered, start the worker described by the
//!    config and poll the activator until it registers
//! 3. stop early when the worker exits first, when the poll budget runs out,
//!    or when the caller cancels
//!
//! The worker is never killed by the supervisor. Once started it is expected
//! to keep serving later activations.

pub mod command_line;
pub mod error;
pub mod process;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::endpoint::{ActivationError, Activator, ClassId, Endpoint, E_FAIL};
pub use error::{LaunchSummary, SupervisorError};
use process::WorkerLaunch;
use state_machine::{State, StateMachine};

pub const CLSID_KEY: &str = "CLSID";

pub const DEFAULT_POLL_ATTEMPTS: u32 = 600;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll budget for a freshly spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl SupervisorOptions {
    /// Total time spent waiting between polls, saturating instead of overflowing.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.poll_attempts)
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct ProcessSupervisor {
    activator: Arc<dyn Activator>,
    options: SupervisorOptions,
}

impl ProcessSupervisor {
    pub fn new(activator: Arc<dyn Activator>, options: SupervisorOptions) -> Self {
        Self { activator, options }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Obtain a fresh endpoint for `config`, starting its worker if needed.
    ///
    /// Any endpoint the config already holds is released first, so every call
    /// reconnects. On success the new endpoint is stored on the config.
    pub async fn activate(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Endpoint>, SupervisorError> {
        let mut sm = StateMachine::new();
        config.release_endpoint();
        sm.transition(State::Activating)?;

        let class_id: ClassId = config.get_value(CLSID_KEY)?.parse()?;
        tracing::info!(
            "Activating endpoint {} for '{}'",
            class_id,
            config.source_path().display()
        );

        let endpoint = match self.try_activate(class_id).await {
            Ok(endpoint) => {
                sm.transition(State::Connected)?;
                endpoint
            }
            Err(ActivationError::NotRegistered(_)) => {
                sm.transition(State::NotRegistered)?;
                self.spawn_and_poll(config, class_id, cancel, &mut sm).await?
            }
            Err(source) => {
                sm.transition(State::Failed)?;
                return Err(SupervisorError::ActivationFailure { class_id, source });
            }
        };

        config.replace_endpoint(Some(endpoint.clone()));
        tracing::info!("Endpoint {} connected", class_id);
        Ok(endpoint)
    }

    /// Reuse the config's endpoint while it is alive, otherwise activate.
    pub async fn connect(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Endpoint>, SupervisorError> {
        if let Some(endpoint) = config.endpoint() {
            if check_endpoint_alive(endpoint.as_ref())? {
                return Ok(endpoint);
            }
            tracing::warn!(
                "Worker for '{}' is gone, reactivating",
                config.source_path().display()
            );
        }
        self.activate(config, cancel).await
    }

    /// Liveness of the endpoint currently held by `config`.
    pub fn is_alive(&self, config: &Config) -> Result<bool, SupervisorError> {
        let endpoint = config
            .endpoint()
            .ok_or_else(|| SupervisorError::NoEndpoint(config.source_path().to_path_buf()))?;
        check_endpoint_alive(endpoint.as_ref())
    }

    async fn spawn_and_poll(
        &self,
        config: &Config,
        class_id: ClassId,
        cancel: &CancellationToken,
        sm: &mut StateMachine,
    ) -> Result<Arc<dyn Endpoint>, SupervisorError> {
        let launch = match WorkerLaunch::from_config(config) {
            Ok(launch) => launch,
            Err(e) => {
                sm.transition(State::Failed)?;
                return Err(e);
            }
        };

        sm.transition(State::Spawning)?;
        // dropping the handle on any return leaves the worker running
        let mut child = match launch.spawn() {
            Ok(child) => child,
            Err(e) => {
                sm.transition(State::Failed)?;
                return Err(e);
            }
        };

        sm.transition(State::Polling)?;
        let attempts = self.options.poll_attempts;
        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    sm.transition(State::Cancelled)?;
                    tracing::info!("Activation of {} cancelled during poll {}", class_id, attempt);
                    return Err(SupervisorError::Cancelled { class_id });
                }
                result = self.try_activate(class_id) => result,
            };
            match result {
                Ok(endpoint) => {
                    sm.transition(State::Connected)?;
                    tracing::debug!("Worker registered after {} poll(s)", attempt);
                    return Ok(endpoint);
                }
                Err(ActivationError::NotRegistered(_)) => {}
                Err(source) => {
                    sm.transition(State::Failed)?;
                    return Err(SupervisorError::ActivationFailure { class_id, source });
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    sm.transition(State::ProcessDied)?;
                    tracing::warn!("Worker exited before registering {}: {}", class_id, status);
                    return Err(SupervisorError::ProcessExitedPrematurely {
                        class_id,
                        status: status.to_string(),
                        launch: launch.summary(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    sm.transition(State::Failed)?;
                    return Err(SupervisorError::ProcessQueryFailed(e));
                }
            }

            if attempt == attempts {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    sm.transition(State::Cancelled)?;
                    tracing::info!("Activation of {} cancelled after {} poll(s)", class_id, attempt);
                    return Err(SupervisorError::Cancelled { class_id });
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        sm.transition(State::TimedOut)?;
        Err(SupervisorError::ActivationTimedOut {
            class_id,
            waited: self.options.poll_budget(),
            launch: launch.summary(),
        })
    }

    /// Activator lookups may stat processes and open sockets, so they run on
    /// the blocking pool.
    async fn try_activate(&self, class_id: ClassId) -> Result<Arc<dyn Endpoint>, ActivationError> {
        let activator = self.activator.clone();
        match tokio::task::spawn_blocking(move || activator.activate(&class_id)).await {
            Ok(result) => result,
            Err(e) => Err(ActivationError::Failed {
                code: E_FAIL,
                message: format!("activation task failed: {}", e),
            }),
        }
    }
}

/// Probe `endpoint`. A vanished worker is `Ok(false)`; any other probe
/// failure is an error, since it points at a protocol problem.
pub fn check_endpoint_alive(endpoint: &dyn Endpoint) -> Result<bool, SupervisorError> {
    endpoint.is_alive().map_err(SupervisorError::EndpointProbeFailed)
}
