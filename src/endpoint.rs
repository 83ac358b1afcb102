//! Capability interfaces for worker endpoints.
//!
//! The supervisor never sees a transport. It asks an [`Activator`] for the
//! endpoint registered under a [`ClassId`] and talks to the result through
//! the narrow [`Endpoint`] trait.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigError;

/// "The RPC server is unavailable": the worker behind an endpoint is gone.
pub const RPC_E_SERVER_UNAVAILABLE: u32 = 0x8007_06BA;
/// "Class not registered": nothing serves the requested class id (yet).
pub const REGDB_E_CLASSNOTREG: u32 = 0x8004_0154;
/// Generic failure for protocol-level problems.
pub const E_FAIL: u32 = 0x8000_4005;

/// Identifier under which a worker registers its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(uuid::Uuid);

impl ClassId {
    pub fn new(id: uuid::Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for ClassId {
    type Err = ConfigError;

    /// Accepts braced (`{…}`), hyphenated, simple and URN forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ConfigError::InvalidClassId {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated().to_string().to_uppercase())
    }
}

/// Failure reported by an endpoint call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("RPC error 0x{code:08X}: {message}")]
pub struct RpcError {
    pub code: u32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn server_unavailable(message: impl Into<String>) -> Self {
        Self::new(RPC_E_SERVER_UNAVAILABLE, message)
    }

    pub fn is_server_unavailable(&self) -> bool {
        self.code == RPC_E_SERVER_UNAVAILABLE
    }
}

/// A live connection to a worker.
pub trait Endpoint: Send + Sync {
    /// Call `method` with positional `args`.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, RpcError>;

    /// Trivial metadata call, used as a liveness probe.
    fn type_info_count(&self) -> Result<u32, RpcError>;

    /// Drop the underlying connection. Later calls fail.
    fn release(&self) {}

    /// `Ok(false)` when the worker is gone, `Err` for any other probe failure.
    fn is_alive(&self) -> Result<bool, RpcError> {
        match self.type_info_count() {
            Ok(_) => Ok(true),
            Err(e) if e.is_server_unavailable() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for dyn Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Endpoint")
    }
}

/// Why an activation attempt did not produce an endpoint.
#[derive(thiserror::Error, Debug)]
pub enum ActivationError {
    #[error("class {0} is not registered")]
    NotRegistered(ClassId),

    #[error("activation failed with 0x{code:08X}: {message}")]
    Failed { code: u32, message: String },
}

/// Looks up the endpoint registered for a class id.
pub trait Activator: Send + Sync {
    fn activate(&self, class_id: &ClassId) -> Result<Arc<dyn Endpoint>, ActivationError>;
}
