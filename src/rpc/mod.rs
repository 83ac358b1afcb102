//! Loopback RPC transport used to reach workers.
//!
//! A worker binds a loopback TCP port, serves framed JSON requests on it and
//! advertises itself by writing a registration file into a shared registry
//! directory. The host activates a class id by reading that registration and
//! connecting.
//!
//! 패킷 구조: `[u32 LE 길이][JSON 본문]`

pub mod client;
pub mod frame;
pub mod registry;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::RpcError;

pub use client::TcpEndpoint;
pub use registry::{LocalRegistry, Registration};
pub use server::{Handler, WorkerServer};

/// Reserved method name answering the metadata probe.
pub const TYPE_INFO_COUNT_METHOD: &str = "$typeInfoCount";

/// RPC_E_TIMEOUT: the worker did not answer in time.
pub const RPC_E_TIMEOUT: u32 = 0x8001_011F;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn from_result(id: u64, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(error) => Self {
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
