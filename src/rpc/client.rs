use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use super::frame::{read_frame, write_frame};
use super::{Request, Response, RPC_E_TIMEOUT, TYPE_INFO_COUNT_METHOD};
use crate::endpoint::{Endpoint, RpcError, E_FAIL};

/// Endpoint backed by a loopback TCP connection to a worker.
///
/// Calls are serialized over a single connection. Once a call fails at the
/// transport level (including a timeout or a reply that does not match the
/// request) the connection is dropped, and every later call reports the
/// server as unavailable.
#[derive(Debug)]
pub struct TcpEndpoint {
    address: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    next_id: AtomicU64,
}

impl TcpEndpoint {
    /// 워커에 연결
    pub fn connect(address: SocketAddr, connect_timeout: Duration, call_timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&address, connect_timeout)?;
        stream.set_read_timeout(Some(call_timeout))?;
        stream.set_write_timeout(Some(call_timeout))?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to worker endpoint at {}", address);
        Ok(Self {
            address,
            stream: Mutex::new(Some(stream)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let mut guard = self.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| RpcError::server_unavailable(format!("endpoint {} was released", self.address)))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            id,
            method: method.to_string(),
            params: params.to_vec(),
        };

        let exchange = write_frame(stream, &request).and_then(|_| read_frame::<_, Response>(stream));
        let response = match exchange {
            Ok(response) => response,
            Err(e) => {
                // a late or partial reply would desync every later call
                Self::drop_stream(&mut guard);
                return Err(transport_error(self.address, &e));
            }
        };

        if response.id != id {
            Self::drop_stream(&mut guard);
            return Err(RpcError::new(
                E_FAIL,
                format!("response id {} does not match request id {}", response.id, id),
            ));
        }
        response.into_result()
    }

    fn drop_stream(guard: &mut MutexGuard<'_, Option<TcpStream>>) {
        if let Some(stream) = guard.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Endpoint for TcpEndpoint {
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, RpcError> {
        self.call(method, args)
    }

    fn type_info_count(&self) -> Result<u32, RpcError> {
        let value = self.call(TYPE_INFO_COUNT_METHOD, &[])?;
        value
            .as_u64()
            .map(|n| n as u32)
            .ok_or_else(|| RpcError::new(E_FAIL, format!("unexpected type info count: {}", value)))
    }

    fn release(&self) {
        if let Some(stream) = self.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!("Released worker endpoint at {}", self.address);
        }
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        self.release();
    }
}

fn transport_error(address: SocketAddr, e: &io::Error) -> RpcError {
    match e.kind() {
        io::ErrorKind::InvalidData => RpcError::new(E_FAIL, format!("malformed frame from {}: {}", address, e)),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            RpcError::new(RPC_E_TIMEOUT, format!("worker at {} did not answer: {}", address, e))
        }
        _ => RpcError::server_unavailable(format!("worker at {} is unavailable: {}", address, e)),
    }
}
