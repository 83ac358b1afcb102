//! Worker side of the loopback transport.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Value};

use super::frame::{read_frame, write_frame};
use super::registry::{LocalRegistry, Registration};
use super::{Request, Response, TYPE_INFO_COUNT_METHOD};
use crate::endpoint::{ClassId, RpcError};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Serves method calls for a registered worker.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError>;

    fn type_info_count(&self) -> u32 {
        1
    }
}

impl<F> Handler for F
where
    F: Fn(&str, &[Value]) -> Result<Value, RpcError> + Send + Sync + 'static,
{
    fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        self(method, params)
    }
}

/// A running worker endpoint: a loopback listener plus its registration.
///
/// Dropping the server unregisters it and closes every open connection, so
/// connected hosts observe the worker as gone.
pub struct WorkerServer {
    class_id: ClassId,
    address: SocketAddr,
    registry: LocalRegistry,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl WorkerServer {
    /// Bind, start serving `handler` and publish the registration.
    pub fn start(registry: LocalRegistry, class_id: ClassId, handler: impl Handler) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let address = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let accept_thread = {
            let shutdown = shutdown.clone();
            let connections = connections.clone();
            std::thread::Builder::new()
                .name(format!("worker-accept-{}", address.port()))
                .spawn(move || accept_loop(listener, handler, shutdown, connections))?
        };

        let server = Self {
            class_id,
            address,
            registry,
            shutdown,
            connections,
            accept_thread: Some(accept_thread),
        };
        server.registry.register(&Registration {
            class_id,
            address,
            pid: std::process::id(),
        })?;
        Ok(server)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn class_id(&self) -> &ClassId {
        &self.class_id
    }

    /// Block until the server is shut down from another thread.
    pub fn wait(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }

    /// Handle that stops the server when set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.registry.unregister(&self.class_id, std::process::id()) {
            tracing::warn!("Failed to unregister {}: {}", self.class_id, e);
        }
        for stream in self.connections.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!("Accepted host connection from {}", peer);
                if let Err(e) = track_and_serve(stream, handler.clone(), &connections) {
                    tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn track_and_serve(
    stream: TcpStream,
    handler: Arc<dyn Handler>,
    connections: &Mutex<Vec<TcpStream>>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    connections
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(stream.try_clone()?);
    std::thread::spawn(move || serve_connection(stream, handler));
    Ok(())
}

fn serve_connection(mut stream: TcpStream, handler: Arc<dyn Handler>) {
    loop {
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::debug!("Closing host connection: {}", e);
                }
                return;
            }
        };

        let result = if request.method == TYPE_INFO_COUNT_METHOD {
            Ok(json!(handler.type_info_count()))
        } else {
            handler.call(&request.method, &request.params)
        };

        if let Err(e) = write_frame(&mut stream, &Response::from_result(request.id, result)) {
            tracing::debug!("Failed to answer host: {}", e);
            return;
        }
    }
}
