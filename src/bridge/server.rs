//! Connection listener and lifecycle controller.
//!
//! Owns the bind/listen/accept loop and the run flag. The accept loop runs on
//! a dedicated thread and polls a non-blocking listener on a bounded interval
//! so a stop request is observed promptly; each accepted connection is
//! handled on a short-lived thread of its own.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::document::{query_context, DocumentModel};
use crate::errors::{BridgeError, Result};
use crate::executor::HostExecutor;
use crate::types::{GraphQuery, ResponseEnvelope};

use super::arbiter::{PortArbiter, ProcessEnvironment};
use super::dispatch::{CommandRegistry, HandlerKind};
use super::protocol::{self, Request};

/// Process-wide bridge state. The run flag is the only cross-thread mutable
/// state outside the host executor; it is written through `start`/`stop` (and
/// the builtin `stop_server` handler's stop request) and read by the accept
/// loop.
pub struct ServerState {
    running: AtomicBool,
    host: String,
    port: u16,
    headless: bool,
}

impl ServerState {
    pub fn new(host: impl Into<String>, port: u16, headless: bool) -> Self {
        ServerState {
            running: AtomicBool::new(false),
            host: host.into(),
            port,
            headless,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Signals the accept loop to exit on its next poll.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn headless(&self) -> bool {
        self.headless
    }
}

/// The embedded bridge server.
///
/// `Stopped → Starting → Running → Stopping → Stopped`; `start` and `stop`
/// are the only operations that move between states.
pub struct BridgeServer {
    config: BridgeConfig,
    state: Arc<ServerState>,
    registry: Arc<RwLock<CommandRegistry>>,
    executor: Arc<HostExecutor>,
    env: Arc<dyn ProcessEnvironment>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    bound_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl BridgeServer {
    /// Creates a server over the given document.
    ///
    /// The registry starts with the builtin commands plus the read-only
    /// context queries (`get_context`, `get_objects`, `get_object`,
    /// `get_selected`). Domain handlers are added with
    /// [`register_handler`](Self::register_handler).
    pub fn new(
        config: BridgeConfig,
        document: Arc<dyn DocumentModel>,
        env: Arc<dyn ProcessEnvironment>,
    ) -> Result<Self> {
        let state = Arc::new(ServerState::new(
            config.host.clone(),
            config.port,
            config.headless,
        ));
        let mut registry = CommandRegistry::with_builtins(Arc::clone(&state));
        register_context_queries(&mut registry, document);

        Ok(BridgeServer {
            config,
            state,
            registry: Arc::new(RwLock::new(registry)),
            executor: Arc::new(HostExecutor::new()?),
            env,
            accept_handle: Mutex::new(None),
            bound_addr: Mutex::new(None),
        })
    }

    /// Address the listener actually bound to. Differs from the configured
    /// address when the config asked for port 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self
            .bound_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a domain handler. May be called before or after `start`.
    pub fn register_handler<F>(&self, command: impl Into<String>, kind: HandlerKind, handler: F)
    where
        F: Fn(&serde_json::Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(command, kind, handler);
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Starts the listener. A no-op when already running.
    ///
    /// If the initial bind fails with "address in use" the port arbiter runs
    /// once; a `PortConflict` error leaves the server stopped and is the
    /// operator's signal that another live instance owns the port.
    pub fn start(&self) -> Result<()> {
        if self.state.is_running() {
            return Ok(());
        }

        let addr = self.config.addr();
        let listener = match TcpListener::bind(&addr) {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(%addr, "port already in use; running arbitration");
                let arbiter = PortArbiter::new(&self.config, Arc::clone(&self.env));
                arbiter.resolve()?
            }
            Err(e) => return Err(e.into()),
        };
        listener.set_nonblocking(true)?;
        *self
            .bound_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener.local_addr().ok();

        self.state.set_running(true);
        info!(%addr, "bridge listening");

        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let poll = self.config.accept_poll();
        let read_timeout = self.config.read_timeout();
        let executor_timeout = self.config.executor_timeout();

        let handle = thread::Builder::new()
            .name("graphbridge-accept".to_string())
            .spawn(move || {
                accept_loop(
                    listener,
                    state,
                    registry,
                    executor,
                    poll,
                    read_timeout,
                    executor_timeout,
                );
            })?;

        *self
            .accept_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stops the listener and joins the accept thread.
    ///
    /// The accept loop observes the cleared run flag within one poll
    /// interval, so the join is bounded in practice.
    pub fn stop(&self) {
        self.state.request_stop();
        let handle = self
            .accept_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("accept thread panicked during shutdown");
            }
        }
        info!("bridge stopped");
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    registry: Arc<RwLock<CommandRegistry>>,
    executor: Arc<HostExecutor>,
    poll: Duration,
    read_timeout: Duration,
    executor_timeout: Duration,
) {
    while state.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                let registry = Arc::clone(&registry);
                let executor = Arc::clone(&executor);
                let spawned = thread::Builder::new()
                    .name("graphbridge-conn".to_string())
                    .spawn(move || {
                        handle_connection(stream, &registry, &executor, read_timeout, executor_timeout);
                    });
                if let Err(e) = spawned {
                    warn!("failed to spawn connection thread: {}", e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(poll);
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(poll);
            }
        }
    }
    debug!("accept loop exited");
    // Covers the case where the loop was ended by a stop_server command
    // rather than a stop() call.
    state.set_running(false);
}

/// Frames one request, dispatches it, and writes exactly one response.
///
/// A framing or decode failure is answered with an error envelope on a
/// best-effort basis; the only request that gets no response at all is one
/// whose transport died mid-exchange.
fn handle_connection(
    mut stream: TcpStream,
    registry: &RwLock<CommandRegistry>,
    executor: &HostExecutor,
    read_timeout: Duration,
    executor_timeout: Duration,
) {
    // On some platforms the accepted socket inherits the listener's
    // non-blocking flag; this connection must block with a read timeout.
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("failed to clear non-blocking flag: {}", e);
    }
    if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
        warn!("failed to set read timeout: {}", e);
    }

    match protocol::read_request(&mut stream) {
        Ok(Request::Preflight) => {
            if let Err(e) = protocol::write_preflight(&mut stream) {
                debug!("failed to write preflight response: {}", e);
            }
        }
        Ok(Request::Command(envelope)) => {
            debug!(command = %envelope.command, "dispatching");
            let response = registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .dispatch(&envelope, executor, executor_timeout);
            if let Err(e) = protocol::write_response(&mut stream, &response) {
                warn!(command = %envelope.command, "failed to send response: {}", e);
            }
        }
        Err(e) => {
            debug!("request failed to frame: {}", e);
            let response = ResponseEnvelope::error(e.to_string());
            if let Err(e) = protocol::write_response(&mut stream, &response) {
                debug!("failed to send error response: {}", e);
            }
        }
    }
}

/// Installs the read-only context queries over the document model.
fn register_context_queries(registry: &mut CommandRegistry, document: Arc<dyn DocumentModel>) {
    let doc = Arc::clone(&document);
    registry.register("get_context", HandlerKind::ReadOnly, move |_params| {
        Ok(serde_json::to_value(doc.snapshot())?)
    });

    let doc = Arc::clone(&document);
    registry.register("get_objects", HandlerKind::ReadOnly, move |params| {
        let query: GraphQuery = serde_json::from_value(Value::Object(params.clone()))?;
        let result = query_context(doc.as_ref(), &query.target_ids, query.depth);
        Ok(serde_json::to_value(result)?)
    });

    let doc = Arc::clone(&document);
    registry.register("get_object", HandlerKind::ReadOnly, move |params| {
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Handler("missing 'id' parameter".to_string()))?;
        let node = doc
            .find_by_id(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
        Ok(serde_json::to_value(node)?)
    });

    registry.register("get_selected", HandlerKind::ReadOnly, move |params| {
        let depth = params.get("depth").and_then(Value::as_i64).unwrap_or(0);
        let selected = document.selected_ids();
        let result = query_context(document.as_ref(), &selected, depth);
        Ok(serde_json::to_value(result)?)
    });
}
