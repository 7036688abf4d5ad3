//! Command registry and dispatch.
//!
//! Maps a command type string to a registered handler and normalizes every
//! outcome into a [`ResponseEnvelope`]. A handler failure of any kind (an
//! `Err`, a panic, or an executor timeout) becomes an error envelope; it is
//! never allowed to propagate into the accept loop.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::errors::{BridgeError, Result};
use crate::executor::HostExecutor;
use crate::types::{CommandEnvelope, ResponseEnvelope};

use super::server::ServerState;

/// How a handler interacts with the document.
///
/// Read-only handlers run inline on the connection thread; mutating handlers
/// are marshaled onto the single-threaded host executor so at most one
/// mutation touches the document at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    ReadOnly,
    Mutating,
}

/// A command handler: parameters in, JSON result out.
pub type Handler = Arc<dyn Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static>;

struct RegisteredHandler {
    kind: HandlerKind,
    func: Handler,
}

/// Registry of command handlers keyed by command type string.
pub struct CommandRegistry {
    handlers: HashMap<String, RegisteredHandler>,
}

impl CommandRegistry {
    /// Creates an empty registry. Most callers want [`with_builtins`]
    /// instead; the builtin commands are what the port arbiter probes for.
    ///
    /// [`with_builtins`]: CommandRegistry::with_builtins
    pub fn new() -> Self {
        CommandRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Creates a registry pre-populated with the commands every bridge
    /// instance must answer: `test`, `get_server_status`, and `stop_server`.
    pub fn with_builtins(state: Arc<ServerState>) -> Self {
        let mut registry = Self::new();

        registry.register("test", HandlerKind::ReadOnly, |_params| {
            Ok(json!("graphbridge alive"))
        });

        let status_state = Arc::clone(&state);
        registry.register("get_server_status", HandlerKind::ReadOnly, move |_params| {
            Ok(json!({
                "headless": status_state.headless(),
                "pid": std::process::id(),
                "running": status_state.is_running(),
                "host": status_state.host(),
                "port": status_state.port(),
            }))
        });

        registry.register("stop_server", HandlerKind::ReadOnly, move |_params| {
            state.request_stop();
            Ok(json!("Server stopping"))
        });

        registry
    }

    /// Registers a handler for `command`, replacing any previous one.
    pub fn register<F>(&mut self, command: impl Into<String>, kind: HandlerKind, handler: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(
            command.into(),
            RegisteredHandler {
                kind,
                func: Arc::new(handler),
            },
        );
    }

    /// Returns whether a handler is registered for `command`.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Dispatches an envelope to its handler and normalizes the outcome.
    ///
    /// Mutating handlers run on `executor` and are awaited for at most
    /// `timeout`; on timeout the client gets an error envelope but the
    /// submitted operation may still complete afterwards.
    pub fn dispatch(
        &self,
        envelope: &CommandEnvelope,
        executor: &HostExecutor,
        timeout: Duration,
    ) -> ResponseEnvelope {
        let Some(registered) = self.handlers.get(&envelope.command) else {
            return ResponseEnvelope::error(BridgeError::UnknownCommand.to_string());
        };

        match registered.kind {
            HandlerKind::ReadOnly => run_handler(&registered.func, &envelope.params),
            HandlerKind::Mutating => {
                let handler = Arc::clone(&registered.func);
                let params = envelope.params.clone();
                let task = executor.submit(move || run_handler(&handler, &params));
                match task.wait(timeout) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(command = %envelope.command, "mutating handler did not finish in time");
                        ResponseEnvelope::error(e.to_string())
                    }
                }
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a handler, containing both `Err` returns and panics.
fn run_handler(handler: &Handler, params: &Map<String, Value>) -> ResponseEnvelope {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
        Ok(Ok(result)) => ResponseEnvelope::success(result),
        Ok(Err(e)) => ResponseEnvelope::error(e.to_string()),
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(%message, "handler panicked");
            ResponseEnvelope::error(format!("handler panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BridgeError;
    use crate::types::ResponseStatus;

    fn dispatch_one(registry: &CommandRegistry, command: &str) -> ResponseEnvelope {
        let executor = HostExecutor::new().unwrap();
        registry.dispatch(
            &CommandEnvelope::new(command),
            &executor,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn unknown_command_yields_stable_error_envelope() {
        let registry = CommandRegistry::new();
        for command in ["bogus", "also_bogus", "bogus"] {
            let response = dispatch_one(&registry, command);
            assert_eq!(response.status, ResponseStatus::Error);
            assert_eq!(response.result, json!("Unknown command"));
        }
    }

    #[test]
    fn read_only_handler_runs_inline() {
        let mut registry = CommandRegistry::new();
        registry.register("echo_count", HandlerKind::ReadOnly, |params| {
            Ok(json!(params.len()))
        });
        let response = dispatch_one(&registry, "echo_count");
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.result, json!(0));
    }

    #[test]
    fn handler_error_becomes_error_envelope() {
        let mut registry = CommandRegistry::new();
        registry.register("fails", HandlerKind::ReadOnly, |_| {
            Err(BridgeError::NotFound("abc".to_string()))
        });
        let response = dispatch_one(&registry, "fails");
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.result, json!("not found: abc"));
    }

    #[test]
    fn handler_panic_is_contained() {
        let mut registry = CommandRegistry::new();
        registry.register("explodes", HandlerKind::ReadOnly, |_| {
            panic!("boom");
        });
        let response = dispatch_one(&registry, "explodes");
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.result.as_str().unwrap().contains("boom"));
    }

    #[test]
    fn mutating_handler_goes_through_executor() {
        let mut registry = CommandRegistry::new();
        registry.register("mutate", HandlerKind::Mutating, move |_| {
            Ok(json!(std::thread::current().name().map(str::to_string)))
        });
        let response = dispatch_one(&registry, "mutate");
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.result, json!("graphbridge-host"));
    }

    #[test]
    fn slow_mutating_handler_times_out() {
        let mut registry = CommandRegistry::new();
        registry.register("slow", HandlerKind::Mutating, |_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(json!(null))
        });
        let executor = HostExecutor::new().unwrap();
        let response = registry.dispatch(
            &CommandEnvelope::new("slow"),
            &executor,
            Duration::from_millis(20),
        );
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.result.as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn builtins_are_always_present() {
        let state = Arc::new(ServerState::new("127.0.0.1", 9999, true));
        let registry = CommandRegistry::with_builtins(state);
        for command in ["test", "get_server_status", "stop_server"] {
            assert!(registry.contains(command), "missing builtin: {}", command);
        }
    }

    #[test]
    fn get_server_status_reports_headless_flag() {
        let state = Arc::new(ServerState::new("127.0.0.1", 9999, true));
        let registry = CommandRegistry::with_builtins(Arc::clone(&state));
        let response = dispatch_one(&registry, "get_server_status");
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.result["headless"], json!(true));
        assert_eq!(response.result["port"], json!(9999));
    }

    #[test]
    fn stop_server_clears_the_run_flag() {
        let state = Arc::new(ServerState::new("127.0.0.1", 9999, false));
        state.set_running(true);
        let registry = CommandRegistry::with_builtins(Arc::clone(&state));
        let response = dispatch_one(&registry, "stop_server");
        assert_eq!(response.status, ResponseStatus::Success);
        assert!(!state.is_running());
    }
}
