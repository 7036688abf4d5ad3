//! Port arbitration.
//!
//! When the configured port is already bound, the bridge must decide whether
//! the occupant is a stale, headless instance of itself (safe to reclaim) or
//! a live instance attached to a visible host session (must not be touched).
//! The decision is made by speaking the bridge's own protocol to the
//! occupant; only an occupant that cannot answer at all is escalated to an
//! OS-level kill, and then only if the process is recognizably ours.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::errors::{BridgeError, Result};
use crate::types::CommandEnvelope;

use super::protocol;

/// Classification of whatever currently holds the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    /// Answered the status probe and reported itself headless: a zombie from
    /// a previous session, safe to ask to stop.
    Headless,
    /// Answered the status probe and reported a visible host session.
    LiveVisible,
    /// Refused the connection, timed out, or answered with something that is
    /// not our protocol.
    Unresponsive,
}

/// The narrow slice of the operating environment the arbiter needs for the
/// force-kill escalation. One real implementation per platform; the arbiter
/// itself never inspects process tables.
pub trait ProcessEnvironment: Send + Sync {
    /// Pid of the process listening on `port`, if it can be determined.
    fn process_listening_on(&self, port: u16) -> Option<u32>;

    /// Whether `pid` belongs to this application family.
    fn is_own_family(&self, pid: u32) -> bool;

    /// Terminates `pid`. Returns whether a signal was delivered.
    fn kill(&self, pid: u32) -> bool;
}

/// Resolves a contended port: probe, reclaim or abort, then retry the bind
/// exactly once. No unbounded retry loop.
pub struct PortArbiter {
    host: String,
    port: u16,
    probe_timeout: Duration,
    reclaim_grace: Duration,
    env: Arc<dyn ProcessEnvironment>,
}

impl PortArbiter {
    pub fn new(config: &BridgeConfig, env: Arc<dyn ProcessEnvironment>) -> Self {
        PortArbiter {
            host: config.host.clone(),
            port: config.port,
            probe_timeout: config.probe_timeout(),
            reclaim_grace: config.reclaim_grace(),
            env,
        }
    }

    /// Runs the arbitration state machine and returns the reclaimed listener.
    ///
    /// `Err(PortConflict)` means the port stays with its current owner:
    /// either a live, user-visible instance holds it, or reclamation failed.
    pub fn resolve(&self) -> Result<TcpListener> {
        match self.probe() {
            Occupant::LiveVisible => {
                info!(port = self.port, "port is owned by a live, user-visible instance; not touching it");
                Err(BridgeError::PortConflict(format!(
                    "port {} is owned by a live, user-visible instance",
                    self.port
                )))
            }
            Occupant::Headless => {
                info!(port = self.port, "detected headless zombie instance; asking it to stop");
                self.send_stop();
                thread::sleep(self.reclaim_grace);
                self.retry_bind()
            }
            Occupant::Unresponsive => {
                debug!(port = self.port, "occupant did not answer the status probe");
                if self.force_kill() {
                    thread::sleep(self.reclaim_grace);
                }
                self.retry_bind()
            }
        }
    }

    /// Probes the occupant with `get_server_status` over the bridge protocol.
    fn probe(&self) -> Occupant {
        match self.probe_headless() {
            Some(true) => Occupant::Headless,
            Some(false) => Occupant::LiveVisible,
            None => Occupant::Unresponsive,
        }
    }

    fn probe_headless(&self) -> Option<bool> {
        let addr = self.occupant_addr()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.probe_timeout).ok()?;
        stream.set_read_timeout(Some(self.probe_timeout)).ok()?;
        stream.set_write_timeout(Some(self.probe_timeout)).ok()?;

        protocol::write_command(&mut stream, &CommandEnvelope::new("get_server_status")).ok()?;
        let body = protocol::read_response(&mut stream).ok()?;
        headless_flag(&body)
    }

    /// Fire-and-forget `stop_server` to the occupant.
    fn send_stop(&self) {
        let Some(addr) = self.occupant_addr() else {
            return;
        };
        let Ok(mut stream) = TcpStream::connect_timeout(&addr, self.probe_timeout) else {
            return;
        };
        let _ = stream.set_write_timeout(Some(self.probe_timeout));
        let _ = protocol::write_command(&mut stream, &CommandEnvelope::new("stop_server"));
    }

    /// Escalation for an occupant that does not speak our protocol: kill it
    /// at the OS level, but only if it is identifiable as our own family.
    /// Returns whether anything was killed.
    fn force_kill(&self) -> bool {
        let Some(pid) = self.env.process_listening_on(self.port) else {
            debug!(port = self.port, "could not identify the process holding the port");
            return false;
        };
        if pid == std::process::id() {
            return false;
        }
        if !self.env.is_own_family(pid) {
            info!(
                port = self.port,
                pid, "port is held by a foreign process; skipping kill"
            );
            return false;
        }
        warn!(port = self.port, pid, "force-killing stale instance");
        self.env.kill(pid)
    }

    /// The single post-arbitration bind attempt.
    fn retry_bind(&self) -> Result<TcpListener> {
        TcpListener::bind((self.host.as_str(), self.port)).map_err(|e| {
            BridgeError::PortConflict(format!(
                "failed to rebind {}:{} after arbitration: {}",
                self.host, self.port, e
            ))
        })
    }

    fn occupant_addr(&self) -> Option<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()?
            .next()
    }
}

/// Extracts the `headless` flag from a status response, checking the result
/// payload first and the envelope top level as a fallback.
fn headless_flag(body: &Value) -> Option<bool> {
    body.get("result")
        .and_then(|r| r.get("headless"))
        .or_else(|| body.get("headless"))
        .and_then(Value::as_bool)
}

/// Process environment that can neither identify nor kill anything. Used on
/// platforms without an implementation and in tests that must not escalate.
pub struct NullProcessEnvironment;

impl ProcessEnvironment for NullProcessEnvironment {
    fn process_listening_on(&self, _port: u16) -> Option<u32> {
        None
    }

    fn is_own_family(&self, _pid: u32) -> bool {
        false
    }

    fn kill(&self, _pid: u32) -> bool {
        false
    }
}

/// `/proc`-based process environment for Unix hosts.
#[cfg(unix)]
pub struct UnixProcessEnvironment {
    family_markers: Vec<String>,
}

#[cfg(unix)]
impl UnixProcessEnvironment {
    /// `family_markers` are the process-name substrings accepted as "our
    /// application family". Substring matching is a deliberate, operator
    /// visible policy: it can false-positive on similarly named processes,
    /// which is why `is_own_family` always gates the kill.
    pub fn new(family_markers: Vec<String>) -> Self {
        UnixProcessEnvironment { family_markers }
    }

    /// Finds the socket inode for a listener on `port` in `/proc/net/tcp`.
    fn inode_for_listener(port: u16) -> Option<u64> {
        let suffix = format!(":{:04X}", port);
        let text = std::fs::read_to_string("/proc/net/tcp").ok()?;
        for line in text.lines().skip(1) {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 10 {
                continue;
            }
            // Column 3 is the socket state; 0A is LISTEN.
            if cols[3] != "0A" {
                continue;
            }
            if !cols[1].to_ascii_uppercase().ends_with(&suffix) {
                continue;
            }
            if let Ok(inode) = cols[9].parse::<u64>() {
                return Some(inode);
            }
        }
        None
    }

    /// Scans `/proc/<pid>/fd` for the process holding the socket inode.
    fn pid_holding_inode(inode: u64) -> Option<u32> {
        let needle = format!("socket:[{}]", inode);
        let proc_dir = std::fs::read_dir("/proc").ok()?;
        for entry in proc_dir.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Ok(pid) = name.parse::<u32>() else {
                continue;
            };
            let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(target) = std::fs::read_link(fd.path()) else {
                    continue;
                };
                if target.to_string_lossy() == needle {
                    return Some(pid);
                }
            }
        }
        None
    }

    fn executable_name(pid: u32) -> Option<String> {
        let exe = std::fs::read_link(format!("/proc/{}/exe", pid)).ok()?;
        exe.file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
    }
}

#[cfg(unix)]
impl ProcessEnvironment for UnixProcessEnvironment {
    fn process_listening_on(&self, port: u16) -> Option<u32> {
        let inode = Self::inode_for_listener(port)?;
        Self::pid_holding_inode(inode)
    }

    fn is_own_family(&self, pid: u32) -> bool {
        let Some(name) = Self::executable_name(pid) else {
            return false;
        };
        self.family_markers
            .iter()
            .any(|marker| name.contains(&marker.to_ascii_lowercase()))
    }

    fn kill(&self, pid: u32) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        // The occupant already failed to answer the protocol probe.
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok()
    }
}

/// Returns the default process environment for the current platform.
pub fn default_process_environment(config: &BridgeConfig) -> Arc<dyn ProcessEnvironment> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessEnvironment::new(config.family_markers.clone()))
    }
    #[cfg(not(unix))]
    {
        let _ = config;
        Arc::new(NullProcessEnvironment)
    }
}
