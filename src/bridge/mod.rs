//! The bridge core: wire protocol, command dispatch, port arbitration, and
//! the listener lifecycle.

/// Pseudo-HTTP framing for requests and responses.
pub mod protocol;

/// Command registry and dispatch.
pub mod dispatch;

/// Port arbitration and the process-environment seam.
pub mod arbiter;

/// Connection listener and lifecycle controller.
pub mod server;

pub use arbiter::{
    default_process_environment, NullProcessEnvironment, Occupant, PortArbiter,
    ProcessEnvironment,
};
pub use dispatch::{CommandRegistry, Handler, HandlerKind};
pub use protocol::Request;
pub use server::{BridgeServer, ServerState};
