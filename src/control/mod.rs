//! Remote control plane
//!
//! JSON-line TCP protocol for pushing rule updates and querying live
//! counters, plus the listener that serves it.

mod handler;
mod protocol;
mod server;

pub use handler::handle_command;
pub use protocol::{ControlCommand, ControlResponse};
pub use server::{bind, serve};
