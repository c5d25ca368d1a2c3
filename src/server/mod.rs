//! The relay core: hub, per-connection workers, and the accept loop.

pub mod hub;
pub mod listener;
pub mod worker;

pub use hub::{run_hub, HubCommand, HubHandle, Registration};
pub use listener::Listener;
pub use worker::{serve_conn, ClientHandle};
