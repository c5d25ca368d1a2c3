pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod server;

pub use config::{OverflowPolicy, RelayConfig};
pub use error::RelayError;
pub use gateway::{Destination, Gateway, LocalGateway};
pub use protocol::{ConnId, Event, EventKind, Message};
