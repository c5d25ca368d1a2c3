//! Gateways connect the relay to whatever sits above it (a bot, a bridge).
//!
//! Callers only hold a `Box<dyn Gateway>`; the relay core never depends on
//! which variant is behind it.

mod local;

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::Event;

pub use local::LocalGateway;

/// Where a message should be shown. The local relay is a single broadcast
/// domain, so it accepts any destination and delivers to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(pub String);

impl From<&str> for Destination {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Destination {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    fn name(&self) -> &str;

    /// Bind and begin serving. Bind failures are returned, not logged.
    async fn start(&mut self) -> Result<(), RelayError>;

    /// Close every connection and stop accepting. Safe to call twice.
    async fn stop(&mut self);

    /// Best-effort send of a bot message.
    async fn tell(&self, dest: &Destination, text: &str) -> Result<(), RelayError>;

    /// Best-effort image display. Variants without image support may treat
    /// this as a no-op.
    async fn display(
        &self,
        dest: &Destination,
        image: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), RelayError>;

    /// Stream of joins, messages, and departures. Yields the receiver once
    /// per start.
    fn events(&mut self) -> Option<mpsc::Receiver<Event>>;
}
