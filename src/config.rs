use std::str::FromStr;

/// Default listen address of the local gateway.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8889";
/// Display name used for bot-originated messages.
pub const DEFAULT_BOT_NAME: &str = "BOT";

const SEND_BUF: usize = 256;
const HUB_REQUESTS: usize = 256;
const EVENT_BUF: usize = 64;

/// What the hub does when a client's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the delivery for that client only; it stays connected.
    #[default]
    DropNewest,
    /// Force-close the lagging client's connection.
    Disconnect,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop-newest" => Ok(Self::DropNewest),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!(
                "unknown overflow policy {other:?} (expected drop-newest or disconnect)"
            )),
        }
    }
}

/// Runtime settings for a [`LocalGateway`](crate::LocalGateway).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP address to listen on
    pub addr: String,
    /// Sender name attached to `tell`/`display` broadcasts
    pub bot_name: String,
    /// Capacity of each client's outbound queue
    pub send_buffer: usize,
    /// Capacity of the hub's inbound request channel
    pub hub_requests: usize,
    /// Capacity of the application event channel
    pub event_buffer: usize,
    pub overflow: OverflowPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            bot_name: DEFAULT_BOT_NAME.to_string(),
            send_buffer: SEND_BUF,
            hub_requests: HUB_REQUESTS,
            event_buffer: EVENT_BUF,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overflow_policy() {
        assert_eq!(
            "drop-newest".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::DropNewest)
        );
        assert_eq!(
            "disconnect".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::Disconnect)
        );
        assert!("drop-oldest".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn defaults_match_local_gateway() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.addr, "0.0.0.0:8889");
        assert_eq!(cfg.bot_name, "BOT");
        assert_eq!(cfg.overflow, OverflowPolicy::DropNewest);
        assert!(cfg.send_buffer > 0);
    }
}
