use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written to every new connection before anything else.
pub const PROMPT: &str = "Username?: ";
/// Written when the handshake does not produce a username.
pub const INVALID_USERNAME: &str = "invalid username\n";
/// Broadcast by `display` in place of an actual image upload.
pub const DISPLAY_PLACEHOLDER: &str = "copy file to image server";
/// Longest inbound line; anything longer is split into several messages.
pub const MAX_LINE: usize = 4096;

/// Identifies one accepted transport connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The line sent to a client right after a successful handshake.
pub fn welcome_line(username: &str) -> String {
    format!("hello {}\n", username)
}

/// Every line on the wire is `"<sender>: <text>\n"`.
pub fn format_line(sender: &str, text: &str) -> String {
    format!("{}: {}\n", sender, text.trim_end_matches(['\r', '\n']))
}

/// One chat line on its way through the hub. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub body: String,
    /// Connection excluded from delivery; `None` for bot messages.
    pub origin: Option<ConnId>,
}

impl Message {
    pub fn from_client(origin: ConnId, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            origin: Some(origin),
        }
    }

    pub fn from_bot(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            origin: None,
        }
    }

    pub fn render(&self) -> String {
        format_line(&self.sender, &self.body)
    }
}

/// EventKind tells the application layer what happened on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Joined,
    Message,
    Left,
}

/// Published by the hub for whoever consumes `Gateway::events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub creator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, creator: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            creator: creator.into(),
            text: text.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_broadcast_lines() {
        assert_eq!(format_line("alice", "hi"), "alice: hi\n");
        assert_eq!(format_line("alice", "hi\r\n"), "alice: hi\n");
        assert_eq!(format_line("BOT", "hello bob\n"), "BOT: hello bob\n");
    }

    #[test]
    fn welcome_is_unprefixed() {
        assert_eq!(welcome_line("alice"), "hello alice\n");
    }

    #[test]
    fn bot_messages_have_no_origin() {
        let m = Message::from_bot("BOT", "ping");
        assert_eq!(m.origin, None);
        assert_eq!(m.render(), "BOT: ping\n");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let ev = Event::new(EventKind::Joined, "alice", "");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "joined");
        assert_eq!(json["creator"], "alice");
        assert!(json.get("text").is_none());
    }
}
