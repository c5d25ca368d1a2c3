use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::protocol::{self, ConnId, Message, MAX_LINE};
use crate::server::hub::{HubHandle, Registration};

/// Per-connection state. Owned by the worker; the hub only ever sees the
/// sending side of `outbound` and a clone of `closer`.
pub struct ClientHandle {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub username: String,
    reader: BufReader<OwnedReadHalf>,
    closer: CancellationToken,
    drain: JoinHandle<()>,
}

/// serve_conn runs one connection from handshake to close. It never returns
/// an error: transport failures end this connection and nothing else.
pub async fn serve_conn(
    conn: TcpStream,
    id: ConnId,
    hub: HubHandle,
    send_buffer: usize,
    closer: CancellationToken,
) {
    let peer = match conn.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(conn = %id, error = %e, "peer address unavailable");
            return;
        }
    };

    let mut client = match open(conn, id, peer, &hub, send_buffer, closer).await {
        Ok(client) => client,
        Err(e) => {
            tracing::info!(conn = %id, peer = %peer, error = %e, "connection rejected");
            return;
        }
    };

    if let Err(e) = client.read_loop(&hub).await {
        tracing::debug!(conn = %id, user = %client.username, error = %e, "read failed");
    }
    client.close(&hub).await;
}

/// Prompt, read the username, and register with the hub. Nothing is
/// registered unless every step succeeds.
async fn open(
    conn: TcpStream,
    id: ConnId,
    peer: SocketAddr,
    hub: &HubHandle,
    send_buffer: usize,
    closer: CancellationToken,
) -> Result<ClientHandle, RelayError> {
    let (reader, mut writer) = conn.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(protocol::PROMPT.as_bytes()).await?;

    let username = tokio::select! {
        _ = closer.cancelled() => return Err(RelayError::Handshake("closed during handshake".into())),
        res = read_username(&mut reader) => res,
    };
    let username = match username {
        Ok(name) => name,
        Err(e) => {
            writer.write_all(protocol::INVALID_USERNAME.as_bytes()).await.ok();
            writer.shutdown().await.ok();
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::channel::<String>(send_buffer.max(1));
    // first item in the queue, so it precedes any broadcast
    tx.try_send(protocol::welcome_line(&username)).ok();

    hub.register(Registration {
        id,
        username: username.clone(),
        tx,
        closer: closer.clone(),
    })
    .await?;

    tracing::info!(conn = %id, peer = %peer, user = %username, "new connection");

    let drain = tokio::spawn(write_pump(id, writer, rx, closer.clone()));

    Ok(ClientHandle {
        id,
        peer,
        username,
        reader,
        closer,
        drain,
    })
}

async fn read_username<R>(reader: &mut R) -> Result<String, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(frame) = LineFramer::default().next_line(reader).await? else {
        return Err(RelayError::Handshake("connection closed before username".into()));
    };
    if frame.truncated {
        return Err(RelayError::Handshake("username too long".into()));
    }
    let name = frame.text.trim().to_string();
    if name.is_empty() {
        return Err(RelayError::Handshake("empty username".into()));
    }
    Ok(name)
}

/// One inbound line, or the first `MAX_LINE` bytes of a longer one.
#[derive(Debug, PartialEq, Eq)]
struct Frame {
    text: String,
    /// The line continues in the next frame.
    truncated: bool,
}

/// Splits inbound bytes into frames of at most `MAX_LINE` bytes. A split
/// never lands inside a UTF-8 sequence: the partial character is carried
/// into the next frame.
#[derive(Default)]
struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    async fn next_line<R>(&mut self, reader: &mut R) -> std::io::Result<Option<Frame>>
    where
        R: AsyncBufRead + Unpin,
    {
        let room = MAX_LINE.saturating_sub(self.pending.len()).max(1);
        let mut buf = std::mem::take(&mut self.pending);
        let n = reader.take(room as u64).read_until(b'\n', &mut buf).await?;
        if buf.is_empty() {
            return Ok(None);
        }

        let truncated = n == room && buf.last() != Some(&b'\n');
        if truncated {
            let cut = char_boundary(&buf);
            self.pending = buf.split_off(cut);
        }
        let text = String::from_utf8(buf)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        Ok(Some(Frame { text, truncated }))
    }
}

/// Length of `buf` without a trailing incomplete UTF-8 sequence.
fn char_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(4) {
        let i = len - back;
        let b = buf[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if i > 0 && i + width > len {
            return i;
        }
        return len;
    }
    len
}

/// Write pump: the only consumer of this client's outbound queue.
async fn write_pump(
    id: ConnId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    closer: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            _ = closer.cancelled() => break,
            data = rx.recv() => data,
        };
        let Some(data) = data else { break };
        // a peer that stopped reading must not pin this task past a forced close
        let res = tokio::select! {
            _ = closer.cancelled() => break,
            res = writer.write_all(data.as_bytes()) => res,
        };
        if let Err(e) = res {
            tracing::debug!(conn = %id, error = %e, "write failed");
            closer.cancel();
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(conn = %id, error = %e, "close failed");
    }
    tracing::debug!(conn = %id, "write pump ended");
}

impl ClientHandle {
    /// Read lines until EOF, a read error, or a forced close.
    async fn read_loop(&mut self, hub: &HubHandle) -> Result<(), RelayError> {
        let mut framer = LineFramer::default();
        loop {
            let frame = tokio::select! {
                _ = self.closer.cancelled() => return Ok(()),
                frame = framer.next_line(&mut self.reader) => frame?,
            };
            let Some(frame) = frame else {
                return Ok(());
            };

            let text = frame.text;
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }
            hub.broadcast(Message::from_client(self.id, self.username.as_str(), text))
                .await?;
        }
    }

    /// Deregister first, then release the transport.
    async fn close(self, hub: &HubHandle) {
        if hub.unregister(self.id).await.is_err() {
            tracing::debug!(conn = %self.id, "hub gone before unregister");
        }
        self.closer.cancel();
        self.drain.await.ok();
        tracing::info!(conn = %self.id, peer = %self.peer, user = %self.username, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn username_is_trimmed() {
        let mut input: &[u8] = b"  alice \r\nhi\n";
        assert_eq!(read_username(&mut input).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn blank_username_is_rejected() {
        let mut input: &[u8] = b"   \n";
        assert!(matches!(
            read_username(&mut input).await,
            Err(RelayError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn eof_before_username_is_rejected() {
        let mut input: &[u8] = b"";
        assert!(matches!(
            read_username(&mut input).await,
            Err(RelayError::Handshake(_))
        ));
    }

    async fn frames(mut input: &[u8]) -> Vec<Frame> {
        let mut framer = LineFramer::default();
        let mut out = Vec::new();
        while let Some(frame) = framer.next_line(&mut input).await.unwrap() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn long_line_is_split_at_max_len() {
        let mut input = "x".repeat(MAX_LINE + 10);
        input.push('\n');
        let got = frames(input.as_bytes()).await;

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].text, "x".repeat(MAX_LINE));
        assert!(got[0].truncated);
        assert_eq!(got[1].text, format!("{}\n", "x".repeat(10)));
        assert!(!got[1].truncated);
    }

    #[tokio::test]
    async fn split_never_cuts_a_character() {
        // the two bytes of 'é' straddle the MAX_LINE cut
        let input = format!("{}é\n", "a".repeat(MAX_LINE - 1));
        let got = frames(input.as_bytes()).await;

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].text, "a".repeat(MAX_LINE - 1));
        assert_eq!(got[1].text, "é\n");
        assert!(got.iter().all(|f| !f.text.contains('\u{FFFD}')));
    }

    #[tokio::test]
    async fn four_byte_character_at_the_cut() {
        let input = format!("{}🦀 ok\n", "a".repeat(MAX_LINE - 2));
        let got = frames(input.as_bytes()).await;

        let joined: String = got.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(joined, input);
        assert_eq!(got[0].text.len(), MAX_LINE - 2);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let got = frames(b"hi \xff there\nnext\n").await;
        assert_eq!(got[0].text, "hi \u{FFFD} there\n");
        assert_eq!(got[1].text, "next\n");
    }

    #[tokio::test]
    async fn unterminated_last_line_is_kept() {
        let got = frames(b"one\ntwo").await;
        assert_eq!(
            got,
            vec![
                Frame { text: "one\n".into(), truncated: false },
                Frame { text: "two".into(), truncated: false },
            ]
        );
    }

    #[tokio::test]
    async fn overlong_username_is_rejected() {
        let input = format!("{}\nhi\n", "n".repeat(MAX_LINE + 1));
        let mut input = input.as_bytes();
        assert!(matches!(
            read_username(&mut input).await,
            Err(RelayError::Handshake(_))
        ));
    }

    #[test]
    fn boundary_of_complete_text_is_its_length() {
        assert_eq!(char_boundary(b"abc"), 3);
        assert_eq!(char_boundary("aé".as_bytes()), 3);
        assert_eq!(char_boundary(&"aé".as_bytes()[..2]), 1);
        assert_eq!(char_boundary(&"a🦀".as_bytes()[..3]), 1);
    }
}
