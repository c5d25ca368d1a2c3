use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::protocol::ConnId;
use crate::server::hub::HubHandle;
use crate::server::worker::serve_conn;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Owns the bound endpoint and hands each accepted connection to its own
/// worker task.
pub struct Listener {
    inner: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        let inner = TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
            address: addr.to_string(),
            source: e,
        })?;
        let addr = inner.local_addr()?;
        Ok(Self { inner, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept until `stop` fires. Every worker gets a child of `conns` as its
    /// close signal; already-accepted connections outlive this loop.
    pub async fn run(
        self,
        hub: HubHandle,
        send_buffer: usize,
        conns: CancellationToken,
        stop: CancellationToken,
    ) {
        tracing::info!(addr = %self.addr, "starting listener");
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                result = self.inner.accept() => match result {
                    Ok((conn, peer)) => {
                        let id = ConnId(next_id);
                        next_id += 1;
                        tracing::debug!(conn = %id, peer = %peer, "accepted");
                        tokio::spawn(serve_conn(
                            conn,
                            id,
                            hub.clone(),
                            send_buffer,
                            conns.child_token(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(self.inner);
        tracing::info!(addr = %self.addr, "shutting down listener");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = Listener::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();

        match Listener::bind(&taken).await {
            Err(RelayError::Bind { address, .. }) => assert_eq!(address, taken),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind on {taken} succeeded"),
        }
    }
}
