use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::gateway::{Destination, Gateway};
use crate::protocol::{Event, Message, DISPLAY_PLACEHOLDER};
use crate::server::{run_hub, HubHandle, Listener};

/// LocalGateway serves plain TCP line clients (telnet, nc, the bundled
/// `client` binary) from a single hub.
pub struct LocalGateway {
    config: RelayConfig,
    hub: Option<HubHandle>,
    hub_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
    stop_listener: CancellationToken,
    conns: CancellationToken,
    events: Option<mpsc::Receiver<Event>>,
    local_addr: Option<SocketAddr>,
}

impl LocalGateway {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            hub: None,
            hub_task: None,
            listener_task: None,
            stop_listener: CancellationToken::new(),
            conns: CancellationToken::new(),
            events: None,
            local_addr: None,
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.hub.is_some()
    }

    /// Usernames currently registered with the hub.
    pub async fn roster(&self) -> Result<Vec<String>, RelayError> {
        self.hub()?.roster().await
    }

    fn hub(&self) -> Result<&HubHandle, RelayError> {
        self.hub.as_ref().ok_or(RelayError::NotRunning)
    }
}

#[async_trait]
impl Gateway for LocalGateway {
    fn name(&self) -> &str {
        "local"
    }

    async fn start(&mut self) -> Result<(), RelayError> {
        if self.hub.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        let listener = Listener::bind(&self.config.addr).await?;
        self.local_addr = Some(listener.local_addr());

        let (hub_tx, hub_rx) = mpsc::channel(self.config.hub_requests.max(1));
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let hub = HubHandle::new(hub_tx);

        self.hub_task = Some(tokio::spawn(run_hub(
            hub_rx,
            event_tx,
            self.config.overflow,
        )));

        self.stop_listener = CancellationToken::new();
        self.conns = CancellationToken::new();
        self.listener_task = Some(tokio::spawn(listener.run(
            hub.clone(),
            self.config.send_buffer,
            self.conns.clone(),
            self.stop_listener.clone(),
        )));

        self.hub = Some(hub);
        self.events = Some(event_rx);
        tracing::info!(gateway = self.name(), bot = %self.config.bot_name, "gateway started");
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(hub) = self.hub.take() else {
            return;
        };
        tracing::info!(gateway = self.name(), "shutting down");

        if let Err(e) = hub.shutdown().await {
            tracing::error!(error = %e, "hub shutdown failed");
        }

        self.stop_listener.cancel();
        if let Some(task) = self.listener_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "listener task failed");
            }
        }

        // connections still in their handshake were never registered
        self.conns.cancel();

        // the hub loop ends once the last worker drops its handle
        drop(hub);
        if let Some(task) = self.hub_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "hub task failed");
            }
        }
        tracing::info!(gateway = self.name(), "stopped");
    }

    async fn tell(&self, dest: &Destination, text: &str) -> Result<(), RelayError> {
        tracing::debug!(dest = %dest, "tell");
        self.hub()?
            .broadcast(Message::from_bot(self.config.bot_name.as_str(), text))
            .await
    }

    async fn display(
        &self,
        dest: &Destination,
        image: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), RelayError> {
        let hub = self.hub()?;
        let mut data = Vec::new();
        let size = image.read_to_end(&mut data).await?;
        tracing::debug!(dest = %dest, bytes = size, "display");
        hub.broadcast(Message::from_bot(
            self.config.bot_name.as_str(),
            DISPLAY_PLACEHOLDER,
        ))
        .await
    }

    fn events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events.take()
    }
}

impl Drop for LocalGateway {
    fn drop(&mut self) {
        self.stop_listener.cancel();
        self.conns.cancel();
    }
}
