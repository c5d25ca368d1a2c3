use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::OverflowPolicy;
use crate::error::RelayError;
use crate::protocol::{ConnId, Event, EventKind, Message};

/// What the hub keeps for each live connection: never the socket itself,
/// only the way to reach and to close it.
pub struct Registration {
    pub id: ConnId,
    pub username: String,
    pub tx: mpsc::Sender<String>,
    pub closer: CancellationToken,
}

pub enum HubCommand {
    Register(Registration),
    Unregister(ConnId),
    Broadcast(Message),
    /// Force-close every registered connection.
    Shutdown,
    /// Usernames of the registered clients, in connection order.
    Roster(oneshot::Sender<Vec<String>>),
}

/// Cloneable submit side of the hub's request channel.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub fn new(tx: mpsc::Sender<HubCommand>) -> Self {
        Self { tx }
    }

    async fn submit(&self, cmd: HubCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).await.map_err(|_| RelayError::HubClosed)
    }

    pub async fn register(&self, reg: Registration) -> Result<(), RelayError> {
        self.submit(HubCommand::Register(reg)).await
    }

    pub async fn unregister(&self, id: ConnId) -> Result<(), RelayError> {
        self.submit(HubCommand::Unregister(id)).await
    }

    pub async fn broadcast(&self, msg: Message) -> Result<(), RelayError> {
        self.submit(HubCommand::Broadcast(msg)).await
    }

    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.submit(HubCommand::Shutdown).await
    }

    pub async fn roster(&self) -> Result<Vec<String>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Roster(tx)).await?;
        rx.await.map_err(|_| RelayError::HubClosed)
    }
}

/// run_hub owns the client registry and applies requests one at a time, in
/// arrival order. It returns once every `HubHandle` is dropped.
/// It must be spawned as a tokio task.
pub async fn run_hub(
    mut rx: mpsc::Receiver<HubCommand>,
    events: mpsc::Sender<Event>,
    overflow: OverflowPolicy,
) {
    let mut clients: HashMap<ConnId, Registration> = HashMap::new();
    let mut closing = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register(reg) => {
                if closing {
                    // raced with Shutdown: close it right away
                    tracing::info!(conn = %reg.id, user = %reg.username, "register after shutdown, closing");
                    reg.closer.cancel();
                    continue;
                }
                publish(&events, Event::new(EventKind::Joined, reg.username.as_str(), ""));
                let (id, username) = (reg.id, reg.username.clone());
                if clients.insert(reg.id, reg).is_some() {
                    tracing::warn!(conn = %id, "registration replaced");
                }
                tracing::info!(conn = %id, user = %username, total = clients.len(), "+client");
            }
            HubCommand::Unregister(id) => {
                if let Some(reg) = clients.remove(&id) {
                    tracing::info!(conn = %id, user = %reg.username, total = clients.len(), "-client");
                    publish(&events, Event::new(EventKind::Left, reg.username, ""));
                }
            }
            HubCommand::Broadcast(msg) => {
                let line = msg.render();
                tracing::debug!(user = %msg.sender, out = %line.trim_end(), "sending message");

                for (id, reg) in &clients {
                    if Some(*id) == msg.origin {
                        continue;
                    }
                    match reg.tx.try_send(line.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => match overflow {
                            OverflowPolicy::DropNewest => {
                                tracing::warn!(conn = %id, user = %reg.username, "queue full, message dropped");
                            }
                            OverflowPolicy::Disconnect => {
                                tracing::warn!(conn = %id, user = %reg.username, "queue full, disconnecting slow client");
                                reg.closer.cancel();
                            }
                        },
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!(conn = %id, "queue closed, awaiting unregister");
                        }
                    }
                }

                if msg.origin.is_some() {
                    publish(&events, Event::new(EventKind::Message, msg.sender, msg.body));
                }
            }
            HubCommand::Shutdown => {
                closing = true;
                tracing::info!(total = clients.len(), "closing all client connections");
                for reg in clients.values() {
                    reg.closer.cancel();
                }
            }
            HubCommand::Roster(reply) => {
                let mut regs: Vec<&Registration> = clients.values().collect();
                regs.sort_by_key(|r| r.id);
                let names = regs.into_iter().map(|r| r.username.clone()).collect();
                reply.send(names).ok();
            }
        }
    }

    tracing::debug!("hub stopped");
}

fn publish(events: &mpsc::Sender<Event>, ev: Event) {
    if let Err(TrySendError::Full(ev)) = events.try_send(ev) {
        tracing::debug!(creator = %ev.creator, "event channel full, event dropped");
    }
}
