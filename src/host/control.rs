use crate::event::{EventSender, SessionEvent};
use crate::proto::Event;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Inbound command lines from any connected client, in arrival order.
pub type LineSender = mpsc::UnboundedSender<String>;
pub type LineReceiver = mpsc::UnboundedReceiver<String>;

enum RegistryOp {
    Register {
        id: u64,
        peer: SocketAddr,
        writer: OwnedWriteHalf,
    },
    Deregister {
        id: u64,
    },
    Broadcast {
        line: String,
    },
}

/// Line-delimited control channel server: one reader task per client, all
/// writers owned by a single registry task so registration and broadcast
/// never race. A failed writer is pruned after the broadcast pass and never
/// stops delivery to the others.
pub struct ControlServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    token: CancellationToken,
    event_sender: EventSender,
    registry_tx: mpsc::UnboundedSender<RegistryOp>,
    registry_rx: Mutex<Option<mpsc::UnboundedReceiver<RegistryOp>>>,
    line_tx: LineSender,
}

impl ControlServer {
    pub async fn bind(
        addr: SocketAddr,
        token: CancellationToken,
        event_sender: EventSender,
        line_tx: LineSender,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("Failed to bind control listener on {}: {}", addr, e))?;
        let local_addr = listener.local_addr()?;
        let (registry_tx, registry_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener,
            local_addr,
            token,
            event_sender,
            registry_tx,
            registry_rx: Mutex::new(Some(registry_rx)),
            line_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue an event line for delivery to every registered client. Never
    /// fails; a broken writer is the registry's problem, not the caller's.
    pub fn broadcast(&self, event: &Event) {
        self.registry_tx
            .send(RegistryOp::Broadcast {
                line: event.to_string(),
            })
            .ok();
    }

    pub async fn serve(&self) -> Result<()> {
        let registry_rx = self
            .registry_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("control server already running"))?;
        select! {
            _ = self.token.cancelled() => {
                info!("control server cancelled");
            }
            result = self.accept_loop() => {
                if let Err(e) = result {
                    info!("control accept loop error: {:?}", e);
                }
            }
            _ = Self::run_registry(registry_rx, self.event_sender.clone()) => {}
        }
        Ok(())
    }

    async fn accept_loop(&self) -> Result<()> {
        let mut next_id: u64 = 0;
        loop {
            let (socket, peer) = self.listener.accept().await?;
            next_id += 1;
            let id = next_id;
            info!(%peer, "control client connected");
            let (rd, wr) = socket.into_split();
            self.registry_tx
                .send(RegistryOp::Register { id, peer, writer: wr })
                .ok();
            self.event_sender
                .send(SessionEvent::Status(format!(
                    "Host: Client connected from {}",
                    peer.ip()
                )))
                .ok();

            let line_tx = self.line_tx.clone();
            let registry_tx = self.registry_tx.clone();
            let token = self.token.child_token();
            tokio::spawn(async move {
                Self::read_client(rd, line_tx, token).await;
                registry_tx.send(RegistryOp::Deregister { id }).ok();
            });
        }
    }

    async fn read_client(rd: OwnedReadHalf, line_tx: LineSender, token: CancellationToken) {
        let mut lines = BufReader::new(rd).lines();
        loop {
            let line = select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("control client EOF");
                    break;
                }
                Err(e) => {
                    debug!("control client read error: {}", e);
                    break;
                }
            }
        }
    }

    /// Single owner of every client writer; registration, deregistration and
    /// broadcast are serialized through one queue.
    async fn run_registry(
        mut registry_rx: mpsc::UnboundedReceiver<RegistryOp>,
        event_sender: EventSender,
    ) {
        struct ClientWriter {
            id: u64,
            peer: SocketAddr,
            writer: OwnedWriteHalf,
        }
        let mut writers: Vec<ClientWriter> = Vec::new();

        while let Some(op) = registry_rx.recv().await {
            match op {
                RegistryOp::Register { id, peer, writer } => {
                    writers.push(ClientWriter { id, peer, writer });
                    event_sender
                        .send(SessionEvent::ClientCount(writers.len()))
                        .ok();
                }
                RegistryOp::Deregister { id } => {
                    let before = writers.len();
                    writers.retain(|w| w.id != id);
                    if writers.len() != before {
                        debug!(id, "control client deregistered");
                        event_sender
                            .send(SessionEvent::ClientCount(writers.len()))
                            .ok();
                    }
                }
                RegistryOp::Broadcast { line } => {
                    debug!(line = %line, clients = writers.len(), "broadcasting");
                    let mut dead = Vec::new();
                    for client in writers.iter_mut() {
                        if let Err(e) = write_line(&mut client.writer, &line).await {
                            debug!(peer = %client.peer, "dropping client writer: {}", e);
                            dead.push(client.id);
                        }
                    }
                    if !dead.is_empty() {
                        writers.retain(|w| !dead.contains(&w.id));
                        event_sender
                            .send(SessionEvent::ClientCount(writers.len()))
                            .ok();
                    }
                }
            }
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
