use crate::config::ClientConfig;
use crate::event::{EventReceiver, EventSender, SessionEvent};
use crate::media::device::SilenceDevice;
use crate::media::AudioDevice;
use crate::proto::{Command, Event};
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod audio;
pub use audio::AudioLink;

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub struct ClientBuilder {
    config: Option<ClientConfig>,
    token: Option<CancellationToken>,
    device: Option<Arc<dyn AudioDevice>>,
}

/// The client engine: exactly one control connection to one host, a single
/// serialized command writer, and the client half of the audio bridge. A
/// dropped connection is reported and left down; reconnecting requires an
/// explicit restart.
pub struct Client {
    pub config: ClientConfig,
    server_addr: SocketAddr,
    token: CancellationToken,
    event_sender: EventSender,
    command_tx: CommandSender,
    command_rx: Mutex<Option<CommandReceiver>>,
    audio: Arc<AudioLink>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            token: None,
            device: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn build(self) -> Result<Client> {
        let config = self.config.unwrap_or_default();
        let token = self.token.unwrap_or_else(CancellationToken::new);
        let device = self.device.unwrap_or_else(|| Arc::new(SilenceDevice));

        let server_addr: SocketAddr = config
            .server
            .as_deref()
            .ok_or_else(|| anyhow!("No server address configured"))?
            .parse()
            .map_err(|e| anyhow!("Invalid server address: {}", e))?;
        let audio_addr = SocketAddr::new(server_addr.ip(), config.audio_port);

        let (event_sender, _) = tokio::sync::broadcast::channel(64);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let audio = Arc::new(AudioLink::new(
            audio_addr,
            config.audio_retry_count,
            Duration::from_millis(config.audio_retry_delay_ms),
            device,
            token.child_token(),
            event_sender.clone(),
        ));

        Ok(Client {
            config,
            server_addr,
            token,
            event_sender,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            audio,
        })
    }
}

impl Client {
    pub fn subscribe(&self) -> EventReceiver {
        self.event_sender.subscribe()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Queue a command for the writer task. Failures surface as status
    /// events, never as errors to the caller.
    pub fn send_command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            self.event_sender
                .send(SessionEvent::Status(
                    "Client: Not connected to a server.".to_string(),
                ))
                .ok();
        }
    }

    pub async fn serve(&self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("client already running"))?;

        self.event_sender
            .send(SessionEvent::Status(format!(
                "Client: Attempting to connect to {}",
                self.server_addr
            )))
            .ok();
        let socket = match TcpStream::connect(self.server_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                self.event_sender
                    .send(SessionEvent::Status(format!(
                        "Client: Connection error - {}",
                        e
                    )))
                    .ok();
                return Err(anyhow!("connect to {}: {}", self.server_addr, e));
            }
        };
        info!(addr = %self.server_addr, "connected to host");
        self.event_sender
            .send(SessionEvent::Connected(self.server_addr))
            .ok();
        self.event_sender
            .send(SessionEvent::Status(format!(
                "Client: Connected to {}",
                self.server_addr
            )))
            .ok();

        let (rd, wr) = socket.into_split();
        select! {
            _ = self.token.cancelled() => {}
            _ = Self::write_commands(wr, &mut command_rx, self.event_sender.clone()) => {}
            _ = self.read_loop(rd) => {}
        }

        self.audio.teardown().await;
        self.event_sender.send(SessionEvent::Disconnected).ok();
        self.event_sender
            .send(SessionEvent::Status(
                "Client: Disconnected from server.".to_string(),
            ))
            .ok();
        info!("disconnected from host");
        Ok(())
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    async fn write_commands(
        mut wr: OwnedWriteHalf,
        command_rx: &mut CommandReceiver,
        event_sender: EventSender,
    ) {
        while let Some(command) = command_rx.recv().await {
            let line = format!("{}\n", command);
            if let Err(e) = wr.write_all(line.as_bytes()).await {
                warn!("error sending command: {}", e);
                event_sender
                    .send(SessionEvent::Status(
                        "Client: Error sending command.".to_string(),
                    ))
                    .ok();
                break;
            }
        }
    }

    async fn read_loop(&self, rd: OwnedReadHalf) {
        let mut lines = BufReader::new(rd).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_message(line.trim()).await,
                Ok(None) => {
                    debug!("server EOF");
                    break;
                }
                Err(e) => {
                    warn!("control read error: {}", e);
                    break;
                }
            }
        }
    }

    async fn handle_message(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        debug!(line, "message from host");
        match Event::parse(line) {
            Some(Event::Ringing { number, name }) => {
                self.event_sender
                    .send(SessionEvent::IncomingCall { number, name })
                    .ok();
            }
            Some(Event::CallStarted { number, name }) => {
                self.event_sender
                    .send(SessionEvent::CallStarted { number, name })
                    .ok();
                // the call is live: open the audio socket and report readiness
                self.spawn_audio_connector();
            }
            Some(Event::CallIdle) => {
                self.audio.stop_bridge().await;
                self.event_sender.send(SessionEvent::CallEnded).ok();
                self.event_sender
                    .send(SessionEvent::Status("Client: Call ended.".to_string()))
                    .ok();
            }
            Some(Event::StartAudioBridge) => match self.audio.start_bridge().await {
                Ok(()) => {
                    self.event_sender
                        .send(SessionEvent::Status(
                            "Client: Audio bridge started.".to_string(),
                        ))
                        .ok();
                }
                Err(e) => {
                    warn!("cannot start audio bridge: {}", e);
                    self.event_sender
                        .send(SessionEvent::Status(format!("Client: {}", e)))
                        .ok();
                }
            },
            Some(Event::Otp(code)) => {
                self.event_sender.send(SessionEvent::Otp(code)).ok();
                self.event_sender
                    .send(SessionEvent::Status("Client: OTP received.".to_string()))
                    .ok();
            }
            Some(Event::Notification { app, title, text }) => {
                self.event_sender
                    .send(SessionEvent::Notification { app, title, text })
                    .ok();
            }
            Some(Event::Status(text)) => {
                self.event_sender
                    .send(SessionEvent::Status(format!("Client: {}", text)))
                    .ok();
            }
            None => {
                // unknown lines surface as-is so nothing is silently dropped
                self.event_sender
                    .send(SessionEvent::Status(format!("Client: {}", line)))
                    .ok();
            }
        }
    }

    fn spawn_audio_connector(&self) {
        let audio = self.audio.clone();
        let command_tx = self.command_tx.clone();
        let event_sender = self.event_sender.clone();
        tokio::spawn(async move {
            match audio.connect().await {
                Ok(()) => {
                    command_tx.send(Command::AudioReady).ok();
                }
                Err(e) => {
                    warn!("{}", e);
                    event_sender
                        .send(SessionEvent::Status(
                            "Client: Audio connection failed after multiple attempts.".to_string(),
                        ))
                        .ok();
                }
            }
        });
    }
}
