use std::net::SocketAddr;

/// SessionEvent represents engine updates surfaced to the embedding UI layer,
/// the host and client sides share one vocabulary.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Control channel established
    Connected(SocketAddr),
    /// Control channel torn down
    Disconnected,
    /// Number of clients currently registered on the host control channel
    ClientCount(usize),
    /// An incoming call is ringing on the host
    IncomingCall { number: String, name: String },
    /// A call became active (answered or connected outgoing)
    CallStarted { number: String, name: String },
    /// The active call ended
    CallEnded,
    /// The audio bridge started streaming
    AudioStarted,
    /// The audio bridge stopped
    AudioStopped,
    /// One-time passcode forwarded by the host
    Otp(String),
    /// Notification mirrored from the host
    Notification {
        app: String,
        title: String,
        text: String,
    },
    /// Free-form status line
    Status(String),
}

/// Type alias for the event sender
pub type EventSender = tokio::sync::broadcast::Sender<SessionEvent>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::broadcast::Receiver<SessionEvent>;
