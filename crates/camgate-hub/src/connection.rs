use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;

// Ids are process-unique and never reused, so a late remove for a closed
// connection can never evict a newer one.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A serialized message queued for one connection.
///
/// The text is shared: a broadcast serializes once and every queue holds a
/// reference to the same buffer.
#[derive(Debug, Clone)]
pub struct PushFrame {
    text: Arc<str>,
}

impl PushFrame {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("push queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// A subscribed caller's long-lived push channel.
///
/// The handle is cheap to clone; the registry keeps one copy and the
/// dispatcher works on snapshots of those copies. The socket task owns the
/// matching [`PushReceiver`]; dropping it closes the queue, after which every
/// push fails with [`PushError::Closed`].
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    tenant_id: String,
    user_id: String,
    created_at: SystemTime,
    sender: mpsc::Sender<PushFrame>,
}

impl Connection {
    /// Open a connection with a bounded push queue of `capacity` frames.
    pub fn open(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, PushReceiver) {
        // tokio panics on a zero-capacity channel.
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                tenant_id: tenant_id.into(),
                user_id: user_id.into(),
                created_at: SystemTime::now(),
                sender,
            }),
        };
        (connection, PushReceiver { receiver })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.inner.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn created_at(&self) -> SystemTime {
        self.inner.created_at
    }

    /// Queue a frame without waiting.
    pub fn try_push(&self, frame: PushFrame) -> Result<(), PushError> {
        self.inner.sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.is_closed()
    }
}

/// Receiving half of a connection's push queue, owned by the socket task.
#[derive(Debug)]
pub struct PushReceiver {
    receiver: mpsc::Receiver<PushFrame>,
}

impl PushReceiver {
    pub async fn recv(&mut self) -> Option<PushFrame> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<PushFrame, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Stop accepting pushes while still allowing queued frames to drain.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
