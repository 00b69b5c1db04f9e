//! In-memory ports for exercising the listener and port detection without hardware.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{ready, Context, Poll},
    time::Duration,
};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::mpsc,
};

use crate::{
    error::{Error, Result},
    transport::Transport,
};

type Chunk = std::result::Result<Vec<u8>, io::ErrorKind>;

#[derive(Debug)]
struct MockPort {
    name: String,
    available: bool,
    /// Lines queued on every new connection.
    greeting: Vec<String>,
    opens: usize,
    /// Feeds the most recently opened stream.
    sender: Option<mpsc::UnboundedSender<Chunk>>,
}

/// A [`Transport`] whose ports live in memory.
///
/// Cloning gives another handle to the same ports.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    ports: Arc<Mutex<Vec<MockPort>>>,
    live: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a port that sends `greeting` as soon as it is opened.
    pub fn with_port(self, name: &str, greeting: &[&str]) -> Self {
        self.add(name, true, greeting);
        self
    }

    /// Add a port that is listed but fails to open.
    pub fn with_unavailable_port(self, name: &str) -> Self {
        self.add(name, false, &[]);
        self
    }

    fn add(&self, name: &str, available: bool, greeting: &[&str]) {
        self.lock().push(MockPort {
            name: name.to_string(),
            available,
            greeting: greeting.iter().map(|line| line.to_string()).collect(),
            opens: 0,
            sender: None,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MockPort>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, port: &str, chunk: Chunk) -> bool {
        let ports = self.lock();
        ports
            .iter()
            .find(|p| p.name == port)
            .and_then(|p| p.sender.as_ref())
            .map_or(false, |sender| sender.send(chunk).is_ok())
    }

    /// Send `line` plus a newline to the open connection on `port`.
    ///
    /// Returns `false` if nobody has the port open.
    pub fn send_line(&self, port: &str, line: &str) -> bool {
        self.push(port, Ok(format!("{line}\n").into_bytes()))
    }

    /// Send raw bytes to the open connection on `port`.
    pub fn send_bytes(&self, port: &str, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        self.push(port, Ok(bytes.to_vec()))
    }

    /// Make the next read on `port` fail, as if the device faulted.
    pub fn inject_error(&self, port: &str) -> bool {
        self.push(port, Err(io::ErrorKind::BrokenPipe))
    }

    /// End the stream on `port`, as if the device was unplugged.
    pub fn disconnect(&self, port: &str) {
        if let Some(p) = self.lock().iter_mut().find(|p| p.name == port) {
            p.sender = None;
        }
    }

    /// How many times `port` has been opened.
    pub fn open_count(&self, port: &str) -> usize {
        self.lock()
            .iter()
            .find(|p| p.name == port)
            .map_or(0, |p| p.opens)
    }

    /// Streams handed out and not yet dropped.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    type Stream = MockStream;

    fn available_ports(&self) -> Result<Vec<String>> {
        Ok(self.lock().iter().map(|p| p.name.clone()).collect())
    }

    fn open(&self, port: &str, _baud_rate: u32, _timeout: Duration) -> Result<Self::Stream> {
        let mut ports = self.lock();
        let Some(mock) = ports.iter_mut().find(|p| p.name == port) else {
            return Err(Error::PortUnavailable {
                port: port.to_string(),
                reason: "no such device".to_string(),
            });
        };
        if !mock.available {
            return Err(Error::PortUnavailable {
                port: port.to_string(),
                reason: "device or resource busy".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        for line in &mock.greeting {
            // The receiver is alive, this cannot fail.
            let _ = sender.send(Ok(format!("{line}\n").into_bytes()));
        }
        mock.sender = Some(sender);
        mock.opens += 1;

        Ok(MockStream::new(receiver, self.live.clone()))
    }
}

/// Read half of a mock connection.
#[derive(Debug)]
pub struct MockStream {
    receiver: mpsc::UnboundedReceiver<Chunk>,
    pending: BytesMut,
    live: Arc<AtomicUsize>,
}

impl MockStream {
    fn new(receiver: mpsc::UnboundedReceiver<Chunk>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            receiver,
            pending: BytesMut::new(),
            live,
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            match ready!(this.receiver.poll_recv(cx)) {
                Some(Ok(bytes)) => this.pending.extend_from_slice(&bytes),
                Some(Err(kind)) => {
                    return Poll::Ready(Err(io::Error::new(kind, "injected serial fault")))
                }
                // Sender gone: end of stream.
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(this.pending.len());
        buf.put_slice(&this.pending[..n]);
        this.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}
