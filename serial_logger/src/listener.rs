//! The background listener and the handle that starts and stops it.
//!
//! [`SerialLogger`] owns the configuration and at most one listener task.
//! The task opens the port, reads lines until it is cancelled or the stream fails,
//! and hands every parsed [`Record`] to the registered callback, in line order.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use futures_util::StreamExt;
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    config::{self, Config},
    detect::{self, ProbeConfig},
    error::{Error, Result},
    lines::LineCodec,
    record::{parse_line, Record},
    transport::{SerialTransport, Transport},
};

/// Receives every non-empty record, on the listener task.
pub type Callback = Arc<dyn Fn(Record) + Send + Sync>;

type CallbackSlot = Arc<RwLock<Option<Callback>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Listening,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

/// Listens to a serial device and forwards `D;key:value;...` lines to a callback.
///
/// ```no_run
/// # async fn run() -> serial_logger::Result<()> {
/// use serial_logger::{Config, SerialLogger};
///
/// let mut logger = SerialLogger::new(Config::default());
/// logger.detect_port().await?;
/// logger.set_callback(|record| println!("{record}"));
/// logger.start()?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping the logger cancels its listener without waiting for it.
pub struct SerialLogger<T: Transport = SerialTransport> {
    config: Config,
    probe: ProbeConfig,
    transport: Arc<T>,
    callback: CallbackSlot,
    worker: Option<Worker>,
}

impl SerialLogger<SerialTransport> {
    pub fn new(config: Config) -> Self {
        Self::with_transport(config, SerialTransport)
    }
}

impl<T: Transport> SerialLogger<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        Self {
            config,
            probe: ProbeConfig::default(),
            transport: Arc::new(transport),
            callback: Arc::new(RwLock::new(None)),
            worker: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_port(&mut self, port: impl Into<String>) {
        self.config.port = port.into();
        info!("Serial port: {}", self.config.port);
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        config::check_baud_rate(baud_rate)?;
        self.config.baud_rate = baud_rate;
        info!("Baud rate: {}", self.config.baud_rate);
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        config::check_timeout(timeout)?;
        self.config.timeout = timeout;
        Ok(())
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    pub fn set_probe_config(&mut self, probe: ProbeConfig) {
        self.probe = probe;
    }

    /// Look for the port the device is on, and use it from now on if found.
    pub async fn detect_port(&mut self) -> Result<Option<String>> {
        let found = detect::detect_port(&*self.transport, &self.config, &self.probe).await?;
        if let Some(port) = &found {
            self.config.port = port.clone();
        }
        Ok(found)
    }

    /// Register the function that receives records, replacing any previous one.
    ///
    /// Safe while listening: the next record goes to the new callback.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let mut slot = self.callback.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(callback);
    }

    fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn state(&self) -> RunState {
        if self.is_listening() {
            RunState::Listening
        } else {
            RunState::Idle
        }
    }

    /// `false` once stopped, or once the listener gave up on a broken stream.
    pub fn is_listening(&self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
    }

    /// Spawn the listener task and return right away.
    ///
    /// Returns `Ok(false)` without doing anything if already listening.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<bool> {
        if self.is_listening() {
            info!("Serial logger is already running.");
            return Ok(false);
        }
        if !self.has_callback() {
            return Err(Error::PreconditionFailed);
        }
        self.config.validate()?;

        let token = CancellationToken::new();
        let previous = self.worker.take().map(|worker| worker.handle);
        let span = info_span!("serial_logger", port = %self.config.port);

        let handle = tokio::spawn(
            listen(
                self.transport.clone(),
                self.config.clone(),
                self.callback.clone(),
                token.clone(),
                previous,
            )
            .instrument(span),
        );
        self.worker = Some(Worker { token, handle });

        info!("Serial logger started.");
        Ok(true)
    }

    /// Tell the listener to stop and close its port. Does not wait for it.
    ///
    /// Returns `false` without doing anything if not listening.
    pub fn stop(&mut self) -> bool {
        match &self.worker {
            Some(worker) if worker.is_running() => {
                worker.token.cancel();
                info!("Serial logger has stopped.");
                true
            }
            _ => {
                info!("Serial logger is not running.");
                false
            }
        }
    }

    /// Stop, then wait up to `timeout` for the listener task to exit.
    pub async fn stop_and_wait(&mut self, timeout: Duration) -> Result<()> {
        self.stop();

        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        worker.token.cancel();

        let joined = tokio::time::timeout(timeout, &mut worker.handle).await;
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => {
                error!("Listener task failed: {join_error}");
                Ok(())
            }
            Err(_) => {
                self.worker = Some(worker);
                Err(Error::JoinTimeout(timeout))
            }
        }
    }
}

impl<T: Transport> Drop for SerialLogger<T> {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.token.cancel();
        }
    }
}

async fn listen<T: Transport>(
    transport: Arc<T>,
    config: Config,
    callback: CallbackSlot,
    token: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    // The previous connection has to be gone before the port is opened again.
    if let Some(previous) = previous {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Stopped listening.");
                return;
            }
            _ = previous => {}
        }
    }

    if config.debug {
        debug!("Listening on {} at {} baud.", config.port, config.baud_rate);
    }

    match transport.open(&config.port, config.baud_rate, config.timeout) {
        Ok(stream) => {
            let lines = FramedRead::new(stream, LineCodec::new());
            if let Err(error) = read_lines(lines, &config, &callback, &token).await {
                error!("Serial error: {error}");
            }
        }
        Err(error) => error!("{error}. Is the port in use?"),
    }

    info!("Stopped listening.");
}

/// Runs until cancelled (`Ok`) or until the stream fails or ends (`Err`).
/// The stream is dropped on return.
async fn read_lines<S: AsyncRead + Unpin>(
    mut lines: FramedRead<S, LineCodec>,
    config: &Config,
    callback: &CallbackSlot,
    token: &CancellationToken,
) -> Result<()> {
    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            read = tokio::time::timeout(config.timeout, lines.next()) => read,
        };

        let line = match read {
            // Timeouts are idle polls.
            Err(_) => String::new(),
            Ok(Some(line)) => line?,
            Ok(None) => {
                return Err(
                    io::Error::new(io::ErrorKind::UnexpectedEof, "serial stream ended").into(),
                )
            }
        };

        let line = line.trim();
        if config.debug {
            debug!(
                "Raw data received: {}",
                if line.is_empty() { "<empty>" } else { line }
            );
        }
        if line.is_empty() {
            continue;
        }

        let record = parse_line(line);
        if !record.is_empty() {
            dispatch(callback, record);
        }
    }
}

fn dispatch(slot: &CallbackSlot, record: Record) {
    let callback = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
    let Some(callback) = callback else {
        warn!("No data handler is set.");
        return;
    };

    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(record))) {
        error!("Error processing line: {}", panic_message(panic.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "callback panicked"
    }
}
