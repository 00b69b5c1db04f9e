use std::time::Duration;

use tokio::io::AsyncRead;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// Where byte streams come from.
///
/// Closing a connection is dropping its stream.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Names of the ports currently present on the host.
    fn available_ports(&self) -> Result<Vec<String>>;

    /// Open `port`. Must be called from within a tokio runtime.
    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<Self::Stream>;
}

/// Real serial ports, through `serialport` and `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    type Stream = SerialStream;

    fn available_ports(&self) -> Result<Vec<String>> {
        let ports =
            serialport::available_ports().map_err(|e| Error::Enumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<Self::Stream> {
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| Error::PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        #[cfg(unix)]
        if let Err(error) = stream.set_exclusive(true) {
            warn!("Could not get exclusive access to {port}: {error}");
        }

        Ok(stream)
    }
}
