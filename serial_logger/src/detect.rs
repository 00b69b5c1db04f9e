//! Finding which serial port a device is attached to.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::codec::FramedRead;

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::Config,
    error::Result,
    lines::LineCodec,
    record::MARKER,
    transport::Transport,
};

/// How hard to look at each candidate port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Lines to read before giving up on a port.
    pub lines: usize,
    /// Pause before each read, to give the device time to talk.
    pub delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            lines: 5,
            delay: Duration::from_millis(100),
        }
    }
}

/// Open `port` and check whether it carries data lines.
///
/// Fails only if the port cannot be opened.
/// A read error or the stream ending counts as "no".
pub async fn probe_port<T: Transport>(
    transport: &T,
    port: &str,
    config: &Config,
    probe: &ProbeConfig,
) -> Result<bool> {
    let stream = transport.open(port, config.baud_rate, config.timeout)?;
    let mut lines = FramedRead::new(stream, LineCodec::new());

    for _ in 0..probe.lines {
        tokio::time::sleep(probe.delay).await;

        let line = match tokio::time::timeout(config.timeout, lines.next()).await {
            Ok(Some(Ok(line))) => line,
            // Timed out, nothing yet.
            Err(_) => String::new(),
            Ok(Some(Err(error))) => {
                if config.debug {
                    debug!("Read error on {port}: {error}");
                }
                return Ok(false);
            }
            Ok(None) => {
                if config.debug {
                    debug!("{port} closed while probing");
                }
                return Ok(false);
            }
        };

        let line = line.trim();
        if config.debug {
            debug!("Read line: {line}");
        }
        if line.contains(MARKER) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Try every available port in turn and return the first one sending data lines.
///
/// Ports that fail to open are skipped.
/// `Ok(None)` means no port matched, an error means the ports could not be listed at all.
pub async fn detect_port<T: Transport>(
    transport: &T,
    config: &Config,
    probe: &ProbeConfig,
) -> Result<Option<String>> {
    info!("Detecting serial port...");

    for port in transport.available_ports()? {
        if config.debug {
            debug!("Testing port: {port}");
        }

        match probe_port(transport, &port, config, probe).await {
            Ok(true) => {
                info!("Detected device on port: {port}");
                return Ok(Some(port));
            }
            Ok(false) => {}
            Err(error) => {
                if config.debug {
                    debug!("Could not open port {port}: {error}");
                }
            }
        }
    }

    info!("No device detected.");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn quick() -> (Config, ProbeConfig) {
        let config = Config {
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let probe = ProbeConfig {
            lines: 5,
            delay: Duration::from_millis(1),
        };
        (config, probe)
    }

    #[test]
    fn default_probe_policy() {
        let probe = ProbeConfig::default();
        assert_eq!(probe.lines, 5);
        assert_eq!(probe.delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn second_of_three_matches() {
        let (config, probe) = quick();
        let transport = MockTransport::new()
            .with_unavailable_port("/dev/ttyS0")
            .with_port("/dev/ttyUSB0", &["booting", "D;temp:21"])
            .with_port("/dev/ttyUSB1", &["D;temp:22"]);

        let found = detect_port(&transport, &config, &probe).await.unwrap();

        assert_eq!(found.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(transport.open_count("/dev/ttyS0"), 0);
        assert_eq!(transport.open_count("/dev/ttyUSB0"), 1);
        assert_eq!(transport.open_count("/dev/ttyUSB1"), 0);
        assert_eq!(transport.live_connections(), 0);
    }

    #[tokio::test]
    async fn nothing_matches() {
        let (config, probe) = quick();
        let transport = MockTransport::new()
            .with_port("/dev/ttyUSB0", &["hello", "world"])
            .with_port("/dev/ttyUSB1", &[]);

        let found = detect_port(&transport, &config, &probe).await.unwrap();

        assert_eq!(found, None);
        assert_eq!(transport.open_count("/dev/ttyUSB0"), 1);
        assert_eq!(transport.open_count("/dev/ttyUSB1"), 1);
    }

    #[tokio::test]
    async fn marker_after_probe_window_is_missed() {
        let (config, probe) = quick();
        let transport =
            MockTransport::new().with_port("/dev/ttyUSB0", &["a", "b", "c", "d", "e", "D;x:1"]);

        assert!(!probe_port(&transport, "/dev/ttyUSB0", &config, &probe)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn probe_of_unavailable_port_fails() {
        let (config, probe) = quick();
        let transport = MockTransport::new().with_unavailable_port("/dev/ttyS0");

        assert!(probe_port(&transport, "/dev/ttyS0", &config, &probe)
            .await
            .is_err());
    }
}
