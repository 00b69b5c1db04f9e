use std::time::Duration;

use crate::error::{Error, Result};

/// Port used when nothing else is configured.
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings.
///
/// Changes only take effect the next time a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound on a single line read. A read that times out is treated as an empty line.
    pub timeout: Duration,
    /// Emit per-line and per-probe debug events.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            debug: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        check_baud_rate(self.baud_rate)?;
        check_timeout(self.timeout)
    }
}

pub(crate) fn check_baud_rate(baud_rate: u32) -> Result<()> {
    if baud_rate == 0 {
        return Err(Error::InvalidArgument(
            "baud rate must be positive".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(Error::InvalidArgument(
            "read timeout must be non-zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_baud_rate_is_rejected() {
        let config = Config {
            baud_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
