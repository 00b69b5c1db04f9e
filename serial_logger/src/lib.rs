//! Listen to a serial device that prints `D;key:value;...` lines,
//! and hand each parsed line to a callback from a background task.

pub mod config;
pub mod detect;
pub mod error;
pub mod lines;
pub mod listener;
pub mod mock;
pub mod record;
pub mod transport;

pub use config::Config;
pub use detect::{detect_port, probe_port, ProbeConfig};
pub use error::{Error, Result};
pub use lines::LineCodec;
pub use listener::{Callback, RunState, SerialLogger};
pub use record::{parse_line, Record, MARKER};
pub use transport::{SerialTransport, Transport};
