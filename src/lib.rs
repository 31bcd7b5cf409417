//! podpipe - unified process I/O for local children and remote containers.
//!
//! This crate drives a process's stdout, stderr and stdin through one
//! contract, whether the process is a local child or a command running in a
//! cluster pod over a channel-multiplexed WebSocket.
//!
//! # Architecture
//!
//! - **Process** - read-mode state machine, channel skipping, line decoding,
//!   delayed exit
//! - **Transport** - seam between the process and its byte source: local
//!   pipes or tagged WebSocket frames
//! - **PortForward** - plain byte stream to one remote port over the same
//!   framing
//! - **ClusterClient** - builds exec/port-forward sessions from a [`Config`]
//!
//! # Modules
//!
//! - [`process`] - the [`Process`] contract
//! - [`transport`] - local and exec transports
//! - [`framing`] - channel tags and message codec
//! - [`decode`] - incremental UTF-8 line decoding
//! - [`port_forward`] - forwarded ports and the local TCP bridge
//! - [`cluster`] - remote session construction
//! - [`config`] - configuration loading

pub mod cluster;
pub mod config;
pub mod constants;
pub mod decode;
pub mod error;
pub mod framing;
pub mod port_forward;
pub mod process;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use cluster::{ClusterClient, ExecOptions};
pub use config::Config;
pub use error::{ProcessError, Result};
pub use framing::OutputChannel;
pub use port_forward::{PortForward, PortForwardReader, PortForwardWriter};
pub use process::{Line, Lines, Output, Process, ProcessState, ProcessStdin, ReadOutcome};
pub use transport::local::LocalCommand;
pub use transport::{Chunk, StdinSink, Transport};
