//! Event session between a producer process and its consumer
//!
//! The producer listens on a Unix socket derived from its pid. A consumer
//! connects, sends a [`SessionRequest`], and receives a stream of framed
//! records until the producer closes the session:
//!
//! ```text
//! consumer -> producer   "CSES" | version:u8 | buffer_size_mb:u32 LE | rundown:u8
//! producer -> consumer   tag:u8 | len:u32 LE | payload   (repeated)
//! ```
//!
//! Loss is measured at the producer: events that do not fit in the session
//! buffer are dropped and reported through `LossUpdate` and `EndOfStream`
//! records.

use crate::{Error, Result};
use std::io::Read;
use std::path::PathBuf;

pub mod frame;
pub mod sink;
pub mod source;

// Re-export main types
pub use frame::{read_record_async, FrameKind, Record, RecordReader, StreamTally};
pub use sink::{EventEmitter, SessionInfo, SessionServer, SessionStats};
pub use source::{EventStream, EventStreamSource, IpcStreamSource};

/// Magic prefix of a session request
pub const REQUEST_MAGIC: &[u8; 4] = b"CSES";

/// Session protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded size of a session request
pub const REQUEST_LEN: usize = 10;

/// Socket path a producer with `pid` listens on
pub fn endpoint_for_pid(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("corescale-{pid}.sock"))
}

/// Parameters a consumer asks for when it opens a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest {
    /// Size of the producer-side event buffer
    pub buffer_size_mb: u32,
    /// Ask for rundown records at session teardown
    pub request_rundown: bool,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self { buffer_size_mb: 256, request_rundown: true }
    }
}

impl SessionRequest {
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        buf[..4].copy_from_slice(REQUEST_MAGIC);
        buf[4] = PROTOCOL_VERSION;
        buf[5..9].copy_from_slice(&self.buffer_size_mb.to_le_bytes());
        buf[9] = u8::from(self.request_rundown);
        buf
    }

    pub fn decode(buf: &[u8; REQUEST_LEN]) -> Result<Self> {
        if &buf[..4] != REQUEST_MAGIC {
            return Err(Error::Session("Bad session request magic".to_string()));
        }
        if buf[4] != PROTOCOL_VERSION {
            return Err(Error::Session(format!(
                "Unsupported session protocol version {} (expected {PROTOCOL_VERSION})",
                buf[4]
            )));
        }
        let buffer_size_mb = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if buffer_size_mb == 0 {
            return Err(Error::Session("Session buffer size must be > 0".to_string()));
        }
        Ok(Self { buffer_size_mb, request_rundown: buf[9] != 0 })
    }

    /// Read and decode a request from a blocking reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; REQUEST_LEN];
        reader.read_exact(&mut buf)?;
        Self::decode(&buf)
    }

    /// Session buffer size in bytes
    pub fn buffer_bytes(&self) -> u64 {
        u64::from(self.buffer_size_mb) << 20
    }
}
