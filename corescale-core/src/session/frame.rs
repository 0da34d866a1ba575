//! Record framing for the producer -> consumer direction
//!
//! Every record is `tag:u8 | len:u32 LE | payload`. Event payloads are
//! skipped while decoding; consumers only count them.

use crate::consumer::ConsumerReport;
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the `tag | len` header
pub const HEADER_LEN: usize = 5;

/// Largest payload a decoder accepts
pub const MAX_PAYLOAD_LEN: u32 = 16 << 20;

/// Largest event body that fits in one record
pub const MAX_EVENT_SIZE: usize = MAX_PAYLOAD_LEN as usize;

/// Record tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    SessionStarted = 1,
    Event = 2,
    LossUpdate = 3,
    Rundown = 4,
    EndOfStream = 5,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(FrameKind::SessionStarted),
            2 => Ok(FrameKind::Event),
            3 => Ok(FrameKind::LossUpdate),
            4 => Ok(FrameKind::Rundown),
            5 => Ok(FrameKind::EndOfStream),
            other => Err(Error::Session(format!("Unknown record tag {other}"))),
        }
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    SessionStarted,
    /// One event; only the payload length is kept
    Event { len: u32 },
    /// Cumulative number of events dropped so far
    LossUpdate(u64),
    /// `key=value` metadata sent at teardown
    Rundown(String),
    /// Final dropped-event total; nothing follows
    EndOfStream(u64),
}

/// Write one record
pub fn write_frame<W: Write>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record payload too large"))?;
    let mut header = [0u8; HEADER_LEN];
    header[0] = kind as u8;
    header[1..].copy_from_slice(&len.to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(payload)
}

/// Pre-encode an event record so the hot path is a single `write_all`
///
/// Fails for bodies larger than [`MAX_EVENT_SIZE`].
pub fn encode_event(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    write_frame(&mut frame, FrameKind::Event, body)?;
    Ok(frame)
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(FrameKind, u32)> {
    let kind = FrameKind::try_from(header[0])?;
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::Session(format!(
            "Record of {len} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit"
        )));
    }
    Ok((kind, len))
}

fn decode_control(kind: FrameKind, payload: Vec<u8>) -> Result<Record> {
    let counter = |payload: &[u8]| -> Result<u64> {
        let bytes: [u8; 8] = payload
            .try_into()
            .map_err(|_| Error::Session(format!("{kind:?} payload must be 8 bytes")))?;
        Ok(u64::from_le_bytes(bytes))
    };

    match kind {
        FrameKind::SessionStarted => Ok(Record::SessionStarted),
        FrameKind::LossUpdate => Ok(Record::LossUpdate(counter(&payload)?)),
        FrameKind::EndOfStream => Ok(Record::EndOfStream(counter(&payload)?)),
        FrameKind::Rundown => String::from_utf8(payload)
            .map(Record::Rundown)
            .map_err(|_| Error::Session("Rundown record is not UTF-8".to_string())),
        FrameKind::Event => unreachable!("event payloads are skipped, not decoded"),
    }
}

/// Blocking record decoder
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next record, or `None` at a clean end of input
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(Error::Session("Stream ended inside a record header".to_string()))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        let (kind, len) = parse_header(&header)?;
        if kind == FrameKind::Event {
            let skipped = io::copy(&mut (&mut self.inner).take(u64::from(len)), &mut io::sink())?;
            if skipped != u64::from(len) {
                return Err(Error::Session("Stream ended inside an event".to_string()));
            }
            return Ok(Some(Record::Event { len }));
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;
        decode_control(kind, payload).map(Some)
    }
}

/// Async counterpart of [`RecordReader::next_record`]
pub async fn read_record_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Record>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(Error::Session("Stream ended inside a record header".to_string())),
            n => filled += n,
        }
    }

    let (kind, len) = parse_header(&header)?;
    if kind == FrameKind::Event {
        let mut body = (&mut *reader).take(u64::from(len));
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        if skipped != u64::from(len) {
            return Err(Error::Session("Stream ended inside an event".to_string()));
        }
        return Ok(Some(Record::Event { len }));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    decode_control(kind, payload).map(Some)
}

/// Running totals over a decoded stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTally {
    pub events: u64,
    pub lost: u64,
    pub rundown: Vec<String>,
    pub ended: bool,
}

impl StreamTally {
    /// Fold one record in; returns `true` once the end-of-stream record is seen
    pub fn observe(&mut self, record: Record) -> bool {
        match record {
            Record::Event { .. } => self.events += 1,
            Record::LossUpdate(dropped) => self.lost = self.lost.max(dropped),
            Record::Rundown(line) => self.rundown.push(line),
            Record::EndOfStream(dropped) => {
                self.lost = dropped;
                self.ended = true;
            }
            Record::SessionStarted => {}
        }
        self.ended
    }

    pub fn into_report(self, elapsed: Duration) -> ConsumerReport {
        if !self.ended {
            tracing::warn!(
                "Event stream closed without an end record; reporting last known loss ({})",
                self.lost
            );
        }
        ConsumerReport {
            events_collected: self.events,
            events_lost: self.lost,
            elapsed,
            rundown: self.rundown,
            complete: self.ended,
        }
    }
}
