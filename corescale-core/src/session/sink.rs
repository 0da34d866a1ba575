//! Producer side of an event session
//!
//! A [`SessionServer`] listens on the producer's socket and accepts a single
//! consumer. Once a consumer is attached, producer units push events through
//! an [`EventEmitter`] into a bounded buffer. A flusher thread drains the
//! buffer onto the socket. When the buffer is full the event is dropped and
//! counted; `emit` never blocks.

use super::frame::{encode_event, write_frame, FrameKind, HEADER_LEN, MAX_EVENT_SIZE};
use super::SessionRequest;
use crate::{Error, Result};
use std::io::{self, BufWriter, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Minimum spacing between two loss updates
pub const LOSS_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Events written per flusher pass before re-checking loss and shutdown
const FLUSH_BATCH: u64 = 1024;

/// Flusher sleep when the buffer is empty
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// How long an accepted connection gets to send its request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// What the producer publishes about itself
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Payload bytes per event
    pub event_size: usize,
    /// Rundown metadata, sent as `key=value` lines
    pub metadata: Vec<(String, String)>,
}

/// Final delivery counters of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub events_sent: u64,
    pub events_dropped: u64,
}

/// Bounded event buffer
///
/// Only counts are stored: every event of a session has the same body, so
/// the flusher re-sends one pre-encoded frame.
#[derive(Debug)]
struct EventBuffer {
    pending: AtomicU64,
    capacity: u64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl EventBuffer {
    fn new(capacity: u64) -> Self {
        Self {
            pending: AtomicU64::new(0),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self) {
        let accepted = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.capacity).then_some(pending + 1)
            })
            .is_ok();
        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Buffer capacity in events for a request and event size
fn buffer_capacity(request: &SessionRequest, event_size: usize) -> u64 {
    let frame_len = (HEADER_LEN + event_size) as u64;
    (request.buffer_bytes() / frame_len).max(1)
}

/// Cheap, cloneable handle producer units emit through
///
/// An emitter taken before any consumer attached discards every event.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    buffer: Option<Arc<EventBuffer>>,
}

impl EventEmitter {
    /// Emitter that discards everything
    pub fn detached() -> Self {
        Self { buffer: None }
    }

    pub fn is_attached(&self) -> bool {
        self.buffer.is_some()
    }

    /// Queue one event, or count it as dropped if the buffer is full
    pub fn emit(&self) {
        if let Some(buffer) = &self.buffer {
            buffer.push();
        }
    }
}

struct AttachedSession {
    buffer: Arc<EventBuffer>,
    flusher: JoinHandle<io::Result<SessionStats>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<AcceptState>,
    attached: Condvar,
}

#[derive(Default)]
struct AcceptState {
    session: Option<AttachedSession>,
    finished: bool,
}

/// Listening end of the producer's event session
pub struct SessionServer {
    path: PathBuf,
    shared: Arc<Shared>,
}

impl SessionServer {
    /// Bind the session socket and start accepting a consumer in the background
    pub fn bind(path: impl AsRef<Path>, info: SessionInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if info.event_size == 0 {
            return Err(Error::invalid("Event size must be > 0"));
        }
        if info.event_size > MAX_EVENT_SIZE {
            return Err(Error::invalid(format!(
                "Event size {} exceeds the {MAX_EVENT_SIZE} byte record limit",
                info.event_size
            )));
        }

        // A socket left behind by a crashed producer with a recycled pid
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path).map_err(|e| {
            Error::Session(format!("Failed to bind session socket {}: {e}", path.display()))
        })?;

        let shared = Arc::new(Shared::default());
        let acceptor_shared = shared.clone();
        thread::Builder::new()
            .name("session-acceptor".to_string())
            .spawn(move || accept_loop(listener, acceptor_shared, info))?;

        tracing::debug!("Session socket listening at {}", path.display());
        Ok(Self { path, shared })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_attached(&self) -> bool {
        self.lock_state().session.is_some()
    }

    /// Block until a consumer attaches or `timeout` passes
    pub fn wait_attached(&self, timeout: Duration) -> bool {
        let state = self.lock_state();
        let (state, _) = self
            .shared
            .attached
            .wait_timeout_while(state, timeout, |state| state.session.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.session.is_some()
    }

    /// Emitter bound to the current session, or a detached one
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter { buffer: self.lock_state().session.as_ref().map(|s| s.buffer.clone()) }
    }

    /// Close the session: drain the buffer, send rundown and end-of-stream
    ///
    /// Call only after every emitter has stopped emitting. Returns `None`
    /// when no consumer ever attached.
    pub fn finish(self) -> Result<Option<SessionStats>> {
        let session = {
            let mut state = self.lock_state();
            state.finished = true;
            state.session.take()
        };
        let Some(session) = session else {
            return Ok(None);
        };

        session.buffer.closed.store(true, Ordering::Release);
        session.flusher.thread().unpark();
        let stats = session
            .flusher
            .join()
            .map_err(|e| Error::Other(format!("Session flusher panicked: {:?}", e)))?
            .map_err(|e| Error::Session(format!("Event stream write failed: {e}")))?;
        Ok(Some(stats))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AcceptState> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Accept connections until one sends a valid request
fn accept_loop(listener: UnixListener, shared: Arc<Shared>, info: SessionInfo) {
    for conn in listener.incoming() {
        let mut stream = match conn {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Session accept failed: {}", e);
                continue;
            }
        };

        let request = stream
            .set_read_timeout(Some(REQUEST_TIMEOUT))
            .map_err(Error::from)
            .and_then(|_| SessionRequest::read_from(&mut stream));
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejected session connection: {}", e);
                continue;
            }
        };

        let mut state = shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.finished {
            tracing::debug!("Session connection arrived after shutdown, dropping it");
            return;
        }

        let buffer = Arc::new(EventBuffer::new(buffer_capacity(&request, info.event_size)));
        let flusher_buffer = buffer.clone();
        let flusher_info = info.clone();
        let spawned = thread::Builder::new()
            .name("session-flusher".to_string())
            .spawn(move || flush_loop(stream, flusher_buffer, request, flusher_info));
        match spawned {
            Ok(flusher) => {
                tracing::info!(
                    "Consumer attached (buffer {} MB, {} events, rundown {})",
                    request.buffer_size_mb,
                    buffer.capacity,
                    request.request_rundown
                );
                state.session = Some(AttachedSession { buffer, flusher });
                shared.attached.notify_all();
            }
            Err(e) => tracing::error!("Failed to start session flusher: {}", e),
        }
        return;
    }
}

/// Drain the buffer onto the socket until the session is closed and empty
fn flush_loop(
    stream: UnixStream,
    buffer: Arc<EventBuffer>,
    request: SessionRequest,
    info: SessionInfo,
) -> io::Result<SessionStats> {
    stream.set_read_timeout(None)?;
    let socket = stream.try_clone()?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, stream);
    let frame = encode_event(&vec![b'a'; info.event_size])?;

    write_frame(&mut writer, FrameKind::SessionStarted, &[])?;
    writer.flush()?;

    let mut sent = 0u64;
    let mut reported = 0u64;
    let mut last_report = Instant::now();

    loop {
        let pending = buffer.pending.load(Ordering::Acquire);
        if pending > 0 {
            let batch = pending.min(FLUSH_BATCH);
            for _ in 0..batch {
                writer.write_all(&frame)?;
            }
            buffer.pending.fetch_sub(batch, Ordering::AcqRel);
            sent += batch;
        }

        if last_report.elapsed() >= LOSS_REPORT_INTERVAL {
            let dropped = buffer.dropped.load(Ordering::Relaxed);
            if dropped != reported {
                write_frame(&mut writer, FrameKind::LossUpdate, &dropped.to_le_bytes())?;
                reported = dropped;
            }
            last_report = Instant::now();
        }

        if pending == 0 {
            writer.flush()?;
            let drained = buffer.pending.load(Ordering::Acquire) == 0;
            if buffer.closed.load(Ordering::Acquire) && drained {
                break;
            }
            thread::park_timeout(IDLE_WAIT);
        }
    }

    let dropped = buffer.dropped.load(Ordering::Relaxed);
    if request.request_rundown {
        let counters = [
            ("events_sent".to_string(), sent.to_string()),
            ("events_dropped".to_string(), dropped.to_string()),
        ];
        for (key, value) in info.metadata.iter().chain(counters.iter()) {
            write_frame(&mut writer, FrameKind::Rundown, format!("{key}={value}").as_bytes())?;
        }
    }
    write_frame(&mut writer, FrameKind::EndOfStream, &dropped.to_le_bytes())?;
    writer.flush()?;
    socket.shutdown(Shutdown::Write)?;

    tracing::debug!("Session closed: {} events sent, {} dropped", sent, dropped);
    Ok(SessionStats { events_sent: sent, events_dropped: dropped })
}
