//! Consumer side of an event session

use super::frame::{read_record_async, Record};
use super::{endpoint_for_pid, SessionRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::net::UnixStream;

/// Raw record stream from an attached producer
///
/// The session-started record has already been consumed; reading yields the
/// remaining records up to and including end-of-stream.
pub struct EventStream {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl EventStream {
    pub fn new<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self { inner: Box::new(reader) }
    }
}

impl AsyncRead for EventStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Something that can open an event session on a running producer
#[async_trait]
pub trait EventStreamSource: Send + Sync {
    /// Single attach attempt; callers retry on error
    async fn try_attach(&self, pid: u32, request: &SessionRequest) -> Result<EventStream>;

    /// Source name for logs
    fn name(&self) -> &'static str;
}

/// Attaches over the producer's Unix socket
#[derive(Debug, Clone, Default)]
pub struct IpcStreamSource {
    path_override: Option<PathBuf>,
}

impl IpcStreamSource {
    /// Derive the socket path from the producer's pid
    pub fn new() -> Self {
        Self::default()
    }

    /// Always connect to `path`, whatever the pid
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path_override: Some(path.into()) }
    }

    fn endpoint(&self, pid: u32) -> PathBuf {
        self.path_override.clone().unwrap_or_else(|| endpoint_for_pid(pid))
    }
}

#[async_trait]
impl EventStreamSource for IpcStreamSource {
    async fn try_attach(&self, pid: u32, request: &SessionRequest) -> Result<EventStream> {
        let path = self.endpoint(pid);
        let mut stream = UnixStream::connect(&path)
            .await
            .map_err(|e| Error::Attach(format!("connect {}: {e}", path.display())))?;
        stream.write_all(&request.encode()).await?;

        match read_record_async(&mut stream).await? {
            Some(Record::SessionStarted) => Ok(EventStream::new(stream)),
            Some(other) => {
                Err(Error::Session(format!("Expected session start record, got {other:?}")))
            }
            None => {
                Err(Error::Attach("Producer closed the session before starting it".to_string()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "ipc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionInfo, SessionServer, SessionStats, StreamTally};
    use std::time::Duration;

    #[tokio::test]
    async fn test_attach_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = IpcStreamSource::at_path(dir.path().join("absent.sock"));
        let result = source.try_attach(1, &SessionRequest::default()).await;
        assert!(matches!(result, Err(Error::Attach(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_attach_and_read_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("producer.sock");
        let server = SessionServer::bind(
            &path,
            SessionInfo { event_size: 32, metadata: vec![("pattern".into(), "DRIP".into())] },
        )
        .unwrap();

        let source = IpcStreamSource::at_path(&path);
        let request = SessionRequest { buffer_size_mb: 4, request_rundown: true };
        let mut stream = source.try_attach(0, &request).await.unwrap();

        let producer = tokio::task::spawn_blocking(move || {
            assert!(server.wait_attached(Duration::from_secs(5)));
            let emitter = server.emitter();
            for _ in 0..250 {
                emitter.emit();
            }
            server.finish()
        });

        let mut tally = StreamTally::default();
        while let Some(record) = read_record_async(&mut stream).await.unwrap() {
            if tally.observe(record) {
                break;
            }
        }
        let stats = producer.await.unwrap().unwrap();

        assert_eq!(stats, Some(SessionStats { events_sent: 250, events_dropped: 0 }));
        assert_eq!(tally.events, 250);
        assert_eq!(tally.rundown[0], "pattern=DRIP");
        assert_eq!(source.name(), "ipc");
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(IpcStreamSource::new().endpoint(77), endpoint_for_pid(77));
        let fixed = IpcStreamSource::at_path("/tmp/x.sock");
        assert_eq!(fixed.endpoint(77), PathBuf::from("/tmp/x.sock"));
    }
}
