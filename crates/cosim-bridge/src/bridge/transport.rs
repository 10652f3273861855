//! Named pipe transport for host-simulator IPC.
//!
//! Connect phase:
//! 1. Optionally `mkfifo` both pipes
//! 2. Wait for readiness (assume present, or poll under a retry policy)
//! 3. Open both ends concurrently with blocking `open(2)` on the blocking pool,
//!    releasing the other open if one of them fails
//!
//! Opening a FIFO blocks until the other side opens the opposite end. Opening the
//! read end and the write end at the same time means the bridge never waits on
//! itself, whatever order the simulator opens its ends in.

use std::fs::File;
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{AccessFlags, access, mkfifo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::FrameCodec;
use super::protocol::{Command, FrameFormat, ResponseFrame};
use crate::config::{BridgeConfig, Readiness, RetryPolicy};
use crate::error::{ConnectError, TransportError};

/// Exclusive owner of one read end and one write end.
///
/// Generic over the stream types so the driver can run over in-memory streams.
/// Closing consumes the transport; each end is released exactly once.
pub struct Transport<R, W> {
    reader: FramedRead<R, FrameCodec>,
    writer: FramedWrite<W, FrameCodec>,
    read_timeout: Option<Duration>,
}

/// Transport over the two FIFOs.
pub type PipeTransport = Transport<pipe::Receiver, pipe::Sender>;

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, format: FrameFormat) -> Self {
        let codec = FrameCodec::new(format);
        Self {
            reader: FramedRead::new(reader, codec),
            writer: FramedWrite::new(writer, codec),
            read_timeout: None,
        }
    }

    /// Bound every `read_frame` wait. `None` waits for the peer indefinitely.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn format(&self) -> &FrameFormat {
        self.writer.encoder().format()
    }

    /// Write and flush one frame. Partial writes are not retried.
    pub async fn write_frame(&mut self, command: Command) -> Result<(), TransportError> {
        self.writer.send(command).await
    }

    /// Wait for exactly one response frame.
    pub async fn read_frame(&mut self) -> Result<ResponseFrame, TransportError> {
        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.next())
                .await
                .map_err(|_| TransportError::ReadTimeout(limit))?,
            None => self.reader.next().await,
        };
        match next {
            Some(frame) => frame,
            None => Err(TransportError::PeerClosed),
        }
    }

    /// Write one command and wait for its response.
    pub async fn exchange(&mut self, command: Command) -> Result<ResponseFrame, TransportError> {
        self.write_frame(command).await?;
        self.read_frame().await
    }

    /// Flush and release both ends.
    pub async fn close(mut self) -> Result<(), TransportError> {
        let result = self.writer.close().await;
        drop(self.reader);
        drop(self.writer);
        result
    }
}

/// Seam between the driver and the way the pipe pair is established.
#[async_trait]
pub trait Connector: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    async fn connect(
        &self,
        config: &BridgeConfig,
    ) -> Result<Transport<Self::Reader, Self::Writer>, ConnectError>;
}

/// Connects to the FIFOs named in the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeConnector;

#[async_trait]
impl Connector for PipeConnector {
    type Reader = pipe::Receiver;
    type Writer = pipe::Sender;

    async fn connect(&self, config: &BridgeConfig) -> Result<PipeTransport, ConnectError> {
        let input = &config.input_pipe;
        let output = &config.output_pipe;

        if config.create_pipes {
            create_fifo(output)?;
            create_fifo(input)?;
        }

        match config.readiness {
            Readiness::AssumePresent => {
                ensure_fifo(output)?;
                ensure_fifo(input)?;
            }
            Readiness::PollUntilPresent => {
                wait_for_access(output, AccessFlags::R_OK, &config.retry).await?;
                wait_for_access(input, AccessFlags::W_OK, &config.retry).await?;
                ensure_fifo(output)?;
                ensure_fifo(input)?;
            }
        }

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            "Opening pipes"
        );
        let (read_file, write_file) = open_pair(output, input).await?;

        let receiver = pipe::Receiver::from_file(read_file).map_err(|source| ConnectError::Open {
            path: output.clone(),
            source,
        })?;
        let sender = pipe::Sender::from_file(write_file).map_err(|source| ConnectError::Open {
            path: input.clone(),
            source,
        })?;

        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            "Connected to simulator pipes"
        );
        Ok(Transport::new(receiver, sender, config.frame_format())
            .with_read_timeout(config.read_timeout()))
    }
}

/// Create a FIFO, accepting one that already exists.
pub fn create_fifo(path: &Path) -> Result<(), ConnectError> {
    match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Created FIFO");
            Ok(())
        }
        Err(Errno::EEXIST) => ensure_fifo(path),
        Err(source) => Err(ConnectError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn ensure_fifo(path: &Path) -> Result<(), ConnectError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(ConnectError::NotAFifo(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(ConnectError::Missing(path.to_path_buf()))
        }
        Err(source) => Err(ConnectError::Open {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn wait_for_access(
    path: &Path,
    mode: AccessFlags,
    policy: &RetryPolicy,
) -> Result<(), ConnectError> {
    let started = Instant::now();
    let mut backoff = policy.initial_backoff();
    let mut attempts: u32 = 0;

    loop {
        if access(path, mode).is_ok() {
            tracing::debug!(path = %path.display(), attempts, "Pipe available");
            return Ok(());
        }

        let waited = started.elapsed();
        let mut sleep_for = backoff;
        if let Some(max_wait) = policy.max_wait() {
            if waited >= max_wait {
                return Err(ConnectError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            sleep_for = sleep_for.min(max_wait - waited);
        }

        if attempts == 0 {
            tracing::info!(path = %path.display(), "Waiting for simulator to create pipe");
        }
        attempts += 1;
        tokio::time::sleep(sleep_for).await;
        backoff = policy.next_backoff(backoff);
    }
}

/// Upper bound on waiting for a parked open after it has been released.
const RELEASE_WAIT: Duration = Duration::from_secs(2);

/// Open the read end of `output` and the write end of `input` concurrently.
///
/// When one open fails, the other may be parked in the kernel waiting for a peer
/// that never comes. It is released by holding the opposite end of its FIFO until
/// the blocking task returns, so a failed connect leaves no task behind.
async fn open_pair(output: &Path, input: &Path) -> Result<(File, File), ConnectError> {
    let mut read_task = spawn_open(output, false);
    let mut write_task = spawn_open(input, true);

    tokio::select! {
        read = &mut read_task => match joined(read) {
            Ok(read_file) => Ok((read_file, joined(write_task.await)?)),
            Err(e) => {
                let _release = release_pending_open(input);
                let _ = tokio::time::timeout(RELEASE_WAIT, write_task).await;
                Err(e)
            }
        },
        write = &mut write_task => match joined(write) {
            Ok(write_file) => Ok((joined(read_task.await)?, write_file)),
            Err(e) => {
                let _release = release_pending_open(output);
                let _ = tokio::time::timeout(RELEASE_WAIT, read_task).await;
                Err(e)
            }
        },
    }
}

fn spawn_open(path: &Path, write: bool) -> JoinHandle<Result<File, ConnectError>> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        tracing::trace!(path = %path.display(), write, "Waiting for peer to open other end");
        let result = if write {
            std::fs::OpenOptions::new().write(true).open(&path)
        } else {
            std::fs::OpenOptions::new().read(true).open(&path)
        };
        result.map_err(|source| ConnectError::Open { path, source })
    })
}

fn joined(result: Result<Result<File, ConnectError>, JoinError>) -> Result<File, ConnectError> {
    result.unwrap_or_else(|e| Err(ConnectError::from(e)))
}

/// Open `path` read-write without blocking. On Linux this counts as both a reader
/// and a writer, which wakes any open parked on the other end.
fn release_pending_open(path: &Path) -> Option<File> {
    let opened = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path);
    match opened {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to release pending pipe open"
            );
            None
        }
    }
}

/// Unlink both pipes. Absence is not an error; other failures are logged.
pub fn remove_pipes(config: &BridgeConfig) {
    for path in [&config.input_pipe, &config.output_pipe] {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed pipe"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove pipe")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{FakeCounter, make_fifos};

    fn config_for(dir: &Path) -> BridgeConfig {
        BridgeConfig::default()
            .with_pipes(dir.join("input"), dir.join("output"))
            .with_readiness(Readiness::AssumePresent)
    }

    #[tokio::test]
    async fn assume_present_fails_fast_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());

        let result =
            tokio::time::timeout(Duration::from_secs(1), PipeConnector.connect(&config)).await;
        let err = result.expect("connect must not block").err().unwrap();
        assert!(matches!(err, ConnectError::Missing(ref p) if p.ends_with("output")));
    }

    #[tokio::test]
    async fn assume_present_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        std::fs::write(&config.output_pipe, b"").unwrap();
        create_fifo(&config.input_pipe).unwrap();

        let err = PipeConnector.connect(&config).await.err().unwrap();
        assert!(matches!(err, ConnectError::NotAFifo(_)));
    }

    #[test]
    fn create_fifo_accepts_existing_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        create_fifo(&path).unwrap();
        create_fifo(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[tokio::test]
    async fn exchanges_frames_with_peer() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_fifos(dir.path());
        let peer = FakeCounter::spawn(&input, &output, FrameFormat::PYRTL);
        let config = config_for(dir.path());

        let mut transport = PipeConnector.connect(&config).await.unwrap();
        transport.write_frame(Command::Load(0x2a)).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_bytes(), b"0x2a");
        transport.write_frame(Command::Noop).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_bytes(), b"0x2b");

        // Small values come back unpadded, the way Python's hex() prints them.
        transport.write_frame(Command::Load(0xff)).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_bytes(), b"0xff");
        transport.write_frame(Command::Noop).await.unwrap();
        let wrapped = transport.read_frame().await.unwrap();
        assert_eq!(wrapped.as_bytes(), b"0x0");
        assert_eq!(wrapped.counter_value(), Some(0));
        transport.write_frame(Command::Noop).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_bytes(), b"0x1");

        transport.write_frame(Command::Quit).await.unwrap();
        transport.close().await.unwrap();

        let log = peer.join();
        assert_eq!(
            log.commands,
            vec![
                b"12a".to_vec(),
                b"000".to_vec(),
                b"1ff".to_vec(),
                b"000".to_vec(),
                b"000".to_vec(),
            ]
        );
        assert_eq!(log.quits, 1);
        assert_eq!(log.trailing_bytes, 0);
    }

    #[tokio::test]
    async fn poll_waits_until_pipes_appear() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path())
            .with_readiness(Readiness::PollUntilPresent)
            .with_retry(RetryPolicy {
                initial_backoff_ms: 5,
                max_backoff_ms: 20,
                max_wait_ms: Some(10_000),
            });

        let dir_path = dir.path().to_path_buf();
        let creator = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let (input, output) = make_fifos(&dir_path);
            FakeCounter::spawn(&input, &output, FrameFormat::PYRTL)
        });

        let started = Instant::now();
        let mut transport = PipeConnector.connect(&config).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));

        transport.write_frame(Command::Noop).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_bytes(), b"0x1");
        transport.write_frame(Command::Quit).await.unwrap();
        transport.close().await.unwrap();

        let peer = creator.join().unwrap();
        assert_eq!(peer.join().quits, 1);
    }

    #[tokio::test]
    async fn poll_gives_up_after_max_wait() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path())
            .with_readiness(Readiness::PollUntilPresent)
            .with_retry(RetryPolicy {
                initial_backoff_ms: 5,
                max_backoff_ms: 10,
                max_wait_ms: Some(50),
            });

        let err = PipeConnector.connect(&config).await.err().unwrap();
        assert!(matches!(err, ConnectError::Timeout { .. }));
    }

    #[tokio::test]
    async fn peer_closing_mid_read_is_peer_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_fifos(dir.path());
        let peer = FakeCounter::spawn_then_hang_up(&input, &output, 3, b"");
        let config = config_for(dir.path());

        let mut transport = PipeConnector.connect(&config).await.unwrap();
        transport.write_frame(Command::Noop).await.unwrap();
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed));
        peer.join().unwrap();
    }

    #[tokio::test]
    async fn truncated_response_is_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_fifos(dir.path());
        let peer = FakeCounter::spawn_then_hang_up(&input, &output, 3, b"0x");
        let mut config = config_for(dir.path());
        config.exact_response = Some(true);

        let mut transport = PipeConnector.connect(&config).await.unwrap();
        transport.write_frame(Command::Noop).await.unwrap();
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead {
                expected: 4,
                got: 2
            }
        ));
        peer.join().unwrap();
    }

    #[tokio::test]
    async fn read_timeout_bounds_silent_peer() {
        let (host_read, _peer_write) = tokio::io::duplex(64);
        let (_peer_read, host_write) = tokio::io::duplex(64);
        let mut transport = Transport::new(host_read, host_write, FrameFormat::PYRTL)
            .with_read_timeout(Some(Duration::from_millis(20)));

        transport.write_frame(Command::Noop).await.unwrap();
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn failed_write_open_releases_blocked_read_open() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output");
        let input = dir.path().join("input");
        create_fifo(&output).unwrap();

        let started = Instant::now();
        let err = tokio::time::timeout(Duration::from_secs(5), open_pair(&output, &input))
            .await
            .expect("open_pair must return")
            .unwrap_err();
        assert!(matches!(err, ConnectError::Open { ref path, .. } if path == &input));
        assert!(started.elapsed() < RELEASE_WAIT);
    }

    #[tokio::test]
    async fn failed_read_open_releases_blocked_write_open() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output");
        let input = dir.path().join("input");
        create_fifo(&input).unwrap();

        let started = Instant::now();
        let err = tokio::time::timeout(Duration::from_secs(5), open_pair(&output, &input))
            .await
            .expect("open_pair must return")
            .unwrap_err();
        assert!(matches!(err, ConnectError::Open { ref path, .. } if path == &output));
        assert!(started.elapsed() < RELEASE_WAIT);
    }

    #[test]
    fn remove_pipes_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        create_fifo(&config.input_pipe).unwrap();

        remove_pipes(&config);
        remove_pipes(&config);

        assert!(!config.input_pipe.exists());
        assert!(!config.output_pipe.exists());
    }
}
