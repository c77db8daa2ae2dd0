use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use ftp::types::FileType;
use ftp::FtpStream;
use log::{debug, info, warn};

use crate::control::RunControl;
use crate::error::{ConnectError, SessionError, TransferError};

pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Block size used when streaming a retrieve.
pub const CHUNK_SIZE: usize = 8192;

/// Where and as whom to connect. Never persisted by the engine.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    secret: String,
    pub timeout: Duration,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, secret: impl Into<String>) -> Self {
        ConnectionTarget {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An authenticated, binary-mode control connection.
pub trait RemoteSession: Send {
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError>;

    /// Names in the current directory (NLST).
    fn list_names(&mut self) -> Result<Vec<String>, SessionError>;

    /// SIZE reply; `Ok(None)` when the server gives no usable answer.
    fn size(&mut self, filename: &str) -> Result<Option<u64>, SessionError>;

    /// RETR, handing each received block to `on_chunk`. An error returned by
    /// `on_chunk` aborts the transfer. Returns the number of bytes received.
    fn retrieve(
        &mut self,
        filename: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<u64, SessionError>;

    fn quit(&mut self);
}

/// Opens sessions. Implementations connect, authenticate, force binary mode
/// and verify liveness before handing the session out.
pub trait Connector: Send + Sync {
    fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// Production connector over the `ftp` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

struct FtpSession {
    stream: FtpStream,
}

/// Runs `connect` on a helper thread and gives up after `timeout`. A
/// handshake still pending at the deadline is left to finish or fail on its
/// own; its result is dropped.
pub fn within_deadline<T, F>(what: &str, timeout: Duration, connect: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new()
        .name("ftp-fetch-connect".into())
        .spawn(move || {
            let _ = tx.send(connect());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("⏱️ Connect to {} timed out after {:?}", what, timeout);
            Err(SessionError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", what, timeout),
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(SessionError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("connect to {} ended without a result", what),
        ))),
    }
}

impl Connector for FtpConnector {
    fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, SessionError> {
        // FtpStream::connect has no deadline: TCP handshake and greeting are bounded here.
        let (host, port) = (target.host.clone(), target.port);
        let mut stream = within_deadline(&target.address(), target.timeout, move || {
            FtpStream::connect((host.as_str(), port)).map_err(SessionError::from)
        })?;

        let tcp = stream.get_ref();
        tcp.set_read_timeout(Some(target.timeout))?;
        tcp.set_write_timeout(Some(target.timeout))?;

        let ready = stream
            .login(&target.username, target.secret())
            .and_then(|_| stream.transfer_type(FileType::Binary))
            .and_then(|_| stream.noop());

        if let Err(e) = ready {
            // Clean up connection gracefully
            stream.quit().ok();
            return Err(e.into());
        }

        debug!("FTP session established to {}", target.address());
        Ok(Box::new(FtpSession { stream }))
    }
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
        self.stream.cwd(path).map_err(SessionError::from)
    }

    fn list_names(&mut self) -> Result<Vec<String>, SessionError> {
        self.stream.nlst(None).map_err(SessionError::from)
    }

    fn size(&mut self, filename: &str) -> Result<Option<u64>, SessionError> {
        let size = self.stream.size(filename)?;
        Ok(size.map(|n| n as u64))
    }

    fn retrieve(
        &mut self,
        filename: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<u64, SessionError> {
        // retr takes an `Fn` reader, so the mutable callback goes through a RefCell.
        let on_chunk = RefCell::new(on_chunk);
        let received = self.stream.retr(filename, |reader| {
            let mut buf = [0u8; CHUNK_SIZE];
            let mut total = 0u64;
            loop {
                let n = reader
                    .read(&mut buf)
                    .map_err(ftp::types::FtpError::ConnectionError)?;
                if n == 0 {
                    break;
                }
                (*on_chunk.borrow_mut())(&buf[..n]).map_err(ftp::types::FtpError::ConnectionError)?;
                total += n as u64;
            }
            Ok(total)
        })?;
        Ok(received)
    }

    fn quit(&mut self) {
        self.stream.quit().ok();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server refused us because of its connection limit.
    ServerBusy,
    Timeout,
    Other,
}

/// Connection-limit replies seen from data loggers' FTP servers.
pub fn is_connection_limit_error(error_msg: &str) -> bool {
    let error_lower = error_msg.to_lowercase();
    error_lower.contains("maximum number")
        || error_lower.contains("too many")
        || error_lower.contains("connection limit")
        || error_lower.contains("max connections")
        || error_lower.contains("server full")
        || error_lower.contains("421")
        || error_lower.contains("bind")
}

pub fn classify(err: &SessionError) -> FailureKind {
    // Timeouts first: servers also close idle control connections with 421.
    if err.is_timeout() {
        FailureKind::Timeout
    } else if is_connection_limit_error(&err.to_string()) {
        FailureKind::ServerBusy
    } else {
        FailureKind::Other
    }
}

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub other_delay: Duration,
    pub timeout_base: Duration,
    pub timeout_cap: Duration,
    pub busy_base: Duration,
    pub busy_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            other_delay: Duration::from_secs(1),
            timeout_base: Duration::from_secs(1),
            timeout_cap: Duration::from_secs(30),
            busy_base: Duration::from_secs(2),
            busy_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        RetryPolicy {
            other_delay: Duration::ZERO,
            timeout_base: Duration::ZERO,
            timeout_cap: Duration::ZERO,
            busy_base: Duration::ZERO,
            busy_cap: Duration::ZERO,
        }
    }

    /// Delay after the failed attempt numbered `attempt` (0-based).
    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        match kind {
            FailureKind::ServerBusy => self.busy_base.saturating_mul(factor).min(self.busy_cap),
            FailureKind::Timeout => self.timeout_base.saturating_mul(factor).min(self.timeout_cap),
            FailureKind::Other => self.other_delay,
        }
    }
}

/// Opens sessions with bounded retries and per-kind backoff.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        ConnectionManager {
            connector,
            policy: RetryPolicy::default(),
        }
    }

    /// Manager over real FTP connections.
    pub fn ftp() -> Self {
        Self::new(Arc::new(FtpConnector))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn connect(
        &self,
        target: &ConnectionTarget,
        retries: u32,
        control: &RunControl,
    ) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let max_attempts = retries.max(1);
        let mut attempt = 0;

        loop {
            if control.is_cancelled() {
                return Err(ConnectError::Cancelled);
            }

            let err = match self.connector.open(target) {
                Ok(session) => {
                    if attempt > 0 {
                        info!("✅ Connected to {} after {} attempts", target.address(), attempt + 1);
                    }
                    return Ok(session);
                }
                Err(e) => e,
            };

            let kind = classify(&err);
            attempt += 1;

            if attempt >= max_attempts {
                warn!(
                    "❌ Max connection retries ({}) reached for {}: {}",
                    max_attempts,
                    target.address(),
                    err
                );
                return Err(match kind {
                    FailureKind::ServerBusy => ConnectError::ServerBusy {
                        attempts: max_attempts,
                        source: err,
                    },
                    FailureKind::Timeout => ConnectError::Timeout {
                        attempts: max_attempts,
                        source: err,
                    },
                    FailureKind::Other => ConnectError::Failed {
                        attempts: max_attempts,
                        source: err,
                    },
                });
            }

            let delay = self.policy.delay_for(kind, attempt - 1);
            match kind {
                FailureKind::ServerBusy => warn!(
                    "🚫 Server connection limit reached for {} (attempt {}/{}), waiting {:.1}s: {}",
                    target.address(),
                    attempt,
                    max_attempts,
                    delay.as_secs_f64(),
                    err
                ),
                _ => warn!(
                    "🔄 Connection attempt {}/{} to {} failed, retrying in {:.1}s: {}",
                    attempt,
                    max_attempts,
                    target.address(),
                    delay.as_secs_f64(),
                    err
                ),
            }

            if !control.sleep(delay) {
                return Err(ConnectError::Cancelled);
            }
        }
    }
}

fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Enters `path` and lists it. A missing directory is an error, not an
/// empty listing.
pub fn list_directory(session: &mut dyn RemoteSession, path: &str) -> Result<Vec<String>, SessionError> {
    session.change_dir(path)?;
    let names = session
        .list_names()?
        .iter()
        .map(|name| basename(name.trim()))
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// Best-effort SIZE. Any refusal yields `None`.
pub fn file_size(session: &mut dyn RemoteSession, filename: &str) -> Option<u64> {
    match session.size(filename) {
        Ok(size) => size,
        Err(e) => {
            debug!("SIZE not available for {}: {}", filename, e);
            None
        }
    }
}

/// Streams `filename` into `sink`, honouring pause and cancel between blocks.
/// `on_bytes` receives the cumulative byte count after each block.
pub fn retrieve_file(
    session: &mut dyn RemoteSession,
    filename: &str,
    sink: &mut dyn Write,
    control: &RunControl,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, TransferError> {
    let mut received = 0u64;
    let mut interrupted: Option<TransferError> = None;

    let result = session.retrieve(filename, &mut |chunk: &[u8]| {
        if control.checkpoint().is_err() {
            interrupted = Some(TransferError::Cancelled);
            return Err(io::Error::new(io::ErrorKind::Interrupted, "download cancelled"));
        }
        if let Err(e) = sink.write_all(chunk) {
            let msg = e.to_string();
            interrupted = Some(TransferError::Local(e));
            return Err(io::Error::new(io::ErrorKind::Other, msg));
        }
        received += chunk.len() as u64;
        on_bytes(received);
        Ok(())
    });

    match (result, interrupted) {
        (_, Some(err)) => Err(err),
        (Ok(_), None) => Ok(received),
        (Err(e), None) => Err(TransferError::Session(e)),
    }
}
