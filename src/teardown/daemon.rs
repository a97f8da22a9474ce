//! Control client for cfdevd, the privileged helper daemon.
//!
//! cfdevd listens on a Unix stream socket and speaks a four-step protocol:
//!
//! ```text
//! client → daemon   49-byte handshake frame (random, regenerated per connection)
//! daemon → client   the same 49 bytes echoed back
//! client → daemon   1-byte instruction        (1 = uninstall)
//! daemon → client   0 or 1 bytes              (status code, or just close)
//! ```
//!
//! ## Closing without a reply is success
//!
//! Once cfdevd has committed to uninstalling it may exit immediately, and
//! its own exit races the write of the status byte. A connection that
//! closes before any status byte arrives therefore means *success*, not a
//! lost reply. Only an explicit non-zero status byte fails the uninstall.
//! [`DaemonReply`] keeps the three outcomes apart until the caller
//! collapses them with [`DaemonReply::into_result`].
//!
//! A missing socket file, or a socket file nobody listens on, means the
//! daemon is not installed or already gone. Both are success.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

/// Size of the handshake frame in bytes.
pub const HANDSHAKE_LEN: usize = 49;

/// Single-byte opcodes understood by cfdevd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    /// Perform privileged teardown, then stop.
    Uninstall = 1,
}

/// What cfdevd answered after receiving an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonReply {
    /// The connection closed without a status byte.
    ImplicitSuccess,
    /// Status byte `0`.
    ExplicitSuccess,
    /// Non-zero status byte; the code is daemon-defined.
    ExplicitFailure(u8),
}

impl DaemonReply {
    fn from_status(status: u8) -> Self {
        match status {
            0 => Self::ExplicitSuccess,
            code => Self::ExplicitFailure(code),
        }
    }

    pub fn into_result(self) -> Result<(), DaemonError> {
        match self {
            Self::ImplicitSuccess | Self::ExplicitSuccess => Ok(()),
            Self::ExplicitFailure(code) => Err(DaemonError::Uninstall(code)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to uninstall cfdevd: errorcode: {0}")]
    Uninstall(u8),
    #[error("cfdevd handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("failed to send instruction to cfdevd: {0}")]
    Instruction(std::io::Error),
    #[error("failed to read cfdevd response: {0}")]
    Response(std::io::Error),
    #[error("timed out after {timeout:?} waiting for cfdevd ({stage})")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
}

/// Talks to cfdevd over its control socket.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    /// `timeout` bounds each individual step: connect, handshake,
    /// instruction write and response read.
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Ask cfdevd to uninstall itself.
    pub async fn send_uninstall(&self) -> Result<(), DaemonError> {
        match self.send(Instruction::Uninstall).await? {
            Some(reply) => {
                info!(socket = %self.socket.display(), ?reply, "cfdevd answered uninstall");
                reply.into_result()
            }
            None => Ok(()),
        }
    }

    /// Run one handshake + instruction exchange.
    ///
    /// Returns `Ok(None)` when no daemon is present to talk to.
    pub async fn send(&self, instruction: Instruction) -> Result<Option<DaemonReply>, DaemonError> {
        if let Err(e) = tokio::fs::symlink_metadata(&self.socket).await {
            if e.kind() == ErrorKind::NotFound {
                debug!(socket = %self.socket.display(), "no cfdevd socket, nothing to do");
                return Ok(None);
            }
        }
        self.exchange(instruction).await
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        step: impl std::future::Future<Output = std::io::Result<T>>,
    ) -> Result<std::io::Result<T>, DaemonError> {
        tokio::time::timeout(self.timeout, step)
            .await
            .map_err(|_| DaemonError::Timeout {
                stage,
                timeout: self.timeout,
            })
    }

    #[cfg(unix)]
    async fn exchange(&self, instruction: Instruction) -> Result<Option<DaemonReply>, DaemonError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixStream;

        let mut stream = match self.bounded("connect", UnixStream::connect(&self.socket)).await? {
            Ok(stream) => stream,
            Err(e) => {
                debug!(socket = %self.socket.display(), error = %e, "cfdevd socket has no listener");
                return Ok(None);
            }
        };

        let frame = handshake_frame();
        self.bounded("handshake", stream.write_all(&frame))
            .await?
            .map_err(DaemonError::Handshake)?;

        let mut echo = [0u8; HANDSHAKE_LEN];
        self.bounded("handshake", stream.read_exact(&mut echo))
            .await?
            .map_err(DaemonError::Handshake)?;
        if echo != frame {
            debug!("cfdevd echoed a different handshake frame");
        }

        self.bounded("instruction", stream.write_all(&[instruction as u8]))
            .await?
            .map_err(DaemonError::Instruction)?;

        let mut status = [0u8; 1];
        let reply = match self.bounded("response", stream.read(&mut status)).await? {
            Ok(0) => DaemonReply::ImplicitSuccess,
            Ok(_) => DaemonReply::from_status(status[0]),
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe) => {
                DaemonReply::ImplicitSuccess
            }
            Err(e) => return Err(DaemonError::Response(e)),
        };
        Ok(Some(reply))
    }

    #[cfg(not(unix))]
    async fn exchange(&self, _instruction: Instruction) -> Result<Option<DaemonReply>, DaemonError> {
        Err(DaemonError::Handshake(std::io::Error::new(
            ErrorKind::Unsupported,
            "cfdevd control sockets require a Unix host",
        )))
    }
}

fn handshake_frame() -> [u8; HANDSHAKE_LEN] {
    use rand::Rng;

    let mut frame = [0u8; HANDSHAKE_LEN];
    rand::thread_rng().fill(&mut frame[..]);
    frame
}
