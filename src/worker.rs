//! The single-connection `Worker`: a client connection that serializes one
//! command or pipeline at a time on its socket.
//!
//! In a larger workspace this would typically be supplied by a shared
//! connection crate; here it is a minimal, concrete implementation so the
//! routing runtime has something real to drive.

use crate::protocol::{RespCodec, RespFrame};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("connection closed by peer")]
    Closed,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("write timed out")]
    WriteTimeout,
    #[error("read timed out")]
    ReadTimeout,
    #[error("io error: {0}")]
    Io(std::sync::Arc<std::io::Error>),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("address resolution failed: {0}")]
    Resolve(String),
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        WorkerError::Io(std::sync::Arc::new(e))
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// The interface the dispatcher and pool depend on. A trait so tests can
/// substitute an in-memory fake instead of opening real sockets.
#[async_trait]
pub trait Transport: Send {
    async fn query(&mut self, command: &[Bytes]) -> Result<RespFrame, WorkerError>;
    async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<Vec<RespFrame>, WorkerError>;
}

/// A live TCP connection to one primary, authenticated if a password was
/// configured for its pool.
pub struct Worker {
    stream: TcpStream,
    codec: RespCodec,
    read_buf: BytesMut,
}

impl Worker {
    /// Resolves `host:port` off the async runtime (`ToSocketAddrs::to_socket_addrs`
    /// blocks on real DNS lookups) so a configured hostname, not just an IP
    /// literal, can name a cluster node.
    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, WorkerError> {
        let target = format!("{host}:{port}");
        tokio::task::spawn_blocking(move || target.to_socket_addrs())
            .await
            .map_err(|e| WorkerError::Resolve(format!("resolution task failed: {e}")))?
            .map_err(|e| WorkerError::Resolve(format!("could not resolve '{host}:{port}': {e}")))?
            .next()
            .ok_or_else(|| WorkerError::Resolve(format!("no addresses for '{host}:{port}'")))
    }

    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self, WorkerError> {
        let addr = Self::resolve(host, port).await?;
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| WorkerError::ConnectTimeout)??;
        let mut worker = Self {
            stream,
            codec: RespCodec,
            read_buf: BytesMut::with_capacity(4096),
        };
        if let Some(password) = password {
            worker.authenticate(password).await?;
        }
        Ok(worker)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), WorkerError> {
        let auth = vec![Bytes::from_static(b"AUTH"), Bytes::copy_from_slice(password.as_bytes())];
        match self.send_and_receive(&RespFrame::command(&auth)).await? {
            RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
            RespFrame::Error(e) => Err(WorkerError::AuthFailed(e)),
            other => Err(WorkerError::AuthFailed(format!("unexpected AUTH reply: {other:?}"))),
        }
    }

    async fn send_and_receive(&mut self, frame: &RespFrame) -> Result<RespFrame, WorkerError> {
        let mut write_buf = BytesMut::new();
        self.codec.encode(frame.clone(), &mut write_buf)?;

        tokio::time::timeout(WRITE_TIMEOUT, self.stream.write_all(&write_buf))
            .await
            .map_err(|_| WorkerError::WriteTimeout)??;

        self.read_one_frame().await
    }

    async fn read_one_frame(&mut self) -> Result<RespFrame, WorkerError> {
        loop {
            if let Some(frame) = self
                .codec
                .decode(&mut self.read_buf)
                .map_err(WorkerError::from)?
            {
                return Ok(frame);
            }
            let read = tokio::time::timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| WorkerError::ReadTimeout)??;
            if read == 0 {
                return Err(WorkerError::Closed);
            }
        }
    }
}

#[async_trait]
impl Transport for Worker {
    /// Issues one command and waits for its single reply.
    async fn query(&mut self, command: &[Bytes]) -> Result<RespFrame, WorkerError> {
        self.send_and_receive(&RespFrame::command(command)).await
    }

    /// Issues every command in the pipeline back-to-back, then reads exactly
    /// as many replies, in order. Because this is one logical call on one
    /// socket, command ordering is preserved even under concurrent callers
    /// sharing the pool (each caller holds the worker for the call's
    /// duration).
    async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<Vec<RespFrame>, WorkerError> {
        let mut write_buf = BytesMut::new();
        for command in commands {
            self.codec
                .encode(RespFrame::command(command), &mut write_buf)?;
        }
        tokio::time::timeout(WRITE_TIMEOUT, self.stream.write_all(&write_buf))
            .await
            .map_err(|_| WorkerError::WriteTimeout)??;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            replies.push(self.read_one_frame().await?);
        }
        Ok(replies)
    }
}
