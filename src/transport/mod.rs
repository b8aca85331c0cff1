//! # Transport
//!
//! A TCP byte stream gated by a passphrase handshake:
//!
//! 1. the server sends `TSB1` followed by a 16-byte nonce
//! 2. the client answers with its stream id (u16 length prefix) and
//!    `MD5(nonce ‖ passphrase)`
//! 3. the server answers with a status byte and, on success, the connection
//!    carries raw MPEG-TS from then on
//!
//! Only stream ids starting with `publish:` are accepted.

use crate::error::{BridgeError, Result};
use md5::{Digest, Md5};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use uuid::Uuid;

pub const HANDSHAKE_MAGIC: &[u8; 4] = b"TSB1";
pub const NONCE_SIZE: usize = 16;
pub const MAX_STREAM_ID_LEN: usize = 512;
pub const PUBLISH_PREFIX: &str = "publish:";

const STATUS_OK: u8 = 0;
const STATUS_BAD_PASSPHRASE: u8 = 1;
const STATUS_REJECTED: u8 = 2;

fn new_nonce() -> [u8; NONCE_SIZE] {
    Uuid::new_v4().into_bytes()
}

fn passphrase_digest(nonce: &[u8], passphrase: Option<&str>) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(nonce);
    hasher.update(passphrase.unwrap_or_default().as_bytes());
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Accepts incoming connections.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Waits for the next TCP connection. The handshake is left to the
    /// caller so it can run on the connection's own task.
    pub async fn accept(&self) -> Result<PendingConnection> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(PendingConnection { stream, peer })
    }
}

/// A connection that has not completed the handshake yet.
#[derive(Debug)]
pub struct PendingConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl PendingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Runs the server side of the handshake. Without a passphrase every
    /// client is let in.
    pub async fn handshake(mut self, passphrase: Option<&str>) -> Result<Connection> {
        let nonce = new_nonce();
        let mut hello = Vec::with_capacity(HANDSHAKE_MAGIC.len() + NONCE_SIZE);
        hello.extend_from_slice(HANDSHAKE_MAGIC);
        hello.extend_from_slice(&nonce);
        self.stream.write_all(&hello).await?;

        let len = self.stream.read_u16().await? as usize;
        if len > MAX_STREAM_ID_LEN {
            return Err(BridgeError::Handshake(format!(
                "stream id of {} bytes is too long",
                len
            )));
        }
        let mut stream_id = vec![0u8; len];
        self.stream.read_exact(&mut stream_id).await?;
        let stream_id = String::from_utf8(stream_id)
            .map_err(|_| BridgeError::Handshake("stream id is not valid UTF-8".into()))?;

        let mut digest = [0u8; 16];
        self.stream.read_exact(&mut digest).await?;

        if passphrase.is_some() && digest != passphrase_digest(&nonce, passphrase) {
            self.stream.write_u8(STATUS_BAD_PASSPHRASE).await?;
            return Err(BridgeError::Handshake(format!(
                "wrong passphrase from {}",
                self.peer
            )));
        }
        if !stream_id.starts_with(PUBLISH_PREFIX) {
            self.stream.write_u8(STATUS_REJECTED).await?;
            return Err(BridgeError::Rejected(format!(
                "unsupported stream id {:?} from {}",
                stream_id, self.peer
            )));
        }

        self.stream.write_u8(STATUS_OK).await?;
        log::info!("accepted stream {:?} from {}", stream_id, self.peer);
        Ok(Connection {
            stream: self.stream,
            peer: self.peer,
            stream_id,
        })
    }
}

/// An established connection carrying one transport stream.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    stream_id: String,
}

impl Connection {
    /// Connects to a server and runs the client side of the handshake.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        stream_id: &str,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        if stream_id.len() > MAX_STREAM_ID_LEN {
            return Err(BridgeError::Config(format!(
                "stream id of {} bytes is too long",
                stream_id.len()
            )));
        }

        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let mut hello = [0u8; 4 + NONCE_SIZE];
        stream.read_exact(&mut hello).await?;
        if &hello[..4] != HANDSHAKE_MAGIC {
            return Err(BridgeError::Handshake(format!(
                "unexpected greeting from {}",
                peer
            )));
        }
        let nonce = &hello[4..];

        let mut answer = Vec::with_capacity(2 + stream_id.len() + 16);
        answer.extend_from_slice(&(stream_id.len() as u16).to_be_bytes());
        answer.extend_from_slice(stream_id.as_bytes());
        answer.extend_from_slice(&passphrase_digest(nonce, passphrase));
        stream.write_all(&answer).await?;

        match stream.read_u8().await? {
            STATUS_OK => {}
            STATUS_BAD_PASSPHRASE => {
                return Err(BridgeError::Handshake("passphrase rejected by server".into()))
            }
            STATUS_REJECTED => {
                return Err(BridgeError::Rejected(format!(
                    "stream id {:?} rejected by server",
                    stream_id
                )))
            }
            status => {
                return Err(BridgeError::Handshake(format!(
                    "unknown handshake status {}",
                    status
                )))
            }
        }

        log::info!("connected to {} as {:?}", peer, stream_id);
        Ok(Self {
            stream,
            peer,
            stream_id: stream_id.to_string(),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
