//! Message-oriented, optionally-encrypted channel over a byte stream.
//!
//! A connection wraps a raw socket with sentinel framing and the sealed-box
//! handshake. Control messages carry the `INTERNAL::` tag, structured
//! payloads `DATA::`, and raw file chunks travel untagged. Once the key
//! exchange completes every outgoing message is sealed and hex-armored
//! before framing, and every incoming segment is opened right after frame
//! extraction.

use crate::error::{HikupError, Result};
use crate::wire::crypto::{self, KeyPair};
use crate::wire::framer::{Framer, SENTINEL};
use crypto_box::PublicKey;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Tag prefix for control/metadata messages.
pub const INTERNAL: &str = "INTERNAL::";

/// Tag prefix for structured data payloads (file listings, hash sets).
pub const DATA: &str = "DATA::";

/// Public key announcement, the only message both sides send unencrypted.
const HANDSHAKE_TAG: &str = "INTERNAL::publicKey:";

/// Default receive buffer: fine for control traffic, resized by callers
/// before bulk transfers.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Receive timeout so a stalled peer cannot hang a worker indefinitely.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Duplex message channel. Transfer and sync logic is generic over this so
/// the same code drives a server-accepted or client-initiated socket.
#[allow(async_fn_in_trait)]
pub trait Channel {
    async fn send(&mut self, message: &[u8]) -> Result<()>;
    async fn send_internal(&mut self, message: &str) -> Result<()>;
    async fn send_data(&mut self, message: &str) -> Result<()>;
    async fn receive(&mut self) -> Result<Vec<u8>>;
    /// Like `receive`, additionally reporting how long the blocking read
    /// took (zero when served from the pending queue). Feeds the adaptive
    /// chunk sizing.
    async fn receive_timed(&mut self) -> Result<(Vec<u8>, Duration)>;
    async fn receive_internal(&mut self) -> Result<String>;
    async fn receive_data(&mut self) -> Result<String>;
    fn set_buffer_size(&mut self, size: usize);
}

/// Shared connection core, generic over the underlying stream so unit tests
/// can run it over an in-memory duplex pipe.
pub struct Connection<S> {
    stream: S,
    keys: KeyPair,
    remote_key: Option<PublicKey>,
    encrypted: bool,
    framer: Framer,
    buffer_size: usize,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            keys: KeyPair::generate(),
            remote_key: None,
            encrypted: false,
            framer: Framer::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size.max(4 * 1024);
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Seal (when encrypted), frame, write. A short or failed write is a
    /// hard error; nothing is retried.
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        let mut frame = if self.encrypted {
            let remote = self
                .remote_key
                .as_ref()
                .ok_or_else(|| HikupError::Handshake("encrypted flag set without remote key".into()))?;
            crypto::seal(remote, message)?
        } else {
            message.to_vec()
        };
        frame.extend_from_slice(SENTINEL);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_internal(&mut self, message: &str) -> Result<()> {
        self.send(format!("{INTERNAL}{message}").as_bytes()).await
    }

    pub async fn send_data(&mut self, message: &str) -> Result<()> {
        self.send(format!("{DATA}{message}").as_bytes()).await
    }

    async fn read_more(&mut self) -> Result<usize> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = match timeout(self.read_timeout, self.stream.read(&mut buf)).await {
            Err(_) => return Err(HikupError::Timeout),
            Ok(read) => read?,
        };
        if n == 0 {
            return Err(HikupError::Disconnected);
        }
        self.framer.push(&buf[..n]);
        Ok(n)
    }

    /// Next framed segment, opened if encryption is active. Reads only when
    /// the pending queue is empty, so batched messages replay in order.
    async fn next_segment(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(raw) = self.framer.next() {
                return if self.encrypted {
                    crypto::open(&self.keys, &raw)
                } else {
                    Ok(raw)
                };
            }
            self.read_more().await?;
        }
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        self.next_segment().await
    }

    pub async fn receive_timed(&mut self) -> Result<(Vec<u8>, Duration)> {
        if self.framer.has_pending() {
            return Ok((self.next_segment().await?, Duration::ZERO));
        }
        let start = Instant::now();
        let message = self.next_segment().await?;
        Ok((message, start.elapsed()))
    }

    pub async fn receive_internal(&mut self) -> Result<String> {
        tagged(self.receive().await?, INTERNAL)
    }

    pub async fn receive_data(&mut self) -> Result<String> {
        tagged(self.receive().await?, DATA)
    }

    /// Initiator half of the key exchange: announce our public key in the
    /// clear, then wait for the peer's announcement. Idempotent.
    pub async fn announce_handshake(&mut self) -> Result<()> {
        if self.encrypted {
            return Ok(());
        }
        let announce = format!("{HANDSHAKE_TAG}{}", self.keys.public_hex());
        self.send(announce.as_bytes()).await?;

        let reply = self.next_segment().await?;
        self.complete_handshake(&reply)
    }

    /// Responder half: wait for the peer's announcement, reply with our own
    /// key (still in the clear), then flip to encrypted. Idempotent.
    pub async fn await_handshake(&mut self) -> Result<()> {
        if self.encrypted {
            return Ok(());
        }
        let announce = self.next_segment().await?;
        // Reply before flipping so our own announcement goes out unsealed.
        let reply = format!("{HANDSHAKE_TAG}{}", self.keys.public_hex());
        self.send(reply.as_bytes()).await?;
        self.complete_handshake(&announce)
    }

    /// Decode the peer key, flip `encrypted`, and retroactively open any
    /// segments the framer queued before the handshake was recognized -- a
    /// batched read may have split off sealed messages already.
    fn complete_handshake(&mut self, announcement: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(announcement)
            .map_err(|_| HikupError::Handshake("announcement is not UTF-8".into()))?;
        let hex_key = text
            .strip_prefix(HANDSHAKE_TAG)
            .ok_or_else(|| HikupError::Handshake(format!("expected public key, got: {text}")))?;

        self.remote_key = Some(crypto::decode_public_key(hex_key)?);
        self.encrypted = true;

        let keys = &self.keys;
        self.framer.try_map_pending(|seg| crypto::open(keys, seg))
    }
}

fn tagged(message: Vec<u8>, tag: &str) -> Result<String> {
    let text = String::from_utf8(message)
        .map_err(|_| HikupError::Protocol(format!("{tag} message is not UTF-8")))?;
    match text.strip_prefix(tag) {
        Some(rest) => Ok(rest.to_string()),
        None => Err(HikupError::Protocol(format!(
            "expected {tag} message, got: {}",
            text.chars().take(64).collect::<String>()
        ))),
    }
}

/// Connection accepted by the server. Announces its key first.
pub struct ServerConnection {
    inner: Connection<TcpStream>,
}

impl ServerConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: Connection::new(stream),
        }
    }

    /// Run the handshake as the first application activity on the socket.
    pub async fn init(&mut self) -> Result<()> {
        self.inner.announce_handshake().await
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.inner.set_read_timeout(read_timeout);
    }
}

impl Channel for ServerConnection {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.inner.send(message).await
    }
    async fn send_internal(&mut self, message: &str) -> Result<()> {
        self.inner.send_internal(message).await
    }
    async fn send_data(&mut self, message: &str) -> Result<()> {
        self.inner.send_data(message).await
    }
    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.inner.receive().await
    }
    async fn receive_timed(&mut self) -> Result<(Vec<u8>, Duration)> {
        self.inner.receive_timed().await
    }
    async fn receive_internal(&mut self) -> Result<String> {
        self.inner.receive_internal().await
    }
    async fn receive_data(&mut self) -> Result<String> {
        self.inner.receive_data().await
    }
    fn set_buffer_size(&mut self, size: usize) {
        self.inner.set_buffer_size(size);
    }
}

/// Connection initiated by a client (or by a peer acting as sync master).
/// The first receive after connect carries the server's key announcement.
pub struct ClientConnection {
    inner: Connection<TcpStream>,
}

impl ClientConnection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut inner = Connection::new(stream);
        inner.await_handshake().await?;
        Ok(Self { inner })
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.inner.set_read_timeout(read_timeout);
    }
}

impl Channel for ClientConnection {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.inner.send(message).await
    }
    async fn send_internal(&mut self, message: &str) -> Result<()> {
        self.inner.send_internal(message).await
    }
    async fn send_data(&mut self, message: &str) -> Result<()> {
        self.inner.send_data(message).await
    }
    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.inner.receive().await
    }
    async fn receive_timed(&mut self) -> Result<(Vec<u8>, Duration)> {
        self.inner.receive_timed().await
    }
    async fn receive_internal(&mut self) -> Result<String> {
        self.inner.receive_internal().await
    }
    async fn receive_data(&mut self) -> Result<String> {
        self.inner.receive_data().await
    }
    fn set_buffer_size(&mut self, size: usize) {
        self.inner.set_buffer_size(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_plaintext_send_receive() {
        let (a, b) = duplex(64 * 1024);
        let mut left = Connection::new(a);
        let mut right = Connection::new(b);

        left.send(b"raw bytes").await.unwrap();
        left.send_internal("OK").await.unwrap();
        left.send_data("x|y|").await.unwrap();

        assert_eq!(right.receive().await.unwrap(), b"raw bytes");
        assert_eq!(right.receive_internal().await.unwrap(), "OK");
        assert_eq!(right.receive_data().await.unwrap(), "x|y|");
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_protocol_error() {
        let (a, b) = duplex(64 * 1024);
        let mut left = Connection::new(a);
        let mut right = Connection::new(b);

        left.send_data("payload").await.unwrap();
        let err = right.receive_internal().await.unwrap_err();
        assert!(matches!(err, HikupError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_handshake_then_encrypted_traffic() {
        let (a, b) = duplex(256 * 1024);
        let mut server = Connection::new(a);
        let mut client = Connection::new(b);

        let (s, c) = tokio::join!(server.announce_handshake(), client.await_handshake());
        s.unwrap();
        c.unwrap();
        assert!(server.is_encrypted());
        assert!(client.is_encrypted());

        client.send_internal("command:UPLOAD").await.unwrap();
        assert_eq!(
            server.receive_internal().await.unwrap(),
            "command:UPLOAD"
        );

        server.send(&[0u8, 1, 2, 255]).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), vec![0u8, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_messages_batched_behind_handshake_are_decrypted() {
        // The server writes its announcement and the client replies plus
        // queues sealed messages; if they coalesce into one read on the
        // server side, the framer splits them before `encrypted` flips and
        // they must be opened retroactively.
        let (a, b) = duplex(256 * 1024);
        let mut server = Connection::new(a);
        let mut client = Connection::new(b);

        let client_task = async {
            client.await_handshake().await.unwrap();
            client.send_internal("command:LIST").await.unwrap();
            client.send_internal("user:admin").await.unwrap();
            client.send_internal("pass:admin").await.unwrap();
            client
        };
        let server_task = async {
            server.announce_handshake().await.unwrap();
            server
        };
        let (mut server, _client) = tokio::join!(server_task, client_task);

        assert_eq!(server.receive_internal().await.unwrap(), "command:LIST");
        assert_eq!(server.receive_internal().await.unwrap(), "user:admin");
        assert_eq!(server.receive_internal().await.unwrap(), "pass:admin");
    }

    #[tokio::test]
    async fn test_disconnect_is_distinguishable() {
        let (a, b) = duplex(1024);
        let mut right = Connection::new(b);
        drop(a);
        assert!(matches!(
            right.receive().await.unwrap_err(),
            HikupError::Disconnected
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let (_a, b) = duplex(1024);
        let mut right = Connection::new(b);
        right.set_read_timeout(Duration::from_millis(50));
        assert!(matches!(
            right.receive().await.unwrap_err(),
            HikupError::Timeout
        ));
    }
}
