//! Raw wire posting: speaks the POST command directly over the TLS socket
//! instead of going through `nntp_rs::Article`/`NntpClient::post()`.
//!
//! `nntp_rs`'s posting path is `String`-typed end to end (`ArticleBuilder::body`,
//! `Article::serialize_for_posting`), but a yEnc body is arbitrary bytes --
//! the +42 shift covers the full byte range and only four values are ever
//! escaped away. There is no safe way to hand such a buffer to `nntp_rs`
//! without either corrupting it or violating `String`'s UTF-8 invariant, so
//! posting talks to the wire directly here and reuses `nntp_rs` only for the
//! textual STAT/HEAD check path, which never carries a binary body.

use crate::config::ServerConfig;
use crate::types::Headers;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, trace};

const GREETING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const RESPONSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(180);

/// Errors from a raw posting connection, classified the same way
/// [`crate::types::PostOutcome`] distinguishes `nntp_rs::NntpError`.
#[derive(Debug, Error)]
pub enum WireError {
    /// Transport-level failure (connect, TLS handshake, read/write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TLS handshake or certificate validation failed
    #[error("TLS error: {0}")]
    Tls(String),
    /// Server did not respond in time
    #[error("timed out waiting for server response")]
    Timeout,
    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,
    /// Server rejected credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Server does not allow posting (440)
    #[error("posting not permitted")]
    PostingNotPermitted,
    /// Server rejected the article after the body was sent (441)
    #[error("posting failed: {0}")]
    PostingFailed(String),
    /// Any other unexpected status line
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// Three-digit response code
        code: u32,
        /// Response text
        message: String,
    },
}

struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// A single raw posting connection: authenticated and ready for `POST`.
pub struct WireConnection {
    stream: BufReader<TlsStream<TcpStream>>,
    broken: bool,
}

impl WireConnection {
    /// Connect, perform the TLS handshake, and authenticate if credentials
    /// are configured. Mirrors `nntp_rs::NntpClient::connect`, which always
    /// wraps the socket in TLS regardless of `ServerConfig::tls`.
    pub async fn connect(config: &ServerConfig) -> Result<Self, WireError> {
        debug!("opening raw posting connection to {}:{}", config.host, config.port);

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;

        use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
        let _ = CryptoProvider::install_default(ring::default_provider());

        let tls_config = if config.insecure_ssl {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.as_str())
            .map_err(|e| WireError::Tls(format!("invalid domain: {e}")))?
            .to_owned();

        let tls_stream = timeout(GREETING_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| WireError::Timeout)?
            .map_err(|e| WireError::Tls(format!("handshake failed: {e}")))?;

        let mut conn = Self {
            stream: BufReader::with_capacity(262144, tls_stream),
            broken: false,
        };

        let (code, message) = conn.read_status().await?;
        if !(200..300).contains(&code) {
            return Err(WireError::Protocol { code, message });
        }

        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            conn.authenticate(username, config.password.as_deref().unwrap_or_default()).await?;
        }

        Ok(conn)
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), WireError> {
        self.write_raw(format!("AUTHINFO USER {username}\r\n").as_bytes()).await?;
        let (code, message) = self.read_status().await?;

        if code == 381 {
            self.write_raw(format!("AUTHINFO PASS {password}\r\n").as_bytes()).await?;
            let (code, message) = self.read_status().await?;
            if code != 281 {
                return Err(WireError::AuthFailed(message));
            }
        } else if code != 281 {
            return Err(WireError::AuthFailed(message));
        }

        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.stream.get_mut().write_all(bytes).await.map_err(|e| {
            self.broken = true;
            e
        })?;
        self.stream.get_mut().flush().await.map_err(|e| {
            self.broken = true;
            e
        })?;
        Ok(())
    }

    async fn read_status(&mut self) -> Result<(u32, String), WireError> {
        let mut line = Vec::new();
        let n = timeout(RESPONSE_TIMEOUT, self.stream.read_until(b'\n', &mut line))
            .await
            .map_err(|_| {
                self.broken = true;
                WireError::Timeout
            })?
            .map_err(|e| {
                self.broken = true;
                e
            })?;

        if n == 0 {
            self.broken = true;
            return Err(WireError::ConnectionClosed);
        }

        // Status lines are plain ASCII ("NNN message text\r\n"); lossy
        // conversion is safe here since we never re-decode an article body.
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();
        trace!("raw post <- {line}");

        let mut parts = line.splitn(2, ' ');
        let code: u32 = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| {
                self.broken = true;
                WireError::Protocol { code: 0, message: line.to_string() }
            })?;
        let message = parts.next().unwrap_or_default().to_string();
        Ok((code, message))
    }

    /// Send `POST`, then the headers and dot-stuffed yEnc body as raw bytes,
    /// returning the message-id the server accepted.
    pub async fn post_raw(&mut self, headers: &Headers, body: &[u8]) -> Result<String, WireError> {
        self.write_raw(b"POST\r\n").await?;
        let (code, message) = self.read_status().await?;
        if code == 440 {
            return Err(WireError::PostingNotPermitted);
        }
        if code != 340 {
            return Err(WireError::Protocol { code, message });
        }

        let date = chrono::DateTime::from_timestamp(headers.date, 0)
            .unwrap_or_else(chrono::Utc::now)
            .format("%a, %d %b %Y %H:%M:%S %z");

        let mut out = format!(
            "Date: {date}\r\nFrom: {}\r\nMessage-ID: {}\r\nNewsgroups: {}\r\nPath: not-for-mail\r\nSubject: {}\r\n\r\n",
            headers.from,
            headers.message_id,
            headers.groups.join(","),
            headers.subject,
        )
        .into_bytes();

        dot_stuff_into(body, &mut out);
        out.extend_from_slice(b".\r\n");
        self.write_raw(&out).await?;

        let (code, message) = self.read_status().await?;
        if code == 441 {
            return Err(WireError::PostingFailed(message));
        }
        if code != 240 {
            return Err(WireError::Protocol { code, message });
        }

        Ok(headers.message_id.clone())
    }

    /// Whether the connection received invalid data or a transport error
    /// and should be evicted from the pool rather than reused.
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Append `body` to `out`, escaping any line that starts with `.` per RFC
/// 3977 section 3.1.1. Operates on raw bytes, not `str`, since yEnc bodies
/// are not valid UTF-8.
fn dot_stuff_into(body: &[u8], out: &mut Vec<u8>) {
    for line in body.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
}

/// bb8 connection manager for [`WireConnection`], mirroring
/// `nntp_rs::pool::NntpConnectionManager`.
pub struct WireConnectionManager {
    config: Arc<ServerConfig>,
}

impl WireConnectionManager {
    /// Build a manager that dials `config` for each new pooled connection.
    pub fn new(config: ServerConfig) -> Self {
        Self { config: Arc::new(config) }
    }
}

#[async_trait::async_trait]
impl bb8::ManageConnection for WireConnectionManager {
    type Connection = WireConnection;
    type Error = WireError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        WireConnection::connect(&self.config).await
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_stuffs_lines_starting_with_dot() {
        let mut out = Vec::new();
        dot_stuff_into(b".hidden\r\nplain\r\n.\r\n", &mut out);
        assert_eq!(out, b"..hidden\r\nplain\r\n..\r\n");
    }

    #[test]
    fn leaves_body_without_leading_dots_untouched() {
        let mut out = Vec::new();
        dot_stuff_into(b"hello\r\nworld\r\n", &mut out);
        assert_eq!(out, b"hello\r\nworld\r\n");
    }

    #[test]
    fn dot_stuffing_is_byte_safe_for_non_utf8_bodies() {
        let body: Vec<u8> = vec![0xD8, 0xD8, b'\n', b'.', 0xFF, b'\n'];
        let mut out = Vec::new();
        dot_stuff_into(&body, &mut out);
        assert_eq!(out, vec![0xD8, 0xD8, b'\n', b'.', b'.', 0xFF, b'\n']);
    }
}
