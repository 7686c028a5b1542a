//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.
//! Builders only collect options; the OpenSSL context is created in `build()`
//! so every OpenSSL failure surfaces as a [`TlsError`].

use openssl::pkey::PKey;
use openssl::ssl::{AlpnError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The socket read timeout elapsed before the handshake finished
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Whether the peer certificate chain is verified
    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect(&self, stream: std::net::TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        super::session::TlsSessionOps::connect(stream, self)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: std::net::TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        super::session::TlsSessionOps::accept(stream, self)
    }
}

/// Encode protocol names in ALPN wire format (length-prefixed)
fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut alpn_bytes = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| TlsError::InvalidConfig(format!("Invalid ALPN protocol {:?}", proto)))?;
        alpn_bytes.push(len);
        alpn_bytes.extend_from_slice(proto.as_bytes());
    }
    Ok(alpn_bytes)
}

fn set_version_range(
    builder: &mut SslContextBuilder,
    range: Option<(TlsVersion, TlsVersion)>,
) -> Result<(), TlsError> {
    if let Some((min, max)) = range {
        if min > max {
            return Err(TlsError::InvalidConfig(format!(
                "Minimum version {} above maximum {}",
                min.as_str(),
                max.as_str()
            )));
        }
        builder.set_min_proto_version(Some(min.to_openssl_version()))?;
        builder.set_max_proto_version(Some(max.to_openssl_version()))?;
    }
    Ok(())
}

/// Client configuration builder
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    servername: Option<String>,
    alpn: Vec<String>,
    verify_peer: bool,
    versions: Option<(TlsVersion, TlsVersion)>,
}

impl ClientConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.versions = Some((min, max));
        self
    }

    /// Set ALPN protocols, in order of preference
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification (default: disabled)
    ///
    /// When enabled, the system trust store is used and the servername is
    /// checked against the certificate.
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;

        if self.verify_peer {
            ctx_builder.set_default_verify_paths()?;
            ctx_builder.set_verify(SslVerifyMode::PEER);
        } else {
            ctx_builder.set_verify(SslVerifyMode::NONE);
        }

        set_version_range(&mut ctx_builder, self.versions)?;

        if !self.alpn.is_empty() {
            ctx_builder.set_alpn_protos(&encode_alpn(&self.alpn)?)?;
        }

        Ok(TlsConfig {
            ctx: ctx_builder.build(),
            is_server: false,
            servername: self.servername,
            verify_peer: self.verify_peer,
        })
    }
}

/// Server configuration builder
///
/// Without an explicit certificate the built-in self-signed one is used.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    alpn: Vec<String>,
    versions: Option<(TlsVersion, TlsVersion)>,
    cert_pem: Option<Vec<u8>>,
}

impl ServerConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.versions = Some((min, max));
        self
    }

    /// Set the protocols the server is willing to select, in order of preference
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Use a PEM bundle holding both certificate and private key
    pub fn cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.cert_pem = Some(pem.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_server())?;

        set_version_range(&mut ctx_builder, self.versions)?;

        let pem = self
            .cert_pem
            .unwrap_or_else(|| super::builtin_cert::BUILTIN_CERT.as_bytes().to_vec());
        let cert = X509::from_pem(&pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
        ctx_builder.set_certificate(&cert)?;
        let key = PKey::private_key_from_pem(&pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
        ctx_builder.set_private_key(&key)?;

        if !self.alpn.is_empty() {
            let protocols: Vec<Vec<u8>> = self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

            // Server preference order wins
            ctx_builder.set_alpn_select_callback(move |_ssl, client_protos| {
                for proto in &protocols {
                    let mut pos = 0;
                    while pos < client_protos.len() {
                        let len = client_protos[pos] as usize;
                        pos += 1;
                        if pos + len > client_protos.len() {
                            break;
                        }
                        let client_proto = &client_protos[pos..pos + len];
                        if client_proto == proto.as_slice() {
                            return Ok(client_proto);
                        }
                        pos += len;
                    }
                }
                Err(AlpnError::NOACK)
            });
        }

        Ok(TlsConfig {
            ctx: ctx_builder.build(),
            is_server: true,
            servername: None,
            verify_peer: false,
        })
    }
}
