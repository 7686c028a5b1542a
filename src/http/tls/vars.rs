//! Negotiated TLS parameters
//!
//! Captured once after the handshake and reported in the `tls_ready` event.

use openssl::ssl::{NameType, SslRef};

/// TLS variables available after handshake
#[derive(Debug, Clone)]
pub struct TlsVars {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername
    pub servername: Option<String>,

    /// Negotiated ALPN protocol
    pub alpn: Option<String>,
}

impl TlsVars {
    /// Create TLS variables from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        TlsVars {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        }
    }

    /// ALPN protocol for logging; `<none>` when nothing was selected
    pub fn alpn_or_none(&self) -> &str {
        self.alpn.as_deref().unwrap_or("<none>")
    }
}

impl Default for TlsVars {
    fn default() -> Self {
        TlsVars {
            version: "<undef>".to_string(),
            cipher: "<undef>".to_string(),
            servername: None,
            alpn: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vars() {
        let vars = TlsVars::default();
        assert_eq!(vars.version, "<undef>");
        assert_eq!(vars.cipher, "<undef>");
        assert_eq!(vars.alpn_or_none(), "<none>");
    }

    #[test]
    fn test_alpn_or_none() {
        let vars = TlsVars {
            alpn: Some("h2".to_string()),
            ..TlsVars::default()
        };
        assert_eq!(vars.alpn_or_none(), "h2");
    }
}
