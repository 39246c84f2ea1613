use std::time::Duration;

use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode};
use openssl::x509::X509;

use crate::certificate::DtlsCertificate;
use crate::cookie;
use crate::Error;

// We restrict cipher suites to those that include ephemeral Diffie-Hellman
// or ephemeral Elliptic Curve Diffie-Hellman AND AES-256 or AES-GCM.
const DEFAULT_CIPHERS: &str = "ECDHE+AESGCM:DHE+AESGCM:ECDHE+AES256:DHE+AES256";

/// DTLS configuration.
///
/// Wraps the configured TLS context every session is created from. Shared
/// between sessions via `Arc`.
#[derive(Clone)]
pub struct Config {
    context: SslContext,
    mtu: usize,
    handshake_timeout: Duration,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            cipher_list: DEFAULT_CIPHERS.to_string(),
            certificate: None,
            verify_mode: SslVerifyMode::NONE,
            verify_depth: None,
            mtu: 1150,
            handshake_timeout: Duration::from_secs(40),
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size UDP packets the engine will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Timeout for a full handshake drive, regardless of progress.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// The TLS context sessions are created from.
    #[inline(always)]
    pub(crate) fn context(&self) -> &SslContext {
        &self.context
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

/// Builder for DTLS configuration.
pub struct ConfigBuilder {
    cipher_list: String,
    certificate: Option<DtlsCertificate>,
    verify_mode: SslVerifyMode,
    verify_depth: Option<u32>,
    mtu: usize,
    handshake_timeout: Duration,
}

impl ConfigBuilder {
    /// Set the OpenSSL cipher list string.
    ///
    /// Defaults to ECDHE/DHE suites with AES-GCM or AES-256.
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = ciphers.into();
        self
    }

    /// Set the certificate and private key (DER) for this endpoint.
    ///
    /// Required for servers; clients may omit it unless the peer requests
    /// a certificate.
    pub fn certificate(mut self, certificate: DtlsCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Set the peer-certificate verification mode.
    ///
    /// Defaults to no verification; set `SslVerifyMode::PEER` (and
    /// optionally `FAIL_IF_NO_PEER_CERT`) for authenticated peers.
    pub fn verify_mode(mut self, mode: SslVerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    /// Set the maximum certificate chain verification depth.
    pub fn verify_depth(mut self, depth: u32) -> Self {
        self.verify_depth = Some(depth);
        self
    }

    /// Set the max transmission unit (MTU).
    ///
    /// The engine disables the library's own MTU query and pins this
    /// value. Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the timeout for a full handshake drive.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the configuration.
    ///
    /// This assembles the TLS context: cipher list, certificate/key,
    /// verification settings, pinned MTU and the cookie-callback
    /// trampolines (inert until a session arms the cookie exchange).
    pub fn build(self) -> Result<Config, Error> {
        let mut ctx = SslContextBuilder::new(SslMethod::dtls())?;

        ctx.set_cipher_list(&self.cipher_list)?;

        if let Some(cert) = &self.certificate {
            let x509 = X509::from_der(&cert.certificate)?;
            let pkey = PKey::private_key_from_der(&cert.private_key)?;
            ctx.set_certificate(&x509)?;
            ctx.set_private_key(&pkey)?;
            ctx.check_private_key()?;
        }

        ctx.set_verify(self.verify_mode);
        if let Some(depth) = self.verify_depth {
            ctx.set_verify_depth(depth);
        }

        // The caller asserts a fixed path MTU; never query the transport.
        ctx.set_options(SslOptions::NO_QUERY_MTU);

        ctx.set_cookie_generate_cb(cookie::generate_trampoline);
        ctx.set_cookie_verify_cb(cookie::verify_trampoline);

        Ok(Config {
            context: ctx.build(),
            mtu: self.mtu,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;

    #[test]
    fn builder_defaults() {
        let config = Config::default();
        assert_eq!(config.mtu(), 1150);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(40));
    }

    #[test]
    fn builder_with_certificate() {
        let cert = generate_self_signed_certificate().expect("generate certificate");
        let config = Config::builder()
            .certificate(cert)
            .mtu(1400)
            .handshake_timeout(Duration::from_secs(5))
            .build()
            .expect("build config");
        assert_eq!(config.mtu(), 1400);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }
}
