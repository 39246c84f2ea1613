//! Stateless cookie exchange callbacks.
//!
//! The TLS library invokes cookie callbacks through C function pointers
//! with no user-data argument. Context is threaded through a per-session
//! application-data record ([`AppData`]) attached to the session handle
//! via an ex-data slot; the trampolines registered on the context recover
//! the record and dispatch to the installed capability objects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslRef};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound of the DTLS cookie field (RFC 6347).
pub const COOKIE_MAX_LEN: usize = 255;

/// Produces the cookie for a HelloVerifyRequest.
///
/// `peer` is the source endpoint of the ClientHello being answered. The
/// returned octet string should be at least one byte; anything longer than
/// [`COOKIE_MAX_LEN`]` - 1` is truncated before it enters the library's
/// cookie buffer.
pub trait GenerateCookie: Send + Sync {
    /// Produce the cookie octet string for `peer`.
    fn generate(&self, peer: &SocketAddr) -> Vec<u8>;
}

/// Checks a cookie echoed back in a second ClientHello.
pub trait VerifyCookie: Send + Sync {
    /// Return true to accept the echoed `cookie` from `peer`.
    fn verify(&self, peer: &SocketAddr, cookie: &[u8]) -> bool;
}

impl<F> GenerateCookie for F
where
    F: Fn(&SocketAddr) -> Vec<u8> + Send + Sync,
{
    fn generate(&self, peer: &SocketAddr) -> Vec<u8> {
        self(peer)
    }
}

impl<F> VerifyCookie for F
where
    F: Fn(&SocketAddr, &[u8]) -> bool + Send + Sync,
{
    fn verify(&self, peer: &SocketAddr, cookie: &[u8]) -> bool {
        self(peer, cookie)
    }
}

/// Cookie generator/verifier computing HMAC-SHA256 over the peer endpoint
/// with a random per-instance secret.
///
/// Install a single clone of the same factory for both the generate and
/// verify side; two independently created factories have different secrets
/// and will reject each other's cookies.
#[derive(Clone)]
pub struct HmacCookieFactory {
    secret: [u8; 32],
}

impl HmacCookieFactory {
    /// Create a factory with a freshly drawn random secret.
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        HmacCookieFactory { secret }
    }

    fn mac(&self, peer: &SocketAddr) -> HmacSha256 {
        // Unwrap is ok, HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret).unwrap();
        mac.update(peer.to_string().as_bytes());
        mac
    }
}

impl Default for HmacCookieFactory {
    fn default() -> Self {
        HmacCookieFactory::new()
    }
}

impl GenerateCookie for HmacCookieFactory {
    fn generate(&self, peer: &SocketAddr) -> Vec<u8> {
        self.mac(peer).finalize().into_bytes().to_vec()
    }
}

impl VerifyCookie for HmacCookieFactory {
    fn verify(&self, peer: &SocketAddr, cookie: &[u8]) -> bool {
        self.mac(peer).verify_slice(cookie).is_ok()
    }
}

/// Per-session record reachable from the C callback trampolines.
///
/// Owned by the engine (one per session) and attached to the session
/// handle at construction. The transient peer endpoint is set by the
/// acceptor immediately before a listen step and cleared after it.
#[derive(Default)]
pub(crate) struct AppData {
    generate: Mutex<Option<Arc<dyn GenerateCookie>>>,
    verify: Mutex<Option<Arc<dyn VerifyCookie>>>,
    peer: Mutex<Option<SocketAddr>>,
    cookie_verified: AtomicBool,
}

impl AppData {
    pub fn set_generate(&self, cb: Option<Arc<dyn GenerateCookie>>) {
        if let Ok(mut slot) = self.generate.lock() {
            *slot = cb;
        }
    }

    pub fn set_verify(&self, cb: Option<Arc<dyn VerifyCookie>>) {
        if let Ok(mut slot) = self.verify.lock() {
            *slot = cb;
        }
    }

    pub fn set_peer(&self, peer: Option<SocketAddr>) {
        if let Ok(mut slot) = self.peer.lock() {
            *slot = peer;
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|slot| *slot)
    }

    pub fn is_cookie_verified(&self) -> bool {
        self.cookie_verified.load(Ordering::Relaxed)
    }

    pub fn reset_cookie_verified(&self) {
        self.cookie_verified.store(false, Ordering::Relaxed);
    }
}

lazy_static! {
    /// Ex-data slot carrying the [`AppData`] record on each session.
    pub(crate) static ref APP_DATA_INDEX: Index<Ssl, Arc<AppData>> =
        Ssl::new_ex_index().expect("ssl ex data index");
}

/// Copy `cookie` into the library's cookie buffer, clamped to the field
/// bound. Returns the stored length.
fn fill_cookie(cookie: &[u8], out: &mut [u8]) -> usize {
    let n = cookie.len().min(COOKIE_MAX_LEN - 1).min(out.len());
    out[..n].copy_from_slice(&cookie[..n]);
    n
}

/// Context-level generate trampoline. Registered once per context; the
/// session it fires for is identified through the ex-data record.
pub(crate) fn generate_trampoline(ssl: &mut SslRef, out: &mut [u8]) -> Result<usize, ErrorStack> {
    let Some(data) = ssl.ex_data(*APP_DATA_INDEX) else {
        return Err(ErrorStack::get());
    };
    let Some(peer) = data.peer() else {
        debug!("cookie generate without a transient peer endpoint");
        return Err(ErrorStack::get());
    };
    let Ok(slot) = data.generate.lock() else {
        return Err(ErrorStack::get());
    };
    let Some(generate) = slot.as_ref() else {
        return Err(ErrorStack::get());
    };

    let cookie = generate.generate(&peer);
    trace!("generated {} byte cookie for {}", cookie.len(), peer);
    Ok(fill_cookie(&cookie, out))
}

/// Context-level verify trampoline. Latches the verified flag on accept;
/// the listen step reads the latch to decide readiness for promotion.
pub(crate) fn verify_trampoline(ssl: &mut SslRef, cookie: &[u8]) -> bool {
    let Some(data) = ssl.ex_data(*APP_DATA_INDEX) else {
        return false;
    };
    let Some(peer) = data.peer() else {
        debug!("cookie verify without a transient peer endpoint");
        return false;
    };
    let Ok(slot) = data.verify.lock() else {
        return false;
    };
    let Some(verify) = slot.as_ref() else {
        return false;
    };

    let accepted = verify.verify(&peer, cookie);
    debug!(
        "cookie from {} {}",
        peer,
        if accepted { "accepted" } else { "rejected" }
    );
    if accepted {
        data.cookie_verified.store(true, Ordering::Relaxed);
    }
    accepted
}
