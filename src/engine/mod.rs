//! Engine boundary
//!
//! The engine owns everything that makes up a TLS session: the transport
//! descriptor, the negotiated keys and the handshake timers. A
//! [`SecureClient`](crate::client::SecureClient) owns exactly one engine value
//! and drives it through the [`Engine`] trait, never looking inside.
//!
//! # Architecture
//!
//! - `Engine` is the seam between the stream semantics and the TLS work
//! - `OpenSslEngine` is the production engine (OpenSSL over TCP)
//! - Every fallible engine call reports a negative integer code inside an
//!   [`EngineError`]; the client records that code for `last_error`
//!
//! Constructing an engine value is the session initialisation step. Dropping
//! it releases whatever is left.

pub mod cert;
pub mod ossl;

pub use cert::PeerCertificate;
pub use ossl::{OpenSslEngine, OpenSslEngineBuilder, TlsVersion};

use crate::client::credentials::{Auth, CertCredentials};
use std::time::Duration;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by an engine
///
/// `code` is always negative. Its meaning is engine-defined; use
/// [`Engine::error_text`] to translate it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    code: i32,
    message: String,
}

impl EngineError {
    /// Create an engine error. Non-negative codes are clamped to -1.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        EngineError {
            code: if code < 0 { code } else { -1 },
            message: message.into(),
        }
    }

    /// The negative engine code
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Engine-provided detail for this particular failure
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Everything the engine needs to start a handshake
#[derive(Debug, Clone, Copy)]
pub struct HandshakeParams<'a> {
    /// Host text: a hostname or a formatted numeric address
    pub host: &'a str,
    pub port: u16,
    /// The selected authentication mode. Only one mode is ever passed.
    pub auth: &'a Auth,
    /// Bound on connect plus handshake
    pub timeout: Duration,
}

/// TLS engine capability
///
/// An engine value is an exclusively owned session handle. All calls are
/// blocking and bounded by engine-enforced timeouts.
pub trait Engine {
    /// An already established session that can be adopted by a client
    type Transport;

    /// Adopt an established transport. Returns true if it is usable.
    fn attach(&mut self, transport: Self::Transport) -> bool;

    /// Give up the current transport, if any, without closing it.
    fn detach(&mut self) -> Option<Self::Transport>;

    /// Whether the session's descriptor is still open
    fn is_open(&self) -> bool;

    /// Open the transport and negotiate a TLS session.
    fn handshake(&mut self, params: &HandshakeParams<'_>) -> EngineResult<()>;

    /// Encrypt and send application data. Returns bytes accepted.
    fn send(&mut self, buf: &[u8]) -> EngineResult<usize>;

    /// Receive and decrypt application data into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> EngineResult<usize>;

    /// Number of decrypted bytes ready to be read without blocking.
    fn readable(&mut self) -> EngineResult<usize>;

    /// Block until the session has inbound data or `timeout` elapses.
    ///
    /// Returns true when ready. Readiness may come from a protocol record
    /// that carries no application data, so a following `readable` can
    /// still report 0.
    fn wait_readable(&mut self, timeout: Duration) -> EngineResult<bool>;

    /// Close the descriptor at the transport level.
    fn close_transport(&mut self);

    /// Release handshake-scoped resources.
    ///
    /// Must be safe to call on a session that is already torn down.
    fn teardown(&mut self, credentials: &CertCredentials);

    /// Compare the peer certificate against a SHA-256 fingerprint and,
    /// optionally, a domain name. False when there is no session.
    fn verify_fingerprint(&self, fingerprint: &str, domain: Option<&str>) -> bool;

    /// Human-readable text for an engine code
    fn error_text(&self, code: i32) -> String;
}
