//! Secure stream client
//!
//! This module provides the byte-stream facade over a TLS engine.
//!
//! # Architecture
//!
//! - `SecureClient` owns one engine (the session handle), one set of
//!   credential slots and the one-byte peek buffer
//! - `Auth` selects exactly one authentication mode per connect attempt:
//!   certificate (CA-validated, optionally mutual) or pre-shared key
//! - Any engine failure on the I/O path tears the session down before the
//!   error is returned, so a half-dead session is never reused
//!
//! # Examples
//!
//! ```no_run
//! use securestream::{OpenSslEngine, SecureClient};
//!
//! let mut client = SecureClient::new(OpenSslEngine::new());
//! client.set_pre_shared_key("id1", "deadbeef");
//! client.connect("10.0.0.5", 443).unwrap();
//!
//! client.write(b"ping").unwrap();
//! let mut buf = [0u8; 16];
//! if client.available().unwrap() > 0 {
//!     let n = client.read(&mut buf).unwrap();
//!     println!("got {:?}", &buf[..n]);
//! }
//! client.stop();
//! ```

pub mod config;
pub mod credentials;
pub mod secure;
pub mod target;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use credentials::{Auth, CertCredentials, CredentialKind, Credentials, PskCredentials};
pub use secure::{LastError, SecureClient};
pub use target::Target;

use std::io;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Handshake failed: engine code {code}")]
    Handshake { code: i32 },

    #[error("Read failed: engine code {code}")]
    Read { code: i32 },

    #[error("Write failed: engine code {code}")]
    Write { code: i32 },

    #[error("Not connected")]
    NotConnected,

    #[error("No data available")]
    NoData,

    #[error("Timeout")]
    Timeout,

    #[error("Failed to load {kind}: expected {expected} bytes, got {read}")]
    CredentialLoad {
        kind: CredentialKind,
        expected: usize,
        read: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Integer sentinel for this error
    ///
    /// Engine failures carry the engine's own negative code; everything
    /// else reports `-1`.
    pub fn code(&self) -> i32 {
        match self {
            Error::Handshake { code } | Error::Read { code } | Error::Write { code } => *code,
            _ => NO_DATA,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            Error::NotConnected => io::Error::new(io::ErrorKind::NotConnected, err),
            Error::NoData => io::Error::new(io::ErrorKind::WouldBlock, err),
            Error::CredentialLoad { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Sentinel reported by reads when nothing can be delivered
pub const NO_DATA: i32 = -1;

/// Default bound on connect plus handshake, in milliseconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 120_000;

/// Default bound on the timed read behind `peek`, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1_000;
