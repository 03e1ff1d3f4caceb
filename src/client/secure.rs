//! Secure client
//!
//! The client layers stream semantics over an engine session:
//!
//! - `connected` is true only between a successful handshake and the first
//!   fatal I/O error or `stop()`
//! - at most one byte of lookahead is kept for `peek()`; it survives a
//!   forced teardown so it can still be drained, but `stop()` discards it
//! - reads never call the engine once the client is disconnected

use super::config::ClientConfig;
use super::credentials::{Auth, CertCredentials, CredentialKind, Credentials, PskCredentials};
use super::target::Target;
use super::{Error, Result};
use crate::engine::{Engine, EngineError, HandshakeParams};
use bytes::Bytes;
use log::{debug, error, trace};
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Last recorded engine failure, translated by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub message: String,
}

/// Byte-stream client over a TLS engine session
pub struct SecureClient<E: Engine> {
    engine: E,
    config: ClientConfig,
    credentials: Credentials,
    connected: bool,
    peeked: Option<u8>,
    last_error: i32,
}

impl<E: Engine> SecureClient<E> {
    /// Create a disconnected client around a fresh engine session
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, ClientConfig::default())
    }

    /// Create a disconnected client with explicit configuration
    pub fn with_config(engine: E, config: ClientConfig) -> Self {
        SecureClient {
            engine,
            config,
            credentials: Credentials::new(),
            connected: false,
            peeked: None,
            last_error: 0,
        }
    }

    /// Wrap an already established session
    ///
    /// The client starts connected if the engine accepts the transport.
    pub fn with_transport(engine: E, transport: E::Transport) -> Self {
        let mut client = Self::new(engine);
        client.connected = client.engine.attach(transport);
        client
    }

    /// Connect using the configured credentials
    ///
    /// PSK is used when both identity and key are set, certificate mode
    /// otherwise.
    pub fn connect(&mut self, target: impl Into<Target>, port: u16) -> Result<()> {
        let auth = self.credentials.select();
        self.connect_with(target, port, auth)
    }

    /// Connect in certificate mode with explicit material
    pub fn connect_with_certs(
        &mut self,
        target: impl Into<Target>,
        port: u16,
        certs: CertCredentials,
    ) -> Result<()> {
        self.connect_with(target, port, Auth::Certificate(certs))
    }

    /// Connect in PSK mode with explicit identity and hex key
    pub fn connect_with_psk(
        &mut self,
        target: impl Into<Target>,
        port: u16,
        identity: impl Into<Bytes>,
        key: impl Into<Bytes>,
    ) -> Result<()> {
        let psk = PskCredentials {
            identity: identity.into(),
            key: key.into(),
        };
        self.connect_with(target, port, Auth::Psk(psk))
    }

    /// Connect with an explicit authentication mode
    ///
    /// An existing session is closed first. There is no retry: a failed
    /// handshake tears the session down and returns `Error::Handshake`.
    pub fn connect_with(&mut self, target: impl Into<Target>, port: u16, auth: Auth) -> Result<()> {
        if self.connected {
            debug!("connect while connected, closing previous session");
            self.stop();
        }

        let target = target.into();
        let host = target.host();
        debug!(
            "connecting to {}:{} ({})",
            host,
            port,
            if auth.is_psk() { "psk" } else { "certificate" }
        );

        let params = HandshakeParams {
            host: &host,
            port,
            auth: &auth,
            timeout: self.config.handshake_timeout,
        };

        match self.engine.handshake(&params) {
            Ok(()) => {
                self.last_error = 0;
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                error!("handshake with {}:{} failed: {}", host, port, e);
                self.last_error = e.code();
                self.stop();
                Err(Error::Handshake { code: e.code() })
            }
        }
    }

    /// Close the session
    ///
    /// Idempotent. The engine teardown runs on every call.
    pub fn stop(&mut self) {
        if self.engine.is_open() {
            debug!("closing session");
            self.engine.close_transport();
        }
        self.connected = false;
        self.peeked = None;

        let certs = self.credentials.cert();
        self.engine.teardown(&certs);
    }

    /// Alias for [`stop`](Self::stop)
    pub fn close(&mut self) {
        self.stop();
    }

    /// Replace this client's session with `other`'s
    ///
    /// This client is stopped first. The transport and the connected flag
    /// move over; `other` is left disconnected.
    pub fn take_over(&mut self, other: &mut SecureClient<E>) {
        self.stop();

        let was_connected = other.connected;
        other.connected = false;
        other.peeked = None;

        if let Some(transport) = other.engine.detach() {
            let usable = self.engine.attach(transport);
            self.connected = was_connected && usable;
        }
    }

    /// Send bytes
    ///
    /// Returns `Ok(0)` without touching the engine when disconnected.
    /// Partial writes are possible; retrying is up to the caller.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.connected {
            return Ok(0);
        }

        match self.engine.send(buf) {
            Ok(n) => {
                trace!("sent {} of {} bytes", n, buf.len());
                Ok(n)
            }
            Err(e) => {
                let code = e.code();
                self.abort(&e);
                Err(Error::Write { code })
            }
        }
    }

    /// Send a single byte
    pub fn write_byte(&mut self, byte: u8) -> Result<usize> {
        self.write(&[byte])
    }

    /// Bytes that can be read without blocking, including a peeked byte
    ///
    /// Never asks the engine once disconnected.
    pub fn available(&mut self) -> Result<usize> {
        let peeked = usize::from(self.peeked.is_some());
        if !self.connected {
            return Ok(peeked);
        }

        match self.engine.readable() {
            Ok(n) => Ok(n + peeked),
            Err(e) => {
                let code = e.code();
                self.abort(&e);
                if peeked > 0 {
                    Ok(peeked)
                } else {
                    Err(Error::Read { code })
                }
            }
        }
    }

    /// Read up to `buf.len()` bytes
    ///
    /// A peeked byte is delivered first. If that satisfies the request, or
    /// nothing else is ready, the engine is not called. An empty `buf`
    /// still runs the availability check and then returns `Ok(0)`.
    ///
    /// A failed availability check reports `NoData`; the engine code is
    /// kept in [`last_error`](Self::last_error).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut avail = match self.available() {
            Ok(n) => n,
            Err(_) => return Err(Error::NoData),
        };
        if buf.is_empty() {
            return Ok(0);
        }
        if avail == 0 {
            return Err(Error::NoData);
        }

        let mut delivered = 0;
        if let Some(byte) = self.peeked.take() {
            buf[0] = byte;
            delivered = 1;
            avail -= 1;
            if buf.len() == 1 || avail == 0 {
                return Ok(1);
            }
        }

        match self.engine.recv(&mut buf[delivered..]) {
            Ok(n) => {
                trace!("received {} bytes", n + delivered);
                Ok(n + delivered)
            }
            Err(e) => {
                let code = e.code();
                self.abort(&e);
                if delivered > 0 {
                    Ok(delivered)
                } else {
                    Err(Error::Read { code })
                }
            }
        }
    }

    /// Read a single byte
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Err(Error::NoData),
            _ => Ok(byte[0]),
        }
    }

    /// Look at the next byte without consuming it
    ///
    /// Blocks up to the configured read timeout when no byte is buffered.
    pub fn peek(&mut self) -> Result<u8> {
        if let Some(byte) = self.peeked {
            return Ok(byte);
        }

        let byte = self.timed_read()?;
        self.peeked = Some(byte);
        Ok(byte)
    }

    /// Whether the session is still up
    ///
    /// Runs a health check first, so a peer close or engine failure is
    /// noticed without a real read.
    pub fn connected(&mut self) -> bool {
        self.check_health();
        self.connected
    }

    /// Compare the peer certificate against a SHA-256 fingerprint
    pub fn verify(&self, fingerprint: &str, domain: Option<&str>) -> bool {
        self.engine.verify_fingerprint(fingerprint, domain)
    }

    /// The last engine failure, if any
    pub fn last_error(&self) -> Option<LastError> {
        if self.last_error == 0 {
            return None;
        }
        Some(LastError {
            code: self.last_error,
            message: self.engine.error_text(self.last_error),
        })
    }

    /// Copy the last error's text into `buf`, NUL-terminated and truncated
    /// to fit. Returns the raw code, or 0 (leaving `buf` alone) if none.
    pub fn last_error_into(&self, buf: &mut [u8]) -> i32 {
        let Some(last) = self.last_error() else {
            return 0;
        };

        if let Some(room) = buf.len().checked_sub(1) {
            let text = last.message.as_bytes();
            let n = text.len().min(room);
            buf[..n].copy_from_slice(&text[..n]);
            buf[n] = 0;
        }
        last.code
    }

    pub fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.config.handshake_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_ca_cert(&mut self, pem: impl Into<Bytes>) {
        self.credentials.set_ca_cert(pem);
    }

    pub fn set_certificate(&mut self, pem: impl Into<Bytes>) {
        self.credentials.set_certificate(pem);
    }

    pub fn set_private_key(&mut self, pem: impl Into<Bytes>) {
        self.credentials.set_private_key(pem);
    }

    pub fn set_pre_shared_key(&mut self, identity: impl Into<Bytes>, key: impl Into<Bytes>) {
        self.credentials.set_pre_shared_key(identity, key);
    }

    /// Load a CA certificate of exactly `len` bytes from `source`
    pub fn load_ca_cert<R: Read>(&mut self, source: R, len: usize) -> Result<()> {
        self.credentials.load(CredentialKind::CaCert, source, len)
    }

    /// Load a client certificate of exactly `len` bytes from `source`
    pub fn load_certificate<R: Read>(&mut self, source: R, len: usize) -> Result<()> {
        self.credentials.load(CredentialKind::Certificate, source, len)
    }

    /// Load a private key of exactly `len` bytes from `source`
    pub fn load_private_key<R: Read>(&mut self, source: R, len: usize) -> Result<()> {
        self.credentials.load(CredentialKind::PrivateKey, source, len)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Get a reference to the engine
    pub fn get_ref(&self) -> &E {
        &self.engine
    }

    /// Get a mutable reference to the engine
    pub fn get_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn check_health(&mut self) {
        if self.connected {
            let _ = self.available();
        }
    }

    /// Tear the session down after an engine I/O failure, keeping any
    /// peeked byte so it can still be drained.
    fn abort(&mut self, err: &EngineError) {
        debug!("engine failure, dropping session: {}", err);
        self.last_error = err.code();
        let pending = self.peeked.take();
        self.stop();
        self.peeked = pending;
    }

    /// Wait for the next byte, bounded by the read timeout
    fn timed_read(&mut self) -> Result<u8> {
        let deadline = Instant::now() + self.config.read_timeout;
        loop {
            if !self.connected {
                return Err(Error::NotConnected);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.engine.wait_readable(remaining) {
                Ok(true) => {}
                Ok(false) => return Err(Error::Timeout),
                Err(e) => {
                    let code = e.code();
                    self.abort(&e);
                    return Err(Error::Read { code });
                }
            }

            // a wakeup can be a record with no application data
            match self.read_byte() {
                Err(Error::NoData) if !self.connected => return Err(Error::NotConnected),
                Err(Error::NoData) if Instant::now() >= deadline => return Err(Error::Timeout),
                Err(Error::NoData) => continue,
                other => return other,
            }
        }
    }
}

impl<E: Engine> Drop for SecureClient<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: Engine> io::Read for SecureClient<E> {
    /// Blocking read. Waits up to the read timeout for the first byte and
    /// reports end of stream once the session is gone.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.peek() {
            Ok(_) => {}
            Err(Error::NotConnected) => return Ok(0),
            Err(e) => return Err(e.into()),
        }
        SecureClient::read(self, buf).map_err(io::Error::from)
    }
}

impl<E: Engine> io::Write for SecureClient<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected.into());
        }
        SecureClient::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
