//! OpenSSL engine
//!
//! Production [`Engine`] over a TCP socket. Connect and handshake are both
//! bounded by the handshake timeout; afterwards socket reads and writes use
//! the engine's I/O timeout.
//!
//! Trust follows the selected mode:
//!
//! - certificate mode with a CA: peer chain and hostname are verified
//! - certificate mode without a CA: no verification (a warning is logged)
//! - PSK mode: TLS 1.2 PSK cipher suites, key given as hex text

use super::cert::PeerCertificate;
use super::{Engine, EngineError, EngineResult, HandshakeParams};
use crate::client::credentials::{Auth, CertCredentials, PskCredentials};
use log::{debug, trace, warn};
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{
    ErrorCode, HandshakeError, Ssl, SslContext, SslContextBuilder, SslMethod, SslStream,
    SslVerifyMode, SslVersion,
};
use openssl::x509::{X509, X509VerifyResult};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::str::FromStr;
use std::time::Duration;

pub const ERR_SOCKET: i32 = -0x0042;
pub const ERR_CONNECT: i32 = -0x0044;
pub const ERR_RECV: i32 = -0x004C;
pub const ERR_SEND: i32 = -0x004E;
pub const ERR_CONN_RESET: i32 = -0x0050;
pub const ERR_UNKNOWN_HOST: i32 = -0x0052;
pub const ERR_CA_CERT: i32 = -0x2180;
pub const ERR_CLIENT_CERT: i32 = -0x2200;
pub const ERR_PRIVATE_KEY: i32 = -0x3D00;
pub const ERR_CERT_VERIFY: i32 = -0x2700;
pub const ERR_TIMEOUT: i32 = -0x6800;
pub const ERR_NO_SESSION: i32 = -0x7100;
pub const ERR_HANDSHAKE: i32 = -0x7180;
pub const ERR_PEER_CLOSED: i32 = -0x7880;
pub const ERR_SETUP: i32 = -0x7F00;
pub const ERR_PSK_KEY: i32 = -0x7F80;

/// Cipher list used in PSK mode
pub const PSK_CIPHERS: &str = "PSK";

/// Longest accepted PSK, in bytes
pub const MAX_PSK_LEN: usize = 64;

/// Default socket timeout for application data
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = String;

    /// Case-insensitive, with or without the `v`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(format!("invalid TLS version: {}", s)),
        }
    }
}

/// OpenSSL-backed engine session
pub struct OpenSslEngine {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    sni: bool,
    io_timeout: Option<Duration>,
    stream: Option<SslStream<TcpStream>>,
    open: bool,
    failed: bool,
}

impl OpenSslEngine {
    /// Engine with default settings
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create an engine builder
    pub fn builder() -> OpenSslEngineBuilder {
        OpenSslEngineBuilder::new()
    }

    /// Peer certificate of the current session
    pub fn peer_certificate(&self) -> Option<PeerCertificate> {
        let cert = self.stream.as_ref()?.ssl().peer_certificate()?;
        PeerCertificate::from_x509(&cert)
    }

    /// Negotiated protocol version, e.g. "TLSv1.3"
    pub fn version(&self) -> Option<&'static str> {
        self.stream.as_ref().map(|s| s.ssl().version_str())
    }

    /// Negotiated cipher suite
    pub fn cipher(&self) -> Option<&'static str> {
        self.stream
            .as_ref()
            .and_then(|s| s.ssl().current_cipher())
            .map(|c| c.name())
    }

    fn context(&self, auth: &Auth) -> EngineResult<SslContext> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client()).map_err(setup_error)?;
        trace!(
            "protocol range {} to {}",
            self.min_version.map_or("any", |v| v.as_str()),
            self.max_version.map_or("any", |v| v.as_str())
        );
        builder
            .set_min_proto_version(self.min_version.map(|v| v.to_openssl_version()))
            .map_err(setup_error)?;
        builder
            .set_max_proto_version(self.max_version.map(|v| v.to_openssl_version()))
            .map_err(setup_error)?;

        match auth {
            Auth::Certificate(certs) => self.configure_certificates(&mut builder, certs)?,
            Auth::Psk(psk) => configure_psk(&mut builder, psk)?,
        }

        Ok(builder.build())
    }

    fn configure_certificates(
        &self,
        builder: &mut SslContextBuilder,
        certs: &CertCredentials,
    ) -> EngineResult<()> {
        if let Some(ref ciphers) = self.cipher_list {
            builder.set_cipher_list(ciphers).map_err(setup_error)?;
        }

        match certs.ca_cert {
            Some(ref pem) => {
                let chain = X509::stack_from_pem(strip_nul(pem))
                    .map_err(|e| EngineError::new(ERR_CA_CERT, format!("bad CA certificate: {}", e)))?;
                if chain.is_empty() {
                    return Err(EngineError::new(ERR_CA_CERT, "no certificate in CA data"));
                }
                for cert in chain {
                    builder
                        .cert_store_mut()
                        .add_cert(cert)
                        .map_err(|e| EngineError::new(ERR_CA_CERT, e.to_string()))?;
                }
                builder.set_verify(SslVerifyMode::PEER);
            }
            None => {
                warn!("no CA certificate configured, server identity will not be verified");
                builder.set_verify(SslVerifyMode::NONE);
            }
        }

        if let Some((cert, key)) = certs.client_identity() {
            let cert = X509::from_pem(strip_nul(cert)).map_err(|e| {
                EngineError::new(ERR_CLIENT_CERT, format!("bad client certificate: {}", e))
            })?;
            let key = PKey::private_key_from_pem(strip_nul(key)).map_err(|e| {
                EngineError::new(ERR_PRIVATE_KEY, format!("bad private key: {}", e))
            })?;

            builder
                .set_certificate(&cert)
                .map_err(|e| EngineError::new(ERR_CLIENT_CERT, e.to_string()))?;
            builder
                .set_private_key(&key)
                .map_err(|e| EngineError::new(ERR_PRIVATE_KEY, e.to_string()))?;
            builder.check_private_key().map_err(|e| {
                EngineError::new(ERR_PRIVATE_KEY, format!("key does not match certificate: {}", e))
            })?;
        }

        Ok(())
    }

    fn apply_io_timeout(&self, stream: &TcpStream) -> EngineResult<()> {
        let timeout = self.io_timeout.and_then(nonzero);
        stream.set_read_timeout(timeout).map_err(socket_error)?;
        stream.set_write_timeout(timeout).map_err(socket_error)
    }
}

impl Default for OpenSslEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for OpenSslEngine {
    type Transport = SslStream<TcpStream>;

    fn attach(&mut self, transport: Self::Transport) -> bool {
        if transport.get_ref().peer_addr().is_err() {
            debug!("refusing to adopt a transport with no peer");
            return false;
        }
        self.stream = Some(transport);
        self.open = true;
        self.failed = false;
        true
    }

    fn detach(&mut self) -> Option<Self::Transport> {
        if !self.open {
            return None;
        }
        self.open = false;
        self.stream.take()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn handshake(&mut self, params: &HandshakeParams<'_>) -> EngineResult<()> {
        if self.stream.is_some() {
            self.close_transport();
            self.stream = None;
        }
        self.failed = false;

        let ctx = self.context(params.auth)?;
        let mut ssl = Ssl::new(&ctx).map_err(setup_error)?;

        let addr = params.host.parse::<IpAddr>().ok();
        if self.sni && addr.is_none() {
            ssl.set_hostname(params.host).map_err(setup_error)?;
        }

        let verifying = matches!(params.auth, Auth::Certificate(c) if c.ca_cert.is_some());
        if verifying {
            let param = ssl.param_mut();
            match addr {
                Some(ip) => param.set_ip(ip),
                None => param.set_host(params.host),
            }
            .map_err(setup_error)?;
        }

        let tcp = open_socket(params.host, params.port, params.timeout)?;
        let stream = ssl
            .connect(tcp)
            .map_err(|e| handshake_error(e, verifying))?;
        self.apply_io_timeout(stream.get_ref())?;

        debug!(
            "negotiated {} ({}) with {}:{}",
            stream.ssl().version_str(),
            stream.ssl().current_cipher().map(|c| c.name()).unwrap_or("<undef>"),
            params.host,
            params.port
        );

        self.stream = Some(stream);
        self.open = true;
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> EngineResult<usize> {
        let stream = self.stream.as_mut().filter(|_| self.open).ok_or_else(no_session)?;
        match stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(ssl_failure(&e, ERR_SEND))
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let stream = self.stream.as_mut().filter(|_| self.open).ok_or_else(no_session)?;
        match stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(ssl_failure(&e, ERR_RECV))
            }
        }
    }

    fn readable(&mut self) -> EngineResult<usize> {
        let stream = self.stream.as_mut().filter(|_| self.open).ok_or_else(no_session)?;

        let pending = stream.ssl().pending();
        if pending > 0 {
            return Ok(pending);
        }

        // Drive the record layer without blocking so freshly arrived
        // records are decrypted before counting.
        stream.get_ref().set_nonblocking(true).map_err(socket_error)?;
        let mut probe = [0u8; 1];
        let peeked = stream.ssl_peek(&mut probe);
        let restored = stream.get_ref().set_nonblocking(false);

        let result = match peeked {
            Ok(_) => Ok(stream.ssl().pending().max(1)),
            Err(e) if matches!(e.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE) => Ok(0),
            Err(e) => Err(ssl_failure(&e, ERR_RECV)),
        };
        restored.map_err(socket_error)?;

        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn wait_readable(&mut self, timeout: Duration) -> EngineResult<bool> {
        use libc::{poll, pollfd, POLLIN};

        let stream = self.stream.as_ref().filter(|_| self.open).ok_or_else(no_session)?;
        if stream.ssl().pending() > 0 {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: stream.get_ref().as_raw_fd(),
            events: POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result < 0 {
            return Err(socket_error(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    fn close_transport(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if let Some(ref mut stream) = self.stream {
            if !self.failed {
                let _ = stream.shutdown();
            }
            let _ = stream.get_ref().shutdown(Shutdown::Both);
        }
    }

    fn teardown(&mut self, _credentials: &CertCredentials) {
        if self.open {
            self.close_transport();
        }
        if self.stream.take().is_some() {
            trace!("released TLS session");
        }
        self.failed = false;
    }

    fn verify_fingerprint(&self, fingerprint: &str, domain: Option<&str>) -> bool {
        self.peer_certificate()
            .map(|peer| peer.verify(fingerprint, domain))
            .unwrap_or(false)
    }

    fn error_text(&self, code: i32) -> String {
        let text = match code {
            ERR_SOCKET => "socket operation failed",
            ERR_CONNECT => "connection to server failed",
            ERR_RECV => "reading from the session failed",
            ERR_SEND => "writing to the session failed",
            ERR_CONN_RESET => "connection reset by peer",
            ERR_UNKNOWN_HOST => "server hostname could not be resolved",
            ERR_CA_CERT => "CA certificate could not be parsed",
            ERR_CLIENT_CERT => "client certificate could not be parsed",
            ERR_PRIVATE_KEY => "private key could not be parsed or does not match",
            ERR_CERT_VERIFY => "server certificate verification failed",
            ERR_TIMEOUT => "operation timed out",
            ERR_NO_SESSION => "no active session",
            ERR_HANDSHAKE => "TLS handshake failed",
            ERR_PEER_CLOSED => "peer closed the session",
            ERR_SETUP => "TLS session setup failed",
            ERR_PSK_KEY => "pre-shared key is invalid",
            _ => return format!("unknown engine error -0x{:04X}", code.unsigned_abs()),
        };
        text.to_string()
    }
}

/// OpenSSL engine builder
pub struct OpenSslEngineBuilder {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    sni: bool,
    io_timeout: Option<Duration>,
}

impl OpenSslEngineBuilder {
    fn new() -> Self {
        OpenSslEngineBuilder {
            min_version: Some(TlsVersion::Tls12),
            max_version: None,
            cipher_list: None,
            sni: true,
            io_timeout: Some(Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS)),
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = Some(version);
        self.max_version = Some(version);
        self
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list for certificate mode (TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Send SNI for hostname targets (default on)
    pub fn sni(mut self, enabled: bool) -> Self {
        self.sni = enabled;
        self
    }

    /// Socket timeout for application data; `None` blocks indefinitely
    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Build the engine
    pub fn build(self) -> OpenSslEngine {
        OpenSslEngine {
            min_version: self.min_version,
            max_version: self.max_version,
            cipher_list: self.cipher_list,
            sni: self.sni,
            io_timeout: self.io_timeout,
            stream: None,
            open: false,
            failed: false,
        }
    }
}

fn configure_psk(builder: &mut SslContextBuilder, psk: &PskCredentials) -> EngineResult<()> {
    let identity = strip_nul(&psk.identity).to_vec();
    let key = hex::decode(strip_nul(&psk.key))
        .map_err(|e| EngineError::new(ERR_PSK_KEY, format!("PSK key is not hex: {}", e)))?;
    if key.is_empty() || key.len() > MAX_PSK_LEN {
        return Err(EngineError::new(
            ERR_PSK_KEY,
            format!("PSK key must be 1 to {} bytes, got {}", MAX_PSK_LEN, key.len()),
        ));
    }

    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .map_err(setup_error)?;
    builder.set_cipher_list(PSK_CIPHERS).map_err(setup_error)?;
    builder.set_verify(SslVerifyMode::NONE);

    builder.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
        // identity is written NUL-terminated
        if identity.len() >= identity_out.len() || key.len() > psk_out.len() {
            return Err(ErrorStack::get());
        }
        identity_out[..identity.len()].copy_from_slice(&identity);
        identity_out[identity.len()] = 0;
        psk_out[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });

    Ok(())
}

fn open_socket(host: &str, port: u16, timeout: Duration) -> EngineResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| EngineError::new(ERR_UNKNOWN_HOST, format!("{}: {}", host, e)))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => {
            EngineError::new(ERR_TIMEOUT, format!("connect to {}:{} timed out", host, port))
        }
        Some(e) => EngineError::new(ERR_CONNECT, format!("{}:{}: {}", host, port, e)),
        None => EngineError::new(ERR_UNKNOWN_HOST, format!("{}: no addresses", host)),
    })
}

fn connect_addr(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    let sockaddr = SockAddr::from(*addr);
    match nonzero(timeout) {
        Some(t) => socket.connect_timeout(&sockaddr, t)?,
        None => socket.connect(&sockaddr)?,
    }
    socket.set_nodelay(true)?;

    let stream: TcpStream = socket.into();
    stream.set_read_timeout(nonzero(timeout))?;
    stream.set_write_timeout(nonzero(timeout))?;
    Ok(stream)
}

fn handshake_error(err: HandshakeError<TcpStream>, verifying: bool) -> EngineError {
    match err {
        HandshakeError::SetupFailure(stack) => setup_error(stack),
        HandshakeError::WouldBlock(_) => EngineError::new(ERR_TIMEOUT, "handshake timed out"),
        HandshakeError::Failure(mid) => {
            let verify = mid.ssl().verify_result();
            if verifying && verify != X509VerifyResult::OK {
                return EngineError::new(ERR_CERT_VERIFY, verify.error_string());
            }
            match mid.error().code() {
                ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => {
                    EngineError::new(ERR_TIMEOUT, "handshake timed out")
                }
                _ => EngineError::new(ERR_HANDSHAKE, mid.error().to_string()),
            }
        }
    }
}

fn ssl_failure(err: &openssl::ssl::Error, fallback: i32) -> EngineError {
    match err.code() {
        ErrorCode::ZERO_RETURN => EngineError::new(ERR_PEER_CLOSED, "peer closed the session"),
        ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => {
            EngineError::new(ERR_TIMEOUT, "operation timed out")
        }
        _ => match err.io_error().map(io::Error::kind) {
            Some(io::ErrorKind::ConnectionReset)
            | Some(io::ErrorKind::ConnectionAborted)
            | Some(io::ErrorKind::BrokenPipe) => EngineError::new(ERR_CONN_RESET, err.to_string()),
            _ => EngineError::new(fallback, err.to_string()),
        },
    }
}

fn setup_error(stack: ErrorStack) -> EngineError {
    EngineError::new(ERR_SETUP, stack.to_string())
}

fn socket_error(err: io::Error) -> EngineError {
    EngineError::new(ERR_SOCKET, err.to_string())
}

fn no_session() -> EngineError {
    EngineError::new(ERR_NO_SESSION, "no active session")
}

fn nonzero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

/// Credential data may arrive C-style, NUL-terminated
fn strip_nul(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &data[..end]
}
